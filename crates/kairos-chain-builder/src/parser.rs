//! Line-oriented state machine slicing a markdown document into chains and
//! steps.

use kairos_types::proof::{
    CommentProof, McpProof, ProofDefinition, ProofParams, ShellProof, UserInputProof,
    DEFAULT_COMMENT_MIN_LENGTH, DEFAULT_SHELL_TIMEOUT_SECONDS,
};
use serde_json::Value;

use crate::headings::sanitize_heading;
use crate::pow::parse_pow_line;
use crate::tags::derive_tags;

/// One parsed chain: an H1 section (or the whole document when no H1
/// exists), sliced into ordered steps.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainDoc {
    pub label: String,
    pub steps: Vec<StepDraft>,
}

/// One step slice: body text, display label, tags, and the proof definition
/// bound by its challenge block (if any).
#[derive(Debug, Clone, PartialEq)]
pub struct StepDraft {
    pub label: String,
    pub body: String,
    pub proof: Option<ProofDefinition>,
    pub tags: Vec<String>,
}

/// Parse a markdown document into its chains.
///
/// Sections that slice to zero steps (blank H1 sections) are dropped.
pub fn parse_document(markdown: &str) -> Vec<ChainDoc> {
    split_sections(markdown)
        .into_iter()
        .filter_map(build_chain)
        .collect()
}

struct Section<'a> {
    label: String,
    lines: Vec<&'a str>,
}

/// Split at level-1 headings found outside fenced code blocks.
///
/// With no H1 present the whole document becomes one section labeled by its
/// first H2 (or unlabeled). Content before the first H1 belongs to no
/// section and is dropped.
fn split_sections(markdown: &str) -> Vec<Section<'_>> {
    let mut sections: Vec<Section> = Vec::new();
    let mut in_fence = false;

    for line in markdown.lines() {
        if is_fence_delimiter(line) {
            in_fence = !in_fence;
        }
        if !in_fence && is_h1(line) {
            sections.push(Section {
                label: line.trim_start_matches('#').trim().to_string(),
                lines: Vec::new(),
            });
            continue;
        }
        if let Some(section) = sections.last_mut() {
            section.lines.push(line);
        }
    }

    if !sections.is_empty() {
        return sections;
    }

    // No H1: one implicit section labeled by the first H2 outside fences
    let lines: Vec<&str> = markdown.lines().collect();
    let mut label = String::new();
    let mut in_fence = false;
    for line in &lines {
        if is_fence_delimiter(line) {
            in_fence = !in_fence;
            continue;
        }
        if !in_fence && is_h2(line) {
            label = sanitize_heading(line.trim_start_matches('#').trim());
            break;
        }
    }
    vec![Section { label, lines }]
}

fn is_h1(line: &str) -> bool {
    line.starts_with("# ")
}

fn is_h2(line: &str) -> bool {
    line.starts_with("## ")
}

fn is_fence_delimiter(line: &str) -> bool {
    line.trim_start().starts_with("```")
}

/// Slice an H1 section into steps at its challenge blocks.
fn build_chain(section: Section<'_>) -> Option<ChainDoc> {
    let mut steps: Vec<StepDraft> = Vec::new();
    let mut body_lines: Vec<&str> = Vec::new();
    let mut step_label: Option<String> = None;
    let mut code_blocks: Vec<String> = Vec::new();

    let mut in_fence = false;
    let mut fence_lang = "";
    let mut fence_open = "";
    let mut fence_lines: Vec<&str> = Vec::new();

    for &line in &section.lines {
        if in_fence {
            if is_fence_delimiter(line) {
                in_fence = false;
                let content = fence_lines.join("\n");
                if fence_lang.eq_ignore_ascii_case("json") {
                    if let Some(challenge) = challenge_object(&content) {
                        // The challenge block ends the current step and is
                        // not part of any body
                        steps.push(finish_step(
                            &mut body_lines,
                            &mut step_label,
                            &mut code_blocks,
                            proof_from_challenge(&challenge),
                            &section.label,
                            steps.len(),
                        ));
                        fence_lines.clear();
                        continue;
                    }
                }
                // Ordinary fenced block: part of the body, identifiers
                // contribute to tags
                body_lines.push(fence_open);
                body_lines.extend(fence_lines.drain(..));
                body_lines.push(line);
                code_blocks.push(content);
            } else {
                fence_lines.push(line);
            }
            continue;
        }

        if is_fence_delimiter(line) {
            in_fence = true;
            fence_open = line;
            fence_lang = line.trim_start().trim_start_matches('`').trim();
            fence_lines.clear();
            continue;
        }

        if is_h2(line) && step_label.is_none() {
            step_label = Some(sanitize_heading(line.trim_start_matches('#').trim()));
        }
        body_lines.push(line);
    }

    // Unclosed fence: keep its text as body
    if in_fence {
        body_lines.push(fence_open);
        body_lines.extend(fence_lines.drain(..));
    }

    if steps.is_empty() {
        // No challenge blocks: the whole section is one step, with an
        // optional trailing PROOF OF WORK shorthand
        let proof = take_trailing_pow(&mut body_lines);
        let draft = finish_step(
            &mut body_lines,
            &mut step_label,
            &mut code_blocks,
            proof,
            &section.label,
            0,
        );
        if draft.body.is_empty() && draft.proof.is_none() {
            return None;
        }
        steps.push(draft);
    } else if body_lines.iter().any(|line| !line.trim().is_empty()) {
        // Trailing content after the last challenge block: a final step
        // with no proof obligation
        steps.push(finish_step(
            &mut body_lines,
            &mut step_label,
            &mut code_blocks,
            None,
            &section.label,
            steps.len(),
        ));
    }

    Some(ChainDoc {
        label: section.label,
        steps,
    })
}

fn finish_step(
    body_lines: &mut Vec<&str>,
    step_label: &mut Option<String>,
    code_blocks: &mut Vec<String>,
    proof: Option<ProofDefinition>,
    chain_label: &str,
    index: usize,
) -> StepDraft {
    let body = body_lines.join("\n").trim().to_string();
    body_lines.clear();

    let label = step_label
        .take()
        .filter(|l| !l.is_empty())
        .or_else(|| {
            if chain_label.is_empty() {
                None
            } else {
                Some(chain_label.to_string())
            }
        })
        .unwrap_or_else(|| format!("Step {}", index + 1));

    let code = std::mem::take(code_blocks);
    let tags = derive_tags(&body, &code);

    StepDraft {
        label,
        body,
        proof,
        tags,
    }
}

/// Pop a trailing `PROOF OF WORK:` line off the body, if present.
fn take_trailing_pow(body_lines: &mut Vec<&str>) -> Option<ProofDefinition> {
    let last_content = body_lines.iter().rposition(|line| !line.trim().is_empty())?;
    let proof = parse_pow_line(body_lines[last_content])?;
    body_lines.truncate(last_content);
    Some(proof)
}

/// Parse a fenced block as JSON and return its `challenge` object.
fn challenge_object(content: &str) -> Option<Value> {
    let value: Value = serde_json::from_str(content).ok()?;
    value.as_object()?.get("challenge").cloned()
}

/// Build a proof definition from a challenge object. Type-specific
/// parameters are accepted both nested under the type key and flat on the
/// challenge itself; anything malformed yields `None` rather than an error.
fn proof_from_challenge(challenge: &Value) -> Option<ProofDefinition> {
    let obj = challenge.as_object()?;
    let kind = obj.get("type")?.as_str()?;
    let required = obj.get("required").and_then(Value::as_bool).unwrap_or(true);

    fn params_block<'a>(
        obj: &'a serde_json::Map<String, Value>,
        key: &str,
    ) -> &'a serde_json::Map<String, Value> {
        obj.get(key).and_then(Value::as_object).unwrap_or(obj)
    }

    let params = match kind {
        "shell" => {
            let block = params_block(obj, "shell");
            let cmd = block.get("cmd").and_then(Value::as_str)?.to_string();
            let timeout_seconds = block
                .get("timeout_seconds")
                .and_then(Value::as_u64)
                .unwrap_or(DEFAULT_SHELL_TIMEOUT_SECONDS as u64)
                .clamp(1, u32::MAX as u64) as u32;
            ProofParams::Shell {
                shell: ShellProof {
                    cmd,
                    timeout_seconds,
                },
            }
        }
        "mcp" => {
            let block = params_block(obj, "mcp");
            ProofParams::Mcp {
                mcp: McpProof {
                    tool_name: block.get("tool_name").and_then(Value::as_str)?.to_string(),
                    expected_result: block.get("expected_result").cloned(),
                },
            }
        }
        "user_input" => {
            let block = params_block(obj, "user_input");
            ProofParams::UserInput {
                user_input: UserInputProof {
                    prompt: block
                        .get("prompt")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                },
            }
        }
        "comment" => {
            let block = params_block(obj, "comment");
            ProofParams::Comment {
                comment: CommentProof {
                    min_length: block
                        .get("min_length")
                        .and_then(Value::as_u64)
                        .unwrap_or(DEFAULT_COMMENT_MIN_LENGTH as u64)
                        .max(1) as usize,
                },
            }
        }
        _ => return None,
    };

    Some(ProofDefinition { params, required })
}

#[cfg(test)]
mod tests {
    use super::*;
    use kairos_types::proof::ProofType;

    const TWO_STEP_DOC: &str = r#"# Build and Test

## Build the project

Run make and fix anything that breaks.

```json
{"challenge": {"type": "comment", "min_length": 10}}
```

## Run the tests

Run make test and confirm everything passes.

```json
{"challenge": {"type": "comment", "comment": {"min_length": 10}}}
```
"#;

    #[test]
    fn slices_steps_at_challenge_blocks() {
        let docs = parse_document(TWO_STEP_DOC);
        assert_eq!(docs.len(), 1);
        let chain = &docs[0];
        assert_eq!(chain.label, "Build and Test");
        assert_eq!(chain.steps.len(), 2);

        assert_eq!(chain.steps[0].label, "Build the project");
        assert!(chain.steps[0].body.contains("Run make and fix"));
        assert!(!chain.steps[0].body.contains("challenge"));
        let proof = chain.steps[0].proof.as_ref().unwrap();
        assert_eq!(proof.kind(), ProofType::Comment);
        assert!(proof.required);

        // Nested and flat parameter forms parse identically
        assert_eq!(chain.steps[0].proof, chain.steps[1].proof);
    }

    #[test]
    fn trailing_content_becomes_unproofed_final_step() {
        let doc = format!("{TWO_STEP_DOC}\n## Wrap up\n\nCelebrate responsibly.\n");
        let docs = parse_document(&doc);
        let chain = &docs[0];
        assert_eq!(chain.steps.len(), 3);
        assert_eq!(chain.steps[2].label, "Wrap up");
        assert!(chain.steps[2].proof.is_none());
    }

    #[test]
    fn multiple_h1_sections_become_multiple_chains() {
        let doc = "# First\n\nbody one\n\n# Second\n\nbody two\n";
        let docs = parse_document(doc);
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].label, "First");
        assert_eq!(docs[1].label, "Second");
        assert_eq!(docs[0].steps.len(), 1);
    }

    #[test]
    fn no_h1_uses_first_h2_as_chain_label() {
        let doc = "## STEP 1: Configure\n\nSet the flags.\n";
        let docs = parse_document(doc);
        assert_eq!(docs[0].label, "Configure");
        assert_eq!(docs[0].steps[0].label, "Configure");
    }

    #[test]
    fn h1_inside_fence_does_not_split() {
        let doc = "# Only Chain\n\n```\n# not a heading\n```\n\nafter\n";
        let docs = parse_document(doc);
        assert_eq!(docs.len(), 1);
        assert!(docs[0].steps[0].body.contains("# not a heading"));
    }

    #[test]
    fn pow_shorthand_binds_shell_proof() {
        let doc = "# Deploy\n\nShip the service.\n\nPROOF OF WORK: timeout 2m ./deploy.sh\n";
        let docs = parse_document(doc);
        let step = &docs[0].steps[0];
        let proof = step.proof.as_ref().unwrap();
        match &proof.params {
            ProofParams::Shell { shell } => {
                assert_eq!(shell.cmd, "./deploy.sh");
                assert_eq!(shell.timeout_seconds, 120);
            }
            other => panic!("expected shell proof, got {other:?}"),
        }
        assert!(!step.body.contains("PROOF OF WORK"));
    }

    #[test]
    fn non_challenge_json_stays_in_body() {
        let doc = "# Config\n\nUse this:\n\n```json\n{\"port\": 8080}\n```\n";
        let docs = parse_document(doc);
        let step = &docs[0].steps[0];
        assert_eq!(docs[0].steps.len(), 1);
        assert!(step.body.contains("\"port\": 8080"));
        assert!(step.proof.is_none());
    }

    #[test]
    fn step_without_h2_falls_back_to_chain_label() {
        let doc = "# Release\n\nTag the commit.\n";
        let docs = parse_document(doc);
        assert_eq!(docs[0].steps[0].label, "Release");
    }

    #[test]
    fn parsing_is_deterministic() {
        let first = parse_document(TWO_STEP_DOC);
        let second = parse_document(TWO_STEP_DOC);
        assert_eq!(first, second);
    }

    #[test]
    fn blank_sections_are_dropped() {
        let docs = parse_document("# Empty\n\n\n# Real\n\ncontent\n");
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].label, "Real");
    }

    #[test]
    fn malformed_challenge_still_cuts_step_without_proof() {
        let doc = "# Chain\n\nbody\n\n```json\n{\"challenge\": {\"type\": \"teleport\"}}\n```\n";
        let docs = parse_document(doc);
        assert_eq!(docs[0].steps.len(), 1);
        assert!(docs[0].steps[0].proof.is_none());
    }
}
