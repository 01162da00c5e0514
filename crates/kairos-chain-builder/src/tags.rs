//! Tag derivation: body keywords plus identifiers found in fenced code.

use std::collections::HashMap;

const MAX_KEYWORDS: usize = 5;
const MAX_CODE_IDENTIFIERS: usize = 5;

const STOPWORDS: &[&str] = &[
    "this", "that", "with", "from", "your", "then", "than", "when", "have", "will", "step",
    "must", "should", "into", "after", "before", "been", "each", "only", "also", "what", "where",
    "there", "their", "about", "using", "used", "them", "they", "some", "such", "here", "make",
    "sure", "does", "which", "these", "those", "following",
];

/// Derive ordered tags for a step: the most frequent body keywords followed
/// by up to five identifiers discovered in fenced code blocks.
pub fn derive_tags(body: &str, code_blocks: &[String]) -> Vec<String> {
    let mut tags = extract_keywords(body);
    for ident in extract_identifiers(code_blocks) {
        if !tags.contains(&ident) {
            tags.push(ident);
        }
    }
    tags
}

fn extract_keywords(body: &str) -> Vec<String> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    let mut order: Vec<String> = Vec::new();

    for line in body.lines() {
        // Fenced code contributes identifiers, not keywords
        if line.trim_start().starts_with("```") {
            continue;
        }
        for raw in line.split(|c: char| !c.is_ascii_alphabetic()) {
            let word = raw.to_lowercase();
            if word.len() < 4 || STOPWORDS.contains(&word.as_str()) {
                continue;
            }
            let count = counts.entry(word.clone()).or_insert(0);
            if *count == 0 {
                order.push(word);
            }
            *count += 1;
        }
    }

    let mut ranked: Vec<(usize, String)> = order
        .into_iter()
        .enumerate()
        .map(|(first_seen, word)| {
            let count = counts[&word];
            (first_seen, word, count)
        })
        .map(|(first_seen, word, count)| (count * 10_000 - first_seen.min(9_999), word))
        .collect();
    ranked.sort_by(|a, b| b.0.cmp(&a.0));
    ranked
        .into_iter()
        .take(MAX_KEYWORDS)
        .map(|(_, word)| word)
        .collect()
}

/// Identifier-looking tokens (snake_case or camelCase, length >= 4) from
/// fenced code, first occurrence order, capped at five.
fn extract_identifiers(code_blocks: &[String]) -> Vec<String> {
    let mut found = Vec::new();
    for block in code_blocks {
        for raw in block.split(|c: char| !c.is_ascii_alphanumeric() && c != '_') {
            if raw.len() < 4 || raw.chars().next().is_some_and(|c| c.is_ascii_digit()) {
                continue;
            }
            if !looks_like_identifier(raw) {
                continue;
            }
            let ident = raw.to_string();
            if !found.contains(&ident) {
                found.push(ident);
                if found.len() == MAX_CODE_IDENTIFIERS {
                    return found;
                }
            }
        }
    }
    found
}

fn looks_like_identifier(token: &str) -> bool {
    let has_underscore = token.contains('_');
    let has_hump = token.chars().skip(1).any(|c| c.is_ascii_uppercase())
        && token.chars().any(|c| c.is_ascii_lowercase());
    has_underscore || has_hump
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keywords_ranked_by_frequency() {
        let body = "Deploy the service. Deploy requires a healthy cluster. \
                    Check cluster status and deploy again if needed.";
        let tags = derive_tags(body, &[]);
        assert_eq!(tags[0], "deploy");
        assert!(tags.contains(&"cluster".to_string()));
    }

    #[test]
    fn identifiers_come_from_code_blocks() {
        let code = vec!["run_migrations(&pool).await?;\nlet retryCount = 3;".to_string()];
        let tags = derive_tags("short body", &code);
        assert!(tags.contains(&"run_migrations".to_string()));
        assert!(tags.contains(&"retryCount".to_string()));
    }

    #[test]
    fn identifier_cap_is_five() {
        let code = vec![
            "alpha_one beta_two gamma_three delta_four epsilon_five zeta_six".to_string(),
        ];
        let idents = extract_identifiers(&code);
        assert_eq!(idents.len(), 5);
        assert!(!idents.contains(&"zeta_six".to_string()));
    }

    #[test]
    fn stopwords_and_short_words_excluded() {
        let tags = derive_tags("This should make sure the fix is ok", &[]);
        assert!(!tags.contains(&"this".to_string()));
        assert!(!tags.contains(&"should".to_string()));
        assert!(!tags.contains(&"ok".to_string()));
    }
}
