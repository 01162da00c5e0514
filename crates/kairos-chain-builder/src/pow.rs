//! `PROOF OF WORK:` shorthand for binding a shell proof to a step.

use kairos_types::proof::{ProofDefinition, DEFAULT_SHELL_TIMEOUT_SECONDS};

/// Line prefix that introduces the shorthand.
pub const POW_PREFIX: &str = "PROOF OF WORK:";

/// Parse a `PROOF OF WORK: [timeout <N><unit>] <cmd>` line.
///
/// Units are `ms`, `s`, `m`, `h`; a missing or malformed timeout falls back
/// to 60 s and the whole remainder is treated as the command. Returns `None`
/// when no command remains.
pub fn parse_pow_line(line: &str) -> Option<ProofDefinition> {
    let trimmed = line.trim();
    if trimmed.len() < POW_PREFIX.len()
        || !trimmed[..POW_PREFIX.len()].eq_ignore_ascii_case(POW_PREFIX)
    {
        return None;
    }
    let rest = trimmed[POW_PREFIX.len()..].trim();

    let (timeout_seconds, cmd) = match parse_timeout_clause(rest) {
        Some((secs, cmd_rest)) => (secs, cmd_rest),
        None => (DEFAULT_SHELL_TIMEOUT_SECONDS, rest),
    };

    let cmd = cmd.trim();
    if cmd.is_empty() {
        return None;
    }
    Some(ProofDefinition::shell(cmd, timeout_seconds))
}

/// `timeout <N><unit>` at the start of the remainder. Returns the timeout in
/// seconds (at least 1) and the rest of the line.
fn parse_timeout_clause(rest: &str) -> Option<(u32, &str)> {
    let after = strip_keyword(rest, "timeout")?;
    let token_end = after
        .find(char::is_whitespace)
        .unwrap_or(after.len());
    let (token, cmd) = after.split_at(token_end);

    let digits_end = token.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits_end == 0 {
        return None;
    }
    let value: u64 = token[..digits_end].parse().ok()?;
    let seconds = match &token[digits_end..] {
        "ms" => value.div_ceil(1000),
        "s" | "" => value,
        "m" => value.saturating_mul(60),
        "h" => value.saturating_mul(3600),
        _ => return None,
    };
    let seconds = seconds.clamp(1, u32::MAX as u64) as u32;
    Some((seconds, cmd))
}

fn strip_keyword<'a>(s: &'a str, keyword: &str) -> Option<&'a str> {
    if s.len() > keyword.len()
        && s[..keyword.len()].eq_ignore_ascii_case(keyword)
        && s[keyword.len()..].starts_with(char::is_whitespace)
    {
        Some(s[keyword.len()..].trim_start())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kairos_types::proof::ProofParams;

    fn shell_of(def: ProofDefinition) -> (String, u32) {
        match def.params {
            ProofParams::Shell { shell } => (shell.cmd, shell.timeout_seconds),
            _ => panic!("expected shell proof"),
        }
    }

    #[test]
    fn parses_plain_command_with_default_timeout() {
        let def = parse_pow_line("PROOF OF WORK: make test").unwrap();
        assert_eq!(shell_of(def), ("make test".to_string(), 60));
    }

    #[test]
    fn parses_timeout_units() {
        let cases = [
            ("timeout 30s cargo check", 30),
            ("timeout 2m ./integration.sh", 120),
            ("timeout 1h ./soak.sh", 3600),
            ("timeout 500ms true", 1),
            ("timeout 2500ms true", 3),
        ];
        for (rest, expected) in cases {
            let def = parse_pow_line(&format!("PROOF OF WORK: {rest}")).unwrap();
            let (_, secs) = shell_of(def);
            assert_eq!(secs, expected, "case: {rest}");
        }
    }

    #[test]
    fn malformed_timeout_falls_back_to_command() {
        let def = parse_pow_line("PROOF OF WORK: timeout soon make build").unwrap();
        let (cmd, secs) = shell_of(def);
        assert_eq!(cmd, "timeout soon make build");
        assert_eq!(secs, 60);
    }

    #[test]
    fn case_insensitive_prefix() {
        assert!(parse_pow_line("proof of work: ls").is_some());
    }

    #[test]
    fn no_command_yields_none() {
        assert!(parse_pow_line("PROOF OF WORK:").is_none());
        assert!(parse_pow_line("PROOF OF WORK: timeout 5s").is_none());
        assert!(parse_pow_line("unrelated line").is_none());
    }
}
