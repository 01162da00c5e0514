//! Level-2 heading sanitization.
//!
//! Authors number their steps in many styles; the builder alone decides
//! ordering, so numeric and `STEP` prefixes are stripped before a heading is
//! used as a label.

/// Strip step-numbering prefixes from an H2 title, leaving only the title.
///
/// Handled forms: `STEP 3: Title`, `2. Title`, `a4) Title` and close
/// variants. Unrecognized titles pass through unchanged.
pub fn sanitize_heading(title: &str) -> String {
    let trimmed = title.trim();

    if let Some(rest) = strip_step_prefix(trimmed) {
        return rest.to_string();
    }
    if let Some(rest) = strip_numeric_prefix(trimmed) {
        return rest.to_string();
    }
    trimmed.to_string()
}

/// `STEP <n>` with an optional trailing separator.
fn strip_step_prefix(title: &str) -> Option<&str> {
    let rest = strip_prefix_ignore_case(title, "step")?;
    let rest = rest.trim_start();
    let digits = rest.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits == 0 {
        return None;
    }
    Some(strip_separator(&rest[digits..]))
}

/// `<n>. Title` or `<alnum><n>) Title`.
fn strip_numeric_prefix(title: &str) -> Option<&str> {
    let mut chars = title.char_indices().peekable();

    // Optional single alphanumeric lead-in for the `a1)` form
    if let Some(&(_, first)) = chars.peek() {
        if first.is_ascii_alphabetic() {
            chars.next();
        }
    }

    let digits_start = chars.peek()?.0;
    let mut digits_end = digits_start;
    while let Some(&(i, c)) = chars.peek() {
        if c.is_ascii_digit() {
            digits_end = i + c.len_utf8();
            chars.next();
        } else {
            break;
        }
    }
    if digits_end == digits_start {
        return None;
    }

    let rest = &title[digits_end..];
    let stripped = strip_separator(rest);
    // Require a separator; bare `2 fast 2 furious` is a real title
    if stripped.len() == rest.trim_start().len() && !rest.starts_with([':', '.', ')', '-']) {
        return None;
    }
    Some(stripped)
}

fn strip_separator(rest: &str) -> &str {
    rest.trim_start()
        .trim_start_matches([':', '.', ')', '-'])
        .trim_start()
}

fn strip_prefix_ignore_case<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    if s.len() >= prefix.len() && s[..prefix.len()].eq_ignore_ascii_case(prefix) {
        Some(&s[prefix.len()..])
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_step_prefix() {
        assert_eq!(sanitize_heading("STEP 1: Install deps"), "Install deps");
        assert_eq!(sanitize_heading("Step 12 - Ship it"), "Ship it");
        assert_eq!(sanitize_heading("step 3. Verify"), "Verify");
    }

    #[test]
    fn strips_numeric_prefix() {
        assert_eq!(sanitize_heading("1. Install deps"), "Install deps");
        assert_eq!(sanitize_heading("2) Run tests"), "Run tests");
    }

    #[test]
    fn strips_alnum_numeric_prefix() {
        assert_eq!(sanitize_heading("a1) Configure"), "Configure");
        assert_eq!(sanitize_heading("B2) Deploy"), "Deploy");
    }

    #[test]
    fn leaves_plain_titles_alone() {
        assert_eq!(sanitize_heading("Install deps"), "Install deps");
        assert_eq!(sanitize_heading("2 fast 2 furious"), "2 fast 2 furious");
    }
}
