//! HEADER/BODY/FOOTER markers wrapping rendered step text.

/// Marker opening the editable body region of a step's text.
pub const BODY_START: &str = "KAIROS:BODY-START";

/// Marker closing the editable body region.
pub const BODY_END: &str = "KAIROS:BODY-END";

/// Extract the body region from a marked-up text.
///
/// When both markers are present the slice between them is returned with
/// surrounding newlines trimmed; otherwise the input is returned unchanged.
pub fn extract_body(text: &str) -> &str {
    let Some(start) = text.find(BODY_START) else {
        return text;
    };
    let after_start = start + BODY_START.len();
    let Some(end) = text[after_start..].find(BODY_END) else {
        return text;
    };
    text[after_start..after_start + end].trim_matches(['\n', '\r'])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_between_markers() {
        let text = format!("header\n{BODY_START}\nthe body\nline two\n{BODY_END}\nfooter");
        assert_eq!(extract_body(&text), "the body\nline two");
    }

    #[test]
    fn passthrough_without_markers() {
        assert_eq!(extract_body("plain body"), "plain body");
    }

    #[test]
    fn passthrough_with_unclosed_marker() {
        let text = format!("{BODY_START}\ndangling");
        assert_eq!(extract_body(&text), text);
    }
}
