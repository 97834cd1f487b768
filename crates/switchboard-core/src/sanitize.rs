//! Outbound sanitizer
//!
//! Agent output may carry `<internal>...</internal>` blocks holding reasoning or
//! tool-call markup. None of it may reach an external channel. The upstream
//! agent sometimes closes a block with `</invoke>` instead, so both closers are
//! accepted. When in doubt the sanitizer drops text rather than leak it.

use regex::Regex;
use std::sync::LazyLock;
use tracing::{debug, warn};

static COMPLETE_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<internal>.*?(?:</internal>|</invoke>)").expect("valid block regex")
});

static OPEN_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<internal>").expect("valid open marker regex"));

static STRAY_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)</?internal>|</invoke>").expect("valid stray marker regex"));

/// Remove every internal block from `text` and trim the result.
///
/// An opener with no closer after it cuts the text at the opener: everything
/// from there on is discarded.
pub fn strip_internal(text: &str) -> String {
    let mut out = text.to_string();

    // Deleting a marker can splice its neighbours into a new one, so repeat the
    // whole pass until nothing changes.
    loop {
        let next = strip_pass(&out);
        if next == out {
            break;
        }
        out = next;
    }

    out.trim().to_string()
}

fn strip_pass(text: &str) -> String {
    let mut out = text.to_string();

    loop {
        let next = COMPLETE_BLOCK.replace_all(&out, "");
        if next == out {
            break;
        }
        out = next.into_owned();
    }

    if let Some(m) = OPEN_MARKER.find(&out) {
        warn!(
            "Dropping unterminated internal block ({} trailing bytes)",
            out.len() - m.start()
        );
        out.truncate(m.start());
    }

    STRAY_MARKER.replace_all(&out, "").into_owned()
}

/// Sanitize agent output for sending. `None` means there is nothing to send.
pub fn format_outbound(raw: &str) -> Option<String> {
    let text = strip_internal(raw);
    if text.is_empty() {
        debug!("Outbound text empty after sanitizing, nothing to send");
        None
    } else {
        Some(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_removes_block_with_malformed_closer() {
        assert_eq!(
            strip_internal("hello <internal>secret</invoke> world"),
            "hello  world"
        );
    }

    #[test]
    fn test_removes_block_with_canonical_closer() {
        assert_eq!(
            strip_internal("before <internal>thinking</internal> after"),
            "before  after"
        );
    }

    #[test]
    fn test_unterminated_block_keeps_prefix_only() {
        assert_eq!(strip_internal("partial <internal>never closes"), "partial");
        let out = strip_internal("ok <internal>a</internal> then <internal>leak me\nmore");
        assert_eq!(out, "ok  then");
        assert!(!out.contains("leak"));
    }

    #[test]
    fn test_case_insensitive_and_multiline() {
        let input = "A <INTERNAL>line one\nline two</Internal> B";
        assert_eq!(strip_internal(input), "A  B");
    }

    #[test]
    fn test_shortest_match() {
        let input = "<internal>x</internal>keep<internal>y</invoke>";
        assert_eq!(strip_internal(input), "keep");
    }

    #[test]
    fn test_nested_block_leaves_no_markers() {
        let input = "a <internal>one <internal>two</internal> three</internal> b";
        let out = strip_internal(input);
        assert!(!out.to_lowercase().contains("internal"));
        assert!(!out.contains("two"));
        assert!(out.starts_with("a "));
        assert!(out.ends_with(" b"));
    }

    #[test]
    fn test_lone_closer_removed() {
        assert_eq!(strip_internal("done</internal>"), "done");
        assert_eq!(strip_internal("</INTERNAL> hi"), "hi");
    }

    #[test]
    fn test_lone_invoke_closer_removed() {
        assert_eq!(strip_internal("done </invoke>"), "done");
        assert_eq!(strip_internal("use </INVOKE> tags"), "use  tags");
    }

    #[test]
    fn test_removing_stray_closer_cannot_form_opener() {
        let out = strip_internal("hi <inte</internal>rnal>secret plan");
        assert_eq!(out, "hi");
        assert!(!out.contains("secret"));

        let out = strip_internal("a <inte</invoke>rnal>b</inter</internal>nal> c");
        assert!(!out.to_lowercase().contains("<internal>"));
    }

    #[test]
    fn test_plain_text_is_trimmed_only() {
        assert_eq!(strip_internal("  plain text\n"), "plain text");
        assert_eq!(strip_internal("a < b > c"), "a < b > c");
    }

    #[test]
    fn test_idempotent() {
        let inputs = [
            "hello <internal>secret</invoke> world",
            "partial <internal>never closes",
            "x </internal> y",
            "hi <inte</internal>rnal>secret plan",
            "done </invoke>",
            "  untouched  ",
        ];
        for input in inputs {
            let once = strip_internal(input);
            assert_eq!(strip_internal(&once), once);
        }
    }

    #[test]
    fn test_format_outbound_empty() {
        assert_eq!(format_outbound("<internal>only thoughts</internal>"), None);
        assert_eq!(format_outbound("   "), None);
        assert_eq!(format_outbound("<internal>cut off"), None);
        assert_eq!(format_outbound(" hi "), Some("hi".to_string()));
    }
}
