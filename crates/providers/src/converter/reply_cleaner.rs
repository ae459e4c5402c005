//! 上游回复清洗
//!
//! 上游在联网搜索模式下用 `$~~~$` 分隔正文和引用元数据，
//! 这里挑出正文并去掉前置的 JSON/数组噪声。

use once_cell::sync::Lazy;
use regex::Regex;

/// 正文与元数据之间的分隔符
pub const SEGMENT_DELIMITER: &str = "$~~~$";

/// 候选正文段的最小长度
const MIN_SEGMENT_CHARS: usize = 20;

static LEADING_BRACKET: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\[.*?\]").expect("leading bracket regex"));
static LEADING_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[{\[].*?[}\]]").expect("leading block regex"));
static SOURCES_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^Sources:.*$").expect("sources line regex"));
static BLANK_LINES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\n\s*\n").expect("blank lines regex"));

/// 清洗上游回复
///
/// 联网搜索模式下先按分隔符切分，取最长的非元数据段作为正文；
/// 然后去掉前置的 `[...]` / `{...}` 块、分隔符、`Sources:` 行，
/// 合并空行并去掉首尾空白。
pub fn clean_reply(raw: &str, web_search: bool) -> String {
    let mut answer = raw;

    if web_search && raw.contains(SEGMENT_DELIMITER) {
        if let Some(segment) = select_answer_segment(raw) {
            answer = segment;
        }
    }

    let answer = LEADING_BRACKET.replace(answer, "");
    let answer = answer.replace(SEGMENT_DELIMITER, "");
    let answer = LEADING_BLOCK.replace(&answer, "");
    let answer = SOURCES_LINE.replace_all(&answer, "");
    let answer = BLANK_LINES.replace_all(&answer, "\n");
    answer.trim().to_string()
}

/// 回复是否足够长，可以直接返回给用户
pub fn is_plausible_reply(text: &str, min_chars: usize) -> bool {
    !text.is_empty() && text.chars().count() >= min_chars
}

fn select_answer_segment(raw: &str) -> Option<&str> {
    raw.split(SEGMENT_DELIMITER)
        .map(str::trim)
        .filter(|part| is_answer_segment(part))
        .max_by_key(|part| part.chars().count())
}

fn is_answer_segment(part: &str) -> bool {
    part.chars().count() > MIN_SEGMENT_CHARS
        && !part.starts_with('[')
        && !part.starts_with('{')
        && !part.contains("Sources:")
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_plain_answer_unchanged() {
        let answer = "Rust ownership rules prevent data races at compile time.";
        assert_eq!(clean_reply(answer, false), answer);
        assert_eq!(clean_reply(answer, true), answer);
    }

    #[test]
    fn test_web_search_picks_longest_answer_segment() {
        let raw = concat!(
            r#"[{"title":"Rust","link":"https://www.rust-lang.org"}]"#,
            "$~~~$",
            "Rust is a systems programming language focused on safety.",
            "$~~~$",
            "Sources: rust-lang.org, docs.rs and friends",
            "$~~~$",
            "short tail",
        );

        assert_eq!(
            clean_reply(raw, true),
            "Rust is a systems programming language focused on safety."
        );
    }

    #[test]
    fn test_delimiters_removed_without_web_search() {
        let raw = "Answer part one.$~~~$ continues here.";
        assert_eq!(clean_reply(raw, false), "Answer part one. continues here.");
    }

    #[test]
    fn test_web_search_without_candidates_keeps_body() {
        let raw = "tiny$~~~$[1,2,3]";
        assert_eq!(clean_reply(raw, true), "tiny[1,2,3]");
    }

    #[test]
    fn test_leading_noise_removed() {
        assert_eq!(
            clean_reply("[meta:1]The actual answer is here.", false),
            "The actual answer is here."
        );
        assert_eq!(
            clean_reply(r#"{"id":"abc"}The actual answer is here."#, false),
            "The actual answer is here."
        );
    }

    #[test]
    fn test_sources_lines_and_blank_lines() {
        let raw = "First line.\n\n\nSecond line.\nSources: a, b\n\nThird line.\n";
        assert_eq!(
            clean_reply(raw, false),
            "First line.\nSecond line.\nThird line."
        );
    }

    #[test]
    fn test_is_plausible_reply() {
        assert!(!is_plausible_reply("", 10));
        assert!(!is_plausible_reply("too short", 10));
        assert!(is_plausible_reply("long enough", 10));
        // 按字符而非字节计数
        assert!(!is_plausible_reply("身份轮换调度器", 10));
    }

    proptest! {
        #[test]
        fn prop_clean_is_idempotent(raw in "[a-zA-Z0-9 .,!?\n]{0,120}", web in any::<bool>()) {
            let once = clean_reply(&raw, web);
            let twice = clean_reply(&once, web);
            prop_assert_eq!(once, twice);
        }

        #[test]
        fn prop_clean_text_unchanged(lines in prop::collection::vec("[a-zA-Z0-9][a-zA-Z0-9 .,!?]{0,40}[a-zA-Z0-9.!?]", 1..6)) {
            let text = lines.join("\n");
            prop_assert_eq!(clean_reply(&text, true), text);
        }
    }
}
