//! Prompt templates and parse rules for the generation helpers.
//!
//! Each helper is a deterministic pair: a builder that turns its inputs
//! into a role-tagged message list, and a parser that turns the raw
//! completion text into the typed result. The runtime crate executes
//! the builders with a single blocking completion each.
//!
//! | Helper | Input | Output |
//! |--------|-------|--------|
//! | summary | last `window` messages | text, clamped to `max_chars` |
//! | document | full transcript + title | markdown with four sections |
//! | tags | document body (prefix) | up to `max_tags` short tags |
//! | title | summary | text, clamped to `max_chars` |
//! | key points | summary | up to `max_points` lines |

use crate::models::{ChatMessage, Message};

/// Section headings every generated document must carry.
pub const DOCUMENT_SECTIONS: [&str; 4] = ["Overview", "Main Content", "Conclusion", "Notes"];

/// Render messages as `role: content` lines.
pub fn render_transcript(messages: &[Message]) -> String {
    messages
        .iter()
        .map(|m| format!("{}: {}", m.role.as_str(), m.content))
        .collect::<Vec<_>>()
        .join("\n")
}

/// The trailing `window` messages of a transcript.
pub fn tail(messages: &[Message], window: usize) -> &[Message] {
    let start = messages.len().saturating_sub(window);
    &messages[start..]
}

/// Truncate to at most `max_chars` characters, never splitting a char.
pub fn clamp_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].trim_end().to_string(),
        None => text.to_string(),
    }
}

pub fn summary_prompt(messages: &[Message], window: usize, max_chars: usize) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(format!(
            "You are a meticulous note-taking assistant. Summarize the conversation \
             below concisely and accurately in no more than {max_chars} characters. \
             Reply with the summary only."
        )),
        ChatMessage::user(format!(
            "Summarize this conversation:\n\n{}",
            render_transcript(tail(messages, window))
        )),
    ]
}

pub fn parse_summary(raw: &str, max_chars: usize) -> String {
    clamp_chars(raw.trim(), max_chars)
}

pub fn document_prompt(messages: &[Message], title: &str) -> Vec<ChatMessage> {
    let [overview, main, conclusion, notes] = DOCUMENT_SECTIONS;
    vec![
        ChatMessage::system(format!(
            "You are a technical writer. Turn the conversation into a well-structured \
             Markdown document using exactly this layout:\n\
             # <title>\n\n\
             ## {overview}\nA short overview of the topic.\n\n\
             ## {main}\n- key point\n- key point\n- key point\n\n\
             ## {conclusion}\nConclusions or the agreed plan of action.\n\n\
             ## {notes}\nAnything else worth recording."
        )),
        ChatMessage::user(format!(
            "Write the document titled \"{title}\" from this conversation:\n\n{}",
            render_transcript(messages)
        )),
    ]
}

pub fn parse_document(raw: &str) -> String {
    raw.trim().to_string()
}

/// Section headings from [`DOCUMENT_SECTIONS`] missing in `content`.
pub fn missing_sections(content: &str) -> Vec<&'static str> {
    DOCUMENT_SECTIONS
        .iter()
        .copied()
        .filter(|section| {
            !content
                .lines()
                .any(|l| l.trim_start().starts_with("##") && l.contains(section))
        })
        .collect()
}

pub fn tags_prompt(content: &str, input_chars: usize) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(
            "You suggest tags. Propose 3 to 5 short, relevant tags of one to three words \
             each, separated by commas. Reply with the tags only.",
        ),
        ChatMessage::user(format!(
            "Suggest tags for this content:\n\n{}",
            clamp_chars(content, input_chars)
        )),
    ]
}

fn is_tag_separator(c: char) -> bool {
    matches!(c, ',' | '，' | '、' | ';' | '；' | '\n')
}

/// Split a delimited tag list. Never returns empty entries or more than
/// `max_tags` items, whatever the generator produced.
pub fn parse_tags(raw: &str, max_tags: usize) -> Vec<String> {
    let mut tags: Vec<String> = Vec::new();
    for piece in raw.split(is_tag_separator) {
        let tag = piece.trim().trim_start_matches('#').trim();
        if tag.is_empty() || tags.iter().any(|t| t == tag) {
            continue;
        }
        tags.push(tag.to_string());
        if tags.len() == max_tags {
            break;
        }
    }
    tags
}

pub fn title_prompt(summary: &str, max_chars: usize) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(format!(
            "You write titles. Produce one concise, accurate title of at most \
             {max_chars} characters. Reply with the title only."
        )),
        ChatMessage::user(format!("Write a title for this conversation:\n\n{summary}")),
    ]
}

pub fn parse_title(raw: &str, max_chars: usize) -> String {
    let line = raw.lines().map(str::trim).find(|l| !l.is_empty()).unwrap_or("");
    let unquoted = line
        .trim_start_matches('#')
        .trim()
        .trim_matches(|c| c == '"' || c == '\'' || c == '“' || c == '”');
    clamp_chars(unquoted, max_chars)
}

pub fn key_points_prompt(summary: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(
            "You extract key points. List 3 to 5 key points from the conversation, \
             one sentence each, one per line. Reply with the key points only.",
        ),
        ChatMessage::user(format!("Extract the key points from:\n\n{summary}")),
    ]
}

fn strip_list_marker(line: &str) -> &str {
    let line = line.trim();
    for marker in ["- ", "* ", "• "] {
        if let Some(rest) = line.strip_prefix(marker) {
            return rest.trim();
        }
    }
    let digits = line.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits > 0 {
        let rest = &line[digits..];
        if let Some(rest) = rest.strip_prefix('.').or_else(|| rest.strip_prefix(')')) {
            return rest.trim();
        }
    }
    line
}

pub fn parse_key_points(raw: &str, max_points: usize) -> Vec<String> {
    raw.lines()
        .map(strip_list_marker)
        .filter(|l| !l.is_empty())
        .take(max_points)
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;
    use chrono::Utc;

    fn msgs(n: usize) -> Vec<Message> {
        (0..n)
            .map(|i| Message::new("c1", Role::User, &format!("message {i}"), Utc::now()))
            .collect()
    }

    #[test]
    fn test_summary_uses_only_the_tail() {
        let prompt = summary_prompt(&msgs(15), 10, 200);
        let body = &prompt[1].content;
        assert!(!body.contains("message 4\n"));
        assert!(body.contains("message 5"));
        assert!(body.contains("message 14"));
    }

    #[test]
    fn test_document_prompt_uses_full_transcript() {
        let prompt = document_prompt(&msgs(15), "Weekly sync");
        assert!(prompt[1].content.contains("message 0"));
        assert!(prompt[1].content.contains("\"Weekly sync\""));
        for section in DOCUMENT_SECTIONS {
            assert!(prompt[0].content.contains(section));
        }
    }

    #[test]
    fn test_clamp_chars_respects_char_boundaries() {
        assert_eq!(clamp_chars("日本語のテキスト", 3), "日本語");
        assert_eq!(clamp_chars("short", 10), "short");
        assert_eq!(clamp_chars("", 3), "");
    }

    #[test]
    fn test_parse_tags_trailing_comma() {
        assert_eq!(parse_tags("rust, async,", 5), vec!["rust", "async"]);
    }

    #[test]
    fn test_parse_tags_single_tag() {
        assert_eq!(parse_tags("planning", 5), vec!["planning"]);
    }

    #[test]
    fn test_parse_tags_bounded_and_non_empty() {
        let tags = parse_tags("a,b,,c, ,d,e,f,g", 5);
        assert_eq!(tags.len(), 5);
        assert!(tags.iter().all(|t| !t.is_empty()));
    }

    #[test]
    fn test_parse_tags_mixed_separators_and_hashes() {
        assert_eq!(
            parse_tags("#work，会议、 notes\nnotes", 5),
            vec!["work", "会议", "notes"]
        );
        assert!(parse_tags("  , ,\n", 5).is_empty());
    }

    #[test]
    fn test_parse_key_points_strips_markers() {
        let raw = "1. First point\n- Second point\n\n* Third\n2) Fourth\n• Fifth\nSixth";
        assert_eq!(
            parse_key_points(raw, 5),
            vec!["First point", "Second point", "Third", "Fourth", "Fifth"]
        );
    }

    #[test]
    fn test_parse_title_first_line_unquoted() {
        assert_eq!(parse_title("\n\"Quarterly planning\"\nextra", 20), "Quarterly planning");
        assert_eq!(parse_title("# A very long title that keeps going", 10), "A very lon");
    }

    #[test]
    fn test_missing_sections() {
        let doc = "# T\n\n## Overview\nx\n\n## Main Content\n- a\n\n## Conclusion\ny";
        assert_eq!(missing_sections(doc), vec!["Notes"]);
    }
}
