use regex::Regex;
use std::sync::OnceLock;

/// Reserved `<think>` body meaning "no tokens have arrived yet".
pub const PENDING_SENTINEL: &str = "thinking...";

/// Language label used when a fence carries no tag.
pub const DEFAULT_LANGUAGE: &str = "typescript";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Text(String),
    Code { language: String, content: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThinkSpan<'a> {
    Plain(&'a str),
    Think(&'a str),
    Pending,
}

fn fence_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```(\w+)?\n(.*?)```").expect("fence pattern compiles"))
}

fn think_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<think>(.*?)</think>").expect("think pattern compiles"))
}

/// Split message content into plain-text and fenced-code segments, in source
/// order. Text between matches is kept verbatim; code content is trimmed and
/// labeled with the fence's language tag. An unterminated fence does not
/// match and flows through as plain text, which is what we want while a
/// stream is still mid-fence.
pub fn segment(text: &str) -> Vec<Segment> {
    let mut parts = Vec::new();
    let mut last = 0;

    for caps in fence_regex().captures_iter(text) {
        let whole = match caps.get(0) {
            Some(m) => m,
            None => continue,
        };
        if whole.start() > last {
            parts.push(Segment::Text(text[last..whole.start()].to_string()));
        }
        let language = caps
            .get(1)
            .map_or(DEFAULT_LANGUAGE, |m| m.as_str())
            .to_string();
        let content = caps.get(2).map_or("", |m| m.as_str()).trim().to_string();
        parts.push(Segment::Code { language, content });
        last = whole.end();
    }

    if last < text.len() {
        parts.push(Segment::Text(text[last..].to_string()));
    }

    parts
}

/// Split a text segment into `<think>...</think>` annotation spans and the
/// plain text around them. The reserved body `thinking...` is the pending
/// indicator for a generation that has not produced tokens yet.
pub fn split_think(text: &str) -> Vec<ThinkSpan<'_>> {
    let mut spans = Vec::new();
    let mut last = 0;

    for caps in think_regex().captures_iter(text) {
        let whole = match caps.get(0) {
            Some(m) => m,
            None => continue,
        };
        if whole.start() > last {
            spans.push(ThinkSpan::Plain(&text[last..whole.start()]));
        }
        let body = caps.get(1).map_or("", |m| m.as_str());
        if body == PENDING_SENTINEL {
            spans.push(ThinkSpan::Pending);
        } else {
            spans.push(ThinkSpan::Think(body));
        }
        last = whole.end();
    }

    if last < text.len() {
        spans.push(ThinkSpan::Plain(&text[last..]));
    }

    spans
}

/// Content of the assistant placeholder created when a prompt is sent.
pub fn pending_placeholder() -> String {
    format!("<think>{}</think>", PENDING_SENTINEL)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_is_a_single_segment() {
        let parts = segment("hello there");
        assert_eq!(parts, vec![Segment::Text("hello there".to_string())]);
    }

    #[test]
    fn fenced_code_with_language_tag() {
        let parts = segment("before\n```rust\nfn main() {}\n```\nafter");
        assert_eq!(
            parts,
            vec![
                Segment::Text("before\n".to_string()),
                Segment::Code {
                    language: "rust".to_string(),
                    content: "fn main() {}".to_string(),
                },
                Segment::Text("\nafter".to_string()),
            ]
        );
    }

    #[test]
    fn missing_language_tag_falls_back() {
        let parts = segment("```\nx = 1\n```");
        assert_eq!(
            parts,
            vec![Segment::Code {
                language: DEFAULT_LANGUAGE.to_string(),
                content: "x = 1".to_string(),
            }]
        );
    }

    #[test]
    fn code_content_is_trimmed_but_text_is_verbatim() {
        let parts = segment("  lead  \n```py\n\n  code  \n\n```");
        assert_eq!(
            parts,
            vec![
                Segment::Text("  lead  \n".to_string()),
                Segment::Code {
                    language: "py".to_string(),
                    content: "code".to_string(),
                },
            ]
        );
    }

    #[test]
    fn unterminated_fence_stays_plain_text() {
        let input = "look:\n```rust\nlet x = 1;";
        let parts = segment(input);
        assert_eq!(parts, vec![Segment::Text(input.to_string())]);
    }

    #[test]
    fn segmenting_is_idempotent_on_closed_input() {
        let input = "a\n```c\nputs(1);\n```\nb\n```\nraw\n```";
        let first = segment(input);
        let second = segment(input);
        assert_eq!(first, second);
        assert_eq!(first.len(), 4);
    }

    #[test]
    fn multiple_fences_preserve_order() {
        let parts = segment("```a\n1\n```mid```b\n2\n```");
        assert_eq!(
            parts,
            vec![
                Segment::Code {
                    language: "a".to_string(),
                    content: "1".to_string(),
                },
                Segment::Text("mid".to_string()),
                Segment::Code {
                    language: "b".to_string(),
                    content: "2".to_string(),
                },
            ]
        );
    }

    #[test]
    fn pending_sentinel_becomes_pending_span() {
        let spans = split_think("<think>thinking...</think>");
        assert_eq!(spans, vec![ThinkSpan::Pending]);
    }

    #[test]
    fn think_body_is_kept_verbatim() {
        let spans = split_think("a <think>pondering deeply</think> b");
        assert_eq!(
            spans,
            vec![
                ThinkSpan::Plain("a "),
                ThinkSpan::Think("pondering deeply"),
                ThinkSpan::Plain(" b"),
            ]
        );
    }

    #[test]
    fn unterminated_think_stays_plain() {
        let spans = split_think("so <think>hmm");
        assert_eq!(spans, vec![ThinkSpan::Plain("so <think>hmm")]);
    }

    #[test]
    fn placeholder_round_trips_through_the_splitter() {
        let placeholder = pending_placeholder();
        let spans = split_think(&placeholder);
        assert_eq!(spans, vec![ThinkSpan::Pending]);
    }
}
