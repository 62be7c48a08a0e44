//! Format detector (§4.B): decides whether cleaned source is a full JSON
//! plan, a JSON plan embedded inside surrounding text, or the line-oriented
//! text format.

use crate::json;

/// The three shapes `parse_source` can route cleaned input through.
#[derive(Debug, Clone, PartialEq)]
pub enum DetectedFormat<'a> {
    /// The entire source is a single JSON value.
    Json(&'a str),
    /// A JSON block is embedded inside surrounding text; `block` is the
    /// extracted `[`/`{` .. `]`/`}` span.
    EmbeddedJson { block: &'a str },
    /// Neither of the above — route through the text line parser.
    Text(&'a str),
}

/// Detects the format of cleaned source text (§4.B).
pub fn detect(source: &str) -> DetectedFormat<'_> {
    if json::looks_like_json(source.trim()) {
        return DetectedFormat::Json(source);
    }

    if let Some(block) = find_embedded_json_block(source) {
        return DetectedFormat::EmbeddedJson { block };
    }

    DetectedFormat::Text(source)
}

/// Locates a bracketed JSON block embedded in surrounding chatter: the first
/// line whose content (after a shared leading-whitespace prefix `P`) is
/// exactly `[` or `{`, and the first subsequent line whose content is `P`
/// followed by the matching `]`/`}`.
fn find_embedded_json_block(source: &str) -> Option<&str> {
    let lines: Vec<&str> = source.lines().collect();

    for (start_idx, start_line) in lines.iter().enumerate() {
        let prefix_len = start_line.len() - start_line.trim_start().len();
        let prefix = &start_line[..prefix_len];
        let trimmed = start_line.trim();
        let (open, close) = match trimmed {
            "[" => ('[', ']'),
            "{" => ('{', '}'),
            _ => continue,
        };
        let _ = open;

        for (rel_idx, end_line) in lines[start_idx + 1..].iter().enumerate() {
            if !end_line.starts_with(prefix) {
                continue;
            }
            if end_line[prefix_len..].trim() == close.to_string() {
                let end_idx = start_idx + 1 + rel_idx;
                let start_byte = line_start_offset(source, start_idx);
                let end_byte = line_end_offset(source, end_idx);
                return Some(&source[start_byte..end_byte]);
            }
        }
    }
    None
}

fn line_start_offset(source: &str, line_idx: usize) -> usize {
    source
        .split('\n')
        .take(line_idx)
        .map(|l| l.len() + 1)
        .sum()
}

fn line_end_offset(source: &str, line_idx: usize) -> usize {
    let start = line_start_offset(source, line_idx);
    let rest = &source[start..];
    match rest.find('\n') {
        Some(nl) => start + nl,
        None => source.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_full_json() {
        let source = r#"[{"Plan": {"Node Type": "Seq Scan"}}]"#;
        assert_eq!(detect(source), DetectedFormat::Json(source));
    }

    #[test]
    fn detects_plain_text() {
        let source = "Seq Scan on t (cost=0.00..1.00 rows=1 width=4)";
        assert_eq!(detect(source), DetectedFormat::Text(source));
    }

    #[test]
    fn detects_embedded_json_block() {
        let source = "Here is your plan:\n[\n  {\"Plan\": {\"Node Type\": \"Seq Scan\"}}\n]\nThanks!";
        match detect(source) {
            DetectedFormat::EmbeddedJson { block } => {
                assert!(block.starts_with('['));
                assert!(block.trim_end().ends_with(']'));
                assert!(block.contains("Seq Scan"));
            }
            other => panic!("expected EmbeddedJson, got {other:?}"),
        }
    }

    #[test]
    fn embedded_block_requires_matching_indentation_prefix() {
        let source = "  [\n{\"a\": 1}\n  ]\n";
        match detect(source) {
            DetectedFormat::EmbeddedJson { block } => {
                assert!(block.trim_start().starts_with('['));
            }
            other => panic!("expected EmbeddedJson, got {other:?}"),
        }
    }
}
