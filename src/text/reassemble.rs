//! Text line reassembler (§4.D): undoes psql's terminal-width hard-wrapping
//! before the line-oriented plan parser ever sees a line, so it can assume
//! one plan property per logical line.

use std::sync::LazyLock;

use regex::Regex;

static STANDALONE_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(Total runtime|Planning time|Execution time|Time|Filter|Output|JIT)\b").unwrap()
});

/// Turns raw lines into logical lines per the four ordered rules in §4.D.
pub fn reassemble(source: &str) -> Vec<String> {
    let mut logical: Vec<String> = Vec::new();

    for raw in source.lines() {
        let opens = raw.matches('(').count();
        let closes = raw.matches(')').count();

        if opens < closes {
            append_or_start(&mut logical, raw);
            continue;
        }

        let trimmed = raw.trim_start();
        if STANDALONE_HEADER.is_match(trimmed) {
            logical.push(raw.to_string());
            continue;
        }

        let no_leading_ws = raw.len() == trimmed.len();
        let first_is_paren = trimmed.starts_with('(');
        if no_leading_ws || first_is_paren {
            append_or_start(&mut logical, raw);
            continue;
        }

        logical.push(raw.to_string());
    }

    logical
}

fn append_or_start(logical: &mut Vec<String>, raw: &str) {
    match logical.last_mut() {
        Some(last) => {
            last.push('\n');
            last.push_str(raw);
        }
        None => logical.push(raw.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closing_paren_heavy_line_is_never_standalone() {
        let lines = reassemble("Seq Scan on t (cost=0.00..1.00\nrows=1 width=4)");
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0], "Seq Scan on t (cost=0.00..1.00\nrows=1 width=4)");
    }

    #[test]
    fn indented_node_lines_each_start_a_new_logical_line() {
        let lines = reassemble("Seq Scan on t (cost=0.00..1.00 rows=1 width=4)\n  Filter: (a = 1)\n  ->  Index Scan\n");
        assert_eq!(lines.len(), 3);
    }

    #[test]
    fn standalone_header_always_starts_new_line_even_when_indented() {
        let lines = reassemble("Seq Scan on t (cost=0.00..1.00 rows=1 width=4)\n  Filter: (a = 1)\nPlanning time: 0.123 ms\n");
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[2], "Planning time: 0.123 ms");
    }

    #[test]
    fn unindented_continuation_is_appended() {
        let lines = reassemble("Seq Scan on t (cost=0.00..1.00 rows=1 width=4)\ncontinuation text with no leading space\n");
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("continuation text"));
    }
}
