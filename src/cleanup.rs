//! Source normalizer (§4.A): strips table framings, quoting, continuation
//! glyphs, and the header/footer PostgreSQL wraps its own CLI output in, so
//! that only the plan body is left for the format detector.
//!
//! Regexes are compiled once via `LazyLock` and shared read-only across
//! threads — the hot path runs per logical line, and recompiling a pattern
//! per call would dominate the cost of the rest of the parser.

use std::sync::LazyLock;

use regex::Regex;

static ROW_FRAME: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(\x{2502}|\x{2551}|\|)(.*)\1$").unwrap());
static RULER_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\+[-=]+\+|-{3,}|\x{2550}{3,}|[\x{251c}\x{2514}\x{250c}\x{2554}\x{255a}][\x{2500}\x{2550}]+[\x{2524}\x{2510}\x{2557}\x{255d}])$")
        .unwrap()
});
static QUOTED_LINE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"^\s*"(.*)"\s*$|^\s*'(.*)'\s*$"#).unwrap());
static QUERY_PLAN_HEADER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)^\s*QUERY PLAN\s*$").unwrap());
static ROW_COUNT_FOOTER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\(\d+\s+\p{L}+s?\)\s*$").unwrap());

/// Removes the ASCII/Unicode table framing psql wraps plain-text EXPLAIN
/// output in, leading/trailing quotes, `+`/`\u{21b5}` continuation glyphs, the
/// `QUERY PLAN` header, and a trailing localized row-count footer.
///
/// Leading whitespace on plan lines is never trimmed — depth inference in
/// the text parser (§4.E) depends on it.
pub fn cleanup_source(source: &str) -> String {
    // Collapse `+` and `\u{21b5}` line-continuation markers into a single
    // logical newline before splitting into lines, so a continued row
    // framing doesn't get treated as two separate rows.
    let joined = source.replace("+\n", "\n").replace('\u{21b5}', "\n");

    let mut out_lines: Vec<String> = Vec::new();
    for raw_line in joined.lines() {
        let mut line = raw_line.to_string();

        if let Some(captures) = ROW_FRAME.captures(&line) {
            line = captures
                .get(2)
                .map(|m| m.as_str().to_string())
                .unwrap_or(line);
        }

        if RULER_LINE.is_match(line.trim()) {
            continue;
        }

        if QUERY_PLAN_HEADER.is_match(&line) {
            continue;
        }

        if ROW_COUNT_FOOTER.is_match(line.trim()) {
            continue;
        }

        if let Some(captures) = QUOTED_LINE.captures(&line) {
            line = captures
                .get(1)
                .or_else(|| captures.get(2))
                .map(|m| m.as_str().to_string())
                .unwrap_or(line);
        }

        out_lines.push(line);
    }

    out_lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_ascii_table_framing_and_footer() {
        let input = "+----+\n| QUERY PLAN |\n+----+\n| Seq Scan on t  (cost=0.00..1.00 rows=1 width=4) |\n+----+\n(1 row)\n";
        let cleaned = cleanup_source(input);
        assert!(cleaned.contains("Seq Scan on t  (cost=0.00..1.00 rows=1 width=4)"));
        assert!(!cleaned.contains("QUERY PLAN"));
        assert!(!cleaned.contains("1 row"));
        assert!(!cleaned.contains('+'));
    }

    #[test]
    fn strips_surrounding_quotes_per_line() {
        let input = "\"Seq Scan on t (cost=0.00..1.00 rows=1 width=4)\"\n'Filter: (a = 1)'\n";
        let cleaned = cleanup_source(input);
        assert_eq!(
            cleaned,
            "Seq Scan on t (cost=0.00..1.00 rows=1 width=4)\nFilter: (a = 1)"
        );
    }

    #[test]
    fn collapses_plus_continuations() {
        let input = "Seq Scan on t (cost=0.00..1.00 rows=1+\nwidth=4)\n";
        let cleaned = cleanup_source(input);
        assert_eq!(cleaned, "Seq Scan on t (cost=0.00..1.00 rows=1\nwidth=4)");
    }

    #[test]
    fn locale_agnostic_row_footer() {
        let cleaned = cleanup_source("Seq Scan on t (cost=0.00..1.00 rows=1 width=4)\n(8 lignes)\n");
        assert!(!cleaned.contains("lignes"));
    }

    #[test]
    fn preserves_leading_indentation_on_plan_lines() {
        let cleaned = cleanup_source("Seq Scan on t (cost=0.00..1.00 rows=1 width=4)\n  Filter: (a = 1)\n");
        assert!(cleaned.contains("\n  Filter: (a = 1)"));
    }

    #[test]
    fn is_idempotent() {
        let input = "+----+\n| QUERY PLAN |\n+----+\n\"Seq Scan on t (cost=0.00..1.00 rows=1 width=4)\"\n+----+\n(1 row)\n";
        let once = cleanup_source(input);
        let twice = cleanup_source(&once);
        assert_eq!(once, twice);
    }
}
