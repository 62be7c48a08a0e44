//! Attribute sub-parsers (§4.F): small total functions that try to consume
//! one logical line as a known `Label: value` shape. Each returns `true` iff
//! it recognized and applied the line; callers try them in a fixed priority
//! order and fall back to a generic key/value attribute when none match.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::{PgPlanError, PgPlanResult};
use crate::model::{BufferCounters, Jit, SortGroups, SortInfo, SortSpaceType, Value, Wal};

static SORT_METHOD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^Sort Method:\s*(?P<method>.+?)\s+(?P<space_type>Memory|Disk):\s*(?P<kb>\d+)kB\s*$").unwrap()
});

static SORT_GROUPS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^(?P<kind>[\w-]+) Groups:\s*(?P<count>\d+)\s+Sort Methods?:\s*(?P<methods>.+?)\s+Average Memory:\s*(?P<avg>\d+)kB\s+Peak Memory:\s*(?P<peak>\d+)kB\s*$",
    )
    .unwrap()
});

static SORT_KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(?P<kind>Sort|Presorted) Key:\s*(?P<list>.+)$").unwrap());

static BUFFERS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)^Buffers:\s*(?P<rest>.+)$").unwrap());
static BUFFER_CHUNK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(?P<kind>shared|local|temp)\s+(?P<pairs>.+)$").unwrap());

static WAL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)^WAL:\s*(?P<rest>.+)$").unwrap());
static IO_TIMINGS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)^I/O Timings:\s*(?P<rest>.+)$").unwrap());
static OPTIONS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)^Options:\s*(?P<rest>.+)$").unwrap());
static TIMING: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)^Timing:\s*(?P<rest>.+)$").unwrap());
static SETTINGS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)^Settings:\s*(?P<rest>.+)$").unwrap());

static TIMING_CHUNK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?P<label>.+?)\s+(?P<value>-?[0-9.]+)\s*ms$").unwrap());

/// Splits `s` on top-level commas only: a comma nested inside `()`, `[]`, or
/// a quoted string does not count as a separator (§9 "Balanced split").
pub fn split_balanced(s: &str, sep: char) -> Vec<String> {
    let mut parts = Vec::new();
    let mut depth: i32 = 0;
    let mut in_quote: Option<char> = None;
    let mut current = String::new();

    for c in s.chars() {
        match in_quote {
            Some(q) => {
                current.push(c);
                if c == q {
                    in_quote = None;
                }
            }
            None => match c {
                '"' | '\'' => {
                    in_quote = Some(c);
                    current.push(c);
                }
                '(' | '[' => {
                    depth += 1;
                    current.push(c);
                }
                ')' | ']' => {
                    depth -= 1;
                    current.push(c);
                }
                c if c == sep && depth <= 0 => {
                    parts.push(current.trim().to_string());
                    current = String::new();
                }
                c => current.push(c),
            },
        }
    }
    if !current.trim().is_empty() || !parts.is_empty() {
        parts.push(current.trim().to_string());
    }
    parts
}

fn strip_quotes(s: &str) -> String {
    let t = s.trim();
    if t.len() >= 2 {
        let bytes = t.as_bytes();
        if (bytes[0] == b'"' && bytes[t.len() - 1] == b'"') || (bytes[0] == b'\'' && bytes[t.len() - 1] == b'\'') {
            return t[1..t.len() - 1].to_string();
        }
    }
    t.to_string()
}

fn title_case(s: &str) -> String {
    s.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn parse_kv_tokens(rest: &str) -> BTreeMap<String, i64> {
    let mut out = BTreeMap::new();
    for tok in rest.split_whitespace() {
        if let Some((k, v)) = tok.split_once('=') {
            if let Ok(n) = v.trim_end_matches(',').parse::<i64>() {
                out.insert(k.to_string(), n);
            }
        }
    }
    out
}

fn parse_kv_tokens_f64(rest: &str) -> BTreeMap<String, f64> {
    let mut out = BTreeMap::new();
    for tok in rest.split_whitespace() {
        if let Some((k, v)) = tok.split_once('=') {
            if let Ok(n) = v.trim_end_matches(',').parse::<f64>() {
                out.insert(k.to_string(), n);
            }
        }
    }
    out
}

/// `Sort Method: <m> (Memory|Disk): <kB>kB`.
pub fn try_sort(line: &str, sort: &mut Option<SortInfo>) -> bool {
    let Some(caps) = SORT_METHOD.captures(line) else {
        return false;
    };
    let method = caps["method"].trim().to_string();
    let space_type = SortSpaceType::parse(&caps["space_type"]);
    let kb = caps["kb"].parse::<i64>().ok();
    *sort = Some(SortInfo {
        method: Some(method),
        space_used_kb: kb,
        space_type,
    });
    true
}

/// `(Full-sort|Pre-sorted) Groups: ...`. Returns `Ok(false)` when the line
/// doesn't look like a sort-groups line at all; `Err` when it does but names
/// an unrecognized kind and `strict` is set.
pub fn try_sort_groups(
    line: &str,
    full_sort_groups: &mut Option<SortGroups>,
    pre_sorted_groups: &mut Option<SortGroups>,
    strict: bool,
) -> PgPlanResult<bool> {
    let Some(caps) = SORT_GROUPS.captures(line) else {
        return Ok(false);
    };
    let kind = &caps["kind"];
    let groups = SortGroups {
        group_count: caps["count"].parse().unwrap_or(0),
        methods: split_balanced(&caps["methods"], ',').into_iter().filter(|m| !m.is_empty()).collect(),
        avg_kb: caps["avg"].parse().unwrap_or(0.0),
        peak_kb: caps["peak"].parse().unwrap_or(0.0),
    };
    if kind.eq_ignore_ascii_case("full-sort") {
        *full_sort_groups = Some(groups);
        Ok(true)
    } else if kind.eq_ignore_ascii_case("pre-sorted") {
        *pre_sorted_groups = Some(groups);
        Ok(true)
    } else if strict {
        Err(PgPlanError::UnsupportedSortGroupsKind { label: kind.to_string() })
    } else {
        tracing::warn!(label = %kind, "unrecognized sort-groups kind, degrading to generic attribute");
        Ok(false)
    }
}

/// `(Sort|Presorted) Key: <balanced-comma-list>`.
pub fn try_sort_key(line: &str, sort_key: &mut Vec<String>, presorted_key: &mut Vec<String>) -> bool {
    let Some(caps) = SORT_KEY.captures(line) else {
        return false;
    };
    let items = split_balanced(&caps["list"], ',').into_iter().filter(|s| !s.is_empty()).collect::<Vec<_>>();
    if caps["kind"].eq_ignore_ascii_case("sort") {
        *sort_key = items;
    } else {
        *presorted_key = items;
    }
    true
}

/// `Buffers: shared hit=5 read=2, temp written=3`.
pub fn try_buffers(line: &str, buffers: &mut Option<BufferCounters>) -> bool {
    let Some(caps) = BUFFERS.captures(line) else {
        return false;
    };
    let mut counters = buffers.take().unwrap_or_default();
    for chunk in split_balanced(&caps["rest"], ',') {
        let Some(chunk_caps) = BUFFER_CHUNK.captures(&chunk) else {
            continue;
        };
        let pairs = parse_kv_tokens(&chunk_caps["pairs"]);
        let kind = chunk_caps["kind"].to_ascii_lowercase();
        let get = |k: &str| pairs.get(k).copied().unwrap_or(0);
        match kind.as_str() {
            "shared" => {
                counters.shared_hit_blocks += get("hit");
                counters.shared_read_blocks += get("read");
                counters.shared_dirtied_blocks += get("dirtied");
                counters.shared_written_blocks += get("written");
            }
            "local" => {
                counters.local_hit_blocks += get("hit");
                counters.local_read_blocks += get("read");
                counters.local_dirtied_blocks += get("dirtied");
                counters.local_written_blocks += get("written");
            }
            "temp" => {
                counters.temp_hit_blocks += get("hit");
                counters.temp_read_blocks += get("read");
                counters.temp_dirtied_blocks += get("dirtied");
                counters.temp_written_blocks += get("written");
            }
            _ => {}
        }
    }
    *buffers = Some(counters);
    true
}

/// `WAL: records=1 bytes=234 fpi=0`.
pub fn try_wal(line: &str, wal: &mut Option<Wal>) -> bool {
    let Some(caps) = WAL.captures(line) else {
        return false;
    };
    let tokens = parse_kv_tokens(&caps["rest"]);
    *wal = Some(Wal {
        records: tokens.get("records").copied().unwrap_or(0),
        bytes: tokens.get("bytes").copied().unwrap_or(0),
        fpi: tokens.get("fpi").copied().unwrap_or(0),
    });
    true
}

/// `I/O Timings: read=1.234 write=5.678`.
pub fn try_io_timings(line: &str, read_time: &mut Option<f64>, write_time: &mut Option<f64>) -> bool {
    let Some(caps) = IO_TIMINGS.captures(line) else {
        return false;
    };
    let tokens = parse_kv_tokens_f64(&caps["rest"]);
    *read_time = Some(tokens.get("read").copied().unwrap_or(0.0));
    *write_time = Some(tokens.get("write").copied().unwrap_or(0.0));
    true
}

/// `Options: Inlining true, Optimization true, Deforming false`.
pub fn try_options(line: &str, options: &mut BTreeMap<String, Value>) -> bool {
    let Some(caps) = OPTIONS.captures(line) else {
        return false;
    };
    for chunk in split_balanced(&caps["rest"], ',') {
        let Some((label, value)) = chunk.trim().split_once(' ') else {
            continue;
        };
        options.insert(label.trim().to_string(), decode_value(value.trim()));
    }
    true
}

/// `Timing: Generation 1.234 ms, Inlining 0.000 ms`.
pub fn try_timing(line: &str, timing: &mut BTreeMap<String, f64>) -> bool {
    let Some(caps) = TIMING.captures(line) else {
        return false;
    };
    for chunk in split_balanced(&caps["rest"], ',') {
        if let Some(chunk_caps) = TIMING_CHUNK.captures(chunk.trim()) {
            if let Ok(v) = chunk_caps["value"].parse::<f64>() {
                timing.insert(chunk_caps["label"].trim().to_string(), v);
            }
        }
    }
    true
}

/// `Settings: work_mem = '4MB', random_page_cost = '1.1'`.
pub fn try_settings(line: &str, settings: &mut BTreeMap<String, String>) -> bool {
    let Some(caps) = SETTINGS.captures(line) else {
        return false;
    };
    for chunk in split_balanced(&caps["rest"], ',') {
        if let Some((k, v)) = chunk.split_once('=') {
            settings.insert(k.trim().to_string(), strip_quotes(v));
        }
    }
    true
}

fn decode_value(raw: &str) -> Value {
    match crate::json::parse(raw) {
        Ok(v) => json_to_model_value(&v),
        Err(_) => Value::String(raw.to_string()),
    }
}

fn json_to_model_value(v: &crate::json::Value) -> Value {
    match v {
        crate::json::Value::Null => Value::String(String::new()),
        crate::json::Value::Bool(b) => Value::Bool(*b),
        crate::json::Value::Number(n) => Value::Decimal(*n),
        crate::json::Value::String(s) => Value::String(s.clone()),
        crate::json::Value::Array(a) => Value::List(a.iter().map(json_to_model_value).collect()),
        crate::json::Value::Object(o) => {
            Value::Map(o.iter().map(|(k, v)| (k.clone(), json_to_model_value(v))).collect())
        }
    }
}

/// Applies a label/value pair that matched none of the known sub-parsers:
/// numeric values are parsed, a trailing ` ms` suffix is stripped first, and
/// `runtime`/`time` labels are title-cased so older and newer PostgreSQL
/// wording (`Total runtime` vs `Execution Time`) land under one key shape.
pub fn generic_attribute(label: &str, value: &str) -> (String, Value) {
    let lower = label.to_ascii_lowercase();
    let normalized_label = if lower.contains("runtime") || lower.contains("time") {
        title_case(label)
    } else {
        label.to_string()
    };
    let trimmed_value = value.trim().trim_end_matches("ms").trim();
    let normalized_value = match trimmed_value.parse::<f64>() {
        Ok(n) => Value::Decimal(n),
        Err(_) => Value::String(value.trim().to_string()),
    };
    (normalized_label, normalized_value)
}

/// Like [`generic_attribute`], but for a worker's ad-hoc properties: §4.E
/// says these are stored "with the label title-cased" unconditionally, not
/// only for `runtime`/`time` labels.
pub fn worker_attribute(label: &str, value: &str) -> (String, Value) {
    let trimmed_value = value.trim().trim_end_matches("ms").trim();
    let normalized_value = match trimmed_value.parse::<f64>() {
        Ok(n) => Value::Decimal(n),
        Err(_) => Value::String(value.trim().to_string()),
    };
    (title_case(label), normalized_value)
}

/// Extracts the `JIT:` sub-block, i.e. the next lines of shape `Options:` /
/// `Timing:` against a [`Jit`] target instead of a node.
pub fn try_jit_line(line: &str, jit: &mut Jit) -> bool {
    if try_options(line, &mut jit.options) {
        return true;
    }
    if try_timing(line, &mut jit.timing) {
        return true;
    }
    if let Some((label, value)) = line.split_once(':') {
        let (k, v) = generic_attribute(label.trim(), value.trim());
        jit.extras.insert(k, v);
        return true;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_top_level_commas_only() {
        let parts = split_balanced("a(b,c), d, \"e,f\"", ',');
        assert_eq!(parts, vec!["a(b,c)".to_string(), "d".to_string(), "\"e,f\"".to_string()]);
    }

    #[test]
    fn sort_method_sets_fields() {
        let mut sort = None;
        assert!(try_sort("Sort Method: quicksort  Memory: 25kB", &mut sort));
        let info = sort.unwrap();
        assert_eq!(info.method.as_deref(), Some("quicksort"));
        assert_eq!(info.space_used_kb, Some(25));
        assert_eq!(info.space_type, Some(SortSpaceType::Memory));
    }

    #[test]
    fn sort_groups_unrecognized_kind_degrades_when_not_strict() {
        let mut full = None;
        let mut pre = None;
        let consumed = try_sort_groups(
            "Weird Groups: 2  Sort Methods: quicksort  Average Memory: 1kB  Peak Memory: 2kB",
            &mut full,
            &mut pre,
            false,
        )
        .unwrap();
        assert!(!consumed);
        assert!(full.is_none() && pre.is_none());
    }

    #[test]
    fn sort_groups_unrecognized_kind_errors_when_strict() {
        let mut full = None;
        let mut pre = None;
        let err = try_sort_groups(
            "Weird Groups: 2  Sort Methods: quicksort  Average Memory: 1kB  Peak Memory: 2kB",
            &mut full,
            &mut pre,
            true,
        )
        .unwrap_err();
        assert!(matches!(err, PgPlanError::UnsupportedSortGroupsKind { .. }));
    }

    #[test]
    fn buffers_parses_mixed_chunks() {
        let mut buffers = None;
        assert!(try_buffers("Buffers: shared hit=5 read=2, temp written=3", &mut buffers));
        let b = buffers.unwrap();
        assert_eq!(b.shared_hit_blocks, 5);
        assert_eq!(b.shared_read_blocks, 2);
        assert_eq!(b.shared_dirtied_blocks, 0);
        assert_eq!(b.temp_written_blocks, 3);
    }

    #[test]
    fn options_decodes_json_values() {
        let mut options = BTreeMap::new();
        assert!(try_options("Options: Inlining true, Deforming false", &mut options));
        assert_eq!(options.get("Inlining").and_then(Value::as_bool), Some(true));
        assert_eq!(options.get("Deforming").and_then(Value::as_bool), Some(false));
    }

    #[test]
    fn timing_parses_ms_values() {
        let mut timing = BTreeMap::new();
        assert!(try_timing("Timing: Generation 1.234 ms, Inlining 0.000 ms", &mut timing));
        assert_eq!(timing.get("Generation"), Some(&1.234));
    }

    #[test]
    fn settings_strips_quotes() {
        let mut settings = BTreeMap::new();
        assert!(try_settings("Settings: work_mem = '4MB'", &mut settings));
        assert_eq!(settings.get("work_mem").map(String::as_str), Some("4MB"));
    }

    #[test]
    fn generic_attribute_title_cases_time_labels() {
        let (label, value) = generic_attribute("Total runtime", "0.123 ms");
        assert_eq!(label, "Total Runtime");
        assert_eq!(value, Value::Decimal(0.123));
    }
}
