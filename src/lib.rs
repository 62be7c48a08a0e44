//! `pgplan-core` — ingests a PostgreSQL `EXPLAIN` output (text, JSON, or a
//! JSON block embedded in surrounding text) and produces a normalized,
//! enriched [`model::Plan`].
//!
//! The crate is a pure, synchronous, reentrant library: [`parse_source`]
//! takes an owned string slice and [`options::ParseOptions`] and returns an
//! owned [`model::Plan`] with no shared state left behind (§5 of the design
//! doc). Rendering, interactive navigation, and sample-fixture loading are
//! the job of whatever embeds this crate — a TUI, a web frontend, a CLI.

pub mod cleanup;
pub mod enrich;
pub mod error;
pub mod format_detect;
pub mod json;
pub mod json_plan;
pub mod model;
pub mod options;
pub mod text;

use format_detect::DetectedFormat;
pub use error::{PgPlanError, PgPlanResult};
pub use model::Plan;
pub use options::ParseOptions;

/// Parses a raw `EXPLAIN` source into a normalized, enriched [`Plan`].
///
/// `name` and `query` populate [`Plan::name`] / [`Plan::query`] directly;
/// `query` additionally seeds the text parser's "stray lines before any node
/// has been seen become Query Text" fallback (§4.E step 4) when the caller
/// didn't already clean up the source the query came embedded in.
///
/// Idempotent modulo `Plan::id` / `Plan::created_on`, which come from
/// `options.id_factory` / `options.clock` (wall clock and a random UUID by
/// default — inject both for deterministic tests, §4.J).
pub fn parse_source(
    source: &str,
    options: &ParseOptions,
    name: Option<&str>,
    query: Option<&str>,
) -> PgPlanResult<Plan> {
    let span = tracing::debug_span!("parse_source", name = name.unwrap_or(""));
    let _enter = span.enter();

    let cleaned = cleanup::cleanup_source(source);

    let mut content = match format_detect::detect(&cleaned) {
        DetectedFormat::Json(text) => {
            let value = json::parse(text)?;
            json_plan::content_from_json(&value)?
        }
        DetectedFormat::EmbeddedJson { block } => {
            let value = json::parse(block)?;
            json_plan::content_from_json(&value)?
        }
        DetectedFormat::Text(text) => text::parser::parse_text(text, options, query)?,
    };

    let ctes = enrich::enrich(&mut content);

    let is_analyze = content.plan.actual_rows.is_some();
    let is_verbose = node_has_output(&content.plan) || ctes.iter().any(node_has_output);

    tracing::debug!(
        node_count = count_nodes(&content.plan),
        cte_count = ctes.len(),
        is_analyze,
        is_verbose,
        "parsed plan"
    );

    Ok(Plan {
        id: options.new_id(),
        name: name.map(str::to_string),
        created_on: options.now(),
        query: query.map(str::to_string),
        content,
        ctes,
        is_analyze,
        is_verbose,
    })
}

/// Convenience wrapper over [`parse_source`] using [`ParseOptions::default`].
pub fn parse_source_default(source: &str, name: Option<&str>, query: Option<&str>) -> PgPlanResult<Plan> {
    parse_source(source, &ParseOptions::default(), name, query)
}

/// Strips table framings, quoting, continuation glyphs, and header/footer
/// rows from `source`, without parsing it. Exposed because callers
/// sometimes need to pre-sanitize EXPLAIN output for display (§6).
pub fn cleanup_source(source: &str) -> String {
    cleanup::cleanup_source(source)
}

fn node_has_output(node: &model::Node) -> bool {
    !node.output.is_empty() || node.plans.iter().any(node_has_output)
}

fn count_nodes(node: &model::Node) -> usize {
    1 + node.plans.iter().map(count_nodes).sum::<usize>()
}

#[cfg(test)]
mod tests {
    use super::*;

    const FRAMED_TEXT: &str = "+----+\n| QUERY PLAN |\n+----+\n| Seq Scan on t  (cost=0.00..1.00 rows=1 width=4) |\n+----+\n(1 row)\n";

    fn fixed_options() -> ParseOptions {
        fn clock() -> chrono::DateTime<chrono::Utc> {
            chrono::DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z").unwrap().with_timezone(&chrono::Utc)
        }
        fn id() -> String {
            "test-id".to_string()
        }
        ParseOptions {
            strict_sort_groups: false,
            clock: Some(clock),
            id_factory: Some(id),
        }
    }

    #[test]
    fn end_to_end_scenario_empty_framing() {
        let plan = parse_source(FRAMED_TEXT, &fixed_options(), None, None).unwrap();
        assert_eq!(plan.content.plan.node_type, "Seq Scan on t");
        assert_eq!(plan.content.plan.total_cost, Some(1.0));
        assert_eq!(plan.content.plan.plan_rows, Some(1));
    }

    #[test]
    fn end_to_end_scenario_never_executed() {
        let source = "Index Scan using i on t (cost=0.00..8.00 rows=1 width=4) (never executed)";
        let plan = parse_source(source, &fixed_options(), None, None).unwrap();
        assert_eq!(plan.content.plan.actual_loops, Some(0));
        assert_eq!(plan.content.plan.actual_rows, Some(0));
        assert_eq!(plan.content.plan.actual_total_time, Some(0.0));
    }

    #[test]
    fn end_to_end_scenario_cte_extraction() {
        let source = "CTE Scan on cte_x  (cost=0.00..1.00 rows=1 width=4)\n  CTE x\n    ->  Seq Scan on t  (cost=0.00..1.00 rows=1 width=4)";
        let plan = parse_source(source, &fixed_options(), None, None).unwrap();
        assert_eq!(plan.ctes.len(), 1);
        assert!(plan.content.plan.plans.is_empty());
    }

    #[test]
    fn end_to_end_scenario_worker_propagation() {
        let source = "Gather  (cost=0.00..1.00 rows=1 width=4)\n  Workers Planned: 3\n  ->  Seq Scan on t  (cost=0.00..1.00 rows=1 width=4)";
        let plan = parse_source(source, &fixed_options(), None, None).unwrap();
        assert_eq!(plan.content.plan.plans[0].workers_planned_by_gather, Some(3));
    }

    #[test]
    fn end_to_end_scenario_duplicate_json_worker_keys_merge() {
        let source = r#"{"Plan":{"Node Type":"X","Worker":{"Worker Number":0,"Actual Rows":10},"Worker":{"Worker Number":0,"Actual Startup Time":1.0}}}"#;
        let value = json::parse(source).unwrap();
        let worker = value.get("Plan").and_then(|p| p.get("Worker")).unwrap();
        assert_eq!(worker.get("Actual Rows").and_then(json::Value::as_i64), Some(10));
        assert_eq!(worker.get("Actual Startup Time").and_then(json::Value::as_f64), Some(1.0));
    }

    #[test]
    fn end_to_end_scenario_buffers_parsing() {
        let source = "Seq Scan on t (cost=0.00..1.00 rows=1 width=4)\n  Buffers: shared hit=5 read=2, temp written=3";
        let plan = parse_source(source, &fixed_options(), None, None).unwrap();
        let buffers = plan.content.plan.buffers.unwrap();
        assert_eq!(buffers.shared_hit_blocks, 5);
        assert_eq!(buffers.shared_read_blocks, 2);
        assert_eq!(buffers.shared_dirtied_blocks, 0);
        assert_eq!(buffers.temp_written_blocks, 3);
    }

    #[test]
    fn json_input_round_trip_through_parse_source() {
        let source = r#"{"Plan":{"Node Type":"Seq Scan","Total Cost":1.0,"Plan Rows":1,"Plan Width":4}}"#;
        let plan = parse_source(source, &fixed_options(), Some("my plan"), Some("select 1")).unwrap();
        assert_eq!(plan.name.as_deref(), Some("my plan"));
        assert_eq!(plan.query.as_deref(), Some("select 1"));
        assert_eq!(plan.content.plan.node_type, "Seq Scan");
    }

    #[test]
    fn node_ids_cover_one_to_n_exactly() {
        let source = "Hash Join  (cost=1.00..2.00 rows=1 width=4)\n  ->  Seq Scan on a  (cost=0.00..1.00 rows=1 width=4)\n  ->  Seq Scan on b  (cost=0.00..1.00 rows=1 width=4)";
        let plan = parse_source(source, &fixed_options(), None, None).unwrap();
        let mut ids = Vec::new();
        collect_ids(&plan.content.plan, &mut ids);
        ids.sort_unstable();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    fn collect_ids(node: &model::Node, out: &mut Vec<u32>) {
        out.push(node.node_id.unwrap());
        for child in &node.plans {
            collect_ids(child, out);
        }
    }

    #[test]
    fn injected_clock_and_id_are_deterministic_across_calls() {
        let a = parse_source(FRAMED_TEXT, &fixed_options(), None, None).unwrap();
        let b = parse_source(FRAMED_TEXT, &fixed_options(), None, None).unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(a.created_on, b.created_on);
    }

    #[test]
    fn malformed_embedded_json_surfaces_json_syntax_error() {
        let source = "Here is a broken plan:\n[\n  {\"Plan\": }\n]\nend";
        let err = parse_source(source, &fixed_options(), None, None).unwrap_err();
        assert!(matches!(err, PgPlanError::JsonSyntax { .. }));
    }

    #[test]
    fn cleanup_source_is_idempotent_through_the_public_api() {
        let once = cleanup_source(FRAMED_TEXT);
        let twice = cleanup_source(&once);
        assert_eq!(once, twice);
    }
}
