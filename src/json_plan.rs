//! Builds a [`crate::model::Node`] / [`crate::model::PlanContent`] tree out of
//! the tolerant [`crate::json`] reader's output.
//!
//! `EXPLAIN (FORMAT JSON)` spells buffer/WAL/IO counters as flat keys on the
//! node object (`"Shared Hit Blocks"`, `"WAL Records"`, ...) rather than the
//! `Buffers: shared hit=...` line the text format uses, so this is a second,
//! independent set of field extractions rather than a reuse of `crate::text`.
//! Anything not named explicitly below lands in `extras`, keyed exactly as
//! PostgreSQL spells it, mirroring the text parser's fallback.

use std::collections::BTreeMap;

use crate::error::{PgPlanError, PgPlanResult};
use crate::json::Value as JsonValue;
use crate::model::{
    BufferCounters, Jit, MaxBlocks, Node, ParentRelationship, PlanContent, SortGroups, SortInfo,
    SortSpaceType, Trigger, Value, Wal, Worker,
};

fn get_str(obj: &JsonValue, key: &str) -> Option<String> {
    obj.get(key).and_then(JsonValue::as_str).map(str::to_string)
}

fn get_i64(obj: &JsonValue, key: &str) -> Option<i64> {
    obj.get(key).and_then(JsonValue::as_i64)
}

fn get_f64(obj: &JsonValue, key: &str) -> Option<f64> {
    obj.get(key).and_then(JsonValue::as_f64)
}

fn get_str_list(obj: &JsonValue, key: &str) -> Vec<String> {
    obj.get(key)
        .and_then(JsonValue::as_array)
        .map(|a| a.iter().filter_map(JsonValue::as_str).map(str::to_string).collect())
        .unwrap_or_default()
}

/// Field labels this converter extracts by name; anything else on a node or
/// worker object becomes a generic `extras` entry instead.
const KNOWN_NODE_KEYS: &[&str] = &[
    "Node Type",
    "Startup Cost",
    "Total Cost",
    "Plan Rows",
    "Plan Width",
    "Actual Startup Time",
    "Actual Total Time",
    "Actual Rows",
    "Actual Loops",
    "Rows Removed by Filter",
    "Rows Removed by Join Filter",
    "Sort Method",
    "Sort Space Used",
    "Sort Space Type",
    "Full-sort Groups",
    "Pre-sorted Groups",
    "Sort Key",
    "Presorted Key",
    "Shared Hit Blocks",
    "Shared Read Blocks",
    "Shared Dirtied Blocks",
    "Shared Written Blocks",
    "Local Hit Blocks",
    "Local Read Blocks",
    "Local Dirtied Blocks",
    "Local Written Blocks",
    "Temp Hit Blocks",
    "Temp Read Blocks",
    "Temp Dirtied Blocks",
    "Temp Written Blocks",
    "WAL Records",
    "WAL Bytes",
    "WAL FPI",
    "I/O Read Time",
    "I/O Write Time",
    "JIT",
    "Workers Planned",
    "Workers Launched",
    "Workers",
    "Output",
    "Plans",
    "Parent Relationship",
    "Subplan Name",
];

fn json_to_model_value(v: &JsonValue) -> Value {
    match v {
        JsonValue::Null => Value::String(String::new()),
        JsonValue::Bool(b) => Value::Bool(*b),
        JsonValue::Number(n) => Value::Decimal(*n),
        JsonValue::String(s) => Value::String(s.clone()),
        JsonValue::Array(a) => Value::List(a.iter().map(json_to_model_value).collect()),
        JsonValue::Object(o) => Value::Map(o.iter().map(|(k, v)| (k.clone(), json_to_model_value(v))).collect()),
    }
}

fn sort_groups_from_json(obj: &JsonValue, label: &str) -> Option<SortGroups> {
    let g = obj.get(label)?.as_object()?;
    Some(SortGroups {
        group_count: g.get("Group Count").and_then(JsonValue::as_i64).unwrap_or(0),
        methods: g
            .get("Sort Methods Used")
            .and_then(JsonValue::as_array)
            .map(|a| a.iter().filter_map(JsonValue::as_str).map(str::to_string).collect())
            .unwrap_or_default(),
        avg_kb: g.get("Average Sort Space Used").and_then(JsonValue::as_f64).unwrap_or(0.0),
        peak_kb: g.get("Peak Sort Space Used").and_then(JsonValue::as_f64).unwrap_or(0.0),
    })
}

const BUFFER_COUNTER_KEYS: &[&str] = &[
    "Shared Hit Blocks",
    "Shared Read Blocks",
    "Shared Dirtied Blocks",
    "Shared Written Blocks",
    "Local Hit Blocks",
    "Local Read Blocks",
    "Local Dirtied Blocks",
    "Local Written Blocks",
    "Temp Hit Blocks",
    "Temp Read Blocks",
    "Temp Dirtied Blocks",
    "Temp Written Blocks",
];

fn buffers_from_json(obj: &JsonValue) -> Option<BufferCounters> {
    let has_any = BUFFER_COUNTER_KEYS.iter().any(|k| obj.get(k).is_some());
    if !has_any {
        return None;
    }
    Some(BufferCounters {
        shared_hit_blocks: get_i64(obj, "Shared Hit Blocks").unwrap_or(0),
        shared_read_blocks: get_i64(obj, "Shared Read Blocks").unwrap_or(0),
        shared_dirtied_blocks: get_i64(obj, "Shared Dirtied Blocks").unwrap_or(0),
        shared_written_blocks: get_i64(obj, "Shared Written Blocks").unwrap_or(0),
        local_hit_blocks: get_i64(obj, "Local Hit Blocks").unwrap_or(0),
        local_read_blocks: get_i64(obj, "Local Read Blocks").unwrap_or(0),
        local_dirtied_blocks: get_i64(obj, "Local Dirtied Blocks").unwrap_or(0),
        local_written_blocks: get_i64(obj, "Local Written Blocks").unwrap_or(0),
        temp_hit_blocks: get_i64(obj, "Temp Hit Blocks").unwrap_or(0),
        temp_read_blocks: get_i64(obj, "Temp Read Blocks").unwrap_or(0),
        temp_dirtied_blocks: get_i64(obj, "Temp Dirtied Blocks").unwrap_or(0),
        temp_written_blocks: get_i64(obj, "Temp Written Blocks").unwrap_or(0),
    })
}

fn wal_from_json(obj: &JsonValue) -> Option<Wal> {
    if obj.get("WAL Records").is_none() && obj.get("WAL Bytes").is_none() && obj.get("WAL FPI").is_none() {
        return None;
    }
    Some(Wal {
        records: get_i64(obj, "WAL Records").unwrap_or(0),
        bytes: get_i64(obj, "WAL Bytes").unwrap_or(0),
        fpi: get_i64(obj, "WAL FPI").unwrap_or(0),
    })
}

fn jit_from_json(obj: &JsonValue) -> Option<Jit> {
    let j = obj.get("JIT")?.as_object()?;
    let mut options = BTreeMap::new();
    if let Some(o) = j.get("Options").and_then(JsonValue::as_object) {
        for (k, v) in o {
            options.insert(k.clone(), json_to_model_value(v));
        }
    }
    let mut timing = BTreeMap::new();
    if let Some(t) = j.get("Timing").and_then(JsonValue::as_object) {
        for (k, v) in t {
            if let Some(f) = v.as_f64() {
                timing.insert(k.clone(), f);
            }
        }
    }
    let mut extras = BTreeMap::new();
    for (k, v) in j {
        if k != "Options" && k != "Timing" {
            extras.insert(k.clone(), json_to_model_value(v));
        }
    }
    Some(Jit { options, timing, extras })
}

fn worker_from_json(obj: &JsonValue) -> Worker {
    let mut worker = Worker::new(get_i64(obj, "Worker Number").unwrap_or(0));
    worker.actual_startup_time = get_f64(obj, "Actual Startup Time");
    worker.actual_total_time = get_f64(obj, "Actual Total Time");
    worker.actual_rows = get_i64(obj, "Actual Rows");
    worker.actual_loops = get_i64(obj, "Actual Loops");
    worker.jit = jit_from_json(obj);
    if let Some(map) = obj.as_object() {
        for (k, v) in map {
            if !matches!(
                k.as_str(),
                "Worker Number" | "Actual Startup Time" | "Actual Total Time" | "Actual Rows" | "Actual Loops" | "JIT"
            ) {
                worker.extras.insert(k.clone(), json_to_model_value(v));
            }
        }
    }
    worker
}

/// Converts one `"Plan"`/`"Plans"[i]` JSON object into a [`Node`], recursing
/// into children. `never_executed` never appears in the JSON form (it's a
/// text-format-only parenthetical); a JSON node with actuals simply omits
/// the loops/time/rows triple instead.
pub fn node_from_json(obj: &JsonValue) -> PgPlanResult<Node> {
    let map = obj.as_object().ok_or_else(|| PgPlanError::parse_failure("plan node is not a JSON object"))?;

    let mut node = Node::new(get_str(obj, "Node Type").unwrap_or_default());
    node.startup_cost = get_f64(obj, "Startup Cost");
    node.total_cost = get_f64(obj, "Total Cost");
    node.plan_rows = get_i64(obj, "Plan Rows");
    node.plan_width = get_i64(obj, "Plan Width");
    node.actual_startup_time = get_f64(obj, "Actual Startup Time");
    node.actual_total_time = get_f64(obj, "Actual Total Time");
    node.actual_rows = get_i64(obj, "Actual Rows");
    node.actual_loops = get_i64(obj, "Actual Loops");
    node.rows_removed_by_filter = get_i64(obj, "Rows Removed by Filter");
    node.rows_removed_by_join_filter = get_i64(obj, "Rows Removed by Join Filter");

    if let Some(method) = get_str(obj, "Sort Method") {
        node.sort = Some(SortInfo {
            method: Some(method),
            space_used_kb: get_i64(obj, "Sort Space Used"),
            space_type: get_str(obj, "Sort Space Type").as_deref().and_then(SortSpaceType::parse),
        });
    }
    node.full_sort_groups = sort_groups_from_json(obj, "Full-sort Groups");
    node.pre_sorted_groups = sort_groups_from_json(obj, "Pre-sorted Groups");
    node.sort_key = get_str_list(obj, "Sort Key");
    node.presorted_key = get_str_list(obj, "Presorted Key");

    node.buffers = buffers_from_json(obj);
    node.wal = wal_from_json(obj);
    node.io_read_time = get_f64(obj, "I/O Read Time");
    node.io_write_time = get_f64(obj, "I/O Write Time");
    node.jit = jit_from_json(obj);

    node.workers_planned = get_i64(obj, "Workers Planned");
    node.workers_launched = get_i64(obj, "Workers Launched");
    node.workers = obj
        .get("Workers")
        .and_then(JsonValue::as_array)
        .map(|a| a.iter().map(worker_from_json).collect())
        .unwrap_or_default();

    node.output = get_str_list(obj, "Output");

    node.parent_relationship = get_str(obj, "Parent Relationship").as_deref().map(ParentRelationship::parse);
    node.subplan_name = get_str(obj, "Subplan Name");

    if let Some(children) = obj.get("Plans").and_then(JsonValue::as_array) {
        for child in children {
            node.plans.push(node_from_json(child)?);
        }
    }

    for (k, v) in map {
        if !KNOWN_NODE_KEYS.contains(&k.as_str()) {
            node.extras.insert(k.clone(), json_to_model_value(v));
        }
    }

    Ok(node)
}

fn triggers_from_json(obj: &JsonValue) -> Vec<Trigger> {
    obj.get("Triggers")
        .and_then(JsonValue::as_array)
        .map(|a| {
            a.iter()
                .map(|t| Trigger {
                    name: get_str(t, "Trigger Name").unwrap_or_default(),
                    time: get_f64(t, "Time").unwrap_or(0.0),
                    calls: get_i64(t, "Calls").unwrap_or(0),
                })
                .collect()
        })
        .unwrap_or_default()
}

fn settings_from_json(obj: &JsonValue) -> Option<BTreeMap<String, String>> {
    let s = obj.get("Settings")?.as_object()?;
    Some(s.iter().filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string()))).collect())
}

/// Converts a top-level `EXPLAIN (FORMAT JSON)` object (already unwrapped
/// from its enclosing array by [`crate::json::parse`]) into a [`PlanContent`].
pub fn content_from_json(root: &JsonValue) -> PgPlanResult<PlanContent> {
    let plan_obj = root.get("Plan").ok_or_else(|| PgPlanError::parse_failure("no \"Plan\" key in JSON input"))?;
    let mut plan = node_from_json(plan_obj)?;

    // `Planning Time` / `Execution Time` live on the envelope, not the root
    // node, in PostgreSQL's JSON form; fold them in as generic attributes so
    // they surface the same way the text parser's trailing lines do.
    if let Some(v) = root.get("Planning Time").and_then(JsonValue::as_f64) {
        plan.extras.insert("Planning Time".to_string(), Value::Decimal(v));
    }
    if let Some(v) = root.get("Execution Time").and_then(JsonValue::as_f64) {
        plan.extras.insert("Execution Time".to_string(), Value::Decimal(v));
    }

    Ok(PlanContent {
        plan,
        triggers: triggers_from_json(root),
        jit: jit_from_json(root),
        max_rows: None,
        max_cost: None,
        max_total_cost: None,
        max_duration: None,
        max_blocks: MaxBlocks::default(),
        settings: settings_from_json(root),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_simple_node() {
        let v = crate::json::parse(r#"{"Plan":{"Node Type":"Seq Scan","Total Cost":1.0,"Plan Rows":1}}"#).unwrap();
        let content = content_from_json(&v).unwrap();
        assert_eq!(content.plan.node_type, "Seq Scan");
        assert_eq!(content.plan.total_cost, Some(1.0));
        assert_eq!(content.plan.plan_rows, Some(1));
    }

    #[test]
    fn converts_nested_plans_and_relationship() {
        let v = crate::json::parse(
            r#"{"Plan":{"Node Type":"Hash Join","Plans":[{"Node Type":"Seq Scan","Parent Relationship":"Outer"},{"Node Type":"Hash","Parent Relationship":"Inner"}]}}"#,
        )
        .unwrap();
        let content = content_from_json(&v).unwrap();
        assert_eq!(content.plan.plans.len(), 2);
        assert_eq!(content.plan.plans[0].parent_relationship, Some(ParentRelationship::Outer));
        assert_eq!(content.plan.plans[1].parent_relationship, Some(ParentRelationship::Inner));
    }

    #[test]
    fn merged_duplicate_workers_keys_convert_to_one_worker() {
        // Two "Workers" keys at the same object level (the tolerant JSON
        // reader merges them element-wise by index, §4.C) should surface as
        // a single array with the scalar properties from both occurrences.
        let v = crate::json::parse(
            r#"{"Plan":{"Node Type":"Gather","Workers":[{"Worker Number":0,"Actual Rows":10}],"Workers":[{"Worker Number":0,"Actual Startup Time":1.0}]}}"#,
        )
        .unwrap();
        let content = content_from_json(&v).unwrap();
        assert_eq!(content.plan.workers.len(), 1);
        assert_eq!(content.plan.workers[0].actual_rows, Some(10));
        assert_eq!(content.plan.workers[0].actual_startup_time, Some(1.0));
    }

    #[test]
    fn buffers_absent_when_no_counter_keys_present() {
        let v = crate::json::parse(r#"{"Plan":{"Node Type":"Seq Scan"}}"#).unwrap();
        let content = content_from_json(&v).unwrap();
        assert!(content.plan.buffers.is_none());
    }

    #[test]
    fn buffers_present_when_any_counter_key_given() {
        let v = crate::json::parse(r#"{"Plan":{"Node Type":"Seq Scan","Shared Hit Blocks":5}}"#).unwrap();
        let content = content_from_json(&v).unwrap();
        assert_eq!(content.plan.buffers.unwrap().shared_hit_blocks, 5);
    }

    #[test]
    fn missing_plan_key_is_parse_failure() {
        let v = crate::json::parse(r#"{"NotAPlan": true}"#).unwrap();
        let err = content_from_json(&v).unwrap_err();
        assert!(matches!(err, PgPlanError::ParseFailure { .. }));
    }
}
