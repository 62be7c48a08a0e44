//! The normalized plan tree produced by the parsers and filled in by
//! `crate::enrich`.
//!
//! Field names mirror the PostgreSQL EXPLAIN vocabulary (`Node Type`,
//! `Total Cost`, `Actual Rows`, ...) via `serde(rename = ...)` so that
//! `serde_json::to_value(&node)` reads like a PostgreSQL JSON plan, even
//! though the ingestion path that builds these structs never goes through
//! `serde`'s `Deserialize` (see `crate::json` for why).

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A dynamically-typed attribute value, for properties this model doesn't
/// name explicitly. PostgreSQL adds EXPLAIN fields across major versions
/// faster than any fixed struct can track; unknown labels land here instead
/// of being dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    String(String),
    Integer(i64),
    Decimal(f64),
    Bool(bool),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Decimal(d) => Some(*d),
            Value::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            Value::Decimal(d) if d.fract() == 0.0 => Some(*d as i64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Decimal(f)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

/// `Sort Space Type`: memory-resident vs. spilled to disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortSpaceType {
    Memory,
    Disk,
}

impl SortSpaceType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Memory" => Some(SortSpaceType::Memory),
            "Disk" => Some(SortSpaceType::Disk),
            _ => None,
        }
    }
}

/// Direction of a planner mis-estimation, relative to what actually happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum EstimateDirection {
    #[default]
    None,
    Over,
    Under,
}

/// How a child node relates to its parent in the plan tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParentRelationship {
    Outer,
    Inner,
    Member,
    InitPlan,
    SubPlan,
    /// Any relationship label PostgreSQL emits that isn't one of the above
    /// (kept verbatim rather than dropped).
    Other(String),
}

impl ParentRelationship {
    pub fn parse(s: &str) -> Self {
        match s {
            "Outer" => ParentRelationship::Outer,
            "Inner" => ParentRelationship::Inner,
            "Member" => ParentRelationship::Member,
            "InitPlan" => ParentRelationship::InitPlan,
            "SubPlan" => ParentRelationship::SubPlan,
            other => ParentRelationship::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ParentRelationship::Outer => "Outer",
            ParentRelationship::Inner => "Inner",
            ParentRelationship::Member => "Member",
            ParentRelationship::InitPlan => "InitPlan",
            ParentRelationship::SubPlan => "SubPlan",
            ParentRelationship::Other(s) => s,
        }
    }

    pub fn is_init_or_sub_plan(&self) -> bool {
        matches!(
            self,
            ParentRelationship::InitPlan | ParentRelationship::SubPlan
        )
    }
}

/// `Sort Method: <method> (Memory|Disk): <kB>kB`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SortInfo {
    pub method: Option<String>,
    pub space_used_kb: Option<i64>,
    pub space_type: Option<SortSpaceType>,
}

/// `(Full-sort|Pre-sorted) Groups: N  Sort Method(s): ...  Average Memory: ...  Peak Memory: ...`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SortGroups {
    pub group_count: i64,
    pub methods: Vec<String>,
    pub avg_kb: f64,
    pub peak_kb: f64,
}

/// The 3 (shared/local/temp) x 4 (hit/read/dirtied/written) buffer counters.
/// `None` until a `Buffers:` line for this node has been seen; once seen all
/// twelve counters are zero-initialized and then populated from the text.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct BufferCounters {
    pub shared_hit_blocks: i64,
    pub shared_read_blocks: i64,
    pub shared_dirtied_blocks: i64,
    pub shared_written_blocks: i64,
    pub local_hit_blocks: i64,
    pub local_read_blocks: i64,
    pub local_dirtied_blocks: i64,
    pub local_written_blocks: i64,
    pub temp_hit_blocks: i64,
    pub temp_read_blocks: i64,
    pub temp_dirtied_blocks: i64,
    pub temp_written_blocks: i64,
}

impl BufferCounters {
    /// Subtracts `other` field-by-field (used to compute exclusive counters
    /// against the sum of a node's non-InitPlan children).
    pub fn minus(&self, other: &BufferCounters) -> BufferCounters {
        BufferCounters {
            shared_hit_blocks: self.shared_hit_blocks - other.shared_hit_blocks,
            shared_read_blocks: self.shared_read_blocks - other.shared_read_blocks,
            shared_dirtied_blocks: self.shared_dirtied_blocks - other.shared_dirtied_blocks,
            shared_written_blocks: self.shared_written_blocks - other.shared_written_blocks,
            local_hit_blocks: self.local_hit_blocks - other.local_hit_blocks,
            local_read_blocks: self.local_read_blocks - other.local_read_blocks,
            local_dirtied_blocks: self.local_dirtied_blocks - other.local_dirtied_blocks,
            local_written_blocks: self.local_written_blocks - other.local_written_blocks,
            temp_hit_blocks: self.temp_hit_blocks - other.temp_hit_blocks,
            temp_read_blocks: self.temp_read_blocks - other.temp_read_blocks,
            temp_dirtied_blocks: self.temp_dirtied_blocks - other.temp_dirtied_blocks,
            temp_written_blocks: self.temp_written_blocks - other.temp_written_blocks,
        }
    }

    pub fn add(&mut self, other: &BufferCounters) {
        self.shared_hit_blocks += other.shared_hit_blocks;
        self.shared_read_blocks += other.shared_read_blocks;
        self.shared_dirtied_blocks += other.shared_dirtied_blocks;
        self.shared_written_blocks += other.shared_written_blocks;
        self.local_hit_blocks += other.local_hit_blocks;
        self.local_read_blocks += other.local_read_blocks;
        self.local_dirtied_blocks += other.local_dirtied_blocks;
        self.local_written_blocks += other.local_written_blocks;
        self.temp_hit_blocks += other.temp_hit_blocks;
        self.temp_read_blocks += other.temp_read_blocks;
        self.temp_dirtied_blocks += other.temp_dirtied_blocks;
        self.temp_written_blocks += other.temp_written_blocks;
    }

    pub fn shared_total(&self) -> i64 {
        self.shared_hit_blocks
            + self.shared_read_blocks
            + self.shared_dirtied_blocks
            + self.shared_written_blocks
    }

    pub fn local_total(&self) -> i64 {
        self.local_hit_blocks
            + self.local_read_blocks
            + self.local_dirtied_blocks
            + self.local_written_blocks
    }

    pub fn temp_total(&self) -> i64 {
        self.temp_hit_blocks
            + self.temp_read_blocks
            + self.temp_dirtied_blocks
            + self.temp_written_blocks
    }
}

/// `WAL: records=... bytes=... fpi=...`
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Wal {
    pub records: i64,
    pub bytes: i64,
    pub fpi: i64,
}

/// A `JIT:` sub-block, attached either to a node directly or to its last
/// worker (§4.E, the "Extra" / "JIT" branches, and the documented open
/// question about last-worker assignment).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Jit {
    #[serde(default)]
    pub options: BTreeMap<String, Value>,
    #[serde(default)]
    pub timing: BTreeMap<String, f64>,
    #[serde(flatten)]
    pub extras: BTreeMap<String, Value>,
}

/// Per-worker actuals for a parallel node, addressed by `worker_number`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Worker {
    #[serde(rename = "Worker Number")]
    pub worker_number: i64,
    #[serde(rename = "Actual Startup Time", skip_serializing_if = "Option::is_none")]
    pub actual_startup_time: Option<f64>,
    #[serde(rename = "Actual Total Time", skip_serializing_if = "Option::is_none")]
    pub actual_total_time: Option<f64>,
    #[serde(rename = "Actual Rows", skip_serializing_if = "Option::is_none")]
    pub actual_rows: Option<i64>,
    #[serde(rename = "Actual Loops", skip_serializing_if = "Option::is_none")]
    pub actual_loops: Option<i64>,
    #[serde(rename = "JIT", skip_serializing_if = "Option::is_none")]
    pub jit: Option<Jit>,
    #[serde(flatten)]
    pub extras: BTreeMap<String, Value>,
}

impl Worker {
    pub fn new(worker_number: i64) -> Self {
        Worker {
            worker_number,
            actual_startup_time: None,
            actual_total_time: None,
            actual_rows: None,
            actual_loops: None,
            jit: None,
            extras: BTreeMap::new(),
        }
    }
}

/// `Trigger <name>: time=<f> calls=<i>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trigger {
    pub name: String,
    pub time: f64,
    pub calls: i64,
}

/// One operator in the plan tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    #[serde(rename = "Node Type")]
    pub node_type: String,

    /// Assigned during enrichment, pre-order, starting at 1. `None` before
    /// enrichment runs.
    #[serde(skip)]
    pub node_id: Option<u32>,

    // --- Estimates ---
    #[serde(rename = "Startup Cost", skip_serializing_if = "Option::is_none")]
    pub startup_cost: Option<f64>,
    #[serde(rename = "Total Cost", skip_serializing_if = "Option::is_none")]
    pub total_cost: Option<f64>,
    #[serde(rename = "Plan Rows", skip_serializing_if = "Option::is_none")]
    pub plan_rows: Option<i64>,
    #[serde(rename = "Plan Width", skip_serializing_if = "Option::is_none")]
    pub plan_width: Option<i64>,

    // --- Actuals ---
    #[serde(rename = "Actual Startup Time", skip_serializing_if = "Option::is_none")]
    pub actual_startup_time: Option<f64>,
    #[serde(rename = "Actual Total Time", skip_serializing_if = "Option::is_none")]
    pub actual_total_time: Option<f64>,
    #[serde(rename = "Actual Rows", skip_serializing_if = "Option::is_none")]
    pub actual_rows: Option<i64>,
    #[serde(rename = "Actual Loops", skip_serializing_if = "Option::is_none")]
    pub actual_loops: Option<i64>,
    #[serde(skip)]
    pub never_executed: bool,

    #[serde(rename = "Rows Removed by Filter", skip_serializing_if = "Option::is_none")]
    pub rows_removed_by_filter: Option<i64>,
    #[serde(rename = "Rows Removed by Join Filter", skip_serializing_if = "Option::is_none")]
    pub rows_removed_by_join_filter: Option<i64>,

    // --- Derived (filled in by crate::enrich, absent before it runs) ---
    #[serde(skip)]
    pub exclusive_cost: Option<f64>,
    #[serde(skip)]
    pub exclusive_duration: Option<f64>,
    #[serde(skip)]
    pub planner_estimate_factor: Option<f64>,
    #[serde(skip)]
    pub planner_estimate_direction: EstimateDirection,
    #[serde(skip)]
    pub actual_rows_revised: Option<i64>,
    #[serde(skip)]
    pub plan_rows_revised: Option<i64>,
    #[serde(skip)]
    pub rows_removed_by_filter_revised: Option<i64>,
    #[serde(skip)]
    pub rows_removed_by_join_filter_revised: Option<i64>,
    #[serde(skip)]
    pub workers_planned_by_gather: Option<i64>,
    #[serde(skip)]
    pub buffers_exclusive: Option<BufferCounters>,

    // --- Sort ---
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort: Option<SortInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_sort_groups: Option<SortGroups>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pre_sorted_groups: Option<SortGroups>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sort_key: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub presorted_key: Vec<String>,

    // --- Buffers / WAL / IO ---
    #[serde(skip_serializing_if = "Option::is_none")]
    pub buffers: Option<BufferCounters>,
    #[serde(rename = "WAL", skip_serializing_if = "Option::is_none")]
    pub wal: Option<Wal>,
    #[serde(rename = "I/O Read Time", skip_serializing_if = "Option::is_none")]
    pub io_read_time: Option<f64>,
    #[serde(rename = "I/O Write Time", skip_serializing_if = "Option::is_none")]
    pub io_write_time: Option<f64>,

    // --- JIT ---
    #[serde(rename = "JIT", skip_serializing_if = "Option::is_none")]
    pub jit: Option<Jit>,

    // --- Parallelism ---
    #[serde(rename = "Workers Planned", skip_serializing_if = "Option::is_none")]
    pub workers_planned: Option<i64>,
    #[serde(rename = "Workers Launched", skip_serializing_if = "Option::is_none")]
    pub workers_launched: Option<i64>,
    #[serde(rename = "Workers", default, skip_serializing_if = "Vec::is_empty")]
    pub workers: Vec<Worker>,

    // --- Output (verbose) ---
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub output: Vec<String>,

    // --- Tree structure ---
    #[serde(rename = "Plans", default, skip_serializing_if = "Vec::is_empty")]
    pub plans: Vec<Node>,
    #[serde(rename = "Parent Relationship", skip_serializing_if = "Option::is_none")]
    pub parent_relationship: Option<ParentRelationship>,
    #[serde(rename = "Subplan Name", skip_serializing_if = "Option::is_none")]
    pub subplan_name: Option<String>,

    /// Anything not named above, keyed exactly as PostgreSQL spells it.
    #[serde(flatten)]
    pub extras: BTreeMap<String, Value>,
}

impl Node {
    pub fn new(node_type: impl Into<String>) -> Self {
        Node {
            node_type: node_type.into(),
            node_id: None,
            startup_cost: None,
            total_cost: None,
            plan_rows: None,
            plan_width: None,
            actual_startup_time: None,
            actual_total_time: None,
            actual_rows: None,
            actual_loops: None,
            never_executed: false,
            rows_removed_by_filter: None,
            rows_removed_by_join_filter: None,
            exclusive_cost: None,
            exclusive_duration: None,
            planner_estimate_factor: None,
            planner_estimate_direction: EstimateDirection::None,
            actual_rows_revised: None,
            plan_rows_revised: None,
            rows_removed_by_filter_revised: None,
            rows_removed_by_join_filter_revised: None,
            workers_planned_by_gather: None,
            buffers_exclusive: None,
            sort: None,
            full_sort_groups: None,
            pre_sorted_groups: None,
            sort_key: Vec::new(),
            presorted_key: Vec::new(),
            buffers: None,
            wal: None,
            io_read_time: None,
            io_write_time: None,
            jit: None,
            workers_planned: None,
            workers_launched: None,
            workers: Vec::new(),
            output: Vec::new(),
            plans: Vec::new(),
            parent_relationship: None,
            subplan_name: None,
            extras: BTreeMap::new(),
        }
    }

    /// `true` iff `parent_relationship` is `InitPlan` and `subplan_name`
    /// starts with `"CTE "` — the marker a CTE carries before enrichment
    /// relocates it into `Plan::ctes`.
    pub fn is_cte_init_plan(&self) -> bool {
        matches!(self.parent_relationship, Some(ParentRelationship::InitPlan))
            && self
                .subplan_name
                .as_deref()
                .is_some_and(|n| n.starts_with("CTE "))
    }

    pub fn worker_mut(&mut self, number: i64) -> &mut Worker {
        if let Some(idx) = self.workers.iter().position(|w| w.worker_number == number) {
            &mut self.workers[idx]
        } else {
            self.workers.push(Worker::new(number));
            self.workers.last_mut().unwrap()
        }
    }
}

/// `content.maxBlocks`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MaxBlocks {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shared: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temp: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local: Option<i64>,
}

/// The `content` envelope: the root plan node plus plan-wide maxima used to
/// scale visual indicators (bar widths, heat colors, ...) in a consumer UI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanContent {
    #[serde(rename = "Plan")]
    pub plan: Node,
    #[serde(rename = "Triggers", default, skip_serializing_if = "Vec::is_empty")]
    pub triggers: Vec<Trigger>,
    #[serde(rename = "JIT", skip_serializing_if = "Option::is_none")]
    pub jit: Option<Jit>,
    #[serde(skip)]
    pub max_rows: Option<i64>,
    #[serde(skip)]
    pub max_cost: Option<f64>,
    #[serde(skip)]
    pub max_total_cost: Option<f64>,
    #[serde(skip)]
    pub max_duration: Option<f64>,
    #[serde(skip)]
    pub max_blocks: MaxBlocks,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<BTreeMap<String, String>>,
}

/// The root envelope returned by `parse_source`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub id: String,
    pub name: Option<String>,
    pub created_on: DateTime<Utc>,
    pub query: Option<String>,
    pub content: PlanContent,
    pub ctes: Vec<Node>,
    pub is_analyze: bool,
    pub is_verbose: bool,
}
