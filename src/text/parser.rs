//! Text plan parser (§4.E): turns logical lines into a plan tree by tracking
//! an indent-depth stack of open frames, the same way the reassembled input
//! reads — each frame remembers which node (or init/sub-plan slot) owns the
//! lines nested under it.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::{PgPlanError, PgPlanResult};
use crate::model::{Jit, Node, ParentRelationship, PlanContent, Trigger};
use crate::options::ParseOptions;
use crate::text::attrs;
use crate::text::reassemble::reassemble;

const ESTIMATE: &str = r"\(cost=(?P<startup_cost>-?[0-9.]+)\.\.(?P<total_cost>-?[0-9.]+)\s+rows=(?P<plan_rows>\d+)\s+width=(?P<plan_width>\d+)\)";
const ACTUAL: &str = r"\((?:actual\s+time=(?P<actual_startup_time>-?[0-9.]+)\.\.(?P<actual_total_time>-?[0-9.]+)\s+rows=(?P<actual_rows>\d+)\s+loops=(?P<actual_loops>\d+)|actual\s+rows=(?P<actual_rows_only>\d+)\s+loops=(?P<actual_loops_only>\d+)|(?P<never_executed>never executed))\)";

static NODE_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"^(?:->\s*)?(?P<node_type>.*?)\s*(?:{ESTIMATE}\s+{ACTUAL}|{ESTIMATE}|{ACTUAL})\s*$"
    ))
    .unwrap()
});

static SUB_INIT_PLAN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(?P<kind>SubPlan|InitPlan)\s*(?P<num>\d+)?\s*(?P<returns>\(returns[^)]*\))?\s*$").unwrap());

static CTE_LINE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^CTE\s+(?P<name>.+)$").unwrap());

static WORKER_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^Worker\s+(?P<num>\d+):\s*(?P<rest>.*)$").unwrap());

static TRIGGER_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^Trigger\s+(?P<name>.+?):\s*time=(?P<time>-?[0-9.]+)\s+calls=(?P<calls>\d+)\s*$").unwrap()
});

static JIT_LINE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)^JIT:\s*$").unwrap());

static HEADER_SKIP: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)^(QUERY|-{3,}|#)").unwrap());

static WORKER_ACTUAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"^{ACTUAL}\s*(?P<extra>.*)$")).unwrap()
});

#[derive(Clone, Copy, PartialEq, Eq)]
enum FrameKind {
    Subnode,
    InitPlan,
    SubPlan,
}

enum FrameTarget {
    Node(usize),
    Jit(JitOwner),
}

#[derive(Clone, Copy)]
enum JitOwner {
    Root,
    Node(usize),
    Worker(usize, i64),
}

struct Frame {
    depth: usize,
    target: FrameTarget,
    kind: Option<FrameKind>,
    name: Option<String>,
}

struct Arena {
    nodes: Vec<Node>,
    children: Vec<Vec<usize>>,
}

impl Arena {
    fn push(&mut self, node: Node) -> usize {
        let idx = self.nodes.len();
        self.nodes.push(node);
        self.children.push(Vec::new());
        idx
    }

    fn build(&self, idx: usize) -> Node {
        let mut node = self.nodes[idx].clone();
        node.plans = self.children[idx].iter().map(|&c| self.build(c)).collect();
        node
    }
}

struct TextParser<'a> {
    options: &'a ParseOptions,
    arena: Arena,
    root: Option<usize>,
    stack: Vec<Frame>,
    root_jit: Option<Jit>,
    triggers: Vec<Trigger>,
    query_text: Option<String>,
    settings: Option<std::collections::BTreeMap<String, String>>,
}

/// Parses a cleaned, text-format EXPLAIN output into a [`PlanContent`].
pub fn parse_text(source: &str, options: &ParseOptions, query: Option<&str>) -> PgPlanResult<PlanContent> {
    let mut parser = TextParser {
        options,
        arena: Arena { nodes: Vec::new(), children: Vec::new() },
        root: None,
        stack: Vec::new(),
        root_jit: None,
        triggers: Vec::new(),
        query_text: query.map(|q| q.to_string()),
        settings: None,
    };

    for logical in reassemble(source) {
        parser.handle_line(&logical)?;
    }

    let Some(root_idx) = parser.root else {
        return Err(PgPlanError::parse_failure("unable to parse plan"));
    };

    Ok(PlanContent {
        plan: parser.arena.build(root_idx),
        triggers: parser.triggers,
        jit: parser.root_jit,
        max_rows: None,
        max_cost: None,
        max_total_cost: None,
        max_duration: None,
        max_blocks: Default::default(),
        settings: parser.settings,
    })
}

impl<'a> TextParser<'a> {
    fn handle_line(&mut self, logical: &str) -> PgPlanResult<()> {
        let mut line = logical.trim_end_matches('"');
        line = line.trim_start_matches('"');
        let expanded: String = line.replace('\t', "    ");
        let depth = expanded.len() - expanded.trim_start_matches(' ').len();
        let content = expanded.trim_start_matches(' ').trim_end();

        if content.is_empty() || HEADER_SKIP.is_match(content) {
            return Ok(());
        }

        if let Some(caps) = NODE_LINE.captures(content) {
            self.handle_node(depth, &caps);
            return Ok(());
        }

        if let Some(caps) = SUB_INIT_PLAN.captures(content) {
            self.handle_sub_init_plan(depth, &caps);
            return Ok(());
        }

        if let Some(caps) = CTE_LINE.captures(content) {
            self.handle_cte(depth, &caps);
            return Ok(());
        }

        if let Some(caps) = WORKER_LINE.captures(content) {
            self.handle_worker(&caps);
            return Ok(());
        }

        if let Some(caps) = TRIGGER_LINE.captures(content) {
            self.triggers.push(Trigger {
                name: caps["name"].trim().to_string(),
                time: caps["time"].parse().unwrap_or(0.0),
                calls: caps["calls"].parse().unwrap_or(0),
            });
            return Ok(());
        }

        if JIT_LINE.is_match(content) {
            self.handle_jit(depth);
            return Ok(());
        }

        if self.root.is_none() && self.query_text.is_some() {
            let qt = self.query_text.get_or_insert_with(String::new);
            qt.push('\n');
            qt.push_str(content);
            return Ok(());
        }

        self.handle_extra(content)
    }

    fn pop_to_depth(&mut self, depth: usize) {
        while matches!(self.stack.last(), Some(f) if f.depth >= depth) {
            self.stack.pop();
        }
    }

    fn handle_node(&mut self, depth: usize, caps: &regex::Captures) {
        self.pop_to_depth(depth);

        let mut node = Node::new(caps["node_type"].trim().to_string());
        if let Some(m) = caps.name("startup_cost") {
            node.startup_cost = m.as_str().parse().ok();
        }
        if let Some(m) = caps.name("total_cost") {
            node.total_cost = m.as_str().parse().ok();
        }
        if let Some(m) = caps.name("plan_rows") {
            node.plan_rows = m.as_str().parse().ok();
        }
        if let Some(m) = caps.name("plan_width") {
            node.plan_width = m.as_str().parse().ok();
        }
        apply_actual(&mut node, caps);

        let parent = self.stack.last();
        if let Some(parent) = parent {
            if let (Some(kind), FrameTarget::Node(parent_idx)) = (parent.kind, &parent.target) {
                if matches!(kind, FrameKind::InitPlan | FrameKind::SubPlan) {
                    node.parent_relationship = Some(if kind == FrameKind::InitPlan {
                        ParentRelationship::InitPlan
                    } else {
                        ParentRelationship::SubPlan
                    });
                    node.subplan_name = parent.name.clone();
                }
            }
        }

        let parent_idx = parent.and_then(|f| match f.target {
            FrameTarget::Node(idx) => Some(idx),
            FrameTarget::Jit(_) => None,
        });

        let new_idx = self.arena.push(node);
        match parent_idx {
            Some(p) => self.arena.children[p].push(new_idx),
            None => self.root = Some(new_idx),
        }

        self.stack.push(Frame {
            depth,
            target: FrameTarget::Node(new_idx),
            kind: Some(FrameKind::Subnode),
            name: None,
        });
    }

    fn handle_sub_init_plan(&mut self, depth: usize, caps: &regex::Captures) {
        self.pop_to_depth(depth);
        let Some(parent_idx) = self.current_node_idx() else {
            return;
        };
        let kind = if caps["kind"].eq_ignore_ascii_case("subplan") {
            FrameKind::SubPlan
        } else {
            FrameKind::InitPlan
        };
        let mut name = caps["kind"].to_string();
        if let Some(num) = caps.name("num") {
            name.push(' ');
            name.push_str(num.as_str());
        }
        if let Some(returns) = caps.name("returns") {
            name.push(' ');
            name.push_str(returns.as_str());
        }
        self.stack.push(Frame {
            depth,
            target: FrameTarget::Node(parent_idx),
            kind: Some(kind),
            name: Some(name),
        });
    }

    fn handle_cte(&mut self, depth: usize, caps: &regex::Captures) {
        self.pop_to_depth(depth);
        let Some(parent_idx) = self.current_node_idx() else {
            return;
        };
        self.stack.push(Frame {
            depth,
            target: FrameTarget::Node(parent_idx),
            kind: Some(FrameKind::InitPlan),
            name: Some(format!("CTE {}", caps["name"].trim())),
        });
    }

    fn handle_worker(&mut self, caps: &regex::Captures) {
        let Some(node_idx) = self.current_node_idx() else {
            return;
        };
        let num: i64 = caps["num"].parse().unwrap_or(0);
        let rest = caps["rest"].trim();

        let node = &mut self.arena.nodes[node_idx];
        let worker = node.worker_mut(num);

        let extra = if let Some(actual_caps) = WORKER_ACTUAL.captures(rest) {
            apply_worker_actual(worker, &actual_caps);
            actual_caps["extra"].trim().to_string()
        } else {
            rest.to_string()
        };

        if extra.is_empty() {
            return;
        }
        let mut sort = None;
        if attrs::try_sort(&extra, &mut sort) {
            if let Some(info) = sort {
                if let Some(method) = info.method {
                    worker.extras.insert("Sort Method".to_string(), crate::model::Value::String(method));
                }
                if let Some(kb) = info.space_used_kb {
                    worker.extras.insert("Sort Space Used".to_string(), crate::model::Value::Integer(kb));
                }
                if let Some(space_type) = info.space_type {
                    let label = match space_type {
                        crate::model::SortSpaceType::Memory => "Memory",
                        crate::model::SortSpaceType::Disk => "Disk",
                    };
                    worker
                        .extras
                        .insert("Sort Space Type".to_string(), crate::model::Value::String(label.to_string()));
                }
            }
            return;
        }
        if let Some((label, value)) = extra.split_once(':') {
            let (k, v) = attrs::worker_attribute(label.trim(), value.trim());
            worker.extras.insert(k, v);
        }
    }

    fn handle_jit(&mut self, depth: usize) {
        self.pop_to_depth(depth);
        if self.stack.is_empty() {
            self.stack.push(Frame {
                depth,
                target: FrameTarget::Jit(JitOwner::Root),
                kind: None,
                name: None,
            });
            return;
        }
        let Some(node_idx) = self.current_node_idx() else {
            return;
        };
        let node = &self.arena.nodes[node_idx];
        if let Some(last_worker) = node.workers.last() {
            let worker_number = last_worker.worker_number;
            self.stack.push(Frame {
                depth,
                target: FrameTarget::Jit(JitOwner::Worker(node_idx, worker_number)),
                kind: None,
                name: None,
            });
        }
        // No workers at this depth: per the documented open question, the
        // JIT block is silently dropped rather than attached to the node.
    }

    fn current_node_idx(&self) -> Option<usize> {
        self.stack.iter().rev().find_map(|f| match f.target {
            FrameTarget::Node(idx) => Some(idx),
            FrameTarget::Jit(_) => None,
        })
    }

    fn handle_extra(&mut self, content: &str) -> PgPlanResult<()> {
        match self.stack.last().map(|f| &f.target) {
            Some(FrameTarget::Jit(owner)) => {
                let owner = *owner;
                let jit = self.jit_slot(owner);
                attrs::try_jit_line(content, jit);
                return Ok(());
            }
            _ => {}
        }

        let Some(node_idx) = self.current_node_idx() else {
            return Ok(());
        };
        self.apply_node_extra(node_idx, content)
    }

    fn jit_slot(&mut self, owner: JitOwner) -> &mut Jit {
        match owner {
            JitOwner::Root => self.root_jit.get_or_insert_with(Jit::default),
            JitOwner::Node(idx) => self.arena.nodes[idx].jit.get_or_insert_with(Jit::default),
            JitOwner::Worker(idx, num) => {
                self.arena.nodes[idx].worker_mut(num).jit.get_or_insert_with(Jit::default)
            }
        }
    }

    fn apply_node_extra(&mut self, node_idx: usize, content: &str) -> PgPlanResult<()> {
        let node = &mut self.arena.nodes[node_idx];

        if attrs::try_sort(content, &mut node.sort) {
            return Ok(());
        }
        if attrs::try_sort_groups(
            content,
            &mut node.full_sort_groups,
            &mut node.pre_sorted_groups,
            self.options.strict_sort_groups,
        )? {
            return Ok(());
        }
        if attrs::try_sort_key(content, &mut node.sort_key, &mut node.presorted_key) {
            return Ok(());
        }
        if attrs::try_buffers(content, &mut node.buffers) {
            return Ok(());
        }
        if attrs::try_wal(content, &mut node.wal) {
            return Ok(());
        }
        if attrs::try_io_timings(content, &mut node.io_read_time, &mut node.io_write_time) {
            return Ok(());
        }
        if let Some((label, rest)) = content.split_once(':') {
            match label.trim() {
                l if l.eq_ignore_ascii_case("Options") => {
                    let mut options = std::collections::BTreeMap::new();
                    if attrs::try_options(content, &mut options) {
                        for (k, v) in options {
                            node.extras.insert(k, v);
                        }
                        return Ok(());
                    }
                }
                l if l.eq_ignore_ascii_case("Timing") => {
                    let mut timing = std::collections::BTreeMap::new();
                    if attrs::try_timing(content, &mut timing) {
                        for (k, v) in timing {
                            node.extras.insert(k, crate::model::Value::Decimal(v));
                        }
                        return Ok(());
                    }
                }
                l if l.eq_ignore_ascii_case("Settings") => {
                    let mut settings = std::collections::BTreeMap::new();
                    if attrs::try_settings(content, &mut settings) {
                        self.settings.get_or_insert_with(std::collections::BTreeMap::new).extend(settings);
                        return Ok(());
                    }
                }
                "Output" => {
                    node.output = attrs::split_balanced(rest.trim(), ',');
                    return Ok(());
                }
                "Rows Removed by Filter" => {
                    node.rows_removed_by_filter = rest.trim().parse().ok();
                    return Ok(());
                }
                "Rows Removed by Join Filter" => {
                    node.rows_removed_by_join_filter = rest.trim().parse().ok();
                    return Ok(());
                }
                "Workers Planned" => {
                    node.workers_planned = rest.trim().parse().ok();
                    return Ok(());
                }
                "Workers Launched" => {
                    node.workers_launched = rest.trim().parse().ok();
                    return Ok(());
                }
                _ => {}
            }
            let (k, v) = attrs::generic_attribute(label.trim(), rest.trim());
            node.extras.insert(k, v);
        }
        Ok(())
    }
}

fn apply_actual(node: &mut Node, caps: &regex::Captures) {
    if caps.name("never_executed").is_some() {
        node.never_executed = true;
        node.actual_loops = Some(0);
        node.actual_rows = Some(0);
        node.actual_total_time = Some(0.0);
        node.actual_startup_time = Some(0.0);
        return;
    }
    if let Some(m) = caps.name("actual_startup_time") {
        node.actual_startup_time = m.as_str().parse().ok();
    }
    if let Some(m) = caps.name("actual_total_time") {
        node.actual_total_time = m.as_str().parse().ok();
    }
    if let Some(m) = caps.name("actual_rows") {
        node.actual_rows = m.as_str().parse().ok();
    } else if let Some(m) = caps.name("actual_rows_only") {
        node.actual_rows = m.as_str().parse().ok();
    }
    if let Some(m) = caps.name("actual_loops") {
        node.actual_loops = m.as_str().parse().ok();
    } else if let Some(m) = caps.name("actual_loops_only") {
        node.actual_loops = m.as_str().parse().ok();
    }
}

fn apply_worker_actual(worker: &mut crate::model::Worker, caps: &regex::Captures) {
    if caps.name("never_executed").is_some() {
        worker.actual_loops = Some(0);
        worker.actual_rows = Some(0);
        worker.actual_total_time = Some(0.0);
        worker.actual_startup_time = Some(0.0);
        return;
    }
    if let Some(m) = caps.name("actual_startup_time") {
        worker.actual_startup_time = m.as_str().parse().ok();
    }
    if let Some(m) = caps.name("actual_total_time") {
        worker.actual_total_time = m.as_str().parse().ok();
    }
    if let Some(m) = caps.name("actual_rows") {
        worker.actual_rows = m.as_str().parse().ok();
    } else if let Some(m) = caps.name("actual_rows_only") {
        worker.actual_rows = m.as_str().parse().ok();
    }
    if let Some(m) = caps.name("actual_loops") {
        worker.actual_loops = m.as_str().parse().ok();
    } else if let Some(m) = caps.name("actual_loops_only") {
        worker.actual_loops = m.as_str().parse().ok();
    }
}
