//! Enrichment pass (§4.G): the post-parse tree walk that turns a raw
//! [`PlanContent`] into the derived metrics consumers actually read —
//! exclusive costs/durations, planner mis-estimation, CTE relocation, worker
//! propagation, revised row counts, and plan-wide maxima.
//!
//! Runs once, synchronously, over an owned tree; nothing here touches I/O or
//! shared state, so concurrent enrichment of distinct plans on distinct
//! threads never interferes (§5).

use crate::model::{BufferCounters, EstimateDirection, MaxBlocks, Node, ParentRelationship, PlanContent};

/// Recursively enriches `content.plan` in place, rolls plan-wide maxima up
/// onto `content`, and returns the CTE nodes relocated out of the main tree
/// (§4.G.3) for the caller to attach to `Plan::ctes`. `node_id` is assigned
/// pre-order starting at 1.
pub fn enrich(content: &mut PlanContent) -> Vec<Node> {
    let mut next_id = 1u32;
    enrich_node(&mut content.plan, None, &mut next_id);

    let mut cte_nodes = Vec::new();
    collect_and_remove_ctes(&mut content.plan, &mut cte_nodes);

    let mut max_rows: Option<i64> = None;
    let mut max_cost: Option<f64> = None;
    let mut max_total_cost: Option<f64> = None;
    let mut max_duration: Option<f64> = None;
    let mut max_blocks = MaxBlocks::default();
    scan_maxima(
        &content.plan,
        &mut max_rows,
        &mut max_cost,
        &mut max_total_cost,
        &mut max_duration,
        &mut max_blocks,
    );
    for cte in &cte_nodes {
        scan_maxima(
            cte,
            &mut max_rows,
            &mut max_cost,
            &mut max_total_cost,
            &mut max_duration,
            &mut max_blocks,
        );
    }

    content.max_rows = max_rows;
    content.max_cost = max_cost;
    content.max_total_cost = max_total_cost;
    content.max_duration = max_duration;
    content.max_blocks = max_blocks;

    cte_nodes
}

/// Pre-order id assignment, estimate-factor computation, and worker
/// propagation, followed by the post-order accumulation (exclusive
/// cost/duration/buffers/IO, revised row counts) once children are done.
fn enrich_node(node: &mut Node, inherited_workers: Option<i64>, next_id: &mut u32) {
    node.node_id = Some(*next_id);
    *next_id += 1;

    compute_estimate_factor(node);

    // `workers_planned_by_gather` is a property a node inherits from its
    // nearest ancestor Gather, never from itself — the Gather's own actuals
    // are not divided across its own planned workers, only its subtree's are
    // (§4.G.2, invariant 4). `workers_planned == 0` is "explicitly no
    // parallelism", distinct from "absent"; propagate it as `Some(0)`, not
    // skip it (§9 open question).
    node.workers_planned_by_gather = inherited_workers;
    let this_gather = node.workers_planned.or(inherited_workers);

    for child in &mut node.plans {
        let child_inherited = if child.parent_relationship.as_ref().is_some_and(|r| r.is_init_or_sub_plan())
            || child.is_cte_init_plan()
        {
            None
        } else {
            this_gather
        };
        enrich_node(child, child_inherited, next_id);
    }

    compute_actuals(node);
    compute_exclusive_cost(node);
    compute_revised_rows(node);
    compute_exclusive_buffers(node);
}

/// §4.G.1 — planner estimate factor/direction. Only meaningful once the
/// query has actually run (`actual_rows` present).
fn compute_estimate_factor(node: &mut Node) {
    let (Some(actual), Some(planned)) = (node.actual_rows, node.plan_rows) else {
        return;
    };
    let denom = actual.min(planned).max(1) as f64;
    let numer = actual.max(planned) as f64;
    if denom == 0.0 {
        node.planner_estimate_direction = EstimateDirection::None;
        node.planner_estimate_factor = None;
        return;
    }
    node.planner_estimate_factor = Some((numer / denom).max(1.0));
    node.planner_estimate_direction = if actual > planned {
        EstimateDirection::Under
    } else if actual < planned {
        EstimateDirection::Over
    } else {
        EstimateDirection::None
    };
}

/// §4.G.4 — post-order: scale actual times by loops/workers, then compute
/// exclusive duration against non-InitPlan children's already-scaled totals.
fn compute_actuals(node: &mut Node) {
    let Some(total_time) = node.actual_total_time else {
        return;
    };
    let workers = node.workers_planned_by_gather.unwrap_or(0).max(0) as f64 + 1.0;
    let loops = node.actual_loops.unwrap_or(1).max(1) as f64;
    let scale = loops / workers;

    node.actual_total_time = Some(total_time * scale);
    if let Some(startup) = node.actual_startup_time {
        node.actual_startup_time = Some(startup * scale);
    }

    let children_exclusive: f64 = node
        .plans
        .iter()
        .filter(|c| !matches!(c.parent_relationship, Some(ParentRelationship::InitPlan)))
        .map(|c| c.exclusive_duration.unwrap_or(0.0))
        .sum();

    node.exclusive_duration = Some((node.actual_total_time.unwrap() - children_exclusive).max(0.0));
}

/// §4.G.5 — exclusive cost: total minus non-InitPlan children's totals,
/// clamped to 0.
fn compute_exclusive_cost(node: &mut Node) {
    let Some(total_cost) = node.total_cost else {
        return;
    };
    let children_total: f64 = node
        .plans
        .iter()
        .filter(|c| !matches!(c.parent_relationship, Some(ParentRelationship::InitPlan)))
        .filter_map(|c| c.total_cost)
        .sum();
    node.exclusive_cost = Some((total_cost - children_total).max(0.0));
}

/// §4.G.6 — `*_REVISED` row counters: raw value times max(loops, 1).
fn compute_revised_rows(node: &mut Node) {
    let loops = node.actual_loops.unwrap_or(1).max(1);
    node.actual_rows_revised = node.actual_rows.map(|v| v * loops);
    node.plan_rows_revised = node.plan_rows.map(|v| v * loops);
    node.rows_removed_by_filter_revised = node.rows_removed_by_filter.map(|v| v * loops);
    node.rows_removed_by_join_filter_revised = node.rows_removed_by_join_filter.map(|v| v * loops);
}

/// §4.G.7 — exclusive buffer/IO counters: self minus sum of children's own
/// (raw, not exclusive) counters, restricted to the same property type.
fn compute_exclusive_buffers(node: &mut Node) {
    let Some(own) = node.buffers else {
        return;
    };
    let mut children_sum = BufferCounters::default();
    for child in &node.plans {
        if let Some(cb) = child.buffers {
            children_sum.add(&cb);
        }
    }
    node.buffers_exclusive = Some(own.minus(&children_sum));
}

/// §4.G.3 — relocates CTE InitPlan children into `ctes`, recursing into the
/// remaining tree first so nested CTEs inside a CTE's own subtree are also
/// lifted out.
fn collect_and_remove_ctes(node: &mut Node, out: &mut Vec<Node>) {
    for child in &mut node.plans {
        collect_and_remove_ctes(child, out);
    }
    let mut kept = Vec::with_capacity(node.plans.len());
    for child in std::mem::take(&mut node.plans) {
        if child.is_cte_init_plan() {
            out.push(child);
        } else {
            kept.push(child);
        }
    }
    node.plans = kept;
}

/// §4.G.8 — scans a (sub)tree for the four scalar maxima and the buffer
/// class maxima, omitting a `maxBlocks` entry whose maximum would be zero.
fn scan_maxima(
    node: &Node,
    max_rows: &mut Option<i64>,
    max_cost: &mut Option<f64>,
    max_total_cost: &mut Option<f64>,
    max_duration: &mut Option<f64>,
    max_blocks: &mut MaxBlocks,
) {
    if let Some(rows) = node.actual_rows {
        *max_rows = Some(max_rows.unwrap_or(i64::MIN).max(rows));
    }
    if let Some(cost) = node.exclusive_cost {
        *max_cost = Some(max_cost.unwrap_or(f64::MIN).max(cost));
    }
    if let Some(cost) = node.total_cost {
        *max_total_cost = Some(max_total_cost.unwrap_or(f64::MIN).max(cost));
    }
    if let Some(duration) = node.exclusive_duration {
        *max_duration = Some(max_duration.unwrap_or(f64::MIN).max(duration));
    }
    if let Some(b) = node.buffers {
        let shared = b.shared_total();
        let local = b.local_total();
        let temp = b.temp_total();
        if shared > 0 {
            max_blocks.shared = Some(max_blocks.shared.unwrap_or(0).max(shared));
        }
        if local > 0 {
            max_blocks.local = Some(max_blocks.local.unwrap_or(0).max(local));
        }
        if temp > 0 {
            max_blocks.temp = Some(max_blocks.temp.unwrap_or(0).max(temp));
        }
    }
    for child in &node.plans {
        scan_maxima(child, max_rows, max_cost, max_total_cost, max_duration, max_blocks);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PlanContent;

    fn content_of(plan: Node) -> PlanContent {
        PlanContent {
            plan,
            triggers: Vec::new(),
            jit: None,
            max_rows: None,
            max_cost: None,
            max_total_cost: None,
            max_duration: None,
            max_blocks: MaxBlocks::default(),
            settings: None,
        }
    }

    #[test]
    fn node_ids_are_preorder_and_unique() {
        let mut root = Node::new("Hash Join");
        root.plans.push(Node::new("Seq Scan on a"));
        root.plans.push(Node::new("Seq Scan on b"));
        let mut content = content_of(root);
        enrich(&mut content);
        assert_eq!(content.plan.node_id, Some(1));
        assert_eq!(content.plan.plans[0].node_id, Some(2));
        assert_eq!(content.plan.plans[1].node_id, Some(3));
    }

    #[test]
    fn exclusive_cost_subtracts_children_and_clamps() {
        let mut root = Node::new("Hash Join");
        root.total_cost = Some(10.0);
        let mut child = Node::new("Seq Scan on a");
        child.total_cost = Some(4.0);
        root.plans.push(child);
        let mut content = content_of(root);
        enrich(&mut content);
        assert_eq!(content.plan.exclusive_cost, Some(6.0));
    }

    #[test]
    fn worker_propagation_through_gather_scales_child_time() {
        let mut gather = Node::new("Gather");
        gather.workers_planned = Some(3);
        gather.actual_total_time = Some(100.0);
        gather.actual_loops = Some(1);
        let mut scan = Node::new("Seq Scan on t");
        scan.actual_total_time = Some(40.0);
        scan.actual_loops = Some(4);
        gather.plans.push(scan);
        let mut content = content_of(gather);
        enrich(&mut content);
        let child = &content.plan.plans[0];
        assert_eq!(child.workers_planned_by_gather, Some(3));
        // 40.0 * (4 loops / 4 workers) == 40.0
        assert_eq!(child.actual_total_time, Some(40.0));
    }

    #[test]
    fn gather_node_itself_is_not_divided_by_its_own_planned_workers() {
        let mut gather = Node::new("Gather");
        gather.workers_planned = Some(3);
        gather.actual_total_time = Some(100.0);
        gather.actual_loops = Some(1);
        let mut content = content_of(gather);
        enrich(&mut content);
        // No ancestor Gather above the root, so its own workers_planned_by_gather
        // is absent and its actual_total_time is divided by 1, not 4.
        assert_eq!(content.plan.workers_planned_by_gather, None);
        assert_eq!(content.plan.actual_total_time, Some(100.0));
    }

    #[test]
    fn explicit_zero_workers_planned_propagates_as_zero_not_absent() {
        let mut gather = Node::new("Gather");
        gather.workers_planned = Some(0);
        gather.plans.push(Node::new("Seq Scan on t"));
        let mut content = content_of(gather);
        enrich(&mut content);
        assert_eq!(content.plan.plans[0].workers_planned_by_gather, Some(0));
    }

    #[test]
    fn cte_init_plan_child_is_relocated_out_of_main_tree() {
        let mut root = Node::new("CTE Scan on cte_x");
        let mut cte = Node::new("Seq Scan on t");
        cte.parent_relationship = Some(ParentRelationship::InitPlan);
        cte.subplan_name = Some("CTE x".to_string());
        root.plans.push(cte);
        let mut content = content_of(root);
        let ctes = enrich(&mut content);
        assert!(content.plan.plans.is_empty());
        assert_eq!(ctes.len(), 1);
        assert_eq!(ctes[0].subplan_name.as_deref(), Some("CTE x"));
    }

    #[test]
    fn planner_estimate_factor_is_never_below_one() {
        let mut root = Node::new("Seq Scan on t");
        root.plan_rows = Some(100);
        root.actual_rows = Some(10);
        let mut content = content_of(root);
        enrich(&mut content);
        assert_eq!(content.plan.planner_estimate_direction, EstimateDirection::Over);
        assert!(content.plan.planner_estimate_factor.unwrap() >= 1.0);
    }

    #[test]
    fn estimate_direction_is_none_when_rows_match() {
        let mut root = Node::new("Seq Scan on t");
        root.plan_rows = Some(10);
        root.actual_rows = Some(10);
        let mut content = content_of(root);
        enrich(&mut content);
        assert_eq!(content.plan.planner_estimate_direction, EstimateDirection::None);
    }

    #[test]
    fn revised_rows_multiply_by_loops() {
        let mut root = Node::new("Seq Scan on t");
        root.actual_rows = Some(5);
        root.actual_loops = Some(3);
        root.rows_removed_by_filter = Some(2);
        let mut content = content_of(root);
        enrich(&mut content);
        assert_eq!(content.plan.actual_rows_revised, Some(15));
        assert_eq!(content.plan.rows_removed_by_filter_revised, Some(6));
    }

    #[test]
    fn exclusive_buffers_subtract_children() {
        let mut root = Node::new("Hash Join");
        root.buffers = Some(BufferCounters { shared_hit_blocks: 10, ..Default::default() });
        let mut child = Node::new("Seq Scan on a");
        child.buffers = Some(BufferCounters { shared_hit_blocks: 3, ..Default::default() });
        root.plans.push(child);
        let mut content = content_of(root);
        enrich(&mut content);
        assert_eq!(content.plan.buffers_exclusive.unwrap().shared_hit_blocks, 7);
    }

    #[test]
    fn maxima_scan_covers_whole_tree_including_ctes() {
        let mut root = Node::new("Seq Scan on t");
        root.total_cost = Some(5.0);
        root.actual_rows = Some(7);
        let mut cte = Node::new("Seq Scan on cte_src");
        cte.parent_relationship = Some(ParentRelationship::InitPlan);
        cte.subplan_name = Some("CTE x".to_string());
        cte.total_cost = Some(20.0);
        cte.actual_rows = Some(99);
        root.plans.push(cte);
        let mut content = content_of(root);
        enrich(&mut content);
        assert_eq!(content.max_rows, Some(99));
        assert_eq!(content.max_total_cost, Some(20.0));
    }

    #[test]
    fn max_blocks_omits_zero_classes() {
        let mut root = Node::new("Seq Scan on t");
        root.buffers = Some(BufferCounters { shared_hit_blocks: 5, ..Default::default() });
        let mut content = content_of(root);
        enrich(&mut content);
        assert_eq!(content.max_blocks.shared, Some(5));
        assert!(content.max_blocks.local.is_none());
        assert!(content.max_blocks.temp.is_none());
    }
}
