//! Floorplanner: assigns every dataflow vertex to a slot.
//!
//! Grounded on the teacher's `quotient.rs` blocked-recurrence structure: a
//! pass that repeatedly narrows a working set (there, quotient chunks; here,
//! the slot a vertex currently occupies) by solving one small problem per
//! narrowing step rather than one giant problem up front. Each bisection step
//! builds a single `milp::Model`, solves it, and folds the result back into
//! the working assignment before recursing into the next level.
//!
//! `Strategy::Quick` skips the iterative narrowing and solves one flat model
//! directly against the full-depth leaves, trading precision for speed (spec.md
//! section 4.2).

use std::collections::HashMap;
use std::time::Duration;

use indexmap::IndexMap;

use crate::device::Half;
use crate::graph::{EdgeCategory, Graph};
use crate::milp::{Model, Sense, SolveStatus};
use crate::slot::{SlotId, SlotManager};
use crate::AreaVec;

/// How finely the floorplanner partitions vertices onto slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// One flat assignment directly at full-depth (1x1) leaf granularity.
    Quick,
    /// Iterative bisection all the way to 1x1 leaves.
    Exhaustive,
    /// Iterative bisection stopping as soon as a slot fits in a single SLR.
    SlrLevelOnly,
}

/// Which term of the crossing/area objective dominates the scalarization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptPriority {
    Area,
    SlrCrossing,
}

/// Tunable ratios the bisection loop escalates through on infeasibility.
#[derive(Debug, Clone)]
pub struct FloorplanParams {
    pub strategy: Strategy,
    pub opt_priority: OptPriority,
    pub min_area_limit: f64,
    pub max_area_limit: f64,
    pub min_slr_width_limit: f64,
    pub max_slr_width_limit: f64,
    pub max_search_time: Duration,
}

impl Default for FloorplanParams {
    fn default() -> Self {
        FloorplanParams {
            strategy: Strategy::Exhaustive,
            opt_priority: OptPriority::SlrCrossing,
            min_area_limit: 0.55,
            max_area_limit: 0.85,
            min_slr_width_limit: 0.6,
            max_slr_width_limit: 0.8,
            max_search_time: Duration::from_secs(5),
        }
    }
}

/// Errors raised while searching for a feasible floorplan (spec.md section 7).
#[derive(Debug, thiserror::Error)]
pub enum FloorplanError {
    #[error("no feasible floorplan found; tightest constraint was {tightest_constraint}")]
    InfeasibleFloorplan { tightest_constraint: String },
    #[error("pre-assigned region {region} for vertex {vertex} does not resolve to a slot")]
    InvalidPreAssignment { vertex: String, region: String },
}

/// Final vertex-to-slot assignment plus the leaf fringe it was computed over.
#[derive(Debug, Clone)]
pub struct Assignment {
    pub vertex_to_slot: IndexMap<String, SlotId>,
    pub leaves: Vec<SlotId>,
}

const ESCALATION_STEPS: u32 = 6;

/// Assign every vertex in `graph` to a slot managed by `slots`.
///
/// `grouping` lists vertex-name groups that must land on the same slot;
/// `pre_assignment` pins named vertices to a named region (a slot's pblock
/// name, at any level of the bisection tree).
pub fn floorplan(
    graph: &Graph,
    slots: &mut SlotManager,
    grouping: &[Vec<String>],
    pre_assignment: &HashMap<String, String>,
    params: &FloorplanParams,
) -> Result<Assignment, FloorplanError> {
    let grouping_pairs = pairs_from_groups(grouping);

    match params.strategy {
        Strategy::Quick => {
            let leaves = slots.leaves_at_full_depth();
            let assignment = solve_flat(graph, slots, &leaves, &grouping_pairs, pre_assignment, params)?;
            Ok(Assignment { vertex_to_slot: assignment, leaves })
        }
        Strategy::Exhaustive | Strategy::SlrLevelOnly => {
            bisection_loop(graph, slots, &grouping_pairs, pre_assignment, params)
        }
    }
}

fn pairs_from_groups(grouping: &[Vec<String>]) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for group in grouping {
        for w in group.windows(2) {
            out.push((w[0].clone(), w[1].clone()));
        }
    }
    out
}

/// Iteratively narrow every vertex's slot assignment one bisection level at a
/// time, stopping per `Strategy::{Exhaustive, SlrLevelOnly}`.
fn bisection_loop(
    graph: &Graph,
    slots: &mut SlotManager,
    grouping_pairs: &[(String, String)],
    pre_assignment: &HashMap<String, String>,
    params: &FloorplanParams,
) -> Result<Assignment, FloorplanError> {
    let mut current: IndexMap<String, SlotId> =
        graph.vertices.keys().map(|v| (v.clone(), slots.root())).collect();

    loop {
        let stopped = |slots: &SlotManager, id: SlotId| match params.strategy {
            Strategy::Exhaustive => slots.is_leaf(id),
            Strategy::SlrLevelOnly => !slots.straddles_slr(id),
            Strategy::Quick => unreachable!("quick does not use the bisection loop"),
        };

        // Group vertices by their current (un-split-further) slot.
        let mut by_parent: IndexMap<SlotId, Vec<String>> = IndexMap::new();
        for (v, &slot) in &current {
            if !stopped(slots, slot) {
                by_parent.entry(slot).or_default().push(v.clone());
            }
        }
        if by_parent.is_empty() {
            break;
        }

        for (parent, vertices) in by_parent {
            let (lo, hi) = slots.split(parent);
            let candidates = [lo, hi];
            let resolved = solve_candidates(graph, slots, &vertices, &candidates, grouping_pairs, pre_assignment, params)?;
            for (v, slot) in resolved {
                current.insert(v, slot);
            }
        }
    }

    let leaves: Vec<SlotId> = current.values().copied().collect::<std::collections::BTreeSet<_>>().into_iter().collect();
    Ok(Assignment { vertex_to_slot: current, leaves })
}

/// Solve one bisection step (exactly two candidate slots) for the vertices
/// currently parked on their shared parent.
fn solve_candidates(
    graph: &Graph,
    slots: &SlotManager,
    vertices: &[String],
    candidates: &[SlotId; 2],
    grouping_pairs: &[(String, String)],
    pre_assignment: &HashMap<String, String>,
    params: &FloorplanParams,
) -> Result<Vec<(String, SlotId)>, FloorplanError> {
    let in_scope_edges = edges_among(graph, vertices);

    for area_step in 0..=ESCALATION_STEPS {
        let area_ratio = escalate(params.min_area_limit, params.max_area_limit, area_step);
        for crossing_step in 0..=ESCALATION_STEPS {
            let crossing_ratio = escalate(params.min_slr_width_limit, params.max_slr_width_limit, crossing_step);

            match build_and_solve(
                graph,
                slots,
                vertices,
                candidates,
                &in_scope_edges,
                grouping_pairs,
                pre_assignment,
                area_ratio,
                crossing_ratio,
                params.opt_priority,
                params.max_search_time,
            )? {
                Ok(resolved) => return Ok(resolved),
                Err(_label) => continue,
            }
        }
    }

    Err(FloorplanError::InfeasibleFloorplan {
        tightest_constraint: format!(
            "area/crossing ratio escalation exhausted for slot group of {} vertices",
            vertices.len()
        ),
    })
}

/// `Strategy::Quick`: one flat model over every vertex and every full-depth
/// leaf at once.
fn solve_flat(
    graph: &Graph,
    slots: &SlotManager,
    leaves: &[SlotId],
    grouping_pairs: &[(String, String)],
    pre_assignment: &HashMap<String, String>,
    params: &FloorplanParams,
) -> Result<IndexMap<String, SlotId>, FloorplanError> {
    let vertices: Vec<String> = graph.vertices.keys().cloned().collect();
    let in_scope_edges = edges_among(graph, &vertices);

    for area_step in 0..=ESCALATION_STEPS {
        let area_ratio = escalate(params.min_area_limit, params.max_area_limit, area_step);
        for crossing_step in 0..=ESCALATION_STEPS {
            let crossing_ratio = escalate(params.min_slr_width_limit, params.max_slr_width_limit, crossing_step);

            match build_and_solve(
                graph,
                slots,
                &vertices,
                leaves,
                &in_scope_edges,
                grouping_pairs,
                pre_assignment,
                area_ratio,
                crossing_ratio,
                params.opt_priority,
                params.max_search_time,
            )? {
                Ok(resolved) => return Ok(resolved.into_iter().collect()),
                Err(_label) => continue,
            }
        }
    }

    Err(FloorplanError::InfeasibleFloorplan {
        tightest_constraint: "quick strategy: area/crossing ratio escalation exhausted".to_string(),
    })
}

fn escalate(min: f64, max: f64, step: u32) -> f64 {
    min + (max - min) * (step as f64) / (ESCALATION_STEPS as f64)
}

fn edges_among<'g>(graph: &'g Graph, vertices: &[String]) -> Vec<&'g crate::graph::Edge> {
    let in_scope: std::collections::HashSet<&str> = vertices.iter().map(|s| s.as_str()).collect();
    graph
        .edges
        .values()
        .filter(|e| in_scope.contains(e.producer.as_str()) && in_scope.contains(e.consumer.as_str()))
        .collect()
}

/// Build and solve one binary-ILP model placing each of `vertices` onto one
/// of `candidates`. Returns `Ok(Err(label))` (not a `FloorplanError`) when the
/// solve is infeasible, so the escalation loop can keep trying ratios; a
/// `FloorplanError` is only returned for a structurally invalid pre-assignment.
#[allow(clippy::too_many_arguments)]
fn build_and_solve(
    graph: &Graph,
    slots: &SlotManager,
    vertices: &[String],
    candidates: &[SlotId],
    in_scope_edges: &[&crate::graph::Edge],
    grouping_pairs: &[(String, String)],
    pre_assignment: &HashMap<String, String>,
    area_ratio: f64,
    crossing_ratio: f64,
    opt_priority: OptPriority,
    time_limit: Duration,
) -> Result<Result<Vec<(String, SlotId)>, String>, FloorplanError> {
    let mut model = Model::new();

    // One binary var per (vertex, candidate).
    let mut x: HashMap<(&str, SlotId), crate::milp::VarId> = HashMap::new();
    for v in vertices {
        for &c in candidates {
            let var = model.new_binary_var(format!("x[{v},{}]", slots.name(c)));
            x.insert((v.as_str(), c), var);
        }
    }

    // Exactly one candidate per vertex.
    for v in vertices {
        let terms: Vec<_> = candidates.iter().map(|&c| (x[&(v.as_str(), c)], 1.0)).collect();
        model.add_constraint(&terms, Sense::Eq, 1.0, format!("exactly-one[{v}]"));
    }

    // Pre-assignment: force the candidate that contains the pinned region.
    // If every candidate is still coarser than the region (the bisection
    // hasn't reached the region's granularity yet), leave the vertex
    // unconstrained at this step rather than erroring.
    for v in vertices {
        if let Some(region) = pre_assignment.get(v.as_str()) {
            let region_rect = parse_region_rect(region).ok_or_else(|| FloorplanError::InvalidPreAssignment {
                vertex: v.clone(),
                region: region.clone(),
            })?;
            let forced = candidates.iter().find(|&&c| rect_contains(&slots.rect(c), &region_rect));
            match forced {
                Some(&c) => {
                    model.add_constraint(&[(x[&(v.as_str(), c)], 1.0)], Sense::Eq, 1.0, format!("pre-assign[{v}]"));
                }
                None => {
                    let all_coarser = candidates.iter().all(|&c| rect_contains(&region_rect, &slots.rect(c)));
                    if !all_coarser {
                        return Err(FloorplanError::InvalidPreAssignment {
                            vertex: v.clone(),
                            region: region.clone(),
                        });
                    }
                }
            }
        }
    }

    // Grouping: paired vertices must land on the same candidate.
    for (u, v) in grouping_pairs {
        if vertices.iter().any(|n| n == u) && vertices.iter().any(|n| n == v) {
            for &c in candidates {
                model.add_constraint(
                    &[(x[&(u.as_str(), c)], 1.0), (x[&(v.as_str(), c)], -1.0)],
                    Sense::Eq,
                    0.0,
                    format!("grouping[{u},{v},{}]", slots.name(c)),
                );
            }
        }
    }

    // Async-mmap edges force co-location exactly like a grouping pair.
    for e in in_scope_edges {
        if e.category == EdgeCategory::AsyncMmap {
            for &c in candidates {
                model.add_constraint(
                    &[(x[&(e.producer.as_str(), c)], 1.0), (x[&(e.consumer.as_str(), c)], -1.0)],
                    Sense::Eq,
                    0.0,
                    format!("async-mmap-colocate[{}]", e.name),
                );
            }
        }
    }

    // Area constraints per candidate, per resource dimension.
    for &c in candidates {
        let capacity = slots.capacity(c);
        for r in crate::Resource::ALL {
            let terms: Vec<_> = vertices
                .iter()
                .map(|v| (x[&(v.as_str(), c)], vertex_area(graph, v).get(r) as f64))
                .collect();
            let rhs = area_ratio * capacity.get(r) as f64;
            model.add_constraint(&terms, Sense::Le, rhs, format!("area[{},{}]", slots.name(c), r));
        }
    }

    // Crossing cost: candidates may span more than one SLR (the `Quick`
    // flat case). For every pair of candidates in different SLR classes,
    // add a crossing indicator per in-scope edge, forced to 1 whenever the
    // edge's endpoints land on that pair.
    let slr_classes: Vec<Option<u32>> = candidates.iter().map(|&c| slots.slr_of(c)).collect();
    let crosses_slr = slr_classes.iter().collect::<std::collections::HashSet<_>>().len() > 1;

    let mut crossing_vars: Vec<(crate::milp::VarId, u32)> = Vec::new();
    if crosses_slr {
        for e in in_scope_edges {
            let width = graph.effective_width(e);
            let s = model.new_binary_var(format!("cross[{}]", e.name));
            for (i, &ci) in candidates.iter().enumerate() {
                for (j, &cj) in candidates.iter().enumerate() {
                    if i == j || slr_classes[i] == slr_classes[j] {
                        continue;
                    }
                    model.add_constraint(
                        &[(x[&(e.producer.as_str(), ci)], 1.0), (x[&(e.consumer.as_str(), cj)], 1.0), (s, -1.0)],
                        Sense::Le,
                        1.0,
                        format!("cross-force[{},{},{}]", e.name, slots.name(ci), slots.name(cj)),
                    );
                }
            }
            crossing_vars.push((s, width));
        }

        let n_boundaries = slr_classes.iter().flatten().collect::<std::collections::HashSet<_>>().len().saturating_sub(1).max(1);
        let budget_terms: Vec<_> = crossing_vars.iter().map(|&(s, w)| (s, w as f64)).collect();
        if !budget_terms.is_empty() {
            let channel_capacity = slots.device().slr_channel_capacity as f64;
            model.add_constraint(
                &budget_terms,
                Sense::Le,
                crossing_ratio * channel_capacity * n_boundaries as f64,
                "slr-crossing-budget",
            );
        }
    }

    // Objective: primary term always minimizes total crossing width (the
    // only term with a clean binary-linear formulation); `opt_priority`
    // scales a secondary area-balance proxy against it, per spec.md section
    // 9's allowance for "a single scalarization via large weights".
    const CROSSING_WEIGHT: f64 = 1_000.0;
    const BALANCE_WEIGHT: f64 = 1.0;
    let mut objective: Vec<(crate::milp::VarId, f64)> =
        crossing_vars.iter().map(|&(s, w)| (s, CROSSING_WEIGHT * w as f64)).collect();
    if matches!(opt_priority, OptPriority::Area) {
        if let Some(&last) = candidates.last() {
            for v in vertices {
                let lut = vertex_area(graph, v).get(crate::Resource::Lut) as f64;
                objective.push((x[&(v.as_str(), last)], BALANCE_WEIGHT * lut));
            }
        }
    }
    model.set_objective(&objective, true);

    match model.solve(time_limit) {
        SolveStatus::Optimal => {
            let mut out = Vec::with_capacity(vertices.len());
            for v in vertices {
                let chosen = candidates
                    .iter()
                    .find(|&&c| model.value(x[&(v.as_str(), c)]) > 0.5)
                    .copied()
                    .expect("exactly-one constraint guarantees a chosen candidate");
                out.push((v.clone(), chosen));
            }
            Ok(Ok(out))
        }
        SolveStatus::Infeasible | SolveStatus::Timeout => {
            Ok(Err(model.tightest_constraint_label().unwrap_or("unknown").to_string()))
        }
    }
}

/// Parse a pblock-style region name back into its rectangle, inverting
/// `Rect::pblock_name()`. Pre-assignment may pin a vertex to a region finer
/// than anything split so far, so the region's rect can't be looked up by
/// name in the slot arena — it has to be reconstructed from the string.
fn parse_region_rect(region: &str) -> Option<crate::device::Rect> {
    let rest = region.strip_prefix("SLOT_X")?;
    let (x0, rest) = rest.split_once('Y')?;
    let (y0, rest) = rest.split_once("_X")?;
    let (x1, y1) = rest.split_once('Y')?;
    let dl_x: i32 = x0.parse().ok()?;
    let dl_y: i32 = y0.parse().ok()?;
    let ur_x: i32 = x1.parse().ok()?;
    let ur_y: i32 = y1.parse().ok()?;
    crate::device::Rect::new(dl_x, dl_y, ur_x + 1, ur_y + 1).ok()
}

fn rect_contains(outer: &crate::device::Rect, inner: &crate::device::Rect) -> bool {
    outer.dl_x <= inner.dl_x && outer.dl_y <= inner.dl_y && outer.ur_x >= inner.ur_x && outer.ur_y >= inner.ur_y
}

fn vertex_area(graph: &Graph, vertex: &str) -> AreaVec {
    graph.vertices.get(vertex).map(|v| v.area).unwrap_or(AreaVec::ZERO)
}

/// Reassign HBM port channel numbers after a final floorplan, per the bottom
/// row's left/right half split: left half starts at channel 0, right half at
/// channel 16, both incrementing in vertex-map iteration order. Keyed by each
/// port's top-level argument name, not its vertex name. Only applies to HBM
/// port vertices; returns `None` if the device has no HBM. Panics if an HBM
/// port ends up outside SLR 0 (a floorplanner bug, not a user-facing error:
/// `half_of` is only `Some` on the bottom row).
pub fn rebind_hbm_ports(graph: &Graph, slots: &SlotManager, assignment: &Assignment) -> Option<IndexMap<String, u32>> {
    if !slots.device().has_hbm {
        return None;
    }

    let mut left_ports: Vec<&str> = Vec::new();
    let mut right_ports: Vec<&str> = Vec::new();

    for (name, vertex) in &graph.vertices {
        if vertex.port_cat != Some(crate::graph::PortCategory::Hbm) {
            continue;
        }
        let slot = *assignment.vertex_to_slot.get(name).expect("every vertex is assigned");
        assert_eq!(slots.slr_of(slot), Some(0), "HBM port assigned outside SLR 0");
        let top_arg_name = vertex.top_arg_name.as_deref().expect("HBM port vertex without a top_arg_name");
        match slots.device().half_of(&slots.rect(slot)) {
            Some(Half::Left) => left_ports.push(top_arg_name),
            Some(Half::Right) => right_ports.push(top_arg_name),
            None => {}
        }
    }

    let mut out = IndexMap::new();
    for (i, name) in left_ports.into_iter().enumerate() {
        out.insert(name.to_string(), i as u32);
    }
    for (i, name) in right_ports.into_iter().enumerate() {
        out.insert(name.to_string(), 16 + i as u32);
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Device;
    use crate::graph::{Edge, EdgeCategory, PortCategory, Vertex, VertexCategory};

    fn small_graph() -> Graph {
        let mut g = Graph::new();
        g.add_vertex(Vertex {
            name: "a".into(),
            category: VertexCategory::Task,
            area: AreaVec([1000, 1000, 0, 0, 0]),
            port_cat: None,
            port_id: None,
            top_arg_name: None,
        });
        g.add_vertex(Vertex {
            name: "b".into(),
            category: VertexCategory::Task,
            area: AreaVec([1000, 1000, 0, 0, 0]),
            port_cat: None,
            port_id: None,
            top_arg_name: None,
        });
        g.add_edge(Edge {
            name: "e1".into(),
            producer: "a".into(),
            consumer: "b".into(),
            width: 32,
            nominal_depth: 2,
            category: EdgeCategory::Fifo,
        });
        g
    }

    fn manager() -> SlotManager {
        SlotManager::new(Device::for_part_num("xcu250-figd2104-2L-e").unwrap())
    }

    #[test]
    fn trivial_two_vertex_graph_is_placed() {
        let g = small_graph();
        let mut slots = manager();
        let params = FloorplanParams::default();
        let result = floorplan(&g, &mut slots, &[], &HashMap::new(), &params).unwrap();
        assert_eq!(result.vertex_to_slot.len(), 2);
    }

    #[test]
    fn grouping_keeps_vertices_together() {
        let g = small_graph();
        let mut slots = manager();
        let params = FloorplanParams::default();
        let grouping = vec![vec!["a".to_string(), "b".to_string()]];
        let result = floorplan(&g, &mut slots, &grouping, &HashMap::new(), &params).unwrap();
        assert_eq!(result.vertex_to_slot["a"], result.vertex_to_slot["b"]);
    }

    #[test]
    fn pre_assignment_is_honored() {
        let g = small_graph();
        let mut slots = manager();
        let root_name = slots.name(slots.root());
        let (lo, _hi) = slots.split(slots.root());
        let target_name = slots.name(lo);
        let _ = root_name;
        let params = FloorplanParams::default();
        let mut pre = HashMap::new();
        pre.insert("a".to_string(), target_name.clone());
        let result = floorplan(&g, &mut slots, &[], &pre, &params).unwrap();
        assert_eq!(slots.name(result.vertex_to_slot["a"]), target_name);
    }

    #[test]
    fn pre_assignment_to_a_leaf_is_honored() {
        let g = small_graph();
        let mut slots = manager();
        let leaf = {
            let mut id = slots.root();
            while !slots.is_leaf(id) {
                let (lo, _hi) = slots.split(id);
                id = lo;
            }
            id
        };
        let leaf_name = slots.name(leaf);
        let params = FloorplanParams { strategy: Strategy::Exhaustive, ..FloorplanParams::default() };
        let mut pre = HashMap::new();
        pre.insert("a".to_string(), leaf_name.clone());
        let result = floorplan(&g, &mut slots, &[], &pre, &params).unwrap();
        assert_eq!(slots.name(result.vertex_to_slot["a"]), leaf_name);
    }

    #[test]
    fn invalid_pre_assignment_region_is_rejected() {
        let g = small_graph();
        let mut slots = manager();
        let params = FloorplanParams::default();
        let mut pre = HashMap::new();
        pre.insert("a".to_string(), "SLOT_X99Y99_X99Y99".to_string());
        let err = floorplan(&g, &mut slots, &[], &pre, &params).unwrap_err();
        assert!(matches!(err, FloorplanError::InvalidPreAssignment { .. }));
    }

    #[test]
    fn quick_strategy_places_every_vertex() {
        let g = small_graph();
        let mut slots = manager();
        let params = FloorplanParams { strategy: Strategy::Quick, ..FloorplanParams::default() };
        let result = floorplan(&g, &mut slots, &[], &HashMap::new(), &params).unwrap();
        assert_eq!(result.vertex_to_slot.len(), 2);
        assert!(result.leaves.iter().all(|&l| slots.is_leaf(l)));
    }

    #[test]
    fn hbm_rebinding_splits_left_and_right_channel_ranges() {
        let mut g = Graph::new();
        g.add_vertex(Vertex {
            name: "hbm_in".into(),
            category: VertexCategory::Port,
            area: AreaVec::ZERO,
            port_cat: Some(PortCategory::Hbm),
            port_id: None,
            top_arg_name: Some("in_port".into()),
        });
        let mut slots = SlotManager::new(Device::for_part_num("xcu280-fsvh2892-2L-e").unwrap());
        let leaf = {
            let mut id = slots.root();
            while !slots.is_leaf(id) {
                let (lo, _hi) = slots.split(id);
                id = lo;
            }
            id
        };
        let mut vertex_to_slot = IndexMap::new();
        vertex_to_slot.insert("hbm_in".to_string(), leaf);
        let assignment = Assignment { vertex_to_slot, leaves: vec![leaf] };
        let rebinding = rebind_hbm_ports(&g, &slots, &assignment).unwrap();
        assert_eq!(rebinding["in_port"], 0);
    }
}
