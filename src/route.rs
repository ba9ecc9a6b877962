//! Global router: finds a grid path for every dataflow edge across the
//! floorplanner's final leaf slots.
//!
//! Grounded on the same `milp::Model` boundary as `floorplan.rs`, but the
//! variables here are per-edge, per-grid-hop binary flow indicators rather
//! than per-vertex slot indicators: one combined model covers every edge at
//! once, with a flow-conservation constraint per (edge, slot) and a
//! wire-capacity constraint per slot, matching spec.md section 4.3.

use std::time::Duration;

use indexmap::IndexMap;

use crate::device::Rect;
use crate::floorplan::Assignment;
use crate::graph::{EdgeCategory, Graph};
use crate::milp::{Model, Sense, SolveStatus};
use crate::slot::{SlotId, SlotManager};

/// A single routed edge: the ordered chain of slots from producer to
/// consumer, and its hop count (`path.len() - 1`).
#[derive(Debug, Clone)]
pub struct RoutedPath {
    pub path: Vec<SlotId>,
    pub hops: u32,
}

/// All routed edges, keyed by edge name.
#[derive(Debug, Clone, Default)]
pub struct Routing {
    pub edges: IndexMap<String, RoutedPath>,
}

#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    #[error("no feasible routing found; overloaded slots: {}", overloaded_slots.join(", "))]
    UnroutableDesign { overloaded_slots: Vec<String> },
}

/// Route every non-trivial edge over the grid-adjacency graph of `leaves`.
///
/// Edges whose producer and consumer already share a slot (including every
/// async-mmap edge, which the floorplanner always co-locates) get a trivial
/// zero-hop path and never enter the ILP.
pub fn route(
    graph: &Graph,
    slots: &SlotManager,
    assignment: &Assignment,
    time_limit: Duration,
) -> Result<Routing, RouteError> {
    let adjacency = build_adjacency(slots, &assignment.leaves);

    let mut routing = Routing::default();
    let mut to_solve = Vec::new();

    for e in graph.edges.values() {
        let producer_slot = *assignment
            .vertex_to_slot
            .get(&e.producer)
            .expect("every vertex is assigned by the floorplanner");
        let consumer_slot = *assignment
            .vertex_to_slot
            .get(&e.consumer)
            .expect("every vertex is assigned by the floorplanner");

        if producer_slot == consumer_slot {
            routing.edges.insert(e.name.clone(), RoutedPath { path: vec![producer_slot], hops: 0 });
            continue;
        }
        to_solve.push((e.name.clone(), producer_slot, consumer_slot, graph.effective_width(e)));
    }

    if to_solve.is_empty() {
        return Ok(routing);
    }

    let mut model = Model::new();
    // y[(edge_idx, arc_idx)] = one binary var per (edge, directed adjacency arc).
    let mut y: IndexMap<(usize, usize), crate::milp::VarId> = IndexMap::new();
    for (ei, (name, _, _, _)) in to_solve.iter().enumerate() {
        for (ai, &(a, b)) in adjacency.iter().enumerate() {
            let var = model.new_binary_var(format!("y[{name},{}->{}]", slots.name(a), slots.name(b)));
            y.insert((ei, ai), var);
        }
    }

    // Flow conservation per (edge, slot).
    for (ei, (name, producer_slot, consumer_slot, _)) in to_solve.iter().enumerate() {
        for &s in &assignment.leaves {
            let balance = if s == *producer_slot {
                1.0
            } else if s == *consumer_slot {
                -1.0
            } else {
                0.0
            };
            let mut terms = Vec::new();
            for (ai, &(a, b)) in adjacency.iter().enumerate() {
                if a == s {
                    terms.push((y[&(ei, ai)], 1.0));
                }
                if b == s {
                    terms.push((y[&(ei, ai)], -1.0));
                }
            }
            if terms.is_empty() {
                continue;
            }
            model.add_constraint(&terms, Sense::Eq, balance, format!("flow[{name},{}]", slots.name(s)));
        }

        // Simple path: at most one outgoing hop per slot for this edge.
        for &s in &assignment.leaves {
            let terms: Vec<_> = adjacency
                .iter()
                .enumerate()
                .filter(|(_, &(a, _))| a == s)
                .map(|(ai, _)| (y[&(ei, ai)], 1.0))
                .collect();
            if !terms.is_empty() {
                model.add_constraint(&terms, Sense::Le, 1.0, format!("out-degree[{name},{}]", slots.name(s)));
            }
        }
    }

    // Wire capacity per slot: total width of every hop originating there,
    // across all edges, bounded by the slot's wire budget.
    for &s in &assignment.leaves {
        let mut terms = Vec::new();
        for (ei, (_, _, _, width)) in to_solve.iter().enumerate() {
            for (ai, &(a, _b)) in adjacency.iter().enumerate() {
                if a == s {
                    terms.push((y[&(ei, ai)], *width as f64));
                }
            }
        }
        if !terms.is_empty() {
            model.add_constraint(&terms, Sense::Le, slots.wire_capacity(s) as f64, format!("wire[{}]", slots.name(s)));
        }
    }

    // Objective: minimize total hop count, unweighted by width (spec.md 4.3).
    let objective: Vec<_> = y.values().map(|&v| (v, 1.0)).collect();
    model.set_objective(&objective, true);

    match model.solve(time_limit) {
        SolveStatus::Optimal => {
            for (ei, (name, producer_slot, consumer_slot, _)) in to_solve.iter().enumerate() {
                let path = reconstruct_path(slots, &model, &y, &adjacency, ei, *producer_slot, *consumer_slot);
                let hops = (path.len() - 1) as u32;
                routing.edges.insert(name.clone(), RoutedPath { path, hops });
            }
            Ok(routing)
        }
        SolveStatus::Infeasible | SolveStatus::Timeout => {
            let overloaded = model
                .tightest_constraint_label()
                .filter(|l| l.starts_with("wire["))
                .map(|l| vec![l.to_string()])
                .unwrap_or_else(|| vec!["unknown".to_string()]);
            Err(RouteError::UnroutableDesign { overloaded_slots: overloaded })
        }
    }
}

fn reconstruct_path(
    slots: &SlotManager,
    model: &Model,
    y: &IndexMap<(usize, usize), crate::milp::VarId>,
    adjacency: &[(SlotId, SlotId)],
    ei: usize,
    producer_slot: SlotId,
    consumer_slot: SlotId,
) -> Vec<SlotId> {
    let _ = slots;
    let mut path = vec![producer_slot];
    let mut current = producer_slot;
    while current != consumer_slot {
        let next = adjacency
            .iter()
            .enumerate()
            .find(|(ai, &(a, _))| a == current && model.value(y[&(ei, *ai)]) > 0.5)
            .map(|(_, &(_, b))| b)
            .expect("flow conservation guarantees a path to the consumer slot");
        path.push(next);
        current = next;
    }
    path
}

/// Every directed grid-adjacency arc between distinct leaves in `leaves`.
fn build_adjacency(slots: &SlotManager, leaves: &[SlotId]) -> Vec<(SlotId, SlotId)> {
    let mut out = Vec::new();
    for &a in leaves {
        let rect_a: Rect = slots.rect(a);
        for &b in leaves {
            if a == b {
                continue;
            }
            if rect_a.is_grid_adjacent(&slots.rect(b)) {
                out.push((a, b));
            }
        }
    }
    out
}
