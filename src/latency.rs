//! Latency balancer: assigns every vertex a launch time ("potential") so
//! that every stream edge's resulting pipeline depth is at least its routed
//! hop count and at least its nominal depth, and every reconvergent path
//! into a vertex arrives balanced (spec.md section 4.4).
//!
//! The general ILP formulation in spec.md section 4.4 reduces exactly to a
//! longest-path computation over the dataflow DAG: `t_v` is the latest time
//! any predecessor's contribution can arrive, so `t_v = max(0, max over
//! incoming edges e=(u,v) of t_u + low(e))`. Minimizing every `t_v` subject
//! to those lower bounds has a unique optimum (the one produced by taking
//! the max at each step), so there is no search here, only one topological
//! pass — grounded on the teacher's `opening.rs` single-pass potential
//! computation over its evaluation DAG.

use indexmap::IndexMap;

use crate::graph::{EdgeCategory, Graph};
use crate::route::Routing;

#[derive(Debug, thiserror::Error)]
pub enum LatencyError {
    #[error("dataflow graph contains a cycle involving vertex {0}")]
    CyclicDataflow(String),
}

/// Per-vertex launch time and per-(stream-)edge pipeline depth.
#[derive(Debug, Clone, Default)]
pub struct Balance {
    pub potentials: IndexMap<String, u32>,
    /// Only covers FIFO/BUFFER edges; AXI/async-mmap edges have no slack and
    /// are not latency-balanced (spec.md section 4.4).
    pub depths: IndexMap<String, u32>,
}

/// Compute launch times and stream-edge depths from a routed graph.
pub fn balance(graph: &Graph, routing: &Routing) -> Result<Balance, LatencyError> {
    let order = graph.topo_order().map_err(|e| match e {
        crate::graph::GraphError::Cycle(v) => LatencyError::CyclicDataflow(v),
        other => LatencyError::CyclicDataflow(other.to_string()),
    })?;

    let mut potentials: IndexMap<String, u32> = IndexMap::new();
    for v in &order {
        let mut t_v = 0u32;
        for e in graph.in_edges(v) {
            let hops = routing.edges.get(&e.name).map(|p| p.hops).unwrap_or(0);
            let low_e = lower_bound(e, hops);
            let t_u = *potentials.get(&e.producer).expect("topological order visits producers first");
            t_v = t_v.max(t_u + low_e);
        }
        potentials.insert(v.clone(), t_v);
    }

    let mut depths = IndexMap::new();
    for e in graph.edges.values() {
        if !e.category.is_stream() {
            continue;
        }
        let t_u = potentials[&e.producer];
        let t_v = potentials[&e.consumer];
        depths.insert(e.name.clone(), t_v - t_u);
    }

    Ok(Balance { potentials, depths })
}

/// Minimum slack an edge must provide: stream edges need at least their
/// declared nominal depth and at least enough stages to cover their routed
/// hop count (`hops + 1` pipeline stages); AXI and async-mmap edges carry no
/// slack at all, so their slot is exactly their hop count.
fn lower_bound(e: &crate::graph::Edge, hops: u32) -> u32 {
    match e.category {
        EdgeCategory::Fifo | EdgeCategory::Buffer => e.nominal_depth.max(hops + 1),
        EdgeCategory::Axi | EdgeCategory::AsyncMmap => hops,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Edge, Vertex, VertexCategory};
    use crate::route::RoutedPath;
    use crate::slot::SlotId;
    use crate::AreaVec;

    fn task(name: &str) -> Vertex {
        Vertex {
            name: name.to_string(),
            category: VertexCategory::Task,
            area: AreaVec::ZERO,
            port_cat: None,
            port_id: None,
            top_arg_name: None,
        }
    }

    fn fifo(name: &str, producer: &str, consumer: &str, nominal_depth: u32) -> Edge {
        Edge {
            name: name.to_string(),
            producer: producer.to_string(),
            consumer: consumer.to_string(),
            width: 32,
            nominal_depth,
            category: EdgeCategory::Fifo,
        }
    }

    fn trivial_routing(names: &[&str]) -> Routing {
        let mut routing = Routing::default();
        for n in names {
            routing.edges.insert(n.to_string(), RoutedPath { path: vec![SlotId(0)], hops: 0 });
        }
        routing
    }

    #[test]
    fn linear_chain_accumulates_depth() {
        let mut g = Graph::new();
        g.add_vertex(task("a"));
        g.add_vertex(task("b"));
        g.add_vertex(task("c"));
        g.add_edge(fifo("e1", "a", "b", 2));
        g.add_edge(fifo("e2", "b", "c", 3));
        let routing = trivial_routing(&["e1", "e2"]);
        let bal = balance(&g, &routing).unwrap();
        assert_eq!(bal.potentials["a"], 0);
        assert_eq!(bal.potentials["b"], 2);
        assert_eq!(bal.potentials["c"], 5);
    }

    #[test]
    fn reconvergent_paths_balance_to_the_slower_branch() {
        let mut g = Graph::new();
        g.add_vertex(task("a"));
        g.add_vertex(task("b"));
        g.add_vertex(task("c"));
        g.add_vertex(task("d"));
        g.add_edge(fifo("e1", "a", "b", 1));
        g.add_edge(fifo("e2", "a", "c", 5));
        g.add_edge(fifo("e3", "b", "d", 1));
        g.add_edge(fifo("e4", "c", "d", 1));
        let routing = trivial_routing(&["e1", "e2", "e3", "e4"]);
        let bal = balance(&g, &routing).unwrap();
        assert_eq!(bal.potentials["d"], 6);
        assert_eq!(bal.depths["e3"], 6);
        assert_eq!(bal.depths["e4"], 1);
    }

    #[test]
    fn routed_hop_count_forces_minimum_depth() {
        let mut g = Graph::new();
        g.add_vertex(task("a"));
        g.add_vertex(task("b"));
        g.add_edge(fifo("e1", "a", "b", 1));
        let mut routing = Routing::default();
        routing.edges.insert("e1".to_string(), RoutedPath { path: vec![SlotId(0), SlotId(1), SlotId(2), SlotId(3)], hops: 3 });
        let bal = balance(&g, &routing).unwrap();
        assert_eq!(bal.depths["e1"], 4);
    }

    #[test]
    fn cycle_is_rejected() {
        let mut g = Graph::new();
        g.add_vertex(task("a"));
        g.add_vertex(task("b"));
        g.add_edge(fifo("e1", "a", "b", 1));
        g.add_edge(fifo("e2", "b", "a", 1));
        let routing = trivial_routing(&["e1", "e2"]);
        assert!(matches!(balance(&g, &routing), Err(LatencyError::CyclicDataflow(_))));
    }
}
