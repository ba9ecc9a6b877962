//! Dataflow graph: vertices (task instances, port stubs, async-mmap engines,
//! control logic) and edges (stream/AXI/async-mmap/buffer channels).
//!
//! Modeled as an arena addressed by name rather than by owning references in
//! both directions (design note in `spec.md` section 9): a `Graph` owns
//! `IndexMap<String, Vertex>` and `IndexMap<String, Edge>`, and adjacency is
//! derived on demand from the edge list, never cached as back-pointers on
//! vertices.

use indexmap::IndexMap;

use crate::AreaVec;

/// Sentinel bit-width used for async-mmap edges so the floorplanner's
/// crossing-cost terms glue their endpoints together (spec.md section 3).
pub const ASYNC_MMAP_SENTINEL_WIDTH: u32 = 1 << 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VertexCategory {
    Task,
    Port,
    AsyncMmap,
    Ctrl,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortCategory {
    Ddr,
    Hbm,
    Plram,
}

#[derive(Debug, Clone)]
pub struct Vertex {
    pub name: String,
    pub category: VertexCategory,
    pub area: AreaVec,
    pub port_cat: Option<PortCategory>,
    pub port_id: Option<u32>,
    pub top_arg_name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeCategory {
    Fifo,
    Axi,
    AsyncMmap,
    Buffer,
}

impl EdgeCategory {
    /// FIFO and BUFFER edges are "stream edges" subject to latency balancing;
    /// AXI and ASYNC_MMAP are not (spec.md section 4.4).
    pub fn is_stream(self) -> bool {
        matches!(self, EdgeCategory::Fifo | EdgeCategory::Buffer)
    }
}

#[derive(Debug, Clone)]
pub struct Edge {
    pub name: String,
    pub producer: String,
    pub consumer: String,
    pub width: u32,
    pub nominal_depth: u32,
    pub category: EdgeCategory,
}

/// Errors raised while validating a `Graph` against the invariants in
/// `spec.md` section 3.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("edge {edge} references unknown vertex {vertex}")]
    DanglingEndpoint { edge: String, vertex: String },
    #[error("edge {edge} is a self-loop on {vertex}")]
    SelfLoop { edge: String, vertex: String },
    #[error("AXI edge {edge} does not connect a port vertex to a task vertex")]
    MalformedAxiEdge { edge: String },
    #[error("dataflow graph contains a cycle involving vertex {0}")]
    Cycle(String),
}

/// The dataflow graph: vertices and edges, constructed once per invocation.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    pub vertices: IndexMap<String, Vertex>,
    pub edges: IndexMap<String, Edge>,
}

impl Graph {
    pub fn new() -> Self {
        Graph::default()
    }

    pub fn add_vertex(&mut self, v: Vertex) {
        self.vertices.insert(v.name.clone(), v);
    }

    pub fn add_edge(&mut self, e: Edge) {
        self.edges.insert(e.name.clone(), e);
    }

    /// Effective width used by the floorplanner/router: async-mmap edges use
    /// the sentinel width regardless of the declared width field.
    pub fn effective_width(&self, e: &Edge) -> u32 {
        match e.category {
            EdgeCategory::AsyncMmap => ASYNC_MMAP_SENTINEL_WIDTH,
            _ => e.width,
        }
    }

    /// Validate dangling endpoints, self-loops, and AXI edge shape.
    ///
    /// "At most one producer per named port" (spec.md section 3) holds by
    /// construction: edges are keyed by name in an `IndexMap`, so a given
    /// port (edge name) can never be declared twice.
    ///
    /// Does not check acyclicity; that is the latency balancer's job
    /// (`Graph::topo_order`), since only stream-relevant edges participate in
    /// that check at the point it matters.
    pub fn validate(&self) -> Result<(), GraphError> {
        for e in self.edges.values() {
            if !self.vertices.contains_key(&e.producer) {
                return Err(GraphError::DanglingEndpoint { edge: e.name.clone(), vertex: e.producer.clone() });
            }
            if !self.vertices.contains_key(&e.consumer) {
                return Err(GraphError::DanglingEndpoint { edge: e.name.clone(), vertex: e.consumer.clone() });
            }
            if e.producer == e.consumer {
                return Err(GraphError::SelfLoop { edge: e.name.clone(), vertex: e.producer.clone() });
            }
            if e.category == EdgeCategory::Axi {
                let producer_is_port =
                    self.vertices[&e.producer].category == VertexCategory::Port;
                let consumer_is_task =
                    self.vertices[&e.consumer].category == VertexCategory::Task;
                if !(producer_is_port && consumer_is_task) {
                    return Err(GraphError::MalformedAxiEdge { edge: e.name.clone() });
                }
            }
        }
        Ok(())
    }

    /// Outgoing edges from `vertex`, in insertion order.
    pub fn out_edges(&self, vertex: &str) -> Vec<&Edge> {
        self.edges.values().filter(|e| e.producer == vertex).collect()
    }

    /// Incoming edges to `vertex`, in insertion order.
    pub fn in_edges(&self, vertex: &str) -> Vec<&Edge> {
        self.edges.values().filter(|e| e.consumer == vertex).collect()
    }

    /// Kahn's-algorithm topological order over all vertices and all edges.
    /// Returns `Err` naming a vertex still unresolved (i.e. part of a cycle)
    /// if the graph is not a DAG.
    pub fn topo_order(&self) -> Result<Vec<String>, GraphError> {
        let mut indegree: IndexMap<&str, usize> = self.vertices.keys().map(|v| (v.as_str(), 0usize)).collect();
        for e in self.edges.values() {
            *indegree.get_mut(e.consumer.as_str()).expect("validated") += 1;
        }

        let mut ready: Vec<&str> =
            indegree.iter().filter(|(_, &d)| d == 0).map(|(&v, _)| v).collect();
        ready.sort();
        let mut queue: std::collections::VecDeque<&str> = ready.into_iter().collect();

        let mut order = Vec::with_capacity(self.vertices.len());
        while let Some(v) = queue.pop_front() {
            order.push(v.to_string());
            let mut newly_ready: Vec<&str> = Vec::new();
            for e in self.out_edges(v) {
                let d = indegree.get_mut(e.consumer.as_str()).expect("validated");
                *d -= 1;
                if *d == 0 {
                    newly_ready.push(e.consumer.as_str());
                }
            }
            newly_ready.sort();
            queue.extend(newly_ready);
        }

        if order.len() != self.vertices.len() {
            let stuck = self
                .vertices
                .keys()
                .find(|v| !order.contains(v))
                .cloned()
                .unwrap_or_default();
            return Err(GraphError::Cycle(stuck));
        }
        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

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

    fn fifo(name: &str, producer: &str, consumer: &str) -> Edge {
        Edge {
            name: name.to_string(),
            producer: producer.to_string(),
            consumer: consumer.to_string(),
            width: 32,
            nominal_depth: 2,
            category: EdgeCategory::Fifo,
        }
    }

    #[test]
    fn dangling_endpoint_is_rejected() {
        let mut g = Graph::new();
        g.add_vertex(task("a"));
        g.add_edge(fifo("e1", "a", "b"));
        assert!(matches!(g.validate(), Err(GraphError::DanglingEndpoint { .. })));
    }

    #[test]
    fn self_loop_is_rejected() {
        let mut g = Graph::new();
        g.add_vertex(task("a"));
        g.add_edge(fifo("e1", "a", "a"));
        assert!(matches!(g.validate(), Err(GraphError::SelfLoop { .. })));
    }

    #[test]
    fn topo_order_detects_cycle() {
        let mut g = Graph::new();
        g.add_vertex(task("a"));
        g.add_vertex(task("b"));
        g.add_edge(fifo("e1", "a", "b"));
        g.add_edge(fifo("e2", "b", "a"));
        assert!(matches!(g.topo_order(), Err(GraphError::Cycle(_))));
    }

    #[test]
    fn topo_order_is_deterministic_for_dag() {
        let mut g = Graph::new();
        g.add_vertex(task("a"));
        g.add_vertex(task("b"));
        g.add_vertex(task("c"));
        g.add_edge(fifo("e1", "a", "b"));
        g.add_edge(fifo("e2", "a", "c"));
        let order = g.topo_order().unwrap();
        assert_eq!(order[0], "a");
    }

    #[test]
    fn async_mmap_uses_sentinel_width() {
        let mut e = fifo("e1", "a", "b");
        e.category = EdgeCategory::AsyncMmap;
        e.width = 4;
        let g = Graph::new();
        assert_eq!(g.effective_width(&e), ASYNC_MMAP_SENTINEL_WIDTH);
    }
}
