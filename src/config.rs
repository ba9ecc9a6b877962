//! Input/output configuration document: the serde boundary between the core
//! and the surrounding compiler (spec.md section 6).
//!
//! Grounded on the teacher's `api.rs` ergonomic-wrapper pattern (a typed
//! struct layered over the wire format) and on `original_source/autobridge/main.py`'s
//! `get_annotated_config`, which builds its output by `copy.deepcopy`-ing the
//! input document and mutating fields in. We re-express that as: parse the
//! raw JSON object once, keep it untouched as the baseline, and build
//! `OutputConfig` by inserting keys into a clone of that baseline rather than
//! reconstructing the whole document field-by-field.

use std::collections::HashMap;
use std::time::Duration;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::floorplan::{FloorplanParams, OptPriority, Strategy};
use crate::graph::{Edge, EdgeCategory, Graph, PortCategory, Vertex, VertexCategory};
use crate::AreaVec;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("malformed input configuration: {0}")]
    InvalidConfig(String),
    #[error("pre-assignment region {region} names vertex {vertex}, which does not exist")]
    DanglingPreAssignment { region: String, vertex: String },
    #[error("vertex {vertex} is pre-assigned to more than one region ({first}, {second})")]
    ConflictingPreAssignment { vertex: String, first: String, second: String },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct InputVertex {
    category: String,
    #[serde(default)]
    module: String,
    #[serde(default)]
    area: HashMap<String, i64>,
    #[serde(default)]
    port_cat: Option<String>,
    #[serde(default)]
    port_id: Option<u32>,
    #[serde(default)]
    top_arg_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct InputEdge {
    produced_by: String,
    consumed_by: String,
    width: u32,
    #[serde(default)]
    depth: u32,
    category: String,
}

/// The strongly typed view of the input document, validated against the
/// shape in spec.md section 6. Unknown top-level or per-record fields are a
/// parse-time `ConfigError`, matching the "single configuration record ...
/// unknown fields are errors" design note.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InputConfig {
    pub part_num: String,
    vertices: IndexMap<String, InputVertex>,
    edges: IndexMap<String, InputEdge>,
    #[serde(default)]
    grouping_constraints: Vec<Vec<String>>,
    #[serde(default)]
    floorplan_pre_assignments: IndexMap<String, Vec<String>>,
    #[serde(default = "default_strategy")]
    floorplan_strategy: String,
    #[serde(default = "default_opt_priority")]
    floorplan_opt_priority: String,
    #[serde(default = "default_min_area_limit")]
    min_area_limit: f64,
    #[serde(default = "default_max_area_limit")]
    max_area_limit: f64,
    #[serde(default = "default_min_slr_width_limit")]
    min_slr_width_limit: f64,
    #[serde(default = "default_max_slr_width_limit")]
    max_slr_width_limit: f64,
    #[serde(default = "default_max_search_time")]
    max_search_time: f64,
    #[serde(default)]
    pub enable_hbm_binding_adjustment: bool,
}

fn default_strategy() -> String {
    "exhaustive".to_string()
}
fn default_opt_priority() -> String {
    "slr-crossing".to_string()
}
fn default_min_area_limit() -> f64 {
    0.55
}
fn default_max_area_limit() -> f64 {
    0.85
}
fn default_min_slr_width_limit() -> f64 {
    0.6
}
fn default_max_slr_width_limit() -> f64 {
    0.8
}
fn default_max_search_time() -> f64 {
    5.0
}

/// Parse the input document, returning both the raw JSON object (the
/// baseline `OutputConfig` is deep-cloned from) and the strongly typed view.
pub fn parse_input(text: &str) -> Result<(Map<String, Value>, InputConfig), ConfigError> {
    let raw: Value = serde_json::from_str(text).map_err(|e| ConfigError::InvalidConfig(e.to_string()))?;
    let object = raw.as_object().ok_or_else(|| ConfigError::InvalidConfig("top-level document must be an object".into()))?.clone();
    let typed: InputConfig = serde_json::from_value(Value::Object(object.clone()))
        .map_err(|e| ConfigError::InvalidConfig(e.to_string()))?;
    Ok((object, typed))
}

/// Everything the pipeline needs to run the floorplan/route/latency passes,
/// extracted from a validated `InputConfig`.
pub struct ResolvedInput {
    pub graph: Graph,
    pub grouping: Vec<Vec<String>>,
    pub pre_assignment: HashMap<String, String>,
    pub params: FloorplanParams,
    pub enable_hbm_binding_adjustment: bool,
}

impl InputConfig {
    /// Build the dataflow graph and floorplan tuning parameters this
    /// document describes, validating every category string and every
    /// pre-assignment reference along the way.
    pub fn resolve(&self) -> Result<ResolvedInput, ConfigError> {
        let mut graph = Graph::new();
        for (name, v) in &self.vertices {
            graph.add_vertex(Vertex {
                name: name.clone(),
                category: vertex_category(&v.category)?,
                area: AreaVec::from_map(&v.area),
                port_cat: v.port_cat.as_deref().map(port_category).transpose()?,
                port_id: v.port_id,
                top_arg_name: v.top_arg_name.clone(),
            });
        }
        for (name, e) in &self.edges {
            graph.add_edge(Edge {
                name: name.clone(),
                producer: e.produced_by.clone(),
                consumer: e.consumed_by.clone(),
                width: e.width,
                nominal_depth: e.depth,
                category: edge_category(&e.category)?,
            });
        }

        let mut pre_assignment: HashMap<String, String> = HashMap::new();
        for (region, names) in &self.floorplan_pre_assignments {
            for vertex in names {
                if !graph.vertices.contains_key(vertex) {
                    return Err(ConfigError::DanglingPreAssignment { region: region.clone(), vertex: vertex.clone() });
                }
                if let Some(existing) = pre_assignment.insert(vertex.clone(), region.clone()) {
                    return Err(ConfigError::ConflictingPreAssignment {
                        vertex: vertex.clone(),
                        first: existing,
                        second: region.clone(),
                    });
                }
            }
        }

        let params = FloorplanParams {
            strategy: strategy(&self.floorplan_strategy)?,
            opt_priority: opt_priority(&self.floorplan_opt_priority)?,
            min_area_limit: self.min_area_limit,
            max_area_limit: self.max_area_limit,
            min_slr_width_limit: self.min_slr_width_limit,
            max_slr_width_limit: self.max_slr_width_limit,
            max_search_time: Duration::from_secs_f64(self.max_search_time.max(0.0)),
        };

        Ok(ResolvedInput {
            graph,
            grouping: self.grouping_constraints.clone(),
            pre_assignment,
            params,
            enable_hbm_binding_adjustment: self.enable_hbm_binding_adjustment,
        })
    }
}

fn vertex_category(s: &str) -> Result<VertexCategory, ConfigError> {
    match s {
        "task" => Ok(VertexCategory::Task),
        "port" => Ok(VertexCategory::Port),
        "async_mmap" => Ok(VertexCategory::AsyncMmap),
        "ctrl" => Ok(VertexCategory::Ctrl),
        other => Err(ConfigError::InvalidConfig(format!("unknown vertex category {other:?}"))),
    }
}

fn edge_category(s: &str) -> Result<EdgeCategory, ConfigError> {
    match s {
        "fifo" => Ok(EdgeCategory::Fifo),
        "axi" => Ok(EdgeCategory::Axi),
        "async_mmap" => Ok(EdgeCategory::AsyncMmap),
        "buffer" => Ok(EdgeCategory::Buffer),
        other => Err(ConfigError::InvalidConfig(format!("unknown edge category {other:?}"))),
    }
}

fn port_category(s: &str) -> Result<PortCategory, ConfigError> {
    match s {
        "DDR" => Ok(PortCategory::Ddr),
        "HBM" => Ok(PortCategory::Hbm),
        "PLRAM" => Ok(PortCategory::Plram),
        other => Err(ConfigError::InvalidConfig(format!("unknown port category {other:?}"))),
    }
}

fn strategy(s: &str) -> Result<Strategy, ConfigError> {
    match s {
        "quick" => Ok(Strategy::Quick),
        "exhaustive" => Ok(Strategy::Exhaustive),
        "slr-level-only" => Ok(Strategy::SlrLevelOnly),
        other => Err(ConfigError::InvalidConfig(format!("unknown floorplan_strategy {other:?}"))),
    }
}

fn opt_priority(s: &str) -> Result<OptPriority, ConfigError> {
    match s {
        "area" => Ok(OptPriority::Area),
        "slr-crossing" => Ok(OptPriority::SlrCrossing),
        other => Err(ConfigError::InvalidConfig(format!("unknown floorplan_opt_priority {other:?}"))),
    }
}

/// The output document: a deep clone of the input object, augmented with the
/// fields spec.md section 6 adds. Serializes back out to exactly "the same
/// document, augmented".
#[derive(Debug, Clone, Serialize)]
pub struct OutputConfig(pub Map<String, Value>);

impl OutputConfig {
    /// Start from a deep clone of the raw input document.
    pub fn from_input(raw: &Map<String, Value>) -> Self {
        OutputConfig(raw.clone())
    }

    pub fn set_floorplan_status(&mut self, status: &str) {
        self.0.insert("floorplan_status".to_string(), Value::String(status.to_string()));
    }

    pub fn set_vertex_region(&mut self, vertex: &str, region: &str, slr: Option<u32>) {
        let vertices = self.0.entry("vertices").or_insert_with(|| Value::Object(Map::new()));
        if let Some(record) = vertices.get_mut(vertex).and_then(Value::as_object_mut) {
            record.insert("floorplan_region".to_string(), Value::String(region.to_string()));
            record.insert("SLR".to_string(), slr.map(Value::from).unwrap_or(Value::Null));
        }
    }

    pub fn set_edge_result(&mut self, edge: &str, path: &[String], adjusted_depth: u32) {
        let edges = self.0.entry("edges").or_insert_with(|| Value::Object(Map::new()));
        if let Some(record) = edges.get_mut(edge).and_then(Value::as_object_mut) {
            record.insert("path".to_string(), Value::Array(path.iter().cloned().map(Value::String).collect()));
            record.insert("adjusted_depth".to_string(), Value::from(adjusted_depth));
        }
    }

    pub fn set_pblock_tcl(&mut self, table: &IndexMap<String, String>) {
        let map: Map<String, Value> = table.iter().map(|(k, v)| (k.clone(), Value::String(v.clone()))).collect();
        self.0.insert("floorplan_region_pblock_tcl".to_string(), Value::Object(map));
    }

    pub fn set_slot_resource_usage(&mut self, table: &IndexMap<String, [f64; crate::RESOURCE_COUNT]>) {
        let map: Map<String, Value> = table
            .iter()
            .map(|(k, v)| {
                let per_resource: Map<String, Value> = crate::Resource::ALL
                    .iter()
                    .zip(v.iter())
                    .map(|(r, u)| (r.to_string(), Value::from(*u)))
                    .collect();
                (k.clone(), Value::Object(per_resource))
            })
            .collect();
        self.0.insert("slot_resource_usage".to_string(), Value::Object(map));
    }

    pub fn set_actual_area_usage(&mut self, value: f64) {
        self.0.insert("actual_area_usage".to_string(), Value::from(value));
    }

    pub fn set_actual_slr_width_usage(&mut self, value: f64) {
        self.0.insert("actual_slr_width_usage".to_string(), Value::from(value));
    }

    pub fn set_hbm_binding(&mut self, table: &IndexMap<String, u32>) {
        let map: Map<String, Value> = table.iter().map(|(k, v)| (k.clone(), Value::from(*v))).collect();
        self.0.insert("new_hbm_binding".to_string(), Value::Object(map));
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}
