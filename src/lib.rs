//! Crate root: public surface, shared aliases, and the pass ordering invariant.
//!
//! This module is the single canonical entry point for downstream users. It
//! re-exports the area-vector/resource alias shared by every other module and
//! declares the four-pass pipeline in the order data actually flows:
//!
//! `device` -> `slot` -> `graph` -> `floorplan` -> `route` -> `latency` -> `pipeline`
//!
//! ## Invariants
//!
//! - **Single-threaded, deterministic.** Every pass is a pure function of its
//!   input. Collections that are iterated for output (vertices, edges,
//!   slots) use an insertion-ordered map (`indexmap::IndexMap`) so that two
//!   runs over identical input produce byte-identical output.
//! - **Forward data flow only.** Nothing in a later pass feeds back into an
//!   earlier one within a single invocation; see `pipeline::run`.
//! - **No global state.** Every pass takes its dependencies (device, graph,
//!   slot manager, solver handle) explicitly.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]

/// Hard-coded device/chip catalogue: slot capacities, SLR layout, HBM ports.
pub mod device;
/// Recursive bisection tree over a device's root slot.
pub mod slot;
/// Vertex/edge dataflow graph data model.
pub mod graph;
/// Abstract binary-ILP solver boundary (one concrete branch-and-bound impl).
pub mod milp;
/// Floorplanner: iterative-bisection MILP partitioner.
pub mod floorplan;
/// Global router: grid-ILP path finder.
pub mod route;
/// Latency balancer: longest-path potential assignment.
pub mod latency;
/// Input/output configuration document (the serde boundary).
pub mod config;
/// Orchestrates the four passes end to end.
pub mod pipeline;

/// Resource dimensions tracked for every slot and every vertex's area vector.
pub const RESOURCE_COUNT: usize = 5;

/// One of the five resource dimensions a slot or vertex is measured in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Resource {
    Lut,
    Ff,
    Bram,
    Dsp,
    Uram,
}

impl Resource {
    /// All resource dimensions, in the fixed order used for array indexing.
    pub const ALL: [Resource; RESOURCE_COUNT] =
        [Resource::Lut, Resource::Ff, Resource::Bram, Resource::Dsp, Resource::Uram];

    fn index(self) -> usize {
        match self {
            Resource::Lut => 0,
            Resource::Ff => 1,
            Resource::Bram => 2,
            Resource::Dsp => 3,
            Resource::Uram => 4,
        }
    }
}

impl std::fmt::Display for Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Resource::Lut => "LUT",
            Resource::Ff => "FF",
            Resource::Bram => "BRAM",
            Resource::Dsp => "DSP",
            Resource::Uram => "URAM",
        };
        f.write_str(s)
    }
}

/// A non-negative resource-usage vector over the five tracked dimensions.
///
/// Used both for a vertex's declared area and for a slot's capacity; the two
/// share a representation because the floorplanner directly compares them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub struct AreaVec(pub [i64; RESOURCE_COUNT]);

impl AreaVec {
    /// The zero vector.
    pub const ZERO: AreaVec = AreaVec([0; RESOURCE_COUNT]);

    /// Build from an explicit per-resource mapping; missing entries are zero.
    pub fn from_map(map: &std::collections::HashMap<String, i64>) -> Self {
        let mut out = [0i64; RESOURCE_COUNT];
        for r in Resource::ALL {
            if let Some(v) = map.get(&r.to_string()) {
                out[r.index()] = *v;
            }
        }
        AreaVec(out)
    }

    /// Value of a single resource dimension.
    pub fn get(&self, r: Resource) -> i64 {
        self.0[r.index()]
    }

    /// True iff no dimension is negative (the data-model invariant on areas).
    pub fn is_non_negative(&self) -> bool {
        self.0.iter().all(|&v| v >= 0)
    }

    /// Elementwise sum.
    pub fn add(&self, other: &AreaVec) -> AreaVec {
        let mut out = [0i64; RESOURCE_COUNT];
        for i in 0..RESOURCE_COUNT {
            out[i] = self.0[i] + other.0[i];
        }
        AreaVec(out)
    }

    /// True iff every dimension of `self` is <= the corresponding dimension of
    /// `capacity` scaled by `ratio`.
    pub fn fits_within(&self, capacity: &AreaVec, ratio: f64) -> bool {
        self.0
            .iter()
            .zip(capacity.0.iter())
            .all(|(&used, &cap)| (used as f64) <= ratio * (cap as f64))
    }

    /// Utilization ratio per dimension (used / capacity), 0.0 if capacity is 0.
    pub fn utilization(&self, capacity: &AreaVec) -> [f64; RESOURCE_COUNT] {
        let mut out = [0.0; RESOURCE_COUNT];
        for i in 0..RESOURCE_COUNT {
            out[i] = if capacity.0[i] > 0 { self.0[i] as f64 / capacity.0[i] as f64 } else { 0.0 };
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn area_vec_elementwise_add() {
        let a = AreaVec([1, 2, 3, 4, 5]);
        let b = AreaVec([10, 20, 30, 40, 50]);
        assert_eq!(a.add(&b), AreaVec([11, 22, 33, 44, 55]));
    }

    #[test]
    fn fits_within_respects_ratio() {
        let used = AreaVec([80, 0, 0, 0, 0]);
        let cap = AreaVec([100, 100, 100, 100, 100]);
        assert!(used.fits_within(&cap, 0.85));
        assert!(!used.fits_within(&cap, 0.5));
    }
}
