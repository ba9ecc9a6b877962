//! Slot Manager: owns the root slot and caches the recursive bisection tree.
//!
//! Grounded on the teacher's `stream.rs` index-newtype-and-deterministic-
//! iteration pattern (`BlockIdx`/`RegIdx`/`RowIdx` plus `blocks()`): here the
//! newtype is `SlotId`, and `leaves_at` plays the role `blocks()` played
//! there — a deterministic, row-major enumeration of the tree's fringe at a
//! given depth.

use indexmap::IndexMap;

use crate::device::{Device, Rect};
use crate::AreaVec;

/// Index into the slot manager's node arena. Stable for the lifetime of one
/// `SlotManager`; never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotId(pub u32);

#[derive(Debug, Clone)]
struct Node {
    rect: Rect,
    parent: Option<SlotId>,
    children: Option<(SlotId, SlotId)>,
}

/// Owns the recursive bisection tree over a device's root rectangle.
///
/// Invariant: the union of leaves at any uniform recursion depth equals the
/// root slot, disjointly (checked by `debug_assert` in `split`).
#[derive(Debug, Clone)]
pub struct SlotManager {
    device: Device,
    nodes: Vec<Node>,
    root: SlotId,
    rect_to_id: IndexMap<Rect, SlotId>,
}

impl SlotManager {
    pub fn new(device: Device) -> Self {
        let root_rect = device.root;
        let root_id = SlotId(0);
        let mut rect_to_id = IndexMap::new();
        rect_to_id.insert(root_rect, root_id);
        SlotManager {
            device,
            nodes: vec![Node { rect: root_rect, parent: None, children: None }],
            root: root_id,
            rect_to_id,
        }
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn root(&self) -> SlotId {
        self.root
    }

    pub fn rect(&self, id: SlotId) -> Rect {
        self.nodes[id.0 as usize].rect
    }

    pub fn name(&self, id: SlotId) -> String {
        self.rect(id).pblock_name()
    }

    pub fn is_leaf(&self, id: SlotId) -> bool {
        self.rect(id).is_leaf()
    }

    pub fn capacity(&self, id: SlotId) -> AreaVec {
        // Spec: "capacity for a non-leaf is the elementwise sum of its leaves."
        // Density is uniform across the device so this equals area * density,
        // but we compute it by summing leaves to match the stated definition.
        self.leaves_under(id).iter().fold(AreaVec::ZERO, |acc, &l| acc.add(&self.device.capacity_of(&self.rect(l))))
    }

    pub fn wire_capacity(&self, id: SlotId) -> u32 {
        self.device.wire_capacity_of(&self.rect(id))
    }

    pub fn parent_of(&self, id: SlotId) -> Option<SlotId> {
        self.nodes[id.0 as usize].parent
    }

    pub fn children_of(&self, id: SlotId) -> Option<(SlotId, SlotId)> {
        self.nodes[id.0 as usize].children
    }

    /// Straddles-SLR check used to stop bisection for `slr-level-only` and to
    /// assert leaves never straddle (spec invariant: "a leaf slot cannot
    /// straddle an SLR boundary").
    pub fn straddles_slr(&self, id: SlotId) -> bool {
        self.device.slr_of_rect(&self.rect(id)).is_none()
    }

    pub fn slr_of(&self, id: SlotId) -> Option<u32> {
        self.device.slr_of_rect(&self.rect(id))
    }

    /// Split `parent` into two children along its longer dimension, aligning
    /// the cut to an SLR boundary when one falls strictly inside the rect so
    /// that straddling is resolved as early as possible in the tree.
    ///
    /// Idempotent: a second call on the same parent returns the existing
    /// children rather than re-splitting.
    pub fn split(&mut self, parent: SlotId) -> (SlotId, SlotId) {
        if let Some(children) = self.children_of(parent) {
            return children;
        }
        let rect = self.rect(parent);
        assert!(!rect.is_leaf(), "cannot split a leaf slot");

        let (low, high) = if rect.height() > 1 {
            let cut = self.pick_y_cut(&rect);
            (
                Rect::new(rect.dl_x, rect.dl_y, rect.ur_x, cut).unwrap(),
                Rect::new(rect.dl_x, cut, rect.ur_x, rect.ur_y).unwrap(),
            )
        } else {
            let cut = rect.dl_x + rect.width() / 2;
            (
                Rect::new(rect.dl_x, rect.dl_y, cut, rect.ur_y).unwrap(),
                Rect::new(cut, rect.dl_y, rect.ur_x, rect.ur_y).unwrap(),
            )
        };
        debug_assert_eq!(low.area() + high.area(), rect.area());

        let low_id = self.intern(low, Some(parent));
        let high_id = self.intern(high, Some(parent));
        self.nodes[parent.0 as usize].children = Some((low_id, high_id));
        (low_id, high_id)
    }

    fn pick_y_cut(&self, rect: &Rect) -> i32 {
        for &boundary in &self.device.slr_rows {
            if boundary > rect.dl_y && boundary < rect.ur_y {
                return boundary;
            }
        }
        rect.dl_y + rect.height() / 2
    }

    fn intern(&mut self, rect: Rect, parent: Option<SlotId>) -> SlotId {
        if let Some(&id) = self.rect_to_id.get(&rect) {
            return id;
        }
        let id = SlotId(self.nodes.len() as u32);
        self.nodes.push(Node { rect, parent, children: None });
        self.rect_to_id.insert(rect, id);
        id
    }

    /// All leaf descendants of `id` reachable through whatever splits have
    /// been performed so far, in row-major order (y ascending, then x
    /// ascending). If `id` has not been split and is not itself a leaf, it is
    /// returned as its own sole "leaf" (an un-split slot is its own fringe).
    pub fn leaves_under(&self, id: SlotId) -> Vec<SlotId> {
        let mut out = Vec::new();
        self.collect_leaves(id, &mut out);
        out.sort_by_key(|&s| (self.rect(s).dl_y, self.rect(s).dl_x));
        out
    }

    fn collect_leaves(&self, id: SlotId, out: &mut Vec<SlotId>) {
        match self.children_of(id) {
            Some((lo, hi)) => {
                self.collect_leaves(lo, out);
                self.collect_leaves(hi, out);
            }
            None => out.push(id),
        }
    }

    /// Bisect the whole tree down to unit (1x1) leaves and return them in
    /// row-major order. Used by the `exhaustive`/`quick` floorplan strategies.
    pub fn leaves_at_full_depth(&mut self) -> Vec<SlotId> {
        self.bisect_until(self.root, &mut |_m, rect| rect.is_leaf());
        self.leaves_under(self.root)
    }

    /// Bisect only down to SLR granularity (stop a subtree once its rect is
    /// contained in exactly one SLR) and return the resulting fringe.
    pub fn leaves_at_slr_granularity(&mut self) -> Vec<SlotId> {
        let root = self.root;
        self.bisect_until(root, &mut |m: &SlotManager, rect: &Rect| m.device.slr_of_rect(rect).is_some());
        self.leaves_under(self.root)
    }

    fn bisect_until(&mut self, id: SlotId, stop: &mut dyn FnMut(&SlotManager, &Rect) -> bool) {
        let rect = self.rect(id);
        if stop(self, &rect) {
            return;
        }
        let (lo, hi) = self.split(id);
        self.bisect_until(lo, stop);
        self.bisect_until(hi, stop);
    }
}
