//! Device model: the finite catalogue of supported chips.
//!
//! A device is a rectangular grid of 1x1 "cells" (the finest addressable
//! placement granularity), grouped into rows where each row belongs to
//! exactly one SLR. Per-cell capacity is uniform across a device, so the
//! capacity of any rectangle is `area(rect) * per_cell_capacity` — but
//! callers that need the literal "capacity of a non-leaf is the elementwise
//! sum of its leaves" definition (`slot::SlotManager::capacity_of`) get the
//! same number by summing, since density is uniform.
//!
//! Only one chip is modeled per invocation: `Device::for_part_num` is the
//! single entry point, matching `spec.md` section 4.1 ("the model supports
//! one chip at a time per invocation").

use crate::AreaVec;

/// A rectangle of 1x1 grid cells, inclusive of `dl` and exclusive of `ur`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Rect {
    pub dl_x: i32,
    pub dl_y: i32,
    pub ur_x: i32,
    pub ur_y: i32,
}

impl Rect {
    /// Construct a rectangle, rejecting empty or inverted extents.
    pub fn new(dl_x: i32, dl_y: i32, ur_x: i32, ur_y: i32) -> Result<Self, DeviceError> {
        if ur_x <= dl_x || ur_y <= dl_y {
            return Err(DeviceError::EmptyRect { dl_x, dl_y, ur_x, ur_y });
        }
        Ok(Rect { dl_x, dl_y, ur_x, ur_y })
    }

    pub fn width(&self) -> i32 {
        self.ur_x - self.dl_x
    }

    pub fn height(&self) -> i32 {
        self.ur_y - self.dl_y
    }

    pub fn area(&self) -> i64 {
        self.width() as i64 * self.height() as i64
    }

    pub fn is_leaf(&self) -> bool {
        self.width() == 1 && self.height() == 1
    }

    /// True iff `other` shares exactly one unit edge with `self` (von Neumann
    /// adjacency); only meaningful for two leaf rects.
    pub fn is_grid_adjacent(&self, other: &Rect) -> bool {
        debug_assert!(self.is_leaf() && other.is_leaf());
        let dx = (self.dl_x - other.dl_x).abs();
        let dy = (self.dl_y - other.dl_y).abs();
        (dx == 1 && dy == 0) || (dx == 0 && dy == 1)
    }

    /// A canonical pblock-style name for this rectangle.
    pub fn pblock_name(&self) -> String {
        format!("SLOT_X{}Y{}_X{}Y{}", self.dl_x, self.dl_y, self.ur_x - 1, self.ur_y - 1)
    }
}

/// Which half of a half-SLR slot this is (HBM port binding only).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Half {
    Left,
    Right,
}

/// Static description of the target chip.
#[derive(Debug, Clone)]
pub struct Device {
    pub part_num: String,
    /// The board's root rectangle, in grid cells.
    pub root: Rect,
    /// Capacity of a single 1x1 cell, uniform across the device.
    pub per_cell_capacity: AreaVec,
    /// y-coordinate (row) at which each SLR begins; `slr_rows.len()` is the
    /// SLR count. Row `y` belongs to SLR `i` where `slr_rows[i] <= y < slr_rows[i+1]`
    /// (or the root's `ur_y` for the last SLR).
    pub slr_rows: Vec<i32>,
    /// Per inter-SLR boundary channel bandwidth budget (bits), indexed same
    /// as `slr_rows` boundaries (between row `slr_rows[i]` and `slr_rows[i+1]`).
    pub slr_channel_capacity: u32,
    /// Virtual wire-routing capacity of a single cell (spec 4.3's "wire"
    /// resource), independent of the five logic resources.
    pub wire_capacity_per_cell: u32,
    /// Whether this chip exposes HBM ports (only the bottom SLR row, split
    /// into left/right halves by column).
    pub has_hbm: bool,
}

/// Errors surfaced by the device model.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("unsupported device part number: {0}")]
    UnsupportedDevice(String),
    #[error("rectangle ({dl_x},{dl_y})-({ur_x},{ur_y}) is empty or inverted")]
    EmptyRect { dl_x: i32, dl_y: i32, ur_x: i32, ur_y: i32 },
}

impl Device {
    /// Resolve a part number against the hard-coded catalogue.
    ///
    /// Matches by prefix, mirroring the original tool's `part_num.startswith(...)`
    /// checks; an unsupported prefix is a fatal configuration error.
    pub fn for_part_num(part_num: &str) -> Result<Device, DeviceError> {
        let root = Rect::new(0, 0, 2, 4).expect("static root rect is valid");
        if part_num.starts_with("xcu250") {
            Ok(Device {
                part_num: part_num.to_string(),
                root,
                per_cell_capacity: AreaVec([100_000, 200_000, 500, 500, 0]),
                slr_rows: vec![0, 1, 2, 3, 4],
                slr_channel_capacity: 16_000,
                wire_capacity_per_cell: 200_000,
                has_hbm: false,
            })
        } else if part_num.starts_with("xcu200") {
            Ok(Device {
                part_num: part_num.to_string(),
                root: Rect::new(0, 0, 2, 3).expect("static root rect is valid"),
                per_cell_capacity: AreaVec([100_000, 200_000, 500, 500, 0]),
                slr_rows: vec![0, 1, 2, 3],
                slr_channel_capacity: 16_000,
                wire_capacity_per_cell: 200_000,
                has_hbm: false,
            })
        } else if part_num.starts_with("xcu280") {
            Ok(Device {
                part_num: part_num.to_string(),
                root: Rect::new(0, 0, 2, 3).expect("static root rect is valid"),
                per_cell_capacity: AreaVec([90_000, 180_000, 460, 450, 320]),
                slr_rows: vec![0, 1, 2, 3],
                slr_channel_capacity: 23_000,
                wire_capacity_per_cell: 180_000,
                has_hbm: true,
            })
        } else if part_num.starts_with("xcu50") {
            Ok(Device {
                part_num: part_num.to_string(),
                root: Rect::new(0, 0, 2, 2).expect("static root rect is valid"),
                per_cell_capacity: AreaVec([80_000, 160_000, 320, 320, 160]),
                slr_rows: vec![0, 1, 2],
                slr_channel_capacity: 23_000,
                wire_capacity_per_cell: 160_000,
                has_hbm: true,
            })
        } else {
            Err(DeviceError::UnsupportedDevice(part_num.to_string()))
        }
    }

    /// SLR index that row `y` belongs to.
    pub fn slr_of_row(&self, y: i32) -> u32 {
        let mut slr = 0u32;
        for w in self.slr_rows.windows(2) {
            if y >= w[0] && y < w[1] {
                return slr;
            }
            slr += 1;
        }
        slr.saturating_sub(1)
    }

    /// The (unique) SLR a rectangle belongs to, or `None` if it straddles
    /// more than one SLR row range.
    pub fn slr_of_rect(&self, rect: &Rect) -> Option<u32> {
        let first = self.slr_of_row(rect.dl_y);
        let last = self.slr_of_row(rect.ur_y - 1);
        if first == last {
            Some(first)
        } else {
            None
        }
    }

    pub fn slr_count(&self) -> usize {
        self.slr_rows.len().saturating_sub(1)
    }

    /// Capacity of an arbitrary (leaf or non-leaf) rectangle: area times the
    /// uniform per-cell density.
    pub fn capacity_of(&self, rect: &Rect) -> AreaVec {
        let mut out = [0i64; crate::RESOURCE_COUNT];
        for i in 0..crate::RESOURCE_COUNT {
            out[i] = self.per_cell_capacity.0[i] * rect.area();
        }
        AreaVec(out)
    }

    /// Wire-routing capacity of a rectangle (proportional to area, like the
    /// five logic resources).
    pub fn wire_capacity_of(&self, rect: &Rect) -> u32 {
        (self.wire_capacity_per_cell as i64 * rect.area()) as u32
    }

    /// Half-slot classification of a leaf rect; only meaningful on devices
    /// with HBM (bottom SLR row, split by column into left/right halves).
    pub fn half_of(&self, rect: &Rect) -> Option<Half> {
        if !self.has_hbm || !rect.is_leaf() {
            return None;
        }
        if rect.dl_y != 0 {
            return None;
        }
        if self.root.width() < 2 {
            return None;
        }
        let mid = self.root.dl_x + self.root.width() / 2;
        if rect.dl_x < mid {
            Some(Half::Left)
        } else {
            Some(Half::Right)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Resource;

    #[test]
    fn unsupported_part_num_is_rejected() {
        let err = Device::for_part_num("xc-nonexistent").unwrap_err();
        assert!(matches!(err, DeviceError::UnsupportedDevice(_)));
    }

    #[test]
    fn supported_devices_resolve() {
        for part in ["xcu250-figd2104-2L-e", "xcu280-fsvh2892-2L-e", "xcu200-fsgd2104-2-e", "xcu50-fsvh2104-2-e"] {
            assert!(Device::for_part_num(part).is_ok());
        }
    }

    #[test]
    fn slr_of_rect_detects_straddling() {
        let dev = Device::for_part_num("xcu250-figd2104-2L-e").unwrap();
        let single = Rect::new(0, 0, 2, 1).unwrap();
        assert_eq!(dev.slr_of_rect(&single), Some(0));
        let straddling = Rect::new(0, 0, 2, 2).unwrap();
        assert_eq!(dev.slr_of_rect(&straddling), None);
    }

    #[test]
    fn hbm_halves_split_bottom_row() {
        let dev = Device::for_part_num("xcu280-fsvh2892-2L-e").unwrap();
        let left = Rect::new(0, 0, 1, 1).unwrap();
        let right = Rect::new(1, 0, 2, 1).unwrap();
        assert_eq!(dev.half_of(&left), Some(Half::Left));
        assert_eq!(dev.half_of(&right), Some(Half::Right));
    }

    #[test]
    fn capacity_scales_with_area() {
        let dev = Device::for_part_num("xcu250-figd2104-2L-e").unwrap();
        let one = Rect::new(0, 0, 1, 1).unwrap();
        let two = Rect::new(0, 0, 2, 1).unwrap();
        let c1 = dev.capacity_of(&one);
        let c2 = dev.capacity_of(&two);
        assert_eq!(c2.get(Resource::Lut), 2 * c1.get(Resource::Lut));
    }
}
