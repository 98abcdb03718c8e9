use serde::Serialize;

use crate::annotation::BoundingPoly;

/// Axis-aligned box in source image pixels, `x0,y0` top-left and `x1,y1`
/// bottom-right.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BBox {
    pub x0: u32,
    pub y0: u32,
    pub x1: u32,
    pub y1: u32,
}

impl BBox {
    pub fn new(x0: u32, y0: u32, x1: u32, y1: u32) -> Self {
        Self { x0, y0, x1, y1 }
    }

    /// Top-left from the first vertex and bottom-right from the third;
    /// missing or non-positive coordinates become 0.
    pub fn from_poly(poly: &BoundingPoly) -> Self {
        let first = poly.vertices.first().copied().unwrap_or_default();
        let third = poly.vertices.get(2).copied().unwrap_or_default();
        Self {
            x0: clamp_coord(first.x),
            y0: clamp_coord(first.y),
            x1: clamp_coord(third.x),
            y1: clamp_coord(third.y),
        }
    }

    pub fn width(&self) -> u32 {
        self.x1.saturating_sub(self.x0)
    }

    pub fn height(&self) -> u32 {
        self.y1.saturating_sub(self.y0)
    }

    pub fn union(&self, other: &BBox) -> BBox {
        BBox {
            x0: self.x0.min(other.x0),
            y0: self.y0.min(other.y0),
            x1: self.x1.max(other.x1),
            y1: self.y1.max(other.y1),
        }
    }

    /// Envelope of every box yielded; `None` for an empty iterator.
    pub fn union_all<'a, I>(boxes: I) -> Option<BBox>
    where
        I: IntoIterator<Item = &'a BBox>,
    {
        boxes
            .into_iter()
            .fold(None, |acc: Option<BBox>, bbox| match acc {
                Some(current) => Some(current.union(bbox)),
                None => Some(*bbox),
            })
    }
}

fn clamp_coord(value: Option<i64>) -> u32 {
    match value {
        Some(v) if v > 0 => u32::try_from(v).unwrap_or(u32::MAX),
        _ => 0,
    }
}
