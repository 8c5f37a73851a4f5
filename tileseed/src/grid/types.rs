//! Grid type definitions

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Highest zoom level a grid may define.
pub const MAX_LEVELS: usize = 32;

/// Tile coordinates inside a [`TileGrid`](super::TileGrid).
///
/// The origin is the lower-left corner of the grid extent: `x` grows
/// eastwards, `y` grows northwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TileCoord {
    /// Column (west to east)
    pub x: u32,
    /// Row (south to north)
    pub y: u32,
    /// Zoom level
    pub z: u8,
}

impl TileCoord {
    /// Creates a new tile coordinate.
    #[inline]
    pub const fn new(x: u32, y: u32, z: u8) -> Self {
        Self { x, y, z }
    }
}

impl fmt::Display for TileCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.z, self.x, self.y)
    }
}

/// Axis-aligned bounding box in grid units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BBox {
    /// Creates a bounding box from its corners.
    pub const fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    /// Width of the box.
    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    /// Height of the box.
    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    /// Returns true if `other` lies completely inside this box (edges inclusive).
    pub fn contains(&self, other: &BBox) -> bool {
        self.min_x <= other.min_x
            && self.min_y <= other.min_y
            && self.max_x >= other.max_x
            && self.max_y >= other.max_y
    }

    /// Returns true if both boxes share a non-empty area.
    ///
    /// Boxes that only touch at an edge do not intersect.
    pub fn intersects(&self, other: &BBox) -> bool {
        self.min_x < other.max_x
            && self.max_x > other.min_x
            && self.min_y < other.max_y
            && self.max_y > other.min_y
    }

    /// Clips this box to `limit`.
    ///
    /// The result may be degenerate when the boxes do not overlap.
    pub fn limit_to(&self, limit: &BBox) -> BBox {
        BBox {
            min_x: self.min_x.max(limit.min_x),
            min_y: self.min_y.max(limit.min_y),
            max_x: self.max_x.min(limit.max_x),
            max_y: self.max_y.min(limit.max_y),
        }
    }
}

impl fmt::Display for BBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:.5}, {:.5}, {:.5}, {:.5}",
            self.min_x, self.min_y, self.max_x, self.max_y
        )
    }
}

impl std::str::FromStr for BBox {
    type Err = GridError;

    /// Parses `minx,miny,maxx,maxy`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let values: Vec<f64> = s
            .split(',')
            .map(|v| v.trim().parse::<f64>())
            .collect::<Result<_, _>>()
            .map_err(|_| GridError::InvalidBBox(s.to_string()))?;

        match values.as_slice() {
            [min_x, min_y, max_x, max_y] if min_x < max_x && min_y < max_y => {
                Ok(BBox::new(*min_x, *min_y, *max_x, *max_y))
            }
            _ => Err(GridError::InvalidBBox(s.to_string())),
        }
    }
}

/// Errors raised by grid construction and lookups.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GridError {
    /// The grid does not define the requested level.
    #[error("level {level} is not defined (grid has {levels} levels)")]
    InvalidLevel { level: u8, levels: usize },

    /// Grid definition is unusable.
    #[error("invalid grid: {0}")]
    InvalidGrid(String),

    /// Bounding box could not be parsed or is empty.
    #[error("invalid bbox: {0}")]
    InvalidBBox(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bbox_contains() {
        let outer = BBox::new(-180.0, -90.0, 180.0, 90.0);
        let inner = BBox::new(0.0, 0.0, 10.0, 10.0);
        assert!(outer.contains(&inner));
        assert!(!inner.contains(&outer));
        assert!(outer.contains(&outer));
    }

    #[test]
    fn test_bbox_touching_edges_do_not_intersect() {
        let a = BBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BBox::new(10.0, 0.0, 20.0, 10.0);
        assert!(!a.intersects(&b));
        assert!(a.intersects(&BBox::new(9.0, 9.0, 11.0, 11.0)));
    }

    #[test]
    fn test_bbox_limit_to() {
        let a = BBox::new(-180.0, -90.0, 180.0, 270.0);
        let limit = BBox::new(-180.0, -90.0, 180.0, 90.0);
        assert_eq!(a.limit_to(&limit), limit);
    }

    #[test]
    fn test_bbox_parse() {
        let bbox: BBox = "5.5, 47,15.1,55".parse().unwrap();
        assert_eq!(bbox, BBox::new(5.5, 47.0, 15.1, 55.0));
        assert!("1,2,3".parse::<BBox>().is_err());
        assert!("10,0,0,10".parse::<BBox>().is_err());
    }

    #[test]
    fn test_tile_coord_display() {
        assert_eq!(TileCoord::new(3, 1, 2).to_string(), "2/3/1");
    }
}
