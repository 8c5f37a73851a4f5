//! Coverages restrict batch jobs to a geographic region.
//!
//! A [`Coverage`] answers two questions for a candidate bounding box: does the
//! region contain it completely, and does it touch it at all. The tile walker
//! uses the answers to prune whole subtrees of the tile pyramid.

use std::fmt;
use std::sync::Arc;

use crate::grid::BBox;

/// A region in some spatial reference system.
///
/// Implementations are responsible for transforming between their own SRS
/// and the SRS passed in by callers.
pub trait Coverage: Send + Sync + fmt::Debug {
    /// Bounding box of the region in `srs`.
    fn extent_for(&self, srs: &str) -> BBox;

    /// Returns true if the region completely contains `bbox`.
    fn contains(&self, bbox: &BBox, srs: &str) -> bool;

    /// Returns true if the region shares any area with `bbox`.
    fn intersects(&self, bbox: &BBox, srs: &str) -> bool;
}

/// Rectangular coverage.
///
/// Only the SRS the box was defined in is supported; other systems fall back
/// to the unmodified coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct BBoxCoverage {
    bbox: BBox,
    srs: String,
}

impl BBoxCoverage {
    /// Creates a coverage for `bbox` in `srs`.
    pub fn new(bbox: BBox, srs: impl Into<String>) -> Self {
        Self {
            bbox,
            srs: srs.into(),
        }
    }

    fn bbox_in(&self, srs: &str) -> BBox {
        if srs != self.srs {
            tracing::debug!(
                coverage_srs = %self.srs,
                requested_srs = %srs,
                "No transformation available, using coverage coordinates unchanged"
            );
        }
        self.bbox
    }
}

impl Coverage for BBoxCoverage {
    fn extent_for(&self, srs: &str) -> BBox {
        self.bbox_in(srs)
    }

    fn contains(&self, bbox: &BBox, srs: &str) -> bool {
        self.bbox_in(srs).contains(bbox)
    }

    fn intersects(&self, bbox: &BBox, srs: &str) -> bool {
        self.bbox_in(srs).intersects(bbox)
    }
}

/// How a candidate bounding box relates to a task's coverage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intersection {
    /// The candidate lies completely inside the coverage.
    Contains,
    /// The candidate is partially covered.
    Intersects,
    /// The candidate lies outside the coverage.
    None,
}

/// Coverage attached to a batch task.
#[derive(Debug, Clone)]
pub enum TaskCoverage {
    /// No restriction: the complete grid is processed.
    Full,
    /// Only tiles touching the region are processed.
    Area(Arc<dyn Coverage>),
    /// The coverage does not touch the grid, nothing can be processed.
    Empty,
}

impl TaskCoverage {
    /// Classifies `bbox` against this coverage.
    pub fn intersects(&self, bbox: &BBox, srs: &str) -> Intersection {
        match self {
            TaskCoverage::Full => Intersection::Contains,
            TaskCoverage::Empty => Intersection::None,
            TaskCoverage::Area(coverage) => {
                if coverage.contains(bbox, srs) {
                    Intersection::Contains
                } else if coverage.intersects(bbox, srs) {
                    Intersection::Intersects
                } else {
                    Intersection::None
                }
            }
        }
    }

    /// Extent to walk in `srs`, or `None` for an empty coverage.
    pub fn extent_for(&self, srs: &str, grid_extent: BBox) -> Option<BBox> {
        match self {
            TaskCoverage::Full => Some(grid_extent),
            TaskCoverage::Empty => None,
            TaskCoverage::Area(coverage) => Some(coverage.extent_for(srs)),
        }
    }

    /// Returns true for [`TaskCoverage::Empty`].
    pub fn is_empty(&self) -> bool {
        matches!(self, TaskCoverage::Empty)
    }
}

impl fmt::Display for TaskCoverage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskCoverage::Full => write!(f, "full grid"),
            TaskCoverage::Empty => write!(f, "empty"),
            TaskCoverage::Area(coverage) => write!(f, "{:?}", coverage),
        }
    }
}
