//! Classification of candidate meta-tiles against a task's coverage.

use crate::coverage::Intersection;
use crate::grid::{BBox, MetaGrid, TileCoord};

use super::types::Task;

/// A meta-tile that shares area with the coverage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    /// Lower-left tile of the meta-tile.
    pub coord: TileCoord,
    /// Extent of the meta-tile.
    pub bbox: BBox,
    /// `Contains` if the whole subtree lies inside the coverage.
    pub intersection: Intersection,
}

/// Yields one entry per candidate of a level, in the order of the input.
///
/// Entries are `None` for candidates outside the grid and for candidates the
/// coverage does not touch. With `all_subtiles` set the coverage is not
/// consulted and every candidate inside the grid is `Contains`.
pub struct TileIterator<'a> {
    task: &'a dyn Task,
    meta_grid: &'a MetaGrid,
    coords: std::vec::IntoIter<Option<TileCoord>>,
    all_subtiles: bool,
}

impl<'a> TileIterator<'a> {
    pub fn new(
        task: &'a dyn Task,
        meta_grid: &'a MetaGrid,
        coords: Vec<Option<TileCoord>>,
        all_subtiles: bool,
    ) -> Self {
        Self {
            task,
            meta_grid,
            coords: coords.into_iter(),
            all_subtiles,
        }
    }

    fn classify(&self, coord: TileCoord) -> Option<Candidate> {
        let bbox = self.meta_grid.meta_bbox(coord).ok()?;
        let intersection = if self.all_subtiles {
            Intersection::Contains
        } else {
            self.task.intersects(&bbox)
        };
        if intersection == Intersection::None {
            return None;
        }
        Some(Candidate {
            coord,
            bbox,
            intersection,
        })
    }
}

impl Iterator for TileIterator<'_> {
    type Item = Option<Candidate>;

    fn next(&mut self) -> Option<Self::Item> {
        let coord = self.coords.next()?;
        Some(coord.and_then(|c| self.classify(c)))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.coords.size_hint()
    }
}

impl ExactSizeIterator for TileIterator<'_> {}
