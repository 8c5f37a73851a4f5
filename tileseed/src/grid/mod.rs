//! Tile grid and meta-tile grid math.
//!
//! A [`TileGrid`] maps world coordinates to tile coordinates for a fixed
//! list of resolutions. A [`MetaGrid`] groups adjacent tiles into meta-tiles
//! so batch jobs can fetch and process several tiles per request.
//!
//! Grids use a lower-left origin: tile `(0, 0)` touches the south-west
//! corner of the grid extent.

mod types;

pub use types::{BBox, GridError, TileCoord, MAX_LEVELS};

/// Number of levels defined by the builtin global grids.
pub const DEFAULT_GRID_LEVELS: usize = 20;

/// Half the circumference of the Web Mercator world in meters.
pub const MERCATOR_HALF_EXTENT: f64 = 20037508.342789244;

/// A regular tile grid with one resolution per level.
#[derive(Debug, Clone, PartialEq)]
pub struct TileGrid {
    srs: String,
    extent: BBox,
    tile_size: (u32, u32),
    resolutions: Vec<f64>,
}

impl TileGrid {
    /// Creates a grid from an explicit resolution list.
    ///
    /// # Arguments
    ///
    /// * `srs` - Spatial reference identifier, e.g. `EPSG:4326`
    /// * `extent` - World extent covered by the grid
    /// * `tile_size` - Tile width and height in pixels
    /// * `resolutions` - Units per pixel for each level, coarse to fine
    pub fn new(
        srs: impl Into<String>,
        extent: BBox,
        tile_size: (u32, u32),
        resolutions: Vec<f64>,
    ) -> Result<Self, GridError> {
        if resolutions.is_empty() || resolutions.len() > MAX_LEVELS {
            return Err(GridError::InvalidGrid(format!(
                "expected 1 to {} resolutions, got {}",
                MAX_LEVELS,
                resolutions.len()
            )));
        }
        if resolutions.iter().any(|r| !r.is_finite() || *r <= 0.0) {
            return Err(GridError::InvalidGrid(
                "resolutions must be positive".to_string(),
            ));
        }
        if tile_size.0 == 0 || tile_size.1 == 0 {
            return Err(GridError::InvalidGrid("tile size must not be zero".to_string()));
        }
        if extent.width() <= 0.0 || extent.height() <= 0.0 {
            return Err(GridError::InvalidGrid(format!("empty extent {}", extent)));
        }

        Ok(Self {
            srs: srs.into(),
            extent,
            tile_size,
            resolutions,
        })
    }

    /// EPSG:4326 grid with 256px tiles; level 0 is a single tile, level 1 is 2×1.
    pub fn global_geodetic() -> Self {
        Self {
            srs: "EPSG:4326".to_string(),
            extent: BBox::new(-180.0, -90.0, 180.0, 90.0),
            tile_size: (256, 256),
            resolutions: power_of_two_resolutions(1.40625, DEFAULT_GRID_LEVELS),
        }
    }

    /// EPSG:3857 grid with 256px tiles; level 0 is a single tile.
    pub fn global_mercator() -> Self {
        Self {
            srs: "EPSG:3857".to_string(),
            extent: BBox::new(
                -MERCATOR_HALF_EXTENT,
                -MERCATOR_HALF_EXTENT,
                MERCATOR_HALF_EXTENT,
                MERCATOR_HALF_EXTENT,
            ),
            tile_size: (256, 256),
            resolutions: power_of_two_resolutions(
                2.0 * MERCATOR_HALF_EXTENT / 256.0,
                DEFAULT_GRID_LEVELS,
            ),
        }
    }

    /// Spatial reference identifier.
    pub fn srs(&self) -> &str {
        &self.srs
    }

    /// World extent of the grid.
    pub fn extent(&self) -> BBox {
        self.extent
    }

    /// Tile size in pixels.
    pub fn tile_size(&self) -> (u32, u32) {
        self.tile_size
    }

    /// Number of levels defined by this grid.
    pub fn levels(&self) -> usize {
        self.resolutions.len()
    }

    /// Resolution (units per pixel) of `level`.
    pub fn resolution(&self, level: u8) -> Result<f64, GridError> {
        self.resolutions
            .get(level as usize)
            .copied()
            .ok_or(GridError::InvalidLevel {
                level,
                levels: self.resolutions.len(),
            })
    }

    /// Number of tiles in x and y direction at `level`.
    pub fn grid_size(&self, level: u8) -> Result<(u32, u32), GridError> {
        let res = self.resolution(level)?;
        let width = self.extent.width() / (res * self.tile_size.0 as f64);
        let height = self.extent.height() / (res * self.tile_size.1 as f64);
        // Round away float noise before ceiling so exact fits stay exact
        let cols = (width - 1e-9).ceil().max(1.0) as u32;
        let rows = (height - 1e-9).ceil().max(1.0) as u32;
        Ok((cols, rows))
    }

    /// Tile indices containing the world point `(x, y)` at `level`.
    ///
    /// The result may lie outside the grid for points outside the extent.
    pub fn tile(&self, x: f64, y: f64, level: u8) -> Result<(i64, i64), GridError> {
        let res = self.resolution(level)?;
        let tx = ((x - self.extent.min_x) / (res * self.tile_size.0 as f64)).floor() as i64;
        let ty = ((y - self.extent.min_y) / (res * self.tile_size.1 as f64)).floor() as i64;
        Ok((tx, ty))
    }

    /// World extent of a single tile.
    pub fn tile_bbox(&self, coord: TileCoord) -> Result<BBox, GridError> {
        self.span_bbox(coord.x as i64, coord.y as i64, 1, 1, coord.z)
    }

    /// World extent of a `cols`×`rows` block of tiles starting at `(x, y)`.
    fn span_bbox(&self, x: i64, y: i64, cols: i64, rows: i64, level: u8) -> Result<BBox, GridError> {
        let res = self.resolution(level)?;
        let tile_w = res * self.tile_size.0 as f64;
        let tile_h = res * self.tile_size.1 as f64;
        Ok(BBox::new(
            self.extent.min_x + x as f64 * tile_w,
            self.extent.min_y + y as f64 * tile_h,
            self.extent.min_x + (x + cols) as f64 * tile_w,
            self.extent.min_y + (y + rows) as f64 * tile_h,
        ))
    }
}

fn power_of_two_resolutions(first: f64, levels: usize) -> Vec<f64> {
    (0..levels).map(|l| first / 2f64.powi(l as i32)).collect()
}

/// Tiles of one level affected by a bounding box.
#[derive(Debug, Clone, PartialEq)]
pub struct AffectedTiles {
    /// Extent of all affected meta-tiles.
    pub bbox: BBox,
    /// Number of affected meta-tiles in x and y direction.
    pub tiles: (u32, u32),
    /// Meta-tile coordinates in raster order (top row first, west to east).
    ///
    /// Entries are `None` for candidates outside the grid.
    pub coords: Vec<Option<TileCoord>>,
}

impl AffectedTiles {
    /// Total number of candidates, including those outside the grid.
    pub fn total(&self) -> usize {
        self.tiles.0 as usize * self.tiles.1 as usize
    }
}

/// Groups tiles of a [`TileGrid`] into meta-tiles.
///
/// Meta-tiles are identified by the coordinate of their lower-left tile.
#[derive(Debug, Clone, PartialEq)]
pub struct MetaGrid {
    grid: TileGrid,
    meta_size: (u32, u32),
}

impl MetaGrid {
    /// Creates a meta grid with `meta_size` tiles per meta-tile.
    pub fn new(grid: TileGrid, meta_size: (u32, u32)) -> Self {
        Self {
            grid,
            meta_size: (meta_size.0.max(1), meta_size.1.max(1)),
        }
    }

    /// The underlying tile grid.
    pub fn grid(&self) -> &TileGrid {
        &self.grid
    }

    /// Configured meta-tile size.
    pub fn configured_meta_size(&self) -> (u32, u32) {
        self.meta_size
    }

    /// Meta-tile size at `level`, never larger than the grid itself.
    pub fn meta_size(&self, level: u8) -> Result<(u32, u32), GridError> {
        let (cols, rows) = self.grid.grid_size(level)?;
        Ok((self.meta_size.0.min(cols), self.meta_size.1.min(rows)))
    }

    /// Meta-tiles at `level` that intersect `bbox`.
    ///
    /// A tenth of a pixel is removed from each side of `bbox` so tiles that
    /// only touch the box are not included.
    pub fn get_affected_level_tiles(
        &self,
        bbox: &BBox,
        level: u8,
    ) -> Result<AffectedTiles, GridError> {
        let delta = self.grid.resolution(level)? / 10.0;
        let (x0, y0) = self.grid.tile(bbox.min_x + delta, bbox.min_y + delta, level)?;
        let (x1, y1) = self.grid.tile(bbox.max_x - delta, bbox.max_y - delta, level)?;
        let (x1, y1) = (x1.max(x0), y1.max(y0));

        let (mw, mh) = self.meta_size(level)?;
        let (mw, mh) = (mw as i64, mh as i64);
        let (mx0, mx1) = (x0.div_euclid(mw), x1.div_euclid(mw));
        let (my0, my1) = (y0.div_euclid(mh), y1.div_euclid(mh));

        let (cols, rows) = self.grid.grid_size(level)?;
        let mut coords = Vec::with_capacity(((mx1 - mx0 + 1) * (my1 - my0 + 1)) as usize);
        for my in (my0..=my1).rev() {
            for mx in mx0..=mx1 {
                let (x, y) = (mx * mw, my * mh);
                if x < 0 || y < 0 || x >= cols as i64 || y >= rows as i64 {
                    coords.push(None);
                } else {
                    coords.push(Some(TileCoord::new(x as u32, y as u32, level)));
                }
            }
        }

        let bbox = self.grid.span_bbox(
            mx0 * mw,
            my0 * mh,
            (mx1 - mx0 + 1) * mw,
            (my1 - my0 + 1) * mh,
            level,
        )?;

        Ok(AffectedTiles {
            bbox,
            tiles: ((mx1 - mx0 + 1) as u32, (my1 - my0 + 1) as u32),
            coords,
        })
    }

    /// World extent of the meta-tile starting at `coord`, clipped to the grid.
    pub fn meta_bbox(&self, coord: TileCoord) -> Result<BBox, GridError> {
        let (cols, rows) = self.meta_span(coord)?;
        self.grid
            .span_bbox(coord.x as i64, coord.y as i64, cols as i64, rows as i64, coord.z)
    }

    /// All tiles of the meta-tile starting at `coord`, top row first.
    pub fn tile_list(&self, coord: TileCoord) -> Result<Vec<TileCoord>, GridError> {
        let (cols, rows) = self.meta_span(coord)?;
        let mut tiles = Vec::with_capacity((cols * rows) as usize);
        for y in (coord.y..coord.y + rows).rev() {
            for x in coord.x..coord.x + cols {
                tiles.push(TileCoord::new(x, y, coord.z));
            }
        }
        Ok(tiles)
    }

    fn meta_span(&self, coord: TileCoord) -> Result<(u32, u32), GridError> {
        let (mw, mh) = self.meta_size(coord.z)?;
        let (cols, rows) = self.grid.grid_size(coord.z)?;
        Ok((
            mw.min(cols.saturating_sub(coord.x)),
            mh.min(rows.saturating_sub(coord.y)),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn world() -> BBox {
        BBox::new(-180.0, -90.0, 180.0, 90.0)
    }

    #[test]
    fn test_geodetic_grid_sizes() {
        let grid = TileGrid::global_geodetic();
        assert_eq!(grid.grid_size(0).unwrap(), (1, 1));
        assert_eq!(grid.grid_size(1).unwrap(), (2, 1));
        assert_eq!(grid.grid_size(2).unwrap(), (4, 2));
        assert_eq!(grid.grid_size(5).unwrap(), (32, 16));
    }

    #[test]
    fn test_mercator_grid_sizes() {
        let grid = TileGrid::global_mercator();
        assert_eq!(grid.grid_size(0).unwrap(), (1, 1));
        assert_eq!(grid.grid_size(3).unwrap(), (8, 8));
    }

    #[test]
    fn test_invalid_level() {
        let grid = TileGrid::global_geodetic();
        assert!(matches!(
            grid.resolution(40),
            Err(GridError::InvalidLevel { level: 40, .. })
        ));
    }

    #[test]
    fn test_invalid_grid_definition() {
        assert!(TileGrid::new("EPSG:4326", world(), (256, 256), vec![]).is_err());
        assert!(TileGrid::new("EPSG:4326", world(), (0, 256), vec![1.0]).is_err());
        assert!(TileGrid::new("EPSG:4326", world(), (256, 256), vec![-1.0]).is_err());
    }

    #[test]
    fn test_tile_bbox() {
        let grid = TileGrid::global_geodetic();
        assert_eq!(
            grid.tile_bbox(TileCoord::new(0, 0, 0)).unwrap(),
            BBox::new(-180.0, -90.0, 180.0, 270.0)
        );
        assert_eq!(
            grid.tile_bbox(TileCoord::new(1, 0, 1)).unwrap(),
            BBox::new(0.0, -90.0, 180.0, 90.0)
        );
    }

    #[test]
    fn test_affected_tiles_whole_world() {
        let meta = MetaGrid::new(TileGrid::global_geodetic(), (1, 1));

        let level0 = meta.get_affected_level_tiles(&world(), 0).unwrap();
        assert_eq!(level0.tiles, (1, 1));
        assert_eq!(level0.coords, vec![Some(TileCoord::new(0, 0, 0))]);

        let level2 = meta.get_affected_level_tiles(&world(), 2).unwrap();
        assert_eq!(level2.tiles, (4, 2));
        // top row first
        assert_eq!(level2.coords[0], Some(TileCoord::new(0, 1, 2)));
        assert_eq!(level2.coords[4], Some(TileCoord::new(0, 0, 2)));
        assert_eq!(level2.total(), 8);
    }

    #[test]
    fn test_affected_tiles_excludes_touching_tiles() {
        let meta = MetaGrid::new(TileGrid::global_geodetic(), (1, 1));
        let west = BBox::new(-180.0, -90.0, 0.0, 90.0);
        let affected = meta.get_affected_level_tiles(&west, 1).unwrap();
        assert_eq!(affected.coords, vec![Some(TileCoord::new(0, 0, 1))]);
    }

    #[test]
    fn test_affected_tiles_outside_grid_are_none() {
        let meta = MetaGrid::new(TileGrid::global_geodetic(), (1, 1));
        let beyond = BBox::new(90.0, -90.0, 270.0, 90.0);
        let affected = meta.get_affected_level_tiles(&beyond, 2).unwrap();
        assert_eq!(affected.tiles, (2, 2));
        assert!(affected.coords.contains(&None));
        assert!(affected.coords.contains(&Some(TileCoord::new(3, 0, 2))));
    }

    #[test]
    fn test_meta_tiles() {
        let meta = MetaGrid::new(TileGrid::global_geodetic(), (2, 2));
        assert_eq!(meta.meta_size(0).unwrap(), (1, 1));
        assert_eq!(meta.meta_size(1).unwrap(), (2, 1));
        assert_eq!(meta.meta_size(2).unwrap(), (2, 2));

        let affected = meta.get_affected_level_tiles(&world(), 2).unwrap();
        assert_eq!(
            affected.coords,
            vec![Some(TileCoord::new(0, 0, 2)), Some(TileCoord::new(2, 0, 2))]
        );

        let tiles = meta.tile_list(TileCoord::new(2, 0, 2)).unwrap();
        assert_eq!(
            tiles,
            vec![
                TileCoord::new(2, 1, 2),
                TileCoord::new(3, 1, 2),
                TileCoord::new(2, 0, 2),
                TileCoord::new(3, 0, 2),
            ]
        );
        assert_eq!(
            meta.meta_bbox(TileCoord::new(2, 0, 2)).unwrap(),
            BBox::new(0.0, -90.0, 180.0, 90.0)
        );
    }

    #[test]
    fn test_meta_tile_clipped_at_grid_edge() {
        let meta = MetaGrid::new(TileGrid::global_geodetic(), (4, 4));
        // level 2 is only 4x2 tiles
        let tiles = meta.tile_list(TileCoord::new(0, 0, 2)).unwrap();
        assert_eq!(tiles.len(), 8);
    }
}
