//! Upstream tile sources.
//!
//! A [`TileSource`] produces tile data for coordinates that are missing from a
//! cache. Managers call it on cache misses while seeding.

mod http;

pub use http::{HttpClient, HttpTileSource, ReqwestClient};

use bytes::Bytes;
use thiserror::Error;

use crate::grid::TileCoord;

/// Errors raised by tile sources.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SourceError {
    /// HTTP request failed or returned a non-success status.
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// The source has no data for the tile.
    #[error("no data for tile {0}")]
    NotFound(TileCoord),

    /// The URL template is unusable.
    #[error("invalid URL template: {0}")]
    InvalidTemplate(String),
}

/// Produces encoded tile data.
pub trait TileSource: Send + Sync {
    /// Fetches a single tile.
    fn fetch(&self, coord: TileCoord) -> Result<Bytes, SourceError>;
}
