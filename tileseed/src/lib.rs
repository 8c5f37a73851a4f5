//! TileSeed - batch maintenance for map tile caches
//!
//! This library walks tile pyramids and seeds, cleans up, exports or imports
//! the tiles of one or more caches, restricted to a coverage and a set of
//! zoom levels.
//!
//! # Modules
//!
//! - [`grid`] - tile grids, meta-tile grids and bounding boxes
//! - [`coverage`] - areas a task is restricted to
//! - [`manager`] - tile caches (in-memory and on-disk)
//! - [`source`] - upstream tile sources used for seeding
//! - [`provider`] - export and import targets
//! - [`task`] - tasks, the tile walker, worker queue, locking and batch runner
//! - [`config`] - INI configuration for batch runs
//! - [`logging`] - tracing subscriber setup

pub mod config;
pub mod coverage;
pub mod grid;
pub mod logging;
pub mod manager;
pub mod provider;
pub mod source;
pub mod task;

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
