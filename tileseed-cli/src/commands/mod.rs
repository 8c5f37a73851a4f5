//! CLI command implementations.
//!
//! Each subcommand has its own module with argument definitions and handlers.
//!
//! # Command Modules
//!
//! - [`seed`] - Fill a cache from a tile server
//! - [`cleanup`] - Remove old tiles from a cache
//! - [`export`] - Copy cached tiles into a directory archive
//! - [`import`] - Copy tiles from a directory archive into a cache

pub mod cleanup;
pub mod common;
pub mod export;
pub mod import;
pub mod seed;
