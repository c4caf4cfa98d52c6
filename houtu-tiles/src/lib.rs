#![warn(
    clippy::unwrap_used,
    clippy::cast_lossless,
    clippy::unimplemented,
    clippy::indexing_slicing,
    clippy::expect_used
)]
//! Streams 3D Tiles tilesets: loads the manifest, decides every frame which
//! tiles the camera needs and loads or drops their content in the
//! background.

mod content;
mod decode_cache;
mod error;
mod events;
mod fetch;
mod jobs;
mod loader;
mod manifest;
mod options;
mod pick;
mod plugin;
mod registry;
mod tile;
mod tile_storage;
mod tileset;

pub use content::{AppliedStyle, TilePayload};
pub use decode_cache::*;
pub use error::*;
pub use events::*;
pub use fetch::{resolve_url, ReqwestFetcher, ResourceFetcher};
pub use loader::{build_tree, load, load_under, LoadedTileset};
pub use manifest::*;
pub use options::*;
pub use pick::*;
pub use plugin::*;
pub use registry::*;
pub use tile::*;
pub use tile_storage::*;
pub use tileset::*;

pub use tile_content_decoder as decoder;
