#![warn(
    clippy::unwrap_used,
    clippy::cast_lossless,
    clippy::unimplemented,
    clippy::indexing_slicing,
    clippy::expect_used
)]
//! Geometry shared by the tile streaming crates: planes, boxes, rays and
//! the six-plane culling volume used to decide tile visibility.

mod bounding_volume;
mod culling_volume;
mod geometry;
mod math;
mod perspective_frustum;

pub use bounding_volume::*;
pub use culling_volume::*;
pub use geometry::*;
pub use math::*;
pub use perspective_frustum::*;
