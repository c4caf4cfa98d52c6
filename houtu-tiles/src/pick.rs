use bevy::math::DVec3;
use serde_json::{Map, Value};
use tile_content_decoder::BatchTable;

use crate::TileId;

/// Nearest rendered tile hit by a pick ray.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureHit {
    pub tileset: String,
    pub tile: TileId,
    pub url: String,
    /// Along the ray, to the entry point of the tile's world box.
    pub distance: f64,
    /// World position where the ray enters the box.
    pub position: DVec3,
    pub batch_table: BatchTable,
}

impl FeatureHit {
    /// Batch table value of `name` for the primitive carrying `batch_id`.
    pub fn property(&self, batch_id: usize, name: &str) -> Option<Value> {
        self.batch_table.property(batch_id, name)
    }

    pub fn feature(&self, batch_id: usize) -> Map<String, Value> {
        self.batch_table.feature(batch_id)
    }
}
