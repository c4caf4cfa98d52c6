use serde::{Deserialize, Serialize};

use crate::TilesetError;

/// Uniform styling forwarded to the renderer with every content payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TileStyle {
    /// Linear RGB in `[0, 1]`.
    pub color: [f32; 3],
    pub opacity: f32,
    pub point_size: f32,
    /// Keep the colors baked into the model instead of the uniform color.
    pub vertex_colors: bool,
}

impl Default for TileStyle {
    fn default() -> Self {
        Self {
            color: [1.0, 1.0, 1.0],
            opacity: 1.0,
            point_size: 1.0,
            vertex_colors: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TilesetOptions {
    /// A tile farther than `geometric_error * far_factor` is unloaded with
    /// its whole subtree.
    pub far_factor: f64,
    /// A tile closer than `geometric_error * near_factor` is refined into
    /// its children.
    pub near_factor: f64,
    pub style: TileStyle,
    /// Number of external glTF payloads kept by the decode cache.
    pub decode_cache_capacity: usize,
    /// Cancel in-flight loads of tiles that get unloaded and drop their
    /// late results.
    pub cancel_stale_loads: bool,
}

impl Default for TilesetOptions {
    fn default() -> Self {
        Self {
            far_factor: 50.0,
            near_factor: 20.0,
            style: TileStyle::default(),
            decode_cache_capacity: 256,
            cancel_stale_loads: false,
        }
    }
}

impl TilesetOptions {
    pub fn from_ron(source: &str) -> Result<Self, TilesetError> {
        let options: Self =
            ron::from_str(source).map_err(|e| TilesetError::Options(e.to_string()))?;
        options.validate()?;
        Ok(options)
    }

    pub fn validate(&self) -> Result<(), TilesetError> {
        if !(self.far_factor > 0.0) || !(self.near_factor > 0.0) {
            return Err(TilesetError::Options(format!(
                "factors must be positive, got near {} and far {}",
                self.near_factor, self.far_factor
            )));
        }
        if self.near_factor > self.far_factor {
            return Err(TilesetError::Options(format!(
                "near_factor {} is larger than far_factor {}",
                self.near_factor, self.far_factor
            )));
        }
        Ok(())
    }
}
