//https://github.com/CesiumGS/3d-tiles/tree/main/specification#tileset-json
use serde::Deserialize;

use crate::{Refine, TilesetError};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub asset: Asset,
    #[serde(default)]
    pub geometric_error: f64,
    pub root: TileDescriptor,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Asset {
    pub version: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TileDescriptor {
    pub bounding_volume: BoundingVolumeDescriptor,
    #[serde(default)]
    pub geometric_error: f64,
    pub refine: Option<Refine>,
    pub transform: Option<Vec<f64>>,
    pub content: Option<ContentDescriptor>,
    #[serde(default)]
    pub children: Vec<TileDescriptor>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BoundingVolumeDescriptor {
    #[serde(rename = "box")]
    pub box_: Option<Vec<f64>>,
    pub sphere: Option<Vec<f64>>,
    pub region: Option<Vec<f64>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContentDescriptor {
    pub uri: Option<String>,
    /// Pre-1.0 name of `uri`.
    pub url: Option<String>,
}

impl ContentDescriptor {
    pub fn uri(&self) -> Option<&str> {
        self.uri.as_deref().or(self.url.as_deref())
    }
}

impl Manifest {
    pub fn from_slice(url: &str, bytes: &[u8]) -> Result<Self, TilesetError> {
        serde_json::from_slice(bytes).map_err(|e| TilesetError::parse(url, e))
    }
}
