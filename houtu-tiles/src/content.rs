use std::sync::Arc;

use bytes::Bytes;
use serde_json::{Map, Value};
use tile_content_decoder::{BatchTable, GltfSource, TileBody, TileContent};

use crate::TileStyle;

/// How the renderer should color a payload.
#[derive(Debug, Clone, PartialEq)]
pub enum AppliedStyle {
    Uniform { color: [f32; 3], opacity: f32 },
    VertexColors,
    Points { point_size: f32, opacity: f32 },
}

impl AppliedStyle {
    pub fn for_content(content: &TileContent, style: &TileStyle) -> Self {
        match content.body {
            TileBody::Points(_) => AppliedStyle::Points {
                point_size: style.point_size,
                opacity: style.opacity,
            },
            _ if style.vertex_colors => AppliedStyle::VertexColors,
            _ => AppliedStyle::Uniform {
                color: style.color,
                opacity: style.opacity,
            },
        }
    }
}

/// Decoded content of a loaded tile, as handed to the renderer.
#[derive(Debug, Clone)]
pub struct TilePayload {
    pub content: TileContent,
    /// External glb of an instanced tile, shared through the decode cache.
    pub shared_gltf: Option<Arc<Bytes>>,
    pub style: AppliedStyle,
}

impl TilePayload {
    pub fn new(content: TileContent, shared_gltf: Option<Arc<Bytes>>, style: &TileStyle) -> Self {
        let style = AppliedStyle::for_content(&content, style);
        Self {
            content,
            shared_gltf,
            style,
        }
    }

    pub fn batch_table(&self) -> &BatchTable {
        &self.content.batch_table
    }

    /// Batch table JSON attached to the primitives of a model tile.
    pub fn metadata(&self) -> Option<&Map<String, Value>> {
        match self.content.body {
            TileBody::Model(_) => Some(&self.content.batch_table.json),
            _ => None,
        }
    }

    /// The glTF to instantiate, for model and instanced tiles.
    pub fn gltf(&self) -> Option<&[u8]> {
        match &self.content.body {
            TileBody::Model(model) => Some(&model.glb),
            TileBody::Instanced(instanced) => match &instanced.gltf {
                GltfSource::Embedded(glb) => Some(glb),
                GltfSource::External(_) => self.shared_gltf.as_deref().map(|bytes| &bytes[..]),
            },
            TileBody::Points(_) => None,
        }
    }
}

/// Url of the external glTF an instanced tile still needs.
pub fn external_gltf(content: &TileContent) -> Option<&str> {
    match &content.body {
        TileBody::Instanced(instanced) => match &instanced.gltf {
            GltfSource::External(url) => Some(url),
            GltfSource::Embedded(_) => None,
        },
        _ => None,
    }
}
