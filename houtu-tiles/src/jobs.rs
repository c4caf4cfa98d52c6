use std::sync::Arc;

use bevy::math::DMat4;
use bytes::Bytes;
use houtu_jobs::{AsyncReturn, Context, Job};
use tile_content_decoder::{decode, TileContent, TileFormat};

use crate::{loader, ContentKind, LoadedTileset, Refine, ResourceFetcher, TileId, TilesetError};

/// Loads a manifest: the tileset's own when `parent` is `None`, otherwise an
/// external tileset to graft under `parent`.
pub struct LoadManifestJob {
    pub fetcher: Arc<dyn ResourceFetcher>,
    pub url: String,
    pub parent: Option<TileId>,
    pub parent_world: DMat4,
    pub refine: Refine,
}

pub struct ManifestOutcome {
    pub parent: Option<TileId>,
    pub url: String,
    pub cancelled: bool,
    pub result: Result<LoadedTileset, TilesetError>,
}

impl Job for LoadManifestJob {
    type Outcome = ManifestOutcome;

    fn name(&self) -> String {
        format!("load manifest {}", self.url)
    }

    fn perform(self, context: Context) -> AsyncReturn<Self::Outcome> {
        Box::pin(async move {
            let result = loader::load_under(
                self.fetcher.as_ref(),
                &self.url,
                &self.parent_world,
                self.refine,
            )
            .await;
            ManifestOutcome {
                parent: self.parent,
                url: self.url,
                cancelled: context.is_cancelled(),
                result,
            }
        })
    }
}

/// Fetches and decodes the binary content of one tile.
pub struct LoadContentJob {
    pub fetcher: Arc<dyn ResourceFetcher>,
    pub tile: TileId,
    pub url: String,
    pub kind: ContentKind,
}

pub struct ContentOutcome {
    pub tile: TileId,
    pub url: String,
    pub cancelled: bool,
    pub result: Result<TileContent, TilesetError>,
}

impl Job for LoadContentJob {
    type Outcome = ContentOutcome;

    fn name(&self) -> String {
        format!("load content {}", self.url)
    }

    fn perform(self, context: Context) -> AsyncReturn<Self::Outcome> {
        Box::pin(async move {
            let result = if context.is_cancelled() {
                Err(TilesetError::network(&self.url, "cancelled"))
            } else {
                fetch_and_decode(self.fetcher.as_ref(), &self.url, self.kind).await
            };
            ContentOutcome {
                tile: self.tile,
                url: self.url,
                cancelled: context.is_cancelled(),
                result,
            }
        })
    }
}

async fn fetch_and_decode(
    fetcher: &dyn ResourceFetcher,
    url: &str,
    kind: ContentKind,
) -> Result<TileContent, TilesetError> {
    let bytes = fetcher.fetch(url).await?;
    let format = match kind {
        ContentKind::Tile(format) => format,
        ContentKind::Unknown => {
            TileFormat::sniff(&bytes).ok_or_else(|| TilesetError::UnsupportedFormat {
                url: url.to_string(),
                format: String::from_utf8_lossy(bytes.get(..4).unwrap_or(&bytes[..])).into_owned(),
            })?
        }
        ContentKind::Tileset => {
            return Err(TilesetError::UnsupportedFormat {
                url: url.to_string(),
                format: "tileset".to_string(),
            })
        }
    };
    let content = decode(&bytes, format).map_err(|e| TilesetError::decode(url, e))?;
    for warning in &content.warnings {
        bevy::log::warn!("{}: {}", url, warning);
    }
    Ok(content)
}

/// Fetches an external glTF shared by instanced tiles.
pub struct FetchGltfJob {
    pub fetcher: Arc<dyn ResourceFetcher>,
    pub url: String,
}

pub struct GltfOutcome {
    pub url: String,
    pub result: Result<Bytes, TilesetError>,
}

impl Job for FetchGltfJob {
    type Outcome = GltfOutcome;

    fn name(&self) -> String {
        format!("fetch glTF {}", self.url)
    }

    fn perform(self, _: Context) -> AsyncReturn<Self::Outcome> {
        Box::pin(async move {
            let result = self.fetcher.fetch(&self.url).await;
            GltfOutcome {
                url: self.url,
                result,
            }
        })
    }
}
