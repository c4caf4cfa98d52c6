use bevy::math::DMat4;
use houtu_scene::{matrix_from_column_major, AxisAlignedBoundingBox};

use crate::{
    fetch::resolve_url, BoundingVolumeDescriptor, ContentRef, Manifest, Refine, ResourceFetcher,
    Tile, TileDescriptor, TileId, TileStorage, TilesetError,
};

/// A tileset manifest turned into tiles. The root is always the first tile
/// of `tiles`.
#[derive(Debug)]
pub struct LoadedTileset {
    pub url: String,
    pub version: String,
    pub geometric_error: f64,
    pub tiles: TileStorage,
}

impl LoadedTileset {
    pub fn root(&self) -> TileId {
        TileId(0)
    }
}

/// Fetches the manifest at `url` and builds its tile tree.
pub async fn load(fetcher: &dyn ResourceFetcher, url: &str) -> Result<LoadedTileset, TilesetError> {
    load_under(fetcher, url, &DMat4::IDENTITY, Refine::Add).await
}

/// Like [`load`], for a tileset nested under a tile with `parent_world`
/// transform and `refine` mode.
pub async fn load_under(
    fetcher: &dyn ResourceFetcher,
    url: &str,
    parent_world: &DMat4,
    refine: Refine,
) -> Result<LoadedTileset, TilesetError> {
    let bytes = fetcher.fetch(url).await?;
    let manifest = Manifest::from_slice(url, &bytes)?;
    build_tree(url, manifest, parent_world, refine)
}

/// Builds the tile tree of `manifest` without touching the network.
pub fn build_tree(
    url: &str,
    manifest: Manifest,
    parent_world: &DMat4,
    refine: Refine,
) -> Result<LoadedTileset, TilesetError> {
    let mut tiles = TileStorage::new();
    let mut stack: Vec<(TileDescriptor, Option<TileId>, DMat4, Refine)> =
        vec![(manifest.root, None, *parent_world, refine)];

    while let Some((mut descriptor, parent, parent_world, inherited)) = stack.pop() {
        let transform = match descriptor.transform.as_deref() {
            Some(values) => matrix_from_column_major(values)
                .ok_or(TilesetError::MalformedTransform { len: values.len() })?,
            None => DMat4::IDENTITY,
        };
        let bounding_volume = bounding_box(url, &descriptor.bounding_volume)?;
        let refine = descriptor.refine.unwrap_or(inherited);

        let mut tile = Tile::new(
            tiles.next_id(),
            parent,
            bounding_volume,
            descriptor.geometric_error,
            refine,
            transform,
            &parent_world,
        );
        tile.content = descriptor
            .content
            .as_ref()
            .and_then(|content| content.uri())
            .map(|uri| ContentRef::new(resolve_url(url, uri)));
        let world_transform = tile.world_transform;
        let id = tiles.add(tile);

        // reversed so that children are added in manifest order
        let children = std::mem::take(&mut descriptor.children);
        for child in children.into_iter().rev() {
            stack.push((child, Some(id), world_transform, refine));
        }
    }

    Ok(LoadedTileset {
        url: url.to_string(),
        version: manifest.asset.version,
        geometric_error: manifest.geometric_error,
        tiles,
    })
}

fn bounding_box(
    url: &str,
    volume: &BoundingVolumeDescriptor,
) -> Result<AxisAlignedBoundingBox, TilesetError> {
    if let Some(values) = &volume.box_ {
        return AxisAlignedBoundingBox::from_box_array(values)
            .ok_or_else(|| TilesetError::parse(url, "boundingVolume.box needs 12 numbers"));
    }
    if let Some(values) = &volume.sphere {
        return AxisAlignedBoundingBox::from_sphere_array(values)
            .ok_or_else(|| TilesetError::parse(url, "boundingVolume.sphere needs 4 numbers"));
    }
    if volume.region.is_some() {
        return Err(TilesetError::parse(
            url,
            "boundingVolume.region is not supported",
        ));
    }
    Err(TilesetError::parse(url, "tile has no bounding volume"))
}
