use bevy::math::DMat4;
use houtu_scene::AxisAlignedBoundingBox;
use serde::Deserialize;
use tile_content_decoder::TileFormat;

use crate::TilePayload;

/// Index of a tile in its tileset's [`crate::TileStorage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum Refine {
    #[default]
    #[serde(rename = "ADD", alias = "add")]
    Add,
    #[serde(rename = "REPLACE", alias = "replace")]
    Replace,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TileLoadState {
    #[default]
    Unloaded,
    Loading,
    Loaded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    /// A nested tileset manifest.
    Tileset,
    Tile(TileFormat),
    /// Decided from the magic of the fetched payload.
    Unknown,
}

impl ContentKind {
    /// Infers the kind from the extension of the url path, ignoring any
    /// query or fragment.
    pub fn from_url(url: &str) -> Self {
        let path = url.split(['?', '#']).next().unwrap_or(url);
        let file = path.rsplit('/').next().unwrap_or(path);
        match file.rsplit_once('.') {
            Some((_, extension)) if extension.eq_ignore_ascii_case("json") => {
                ContentKind::Tileset
            }
            Some((_, extension)) => TileFormat::from_extension(extension)
                .map_or(ContentKind::Unknown, ContentKind::Tile),
            None => ContentKind::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ContentRef {
    /// Fully resolved url.
    pub url: String,
    pub kind: ContentKind,
}

impl ContentRef {
    pub fn new(url: String) -> Self {
        let kind = ContentKind::from_url(&url);
        Self { url, kind }
    }
}

/// The two renderable groups of a tile: its own content and the group its
/// children attach into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TileGroup {
    Own,
    Subtree,
}

#[derive(Debug)]
pub struct Tile {
    pub id: TileId,
    pub parent: Option<TileId>,
    pub children: Vec<TileId>,
    /// Box in the tile's own coordinate system.
    pub bounding_volume: AxisAlignedBoundingBox,
    /// `bounding_volume` under `world_transform`.
    pub world_box: AxisAlignedBoundingBox,
    pub geometric_error: f64,
    pub refine: Refine,
    pub transform: DMat4,
    pub world_transform: DMat4,
    pub content: Option<ContentRef>,
    pub load_state: TileLoadState,
    pub payload: Option<TilePayload>,
    pub own_attached: bool,
    pub subtree_attached: bool,
    /// Root of the external tileset grafted under this tile.
    pub external_root: Option<TileId>,
}

impl Tile {
    pub fn new(
        id: TileId,
        parent: Option<TileId>,
        bounding_volume: AxisAlignedBoundingBox,
        geometric_error: f64,
        refine: Refine,
        transform: DMat4,
        parent_world: &DMat4,
    ) -> Self {
        let world_transform = *parent_world * transform;
        Self {
            id,
            parent,
            children: vec![],
            world_box: bounding_volume.transform(&world_transform),
            bounding_volume,
            geometric_error,
            refine,
            transform,
            world_transform,
            content: None,
            load_state: TileLoadState::Unloaded,
            payload: None,
            own_attached: false,
            subtree_attached: false,
            external_root: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.load_state != TileLoadState::Unloaded
    }

    pub fn group_attached(&self, group: TileGroup) -> bool {
        match group {
            TileGroup::Own => self.own_attached,
            TileGroup::Subtree => self.subtree_attached,
        }
    }

    pub(crate) fn set_group_attached(&mut self, group: TileGroup, attached: bool) -> bool {
        let flag = match group {
            TileGroup::Own => &mut self.own_attached,
            TileGroup::Subtree => &mut self.subtree_attached,
        };
        let changed = *flag != attached;
        *flag = attached;
        changed
    }
}

#[cfg(test)]
mod tests {
    use bevy::math::DVec3;

    use super::*;

    #[test]
    fn kind_from_extension() {
        assert_eq!(
            ContentKind::from_url("http://a.com/t/1.b3dm?key=2"),
            ContentKind::Tile(TileFormat::Batched3dModel)
        );
        assert_eq!(
            ContentKind::from_url("http://a.com/sub/tileset.JSON"),
            ContentKind::Tileset
        );
        assert_eq!(ContentKind::from_url("http://a.com/tile/3"), ContentKind::Unknown);
        assert_eq!(ContentKind::from_url("http://a.com.x/tile.glb"), ContentKind::Unknown);
        assert_eq!(
            ContentKind::from_url("points.pnts#frag"),
            ContentKind::Tile(TileFormat::PointCloud)
        );
    }

    #[test]
    fn world_box_uses_accumulated_transform() {
        let parent_world = DMat4::from_translation(DVec3::new(100.0, 0.0, 0.0));
        let local = DMat4::from_scale(DVec3::splat(2.0));
        let tile = Tile::new(
            TileId(1),
            Some(TileId(0)),
            AxisAlignedBoundingBox::new(DVec3::new(1.0, 0.0, 0.0), DVec3::ONE),
            4.0,
            Refine::Add,
            local,
            &parent_world,
        );
        assert_eq!(tile.world_box.center, DVec3::new(102.0, 0.0, 0.0));
        assert_eq!(tile.world_box.half_extents, DVec3::splat(2.0));
        assert!(!tile.is_active());
    }

    #[test]
    fn group_flags_report_changes() {
        let mut tile = Tile::new(
            TileId(0),
            None,
            AxisAlignedBoundingBox::default(),
            0.0,
            Refine::Add,
            DMat4::IDENTITY,
            &DMat4::IDENTITY,
        );
        assert!(tile.set_group_attached(TileGroup::Own, true));
        assert!(!tile.set_group_attached(TileGroup::Own, true));
        assert!(tile.group_attached(TileGroup::Own));
        assert!(!tile.group_attached(TileGroup::Subtree));
    }
}
