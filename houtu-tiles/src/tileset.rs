use std::sync::Arc;

use bevy::{
    math::{DMat4, DVec3},
    utils::{HashMap, HashSet},
};
use houtu_jobs::{CancellationToken, JobQueue};
use houtu_scene::{CullingVolume, Intersect, IntersectionTests, Ray};
use serde_json::{Map, Value};
use tile_content_decoder::TileContent;

use crate::{
    content::external_gltf,
    fetch::resolve_url,
    jobs::{ContentOutcome, FetchGltfJob, LoadContentJob, LoadManifestJob, ManifestOutcome},
    ContentKind, DecodeCache, FeatureHit, Lookup, Refine, ResourceFetcher, Tile, TileEvent,
    TileGroup, TileId, TileLoadState, TilePayload, TileStorage, TilesetError, TilesetOptions,
    Waiter,
};

/// What the camera sees this frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameState {
    pub culling_volume: CullingVolume,
    pub camera_position: DVec3,
}

impl FrameState {
    /// Frame state of a camera from its view-projection matrix (clip depth
    /// in `[-1, 1]`).
    pub fn from_view_projection(view_projection: &DMat4, camera_position: DVec3) -> Self {
        Self {
            culling_volume: CullingVolume::from_view_projection(view_projection),
            camera_position,
        }
    }
}

/// One streamed tileset: its tile tree, the jobs loading its content and the
/// attach/detach events for the renderer.
pub struct Tileset {
    id: String,
    url: String,
    version: Option<String>,
    geometric_error: f64,
    tiles: TileStorage,
    root: Option<TileId>,
    error: Option<TilesetError>,
    options: TilesetOptions,
    fetcher: Arc<dyn ResourceFetcher>,
    jobs: JobQueue,
    /// Tiles with a job in flight.
    loading: HashMap<TileId, CancellationToken>,
    /// Decoded instanced tiles waiting for their external glTF.
    awaiting_gltf: HashMap<TileId, TileContent>,
    /// Loading tiles that evaluation no longer wants. Their outcome is kept
    /// but not attached.
    stale: HashSet<TileId>,
    last_frame: Option<FrameState>,
    events: Vec<TileEvent>,
}

impl Tileset {
    /// Creates the tileset and starts loading its manifest.
    pub fn new(
        id: impl Into<String>,
        url: impl Into<String>,
        options: TilesetOptions,
        fetcher: Arc<dyn ResourceFetcher>,
    ) -> Self {
        let mut tileset = Self {
            id: id.into(),
            url: url.into(),
            version: None,
            geometric_error: 0.0,
            tiles: TileStorage::new(),
            root: None,
            error: None,
            options,
            fetcher,
            jobs: JobQueue::new(),
            loading: HashMap::new(),
            awaiting_gltf: HashMap::new(),
            stale: HashSet::new(),
            last_frame: None,
            events: vec![],
        };
        bevy::log::info!("loading tileset '{}' from {}", tileset.id, tileset.url);
        tileset.jobs.spawn(LoadManifestJob {
            fetcher: tileset.fetcher.clone(),
            url: tileset.url.clone(),
            parent: None,
            parent_world: DMat4::IDENTITY,
            refine: Refine::Add,
        });
        tileset
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// `asset.version` of the manifest, once loaded.
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn geometric_error(&self) -> f64 {
        self.geometric_error
    }

    pub fn root(&self) -> Option<TileId> {
        self.root
    }

    /// Why the manifest failed to load. A failed tileset stays empty.
    pub fn error(&self) -> Option<&TilesetError> {
        self.error.as_ref()
    }

    pub fn options(&self) -> &TilesetOptions {
        &self.options
    }

    pub fn tiles(&self) -> &TileStorage {
        &self.tiles
    }

    pub fn get(&self, id: TileId) -> Option<&Tile> {
        self.tiles.get(id)
    }

    pub fn last_frame(&self) -> Option<&FrameState> {
        self.last_frame.as_ref()
    }

    /// No job in flight and no result left to apply.
    pub fn is_idle(&self) -> bool {
        self.jobs.is_idle()
    }

    pub fn drain_events(&mut self) -> Vec<TileEvent> {
        std::mem::take(&mut self.events)
    }

    /// Walks the tree from the root and decides for every reachable tile
    /// whether its content and its children are needed for `frame`.
    pub fn evaluate(&mut self, frame: &FrameState) {
        self.last_frame = Some(frame.clone());
        if let Some(root) = self.root {
            self.evaluate_from(root, frame);
        }
    }

    fn evaluate_from(&mut self, start: TileId, frame: &FrameState) {
        let mut stack = vec![start];
        while let Some(id) = stack.pop() {
            let Some(tile) = self.tiles.get(id) else {
                continue;
            };
            let world_box = tile.world_box;
            let geometric_error = tile.geometric_error;
            let replace = tile.refine == Refine::Replace;
            // the grafted tree hangs off an external tileset tile, so it is
            // always loaded when reached
            let external = matches!(
                tile.content,
                Some(crate::ContentRef {
                    kind: ContentKind::Tileset,
                    ..
                })
            );

            if frame.culling_volume.compute_visibility(&world_box) == Intersect::Outside {
                self.unload_subtree(id);
                continue;
            }
            let distance = world_box.distance_to(&frame.camera_position);
            if geometric_error > 0.0 && distance > geometric_error * self.options.far_factor {
                self.unload_subtree(id);
                continue;
            }

            let near = distance < geometric_error * self.options.near_factor;
            if replace && near && !external {
                self.unload(id, false);
            } else {
                self.load(id);
            }

            if near {
                self.set_attached(id, TileGroup::Subtree, true);
                stack.extend(self.tiles.children(id).iter().rev());
            } else {
                for child in self.tiles.children(id).to_vec() {
                    self.unload(child, true);
                }
            }
        }
    }

    /// Makes the tile's own content available, fetching it if needed.
    pub fn load(&mut self, id: TileId) {
        match self.tiles.load_state(id) {
            Some(TileLoadState::Loaded) => {
                self.set_attached(id, TileGroup::Own, true);
                self.set_attached(id, TileGroup::Subtree, true);
            }
            Some(TileLoadState::Loading) => {
                self.stale.remove(&id);
            }
            Some(TileLoadState::Unloaded) => {
                self.tiles.set_load_state(id, TileLoadState::Loading);
                self.dispatch(id);
            }
            None => {}
        }
    }

    fn dispatch(&mut self, id: TileId) {
        let Some(tile) = self.tiles.get(id) else {
            return;
        };
        let (content, grafted) = (tile.content.clone(), tile.external_root.is_some());
        let (parent_world, refine) = (tile.world_transform, tile.refine);
        let Some(content) = content else {
            self.finish_load(id, None);
            return;
        };
        let token = match content.kind {
            ContentKind::Tileset if grafted => {
                self.finish_load(id, None);
                return;
            }
            ContentKind::Tileset => self.jobs.spawn(LoadManifestJob {
                fetcher: self.fetcher.clone(),
                url: content.url,
                parent: Some(id),
                parent_world,
                refine,
            }),
            kind => self.jobs.spawn(LoadContentJob {
                fetcher: self.fetcher.clone(),
                tile: id,
                url: content.url,
                kind,
            }),
        };
        self.loading.insert(id, token);
    }

    /// Marks the tile Loaded with `payload`. A stale tile stays detached
    /// until evaluation asks for it again.
    fn finish_load(&mut self, id: TileId, payload: Option<TilePayload>) {
        self.loading.remove(&id);
        self.awaiting_gltf.remove(&id);
        self.tiles.set_load_state(id, TileLoadState::Loaded);
        if let Some(tile) = self.tiles.get_mut(id) {
            tile.payload = payload;
        }
        if self.stale.remove(&id) {
            return;
        }
        self.set_attached(id, TileGroup::Own, true);
        self.set_attached(id, TileGroup::Subtree, true);
    }

    fn fail_load(&mut self, id: TileId) {
        self.loading.remove(&id);
        self.awaiting_gltf.remove(&id);
        self.stale.remove(&id);
        self.tiles.set_load_state(id, TileLoadState::Unloaded);
    }

    /// Drops the tile's own content and, with `include_children`, detaches
    /// the group its children render into. Grandchildren are not visited.
    ///
    /// A tile still loading keeps its job and stays Loading, unless
    /// `cancel_stale_loads` is set, in which case the job is cancelled.
    pub fn unload(&mut self, id: TileId, include_children: bool) {
        let loading = self.tiles.load_state(id) == Some(TileLoadState::Loading);
        if loading && !self.options.cancel_stale_loads {
            self.stale.insert(id);
        } else {
            if let Some(token) = self.loading.remove(&id) {
                token.cancel();
            }
            self.awaiting_gltf.remove(&id);
            self.stale.remove(&id);
            if self.tiles.get(id).map_or(false, Tile::is_active) {
                self.tiles.set_load_state(id, TileLoadState::Unloaded);
            }
        }
        self.set_attached(id, TileGroup::Own, false);
        if include_children {
            self.set_attached(id, TileGroup::Subtree, false);
        }
    }

    /// Unloads the tile and every loading or loaded tile below it.
    pub fn unload_subtree(&mut self, id: TileId) {
        self.unload(id, true);
        for tile in self.tiles.active_descendants(id) {
            self.unload(tile, true);
        }
    }

    fn set_attached(&mut self, id: TileId, group: TileGroup, attached: bool) {
        let Some(tile) = self.tiles.get_mut(id) else {
            return;
        };
        if tile.set_group_attached(group, attached) {
            self.events.push(TileEvent {
                tileset: self.id.clone(),
                tile: id,
                group,
                attached,
            });
        }
    }

    /// Whether a finished job for `id` should still be applied.
    fn accepts_outcome(&self, id: TileId, cancelled: bool) -> bool {
        !cancelled && self.tiles.load_state(id) == Some(TileLoadState::Loading)
    }

    /// Applies every finished job. Must be called from the thread that owns
    /// the tileset.
    pub fn update(&mut self, cache: &mut DecodeCache) {
        self.jobs.poll();
        while let Some(outcome) = self.jobs.take_next::<LoadManifestJob>() {
            self.apply_manifest(outcome);
        }
        while let Some(outcome) = self.jobs.take_next::<LoadContentJob>() {
            self.apply_content(outcome, cache);
        }
        while let Some(outcome) = self.jobs.take_next::<FetchGltfJob>() {
            let result = outcome.result.map_err(|e| {
                bevy::log::error!("{}", e);
                e.to_string()
            });
            cache.complete(&outcome.url, result);
        }
        self.apply_resolved(cache);
    }

    /// Applies external glTF fetches that finished for tiles of this
    /// tileset, including fetches started by other tilesets.
    pub fn apply_resolved(&mut self, cache: &mut DecodeCache) {
        for resolved in cache.take_resolved(&self.id) {
            let Some(content) = self.awaiting_gltf.remove(&resolved.tile) else {
                continue;
            };
            if self.tiles.load_state(resolved.tile) != Some(TileLoadState::Loading) {
                continue;
            }
            match resolved.result {
                Ok(gltf) => {
                    let payload = TilePayload::new(content, Some(gltf), &self.options.style);
                    self.finish_load(resolved.tile, Some(payload));
                }
                Err(reason) => {
                    bevy::log::error!(
                        "tile {:?} of '{}' failed to get glTF {}: {}",
                        resolved.tile,
                        self.id,
                        resolved.url,
                        reason
                    );
                    self.fail_load(resolved.tile);
                }
            }
        }
    }

    fn apply_manifest(&mut self, outcome: ManifestOutcome) {
        let Some(parent) = outcome.parent else {
            match outcome.result {
                Ok(loaded) => {
                    bevy::log::info!(
                        "loaded tileset '{}' version {} with {} tiles",
                        self.id,
                        loaded.version,
                        loaded.tiles.len()
                    );
                    self.root = Some(loaded.root());
                    self.version = Some(loaded.version);
                    self.geometric_error = loaded.geometric_error;
                    self.tiles = loaded.tiles;
                    if let Some(frame) = self.last_frame.clone() {
                        self.evaluate(&frame);
                    }
                }
                Err(e) => {
                    bevy::log::error!("failed to load tileset '{}': {}", self.id, e);
                    self.error = Some(e);
                }
            }
            return;
        };

        if !self.accepts_outcome(parent, outcome.cancelled) {
            bevy::log::debug!(
                "dropping external tileset {} for tile {:?} (cancelled: {})",
                outcome.url,
                parent,
                outcome.cancelled
            );
            return;
        }
        match outcome.result {
            Ok(loaded) => {
                let existing = self.tiles.get(parent).and_then(|tile| tile.external_root);
                let root = existing.or_else(|| self.tiles.graft(parent, loaded.tiles));
                let wanted = !self.stale.contains(&parent);
                self.finish_load(parent, None);
                if let (true, Some(root), Some(frame)) = (wanted, root, self.last_frame.clone()) {
                    self.evaluate_from(root, &frame);
                }
            }
            Err(e) => {
                bevy::log::error!(
                    "failed to load external tileset of tile {:?} in '{}': {}",
                    parent,
                    self.id,
                    e
                );
                self.fail_load(parent);
            }
        }
    }

    fn apply_content(&mut self, outcome: ContentOutcome, cache: &mut DecodeCache) {
        let tile = outcome.tile;
        if !self.accepts_outcome(tile, outcome.cancelled) {
            bevy::log::debug!(
                "dropping content {} for tile {:?} (cancelled: {})",
                outcome.url,
                tile,
                outcome.cancelled
            );
            return;
        }
        let content = match outcome.result {
            Ok(content) => content,
            Err(e) => {
                bevy::log::error!("tile {:?} of '{}' failed to load: {}", tile, self.id, e);
                self.fail_load(tile);
                return;
            }
        };

        let Some(reference) = external_gltf(&content).map(str::to_string) else {
            let payload = TilePayload::new(content, None, &self.options.style);
            self.finish_load(tile, Some(payload));
            return;
        };
        let url = resolve_url(&outcome.url, &reference);
        let waiter = Waiter {
            tileset: self.id.clone(),
            tile,
        };
        match cache.request(&url, waiter) {
            Lookup::Hit(gltf) => {
                let payload = TilePayload::new(content, Some(gltf), &self.options.style);
                self.finish_load(tile, Some(payload));
            }
            lookup => {
                if lookup == Lookup::Miss {
                    self.jobs.spawn(FetchGltfJob {
                        fetcher: self.fetcher.clone(),
                        url,
                    });
                }
                self.tiles.set_load_state(tile, TileLoadState::Loading);
                self.awaiting_gltf.insert(tile, content);
            }
        }
    }

    /// Applies finished jobs until none is left in flight.
    #[cfg(not(target_arch = "wasm32"))]
    pub fn wait_for_jobs(&mut self, cache: &mut DecodeCache) {
        loop {
            self.update(cache);
            if !self.jobs.block_on_next() {
                break;
            }
        }
    }

    /// Tiles whose own content is in the scene: the walk from the root only
    /// enters attached subtree groups.
    pub fn rendered(&self) -> Vec<&Tile> {
        let mut rendered = vec![];
        let mut stack = self.root.into_iter().collect::<Vec<_>>();
        while let Some(id) = stack.pop() {
            let Some(tile) = self.tiles.get(id) else {
                continue;
            };
            if tile.own_attached && tile.payload.is_some() {
                rendered.push(tile);
            }
            if tile.subtree_attached {
                stack.extend(tile.children.iter().rev());
            }
        }
        rendered
    }

    /// The nearest rendered tile whose world box `ray` hits.
    pub fn pick(&self, ray: &Ray) -> Option<FeatureHit> {
        let (tile, distance) = self
            .rendered()
            .into_iter()
            .filter_map(|tile| {
                IntersectionTests::ray_aabb(ray, &tile.world_box)
                    .map(|interval| (tile, interval.start))
            })
            .min_by(|a, b| a.1.total_cmp(&b.1))?;
        Some(FeatureHit {
            tileset: self.id.clone(),
            tile: tile.id,
            url: tile.content.as_ref()?.url.clone(),
            distance,
            position: ray.get_point(distance),
            batch_table: tile.payload.as_ref()?.batch_table().clone(),
        })
    }

    /// All batch table properties of feature `batch_id` in a loaded tile.
    pub fn feature(&self, tile: TileId, batch_id: usize) -> Option<Map<String, Value>> {
        let payload = self.tiles.get(tile)?.payload.as_ref()?;
        Some(payload.batch_table().feature(batch_id))
    }
}

#[cfg(test)]
mod tests {
    use bevy::math::DVec3;
    use houtu_scene::PerspectiveFrustum;
    use tile_content_decoder::{TileBody, TileBuilder, TileFormat};

    use super::*;
    use crate::fetch::mock::MockFetcher;

    const BASE: &str = "http://example.com/tiles/";

    fn url(path: &str) -> String {
        format!("{}{}", BASE, path)
    }

    /// Camera on the +z axis looking down at the origin.
    fn looking_at_origin(z: f64) -> FrameState {
        let camera_position = DVec3::new(0.0, 0.0, z);
        FrameState {
            culling_volume: PerspectiveFrustum::default().compute_culling_volume(
                &camera_position,
                &DVec3::NEG_Z,
                &DVec3::Y,
            ),
            camera_position,
        }
    }

    /// Same camera turned away from the origin.
    fn looking_away(z: f64) -> FrameState {
        let camera_position = DVec3::new(0.0, 0.0, z);
        FrameState {
            culling_volume: PerspectiveFrustum::default().compute_culling_volume(
                &camera_position,
                &DVec3::Z,
                &DVec3::Y,
            ),
            camera_position,
        }
    }

    fn b3dm(name: &str) -> Vec<u8> {
        let batch_table = format!(r#"{{"name":["{}-0","{}-1"],"height":[1.5,2.5]}}"#, name, name);
        TileBuilder::new(TileFormat::Batched3dModel)
            .feature_table(br#"{"BATCH_LENGTH":2}"#, &[])
            .batch_table(batch_table.as_bytes(), &[])
            .body(b"glTF")
            .build()
    }

    fn i3dm_external(gltf: &str) -> Vec<u8> {
        let binary = [0f32; 9]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect::<Vec<_>>();
        TileBuilder::new(TileFormat::Instanced3dModel)
            .gltf_format(0)
            .feature_table(
                br#"{"INSTANCES_LENGTH":1,"POSITION":{"byteOffset":0},"NORMAL_RIGHT":{"byteOffset":12},"NORMAL_UP":{"byteOffset":24}}"#,
                &binary,
            )
            .body(gltf.as_bytes())
            .build()
    }

    fn unit_box(x: f64, half: f64) -> String {
        format!("[{},0,0, {},0,0, 0,{},0, 0,0,{}]", x, half, half, half)
    }

    /// Root box of half size 10 at the origin with two leaves side by side.
    fn two_leaf_manifest(refine: &str, root_content: &str, leaves: [&str; 2]) -> String {
        format!(
            r#"{{
                "asset": {{"version": "1.0"}},
                "geometricError": 100,
                "root": {{
                    "boundingVolume": {{"box": {}}},
                    "geometricError": 10,
                    "refine": "{}",
                    "content": {{"uri": "{}"}},
                    "children": [
                        {{"boundingVolume": {{"box": {}}}, "geometricError": 0, "content": {{"uri": "{}"}}}},
                        {{"boundingVolume": {{"box": {}}}, "geometricError": 0, "content": {{"uri": "{}"}}}}
                    ]
                }}
            }}"#,
            unit_box(0.0, 10.0),
            refine,
            root_content,
            unit_box(-5.0, 5.0),
            leaves[0],
            unit_box(5.0, 5.0),
            leaves[1],
        )
    }

    fn fetcher_with_models(manifest: String) -> MockFetcher {
        MockFetcher::new()
            .with(&url("tileset.json"), manifest)
            .with(&url("root.b3dm"), b3dm("root"))
            .with(&url("a.b3dm"), b3dm("a"))
            .with(&url("b.b3dm"), b3dm("b"))
    }

    fn tileset(fetcher: &MockFetcher, options: TilesetOptions) -> Tileset {
        Tileset::new("test", url("tileset.json"), options, Arc::new(fetcher.clone()))
    }

    fn states(tileset: &Tileset) -> Vec<TileLoadState> {
        tileset.tiles().iter().map(|tile| tile.load_state).collect()
    }

    #[test]
    fn replace_root_gives_way_to_children_when_near() {
        let fetcher = fetcher_with_models(two_leaf_manifest("REPLACE", "root.b3dm", ["a.b3dm", "b.b3dm"]));
        let mut cache = DecodeCache::new(8);
        let mut tileset = tileset(&fetcher, TilesetOptions::default());
        // dist 90 < 10 * 20
        tileset.evaluate(&looking_at_origin(100.0));
        tileset.wait_for_jobs(&mut cache);

        assert_eq!(tileset.version(), Some("1.0"));
        assert_eq!(
            states(&tileset),
            vec![
                TileLoadState::Unloaded,
                TileLoadState::Loaded,
                TileLoadState::Loaded
            ]
        );
        assert_eq!(fetcher.requests(&url("root.b3dm")), 0);
        let root = tileset.get(TileId(0)).unwrap();
        assert!(!root.own_attached);
        assert!(root.subtree_attached);
        assert!(tileset.get(TileId(1)).unwrap().own_attached);
        assert!(tileset.get(TileId(1)).unwrap().payload.is_some());
    }

    #[test]
    fn add_root_keeps_own_content_when_near() {
        let fetcher = fetcher_with_models(two_leaf_manifest("ADD", "root.b3dm", ["a.b3dm", "b.b3dm"]));
        let mut cache = DecodeCache::new(8);
        let mut tileset = tileset(&fetcher, TilesetOptions::default());
        tileset.evaluate(&looking_at_origin(100.0));
        tileset.wait_for_jobs(&mut cache);
        assert_eq!(states(&tileset), vec![TileLoadState::Loaded; 3]);
        assert_eq!(fetcher.total_requests(), 4);
    }

    #[test]
    fn refinement_stops_between_near_and_far() {
        let fetcher = fetcher_with_models(two_leaf_manifest("REPLACE", "root.b3dm", ["a.b3dm", "b.b3dm"]));
        let mut cache = DecodeCache::new(8);
        let mut tileset = tileset(&fetcher, TilesetOptions::default());
        // 200 < dist 290 < 500
        tileset.evaluate(&looking_at_origin(300.0));
        tileset.wait_for_jobs(&mut cache);
        assert_eq!(
            states(&tileset),
            vec![
                TileLoadState::Loaded,
                TileLoadState::Unloaded,
                TileLoadState::Unloaded
            ]
        );
        assert!(!tileset.get(TileId(1)).unwrap().own_attached);
        assert!(!tileset.get(TileId(2)).unwrap().own_attached);
    }

    #[test]
    fn far_tiles_are_unloaded() {
        let fetcher = fetcher_with_models(two_leaf_manifest("ADD", "root.b3dm", ["a.b3dm", "b.b3dm"]));
        let mut cache = DecodeCache::new(8);
        let mut tileset = tileset(&fetcher, TilesetOptions::default());
        tileset.evaluate(&looking_at_origin(100.0));
        tileset.wait_for_jobs(&mut cache);
        assert_eq!(states(&tileset), vec![TileLoadState::Loaded; 3]);

        // dist 990 > 10 * 50
        tileset.evaluate(&looking_at_origin(1000.0));
        assert_eq!(states(&tileset), vec![TileLoadState::Unloaded; 3]);
        assert!(tileset.get(TileId(0)).unwrap().payload.is_none());
        assert_eq!(tileset.tiles().active_len(), 0);
    }

    #[test]
    fn culled_tiles_unload_with_their_subtree() {
        let fetcher = fetcher_with_models(two_leaf_manifest("ADD", "root.b3dm", ["a.b3dm", "b.b3dm"]));
        let mut cache = DecodeCache::new(8);
        let mut tileset = tileset(&fetcher, TilesetOptions::default());
        tileset.evaluate(&looking_at_origin(100.0));
        tileset.wait_for_jobs(&mut cache);
        tileset.drain_events();

        tileset.evaluate(&looking_away(100.0));
        assert_eq!(states(&tileset), vec![TileLoadState::Unloaded; 3]);
        let events = tileset.drain_events();
        assert!(events.iter().all(|event| !event.attached));
        assert!(events.contains(&TileEvent {
            tileset: "test".to_string(),
            tile: TileId(0),
            group: TileGroup::Subtree,
            attached: false,
        }));
        assert!(events
            .iter()
            .any(|event| event.tile == TileId(2) && event.group == TileGroup::Own));
    }

    #[test]
    fn evaluate_is_idempotent() {
        let fetcher = fetcher_with_models(two_leaf_manifest("REPLACE", "root.b3dm", ["a.b3dm", "b.b3dm"]));
        let mut cache = DecodeCache::new(8);
        let mut tileset = tileset(&fetcher, TilesetOptions::default());
        let frame = looking_at_origin(100.0);
        tileset.evaluate(&frame);
        tileset.wait_for_jobs(&mut cache);
        let before = states(&tileset);
        let requests = fetcher.total_requests();
        tileset.drain_events();

        tileset.evaluate(&frame);
        tileset.wait_for_jobs(&mut cache);
        assert_eq!(states(&tileset), before);
        assert_eq!(fetcher.total_requests(), requests);
        assert!(tileset.drain_events().is_empty());
    }

    #[test]
    fn failed_tile_stays_unloaded_without_stopping_traversal() {
        let fetcher = MockFetcher::new()
            .with(
                &url("tileset.json"),
                two_leaf_manifest("ADD", "root.b3dm", ["missing.b3dm", "b.b3dm"]),
            )
            .with(&url("root.b3dm"), b3dm("root"))
            .with(&url("b.b3dm"), b3dm("b"));
        let mut cache = DecodeCache::new(8);
        let mut tileset = tileset(&fetcher, TilesetOptions::default());
        tileset.evaluate(&looking_at_origin(100.0));
        tileset.wait_for_jobs(&mut cache);
        assert_eq!(
            states(&tileset),
            vec![
                TileLoadState::Loaded,
                TileLoadState::Unloaded,
                TileLoadState::Loaded
            ]
        );
        assert!(tileset.error().is_none());
    }

    #[test]
    fn unreachable_manifest_leaves_tileset_inert() {
        let fetcher = MockFetcher::new();
        let mut cache = DecodeCache::new(8);
        let mut tileset = tileset(&fetcher, TilesetOptions::default());
        tileset.wait_for_jobs(&mut cache);
        assert!(matches!(
            tileset.error(),
            Some(TilesetError::Network { .. })
        ));
        assert_eq!(tileset.root(), None);

        tileset.evaluate(&looking_at_origin(100.0));
        tileset.wait_for_jobs(&mut cache);
        assert!(tileset.drain_events().is_empty());
        assert_eq!(fetcher.total_requests(), 1);
    }

    #[test]
    fn shared_external_gltf_is_fetched_once() {
        let fetcher = MockFetcher::new()
            .with(
                &url("tileset.json"),
                two_leaf_manifest("ADD", "root.b3dm", ["a.i3dm", "b.i3dm"]),
            )
            .with(&url("root.b3dm"), b3dm("root"))
            .with(&url("a.i3dm"), i3dm_external("model.glb"))
            .with(&url("b.i3dm"), i3dm_external("model.glb"))
            .with(&url("model.glb"), &b"glTF shared"[..]);
        let mut cache = DecodeCache::new(8);
        let mut tileset = tileset(&fetcher, TilesetOptions::default());
        tileset.evaluate(&looking_at_origin(100.0));
        tileset.wait_for_jobs(&mut cache);

        assert_eq!(fetcher.requests(&url("model.glb")), 1);
        assert!(cache.contains(&url("model.glb")));
        for id in [TileId(1), TileId(2)] {
            let tile = tileset.get(id).unwrap();
            assert_eq!(tile.load_state, TileLoadState::Loaded);
            let payload = tile.payload.as_ref().unwrap();
            assert!(matches!(payload.content.body, TileBody::Instanced(_)));
            assert_eq!(payload.gltf(), Some(&b"glTF shared"[..]));
        }
    }

    #[test]
    fn missing_external_gltf_fails_every_waiter() {
        let fetcher = MockFetcher::new()
            .with(
                &url("tileset.json"),
                two_leaf_manifest("ADD", "root.b3dm", ["a.i3dm", "b.i3dm"]),
            )
            .with(&url("root.b3dm"), b3dm("root"))
            .with(&url("a.i3dm"), i3dm_external("model.glb"))
            .with(&url("b.i3dm"), i3dm_external("model.glb"));
        let mut cache = DecodeCache::new(8);
        let mut tileset = tileset(&fetcher, TilesetOptions::default());
        tileset.evaluate(&looking_at_origin(100.0));
        tileset.wait_for_jobs(&mut cache);
        assert_eq!(
            states(&tileset),
            vec![
                TileLoadState::Loaded,
                TileLoadState::Unloaded,
                TileLoadState::Unloaded
            ]
        );
        assert!(fetcher.requests(&url("model.glb")) >= 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn external_tileset_is_grafted_once() {
        let nested = r#"{
            "asset": {"version": "1.0"},
            "geometricError": 10,
            "root": {
                "boundingVolume": {"box": [0,0,0, 5,0,0, 0,5,0, 0,0,5]},
                "geometricError": 0,
                "content": {"uri": "0.b3dm"}
            }
        }"#;
        let manifest = format!(
            r#"{{
                "asset": {{"version": "1.0"}},
                "geometricError": 100,
                "root": {{
                    "boundingVolume": {{"box": {}}},
                    "geometricError": 10,
                    "refine": "REPLACE",
                    "content": {{"uri": "nested/tileset.json"}}
                }}
            }}"#,
            unit_box(0.0, 10.0)
        );
        let fetcher = MockFetcher::new()
            .with(&url("tileset.json"), manifest)
            .with(&url("nested/tileset.json"), nested)
            .with(&url("nested/0.b3dm"), b3dm("nested"));
        let mut cache = DecodeCache::new(8);
        let mut tileset = tileset(&fetcher, TilesetOptions::default());
        tileset.evaluate(&looking_at_origin(100.0));
        tileset.wait_for_jobs(&mut cache);

        let root = tileset.get(TileId(0)).unwrap();
        assert_eq!(root.load_state, TileLoadState::Loaded);
        let grafted = root.external_root.unwrap();
        assert_eq!(root.children, vec![grafted]);
        let grafted_tile = tileset.get(grafted).unwrap();
        assert_eq!(grafted_tile.refine, Refine::Replace);
        assert_eq!(grafted_tile.load_state, TileLoadState::Loaded);

        tileset.evaluate(&looking_away(100.0));
        assert_eq!(tileset.tiles().active_len(), 0);
        tileset.evaluate(&looking_at_origin(100.0));
        tileset.wait_for_jobs(&mut cache);
        assert_eq!(fetcher.requests(&url("nested/tileset.json")), 1);
        assert_eq!(tileset.tiles().len(), 2);
        assert_eq!(
            tileset.get(grafted).unwrap().load_state,
            TileLoadState::Loaded
        );
    }

    #[test]
    fn stale_loads_complete_unless_cancelled() {
        let manifest = two_leaf_manifest("ADD", "root.b3dm", ["a.b3dm", "b.b3dm"]);

        let fetcher = fetcher_with_models(manifest.clone());
        let mut cache = DecodeCache::new(8);
        let mut parity = tileset(&fetcher, TilesetOptions::default());
        parity.wait_for_jobs(&mut cache);
        parity.evaluate(&looking_at_origin(100.0));
        parity.evaluate(&looking_away(100.0));
        assert_eq!(states(&parity), vec![TileLoadState::Loading; 3]);
        parity.wait_for_jobs(&mut cache);
        let root = parity.get(TileId(0)).unwrap();
        assert_eq!(root.load_state, TileLoadState::Loaded);
        assert!(!root.own_attached);
        assert!(parity.rendered().is_empty());

        // the next evaluation that wants the tile attaches it without a fetch
        parity.evaluate(&looking_at_origin(100.0));
        assert!(parity.get(TileId(0)).unwrap().own_attached);
        assert_eq!(fetcher.requests(&url("root.b3dm")), 1);

        let fetcher = fetcher_with_models(manifest);
        let options = TilesetOptions {
            cancel_stale_loads: true,
            ..Default::default()
        };
        let mut cancelling = tileset(&fetcher, options);
        cancelling.wait_for_jobs(&mut cache);
        cancelling.evaluate(&looking_at_origin(100.0));
        cancelling.evaluate(&looking_away(100.0));
        cancelling.wait_for_jobs(&mut cache);
        assert_eq!(states(&cancelling), vec![TileLoadState::Unloaded; 3]);
    }

    #[test]
    fn tile_requested_again_while_loading_is_fetched_once() {
        let fetcher = fetcher_with_models(two_leaf_manifest("ADD", "root.b3dm", ["a.b3dm", "b.b3dm"]));
        let mut cache = DecodeCache::new(8);
        let mut tileset = tileset(&fetcher, TilesetOptions::default());
        tileset.wait_for_jobs(&mut cache);

        tileset.evaluate(&looking_at_origin(100.0));
        tileset.evaluate(&looking_away(100.0));
        tileset.evaluate(&looking_at_origin(100.0));
        tileset.wait_for_jobs(&mut cache);

        for name in ["root.b3dm", "a.b3dm", "b.b3dm"] {
            assert_eq!(fetcher.requests(&url(name)), 1, "{}", name);
        }
        assert_eq!(states(&tileset), vec![TileLoadState::Loaded; 3]);
        assert!(tileset.tiles().iter().all(|tile| tile.own_attached));
    }

    /// Four tiles stacked at the origin with geometric errors 10, 1, 1, 0.5;
    /// the leaf sits beside the others at x = 3.
    fn chain_manifest() -> String {
        format!(
            r#"{{
                "asset": {{"version": "1.0"}},
                "geometricError": 100,
                "root": {{
                    "boundingVolume": {{"box": {}}},
                    "geometricError": 10,
                    "content": {{"uri": "root.b3dm"}},
                    "children": [{{
                        "boundingVolume": {{"box": {}}},
                        "geometricError": 1,
                        "content": {{"uri": "a.b3dm"}},
                        "children": [{{
                            "boundingVolume": {{"box": {}}},
                            "geometricError": 1,
                            "content": {{"uri": "b.b3dm"}},
                            "children": [{{
                                "boundingVolume": {{"box": {}}},
                                "geometricError": 0.5,
                                "content": {{"uri": "leaf.b3dm"}}
                            }}]
                        }}]
                    }}]
                }}
            }}"#,
            unit_box(0.0, 1.0),
            unit_box(0.0, 1.0),
            unit_box(0.0, 1.0),
            unit_box(3.0, 1.0),
        )
    }

    #[test]
    fn pick_skips_tiles_under_detached_subtrees() {
        let fetcher = fetcher_with_models(chain_manifest()).with(&url("leaf.b3dm"), b3dm("leaf"));
        let mut cache = DecodeCache::new(8);
        let mut tileset = tileset(&fetcher, TilesetOptions::default());
        let at_leaf = Ray::new(DVec3::new(3.5, 0.0, 100.0), DVec3::NEG_Z);

        tileset.evaluate(&looking_at_origin(15.0));
        tileset.wait_for_jobs(&mut cache);
        assert_eq!(states(&tileset), vec![TileLoadState::Loaded; 4]);
        assert_eq!(tileset.pick(&at_leaf).map(|hit| hit.tile), Some(TileId(3)));

        // tile 1 stops refining: tile 2 is unloaded with its subtree group,
        // the leaf below it is left loaded but out of the scene
        tileset.evaluate(&looking_at_origin(40.0));
        let parent = tileset.get(TileId(2)).unwrap();
        assert_eq!(parent.load_state, TileLoadState::Unloaded);
        assert!(!parent.subtree_attached);
        assert!(tileset.get(TileId(3)).unwrap().own_attached);

        assert!(tileset.pick(&at_leaf).is_none());
        let rendered = tileset.rendered().iter().map(|tile| tile.id).collect::<Vec<_>>();
        assert_eq!(rendered, vec![TileId(0), TileId(1)]);
    }

    #[test]
    fn pick_returns_nearest_rendered_feature() {
        let fetcher = fetcher_with_models(two_leaf_manifest("REPLACE", "root.b3dm", ["a.b3dm", "b.b3dm"]));
        let mut cache = DecodeCache::new(8);
        let mut tileset = tileset(&fetcher, TilesetOptions::default());
        tileset.evaluate(&looking_at_origin(100.0));
        tileset.wait_for_jobs(&mut cache);

        let ray = Ray::new(DVec3::new(5.0, 0.0, 100.0), DVec3::NEG_Z);
        let hit = tileset.pick(&ray).unwrap();
        assert_eq!(hit.tile, TileId(2));
        assert_eq!(hit.url, url("b.b3dm"));
        assert!((hit.distance - 95.0).abs() < 1e-9);
        assert!((hit.position - DVec3::new(5.0, 0.0, 5.0)).length() < 1e-9);
        assert_eq!(hit.property(1, "name"), Some(serde_json::json!("b-1")));
        assert_eq!(
            tileset
                .feature(TileId(1), 0)
                .and_then(|feature| feature.get("height").cloned()),
            Some(serde_json::json!(1.5))
        );

        let miss = Ray::new(DVec3::new(500.0, 0.0, 100.0), DVec3::NEG_Z);
        assert!(tileset.pick(&miss).is_none());
    }
}
