use std::sync::Arc;

use bevy::{prelude::Resource, utils::HashMap};

use crate::{
    DecodeCache, FrameState, ReqwestFetcher, ResourceFetcher, TileEvent, Tileset, TilesetOptions,
};

/// Every tileset of the scene by id, plus the decode cache they share.
#[derive(Resource)]
pub struct TilesetRegistry {
    tilesets: HashMap<String, Tileset>,
    cache: DecodeCache,
    options: TilesetOptions,
    fetcher: Arc<dyn ResourceFetcher>,
}

impl Default for TilesetRegistry {
    fn default() -> Self {
        Self::new(TilesetOptions::default(), Arc::new(ReqwestFetcher))
    }
}

impl TilesetRegistry {
    pub fn new(options: TilesetOptions, fetcher: Arc<dyn ResourceFetcher>) -> Self {
        Self {
            tilesets: HashMap::new(),
            cache: DecodeCache::new(options.decode_cache_capacity),
            options,
            fetcher,
        }
    }

    pub fn options(&self) -> &TilesetOptions {
        &self.options
    }

    /// Starts loading the tileset at `url` under `id`, replacing any tileset
    /// already registered with that id.
    pub fn add(&mut self, id: impl Into<String>, url: impl Into<String>) -> &mut Tileset {
        let id = id.into();
        if self.remove(&id).is_some() {
            bevy::log::warn!("replacing tileset '{}'", id);
        }
        let tileset = Tileset::new(id.clone(), url, self.options.clone(), self.fetcher.clone());
        self.tilesets.entry(id).or_insert(tileset)
    }

    pub fn remove(&mut self, id: &str) -> Option<Tileset> {
        let tileset = self.tilesets.remove(id)?;
        self.cache.forget_tileset(id);
        Some(tileset)
    }

    pub fn get(&self, id: &str) -> Option<&Tileset> {
        self.tilesets.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Tileset> {
        self.tilesets.get_mut(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.tilesets.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.tilesets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tilesets.is_empty()
    }

    pub fn decode_cache(&self) -> &DecodeCache {
        &self.cache
    }

    pub fn evaluate(&mut self, frame: &FrameState) {
        for tileset in self.tilesets.values_mut() {
            tileset.evaluate(frame);
        }
    }

    /// Applies finished jobs of every tileset.
    pub fn update(&mut self) {
        for tileset in self.tilesets.values_mut() {
            tileset.update(&mut self.cache);
        }
        // a fetch finished by one tileset may complete tiles of another
        if self.cache.has_resolved() {
            for tileset in self.tilesets.values_mut() {
                tileset.apply_resolved(&mut self.cache);
            }
        }
    }

    #[cfg(not(target_arch = "wasm32"))]
    pub fn wait_for_jobs(&mut self) {
        loop {
            for tileset in self.tilesets.values_mut() {
                tileset.wait_for_jobs(&mut self.cache);
            }
            for tileset in self.tilesets.values_mut() {
                tileset.apply_resolved(&mut self.cache);
            }
            if self.tilesets.values().all(Tileset::is_idle) {
                break;
            }
        }
    }

    pub fn drain_events(&mut self) -> Vec<TileEvent> {
        self.tilesets
            .values_mut()
            .flat_map(Tileset::drain_events)
            .collect()
    }
}
