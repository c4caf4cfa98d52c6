use bevy::utils::HashSet;

use crate::{Tile, TileId, TileLoadState};

/// Arena holding every tile of a tileset. Tiles are never removed, so a
/// [`TileId`] stays valid for the life of the storage.
#[derive(Debug, Default)]
pub struct TileStorage {
    tiles: Vec<Tile>,
    /// Tiles that are Loading or Loaded.
    active: HashSet<TileId>,
    /// Per tile, how many of its descendants are active.
    active_below: Vec<usize>,
}

impl TileStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    pub fn next_id(&self) -> TileId {
        TileId(self.tiles.len())
    }

    /// Adds `tile` and links it under its parent.
    pub fn add(&mut self, mut tile: Tile) -> TileId {
        let id = self.next_id();
        tile.id = id;
        if let Some(parent) = tile.parent.and_then(|parent| self.get_mut(parent)) {
            parent.children.push(id);
        }
        self.tiles.push(tile);
        self.active_below.push(0);
        id
    }

    pub fn get(&self, id: TileId) -> Option<&Tile> {
        self.tiles.get(id.0)
    }

    pub fn get_mut(&mut self, id: TileId) -> Option<&mut Tile> {
        self.tiles.get_mut(id.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Tile> {
        self.tiles.iter()
    }

    pub fn children(&self, id: TileId) -> &[TileId] {
        self.get(id).map_or(&[][..], |tile| tile.children.as_slice())
    }

    pub fn load_state(&self, id: TileId) -> Option<TileLoadState> {
        self.get(id).map(|tile| tile.load_state)
    }

    pub fn set_load_state(&mut self, id: TileId, state: TileLoadState) {
        let Some(tile) = self.tiles.get_mut(id.0) else {
            return;
        };
        tile.load_state = state;
        if state == TileLoadState::Unloaded {
            tile.payload = None;
            if self.active.remove(&id) {
                self.count_active_below(id, false);
            }
        } else if self.active.insert(id) {
            self.count_active_below(id, true);
        }
    }

    fn count_active_below(&mut self, id: TileId, added: bool) {
        let mut current = self.get(id).and_then(|tile| tile.parent);
        while let Some(ancestor) = current {
            if let Some(count) = self.active_below.get_mut(ancestor.0) {
                *count = if added {
                    *count + 1
                } else {
                    count.saturating_sub(1)
                };
            }
            current = self.get(ancestor).and_then(|tile| tile.parent);
        }
    }

    /// Active tiles strictly below `id`. Subtrees without active tiles are
    /// not entered.
    pub fn active_descendants(&self, id: TileId) -> Vec<TileId> {
        let mut found = vec![];
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if self.active_below.get(current.0).copied().unwrap_or(0) == 0 {
                continue;
            }
            for &child in self.children(current) {
                if self.active.contains(&child) {
                    found.push(child);
                }
                stack.push(child);
            }
        }
        found
    }

    pub fn active_len(&self) -> usize {
        self.active.len()
    }

    /// Moves every tile of `subtree` into this storage under `parent` and
    /// returns the new id of the subtree root. `subtree` must be rooted at
    /// its first tile.
    pub fn graft(&mut self, parent: TileId, subtree: TileStorage) -> Option<TileId> {
        if subtree.is_empty() || self.get(parent).is_none() {
            return None;
        }
        let offset = self.tiles.len();
        let remap = |id: TileId| TileId(id.0 + offset);
        let root = remap(TileId(0));
        let mut grafted_active = vec![];
        for mut tile in subtree.tiles {
            tile.id = remap(tile.id);
            tile.parent = Some(tile.parent.map_or(parent, remap));
            tile.children = tile.children.into_iter().map(remap).collect();
            if tile.is_active() {
                grafted_active.push(tile.id);
            }
            self.tiles.push(tile);
            self.active_below.push(0);
        }
        if let Some(parent) = self.get_mut(parent) {
            parent.children.push(root);
            parent.external_root = Some(root);
        }
        for id in grafted_active {
            if self.active.insert(id) {
                self.count_active_below(id, true);
            }
        }
        Some(root)
    }
}
