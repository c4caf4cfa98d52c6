use std::sync::Arc;

use bevy::utils::HashMap;
use bytes::Bytes;

use crate::TileId;

/// A tile waiting for an external payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Waiter {
    pub tileset: String,
    pub tile: TileId,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    Hit(Arc<Bytes>),
    /// Another tile already started the fetch; the caller was queued.
    Pending,
    /// Nothing cached or in flight; the caller must fetch and report back
    /// with [`DecodeCache::complete`].
    Miss,
}

/// Outcome of a fetch for one waiting tile.
#[derive(Debug, Clone)]
pub struct Resolved {
    pub tile: TileId,
    pub url: String,
    pub result: Result<Arc<Bytes>, String>,
}

#[derive(Debug)]
struct Entry {
    payload: Arc<Bytes>,
    last_used: u64,
}

#[derive(Debug)]
struct Pending {
    owner: String,
    waiters: Vec<Waiter>,
}

/// External glTF payloads shared by instanced tiles, keyed by resolved url.
///
/// Only touched from the thread driving the tilesets, so a url is fetched
/// once no matter how many tiles ask for it at the same time.
#[derive(Debug)]
pub struct DecodeCache {
    entries: HashMap<String, Entry>,
    pending: HashMap<String, Pending>,
    resolved: HashMap<String, Vec<Resolved>>,
    capacity: usize,
    clock: u64,
}

impl DecodeCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            pending: HashMap::new(),
            resolved: HashMap::new(),
            capacity,
            clock: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, url: &str) -> bool {
        self.entries.contains_key(url)
    }

    pub fn is_pending(&self, url: &str) -> bool {
        self.pending.contains_key(url)
    }

    pub fn get(&mut self, url: &str) -> Option<Arc<Bytes>> {
        self.clock += 1;
        let entry = self.entries.get_mut(url)?;
        entry.last_used = self.clock;
        Some(entry.payload.clone())
    }

    /// Looks `url` up on behalf of `waiter`.
    pub fn request(&mut self, url: &str, waiter: Waiter) -> Lookup {
        if let Some(payload) = self.get(url) {
            return Lookup::Hit(payload);
        }
        match self.pending.get_mut(url) {
            Some(pending) => {
                if !pending.waiters.contains(&waiter) {
                    pending.waiters.push(waiter);
                }
                Lookup::Pending
            }
            None => {
                self.pending.insert(
                    url.to_string(),
                    Pending {
                        owner: waiter.tileset.clone(),
                        waiters: vec![waiter],
                    },
                );
                Lookup::Miss
            }
        }
    }

    /// Stores the result of the fetch for `url` and queues it for every
    /// waiter.
    pub fn complete(&mut self, url: &str, result: Result<Bytes, String>) {
        let result = result.map(Arc::new);
        if let Ok(payload) = &result {
            self.insert(url, payload.clone());
        }
        let Some(pending) = self.pending.remove(url) else {
            return;
        };
        self.resolve(url, pending.waiters, result);
    }

    fn resolve(&mut self, url: &str, waiters: Vec<Waiter>, result: Result<Arc<Bytes>, String>) {
        for waiter in waiters {
            self.resolved
                .entry(waiter.tileset)
                .or_default()
                .push(Resolved {
                    tile: waiter.tile,
                    url: url.to_string(),
                    result: result.clone(),
                });
        }
    }

    pub fn insert(&mut self, url: &str, payload: Arc<Bytes>) {
        self.clock += 1;
        self.entries.insert(
            url.to_string(),
            Entry {
                payload,
                last_used: self.clock,
            },
        );
        self.evict();
    }

    fn evict(&mut self) {
        while self.entries.len() > self.capacity {
            let Some(oldest) = self
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_used)
                .map(|(url, _)| url.clone())
            else {
                return;
            };
            bevy::log::debug!("evicting {} from the decode cache", oldest);
            self.entries.remove(&oldest);
        }
    }

    /// Results waiting to be applied to the tiles of `tileset`.
    pub fn take_resolved(&mut self, tileset: &str) -> Vec<Resolved> {
        self.resolved.remove(tileset).unwrap_or_default()
    }

    pub fn has_resolved(&self) -> bool {
        !self.resolved.is_empty()
    }

    /// Drops everything queued for `tileset`. Fetches it started will never
    /// report back, so tiles of other tilesets waiting on them fail and may
    /// retry.
    pub fn forget_tileset(&mut self, tileset: &str) {
        self.resolved.remove(tileset);
        let abandoned = self
            .pending
            .iter()
            .filter(|(_, pending)| pending.owner == tileset)
            .map(|(url, _)| url.clone())
            .collect::<Vec<_>>();
        for url in abandoned {
            if let Some(pending) = self.pending.remove(&url) {
                let waiters = pending
                    .waiters
                    .into_iter()
                    .filter(|waiter| waiter.tileset != tileset)
                    .collect();
                self.resolve(&url, waiters, Err("fetch abandoned".to_string()));
            }
        }
        for pending in self.pending.values_mut() {
            pending.waiters.retain(|waiter| waiter.tileset != tileset);
        }
    }
}
