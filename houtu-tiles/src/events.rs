use bevy::prelude::Event;

use crate::{TileGroup, TileId};

/// A renderable group of a tile was attached to or detached from the
/// scene. Hosts redraw on these.
#[derive(Event, Debug, Clone, PartialEq, Eq)]
pub struct TileEvent {
    pub tileset: String,
    pub tile: TileId,
    pub group: TileGroup,
    pub attached: bool,
}
