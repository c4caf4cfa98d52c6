use std::sync::Arc;

use bevy::prelude::*;

use crate::{
    FrameState, ReqwestFetcher, ResourceFetcher, TileEvent, TilesetOptions, TilesetRegistry,
};

/// Camera state the host writes every time the view changes.
#[derive(Resource, Default, Debug, Clone)]
pub struct ViewState {
    pub frame: Option<FrameState>,
}

pub struct TilesetPlugin {
    pub options: TilesetOptions,
    pub fetcher: Arc<dyn ResourceFetcher>,
}

impl Default for TilesetPlugin {
    fn default() -> Self {
        Self {
            options: TilesetOptions::default(),
            fetcher: Arc::new(ReqwestFetcher),
        }
    }
}

impl Plugin for TilesetPlugin {
    fn build(&self, app: &mut App) {
        let options = match self.options.validate() {
            Ok(()) => self.options.clone(),
            Err(e) => {
                error!("{}, falling back to defaults", e);
                TilesetOptions::default()
            }
        };
        app.insert_resource(TilesetRegistry::new(options, self.fetcher.clone()))
            .init_resource::<ViewState>()
            .add_event::<TileEvent>()
            .add_systems(Update, tileset_system);
    }
}

fn tileset_system(
    mut registry: ResMut<TilesetRegistry>,
    view: Res<ViewState>,
    mut tile_events: EventWriter<TileEvent>,
) {
    registry.update();
    if view.is_changed() {
        if let Some(frame) = view.frame.as_ref() {
            registry.evaluate(frame);
        }
    }
    let events = registry.drain_events();
    if !events.is_empty() {
        tile_events.send_batch(events);
    }
}
