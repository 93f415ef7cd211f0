use std::sync::Arc;

use crate::{
    config::Config, presence::PresenceTracker, store::DocumentStore, websocket::ConnectionRegistry,
};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn DocumentStore>,
    pub registry: ConnectionRegistry,
    pub presence: PresenceTracker,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(store: Arc<dyn DocumentStore>, config: Config) -> Self {
        Self {
            store,
            registry: ConnectionRegistry::new(),
            presence: PresenceTracker::new(),
            config: Arc::new(config),
        }
    }
}
