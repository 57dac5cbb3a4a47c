//! eventsheet — an event data layer backed by a Google spreadsheet.
//!
//! The library is what the binary serves and what `tests/` drives directly.

use std::sync::Arc;

pub mod api;
pub mod config;
pub mod errors;
pub mod middleware;
pub mod models;
pub mod store;
pub mod writers;

use config::Config;
use store::sheets::SharedStore;
use writers::{AnalyticsWriter, EventWriter, ResultWriter};

/// Shared application state passed to handlers and middleware.
pub struct AppState {
    pub config: Arc<Config>,
    pub store: SharedStore,
    pub events: EventWriter,
    pub results: ResultWriter,
    pub analytics: AnalyticsWriter,
}

impl AppState {
    pub fn new(config: Config, store: SharedStore) -> Self {
        let config = Arc::new(config);
        let analytics = AnalyticsWriter::new(store.clone(), config.environment);
        Self {
            events: EventWriter::new(store.clone(), config.clone()),
            results: ResultWriter::new(store.clone(), Some(analytics.clone())),
            analytics,
            store,
            config,
        }
    }
}
