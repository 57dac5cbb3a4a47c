//! The three writers sitting between HTTP handlers and the row store.

pub mod analytics;
pub mod events;
pub mod results;

pub use analytics::AnalyticsWriter;
pub use events::EventWriter;
pub use results::ResultWriter;
