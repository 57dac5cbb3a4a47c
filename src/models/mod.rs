pub mod analytics;
pub mod event;
