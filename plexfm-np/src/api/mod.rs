//! HTTP API handlers for plexfm-np

pub mod health;
pub mod setup;
pub mod webhook;

pub use health::health_routes;
pub use setup::setup_routes;
pub use webhook::webhook_routes;
