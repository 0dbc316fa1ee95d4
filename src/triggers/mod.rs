//! Trigger layer: HTTP endpoints and cron tickers that start runs.

pub mod routes;
pub mod scheduler;

pub use routes::{TriggerState, trigger_routes};
