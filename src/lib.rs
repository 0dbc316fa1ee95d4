//! Feed Curator: selects popular posts and re-publishes them.

pub mod config;
pub mod error;
pub mod pipeline;
pub mod platform;
pub mod store;
pub mod triggers;
