pub mod api;
pub mod auth;
pub mod engine;
pub mod limits;
pub mod model;
pub mod observability;
pub mod reaper;
pub mod wal;
