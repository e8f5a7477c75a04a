pub mod api;
pub mod config;
pub mod metrics_server;
pub mod observability;
pub mod pipeline;
pub mod reset_sweep;
pub mod sinks;
pub mod sources;
pub mod state;
pub mod transform;

pub use pipeline::{Envelope, Pipeline};
