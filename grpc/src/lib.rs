//! The gRPC surface: xDS (SotW + Delta, aggregated and per-type) and LRS.

pub mod callbacks;
pub mod lrs;
pub mod metrics;
pub mod server;

pub use callbacks::{Callbacks, NoopCallbacks};
pub use lrs::{LrsServer, LoadReportingServiceServer};
pub use metrics::{LrsMetrics, XdsMetrics};
pub use server::{ads, typed, XdsServer};
