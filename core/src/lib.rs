//! Domain types shared by the translator, the snapshot cache, and the gRPC
//! layer: the `Resource`/`TypeUrl`/`Domain` model, the dedup hash, and the
//! retry-backoff duration grammar.

pub mod hash;
pub mod resource;
pub mod retry;

pub use hash::hash_resources;
pub use resource::{Domain, Resource, TypeUrl};
pub use retry::{parse_retry_backoff, DurationParseError, RetryBackoff};
