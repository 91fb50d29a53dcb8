//! The xDS resource cache: a versioned, deduplicated `Snapshot` per domain,
//! SotW/Delta suspend-until-advance helpers, and the `MuxCache` that routes
//! a request's type URL to the right domain.

pub mod delta;
pub mod mux;
pub mod snapshot;
pub mod sotw;

pub use delta::{DeltaState, DeltaUpdate};
pub use mux::MuxCache;
pub use snapshot::{Snapshot, SnapshotCache};
pub use sotw::SotwUpdate;
