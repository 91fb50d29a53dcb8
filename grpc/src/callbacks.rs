//! Stream-lifecycle hooks, mirroring the original's `CallbackFuncs` struct
//! as a trait so instrumentation composes instead of being wired in by
//! hand at every call site.

use tonic::Status;

/// Hooks invoked around SotW and Delta xDS streams. The default no-op impl
/// exists so callers that don't care about lifecycle events (tests, mostly)
/// don't need to implement every method.
pub trait Callbacks: Send + Sync {
    /// May veto a stream open by returning an error, which closes the
    /// stream before any request is read.
    fn on_stream_open(&self, _stream_id: u64, _type_url: &str) -> Result<(), Status> {
        Ok(())
    }
    fn on_stream_closed(&self, _stream_id: u64) {}
    /// May veto a delta stream open by returning an error, which closes the
    /// stream before any request is read.
    fn on_delta_stream_open(&self, _stream_id: u64, _type_url: &str) -> Result<(), Status> {
        Ok(())
    }
    fn on_delta_stream_closed(&self, _stream_id: u64) {}
    fn on_stream_request(&self, _stream_id: u64, _type_url: &str) {}
    fn on_stream_response(&self, _stream_id: u64, _type_url: &str) {}
}

/// The hook set used when nothing needs to observe stream lifecycle.
pub struct NoopCallbacks;

impl Callbacks for NoopCallbacks {}
