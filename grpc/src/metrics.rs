//! gRPC-layer metrics: live stream-count gauges, request/response counters
//! per type URL, and the LRS node registry gauge, following the
//! `*MetricsFamily::register` convention used throughout this workspace.

use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;

#[derive(Debug, Clone, PartialEq, Eq, Hash, EncodeLabelSet)]
pub struct StreamLabels {
    pub type_url: String,
}

/// Stream-lifecycle gauges and request/response counters for the xDS
/// services. `sotw_streams`/`delta_streams` track streams currently open,
/// incremented on open and decremented on close — not a running total.
#[derive(Debug, Clone, Default)]
pub struct XdsMetrics {
    sotw_streams: Gauge,
    delta_streams: Gauge,
    requests: Family<StreamLabels, Counter>,
    responses: Family<StreamLabels, Counter>,
}

impl XdsMetrics {
    pub fn register(registry: &mut Registry) -> Self {
        let metrics = Self::default();
        registry.register("xds_server_streams", "SotW xDS streams currently open", metrics.sotw_streams.clone());
        registry.register("xds_server_delta_streams", "Delta xDS streams currently open", metrics.delta_streams.clone());
        registry.register("xds_server_stream_requests", "xDS requests received", metrics.requests.clone());
        registry.register("xds_server_stream_responses", "xDS responses sent", metrics.responses.clone());
        metrics
    }
}

impl super::callbacks::Callbacks for XdsMetrics {
    fn on_stream_open(&self, _stream_id: u64, _type_url: &str) -> Result<(), tonic::Status> {
        self.sotw_streams.inc();
        Ok(())
    }

    fn on_stream_closed(&self, _stream_id: u64) {
        self.sotw_streams.dec();
    }

    fn on_delta_stream_open(&self, _stream_id: u64, _type_url: &str) -> Result<(), tonic::Status> {
        self.delta_streams.inc();
        Ok(())
    }

    fn on_delta_stream_closed(&self, _stream_id: u64) {
        self.delta_streams.dec();
    }

    fn on_stream_request(&self, _stream_id: u64, type_url: &str) {
        self.requests
            .get_or_create(&StreamLabels { type_url: type_url.to_string() })
            .inc();
    }

    fn on_stream_response(&self, _stream_id: u64, type_url: &str) {
        self.responses
            .get_or_create(&StreamLabels { type_url: type_url.to_string() })
            .inc();
    }
}

/// Node registry metrics for the Load Reporting Service.
#[derive(Debug, Clone, Default)]
pub struct LrsMetrics {
    updates: Counter,
    nodes: Gauge,
}

impl LrsMetrics {
    pub fn register(registry: &mut Registry) -> Self {
        let metrics = Self::default();
        registry.register("lrs_updates", "LRS stats updates received", metrics.updates.clone());
        registry.register("lrs_nodes", "LRS nodes currently connected", metrics.nodes.clone());
        metrics
    }

    pub fn record_update(&self) {
        self.updates.inc();
    }

    pub fn set_node_count(&self, count: usize) {
        self.nodes.set(count as i64);
    }
}
