//! Load Reporting Service: register every node on its first request with a
//! canned `LoadStatsResponse`, then just absorb stats on every request
//! after that. A node is only removed from the registry when its stream
//! ends or errors out; an error or disconnect on the very first send is
//! not rolled back, so a node can stay counted as connected even if that
//! initial response never reached the client.

use std::collections::HashSet;
use std::sync::Arc;

use envoy_types::pb::envoy::service::load_stats::v3::load_reporting_service_server::LoadReportingService;
pub use envoy_types::pb::envoy::service::load_stats::v3::load_reporting_service_server::LoadReportingServiceServer;
use envoy_types::pb::envoy::service::load_stats::v3::{LoadStatsRequest, LoadStatsResponse};
use envoy_types::pb::google::protobuf::Duration;
use futures::StreamExt;
use parking_lot::Mutex;
use tonic::{Request, Response, Status, Streaming};

use crate::metrics::LrsMetrics;
use crate::server::ResponseStream;

const DUMMY_CLUSTER: &str = "dummy_cluster";

#[derive(Clone)]
pub struct LrsServer {
    nodes_connected: Arc<Mutex<HashSet<String>>>,
    stats_interval_seconds: i64,
    metrics: LrsMetrics,
}

impl LrsServer {
    pub fn new(stats_interval_seconds: i64, metrics: LrsMetrics) -> Self {
        Self {
            nodes_connected: Arc::new(Mutex::new(HashSet::new())),
            stats_interval_seconds,
            metrics,
        }
    }

    /// `Some(response)` the first time a node is seen, `None` on every
    /// stats-only request after that.
    fn handle_request(&self, node_id: &str) -> Option<LoadStatsResponse> {
        self.metrics.record_update();

        let mut nodes = self.nodes_connected.lock();
        if !nodes.insert(node_id.to_string()) {
            return None;
        }
        self.metrics.set_node_count(nodes.len());
        drop(nodes);
        tracing::debug!(node_id, "new LRS node connected");

        Some(LoadStatsResponse {
            clusters: vec![DUMMY_CLUSTER.to_string()],
            load_reporting_interval: Some(Duration {
                seconds: self.stats_interval_seconds,
                nanos: 0,
            }),
            report_endpoint_granularity: true,
            ..Default::default()
        })
    }

    fn remove_node(&self, node_id: &str) {
        let mut nodes = self.nodes_connected.lock();
        if nodes.remove(node_id) {
            self.metrics.set_node_count(nodes.len());
            drop(nodes);
            tracing::debug!(node_id, "LRS node disconnected");
        }
    }
}

#[async_trait::async_trait]
impl LoadReportingService for LrsServer {
    type StreamLoadStatsStream = ResponseStream<LoadStatsResponse>;

    async fn stream_load_stats(
        &self,
        request: Request<Streaming<LoadStatsRequest>>,
    ) -> Result<Response<Self::StreamLoadStatsStream>, Status> {
        let this = self.clone();
        let mut requests = request.into_inner();

        let stream = async_stream::try_stream! {
            let mut node_id: Option<String> = None;

            loop {
                let req = match requests.next().await {
                    Some(Ok(req)) => req,
                    Some(Err(error)) => {
                        if let Some(id) = &node_id {
                            this.remove_node(id);
                        }
                        Err(error)?;
                        unreachable!();
                    }
                    None => {
                        if let Some(id) = &node_id {
                            this.remove_node(id);
                        }
                        return;
                    }
                };

                let id = req.node.as_ref().map(|n| n.id.clone()).unwrap_or_default();
                if node_id.is_none() {
                    node_id = Some(id.clone());
                }

                if let Some(response) = this.handle_request(&id) {
                    yield response;
                }
            }
        };

        Ok(Response::new(Box::pin(stream)))
    }
}
