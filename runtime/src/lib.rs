//! Bootstrap sequencing: build the mux cache, spawn the Services and
//! Endpoints reflectors, and run the gRPC (xDS + LRS) server until the
//! drain signal fires. Mirrors the shape of a typical `Args::run`/`grpc()`
//! split, minus anything this control plane has no equivalent of (no
//! admission webhook, no leader-election lease, no status subresource
//! controller).

use std::net::SocketAddr;
use std::sync::Arc;

use futures::FutureExt;
use k8s_openapi::api::core::v1::{Endpoints, Service};
use kube::{Api, Client};
use lmwn_xds_cache::MuxCache;
use lmwn_xds_grpc::{
    ads::AggregatedDiscoveryServiceServer,
    typed::{
        ClusterDiscoveryServiceServer, EndpointDiscoveryServiceServer,
        ListenerDiscoveryServiceServer, RouteDiscoveryServiceServer,
    },
    Callbacks, LoadReportingServiceServer, LrsMetrics, LrsServer, XdsMetrics, XdsServer,
};
use lmwn_xds_k8s_index::metrics::IndexMetrics;
use prometheus_client::registry::Registry;
use tonic::transport::Server;
use tracing::{info, info_span, instrument, Instrument};

/// Knobs `main` collects from the CLI, handed down so this crate never
/// needs to know how they were parsed.
pub struct Config {
    pub grpc_addr: SocketAddr,
    pub stats_interval_seconds: i64,
    pub enable_grpc_reflection: bool,
}

/// Registers every sub-registry this crate owns metrics for and returns
/// the handles `run` needs. Kept separate from `run` so `main` can start
/// the admin/metrics HTTP server before the reflectors and gRPC server are
/// up.
pub struct Metrics {
    pub index: IndexMetrics,
    pub xds: XdsMetrics,
    pub lrs: LrsMetrics,
}

impl Metrics {
    pub fn register(registry: &mut Registry) -> Self {
        let index = IndexMetrics::register(registry.sub_registry_with_prefix("kube_index"));
        let xds = XdsMetrics::register(registry.sub_registry_with_prefix("xds"));
        let lrs = LrsMetrics::register(registry.sub_registry_with_prefix("lrs"));
        Self { index, xds, lrs }
    }
}

/// Spawns the reflector tasks and runs the gRPC server until `drain`
/// fires, then waits for the server to finish releasing in-flight
/// streams.
pub async fn run(
    config: Config,
    client: Client,
    mux: Arc<MuxCache>,
    metrics: Metrics,
    drain: drain::Watch,
) -> anyhow::Result<()> {
    let Metrics {
        index: index_metrics,
        xds: xds_metrics,
        lrs: lrs_metrics,
    } = metrics;

    let services_api: Api<Service> = Api::all(client.clone());
    let services_task = tokio::spawn(
        lmwn_xds_k8s_index::run_services_index(
            services_api,
            mux.domain(lmwn_xds_core::Domain::Services),
            index_metrics.clone(),
        )
        .instrument(info_span!("services")),
    );

    let endpoints_api: Api<Endpoints> = Api::all(client);
    let endpoints_task = tokio::spawn(
        lmwn_xds_k8s_index::run_endpoints_index(
            endpoints_api,
            mux.domain(lmwn_xds_core::Domain::Endpoints),
            index_metrics,
        )
        .instrument(info_span!("endpoints")),
    );

    // A reflector only ever returns on a fatal watch error (bad RBAC, a
    // missing/mismatched CRD): the control plane cannot keep serving a
    // snapshot it knows it can no longer refresh, so that must bring the
    // whole process down rather than leave a silently stale reflector
    // running next to a healthy-looking gRPC server.
    tokio::select! {
        result = services_task => reflector_exit("services", result)?,
        result = endpoints_task => reflector_exit("endpoints", result)?,
        result = grpc(config, mux, xds_metrics, lrs_metrics, drain) => return result,
    }

    Ok(())
}

fn reflector_exit(
    name: &'static str,
    result: Result<Result<(), kube::runtime::watcher::Error>, tokio::task::JoinError>,
) -> anyhow::Result<()> {
    match result {
        Ok(Ok(())) => anyhow::bail!("{name} reflector exited unexpectedly"),
        Ok(Err(error)) => Err(anyhow::anyhow!("{name} reflector failed: {error}")),
        Err(join_error) => anyhow::bail!("{name} reflector task panicked: {join_error}"),
    }
}

#[instrument(skip_all, fields(port = %config.grpc_addr.port()))]
async fn grpc(
    config: Config,
    mux: Arc<MuxCache>,
    xds_metrics: XdsMetrics,
    lrs_metrics: LrsMetrics,
    drain: drain::Watch,
) -> anyhow::Result<()> {
    let callbacks: Arc<dyn Callbacks> = Arc::new(xds_metrics);
    let xds = XdsServer::new(mux, callbacks, drain.clone());
    let lrs = LrsServer::new(config.stats_interval_seconds, lrs_metrics);

    let (health_reporter, health_service) = tonic_health::server::health_reporter();
    health_reporter
        .set_serving::<AggregatedDiscoveryServiceServer<XdsServer>>()
        .await;

    if config.enable_grpc_reflection {
        // Reflection needs a compiled FileDescriptorSet for the Envoy xDS
        // protos; `envoy-types` doesn't publish one, so this flag is
        // accepted but has no effect yet.
        tracing::warn!("ENABLE_GRPC_REFLECTION is set but reflection is not wired into this build");
    }

    let (close_tx, close_rx) = tokio::sync::oneshot::channel();
    tokio::pin! {
        let srv = Server::builder()
            .add_service(AggregatedDiscoveryServiceServer::new(xds.clone()))
            .add_service(ClusterDiscoveryServiceServer::new(xds.clone()))
            .add_service(EndpointDiscoveryServiceServer::new(xds.clone()))
            .add_service(ListenerDiscoveryServiceServer::new(xds.clone()))
            .add_service(RouteDiscoveryServiceServer::new(xds.clone()))
            .add_service(LoadReportingServiceServer::new(lrs))
            .add_service(health_service)
            .serve_with_shutdown(config.grpc_addr, close_rx.map(|_| {}));
    }

    info!(addr = %config.grpc_addr, "xDS gRPC server listening");
    tokio::select! {
        res = (&mut srv) => res?,
        handle = drain.signaled() => {
            let _ = close_tx.send(());
            handle.release_after(srv).await?
        }
    }

    Ok(())
}
