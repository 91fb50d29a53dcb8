//! Drives the Services and Endpoints reflectors, translates each settled
//! state into xDS resources, and publishes them into the matching domain
//! cache.

pub mod metrics;
pub mod reflect;
pub mod translate;

use std::sync::atomic::{AtomicU64, Ordering};

use k8s_openapi::api::core::v1::{Endpoints, Service};
use kube::runtime::watcher;
use kube::Api;
use lmwn_xds_cache::SnapshotCache;
use lmwn_xds_k8s_api::Watch;
use metrics::IndexMetrics;
use translate::EndpointsTranslator;

/// How often the underlying Kubernetes watch is allowed to resync from a
/// full list, matching the original's hard-coded resync period.
pub const RESYNC_PERIOD: std::time::Duration = std::time::Duration::from_secs(600);

fn next_version(counter: &AtomicU64) -> String {
    counter.fetch_add(1, Ordering::Relaxed).to_string()
}

/// Run the Services reflector forever: list+watch `Service`, translate each
/// settled state into Listener/RouteConfiguration/Cluster resources
/// (including API Gateway virtual servers), and publish into `cache`.
///
/// Returns only on a fatal watch error (bad RBAC, missing/mismatched CRD);
/// the caller must treat that as fatal to the whole process, not restart
/// this reflector in isolation.
pub async fn run_services_index(
    api: Api<Service>,
    cache: std::sync::Arc<SnapshotCache>,
    metrics: IndexMetrics,
) -> Result<(), watcher::Error> {
    let watch = Watch::new(api, watcher::Config::default());
    let version = AtomicU64::new(0);

    reflect::run(watch, move |services: Vec<Service>| {
        metrics.record_settle("services");

        let mut resources = translate::services::resources_from_services(&services);
        resources.extend(translate::apigateway::resources_from_services(&services));

        metrics.set_apigateway_endpoints(&translate::apigateway::backend_counts_by_gateway(&services));
        metrics.set_snapshot_resource_counts(&resources);
        cache.set_snapshot(next_version(&version), resources);
    })
    .await
}

/// Run the Endpoints reflector forever: list+watch `Endpoints`, translate
/// each settled state into `ClusterLoadAssignment` resources, and publish
/// into `cache`.
///
/// Returns only on a fatal watch error; see [`run_services_index`].
pub async fn run_endpoints_index(
    api: Api<Endpoints>,
    cache: std::sync::Arc<SnapshotCache>,
    metrics: IndexMetrics,
) -> Result<(), watcher::Error> {
    let watch = Watch::new(api, watcher::Config::default());
    let version = AtomicU64::new(0);
    let mut translator = EndpointsTranslator::new();

    reflect::run(watch, move |endpoints: Vec<Endpoints>| {
        metrics.record_settle("endpoints");
        let resources = translator.translate(&endpoints);
        metrics.set_snapshot_resource_counts(&resources);
        cache.set_snapshot(next_version(&version), resources);
    })
    .await
}
