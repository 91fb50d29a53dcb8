//! The xDS stream server: one SotW/Delta engine shared by the per-type
//! (CDS/EDS/LDS/RDS) services and the aggregated (ADS) service, since the
//! wire handling is identical and only the type-URL scoping differs.

use std::collections::{HashMap, HashSet};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use envoy_types::pb::envoy::service::discovery::v3::{
    DeltaDiscoveryRequest, DeltaDiscoveryResponse, DiscoveryRequest, DiscoveryResponse,
    Resource as DeltaResource,
};
use futures::future::select_all;
use futures::{Stream, StreamExt};
use lmwn_xds_cache::{delta, sotw, MuxCache};
use lmwn_xds_core::TypeUrl;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status, Streaming};

use crate::callbacks::Callbacks;

pub type ResponseStream<T> = Pin<Box<dyn Stream<Item = Result<T, Status>> + Send + 'static>>;

static NEXT_STREAM_ID: AtomicU64 = AtomicU64::new(1);

/// Shared state behind every generated xDS service trait impl. Cheap to
/// clone: every field is already an `Arc` or an `Arc`-backed handle, which
/// is what lets each trait method hand an owned copy to its spawned stream
/// task without taking `self: Arc<Self>` in the trait signature itself.
#[derive(Clone)]
pub struct XdsServer {
    mux: Arc<MuxCache>,
    callbacks: Arc<dyn Callbacks>,
    drain: drain::Watch,
}

struct SotwTypeState {
    rx: tokio::sync::watch::Receiver<Arc<lmwn_xds_cache::Snapshot>>,
    last_sent_version: Option<String>,
    subscribed: HashSet<String>,
    nonce: u64,
}

struct DeltaTypeState {
    rx: tokio::sync::watch::Receiver<Arc<lmwn_xds_cache::Snapshot>>,
    subscribed: HashSet<String>,
    state: delta::DeltaState,
    nonce: u64,
}

impl XdsServer {
    pub fn new(mux: Arc<MuxCache>, callbacks: Arc<dyn Callbacks>, drain: drain::Watch) -> Self {
        Self {
            mux,
            callbacks,
            drain,
        }
    }

    fn classify(&self, type_url: &str) -> Option<TypeUrl> {
        TypeUrl::from_str(type_url)
    }

    /// Drive one SotW bidi stream. `fixed_type_url` pins a per-type service
    /// (CDS/EDS/LDS/RDS) to its type; `None` means ADS, where each request
    /// carries its own `type_url` and many types are multiplexed on one
    /// stream.
    pub fn stream_sotw(
        &self,
        fixed_type_url: Option<TypeUrl>,
        requests: Streaming<DiscoveryRequest>,
    ) -> Result<ResponseStream<DiscoveryResponse>, Status> {
        let stream_id = NEXT_STREAM_ID.fetch_add(1, Ordering::Relaxed);
        self.callbacks
            .on_stream_open(stream_id, fixed_type_url.map(TypeUrl::as_str).unwrap_or("ads"))?;

        let (tx, rx) = mpsc::channel(16);
        let server = self.clone();
        tokio::spawn(async move {
            server.drive_sotw(stream_id, fixed_type_url, requests, tx).await;
            server.callbacks.on_stream_closed(stream_id);
        });

        Ok(Box::pin(ReceiverStream::new(rx).map(Ok)))
    }

    async fn drive_sotw(
        &self,
        stream_id: u64,
        fixed_type_url: Option<TypeUrl>,
        mut requests: Streaming<DiscoveryRequest>,
        tx: mpsc::Sender<DiscoveryResponse>,
    ) {
        let mut types: HashMap<TypeUrl, SotwTypeState> = HashMap::new();
        let shutdown = self.drain.clone().signaled();
        tokio::pin!(shutdown);

        if let Some(t) = fixed_type_url {
            types.insert(t, self.new_sotw_state(t));
        }

        loop {
            let types_not_empty = !types.is_empty();
            let next_update = next_any_sotw_update(&mut types);

            tokio::select! {
                biased;

                _ = &mut shutdown => return,

                req = requests.next() => {
                    match req {
                        Some(Ok(req)) => {
                            self.callbacks.on_stream_request(stream_id, &req.type_url);
                            let Some(type_url) = self.classify(&req.type_url) else { continue };
                            if fixed_type_url.is_none() {
                                types.entry(type_url).or_insert_with(|| self.new_sotw_state(type_url));
                            }
                            if let Some(state) = types.get_mut(&type_url) {
                                state.subscribed = req.resource_names.iter().cloned().collect();
                                if !req.response_nonce.is_empty() {
                                    if req.error_detail.is_some() {
                                        tracing::warn!(stream_id, type_url = %type_url, detail = ?req.error_detail, "NACK");
                                    } else {
                                        state.last_sent_version = Some(req.version_info.clone());
                                    }
                                }
                            }
                        }
                        Some(Err(error)) => {
                            tracing::debug!(stream_id, %error, "stream request error");
                            return;
                        }
                        None => return,
                    }
                }

                update = next_update, if types_not_empty => {
                    let (type_url, result) = update;
                    let Some(state) = types.get_mut(&type_url) else { continue };
                    state.nonce += 1;
                    let response = DiscoveryResponse {
                        version_info: result.version,
                        resources: result.resources.iter().map(|r| r.to_any()).collect(),
                        type_url: type_url.as_str().to_string(),
                        nonce: state.nonce.to_string(),
                        ..Default::default()
                    };
                    self.callbacks.on_stream_response(stream_id, type_url.as_str());
                    if tx.send(response).await.is_err() {
                        return;
                    }
                }
            }
        }
    }

    fn new_sotw_state(&self, type_url: TypeUrl) -> SotwTypeState {
        SotwTypeState {
            rx: self.mux.domain(type_url.domain()).subscribe(),
            last_sent_version: None,
            subscribed: HashSet::new(),
            nonce: 0,
        }
    }

    pub fn stream_delta(
        &self,
        fixed_type_url: Option<TypeUrl>,
        requests: Streaming<DeltaDiscoveryRequest>,
    ) -> Result<ResponseStream<DeltaDiscoveryResponse>, Status> {
        let stream_id = NEXT_STREAM_ID.fetch_add(1, Ordering::Relaxed);
        self.callbacks.on_delta_stream_open(
            stream_id,
            fixed_type_url.map(TypeUrl::as_str).unwrap_or("ads"),
        )?;

        let (tx, rx) = mpsc::channel(16);
        let server = self.clone();
        tokio::spawn(async move {
            server.drive_delta(stream_id, fixed_type_url, requests, tx).await;
            server.callbacks.on_delta_stream_closed(stream_id);
        });

        Ok(Box::pin(ReceiverStream::new(rx).map(Ok)))
    }

    async fn drive_delta(
        &self,
        stream_id: u64,
        fixed_type_url: Option<TypeUrl>,
        mut requests: Streaming<DeltaDiscoveryRequest>,
        tx: mpsc::Sender<DeltaDiscoveryResponse>,
    ) {
        let mut types: HashMap<TypeUrl, DeltaTypeState> = HashMap::new();
        let shutdown = self.drain.clone().signaled();
        tokio::pin!(shutdown);

        if let Some(t) = fixed_type_url {
            types.insert(t, self.new_delta_state(t));
        }

        loop {
            let next_update = next_any_delta_update(&mut types);

            tokio::select! {
                biased;

                _ = &mut shutdown => return,

                req = requests.next() => {
                    match req {
                        Some(Ok(req)) => {
                            self.callbacks.on_stream_request(stream_id, &req.type_url);
                            let Some(type_url) = self.classify(&req.type_url) else { continue };
                            let entry = types.entry(type_url).or_insert_with(|| self.new_delta_state(type_url));
                            for name in req.resource_names_subscribe {
                                entry.subscribed.insert(name);
                            }
                            for name in req.resource_names_unsubscribe {
                                entry.subscribed.remove(&name);
                            }
                            if !req.response_nonce.is_empty() && req.error_detail.is_some() {
                                tracing::warn!(stream_id, type_url = %type_url, detail = ?req.error_detail, "NACK");
                            }
                        }
                        Some(Err(error)) => {
                            tracing::debug!(stream_id, %error, "stream request error");
                            return;
                        }
                        None => return,
                    }
                }

                update = next_update, if !types.is_empty() => {
                    let (type_url, result) = update;
                    let Some(state) = types.get_mut(&type_url) else { continue };
                    state.nonce += 1;
                    let response = DeltaDiscoveryResponse {
                        system_version_info: result.system_version,
                        resources: result
                            .upserts
                            .iter()
                            .map(|r| DeltaResource {
                                name: r.name().to_string(),
                                version: "1".to_string(),
                                resource: Some(r.to_any()),
                                ..Default::default()
                            })
                            .collect(),
                        removed_resources: result.removals,
                        type_url: type_url.as_str().to_string(),
                        nonce: state.nonce.to_string(),
                        ..Default::default()
                    };
                    self.callbacks.on_stream_response(stream_id, type_url.as_str());
                    if tx.send(response).await.is_err() {
                        return;
                    }
                }
            }
        }
    }

    fn new_delta_state(&self, type_url: TypeUrl) -> DeltaTypeState {
        DeltaTypeState {
            rx: self.mux.domain(type_url.domain()).subscribe(),
            subscribed: HashSet::new(),
            state: delta::DeltaState::new(),
            nonce: 0,
        }
    }
}

async fn next_any_sotw_update(
    types: &mut HashMap<TypeUrl, SotwTypeState>,
) -> (TypeUrl, sotw::SotwUpdate) {
    if types.is_empty() {
        return futures::future::pending().await;
    }
    let mut entries: Vec<(TypeUrl, &mut SotwTypeState)> =
        types.iter_mut().map(|(k, v)| (*k, v)).collect();
    let futs: Vec<_> = entries
        .iter_mut()
        .map(|(k, v)| Box::pin(sotw::next_update(&mut v.rx, *k, v.last_sent_version.as_deref(), &v.subscribed)))
        .collect();
    let (update, idx, _) = select_all(futs).await;
    (entries[idx].0, update)
}

async fn next_any_delta_update(
    types: &mut HashMap<TypeUrl, DeltaTypeState>,
) -> (TypeUrl, delta::DeltaUpdate) {
    if types.is_empty() {
        return futures::future::pending().await;
    }
    let mut entries: Vec<(TypeUrl, &mut DeltaTypeState)> =
        types.iter_mut().map(|(k, v)| (*k, v)).collect();
    let futs: Vec<_> = entries
        .iter_mut()
        .map(|(k, v)| Box::pin(delta::next_update(&mut v.rx, *k, &v.subscribed, &mut v.state)))
        .collect();
    let (update, idx, _) = select_all(futs).await;
    (entries[idx].0, update)
}

/// Implements one per-type (CDS/EDS/LDS/RDS) discovery service trait by
/// delegating to the shared SotW/Delta engine pinned to `$type_url`.
///
/// `fetch_*` (one-shot, non-streaming discovery) is left unimplemented:
/// nothing in this control plane's client population uses it, and the
/// original never served it either.
macro_rules! impl_typed_service {
    (
        $trait_name:ident,
        stream = $stream_method:ident, $stream_assoc:ident,
        delta = $delta_method:ident, $delta_assoc:ident,
        fetch = $fetch_method:ident,
        $type_url:expr
    ) => {
        #[async_trait::async_trait]
        impl $trait_name for XdsServer {
            type $stream_assoc = ResponseStream<DiscoveryResponse>;
            type $delta_assoc = ResponseStream<DeltaDiscoveryResponse>;

            async fn $stream_method(
                &self,
                request: Request<Streaming<DiscoveryRequest>>,
            ) -> Result<Response<Self::$stream_assoc>, Status> {
                Ok(Response::new(
                    self.stream_sotw(Some($type_url), request.into_inner())?,
                ))
            }

            async fn $delta_method(
                &self,
                request: Request<Streaming<DeltaDiscoveryRequest>>,
            ) -> Result<Response<Self::$delta_assoc>, Status> {
                Ok(Response::new(
                    self.stream_delta(Some($type_url), request.into_inner())?,
                ))
            }

            async fn $fetch_method(
                &self,
                _request: Request<DiscoveryRequest>,
            ) -> Result<Response<DiscoveryResponse>, Status> {
                Err(Status::unimplemented("fetch is not supported, use streaming discovery"))
            }
        }
    };
}

pub(crate) use impl_typed_service;

pub mod typed {
    use super::*;
    use envoy_types::pb::envoy::service::cluster::v3::cluster_discovery_service_server::ClusterDiscoveryService;
    use envoy_types::pb::envoy::service::endpoint::v3::endpoint_discovery_service_server::EndpointDiscoveryService;
    use envoy_types::pb::envoy::service::listener::v3::listener_discovery_service_server::ListenerDiscoveryService;
    use envoy_types::pb::envoy::service::route::v3::route_discovery_service_server::RouteDiscoveryService;

    pub use envoy_types::pb::envoy::service::cluster::v3::cluster_discovery_service_server::ClusterDiscoveryServiceServer;
    pub use envoy_types::pb::envoy::service::endpoint::v3::endpoint_discovery_service_server::EndpointDiscoveryServiceServer;
    pub use envoy_types::pb::envoy::service::listener::v3::listener_discovery_service_server::ListenerDiscoveryServiceServer;
    pub use envoy_types::pb::envoy::service::route::v3::route_discovery_service_server::RouteDiscoveryServiceServer;

    impl_typed_service!(
        ClusterDiscoveryService,
        stream = stream_clusters, StreamClustersStream,
        delta = delta_clusters, DeltaClustersStream,
        fetch = fetch_clusters,
        TypeUrl::Cluster
    );

    impl_typed_service!(
        EndpointDiscoveryService,
        stream = stream_endpoints, StreamEndpointsStream,
        delta = delta_endpoints, DeltaEndpointsStream,
        fetch = fetch_endpoints,
        TypeUrl::ClusterLoadAssignment
    );

    impl_typed_service!(
        ListenerDiscoveryService,
        stream = stream_listeners, StreamListenersStream,
        delta = delta_listeners, DeltaListenersStream,
        fetch = fetch_listeners,
        TypeUrl::Listener
    );

    impl_typed_service!(
        RouteDiscoveryService,
        stream = stream_routes, StreamRoutesStream,
        delta = delta_routes, DeltaRoutesStream,
        fetch = fetch_routes,
        TypeUrl::RouteConfiguration
    );
}

pub mod ads {
    use super::*;
    use envoy_types::pb::envoy::service::discovery::v3::aggregated_discovery_service_server::AggregatedDiscoveryService;
    pub use envoy_types::pb::envoy::service::discovery::v3::aggregated_discovery_service_server::AggregatedDiscoveryServiceServer;

    #[async_trait::async_trait]
    impl AggregatedDiscoveryService for XdsServer {
        type StreamAggregatedResourcesStream = ResponseStream<DiscoveryResponse>;
        type DeltaAggregatedResourcesStream = ResponseStream<DeltaDiscoveryResponse>;

        async fn stream_aggregated_resources(
            &self,
            request: Request<Streaming<DiscoveryRequest>>,
        ) -> Result<Response<Self::StreamAggregatedResourcesStream>, Status> {
            Ok(Response::new(self.stream_sotw(None, request.into_inner())?))
        }

        async fn delta_aggregated_resources(
            &self,
            request: Request<Streaming<DeltaDiscoveryRequest>>,
        ) -> Result<Response<Self::DeltaAggregatedResourcesStream>, Status> {
            Ok(Response::new(self.stream_delta(None, request.into_inner())?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn next_any_sotw_update_never_resolves_with_no_types() {
        let mut types: HashMap<TypeUrl, SotwTypeState> = HashMap::new();
        let result = tokio::time::timeout(
            std::time::Duration::from_millis(10),
            next_any_sotw_update(&mut types),
        )
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn sotw_state_tracks_the_last_acked_version() {
        let mux = Arc::new(MuxCache::new());
        mux.domain(lmwn_xds_core::Domain::Services).set_snapshot(
            "1".to_string(),
            vec![lmwn_xds_core::Resource::Cluster(
                envoy_types::pb::envoy::config::cluster::v3::Cluster {
                    name: "a".to_string(),
                    ..Default::default()
                },
            )],
        );
        let (_drain_signal, watch) = drain::channel();
        let server = XdsServer::new(mux, Arc::new(crate::callbacks::NoopCallbacks), watch);
        let mut state = server.new_sotw_state(TypeUrl::Cluster);
        let update = sotw::next_update(&mut state.rx, TypeUrl::Cluster, state.last_sent_version.as_deref(), &state.subscribed).await;
        assert_eq!(update.version, "1");
        state.last_sent_version = Some(update.version);
        assert_eq!(state.last_sent_version.as_deref(), Some("1"));
    }
}
