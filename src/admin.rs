//! The debug/admin HTTP server: health check, Prometheus exposition, and a
//! JSON dump of every cached resource, the way `debug/marshaler.go` walked
//! the cache for its `/` handler.

use std::net::SocketAddr;
use std::sync::Arc;

use futures::future;
use hyper::{Body, Method, Request, Response, StatusCode};
use lmwn_xds_cache::MuxCache;
use prometheus_client::registry::Registry;
use serde_json::json;
use tracing::{info, instrument};

/// The original hard-codes a single logical node (`EmptyNodeID`), since
/// this control plane never varies its snapshot by node. Preserved
/// verbatim rather than "fixed" into a real node enumeration.
const EMPTY_NODE: &str = "";

#[instrument(skip_all)]
pub async fn serve(addr: SocketAddr, registry: Arc<Registry>, mux: Arc<MuxCache>) -> Result<(), hyper::Error> {
    let server = hyper::server::Server::bind(&addr).serve(hyper::service::make_service_fn(move |_conn| {
        let registry = registry.clone();
        let mux = mux.clone();
        future::ok::<_, hyper::Error>(hyper::service::service_fn(move |req| {
            future::ok::<_, hyper::Error>(route(req, &registry, &mux))
        }))
    }));
    let addr = server.local_addr();
    info!(%addr, "admin HTTP server listening");
    server.await
}

fn route(req: Request<Body>, registry: &Registry, mux: &MuxCache) -> Response<Body> {
    match (req.method(), req.uri().path()) {
        (&Method::GET, "/_hc") | (&Method::HEAD, "/_hc") => Response::builder()
            .status(StatusCode::OK)
            .header(hyper::header::CONTENT_TYPE, "text/plain")
            .body("ok\n".into())
            .unwrap(),

        (&Method::GET, "/metrics") => encode_metrics(registry),

        (&Method::GET, "/") => snapshot_dump(mux),

        _ => Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Body::default())
            .unwrap(),
    }
}

fn encode_metrics(registry: &Registry) -> Response<Body> {
    let mut buffer = String::new();
    if let Err(error) = prometheus_client::encoding::text::encode(&mut buffer, registry) {
        tracing::error!(%error, "failed to encode metrics");
        return Response::builder()
            .status(StatusCode::INTERNAL_SERVER_ERROR)
            .body(Body::default())
            .unwrap();
    }
    Response::builder()
        .status(StatusCode::OK)
        .header(
            hyper::header::CONTENT_TYPE,
            "application/openmetrics-text; version=1.0.0; charset=utf-8",
        )
        .body(buffer.into())
        .unwrap()
}

/// One node (always the empty node), one entry per domain, one entry per
/// type URL within a domain: `{version, items: [{name, type_url}]}`. The
/// original serializes full `protojson` per resource; the Envoy types this
/// rewrite depends on don't carry a bespoke JSON mapping, so each resource
/// is represented by its name and type URL instead.
fn snapshot_dump(mux: &MuxCache) -> Response<Body> {
    let mut domains = serde_json::Map::new();
    for (domain, cache) in mux.domains() {
        let snapshot = cache.fetch();
        let mut type_urls = serde_json::Map::new();
        for type_url in snapshot.type_urls() {
            let items: Vec<_> = snapshot
                .resources(type_url)
                .iter()
                .map(|r| json!({ "name": r.name(), "type_url": r.type_url().as_str() }))
                .collect();
            type_urls.insert(
                type_url.as_str().to_string(),
                json!({ "version": snapshot.version_for(type_url), "items": items }),
            );
        }
        domains.insert(domain.as_str().to_string(), serde_json::Value::Object(type_urls));
    }

    let body = json!({ "nodes": [EMPTY_NODE], "caches": domains }).to_string();
    Response::builder()
        .status(StatusCode::OK)
        .header(hyper::header::CONTENT_TYPE, "application/json")
        .body(body.into())
        .unwrap()
}
