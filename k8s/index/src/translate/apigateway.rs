//! API Gateway virtual servers: services opt a gRPC port into one or more
//! named gateways via `xds.lmwn.com/api-gateway` /
//! `xds.lmwn.com/grpc-service`, and this module folds all of them into one
//! `Listener`/`RouteConfiguration` pair per gateway name.

use std::collections::{BTreeMap, BTreeSet};

use envoy_types::pb::envoy::config::listener::v3::{api_listener::ApiListener as ApiListenerField, ApiListener, Listener};
use envoy_types::pb::envoy::config::route::v3::{
    route::Action, route_action::ClusterSpecifier, route_match::PathSpecifier, Route,
    RouteAction, RouteConfiguration, RouteMatch, VirtualHost,
};
use envoy_types::pb::envoy::extensions::filters::http::router::v3::Router;
use envoy_types::pb::envoy::extensions::filters::network::http_connection_manager::v3::{
    http_connection_manager::RouteSpecifier, http_filter::ConfigType, HttpConnectionManager,
    HttpFilter,
};
use k8s_openapi::api::core::v1::Service;
use lmwn_xds_core::Resource;
use prost_types::Any;
use regex::Regex;
use std::sync::OnceLock;

pub const NAME_ANNOTATION: &str = "xds.lmwn.com/api-gateway";
pub const SERVICE_ANNOTATION: &str = "xds.lmwn.com/grpc-service";
pub const PORT_NAME: &str = "grpc";

fn name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new("^[a-z0-9][a-z0-9-]{0,63}$").unwrap())
}

const ROUTER_FILTER_NAME: &str = "envoy.filters.http.router";

fn router_any() -> Any {
    Any {
        type_url: "type.googleapis.com/envoy.extensions.filters.http.router.v3.Router"
            .to_string(),
        value: prost::Message::encode_to_vec(&Router::default()),
    }
}

/// Build the Listener/RouteConfiguration pairs for every API Gateway named
/// across all services. A service contributes nothing if its gateway names
/// don't all pass the name regex, or if it lacks a `grpc`-named port.
pub fn resources_from_services(services: &[Service]) -> Vec<Resource> {
    let mut route_configs: BTreeMap<String, RouteConfiguration> = BTreeMap::new();
    let mut gateway_names: Vec<String> = Vec::new();

    'outer: for svc in services {
        let Some(annotations) = svc.metadata.annotations.as_ref() else {
            continue;
        };
        let Some(gateways_raw) = annotations.get(NAME_ANNOTATION) else {
            continue;
        };
        let gateways: Vec<&str> = gateways_raw.split(',').collect();
        for name in &gateways {
            if !name_regex().is_match(name) {
                tracing::warn!(
                    namespace = svc.metadata.namespace.as_deref().unwrap_or(""),
                    name = svc.metadata.name.as_deref().unwrap_or(""),
                    gateway = *name,
                    "API gateway name does not match the allowed pattern"
                );
                continue 'outer;
            }
        }

        let Some(rpcs_raw) = annotations.get(SERVICE_ANNOTATION) else {
            continue;
        };
        let rpcs: Vec<&str> = rpcs_raw.split(',').collect();

        let has_grpc_port = svc
            .spec
            .as_ref()
            .and_then(|s| s.ports.as_ref())
            .map(|ports| ports.iter().any(|p| p.name.as_deref() == Some(PORT_NAME)))
            .unwrap_or(false);
        if !has_grpc_port {
            tracing::warn!(
                namespace = svc.metadata.namespace.as_deref().unwrap_or(""),
                name = svc.metadata.name.as_deref().unwrap_or(""),
                "service has an API gateway annotation but no grpc named port"
            );
            continue;
        }

        let cluster_name = format!(
            "{}.{}:{}",
            svc.metadata.name.as_deref().unwrap_or(""),
            svc.metadata.namespace.as_deref().unwrap_or(""),
            PORT_NAME
        );

        for gateway in &gateways {
            if !gateway_names.iter().any(|g| g == gateway) {
                gateway_names.push(gateway.to_string());
            }

            let route_config = route_configs
                .entry(gateway.to_string())
                .or_insert_with(|| RouteConfiguration {
                    name: gateway.to_string(),
                    virtual_hosts: vec![VirtualHost {
                        name: gateway.to_string(),
                        domains: vec![gateway.to_string()],
                        ..Default::default()
                    }],
                    ..Default::default()
                });

            for rpc in &rpcs {
                route_config.virtual_hosts[0].routes.push(Route {
                    name: rpc.to_string(),
                    r#match: Some(RouteMatch {
                        path_specifier: Some(PathSpecifier::Prefix(format!("/{rpc}/"))),
                        ..Default::default()
                    }),
                    action: Some(Action::Route(RouteAction {
                        cluster_specifier: Some(ClusterSpecifier::Cluster(cluster_name.clone())),
                        ..Default::default()
                    })),
                    ..Default::default()
                });
            }
        }
    }

    let mut out = Vec::new();
    for name in &gateway_names {
        let Some(route_config) = route_configs.get(name) else {
            continue;
        };

        let manager = HttpConnectionManager {
            http_filters: vec![HttpFilter {
                name: ROUTER_FILTER_NAME.to_string(),
                config_type: Some(ConfigType::TypedConfig(router_any())),
                ..Default::default()
            }],
            route_specifier: Some(RouteSpecifier::RouteConfig(route_config.clone())),
            ..Default::default()
        };

        let listener = Listener {
            name: name.clone(),
            api_listener: Some(ApiListener {
                api_listener: Some(ApiListenerField::ApiListener(Any {
                    type_url:
                        "type.googleapis.com/envoy.extensions.filters.network.http_connection_manager.v3.HttpConnectionManager"
                            .to_string(),
                    value: prost::Message::encode_to_vec(&manager),
                })),
            }),
            ..Default::default()
        };

        out.push(Resource::Listener(listener));
    }
    for name in &gateway_names {
        if let Some(route_config) = route_configs.remove(name) {
            out.push(Resource::RouteConfiguration(route_config));
        }
    }

    out
}

/// Distinct backend services routed under each API Gateway, for the
/// `xds_apigateway_endpoints` gauge. Mirrors the eligibility checks in
/// `resources_from_services` without building any proto messages.
pub fn backend_counts_by_gateway(services: &[Service]) -> BTreeMap<String, usize> {
    let mut backends: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();

    'outer: for svc in services {
        let Some(annotations) = svc.metadata.annotations.as_ref() else {
            continue;
        };
        let Some(gateways_raw) = annotations.get(NAME_ANNOTATION) else {
            continue;
        };
        let gateways: Vec<&str> = gateways_raw.split(',').collect();
        for name in &gateways {
            if !name_regex().is_match(name) {
                continue 'outer;
            }
        }
        if !annotations.contains_key(SERVICE_ANNOTATION) {
            continue;
        }

        let has_grpc_port = svc
            .spec
            .as_ref()
            .and_then(|s| s.ports.as_ref())
            .map(|ports| ports.iter().any(|p| p.name.as_deref() == Some(PORT_NAME)))
            .unwrap_or(false);
        if !has_grpc_port {
            continue;
        }

        let cluster_name = format!(
            "{}.{}:{}",
            svc.metadata.name.as_deref().unwrap_or(""),
            svc.metadata.namespace.as_deref().unwrap_or(""),
            PORT_NAME
        );
        for gateway in &gateways {
            backends.entry(gateway.to_string()).or_default().insert(cluster_name.clone());
        }
    }

    backends.into_iter().map(|(name, set)| (name, set.len())).collect()
}
