//! Services -> Listener/RouteConfiguration/Cluster.
//!
//! Each service port becomes a `host.namespace:port` EDS-backed Cluster, a
//! RouteConfiguration pointing `host.namespace`, `host.namespace:port` and
//! the bare service name at that cluster, and an `ApiListener` fronting it.

use envoy_types::pb::envoy::config::cluster::v3::{
    cluster::ClusterDiscoveryType, cluster::DiscoveryType, Cluster,
};
use envoy_types::pb::envoy::config::cluster::v3::cluster::EdsClusterConfig;
use envoy_types::pb::envoy::config::core::v3::{
    config_source::ConfigSourceSpecifier, AggregatedConfigSource, ConfigSource,
};
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

use super::retry::retry_policy_from_service;

const ROUTER_FILTER_NAME: &str = "envoy.filters.http.router";

fn router_any() -> Any {
    Any {
        type_url: "type.googleapis.com/envoy.extensions.filters.http.router.v3.Router"
            .to_string(),
        value: prost::Message::encode_to_vec(&Router::default()),
    }
}

fn http_connection_manager_any(route_config: RouteConfiguration) -> Any {
    let manager = HttpConnectionManager {
        http_filters: vec![HttpFilter {
            name: ROUTER_FILTER_NAME.to_string(),
            config_type: Some(ConfigType::TypedConfig(router_any())),
            ..Default::default()
        }],
        route_specifier: Some(RouteSpecifier::RouteConfig(route_config)),
        ..Default::default()
    };
    Any {
        type_url:
            "type.googleapis.com/envoy.extensions.filters.network.http_connection_manager.v3.HttpConnectionManager"
                .to_string(),
        value: prost::Message::encode_to_vec(&manager),
    }
}

/// Translate every port of every service into a Listener, a
/// RouteConfiguration, and an EDS Cluster.
pub fn resources_from_services(services: &[Service]) -> Vec<Resource> {
    let mut out = Vec::new();

    for svc in services {
        let name = svc.metadata.name.as_deref().unwrap_or_default();
        let namespace = svc.metadata.namespace.as_deref().unwrap_or_default();
        let full_name = format!("{name}.{namespace}");
        let retry_policy = retry_policy_from_service(svc);

        let Some(spec) = svc.spec.as_ref() else {
            continue;
        };
        let Some(ports) = spec.ports.as_ref() else {
            continue;
        };

        for port in ports {
            let port_name = port.name.clone().unwrap_or_default();
            let target_host_port = format!("{full_name}:{port_name}");
            let target_host_port_number = format!("{full_name}:{}", port.port);

            let route_config = RouteConfiguration {
                name: target_host_port_number.clone(),
                virtual_hosts: vec![VirtualHost {
                    name: target_host_port.clone(),
                    domains: vec![
                        full_name.clone(),
                        target_host_port.clone(),
                        target_host_port_number.clone(),
                        name.to_string(),
                    ],
                    routes: vec![Route {
                        name: "default".to_string(),
                        r#match: Some(RouteMatch {
                            path_specifier: Some(PathSpecifier::Prefix(String::new())),
                            ..Default::default()
                        }),
                        action: Some(Action::Route(RouteAction {
                            cluster_specifier: Some(ClusterSpecifier::Cluster(
                                target_host_port.clone(),
                            )),
                            retry_policy: retry_policy.clone(),
                            ..Default::default()
                        })),
                        ..Default::default()
                    }],
                    ..Default::default()
                }],
                ..Default::default()
            };

            let listener = Listener {
                name: target_host_port_number.clone(),
                api_listener: Some(ApiListener {
                    api_listener: Some(ApiListenerField::ApiListener(
                        http_connection_manager_any(route_config.clone()),
                    )),
                }),
                ..Default::default()
            };

            let cluster = Cluster {
                name: target_host_port.clone(),
                cluster_discovery_type: Some(ClusterDiscoveryType::Type(DiscoveryType::Eds.into())),
                lb_policy: envoy_types::pb::envoy::config::cluster::v3::cluster::LbPolicy::RoundRobin.into(),
                eds_cluster_config: Some(EdsClusterConfig {
                    eds_config: Some(ConfigSource {
                        config_source_specifier: Some(ConfigSourceSpecifier::Ads(
                            AggregatedConfigSource::default(),
                        )),
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            };

            out.push(Resource::Listener(listener));
            out.push(Resource::RouteConfiguration(route_config));
            out.push(Resource::Cluster(cluster));
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{ServicePort, ServiceSpec};
    use std::collections::BTreeMap;

    fn svc(name: &str, namespace: &str, port_name: &str, port: i32) -> Service {
        Service {
            metadata: kube::core::ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                annotations: Some(BTreeMap::new()),
                ..Default::default()
            },
            spec: Some(ServiceSpec {
                ports: Some(vec![ServicePort {
                    name: Some(port_name.to_string()),
                    port,
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn one_port_produces_a_listener_route_and_cluster() {
        let resources = resources_from_services(&[svc("foo", "bar", "http", 80)]);
        assert_eq!(resources.len(), 3);
        assert!(resources
            .iter()
            .any(|r| matches!(r, Resource::Listener(l) if l.name == "foo.bar:80")));
        assert!(resources
            .iter()
            .any(|r| matches!(r, Resource::Cluster(c) if c.name == "foo.bar:http")));
    }

    #[test]
    fn route_config_domains_include_all_aliases() {
        let resources = resources_from_services(&[svc("foo", "bar", "http", 80)]);
        let route = resources
            .iter()
            .find_map(|r| match r {
                Resource::RouteConfiguration(rc) => Some(rc),
                _ => None,
            })
            .unwrap();
        let domains = &route.virtual_hosts[0].domains;
        assert!(domains.contains(&"foo.bar".to_string()));
        assert!(domains.contains(&"foo.bar:http".to_string()));
        assert!(domains.contains(&"foo.bar:80".to_string()));
        assert!(domains.contains(&"foo".to_string()));
    }

    #[test]
    fn retry_annotation_attaches_a_retry_policy_to_the_route() {
        let mut svc = svc("foo", "bar", "http", 80);
        svc.metadata
            .annotations
            .as_mut()
            .unwrap()
            .insert("xds.lmwn.com/retry-status".to_string(), "5xx".to_string());
        let resources = resources_from_services(&[svc]);
        let route = resources
            .iter()
            .find_map(|r| match r {
                Resource::RouteConfiguration(rc) => Some(rc),
                _ => None,
            })
            .unwrap();
        let action = &route.virtual_hosts[0].routes[0].action;
        match action {
            Some(Action::Route(ra)) => {
                assert_eq!(ra.retry_policy.as_ref().unwrap().retry_on, "5xx");
            }
            _ => panic!("expected a route action"),
        }
    }
}
