//! Endpoints -> ClusterLoadAssignment, one per `(subset, port)` pair.
//!
//! `EndpointsTranslator` memoizes the translated resource slice for each
//! `Endpoints` object, keyed by `<namespace>/<name>` and valid only while
//! `resourceVersion` is unchanged. Endpoints churn dominates event volume,
//! so on a resync that settles a batch where most objects haven't actually
//! changed, most of the batch is a cache hit and skips the subset/port walk
//! entirely. The cache is owned by whichever task drives translation and is
//! never shared or locked — only one task ever calls `translate`.

use std::collections::HashMap;

use envoy_types::pb::envoy::config::core::v3::{
    socket_address::PortSpecifier, Address, Locality, SocketAddress,
};
use envoy_types::pb::envoy::config::endpoint::v3::{
    lb_endpoint::HostIdentifier, ClusterLoadAssignment, Endpoint as EndpointConfig, LbEndpoint,
    LocalityLbEndpoints,
};
use k8s_openapi::api::core::v1::{EndpointAddress, Endpoints};
use lmwn_xds_core::Resource;

#[derive(Default)]
pub struct EndpointsTranslator {
    /// `<namespace>/<name>` -> `(resourceVersion, translated resources)`.
    object_cache: HashMap<String, (String, Vec<Resource>)>,
}

impl EndpointsTranslator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn translate(&mut self, endpoints: &[Endpoints]) -> Vec<Resource> {
        let mut out = Vec::new();
        let mut seen = std::collections::HashSet::with_capacity(endpoints.len());

        for ep in endpoints {
            let name = ep.metadata.name.as_deref().unwrap_or_default();
            let namespace = ep.metadata.namespace.as_deref().unwrap_or_default();
            let key = format!("{namespace}/{name}");
            let resource_version = ep.metadata.resource_version.clone().unwrap_or_default();
            seen.insert(key.clone());

            if let Some((cached_version, cached)) = self.object_cache.get(&key) {
                if *cached_version == resource_version {
                    out.extend(cached.iter().cloned());
                    continue;
                }
            }

            let translated = translate_one(ep);
            out.extend(translated.iter().cloned());
            self.object_cache.insert(key, (resource_version, translated));
        }

        self.object_cache.retain(|key, _| seen.contains(key));
        out
    }
}

fn translate_one(ep: &Endpoints) -> Vec<Resource> {
    let mut out = Vec::new();
    let name = ep.metadata.name.as_deref().unwrap_or_default();
    let namespace = ep.metadata.namespace.as_deref().unwrap_or_default();

    if let Some(subsets) = ep.subsets.as_ref() {
        for subset in subsets {
            let Some(ports) = subset.ports.as_ref() else {
                continue;
            };
            let mut addresses = subset.addresses.clone().unwrap_or_default();
            addresses.sort_by(|a, b| a.ip.cmp(&b.ip));

            for port in ports {
                let port_name = match &port.name {
                    Some(n) if !n.is_empty() => format!("{name}.{namespace}:{n}"),
                    _ => format!("{name}.{namespace}:{}", port.port),
                };

                let mut lb_endpoints = Vec::with_capacity(addresses.len());
                for addr in &addresses {
                    let hostname = hostname_for(addr);
                    lb_endpoints.push(LbEndpoint {
                        host_identifier: Some(HostIdentifier::Endpoint(EndpointConfig {
                            address: Some(Address {
                                address: Some(
                                    envoy_types::pb::envoy::config::core::v3::address::Address::SocketAddress(
                                        SocketAddress {
                                            protocol:
                                                envoy_types::pb::envoy::config::core::v3::socket_address::Protocol::Tcp
                                                    .into(),
                                            address: addr.ip.clone(),
                                            port_specifier: Some(PortSpecifier::PortValue(
                                                port.port as u32,
                                            )),
                                            ..Default::default()
                                        },
                                    ),
                                ),
                            }),
                            hostname,
                            ..Default::default()
                        })),
                        ..Default::default()
                    });
                }

                out.push(Resource::ClusterLoadAssignment(ClusterLoadAssignment {
                    cluster_name: port_name,
                    endpoints: vec![LocalityLbEndpoints {
                        load_balancing_weight: Some(1),
                        locality: Some(Locality::default()),
                        lb_endpoints,
                        ..Default::default()
                    }],
                    ..Default::default()
                }));
            }
        }
    }

    out
}

/// `Hostname` -> `TargetRef.name.namespace` -> `NodeName` -> empty string.
fn hostname_for(addr: &EndpointAddress) -> String {
    if let Some(hostname) = addr.hostname.as_ref().filter(|h| !h.is_empty()) {
        return hostname.clone();
    }
    if let Some(target_ref) = addr.target_ref.as_ref() {
        if let Some(name) = target_ref.name.as_ref().filter(|n| !n.is_empty()) {
            let namespace = target_ref.namespace.as_deref().unwrap_or_default();
            return format!("{name}.{namespace}");
        }
    }
    if let Some(node_name) = addr.node_name.as_ref().filter(|n| !n.is_empty()) {
        return node_name.clone();
    }
    String::new()
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{EndpointPort, EndpointSubset, ObjectReference};

    fn endpoints_with_one_address() -> Endpoints {
        Endpoints {
            metadata: kube::core::ObjectMeta {
                name: Some("foo".to_string()),
                namespace: Some("bar".to_string()),
                resource_version: Some("1".to_string()),
                ..Default::default()
            },
            subsets: Some(vec![EndpointSubset {
                addresses: Some(vec![EndpointAddress {
                    ip: "10.0.0.1".to_string(),
                    hostname: None,
                    target_ref: Some(ObjectReference {
                        name: Some("pod-1".to_string()),
                        namespace: Some("bar".to_string()),
                        ..Default::default()
                    }),
                    node_name: None,
                    ..Default::default()
                }]),
                ports: Some(vec![EndpointPort {
                    name: Some("http".to_string()),
                    port: 80,
                    ..Default::default()
                }]),
                not_ready_addresses: None,
            }]),
        }
    }

    #[test]
    fn translates_one_subset_port_into_one_cla() {
        let mut t = EndpointsTranslator::new();
        let resources = t.translate(&[endpoints_with_one_address()]);
        assert_eq!(resources.len(), 1);
        match &resources[0] {
            Resource::ClusterLoadAssignment(cla) => {
                assert_eq!(cla.cluster_name, "foo.bar:http");
                assert_eq!(cla.endpoints[0].lb_endpoints.len(), 1);
            }
            _ => panic!("expected a ClusterLoadAssignment"),
        }
    }

    #[test]
    fn hostname_falls_back_to_target_ref_when_no_explicit_hostname() {
        let mut t = EndpointsTranslator::new();
        let resources = t.translate(&[endpoints_with_one_address()]);
        match &resources[0] {
            Resource::ClusterLoadAssignment(cla) => {
                let ep = match &cla.endpoints[0].lb_endpoints[0].host_identifier {
                    Some(HostIdentifier::Endpoint(e)) => e,
                    _ => panic!("expected an endpoint identifier"),
                };
                assert_eq!(ep.hostname, "pod-1.bar");
            }
            _ => panic!("expected a ClusterLoadAssignment"),
        }
    }

    #[test]
    fn unchanged_resource_version_reuses_the_cached_slice() {
        let mut t = EndpointsTranslator::new();
        let eps = endpoints_with_one_address();
        let first = t.translate(&[eps.clone()]);
        assert_eq!(t.object_cache.len(), 1);
        let second = t.translate(&[eps]);
        assert_eq!(second, first);
        assert_eq!(t.object_cache.len(), 1);
    }

    #[test]
    fn changed_resource_version_is_recomputed() {
        let mut t = EndpointsTranslator::new();
        let mut eps = endpoints_with_one_address();
        t.translate(&[eps.clone()]);

        eps.metadata.resource_version = Some("2".to_string());
        eps.subsets.as_mut().unwrap()[0].addresses.as_mut().unwrap()[0].ip = "10.0.0.2".to_string();
        let resources = t.translate(&[eps]);
        match &resources[0] {
            Resource::ClusterLoadAssignment(cla) => {
                let ep = match &cla.endpoints[0].lb_endpoints[0].host_identifier {
                    Some(HostIdentifier::Endpoint(e)) => e,
                    _ => panic!("expected an endpoint identifier"),
                };
                let addr = match ep.address.as_ref().unwrap().address.as_ref().unwrap() {
                    envoy_types::pb::envoy::config::core::v3::address::Address::SocketAddress(s) => &s.address,
                    _ => panic!("expected a socket address"),
                };
                assert_eq!(addr, "10.0.0.2");
            }
            _ => panic!("expected a ClusterLoadAssignment"),
        }
    }

    #[test]
    fn objects_absent_from_a_later_batch_are_evicted_from_the_cache() {
        let mut t = EndpointsTranslator::new();
        t.translate(&[endpoints_with_one_address()]);
        assert_eq!(t.object_cache.len(), 1);
        t.translate(&[]);
        assert_eq!(t.object_cache.len(), 0);
    }

    #[test]
    fn addresses_within_a_subset_are_sorted_by_ip() {
        let mut eps = endpoints_with_one_address();
        eps.subsets.as_mut().unwrap()[0].addresses = Some(vec![
            EndpointAddress {
                ip: "10.0.0.2".to_string(),
                hostname: None,
                target_ref: None,
                node_name: None,
                ..Default::default()
            },
            EndpointAddress {
                ip: "10.0.0.1".to_string(),
                hostname: None,
                target_ref: None,
                node_name: None,
                ..Default::default()
            },
        ]);

        let mut t = EndpointsTranslator::new();
        let resources = t.translate(&[eps]);
        match &resources[0] {
            Resource::ClusterLoadAssignment(cla) => {
                let ips: Vec<_> = cla.endpoints[0]
                    .lb_endpoints
                    .iter()
                    .map(|e| match &e.host_identifier {
                        Some(HostIdentifier::Endpoint(e)) => match e.address.as_ref().unwrap().address.as_ref().unwrap() {
                            envoy_types::pb::envoy::config::core::v3::address::Address::SocketAddress(s) => s.address.clone(),
                            _ => panic!("expected a socket address"),
                        },
                        _ => panic!("expected an endpoint identifier"),
                    })
                    .collect();
                assert_eq!(ips, vec!["10.0.0.1".to_string(), "10.0.0.2".to_string()]);
            }
            _ => panic!("expected a ClusterLoadAssignment"),
        }
    }
}
