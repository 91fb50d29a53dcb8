//! Shared resource model: the xDS types this control plane emits, and the
//! type-URL/domain bookkeeping the cache and translators need without
//! depending on each other.

use envoy_types::pb::envoy::config::cluster::v3::Cluster;
use envoy_types::pb::envoy::config::endpoint::v3::ClusterLoadAssignment;
use envoy_types::pb::envoy::config::listener::v3::Listener;
use envoy_types::pb::envoy::config::route::v3::RouteConfiguration;
use envoy_types::pb::google::protobuf::Any;
use prost::Message;

/// The xDS discovery type URLs this control plane understands.
///
/// `Ord` follows declaration order; the derive gives us the total order the
/// hasher needs (type URL first, resource name second) without hand-writing
/// a match on string constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TypeUrl {
    Listener,
    RouteConfiguration,
    Cluster,
    ClusterLoadAssignment,
}

impl TypeUrl {
    pub const fn as_str(self) -> &'static str {
        match self {
            TypeUrl::Listener => "type.googleapis.com/envoy.config.listener.v3.Listener",
            TypeUrl::RouteConfiguration => {
                "type.googleapis.com/envoy.config.route.v3.RouteConfiguration"
            }
            TypeUrl::Cluster => "type.googleapis.com/envoy.config.cluster.v3.Cluster",
            TypeUrl::ClusterLoadAssignment => {
                "type.googleapis.com/envoy.config.endpoint.v3.ClusterLoadAssignment"
            }
        }
    }

    pub fn from_str(type_url: &str) -> Option<Self> {
        Some(match type_url {
            "type.googleapis.com/envoy.config.listener.v3.Listener" => TypeUrl::Listener,
            "type.googleapis.com/envoy.config.route.v3.RouteConfiguration" => {
                TypeUrl::RouteConfiguration
            }
            "type.googleapis.com/envoy.config.cluster.v3.Cluster" => TypeUrl::Cluster,
            "type.googleapis.com/envoy.config.endpoint.v3.ClusterLoadAssignment" => {
                TypeUrl::ClusterLoadAssignment
            }
            _ => return None,
        })
    }

    /// Which mux-cache domain this type belongs to.
    pub const fn domain(self) -> Domain {
        match self {
            TypeUrl::Listener | TypeUrl::RouteConfiguration | TypeUrl::Cluster => {
                Domain::Services
            }
            TypeUrl::ClusterLoadAssignment => Domain::Endpoints,
        }
    }

    /// Whether an empty SotW `resource_names` means "everything" for this
    /// type. Listener and Cluster are wildcard-eligible; Route and Endpoint
    /// require an explicit subscription, so empty means "none".
    pub const fn wildcard_when_empty(self) -> bool {
        matches!(self, TypeUrl::Listener | TypeUrl::Cluster)
    }
}

impl std::fmt::Display for TypeUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The two snapshot caches the mux cache routes requests between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Domain {
    Services,
    Endpoints,
}

impl Domain {
    pub const fn as_str(self) -> &'static str {
        match self {
            Domain::Services => "services",
            Domain::Endpoints => "endpoints",
        }
    }
}

/// One xDS resource, owning the concrete Envoy message it will marshal.
#[derive(Debug, Clone, PartialEq)]
pub enum Resource {
    Listener(Listener),
    RouteConfiguration(RouteConfiguration),
    Cluster(Cluster),
    ClusterLoadAssignment(ClusterLoadAssignment),
}

impl Resource {
    pub fn type_url(&self) -> TypeUrl {
        match self {
            Resource::Listener(_) => TypeUrl::Listener,
            Resource::RouteConfiguration(_) => TypeUrl::RouteConfiguration,
            Resource::Cluster(_) => TypeUrl::Cluster,
            Resource::ClusterLoadAssignment(_) => TypeUrl::ClusterLoadAssignment,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Resource::Listener(r) => &r.name,
            Resource::RouteConfiguration(r) => &r.name,
            Resource::Cluster(r) => &r.name,
            Resource::ClusterLoadAssignment(r) => &r.cluster_name,
        }
    }

    /// Deterministic protobuf encoding, used both for the wire `Any` and for
    /// hashing. `prost` encodes map fields and repeated fields in a stable
    /// order already; there is no separate "deterministic" mode to opt into
    /// the way `google.golang.org/protobuf` needs one.
    pub fn encode_to_vec(&self) -> Vec<u8> {
        match self {
            Resource::Listener(r) => r.encode_to_vec(),
            Resource::RouteConfiguration(r) => r.encode_to_vec(),
            Resource::Cluster(r) => r.encode_to_vec(),
            Resource::ClusterLoadAssignment(r) => r.encode_to_vec(),
        }
    }

    pub fn to_any(&self) -> Any {
        Any {
            type_url: self.type_url().as_str().to_string(),
            value: self.encode_to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_url_round_trips() {
        for t in [
            TypeUrl::Listener,
            TypeUrl::RouteConfiguration,
            TypeUrl::Cluster,
            TypeUrl::ClusterLoadAssignment,
        ] {
            assert_eq!(TypeUrl::from_str(t.as_str()), Some(t));
        }
    }

    #[test]
    fn domain_partitions_type_urls() {
        assert_eq!(TypeUrl::Listener.domain(), Domain::Services);
        assert_eq!(TypeUrl::RouteConfiguration.domain(), Domain::Services);
        assert_eq!(TypeUrl::Cluster.domain(), Domain::Services);
        assert_eq!(TypeUrl::ClusterLoadAssignment.domain(), Domain::Endpoints);
    }

    #[test]
    fn only_listener_and_cluster_wildcard_on_empty_resource_names() {
        assert!(TypeUrl::Listener.wildcard_when_empty());
        assert!(TypeUrl::Cluster.wildcard_when_empty());
        assert!(!TypeUrl::RouteConfiguration.wildcard_when_empty());
        assert!(!TypeUrl::ClusterLoadAssignment.wildcard_when_empty());
    }

    #[test]
    fn resource_name_reads_through_to_inner_message() {
        let r = Resource::Cluster(Cluster {
            name: "foo.bar:80".to_string(),
            ..Default::default()
        });
        assert_eq!(r.name(), "foo.bar:80");
        assert_eq!(r.type_url(), TypeUrl::Cluster);
    }
}
