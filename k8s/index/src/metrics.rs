//! Reflector-side metrics: settle events per resource kind, live resource
//! counts per xDS type URL (summed across both domain caches), and the API
//! Gateway backend-count gauge.

use std::collections::{BTreeMap, HashMap};

use lmwn_xds_core::Resource;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EncodeLabelSet)]
pub struct ResourceLabel {
    pub resource: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, EncodeLabelSet)]
pub struct TypeUrlLabel {
    pub type_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, EncodeLabelSet)]
pub struct ApiGatewayLabel {
    pub api_gateway: String,
}

#[derive(Debug, Clone, Default)]
pub struct IndexMetrics {
    kube_events: Family<ResourceLabel, Counter>,
    snapshot_resources: Family<TypeUrlLabel, Gauge>,
    apigateway_endpoints: Family<ApiGatewayLabel, Gauge>,
}

impl IndexMetrics {
    pub fn register(registry: &mut Registry) -> Self {
        let metrics = Self::default();
        registry.register(
            "xds_kube_events",
            "Number of settled reflector updates, by resource kind",
            metrics.kube_events.clone(),
        );
        registry.register(
            "xds_snapshot_resources",
            "Resources currently published, by type URL, summed across domains",
            metrics.snapshot_resources.clone(),
        );
        registry.register(
            "xds_apigateway_endpoints",
            "Distinct backend services routed under each API Gateway",
            metrics.apigateway_endpoints.clone(),
        );
        metrics
    }

    pub fn record_settle(&self, resource: &'static str) {
        self.kube_events
            .get_or_create(&ResourceLabel { resource })
            .inc();
    }

    /// Set the per-type-URL resource gauge from the resources a reflector
    /// just published. Each domain only ever contributes its own type
    /// URLs, so setting here rather than summing is equivalent to a sum
    /// across domains.
    pub fn set_snapshot_resource_counts(&self, resources: &[Resource]) {
        let mut counts: HashMap<&'static str, i64> = HashMap::new();
        for resource in resources {
            *counts.entry(resource.type_url().as_str()).or_insert(0) += 1;
        }
        for (type_url, count) in counts {
            self.snapshot_resources
                .get_or_create(&TypeUrlLabel { type_url: type_url.to_string() })
                .set(count);
        }
    }

    pub fn set_apigateway_endpoints(&self, counts: &BTreeMap<String, usize>) {
        for (gateway, count) in counts {
            self.apigateway_endpoints
                .get_or_create(&ApiGatewayLabel { api_gateway: gateway.clone() })
                .set(*count as i64);
        }
    }
}
