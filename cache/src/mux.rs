//! Routes a request to the right domain's `SnapshotCache` by classifying
//! its type URL, the way the original's `MuxCache` dispatches between a
//! `services` cache and an `endpoints` cache.

use std::collections::HashMap;
use std::sync::Arc;

use lmwn_xds_core::{Domain, TypeUrl};

use crate::snapshot::SnapshotCache;

pub struct MuxCache {
    caches: HashMap<Domain, Arc<SnapshotCache>>,
}

impl MuxCache {
    pub fn new() -> Self {
        let mut caches = HashMap::new();
        caches.insert(Domain::Services, Arc::new(SnapshotCache::new()));
        caches.insert(Domain::Endpoints, Arc::new(SnapshotCache::new()));
        Self { caches }
    }

    pub fn domain(&self, domain: Domain) -> Arc<SnapshotCache> {
        self.caches
            .get(&domain)
            .expect("MuxCache::new registers every Domain variant")
            .clone()
    }

    /// Classify a type URL and route to the owning cache. Returns `None`
    /// for an unrecognized type URL, mirroring the original's
    /// `mapTypeURL` returning the empty string.
    pub fn for_type_url(&self, type_url: &str) -> Option<Arc<SnapshotCache>> {
        let type_url = TypeUrl::from_str(type_url)?;
        Some(self.domain(type_url.domain()))
    }

    pub fn domains(&self) -> impl Iterator<Item = (Domain, Arc<SnapshotCache>)> + '_ {
        self.caches.iter().map(|(d, c)| (*d, c.clone()))
    }
}

impl Default for MuxCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_listener_as_services() {
        let mux = MuxCache::new();
        let cache = mux.for_type_url(TypeUrl::Listener.as_str()).unwrap();
        assert!(Arc::ptr_eq(&cache, &mux.domain(Domain::Services)));
    }

    #[test]
    fn classifies_cluster_load_assignment_as_endpoints() {
        let mux = MuxCache::new();
        let cache = mux
            .for_type_url(TypeUrl::ClusterLoadAssignment.as_str())
            .unwrap();
        assert!(Arc::ptr_eq(&cache, &mux.domain(Domain::Endpoints)));
    }

    #[test]
    fn unknown_type_url_classifies_to_nothing() {
        let mux = MuxCache::new();
        assert!(mux
            .for_type_url("type.googleapis.com/envoy.config.core.v3.Nothing")
            .is_none());
    }
}
