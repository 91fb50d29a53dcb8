//! An immutable, versioned set of resources grouped by type URL, broadcast
//! to every subscriber as one atomic `Arc` swap.

use std::collections::HashMap;
use std::sync::Arc;

use lmwn_xds_core::{hash_resources, Resource, TypeUrl};
use tokio::sync::watch;

/// One version of the resource world for a single cache domain.
#[derive(Debug, Clone)]
pub struct Snapshot {
    version: String,
    resources: HashMap<TypeUrl, Vec<Resource>>,
}

impl Snapshot {
    pub fn new(version: String, resources: HashMap<TypeUrl, Vec<Resource>>) -> Self {
        Self { version, resources }
    }

    pub fn empty() -> Self {
        Self {
            version: String::new(),
            resources: HashMap::new(),
        }
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Every version the snapshot reports is the same string: the original
    /// tracks one version per type URL, but this control plane only ever
    /// advances them together.
    pub fn version_for(&self, _type_url: TypeUrl) -> &str {
        &self.version
    }

    pub fn resources(&self, type_url: TypeUrl) -> &[Resource] {
        self.resources
            .get(&type_url)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn type_urls(&self) -> impl Iterator<Item = TypeUrl> + '_ {
        self.resources.keys().copied()
    }
}

/// A single-node snapshot cache: there is exactly one logical subscriber
/// identity (the empty node hash, per the upstream control plane's
/// `EmptyNodeID`), so this is a broadcast `watch` channel rather than a
/// per-node registry.
pub struct SnapshotCache {
    tx: watch::Sender<Arc<Snapshot>>,
    last_hash: std::sync::Mutex<Option<u64>>,
}

impl SnapshotCache {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Arc::new(Snapshot::empty()));
        Self {
            tx,
            last_hash: std::sync::Mutex::new(None),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<Snapshot>> {
        self.tx.subscribe()
    }

    pub fn fetch(&self) -> Arc<Snapshot> {
        self.tx.borrow().clone()
    }

    /// Install a new snapshot, deduplicating against the previous one by
    /// content hash so an unchanged world never advances the version seen
    /// by subscribers. Returns whether the snapshot actually changed.
    pub fn set_snapshot(&self, version: String, mut resources: Vec<Resource>) -> bool {
        let hash = hash_resources(&mut resources);
        {
            let mut last_hash = self.last_hash.lock().unwrap();
            if *last_hash == Some(hash) {
                tracing::debug!("new snapshot is equivalent to the previous one");
                return false;
            }
            *last_hash = Some(hash);
        }

        let mut by_type: HashMap<TypeUrl, Vec<Resource>> = HashMap::new();
        for resource in resources {
            by_type.entry(resource.type_url()).or_default().push(resource);
        }

        self.tx.send_replace(Arc::new(Snapshot::new(version, by_type)));
        true
    }
}

impl Default for SnapshotCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use envoy_types::pb::envoy::config::cluster::v3::Cluster;

    fn cluster(name: &str) -> Resource {
        Resource::Cluster(Cluster {
            name: name.to_string(),
            ..Default::default()
        })
    }

    #[test]
    fn set_snapshot_reports_whether_content_changed() {
        let cache = SnapshotCache::new();
        assert!(cache.set_snapshot("1".to_string(), vec![cluster("a")]));
        assert!(!cache.set_snapshot("2".to_string(), vec![cluster("a")]));
        assert!(cache.set_snapshot("3".to_string(), vec![cluster("b")]));
    }

    #[test]
    fn fetch_reflects_the_latest_snapshot() {
        let cache = SnapshotCache::new();
        cache.set_snapshot("1".to_string(), vec![cluster("a")]);
        let snap = cache.fetch();
        assert_eq!(snap.version(), "1");
        assert_eq!(snap.resources(TypeUrl::Cluster).len(), 1);
    }

    #[tokio::test]
    async fn subscribers_observe_each_real_advance() {
        let cache = SnapshotCache::new();
        let mut rx = cache.subscribe();
        cache.set_snapshot("1".to_string(), vec![cluster("a")]);
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().version(), "1");

        // A dedup'd set_snapshot never fires a second `changed()`.
        cache.set_snapshot("2".to_string(), vec![cluster("a")]);
        assert!(
            tokio::time::timeout(std::time::Duration::from_millis(20), rx.changed())
                .await
                .is_err()
        );
    }
}
