//! Incremental (Delta) xDS: track what a single stream has already been
//! sent, and compute only the add/update/remove set against a new
//! snapshot.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use lmwn_xds_core::{Resource, TypeUrl};
use tokio::sync::watch;

use crate::snapshot::Snapshot;

/// Per-stream bookkeeping of what has already been sent, keyed by resource
/// name. Lives for the lifetime of one Delta stream; never shared.
#[derive(Default)]
pub struct DeltaState {
    sent_hash: HashMap<String, u64>,
}

/// One incremental update: resources that are new or changed, and names
/// that disappeared from the snapshot since the last update.
pub struct DeltaUpdate {
    pub system_version: String,
    pub upserts: Vec<Resource>,
    pub removals: Vec<String>,
}

impl DeltaState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Diff `snapshot` against what this stream has already seen, honoring
    /// a subscription filter (empty means "all resources of this type").
    fn diff(&mut self, snapshot: &Snapshot, type_url: TypeUrl, subscribed: &HashSet<String>) -> Option<DeltaUpdate> {
        let mut upserts = Vec::new();
        let mut seen_names = HashSet::new();

        for resource in snapshot.resources(type_url) {
            if !subscribed.is_empty() && !subscribed.contains(resource.name()) {
                continue;
            }
            seen_names.insert(resource.name().to_string());

            let mut single = vec![resource.clone()];
            let hash = lmwn_xds_core::hash_resources(&mut single);
            if self.sent_hash.get(resource.name()) != Some(&hash) {
                self.sent_hash.insert(resource.name().to_string(), hash);
                upserts.push(resource.clone());
            }
        }

        let removals: Vec<String> = self
            .sent_hash
            .keys()
            .filter(|name| !seen_names.contains(*name))
            .filter(|name| subscribed.is_empty() || subscribed.contains(*name))
            .cloned()
            .collect();
        for name in &removals {
            self.sent_hash.remove(name);
        }

        if upserts.is_empty() && removals.is_empty() {
            None
        } else {
            Some(DeltaUpdate {
                system_version: snapshot.version_for(type_url).to_string(),
                upserts,
                removals,
            })
        }
    }
}

/// Wait until the snapshot produces a non-empty diff against `state`, then
/// return it and update `state` in place.
pub async fn next_update(
    rx: &mut watch::Receiver<Arc<Snapshot>>,
    type_url: TypeUrl,
    subscribed: &HashSet<String>,
    state: &mut DeltaState,
) -> DeltaUpdate {
    loop {
        let diffed = {
            let snapshot: Arc<Snapshot> = rx.borrow_and_update().clone();
            state.diff(&snapshot, type_url, subscribed)
        };
        if let Some(update) = diffed {
            return update;
        }
        if rx.changed().await.is_err() {
            // Cache is gone; report an empty-but-present update so the
            // caller can observe the version and end the stream cleanly.
            let snapshot = rx.borrow();
            return DeltaUpdate {
                system_version: snapshot.version_for(type_url).to_string(),
                upserts: Vec::new(),
                removals: Vec::new(),
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::SnapshotCache;
    use envoy_types::pb::envoy::config::cluster::v3::Cluster;

    fn cluster(name: &str) -> Resource {
        Resource::Cluster(Cluster {
            name: name.to_string(),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn first_diff_reports_every_resource_as_an_upsert() {
        let cache = SnapshotCache::new();
        cache.set_snapshot("1".to_string(), vec![cluster("a"), cluster("b")]);
        let mut rx = cache.subscribe();
        let mut state = DeltaState::new();
        let update = next_update(&mut rx, TypeUrl::Cluster, &HashSet::new(), &mut state).await;
        assert_eq!(update.upserts.len(), 2);
        assert!(update.removals.is_empty());
    }

    #[tokio::test]
    async fn unchanged_resource_is_not_resent() {
        let cache = SnapshotCache::new();
        cache.set_snapshot("1".to_string(), vec![cluster("a")]);
        let mut rx = cache.subscribe();
        let mut state = DeltaState::new();
        next_update(&mut rx, TypeUrl::Cluster, &HashSet::new(), &mut state).await;

        cache.set_snapshot("2".to_string(), vec![cluster("a"), cluster("b")]);
        let update = next_update(&mut rx, TypeUrl::Cluster, &HashSet::new(), &mut state).await;
        assert_eq!(update.upserts.len(), 1);
        assert_eq!(update.upserts[0].name(), "b");
    }

    #[tokio::test]
    async fn removed_resource_is_reported_once() {
        let cache = SnapshotCache::new();
        cache.set_snapshot("1".to_string(), vec![cluster("a"), cluster("b")]);
        let mut rx = cache.subscribe();
        let mut state = DeltaState::new();
        next_update(&mut rx, TypeUrl::Cluster, &HashSet::new(), &mut state).await;

        cache.set_snapshot("2".to_string(), vec![cluster("a")]);
        let update = next_update(&mut rx, TypeUrl::Cluster, &HashSet::new(), &mut state).await;
        assert!(update.upserts.is_empty());
        assert_eq!(update.removals, vec!["b".to_string()]);
    }
}
