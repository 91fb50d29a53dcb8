//! State-of-the-World long-poll: suspend a `DiscoveryRequest` until a
//! snapshot with a version the client hasn't acked yet becomes available.

use std::collections::HashSet;
use std::sync::Arc;

use lmwn_xds_core::{Resource, TypeUrl};
use tokio::sync::watch;

use crate::snapshot::Snapshot;

/// The result of one SotW poll: the version now current, and the resources
/// of the requested type matching the watcher's subscription at that
/// version.
pub struct SotwUpdate {
    pub version: String,
    pub resources: Vec<lmwn_xds_core::Resource>,
}

/// Wait until the cache holds a snapshot whose version for `type_url`
/// differs from `last_sent_version`, then return it, filtered to
/// `subscribed`. An empty `subscribed` set means "everything" for
/// wildcard-eligible types (Listener, Cluster) and "nothing" otherwise, per
/// `TypeUrl::wildcard_when_empty`. Returns immediately if the current
/// snapshot already qualifies (e.g. a client's very first request, where
/// `last_sent_version` is `None`).
///
/// Dropping the returned future releases the subscription — there is no
/// separate cancel handle to manage.
pub async fn next_update(
    rx: &mut watch::Receiver<Arc<Snapshot>>,
    type_url: TypeUrl,
    last_sent_version: Option<&str>,
    subscribed: &HashSet<String>,
) -> SotwUpdate {
    loop {
        {
            let snapshot = rx.borrow_and_update();
            if last_sent_version != Some(snapshot.version_for(type_url)) {
                return SotwUpdate {
                    version: snapshot.version_for(type_url).to_string(),
                    resources: filtered_resources(&snapshot, type_url, subscribed),
                };
            }
        }

        if rx.changed().await.is_err() {
            let snapshot = rx.borrow();
            return SotwUpdate {
                version: snapshot.version_for(type_url).to_string(),
                resources: filtered_resources(&snapshot, type_url, subscribed),
            };
        }
    }
}

fn filtered_resources(snapshot: &Snapshot, type_url: TypeUrl, subscribed: &HashSet<String>) -> Vec<Resource> {
    let wildcard = subscribed.is_empty() && type_url.wildcard_when_empty();
    snapshot
        .resources(type_url)
        .iter()
        .filter(|r| wildcard || subscribed.contains(r.name()))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::SnapshotCache;
    use envoy_types::pb::envoy::config::cluster::v3::Cluster;
    use lmwn_xds_core::Resource;

    fn cluster(name: &str) -> Resource {
        Resource::Cluster(Cluster {
            name: name.to_string(),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn first_request_returns_the_current_snapshot_immediately() {
        let cache = SnapshotCache::new();
        cache.set_snapshot("1".to_string(), vec![cluster("a")]);
        let mut rx = cache.subscribe();
        let update = next_update(&mut rx, TypeUrl::Cluster, None, &HashSet::new()).await;
        assert_eq!(update.version, "1");
        assert_eq!(update.resources.len(), 1);
    }

    #[tokio::test]
    async fn matching_version_suspends_until_the_next_advance() {
        let cache = SnapshotCache::new();
        cache.set_snapshot("1".to_string(), vec![cluster("a")]);
        let mut rx = cache.subscribe();

        let wait = tokio::spawn(async move {
            next_update(&mut rx, TypeUrl::Cluster, Some("1"), &HashSet::new()).await
        });
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert!(!wait.is_finished());

        cache.set_snapshot("2".to_string(), vec![cluster("b")]);
        let update = wait.await.unwrap();
        assert_eq!(update.version, "2");
    }

    #[tokio::test]
    async fn wildcard_type_with_empty_subscription_gets_everything() {
        let cache = SnapshotCache::new();
        cache.set_snapshot("1".to_string(), vec![cluster("a"), cluster("b")]);
        let mut rx = cache.subscribe();
        let update = next_update(&mut rx, TypeUrl::Cluster, None, &HashSet::new()).await;
        assert_eq!(update.resources.len(), 2);
    }

    #[tokio::test]
    async fn non_wildcard_type_with_empty_subscription_gets_nothing() {
        let cache = SnapshotCache::new();
        cache.set_snapshot("1".to_string(), vec![cluster("a")]);
        let mut rx = cache.subscribe();
        let update = next_update(&mut rx, TypeUrl::ClusterLoadAssignment, None, &HashSet::new()).await;
        assert!(update.resources.is_empty());
    }

    #[tokio::test]
    async fn explicit_subscription_filters_to_the_named_resources() {
        let cache = SnapshotCache::new();
        cache.set_snapshot("1".to_string(), vec![cluster("a"), cluster("b")]);
        let mut rx = cache.subscribe();
        let subscribed: HashSet<String> = ["a".to_string()].into_iter().collect();
        let update = next_update(&mut rx, TypeUrl::Cluster, None, &subscribed).await;
        assert_eq!(update.resources.len(), 1);
        assert_eq!(update.resources[0].name(), "a");
    }
}
