//! Deterministic dedup hash over a resource set.
//!
//! Mirrors the original's `resourcesHash`: sort for a stable iteration
//! order, marshal each resource, feed the bytes plus a `0x00` separator into
//! a streaming 64-bit hash. We extend the sort key to `(type_url, name)`
//! instead of `name` alone, since two resources of different types can
//! legitimately share a name (a Cluster and a ClusterLoadAssignment both
//! keyed by host:port, for instance).

use twox_hash::XxHash64;

use crate::resource::Resource;
use std::hash::Hasher;

/// Hash a resource set for snapshot deduplication.
///
/// The input is sorted in place: callers that care about resource order
/// elsewhere should sort again afterward, or sort their own copy first.
pub fn hash_resources(resources: &mut [Resource]) -> u64 {
    resources.sort_by(|a, b| (a.type_url(), a.name()).cmp(&(b.type_url(), b.name())));

    let mut hasher = XxHash64::with_seed(0);
    for resource in resources.iter() {
        hasher.write(&resource.encode_to_vec());
        hasher.write(&[0u8]);
    }
    hasher.finish()
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
    fn hash_is_order_independent() {
        let mut a = vec![cluster("b"), cluster("a"), cluster("c")];
        let mut b = vec![cluster("c"), cluster("a"), cluster("b")];
        assert_eq!(hash_resources(&mut a), hash_resources(&mut b));
    }

    #[test]
    fn hash_is_deterministic() {
        let mut a = vec![cluster("a"), cluster("b")];
        let mut b = vec![cluster("a"), cluster("b")];
        assert_eq!(hash_resources(&mut a), hash_resources(&mut b));
    }

    #[test]
    fn hash_changes_with_content() {
        let mut a = vec![cluster("a")];
        let mut b = vec![cluster("a-renamed")];
        assert_ne!(hash_resources(&mut a), hash_resources(&mut b));
    }

    #[test]
    fn empty_set_has_a_stable_hash() {
        let mut a: Vec<Resource> = vec![];
        let mut b: Vec<Resource> = vec![];
        assert_eq!(hash_resources(&mut a), hash_resources(&mut b));
    }
}
