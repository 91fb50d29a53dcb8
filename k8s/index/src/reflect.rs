//! A minimal List+Watch reflector: maintain a local store keyed by
//! namespace/name, and call `emit` with the full, current list every time
//! the store settles after an event — never per individual add/update/
//! delete. Downstream translation only ever sees whole-world snapshots,
//! matching how `kube::runtime::watcher::Event::Restarted` already behaves
//! on reconnect.

use std::collections::BTreeMap;

use kube::runtime::watcher;
use kube::runtime::watcher::Event;
use kube::Resource;
use lmwn_xds_k8s_api::Watch;
use serde::de::DeserializeOwned;
use std::fmt::Debug;

fn key_of<T>(obj: &T) -> String
where
    T: Resource,
    T::DynamicType: Default,
{
    format!(
        "{}/{}",
        obj.namespace().unwrap_or_default(),
        obj.name_any()
    )
}

/// Drive `watch` forever, calling `emit` with the full store contents after
/// every settled change. Only returns when the underlying watch hits a
/// fatal error (bad RBAC, missing/mismatched CRD) that no amount of
/// retrying would fix; the caller is expected to treat that as fatal too.
pub async fn run<T, F>(mut watch: Watch<T>, mut emit: F) -> Result<(), watcher::Error>
where
    T: Resource + Clone + Debug + DeserializeOwned + Send + Sync + 'static,
    T::DynamicType: Default,
    F: FnMut(Vec<T>),
{
    let mut store: BTreeMap<String, T> = BTreeMap::new();

    loop {
        match watch.recv().await? {
            Event::Applied(obj) => {
                store.insert(key_of(&obj), obj);
            }
            Event::Deleted(obj) => {
                store.remove(&key_of(&obj));
            }
            Event::Restarted(objs) => {
                store = objs.into_iter().map(|o| (key_of(&o), o)).collect();
            }
        }
        emit(store.values().cloned().collect());
    }
}
