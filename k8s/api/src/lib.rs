//! Thin re-export surface over `kube`/`k8s-openapi`, so the rest of the
//! workspace depends on one crate instead of pinning these two everywhere.

pub mod watch;

pub use k8s_openapi::api::core::v1::{
    Endpoints, EndpointSubset, Service, ServiceSpec, ServicePort,
};
pub use kube::runtime::watcher::Event as WatchEvent;
pub use kube::{Api, Client, Error};

pub use watch::Watch;
