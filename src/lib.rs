#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod admin;
mod cli;

pub use cli::Args;

use std::sync::Arc;

use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use lmwn_xds_cache::MuxCache;
use prometheus_client::registry::Registry;
use tracing_subscriber::EnvFilter;

/// Parses CLI args, wires up logging, the Kubernetes client, the metrics
/// registry, and the mux cache, then runs the admin server and the xDS
/// runtime side by side until a shutdown signal arrives.
pub async fn run(args: Args) -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let client = build_client(args.kubeconfig.as_deref()).await?;

    let mut registry = Registry::default();
    let metrics = lmwn_xds_runtime::Metrics::register(&mut registry);
    let registry = Arc::new(registry);

    let mux = Arc::new(MuxCache::new());
    let (drain_signal, drain_watch) = drain::channel();

    let admin = tokio::spawn(admin::serve(args.admin_addr, registry, mux.clone()));

    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("received shutdown signal, draining");
        drain_signal.drain().await;
    });

    let config = lmwn_xds_runtime::Config {
        grpc_addr: args.grpc_addr,
        stats_interval_seconds: args.statsinterval,
        enable_grpc_reflection: args.enable_grpc_reflection,
    };

    let result = lmwn_xds_runtime::run(config, client, mux, metrics, drain_watch).await;
    admin.abort();
    result
}

async fn build_client(kubeconfig: Option<&std::path::Path>) -> anyhow::Result<Client> {
    match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path)?;
            let config =
                Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default()).await?;
            Ok(Client::try_from(config)?)
        }
        None => Ok(Client::try_default().await?),
    }
}
