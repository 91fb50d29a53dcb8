use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[clap(name = "lmwn-xds", about = "xDS control plane for Kubernetes Services")]
pub struct Args {
    #[clap(long, default_value = "info", env = "LMWN_XDS_LOG")]
    pub log_level: String,

    /// Path to a kubeconfig file. Falls back to in-cluster config, then
    /// `KUBECONFIG`, when unset.
    #[clap(long, env = "KUBECONFIG")]
    pub kubeconfig: Option<PathBuf>,

    #[clap(long, default_value = "0.0.0.0:5000")]
    pub grpc_addr: SocketAddr,

    #[clap(long, default_value = "0.0.0.0:9000")]
    pub admin_addr: SocketAddr,

    /// `LoadStatsResponse.load_reporting_interval`, in seconds.
    #[clap(long, default_value = "300")]
    pub statsinterval: i64,

    #[clap(long, env = "ENABLE_GRPC_REFLECTION")]
    pub enable_grpc_reflection: bool,
}

impl Args {
    pub async fn parse_and_run() -> anyhow::Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> anyhow::Result<()> {
        crate::run(self).await
    }
}
