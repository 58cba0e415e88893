//! Process CLI: the `clap`-derived arguments the binary itself accepts.
//! Not to be confused with [`crate::session`], the TCP line CLI a running
//! node exposes to operators.

use std::path::PathBuf;

use clap::Parser;
use log::info;

use crate::config::Configuration;
use crate::orchestrator::Orchestrator;

#[derive(Parser, Debug, Clone)]
#[command(name = "ombudsman", about = "Byzantine oral-messages consensus node")]
pub struct Cli {
    /// Optional TOML configuration file. CLI flags below override its values.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Address to bind the UDP gossip/consensus socket to. Overrides the
    /// config file's `[node] host` if given.
    #[arg(long)]
    pub host: Option<String>,

    /// UDP port for gossip and consensus traffic. `0` lets the OS choose.
    #[arg(long, default_value_t = 0)]
    pub udp_port: u16,

    /// TCP port for the CLI dispatcher. `0` lets the OS choose.
    #[arg(long, default_value_t = 0)]
    pub tcp_port: u16,

    /// A bootstrap peer as `host:port`. May be repeated; extends (not
    /// replaces) the config file's `[node] bootstrap_peers` list.
    #[arg(long = "bootstrap-peer")]
    pub bootstrap_peer: Vec<String>,

    /// Initial lying policy, as a percentage in `[0, 100]`. Overrides the
    /// config file's `[consensus] lie_percent` if given.
    #[arg(long)]
    pub lie_percent: Option<u8>,

    /// Configured upper bound on Byzantine peers in the deployment.
    /// Overrides the config file's `[consensus] fault_bound` if given.
    #[arg(long)]
    pub fault_bound: Option<usize>,
}

impl Cli {
    /// Merges a loaded config file (if any) with CLI overrides, then runs the
    /// node until the process is interrupted.
    pub async fn execute(self) -> anyhow::Result<()> {
        let mut config = match &self.config {
            Some(path) => Configuration::try_load(path)?,
            None => Configuration::default(),
        };

        if let Some(host) = self.host {
            config.node.host = host;
        }
        if self.udp_port != 0 {
            config.node.udp_port = self.udp_port;
        }
        if self.tcp_port != 0 {
            config.node.tcp_port = self.tcp_port;
        }
        config.node.bootstrap_peers.extend(self.bootstrap_peer);
        if let Some(lie_percent) = self.lie_percent {
            config.consensus.lie_percent = lie_percent;
        }
        if let Some(fault_bound) = self.fault_bound {
            config.consensus.fault_bound = fault_bound;
        }

        let (orchestrator, dispatcher) = Orchestrator::bind(&config).await?;
        info!(
            "node listening: udp={} tcp={}",
            orchestrator.udp_local_addr()?,
            dispatcher.local_addr()?,
        );

        tokio::select! {
            result = orchestrator.run() => result,
            () = dispatcher.run() => Ok(()),
            _ = tokio::signal::ctrl_c() => {
                info!("received interrupt, shutting down");
                Ok(())
            }
        }
    }
}
