//! Runtime configuration: layered TOML file plus CLI/env overrides, using
//! the `config` + `clap` combination.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::model::PeerEndpoint;
use crate::seeds::NetworkTag;

#[derive(Debug, Parser)]
#[command(name = "addrman-node", about = "Peer discovery and address management daemon")]
pub struct Args {
    /// Path to a TOML config file. Missing is fine; CLI flags and defaults
    /// still apply.
    #[arg(long, env = "ADDRMAN_CONFIG")]
    pub config: Option<PathBuf>,

    /// Local address to listen on for inbound peer connections.
    #[arg(long, env = "ADDRMAN_LISTEN")]
    pub listen: Option<SocketAddr>,

    /// host:port of a configured introducer to bootstrap from.
    #[arg(long, env = "ADDRMAN_INTRODUCER")]
    pub introducer: Option<String>,

    /// Directory the AddrMan snapshot and any other state live under.
    #[arg(long, env = "ADDRMAN_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Target number of outbound connections to maintain.
    #[arg(long, env = "ADDRMAN_TARGET_OUTBOUND")]
    pub target_outbound_count: Option<usize>,

    #[arg(long, value_enum, default_value = "info", env = "ADDRMAN_LOG")]
    pub log_level: LogLevel,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Fully resolved configuration: file defaults overridden by CLI/env, the
/// same precedence order the `config` crate's layered `Config::builder`
/// applies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub listen: SocketAddr,
    pub introducer: Option<PeerEndpoint>,
    pub data_dir: PathBuf,
    pub target_outbound_count: usize,
    pub peer_connect_interval_secs: u64,
    pub network: NetworkTagConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetworkTagConfig {
    Main,
    Test,
}

impl From<NetworkTagConfig> for NetworkTag {
    fn from(value: NetworkTagConfig) -> Self {
        match value {
            NetworkTagConfig::Main => NetworkTag::Main,
            NetworkTagConfig::Test => NetworkTag::Test,
        }
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8333".parse().expect("valid default listen address"),
            introducer: None,
            data_dir: PathBuf::from("./data"),
            target_outbound_count: 8,
            peer_connect_interval_secs: 5,
            network: NetworkTagConfig::Main,
        }
    }
}

impl NodeConfig {
    /// Build from an optional TOML file layered under CLI/env overrides.
    pub fn load(args: &Args) -> anyhow::Result<Self> {
        let mut builder = config::Config::builder().add_source(config::Config::try_from(&NodeConfig::default())?);

        if let Some(path) = &args.config {
            builder = builder.add_source(config::File::from(path.as_path()).required(false));
        }

        let settings = builder.build()?;
        let mut cfg: NodeConfig = settings.try_deserialize()?;

        if let Some(listen) = args.listen {
            cfg.listen = listen;
        }
        if let Some(introducer) = &args.introducer {
            cfg.introducer = Some(parse_host_port(introducer)?);
        }
        if let Some(data_dir) = &args.data_dir {
            cfg.data_dir = data_dir.clone();
        }
        if let Some(target) = args.target_outbound_count {
            cfg.target_outbound_count = target;
        }

        Ok(cfg)
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.data_dir.join("addrman.bin")
    }
}

fn parse_host_port(value: &str) -> anyhow::Result<PeerEndpoint> {
    let (host, port) = value
        .rsplit_once(':')
        .ok_or_else(|| anyhow::anyhow!("expected host:port, got {value}"))?;
    let port: u16 = port.parse()?;
    Ok(PeerEndpoint::new(host.to_string(), port))
}
