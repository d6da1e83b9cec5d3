//! Config - CLI フラグと JSON ファイルの統合
//!
//! 優先順位: CLI で明示したフラグ > JSON ファイル > 組み込みデフォルト

use std::fmt::Debug;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, bail};
use clap::Parser;
use serde::Deserialize;
use tracing::info;

use courier_core::StoreConfig;

use crate::queue_sink::SinkConfig;

const DEFAULT_IP: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8888;
const DEFAULT_TIMEOUT_MS: u64 = 60_000;
const DEFAULT_LOCAL_STORE: &str = "/tmp/local-store";

/// courier - durable local relay from HTTP to a remote queue
#[derive(Debug, Default, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// IP on which the server accepts connections (default: 0.0.0.0)
    #[arg(long)]
    pub ip: Option<String>,

    /// Port on which the server accepts connections (default: 8888)
    #[arg(long)]
    pub port: Option<u16>,

    /// How often the relay re-checks an idle store, in ms; 0 disables it (default: 60000)
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// Directory where messages are kept until delivered (default: /tmp/local-store)
    #[arg(long)]
    pub local_store: Option<PathBuf>,

    /// Custom queue endpoint, e.g. a localstack URL
    #[arg(long)]
    pub endpoint: Option<String>,

    /// Destination queue URL
    #[arg(long)]
    pub queue: Option<String>,

    /// JSON file with the options; flags given here override it
    #[arg(long)]
    pub conf_file: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    pub verbose: bool,
}

/// Options as they appear in the JSON file. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FileConfig {
    #[serde(rename = "IP")]
    pub ip: Option<String>,
    pub port: Option<u16>,
    #[serde(rename = "TimeoutMS")]
    pub timeout_ms: Option<u64>,
    pub local_store: Option<PathBuf>,
    pub endpoint: Option<String>,
    pub queue: Option<String>,
}

impl FileConfig {
    pub fn read(path: &Path) -> anyhow::Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("couldn't open the configuration file {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("couldn't decode the configuration file {}", path.display()))
    }
}

/// Resolved configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub ip: String,
    pub port: u16,
    pub timeout_ms: u64,
    pub local_store: PathBuf,
    pub endpoint: String,
    pub queue: String,
}

impl Config {
    /// Read the config file named by `--conf-file` (if any) and merge.
    pub fn load(args: &Args) -> anyhow::Result<Self> {
        let file = match &args.conf_file {
            Some(path) => FileConfig::read(path)?,
            None => FileConfig::default(),
        };
        let config = Self::merge(file, args);
        config.validate()?;
        Ok(config)
    }

    pub fn merge(file: FileConfig, args: &Args) -> Self {
        Self {
            ip: pick("IP", args.ip.clone(), file.ip, || DEFAULT_IP.to_string()),
            port: pick("Port", args.port, file.port, || DEFAULT_PORT),
            timeout_ms: pick("TimeoutMS", args.timeout_ms, file.timeout_ms, || {
                DEFAULT_TIMEOUT_MS
            }),
            local_store: pick("LocalStore", args.local_store.clone(), file.local_store, || {
                PathBuf::from(DEFAULT_LOCAL_STORE)
            }),
            endpoint: pick("Endpoint", args.endpoint.clone(), file.endpoint, String::new),
            queue: pick("Queue", args.queue.clone(), file.queue, String::new),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.queue.trim().is_empty() {
            bail!("no destination queue configured (use --queue or \"Queue\" in the config file)");
        }
        Ok(())
    }

    pub fn log(&self) {
        info!("starting with options:");
        info!("  - IP: {}", self.ip);
        info!("  - Port: {}", self.port);
        info!("  - TimeoutMS: {}", self.timeout_ms);
        info!("  - LocalStore: {}", self.local_store.display());
        info!("  - Endpoint: {}", self.endpoint);
        info!("  - Queue: {}", self.queue);
    }

    pub fn store_config(&self) -> StoreConfig {
        StoreConfig::new(&self.local_store, Duration::from_millis(self.timeout_ms))
    }

    pub fn sink_config(&self) -> SinkConfig {
        let endpoint = self.endpoint.trim();
        SinkConfig {
            endpoint: (!endpoint.is_empty()).then(|| endpoint.to_string()),
            queue: self.queue.clone(),
        }
    }
}

fn pick<T: Debug>(field: &str, cli: Option<T>, file: Option<T>, default: impl FnOnce() -> T) -> T {
    match (cli, file) {
        (Some(cli), Some(file)) => {
            info!(field, file = ?file, cli = ?cli, "overriding the config file value with the command line");
            cli
        }
        (Some(value), None) | (None, Some(value)) => value,
        (None, None) => default(),
    }
}
