//! Configuration for the compute-chain node and its submit client
//!
//! Values are layered: built-in defaults, then an optional YAML/JSON/TOML
//! file, then `COMPUTE_CHAIN__<SECTION>__<KEY>` environment variables, then
//! explicit command line flags.

use crate::coordinator::MiningSettings;
use crate::error::{Error, Result};
use crate::pow::MAX_DIFFICULTY;
use crate::retry::RetryPolicy;
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// Prefix of configuration environment variables
pub const ENV_PREFIX: &str = "COMPUTE_CHAIN";

/// Log levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        };
        f.write_str(level)
    }
}

/// Log output formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Plain,
    Json,
    Pretty,
}

/// Command line interface
#[derive(Debug, Parser)]
#[command(
    name = "compute-chain",
    version = env!("CARGO_PKG_VERSION"),
    about = "Outsourced computation node with a proof-of-work linked result chain"
)]
pub struct Cli {
    /// Configuration file path (YAML, JSON or TOML)
    #[arg(long, global = true, value_name = "FILE")]
    pub config_file: Option<PathBuf>,

    /// Log level
    #[arg(short = 'l', long, global = true)]
    pub log_level: Option<LogLevel>,

    /// Log output format
    #[arg(long, global = true)]
    pub log_format: Option<LogFormat>,

    /// Also write logs to this file (rotated daily)
    #[arg(long, global = true, value_name = "FILE")]
    pub log_file: Option<PathBuf>,

    /// Print the effective configuration and exit
    #[arg(long, global = true)]
    pub print_config: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run a node: accept computations, execute them and mine result blocks
    Node(NodeArgs),
    /// Publish a program and its input and ask peers to run it
    Submit(SubmitArgs),
}

/// Flags of the `node` subcommand; each overrides the layered configuration
#[derive(Debug, Default, Clone, Args)]
pub struct NodeArgs {
    /// Interface the HTTP server binds to
    #[arg(long)]
    pub interface: Option<String>,

    /// Port the HTTP server listens on
    #[arg(short = 'p', long)]
    pub port: Option<u16>,

    /// Transactions per block
    #[arg(short = 'b', long)]
    pub batch_size: Option<usize>,

    /// Leading zero hex characters required of block hashes
    #[arg(short = 'd', long)]
    pub difficulty: Option<u32>,

    /// Creator id recorded in mined blocks
    #[arg(long)]
    pub creator: Option<String>,

    /// IPFS HTTP API endpoint
    #[arg(long)]
    pub ipfs_api: Option<String>,

    /// IPFS gateway endpoint
    #[arg(long)]
    pub ipfs_gateway: Option<String>,

    /// Interpreter used to run programs
    #[arg(long)]
    pub interpreter: Option<String>,

    /// Directory downloaded programs are run in
    #[arg(long, value_name = "DIR")]
    pub work_dir: Option<PathBuf>,

    /// Peer to announce blocks to (repeatable)
    #[arg(long = "peer", value_name = "HOST")]
    pub peers: Vec<String>,
}

/// Flags of the `submit` subcommand
#[derive(Debug, Clone, Args)]
pub struct SubmitArgs {
    /// Program to run
    #[arg(value_name = "PROGRAM")]
    pub program: PathBuf,

    /// Input passed to the program
    #[arg(value_name = "INPUT")]
    pub input: PathBuf,

    /// Peer to send the request to (repeatable)
    #[arg(long = "peer", value_name = "HOST")]
    pub peers: Vec<String>,

    /// Port peers listen on
    #[arg(long)]
    pub peer_port: Option<u16>,

    /// IPFS HTTP API endpoint
    #[arg(long)]
    pub ipfs_api: Option<String>,
}

/// Complete node configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub server: ServerConfig,
    pub mining: MiningConfig,
    pub storage: StorageConfig,
    pub execution: ExecutionConfig,
    pub broadcast: BroadcastConfig,
    pub retry: RetryConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub interface: String,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MiningConfig {
    pub batch_size: usize,
    pub difficulty: u32,
    /// Generated at startup when unset
    pub creator: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub api_url: String,
    pub gateway_url: String,
    /// humantime duration, e.g. `30s`
    pub http_timeout: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    pub interpreter: String,
    pub work_dir: PathBuf,
    pub timeout: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BroadcastConfig {
    pub peers: Vec<String>,
    pub peer_port: u16,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: usize,
    pub base_delay: String,
    pub max_delay: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: LogLevel,
    pub format: LogFormat,
    pub file: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            interface: default_interface(),
            port: default_port(),
        }
    }
}

impl Default for MiningConfig {
    fn default() -> Self {
        Self {
            batch_size: 3,
            difficulty: 4,
            creator: None,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            api_url: "http://127.0.0.1:5001".to_string(),
            gateway_url: "http://127.0.0.1:8080".to_string(),
            http_timeout: "30s".to_string(),
        }
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            interpreter: "python".to_string(),
            work_dir: std::env::temp_dir(),
            timeout: "5m".to_string(),
        }
    }
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            peers: Vec::new(),
            peer_port: default_port(),
            path: "/blocks".to_string(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: "200ms".to_string(),
            max_delay: "5s".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Plain,
            file: None,
        }
    }
}

fn default_interface() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn parse_duration(name: &str, value: &str) -> Result<Duration> {
    humantime::parse_duration(value)
        .map_err(|e| Error::config(format!("Invalid {} '{}': {}", name, value, e)))
}

fn parse_url(name: &str, value: &str) -> Result<Url> {
    Url::parse(value).map_err(|e| Error::config(format!("Invalid {} '{}': {}", name, value, e)))
}

impl NodeConfig {
    /// Load defaults, the optional file and the process environment
    pub fn load(file: Option<&Path>) -> Result<Self> {
        Self::load_with_env(file, environment())
    }

    /// Same as [`load`](Self::load) with an explicit environment source
    pub fn load_with_env(file: Option<&Path>, env: config::Environment) -> Result<Self> {
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&NodeConfig::default())?);

        if let Some(path) = file {
            if !path.exists() {
                return Err(Error::config(format!(
                    "Configuration file {} does not exist",
                    path.display()
                )));
            }
            builder = builder.add_source(config::File::from(path));
        }

        let config: NodeConfig = builder.add_source(env).build()?.try_deserialize()?;
        Ok(config)
    }

    /// Apply global CLI flags
    pub fn apply_cli(&mut self, cli: &Cli) {
        if let Some(level) = cli.log_level {
            self.logging.level = level;
        }
        if let Some(format) = cli.log_format {
            self.logging.format = format;
        }
        if let Some(file) = &cli.log_file {
            self.logging.file = Some(file.clone());
        }
    }

    /// Apply `node` subcommand flags
    pub fn apply_node_args(&mut self, args: &NodeArgs) {
        if let Some(interface) = &args.interface {
            self.server.interface = interface.clone();
        }
        if let Some(port) = args.port {
            self.server.port = port;
        }
        if let Some(batch_size) = args.batch_size {
            self.mining.batch_size = batch_size;
        }
        if let Some(difficulty) = args.difficulty {
            self.mining.difficulty = difficulty;
        }
        if let Some(creator) = &args.creator {
            self.mining.creator = Some(creator.clone());
        }
        if let Some(api) = &args.ipfs_api {
            self.storage.api_url = api.clone();
        }
        if let Some(gateway) = &args.ipfs_gateway {
            self.storage.gateway_url = gateway.clone();
        }
        if let Some(interpreter) = &args.interpreter {
            self.execution.interpreter = interpreter.clone();
        }
        if let Some(work_dir) = &args.work_dir {
            self.execution.work_dir = work_dir.clone();
        }
        if !args.peers.is_empty() {
            self.broadcast.peers = args.peers.clone();
        }
    }

    /// Apply `submit` subcommand flags
    pub fn apply_submit_args(&mut self, args: &SubmitArgs) {
        if !args.peers.is_empty() {
            self.broadcast.peers = args.peers.clone();
        }
        if let Some(port) = args.peer_port {
            self.broadcast.peer_port = port;
        }
        if let Some(api) = &args.ipfs_api {
            self.storage.api_url = api.clone();
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.socket_addr()?;

        if self.mining.batch_size == 0 {
            return Err(Error::config("Batch size must be greater than 0"));
        }
        if self.mining.difficulty > MAX_DIFFICULTY {
            return Err(Error::config(format!(
                "Difficulty must be at most {}",
                MAX_DIFFICULTY
            )));
        }
        if matches!(&self.mining.creator, Some(c) if c.trim().is_empty()) {
            return Err(Error::config("Creator must not be empty"));
        }

        self.api_url()?;
        self.gateway_url()?;
        self.http_timeout()?;
        self.execution_timeout()?;

        if self.execution.interpreter.trim().is_empty() {
            return Err(Error::config("Interpreter must not be empty"));
        }

        if self.broadcast.peers.iter().any(|p| p.trim().is_empty()) {
            return Err(Error::config("Peer names must not be empty"));
        }

        if self.retry.max_attempts == 0 {
            return Err(Error::config("Retry attempts must be greater than 0"));
        }
        self.retry_policy()?;

        Ok(())
    }

    /// Address the HTTP server binds to
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        let ip: IpAddr = self
            .server
            .interface
            .parse()
            .map_err(|e| Error::config(format!("Invalid server interface: {}", e)))?;
        Ok(SocketAddr::new(ip, self.server.port))
    }

    pub fn api_url(&self) -> Result<Url> {
        parse_url("IPFS API URL", &self.storage.api_url)
    }

    pub fn gateway_url(&self) -> Result<Url> {
        parse_url("IPFS gateway URL", &self.storage.gateway_url)
    }

    pub fn http_timeout(&self) -> Result<Duration> {
        parse_duration("HTTP timeout", &self.storage.http_timeout)
    }

    pub fn execution_timeout(&self) -> Result<Duration> {
        parse_duration("execution timeout", &self.execution.timeout)
    }

    pub fn retry_policy(&self) -> Result<RetryPolicy> {
        Ok(RetryPolicy::new(
            self.retry.max_attempts,
            parse_duration("retry base delay", &self.retry.base_delay)?,
            parse_duration("retry max delay", &self.retry.max_delay)?,
        ))
    }

    /// Mining parameters, with a random creator id when none is configured
    pub fn mining_settings(&self) -> MiningSettings {
        let creator = self.mining.creator.clone().unwrap_or_else(|| {
            let id = uuid::Uuid::new_v4().simple().to_string();
            format!("node-{}", &id[..8])
        });
        MiningSettings {
            batch_size: self.mining.batch_size,
            difficulty: self.mining.difficulty,
            creator,
        }
    }

    /// Effective configuration as YAML
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}

/// `COMPUTE_CHAIN__SECTION__KEY` variables, peers as a comma separated list
pub fn environment() -> config::Environment {
    config::Environment::with_prefix(ENV_PREFIX)
        .separator("__")
        .list_separator(",")
        .with_list_parse_key("broadcast.peers")
        .try_parsing(true)
}
