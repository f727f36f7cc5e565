//! Configuration management for the Timekeeper binary
//!
//! Sources, lowest precedence first:
//! - `conf/timekeeper.toml` (optional) or the file given with `--config`
//! - `TIMEKEEPER__*` environment variables (`TIMEKEEPER__TRANSPORT__KIND=unix`)
//! - command line flags

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, anyhow, bail};
use clap::Parser;
use config::{Config, ConfigError, Environment, File};
use tracing::Level;

use timekeeper_common::DEFAULT_TCP_CONTROLLER_ADDRESS;
use timekeeper_core::{AdmissionPolicy, CoordinationConfig};

use crate::startup::LoggingConfig;

const DEFAULT_CONFIG_FILE: &str = "conf/timekeeper";

pub const TRANSPORT_KIND: &str = "transport.kind";
pub const TRANSPORT_CONTROLLER_ADDRESS: &str = "transport.controller_address";
pub const TRANSPORT_SOCKET_DIR: &str = "transport.socket_dir";
pub const LOG_LEVEL: &str = "log.level";
pub const LOG_DIR: &str = "log.dir";
pub const LOG_CONSOLE: &str = "log.console";
pub const LOG_FILE: &str = "log.file";

/// Command line arguments
#[derive(Debug, Clone, Default, Parser)]
#[command(name = "timekeeper", version, about = "Leader-elected time broadcast")]
pub struct Cli {
    /// Run as the controller instead of a node
    #[arg(short = 'C', long = "controller")]
    pub controller: bool,
    /// Transport used by every participant: tcp or unix
    #[arg(long = "transport")]
    pub transport: Option<String>,
    /// Well-known controller address
    #[arg(long = "controller-address")]
    pub controller_address: Option<String>,
    /// Configuration file
    #[arg(long = "config", env = "TIMEKEEPER_CONFIG")]
    pub config: Option<PathBuf>,
    /// Log level for console and file output
    #[arg(long = "log-level")]
    pub log_level: Option<String>,
}

impl Cli {
    /// Arguments for a spawned controller so it shares this node's settings
    pub fn controller_args(&self) -> Vec<String> {
        let mut args = vec!["-C".to_string()];
        if let Some(v) = &self.transport {
            args.extend(["--transport".to_string(), v.clone()]);
        }
        if let Some(v) = &self.controller_address {
            args.extend(["--controller-address".to_string(), v.clone()]);
        }
        if let Some(v) = &self.config {
            args.extend(["--config".to_string(), v.display().to_string()]);
        }
        if let Some(v) = &self.log_level {
            args.extend(["--log-level".to_string(), v.clone()]);
        }
        args
    }
}

/// Which transport the participants talk over
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Tcp,
    Unix,
}

impl FromStr for TransportKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "tcp" => Ok(TransportKind::Tcp),
            "unix" => Ok(TransportKind::Unix),
            other => bail!("unknown transport '{}', expected tcp or unix", other),
        }
    }
}

/// Application configuration loaded from config files, environment, and flags
#[derive(Clone, Debug, Default)]
pub struct Configuration {
    pub config: Config,
}

impl Configuration {
    pub fn from_cli(cli: &Cli) -> anyhow::Result<Self> {
        let file = match &cli.config {
            Some(path) => File::from(path.as_path()).required(true),
            None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        let mut builder = Config::builder().add_source(file).add_source(
            Environment::with_prefix("TIMEKEEPER")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        if let Some(v) = &cli.transport {
            builder = builder.set_override(TRANSPORT_KIND, v.as_str())?;
        }
        if let Some(v) = &cli.controller_address {
            builder = builder.set_override(TRANSPORT_CONTROLLER_ADDRESS, v.as_str())?;
        }
        if let Some(v) = &cli.log_level {
            builder = builder.set_override(LOG_LEVEL, v.as_str())?;
        }

        let config = builder
            .build()
            .context("Failed to build configuration")?;
        Ok(Configuration { config })
    }

    // ========================================================================
    // Transport Configuration
    // ========================================================================

    pub fn transport_kind(&self) -> anyhow::Result<TransportKind> {
        self.config
            .get_string(TRANSPORT_KIND)
            .unwrap_or("tcp".to_string())
            .parse()
    }

    /// Controller address, if one was configured
    pub fn controller_address(&self) -> Option<String> {
        self.config.get_string(TRANSPORT_CONTROLLER_ADDRESS).ok()
    }

    pub fn tcp_controller_address(&self) -> String {
        self.controller_address()
            .unwrap_or(DEFAULT_TCP_CONTROLLER_ADDRESS.to_string())
    }

    pub fn socket_dir(&self) -> PathBuf {
        self.config
            .get_string(TRANSPORT_SOCKET_DIR)
            .map(PathBuf::from)
            .unwrap_or_else(|_| std::env::temp_dir().join("timekeeper"))
    }

    // ========================================================================
    // Coordination Configuration
    // ========================================================================

    /// Integer at `key`, `None` when the key is absent
    fn int(&self, key: &str) -> anyhow::Result<Option<i64>> {
        match self.config.get_int(key) {
            Ok(v) => Ok(Some(v)),
            Err(ConfigError::NotFound(_)) => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Invalid value for {}", key)),
        }
    }

    /// Non-negative integer at `key` converted to `T`, or `default` when absent
    fn count<T: TryFrom<i64>>(&self, key: &str, default: T) -> anyhow::Result<T> {
        match self.int(key)? {
            Some(v) => T::try_from(v)
                .map_err(|_| anyhow!("Invalid value for {}: {} is out of range", key, v)),
            None => Ok(default),
        }
    }

    fn millis(&self, key: &str, default: Duration) -> anyhow::Result<Duration> {
        match self.int(key)? {
            Some(v) => u64::try_from(v)
                .map(Duration::from_millis)
                .map_err(|_| anyhow!("Invalid value for {}: {} is negative", key, v)),
            None => Ok(default),
        }
    }

    pub fn to_coordination_config(&self) -> anyhow::Result<CoordinationConfig> {
        let defaults = CoordinationConfig::default();

        let admission_policy = match self
            .config
            .get::<AdmissionPolicy>("coordination.admission_policy")
        {
            Ok(policy) => policy,
            Err(ConfigError::NotFound(_)) => defaults.admission_policy,
            Err(e) => return Err(e).context("Invalid value for coordination.admission_policy"),
        };
        let max_members = self.count("coordination.max_members", defaults.max_members)?;
        let max_controller_report_failures = self.count(
            "coordination.max_controller_report_failures",
            defaults.max_controller_report_failures,
        )?;

        let config = CoordinationConfig {
            controller_accept_timeout: self.millis(
                "coordination.controller_accept_timeout_ms",
                defaults.controller_accept_timeout,
            )?,
            leader_stale_after: self.millis(
                "coordination.leader_stale_after_ms",
                defaults.leader_stale_after,
            )?,
            relay_connect_timeout: self.millis(
                "coordination.relay_connect_timeout_ms",
                defaults.relay_connect_timeout,
            )?,
            election_connect_timeout: self.millis(
                "coordination.election_connect_timeout_ms",
                defaults.election_connect_timeout,
            )?,
            startup_connect_timeout: self.millis(
                "coordination.startup_connect_timeout_ms",
                defaults.startup_connect_timeout,
            )?,
            client_accept_timeout: self.millis(
                "coordination.client_accept_timeout_ms",
                defaults.client_accept_timeout,
            )?,
            server_accept_timeout: self.millis(
                "coordination.server_accept_timeout_ms",
                defaults.server_accept_timeout,
            )?,
            broadcast_interval: self.millis(
                "coordination.broadcast_interval_ms",
                defaults.broadcast_interval,
            )?,
            broadcast_connect_timeout: self.millis(
                "coordination.broadcast_connect_timeout_ms",
                defaults.broadcast_connect_timeout,
            )?,
            controller_report_timeout: self.millis(
                "coordination.controller_report_timeout_ms",
                defaults.controller_report_timeout,
            )?,
            max_controller_report_failures,
            max_members,
            admission_policy,
        };

        config.validate()?;
        Ok(config)
    }

    // ========================================================================
    // Logging Configuration
    // ========================================================================

    pub fn logging_config(&self) -> LoggingConfig {
        let level = self
            .config
            .get_string(LOG_LEVEL)
            .ok()
            .and_then(|v| v.parse::<Level>().ok())
            .unwrap_or(Level::INFO);

        LoggingConfig {
            log_dir: self
                .config
                .get_string(LOG_DIR)
                .map(PathBuf::from)
                .unwrap_or_else(|_| std::env::temp_dir().join("timekeeper").join("logs")),
            console_output: self.config.get_bool(LOG_CONSOLE).unwrap_or(true),
            file_logging: self.config.get_bool(LOG_FILE).unwrap_or(false),
            level,
        }
    }
}
