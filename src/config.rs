//! Configuration loading.
//!
//! Loads an optional `config.toml` with per-section defaults. All sections
//! use `#[serde(default)]` so a minimal or empty config file is valid.
//! Lookup order: explicit `--config` path, then `~/.detqa/config.toml`,
//! then built-in defaults.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;
use tracing::{debug, info};

use crate::output::{EntryOrder, FormatKind};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Schema and instrument geometry sources.
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Work-set enumeration.
    #[serde(default)]
    pub input: InputConfig,

    /// Document formats and ordering.
    #[serde(default)]
    pub output: OutputConfig,

    /// Listener addresses and channel sizing.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Log file settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Schema and instrument geometry sources.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PipelineConfig {
    /// TOML schema file; the embedded schema when unset.
    #[serde(default)]
    pub schema_file: Option<PathBuf>,

    /// Instrument geometry files; the embedded VIS geometry when empty.
    #[serde(default)]
    pub instrument_files: Vec<PathBuf>,
}

/// Work-set enumeration.
#[derive(Debug, Clone, Deserialize)]
pub struct InputConfig {
    /// File-name wildcard (`*` and `?`) selecting input files.
    #[serde(default = "default_pattern")]
    pub pattern: String,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            pattern: default_pattern(),
        }
    }
}

/// Document formats and ordering.
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Format of the report document.
    #[serde(default = "default_report_format")]
    pub report_format: FormatKind,

    /// Format of the intermediate-results document.
    #[serde(default = "default_result_format")]
    pub result_format: FormatKind,

    /// Entry order in both documents.
    #[serde(default)]
    pub ordering: EntryOrder,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            report_format: default_report_format(),
            result_format: default_result_format(),
            ordering: EntryOrder::default(),
        }
    }
}

/// Listener addresses and channel sizing.
#[derive(Debug, Clone, Deserialize)]
pub struct TransportConfig {
    /// Address the controller binds its listeners to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Work-queue port; 0 picks a free port.
    #[serde(default)]
    pub queue_port: u16,

    /// Report sink port; 0 picks a free port.
    #[serde(default)]
    pub report_port: u16,

    /// Result sink port; 0 picks a free port.
    #[serde(default)]
    pub result_port: u16,

    /// Buffer size of in-process channels.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            queue_port: 0,
            report_port: 0,
            result_port: 0,
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl TransportConfig {
    /// Work-queue bind address.
    pub fn queue_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.queue_port)
    }

    /// Report sink bind address.
    pub fn report_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.report_port)
    }

    /// Result sink bind address.
    pub fn result_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.result_port)
    }
}

/// Log file settings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingConfig {
    /// Directory for daily-rotated JSON logs; stderr only when unset.
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

impl Config {
    /// Validate that configuration values are within sane bounds.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first offending value.
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            !self.input.pattern.trim().is_empty(),
            "input.pattern must not be empty"
        );
        anyhow::ensure!(
            self.transport.channel_capacity >= 1,
            "transport.channel_capacity must be >= 1"
        );
        let ports = [
            self.transport.queue_port,
            self.transport.report_port,
            self.transport.result_port,
        ];
        for (i, port) in ports.iter().enumerate() {
            if *port == 0 {
                continue;
            }
            anyhow::ensure!(
                !ports.iter().skip(i.saturating_add(1)).any(|p| p == port),
                "transport ports must be distinct (port {port} repeated)"
            );
        }
        Ok(())
    }
}

/// Load configuration from a TOML file.
///
/// # Errors
///
/// Returns an error if the file cannot be read, parsed, or fails validation.
pub fn load_config(path: &Path) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config at {}", path.display()))?;
    let config: Config = toml::from_str(&contents)
        .with_context(|| format!("failed to parse config at {}", path.display()))?;
    config.validate()?;
    info!(path = %path.display(), "loaded config");
    Ok(config)
}

/// Load `explicit` if given, else `~/.detqa/config.toml` if present, else defaults.
///
/// # Errors
///
/// Returns an error if a chosen file cannot be loaded.
pub fn resolve_config(explicit: Option<&Path>) -> anyhow::Result<Config> {
    if let Some(path) = explicit {
        return load_config(path);
    }
    match config_dir() {
        Ok(dir) => {
            let path = dir.join("config.toml");
            if path.is_file() {
                return load_config(&path);
            }
            debug!(path = %path.display(), "no config file, using defaults");
        }
        Err(e) => debug!(error = %e, "no home directory, using defaults"),
    }
    Ok(Config::default())
}

/// Resolve the default config directory (`~/.detqa/`).
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined.
pub fn config_dir() -> anyhow::Result<PathBuf> {
    let home = directories::BaseDirs::new()
        .ok_or_else(|| anyhow::anyhow!("cannot determine home directory"))?;
    Ok(home.home_dir().join(".detqa"))
}

// Default value functions for serde.

fn default_pattern() -> String {
    "*.fits".to_owned()
}
fn default_report_format() -> FormatKind {
    FormatKind::PrettyJson
}
fn default_result_format() -> FormatKind {
    FormatKind::Json
}
fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}
fn default_channel_capacity() -> usize {
    64
}
