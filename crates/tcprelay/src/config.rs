//! Relay configuration: TOML file + CLI overrides.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use tcprelay_core::config::{DEFAULT_BACKLOG, DEFAULT_BUFFER_SIZE};
use tcprelay_core::{RelayConfig, RelayError, RelayResult};

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    #[serde(default)]
    pub relay: RelaySection,
    #[serde(default)]
    pub log: LogSection,
}

/// `[relay]` section of the config TOML.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RelaySection {
    pub bind_address: Option<String>,
    pub local_port: Option<u16>,
    pub remote_host: Option<String>,
    pub remote_port: Option<u16>,
    pub inbound_filter: Option<String>,
    pub outbound_filter: Option<String>,
    pub backlog: Option<u32>,
    pub buffer_size: Option<usize>,
}

/// `[log]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LogSection {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub syslog: bool,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            syslog: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Values given on the command line. `None` / `false` defer to the file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub bind_address: Option<String>,
    pub local_port: Option<u16>,
    pub remote_host: Option<String>,
    pub remote_port: Option<u16>,
    pub inbound_filter: Option<String>,
    pub outbound_filter: Option<String>,
    pub backlog: Option<u32>,
    pub buffer_size: Option<usize>,
}

/// A required value that neither the CLI nor the file supplied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MissingOption(pub &'static str);

/// Log sink choice. Resolved ahead of the relay settings so that a broken
/// config file is still reported through the chosen sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogOptions {
    pub level: String,
    pub syslog: bool,
}

impl ConfigFile {
    /// Read and parse a config file. `~` is expanded.
    pub fn load(path: &Path) -> RelayResult<Self> {
        let expanded = expand_tilde(path);
        let content = std::fs::read_to_string(&expanded).map_err(|e| {
            RelayError::Config(format!("cannot read {}: {e}", expanded.display()))
        })?;
        toml::from_str::<ConfigFile>(&content).map_err(|e| {
            RelayError::Config(format!("config parse error in {}: {e}", expanded.display()))
        })
    }
}

impl LogOptions {
    /// CLI values win; otherwise the file's `[log]` section, if it loaded.
    pub fn resolve(file: Option<&ConfigFile>, level: Option<&str>, syslog: bool) -> Self {
        let section = file.map(|f| f.log.clone()).unwrap_or_default();
        Self {
            level: level.map(str::to_string).unwrap_or(section.level),
            syslog: syslog || section.syslog,
        }
    }
}

impl RelaySection {
    /// Merge CLI overrides over the file section (or defaults when there
    /// is no file) into the relay configuration.
    pub fn merge(self, cli: Overrides) -> Result<RelayConfig, MissingOption> {
        let relay = self;

        let local_port = cli
            .local_port
            .or(relay.local_port)
            .ok_or(MissingOption("-l/--local-port"))?;
        let remote_host = cli
            .remote_host
            .or(relay.remote_host)
            .ok_or(MissingOption("-h/--remote-host"))?;
        let remote_port = cli
            .remote_port
            .or(relay.remote_port)
            .ok_or(MissingOption("-p/--remote-port"))?;

        Ok(RelayConfig {
            bind_address: cli.bind_address.or(relay.bind_address),
            local_port,
            remote_host,
            remote_port,
            inbound_filter: cli.inbound_filter.or(relay.inbound_filter),
            outbound_filter: cli.outbound_filter.or(relay.outbound_filter),
            backlog: cli.backlog.or(relay.backlog).unwrap_or(DEFAULT_BACKLOG),
            buffer_size: cli
                .buffer_size
                .or(relay.buffer_size)
                .unwrap_or(DEFAULT_BUFFER_SIZE),
        })
    }
}

/// Expand `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}
