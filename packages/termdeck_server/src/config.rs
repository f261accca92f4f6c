use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use termdeck_pty::PtyConfig;

// Three equivalent ways to configure:
//
//   termdeck.toml:   [server]
//                    port = 4000
//
//   env var:         TERMDECK_SERVER__PORT=4000   (double underscore = nesting)
//
//   (single underscore stays within field names: TERMDECK_SCROLLBACK__MAX_LINES)

pub const CONFIG_FILE_NAME: &str = "termdeck.toml";

/// Top-level tunable configuration, deserialized by figment.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub server: ListenConfig,
    #[serde(default)]
    pub shell: ShellConfig,
    #[serde(default)]
    pub scrollback: ScrollbackConfig,
    #[serde(default)]
    pub shutdown: ShutdownConfig,
}

/// Lives under `[server]`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ListenConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Outbound messages buffered per client before new ones are dropped
    #[serde(default = "default_client_queue")]
    pub client_queue: usize,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            client_queue: default_client_queue(),
        }
    }
}

/// Lives under `[shell]`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ShellConfig {
    #[serde(default = "termdeck_pty::default_shell")]
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub working_dir: Option<String>,
    #[serde(default = "default_cols")]
    pub cols: u16,
    #[serde(default = "default_rows")]
    pub rows: u16,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            command: termdeck_pty::default_shell(),
            args: Vec::new(),
            working_dir: None,
            cols: default_cols(),
            rows: default_rows(),
        }
    }
}

/// Lives under `[scrollback]`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScrollbackConfig {
    #[serde(default = "default_max_lines")]
    pub max_lines: usize,
}

impl Default for ScrollbackConfig {
    fn default() -> Self {
        Self {
            max_lines: default_max_lines(),
        }
    }
}

/// Lives under `[shutdown]`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ShutdownConfig {
    #[serde(default = "default_process_exit_timeout_ms")]
    pub process_exit_timeout_ms: u64,
    #[serde(default = "default_grace_timeout_secs")]
    pub grace_timeout_secs: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            process_exit_timeout_ms: default_process_exit_timeout_ms(),
            grace_timeout_secs: default_grace_timeout_secs(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_client_queue() -> usize {
    256
}

fn default_cols() -> u16 {
    80
}

fn default_rows() -> u16 {
    24
}

fn default_max_lines() -> usize {
    5000
}

fn default_process_exit_timeout_ms() -> u64 {
    1000
}

fn default_grace_timeout_secs() -> u64 {
    5
}

impl ServerConfig {
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.server.host, self.server.port)
            .parse()
            .with_context(|| {
                format!(
                    "Invalid listen address {}:{}",
                    self.server.host, self.server.port
                )
            })
    }

    pub fn pty_config(&self) -> PtyConfig {
        PtyConfig {
            command: self.shell.command.clone(),
            args: self.shell.args.clone(),
            working_dir: self
                .shell
                .working_dir
                .clone()
                .or_else(|| dirs::home_dir().map(|p| p.to_string_lossy().into_owned())),
            env: Vec::new(),
        }
    }

    pub fn process_exit_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown.process_exit_timeout_ms)
    }

    pub fn grace_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown.grace_timeout_secs)
    }
}

/// Default location of `termdeck.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("termdeck").join(CONFIG_FILE_NAME))
}

/// Build a figment that layers: defaults → termdeck.toml → TERMDECK_* env vars.
///
/// Env vars use double-underscore for nesting into sections:
///   `TERMDECK_SERVER__PORT=4000`  →  `server.port = 4000`
///   `TERMDECK_SCROLLBACK__MAX_LINES=10000`  →  `scrollback.max_lines = 10000`
pub fn figment(config_file: &Path) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    Figment::from(Serialized::defaults(ServerConfig::default()))
        .merge(Toml::file(config_file))
        .merge(Env::prefixed("TERMDECK_").split("__"))
}

pub fn load_config(config_file: Option<&Path>) -> Result<ServerConfig> {
    let path = match config_file {
        Some(path) => path.to_path_buf(),
        None => default_config_path().unwrap_or_else(|| PathBuf::from(CONFIG_FILE_NAME)),
    };
    let config: ServerConfig = figment(&path)
        .extract()
        .with_context(|| format!("Failed to load configuration ({})", path.display()))?;
    Ok(config)
}
