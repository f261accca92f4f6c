use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ClientError;

/// Connection settings for a [`crate::Client`].
///
/// `TERMDECK_URL` and `TERMDECK_RECONNECT_DELAY_MS` override the defaults
/// when loaded with [`ClientConfig::from_env`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_url")]
    pub url: String,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    /// Where layouts are remembered. `None` keeps them in memory only.
    #[serde(default = "default_layouts_path")]
    pub layouts_path: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            layouts_path: default_layouts_path(),
        }
    }
}

fn default_url() -> String {
    "ws://localhost:3000".to_string()
}

fn default_reconnect_delay_ms() -> u64 {
    5000
}

pub fn default_layouts_path() -> Option<PathBuf> {
    dirs::data_dir().map(|dir| dir.join("termdeck").join("layouts.json"))
}

impl ClientConfig {
    pub fn from_env() -> Result<Self, ClientError> {
        use figment::{
            Figment,
            providers::{Env, Serialized},
        };

        Figment::from(Serialized::defaults(ClientConfig::default()))
            .merge(Env::prefixed("TERMDECK_").only(&["url", "reconnect_delay_ms"]))
            .extract()
            .map_err(|e| ClientError::Config(Box::new(e)))
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.url, "ws://localhost:3000");
        assert_eq!(config.reconnect_delay(), Duration::from_secs(5));
    }

    #[test]
    fn env_overrides_url() {
        Jail::expect_with(|jail| {
            jail.set_env("TERMDECK_URL", "ws://10.0.0.2:4000");
            jail.set_env("TERMDECK_RECONNECT_DELAY_MS", "250");
            jail.set_env("TERMDECK_SERVER__PORT", "9999");

            let config = ClientConfig::from_env().map_err(|e| e.to_string())?;
            assert_eq!(config.url, "ws://10.0.0.2:4000");
            assert_eq!(config.reconnect_delay(), Duration::from_millis(250));
            Ok(())
        });
    }
}
