use std::path::PathBuf;

use serde::Deserialize;
use thiserror::Error;

/// Runtime configuration, loadable from a TOML file.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct Config {
    /// Nodes to dial. One connection is kept per address.
    pub node_addresses: Vec<String>,
    /// Route dials through `proxy_address`.
    pub use_proxy: bool,
    pub proxy_address: Option<String>,
    /// Delay before redialing a torn-down connection.
    pub reconnect_timeout_ms: u32,
    /// `0` keeps connections open; otherwise idle connections are closed and
    /// reopened on this period.
    pub poll_period_ms: u32,
    /// Grace period after the in-flight queue drains, letting late
    /// bulletin-board messages arrive before an idle close.
    pub close_connection_delay_ms: u32,
    /// Floor for the reconnect delay in poll mode.
    pub target_block_time_s: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            node_addresses: Vec::new(),
            use_proxy: false,
            proxy_address: None,
            reconnect_timeout_ms: 5_000,
            poll_period_ms: 0,
            close_connection_delay_ms: 1_000,
            target_block_time_s: 60,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Load a TOML config file, defaults if no path is given.
pub fn load_config_file(path: Option<&PathBuf>) -> Result<Config, ConfigError> {
    match path {
        Some(p) => {
            let content = std::fs::read_to_string(p)?;
            toml::from_str(&content).map_err(ConfigError::Toml)
        }
        None => Ok(Config::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_to_missing_fields() {
        let cfg: Config = toml::from_str(
            r#"
            node_addresses = ["127.0.0.1:10000"]
            poll_period_ms = 30000
            "#,
        )
        .unwrap();
        assert_eq!(cfg.node_addresses.len(), 1);
        assert_eq!(cfg.poll_period_ms, 30_000);
        assert_eq!(cfg.reconnect_timeout_ms, 5_000);
        assert!(!cfg.use_proxy);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let res: Result<Config, _> = toml::from_str("nodes = []");
        assert!(res.is_err());
    }

    #[test]
    fn no_path_yields_defaults() {
        let cfg = load_config_file(None).unwrap();
        assert_eq!(cfg.poll_period_ms, 0);
        assert_eq!(cfg.target_block_time_s, 60);
    }
}
