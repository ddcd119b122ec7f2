//! jsbridge configuration management

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Main jsbridge configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// RPC behavior configuration
    #[serde(default)]
    pub rpc: RpcConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to listen on
    pub listen: String,

    /// Enable permissive CORS for browser callers
    pub cors: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:12080".to_string(),
            cors: false,
        }
    }
}

/// RPC behavior configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcConfig {
    /// Default seconds an invoke waits for the agent's reply
    pub default_timeout_secs: u64,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: 30,
        }
    }
}

impl BridgeConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse {}: {}", path.display(), e)))
    }

    /// Default wait for an invoke's reply.
    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc.default_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_sensible() {
        let config = BridgeConfig::default();
        assert_eq!(config.server.listen, "127.0.0.1:12080");
        assert!(!config.server.cors);
        assert_eq!(config.default_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn loads_partial_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[server]\nlisten = \"0.0.0.0:9000\"\ncors = true\n"
        )
        .unwrap();

        let config = BridgeConfig::load(file.path()).unwrap();
        assert_eq!(config.server.listen, "0.0.0.0:9000");
        assert!(config.server.cors);
        // Missing sections fall back to defaults
        assert_eq!(config.rpc.default_timeout_secs, 30);
    }

    #[test]
    fn rejects_malformed_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "server = \"not a table\"").unwrap();
        assert!(BridgeConfig::load(file.path()).is_err());
    }
}
