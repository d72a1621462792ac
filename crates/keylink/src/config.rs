use keylink_flows::SchemeKind;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use crate::error::{NodeError, NodeResult};

/// Settings for the attestation protocol. Both peers must use the same
/// scheme or every exchange fails with a challenge mismatch.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AttestationConfig {
    #[serde(default)]
    pub scheme: SchemeKind,
}

/// Top-level node configuration.
///
/// Loaded from a TOML file (typically `~/.keylink/config.toml`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeConfig {
    /// Name of the node's well-known party.
    #[serde(default = "default_node_name")]
    pub node_name: String,

    /// Hex-encoded 32-byte seed for the legal identity key. A random key is
    /// generated at startup when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_seed: Option<String>,

    /// `tracing` filter directive used when `RUST_LOG` is unset.
    #[serde(default = "default_log_filter")]
    pub log_filter: String,

    #[serde(default)]
    pub attestation: AttestationConfig,
}

fn default_node_name() -> String {
    "O=Keylink Node".to_string()
}

fn default_log_filter() -> String {
    "keylink=info,keylink_flows=info".to_string()
}

/// Returns `$HOME/<suffix>` if HOME is available, otherwise `./<suffix>`.
fn dirs_or_default(suffix: &str) -> PathBuf {
    std::env::var("HOME")
        .map(|h| PathBuf::from(h).join(suffix))
        .unwrap_or_else(|_| PathBuf::from(suffix))
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_name: default_node_name(),
            identity_seed: None,
            log_filter: default_log_filter(),
            attestation: AttestationConfig::default(),
        }
    }
}

impl NodeConfig {
    /// Load configuration from a TOML file. If the file does not exist,
    /// returns a default configuration.
    pub fn load(path: &Path) -> NodeResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)?;
        let config: NodeConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> NodeResult<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| NodeError::Config(format!("TOML serialize error: {}", e)))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn validate(&self) -> NodeResult<()> {
        if self.node_name.trim().is_empty() {
            return Err(NodeError::Config("node_name must not be empty".into()));
        }
        self.seed_bytes()?;
        EnvFilter::try_new(&self.log_filter).map_err(|e| {
            NodeError::Config(format!("invalid log_filter '{}': {}", self.log_filter, e))
        })?;
        Ok(())
    }

    /// The decoded identity seed, if one is configured.
    pub fn seed_bytes(&self) -> NodeResult<Option<[u8; 32]>> {
        let Some(seed) = &self.identity_seed else {
            return Ok(None);
        };
        let bytes = hex::decode(seed)
            .map_err(|e| NodeError::Config(format!("identity_seed is not hex: {}", e)))?;
        let seed: [u8; 32] = bytes.try_into().map_err(|b: Vec<u8>| {
            NodeError::Config(format!("identity_seed must be 32 bytes, got {}", b.len()))
        })?;
        Ok(Some(seed))
    }

    pub fn default_config_path() -> PathBuf {
        dirs_or_default(".keylink/config.toml")
    }
}
