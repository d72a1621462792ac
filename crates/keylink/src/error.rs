use thiserror::Error;

/// Error type for the keylink node, aggregating errors from the member
/// crates.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("core error: {0}")]
    Core(#[from] keylink_core::CoreError),

    #[error("vault error: {0}")]
    Vault(#[from] keylink_vault::VaultError),

    #[error("flow error: {0}")]
    Flow(#[from] keylink_flows::FlowError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for NodeError {
    fn from(e: serde_json::Error) -> Self {
        NodeError::Serialization(e.to_string())
    }
}

impl From<toml::de::Error> for NodeError {
    fn from(e: toml::de::Error) -> Self {
        NodeError::Config(format!("TOML parse error: {}", e))
    }
}

pub type NodeResult<T> = Result<T, NodeError>;
