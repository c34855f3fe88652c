use ethers::types::{Address, H256};

/// Problems with the deployment profile, secrets or endpoints.
///
/// All of these are raised before the first network call that depends on the
/// offending value.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing {0}")]
    Missing(&'static str),

    #[error("invalid {name}: {reason}")]
    Invalid { name: &'static str, reason: String },

    #[error("failed to load deployment profile {path}: {reason}")]
    Deployment { path: String, reason: String },

    #[error("chainId mismatch: deployment has {expected}, RPC returned {actual}")]
    ChainMismatch { expected: u64, actual: u64 },
}

#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The operation never made it into the bundler mempool (build, sign,
    /// sponsorship or `eth_sendUserOperation` failed).
    #[error("submission failed: {0}")]
    Submission(String),

    /// The operation was accepted but did not land successfully.
    #[error("confirmation failed: {0}")]
    Confirmation(String),

    #[error("plugin {plugin:?} is still not installed after install tx {tx_hash:?}")]
    InstallNotVerified { plugin: Address, tx_hash: H256 },

    #[error("rpc read failed: {0}")]
    Rpc(String),

    #[error("cannot encode call argument: {0}")]
    Encoding(String),
}

impl PluginError {
    pub fn submission(context: &str, err: impl std::fmt::Display) -> Self {
        Self::Submission(format!("{context}: {err:#}"))
    }

    pub fn confirmation(context: &str, err: impl std::fmt::Display) -> Self {
        Self::Confirmation(format!("{context}: {err:#}"))
    }

    pub fn rpc(context: &str, err: impl std::fmt::Display) -> Self {
        Self::Rpc(format!("{context}: {err:#}"))
    }

    /// Whether the failure happened after the chain had a chance to act on it.
    #[cfg(test)]
    pub fn is_confirmation(&self) -> bool {
        matches!(
            self,
            Self::Confirmation(_) | Self::InstallNotVerified { .. }
        )
    }
}

pub type Result<T, E = PluginError> = std::result::Result<T, E>;
