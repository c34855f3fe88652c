use crate::error::ConfigError;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, U256};
use serde::Deserialize;
use std::{fs, path::Path, str::FromStr, time::Duration};

/// Per-chain deployment profile (`deployments/<network>.json`).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentRaw {
    pub chain_id: u64,
    pub alchemy_network: String,
    #[serde(default)]
    pub rpc: Option<String>,
    pub entry_point: String,
    pub account_factory: String,
    pub subscription_plugin: String,
    pub dependency_plugin: String,
    #[serde(default)]
    pub subscription_gateway: Option<String>,
    pub token_decimals: u8,
}

#[derive(Debug, Clone)]
pub struct Deployment {
    pub chain_id: u64,
    pub alchemy_network: String,
    pub rpc: Option<String>,
    pub entry_point: Address,
    pub account_factory: Address,
    pub subscription_plugin: Address,
    pub dependency_plugin: Address,
    pub subscription_gateway: Address,
    pub token_decimals: u8,
}

impl Deployment {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|e| ConfigError::Deployment {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_json(&raw).map_err(|e| match e {
            ConfigError::Deployment { reason, .. } => ConfigError::Deployment {
                path: path.display().to_string(),
                reason,
            },
            other => other,
        })
    }

    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let raw: DeploymentRaw =
            serde_json::from_str(raw).map_err(|e| ConfigError::Deployment {
                path: "<inline>".to_string(),
                reason: e.to_string(),
            })?;

        let subscription_plugin = parse_addr("subscriptionPlugin", &raw.subscription_plugin)?;
        // The gateway contract is served from the plugin address unless the
        // profile says otherwise.
        let subscription_gateway = match raw.subscription_gateway.as_deref() {
            Some(s) => parse_addr("subscriptionGateway", s)?,
            None => subscription_plugin,
        };

        Ok(Self {
            chain_id: raw.chain_id,
            alchemy_network: raw.alchemy_network,
            rpc: raw.rpc,
            entry_point: parse_addr("entryPoint", &raw.entry_point)?,
            account_factory: parse_addr("accountFactory", &raw.account_factory)?,
            subscription_plugin,
            dependency_plugin: parse_addr("dependencyPlugin", &raw.dependency_plugin)?,
            subscription_gateway,
            token_decimals: raw.token_decimals,
        })
    }

    pub fn alchemy_url(&self, api_key: &str) -> String {
        format!("https://{}.g.alchemy.com/v2/{}", self.alchemy_network, api_key)
    }
}

/// Operator-supplied values before validation (CLI flags / environment).
#[derive(Clone, Default)]
pub struct SettingsInput {
    pub owner_private_key: Option<String>,
    pub operator_private_key: Option<String>,
    pub alchemy_api_key: Option<String>,
    pub gas_policy_id: Option<String>,
    pub rpc_url: Option<String>,
    pub bundler_url: Option<String>,
    pub paymaster_url: Option<String>,
    pub account_salt: u64,
    pub gas_multiplier_bps: u64,
    pub max_wait_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct GasPolicy {
    pub paymaster_url: String,
    pub policy_id: String,
}

/// Fully validated configuration handed to the account and plugin clients.
#[derive(Debug, Clone)]
pub struct Settings {
    pub deployment: Deployment,
    pub rpc_url: String,
    pub bundler_url: String,
    pub gas_policy: Option<GasPolicy>,
    pub owner: LocalWallet,
    pub operator: Option<LocalWallet>,
    pub account_salt: U256,
    pub gas_multiplier_bps: u64,
    pub receipt_timeout: Duration,
}

impl Settings {
    pub fn resolve(deployment: Deployment, input: SettingsInput) -> Result<Self, ConfigError> {
        let chain_id = deployment.chain_id;

        let owner = parse_wallet(
            "SUBPLUG_OWNER_PRIVATE_KEY",
            input.owner_private_key.as_deref(),
            chain_id,
        )?
        .ok_or(ConfigError::Missing("SUBPLUG_OWNER_PRIVATE_KEY"))?;
        let operator = parse_wallet(
            "SUBPLUG_OPERATOR_PRIVATE_KEY",
            input.operator_private_key.as_deref(),
            chain_id,
        )?;

        let api_key = non_empty(input.alchemy_api_key);
        let alchemy_url = || {
            api_key
                .as_deref()
                .map(|k| deployment.alchemy_url(k))
                .ok_or(ConfigError::Missing("SUBPLUG_ALCHEMY_API_KEY"))
        };

        let rpc_url = match non_empty(input.rpc_url).or_else(|| deployment.rpc.clone()) {
            Some(url) => url,
            None => alchemy_url()?,
        };
        let bundler_url = match non_empty(input.bundler_url) {
            Some(url) => url,
            None => alchemy_url()?,
        };

        let gas_policy = match non_empty(input.gas_policy_id) {
            Some(policy_id) => {
                let paymaster_url = match non_empty(input.paymaster_url) {
                    Some(url) => url,
                    None => alchemy_url()?,
                };
                Some(GasPolicy {
                    paymaster_url,
                    policy_id,
                })
            }
            None => {
                tracing::warn!(
                    "SUBPLUG_GAS_POLICY_ID not set; user operations will not be sponsored"
                );
                None
            }
        };

        if input.gas_multiplier_bps == 0 {
            return Err(ConfigError::Invalid {
                name: "SUBPLUG_GAS_MULTIPLIER_BPS",
                reason: "must be > 0".to_string(),
            });
        }

        Ok(Self {
            deployment,
            rpc_url,
            bundler_url,
            gas_policy,
            owner,
            operator,
            account_salt: U256::from(input.account_salt),
            gas_multiplier_bps: input.gas_multiplier_bps,
            receipt_timeout: Duration::from_secs(input.max_wait_seconds),
        })
    }

    pub fn chain_id(&self) -> u64 {
        self.deployment.chain_id
    }

    /// The EOA used for direct (non-4337) transactions such as `charge`.
    pub fn operator(&self) -> Result<&LocalWallet, ConfigError> {
        self.operator
            .as_ref()
            .ok_or(ConfigError::Missing("SUBPLUG_OPERATOR_PRIVATE_KEY"))
    }
}

fn non_empty(v: Option<String>) -> Option<String> {
    v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

fn parse_wallet(
    name: &'static str,
    key: Option<&str>,
    chain_id: u64,
) -> Result<Option<LocalWallet>, ConfigError> {
    let Some(key) = key.map(str::trim).filter(|k| !k.is_empty()) else {
        return Ok(None);
    };
    let wallet = LocalWallet::from_str(key).map_err(|e| ConfigError::Invalid {
        name,
        reason: e.to_string(),
    })?;
    Ok(Some(wallet.with_chain_id(chain_id)))
}

fn parse_addr(name: &'static str, s: &str) -> Result<Address, ConfigError> {
    s.parse::<Address>().map_err(|e| ConfigError::Invalid {
        name,
        reason: format!("{s:?}: {e}"),
    })
}
