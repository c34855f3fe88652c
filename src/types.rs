use crate::contracts;
use crate::error::{PluginError, Result};
use ethers::types::{Address, Bytes, H256, U256, U64};
use serde::Deserialize;
use std::str::FromStr;

/// ERC-4337 UserOperation (EntryPoint v0.6 layout, which is what modular
/// accounts on the supported chains validate against).
#[derive(Clone, Debug)]
pub struct UserOperation {
    pub sender: Address,
    pub nonce: U256,
    pub init_code: Bytes,
    pub call_data: Bytes,
    pub call_gas_limit: U256,
    pub verification_gas_limit: U256,
    pub pre_verification_gas: U256,
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: U256,
    pub paymaster_and_data: Bytes,
    pub signature: Bytes,
}

impl UserOperation {
    /// Struct form expected by `EntryPoint.getUserOpHash`.
    pub fn to_entry_point(&self) -> contracts::UserOperation {
        contracts::UserOperation {
            sender: self.sender,
            nonce: self.nonce,
            init_code: self.init_code.clone(),
            call_data: self.call_data.clone(),
            call_gas_limit: self.call_gas_limit,
            verification_gas_limit: self.verification_gas_limit,
            pre_verification_gas: self.pre_verification_gas,
            max_fee_per_gas: self.max_fee_per_gas,
            max_priority_fee_per_gas: self.max_priority_fee_per_gas,
            paymaster_and_data: self.paymaster_and_data.clone(),
            signature: self.signature.clone(),
        }
    }
}

/// What a single user operation executes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UserOperationCall {
    /// Used verbatim as `callData`. The account dispatches the selector to an
    /// installed plugin execution function (or to its own plugin manager).
    Raw(Bytes),
    /// Wrapped in the account's `execute(target, value, data)`.
    Execute {
        target: Address,
        value: U256,
        data: Bytes,
    },
}

/// ERC-6900 `FunctionReference`: plugin address followed by a function id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FunctionReference([u8; 21]);

impl FunctionReference {
    /// Same packing as the plugin's `pack(address,uint8)` view.
    pub fn pack(plugin: Address, function_id: u8) -> Self {
        let mut out = [0u8; 21];
        out[..20].copy_from_slice(plugin.as_bytes());
        out[20] = function_id;
        Self(out)
    }

    pub fn into_bytes(self) -> [u8; 21] {
        self.0
    }
}

/// A plan as the operator states it: unscaled price plus interval in seconds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Plan {
    pub price: U256,
    pub charge_interval: u64,
}

impl FromStr for Plan {
    type Err = String;

    /// `PRICE:INTERVAL`, e.g. `2:9000`.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (price, interval) = s
            .split_once(':')
            .ok_or_else(|| format!("expected PRICE:INTERVAL, got {s:?}"))?;
        let price = U256::from_dec_str(price.trim())
            .map_err(|e| format!("invalid plan price {price:?}: {e}"))?;
        let charge_interval = interval
            .trim()
            .parse::<u64>()
            .map_err(|e| format!("invalid plan interval {interval:?}: {e}"))?;
        Ok(Self {
            price,
            charge_interval,
        })
    }
}

/// Subset of the `eth_getUserOperationReceipt` result we act on.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserOperationReceipt {
    pub user_op_hash: H256,
    pub success: bool,
    #[serde(default)]
    pub reason: Option<String>,
    pub receipt: MinedTransaction,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MinedTransaction {
    pub transaction_hash: H256,
    #[serde(default)]
    pub block_number: Option<U64>,
}

impl UserOperationReceipt {
    pub fn from_json(value: serde_json::Value) -> Result<Self> {
        serde_json::from_value(value)
            .map_err(|e| PluginError::confirmation("malformed userOp receipt", e))
    }

    /// The bundle transaction hash, or a confirmation error if the inner call
    /// reverted.
    pub fn into_transaction_hash(self) -> Result<H256> {
        if !self.success {
            return Err(PluginError::Confirmation(format!(
                "userOp {:?} reverted in tx {:?}{}",
                self.user_op_hash,
                self.receipt.transaction_hash,
                self.reason
                    .map(|r| format!(": {r}"))
                    .unwrap_or_default()
            )));
        }
        Ok(self.receipt.transaction_hash)
    }
}
