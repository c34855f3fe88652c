use crate::error::{PluginError, Result};
use crate::types::UserOperation;
use ethers::types::{Address, Bytes, H256, U256};

pub fn fmt_address(addr: Address) -> String {
    format!("0x{}", hex::encode(addr.as_bytes()))
}

pub fn fmt_h256(h: H256) -> String {
    format!("0x{}", hex::encode(h.as_bytes()))
}

/// JSON-RPC "quantity" encoding.
pub fn fmt_u256(v: U256) -> String {
    if v.is_zero() {
        "0x0".to_string()
    } else {
        format!("0x{:x}", v)
    }
}

pub fn fmt_bytes(b: &Bytes) -> String {
    format!("0x{}", hex::encode(b.as_ref()))
}

pub fn user_op_to_json(op: &UserOperation) -> serde_json::Value {
    serde_json::json!({
        "sender": fmt_address(op.sender),
        "nonce": fmt_u256(op.nonce),
        "initCode": fmt_bytes(&op.init_code),
        "callData": fmt_bytes(&op.call_data),
        "callGasLimit": fmt_u256(op.call_gas_limit),
        "verificationGasLimit": fmt_u256(op.verification_gas_limit),
        "preVerificationGas": fmt_u256(op.pre_verification_gas),
        "maxFeePerGas": fmt_u256(op.max_fee_per_gas),
        "maxPriorityFeePerGas": fmt_u256(op.max_priority_fee_per_gas),
        "paymasterAndData": fmt_bytes(&op.paymaster_and_data),
        "signature": fmt_bytes(&op.signature),
    })
}

pub fn parse_u256_quantity(s: &str) -> anyhow::Result<U256> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    if s.is_empty() {
        return Ok(U256::zero());
    }
    Ok(U256::from_str_radix(s, 16)?)
}

pub fn parse_h256(s: &str) -> anyhow::Result<H256> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    let bytes = hex::decode(s)?;
    if bytes.len() != 32 {
        anyhow::bail!("expected 32-byte hex, got {} bytes", bytes.len());
    }
    Ok(H256::from_slice(&bytes))
}

pub fn parse_hex_bytes(s: &str) -> anyhow::Result<Bytes> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    Ok(Bytes::from(hex::decode(s)?))
}

/// `price * 10^decimals` in exact 256-bit integer arithmetic.
///
/// Token amounts are whole base units, so there is no rounding step; values
/// that do not fit in a `uint256` are rejected instead of wrapping.
pub fn format_price(price: U256, decimals: u32) -> Result<U256> {
    let overflow = || {
        PluginError::Encoding(format!(
            "price {price} scaled by 10^{decimals} does not fit in uint256"
        ))
    };
    let scale = U256::from(10u8)
        .checked_pow(U256::from(decimals))
        .ok_or_else(overflow)?;
    price.checked_mul(scale).ok_or_else(overflow)
}

/// Product names travel as `bytes32` strings: UTF-8, zero padded, at most 31
/// bytes so the value stays null terminated.
pub fn encode_bytes32_name(name: &str) -> Result<[u8; 32]> {
    if name.len() > 31 {
        return Err(PluginError::Encoding(format!(
            "product name {name:?} is {} bytes, bytes32 strings hold at most 31",
            name.len()
        )));
    }
    ethers::utils::format_bytes32_string(name)
        .map_err(|e| PluginError::Encoding(format!("product name {name:?}: {e}")))
}
