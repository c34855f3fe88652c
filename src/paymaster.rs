use crate::encoding::{self, parse_hex_bytes};
use crate::rpc::RpcEndpoint;
use anyhow::{anyhow, Context, Result};
use ethers::types::{Address, Bytes, U256};
use serde_json::Value;

/// ERC-7677 paymaster web service bound to one gas-manager policy.
///
/// Every user operation the operator sends goes through the same policy, so
/// the policy id lives here rather than on each request.
#[derive(Debug, Clone)]
pub struct PaymasterClient {
    rpc: RpcEndpoint,
    entrypoint: Address,
    chain_id: u64,
    policy_id: String,
}

impl PaymasterClient {
    pub fn new(url: String, entrypoint: Address, chain_id: u64, policy_id: String) -> Self {
        Self {
            rpc: RpcEndpoint::new(url),
            entrypoint,
            chain_id,
            policy_id,
        }
    }

    pub fn policy_id(&self) -> &str {
        &self.policy_id
    }

    /// Placeholder `paymasterAndData` good enough for gas estimation.
    pub async fn stub_data(&self, user_op: Value) -> Result<Bytes> {
        let res = self
            .rpc
            .call("pm_getPaymasterStubData", self.params(user_op))
            .await
            .context("pm_getPaymasterStubData RPC failed")?;
        parse_v06_paymaster_and_data(&res)
    }

    /// Signed `paymasterAndData` for the final, estimated operation.
    pub async fn sponsor_data(&self, user_op: Value) -> Result<Bytes> {
        let res = self
            .rpc
            .call("pm_getPaymasterData", self.params(user_op))
            .await
            .context("pm_getPaymasterData RPC failed")?;
        parse_v06_paymaster_and_data(&res)
    }

    fn params(&self, user_op: Value) -> Value {
        serde_json::json!([
            user_op,
            encoding::fmt_address(self.entrypoint),
            encoding::fmt_u256(U256::from(self.chain_id)),
            { "policyId": self.policy_id }
        ])
    }
}

fn parse_v06_paymaster_and_data(result: &Value) -> Result<Bytes> {
    // ERC-7677 responses carry paymasterAndData at the top level; Alchemy
    // nests it per EntryPoint version.
    let hex_str = result
        .get("paymasterAndData")
        .or_else(|| {
            result
                .get("entrypointV06Response")
                .or_else(|| result.get("entryPointV06Response"))
                .and_then(|v06| v06.get("paymasterAndData"))
        })
        .and_then(|x| x.as_str())
        .ok_or_else(|| {
            anyhow!("missing paymasterAndData (top level or entrypointV06Response): {result}")
        })?;

    parse_hex_bytes(hex_str).context("invalid hex in paymasterAndData")
}

#[cfg(test)]
mod tests {
    use super::{parse_v06_paymaster_and_data, PaymasterClient};
    use ethers::types::{Address, Bytes};
    use serde_json::json;

    const PM_DATA: &str = "0xdeadbeef";

    fn expected_bytes() -> Bytes {
        Bytes::from(vec![0xde, 0xad, 0xbe, 0xef])
    }

    #[test]
    fn paymaster_and_data_top_level_or_nested() {
        for res in [
            json!({ "paymasterAndData": PM_DATA }),
            json!({ "entrypointV06Response": { "paymasterAndData": PM_DATA } }),
            json!({ "entryPointV06Response": { "paymasterAndData": PM_DATA } }),
        ] {
            assert_eq!(parse_v06_paymaster_and_data(&res).unwrap(), expected_bytes());
        }
    }

    #[test]
    fn paymaster_and_data_v07_only_is_rejected() {
        let res = json!({ "entrypointV07Response": { "paymasterAndData": PM_DATA } });
        assert!(parse_v06_paymaster_and_data(&res).is_err());
    }

    #[test]
    fn paymaster_and_data_bad_hex_is_rejected() {
        let res = json!({ "paymasterAndData": "0xzz" });
        assert!(parse_v06_paymaster_and_data(&res).is_err());
    }

    #[test]
    fn params_carry_policy_context() {
        let pm = PaymasterClient::new(
            "http://localhost:0".to_string(),
            Address::repeat_byte(0x5f),
            80002,
            "policy-123".to_string(),
        );
        let params = pm.params(json!({ "sender": "0x00" }));
        assert_eq!(params[2], json!("0x13882"));
        assert_eq!(params[3], json!({ "policyId": "policy-123" }));
        assert_eq!(pm.policy_id(), "policy-123");
    }
}
