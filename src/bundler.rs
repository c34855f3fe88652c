use crate::encoding::{fmt_address, fmt_h256, parse_h256, parse_u256_quantity};
use crate::rpc::RpcEndpoint;
use anyhow::{anyhow, Context, Result};
use ethers::types::{Address, H256, U256};
use serde_json::Value;
use std::time::{Duration, Instant};

const RECEIPT_POLL_INTERVAL: Duration = Duration::from_millis(1500);

/// ERC-4337 bundler methods (`eth_*UserOperation*`).
#[derive(Debug, Clone)]
pub struct BundlerClient {
    rpc: RpcEndpoint,
    entrypoint: Address,
}

#[derive(Debug, Clone)]
pub struct GasEstimates {
    pub call_gas_limit: U256,
    pub verification_gas_limit: U256,
    pub pre_verification_gas: U256,
}

impl BundlerClient {
    pub fn new(url: String, entrypoint: Address) -> Self {
        Self {
            rpc: RpcEndpoint::new(url),
            entrypoint,
        }
    }

    pub async fn estimate_user_operation_gas(&self, user_op: Value) -> Result<GasEstimates> {
        let params = serde_json::json!([user_op, fmt_address(self.entrypoint)]);
        let res = self
            .rpc
            .call("eth_estimateUserOperationGas", params)
            .await
            .context("eth_estimateUserOperationGas failed")?;

        Ok(GasEstimates {
            call_gas_limit: parse_u256_field(&res, "callGasLimit")?,
            verification_gas_limit: parse_u256_field(&res, "verificationGasLimit")?,
            pre_verification_gas: parse_u256_field(&res, "preVerificationGas")?,
        })
    }

    pub async fn send_user_operation(&self, user_op: Value) -> Result<H256> {
        let params = serde_json::json!([user_op, fmt_address(self.entrypoint)]);
        let res = self
            .rpc
            .call("eth_sendUserOperation", params)
            .await
            .context("eth_sendUserOperation failed")?;
        parse_userop_hash(&res)
    }

    /// Poll `eth_getUserOperationReceipt` until it is non-null. A zero timeout
    /// waits forever.
    pub async fn wait_user_operation_receipt(
        &self,
        user_op_hash: H256,
        timeout: Duration,
    ) -> Result<Value> {
        let start = Instant::now();
        loop {
            if !timeout.is_zero() && start.elapsed() > timeout {
                return Err(anyhow!(
                    "timed out waiting for userOp {} receipt after {:?}",
                    fmt_h256(user_op_hash),
                    timeout
                ));
            }

            let params = serde_json::json!([fmt_h256(user_op_hash)]);
            match self.rpc.call("eth_getUserOperationReceipt", params).await {
                Ok(v) if !v.is_null() => return Ok(v),
                Ok(_) => {}
                // transient errors are common on free-tier bundlers; keep polling
                Err(e) => tracing::warn!(error = %e, "bundler receipt poll error"),
            }

            tokio::time::sleep(RECEIPT_POLL_INTERVAL).await;
        }
    }
}

fn parse_u256_field(v: &Value, key: &str) -> Result<U256> {
    let s = v
        .get(key)
        .and_then(|x| x.as_str())
        .ok_or_else(|| anyhow!("missing or invalid field {key}"))?;
    parse_u256_quantity(s)
}

fn parse_userop_hash(res: &Value) -> Result<H256> {
    // Bundlers disagree on the shape: a bare string, or an object wrapping it.
    let hash_str = res
        .as_str()
        .or_else(|| {
            ["result", "userOpHash", "userOperationHash"]
                .iter()
                .find_map(|k| res.get(k).and_then(|v| v.as_str()))
        })
        .ok_or_else(|| anyhow!("unexpected eth_sendUserOperation result shape: {}", res))?;

    parse_h256(hash_str)
}

#[cfg(test)]
mod tests {
    use super::{parse_u256_field, parse_userop_hash};
    use crate::encoding::parse_h256;
    use ethers::types::U256;
    use serde_json::json;

    const HASH: &str = "0x1111111111111111111111111111111111111111111111111111111111111111";

    #[test]
    fn userop_hash_accepts_known_shapes() {
        let expected = parse_h256(HASH).unwrap();
        for res in [
            json!(HASH),
            json!({ "result": HASH }),
            json!({ "userOpHash": HASH }),
            json!({ "userOperationHash": HASH }),
        ] {
            assert_eq!(parse_userop_hash(&res).unwrap(), expected, "shape {res}");
        }
    }

    #[test]
    fn userop_hash_rejects_unknown_shape() {
        assert!(parse_userop_hash(&json!({ "foo": "bar" })).is_err());
        assert!(parse_userop_hash(&json!("0x1234")).is_err());
    }

    #[test]
    fn gas_fields_parse_from_quantities() {
        let res = json!({
            "callGasLimit": "0x186a0",
            "verificationGasLimit": "0x30d40",
            "preVerificationGas": "0xc350"
        });
        assert_eq!(
            parse_u256_field(&res, "callGasLimit").unwrap(),
            U256::from(100_000)
        );
        assert!(parse_u256_field(&res, "paymasterVerificationGasLimit").is_err());
    }
}
