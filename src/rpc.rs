use anyhow::{anyhow, Context, Result};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Plain JSON-RPC 2.0 over HTTP, shared by the bundler and paymaster clients
/// (their methods are not part of the standard eth namespace `ethers` speaks).
#[derive(Debug, Clone)]
pub struct RpcEndpoint {
    url: String,
    http: reqwest::Client,
    next_id: Arc<AtomicU64>,
}

impl RpcEndpoint {
    pub fn new(url: String) -> Self {
        Self {
            url,
            http: reqwest::Client::new(),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let req = serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        tracing::debug!(method, id, "json-rpc request");

        let resp = self
            .http
            .post(&self.url)
            .json(&req)
            .send()
            .await
            // The URL usually embeds an API key; keep it out of error messages.
            .with_context(|| format!("POST {} failed", method))?;

        let status = resp.status();
        let body: Value = resp.json().await.context("failed to decode JSON")?;

        if !status.is_success() {
            return Err(anyhow!("HTTP {}: {}", status, body));
        }

        extract_result(body)
    }
}

fn extract_result(mut body: Value) -> Result<Value> {
    if let Some(err) = body.get("error") {
        return Err(anyhow!("RPC error: {}", err));
    }
    body.get_mut("result")
        .map(Value::take)
        .ok_or_else(|| anyhow!("missing result field"))
}

#[cfg(test)]
mod tests {
    use super::extract_result;
    use serde_json::{json, Value};

    #[test]
    fn extract_result_returns_result_field() {
        let body = json!({ "jsonrpc": "2.0", "id": 1, "result": "0x1" });
        assert_eq!(extract_result(body).unwrap(), json!("0x1"));
    }

    #[test]
    fn extract_result_keeps_null_result() {
        // eth_getUserOperationReceipt answers null while the op is pending.
        let body = json!({ "jsonrpc": "2.0", "id": 1, "result": null });
        assert_eq!(extract_result(body).unwrap(), Value::Null);
    }

    #[test]
    fn extract_result_surfaces_rpc_error() {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "error": { "code": -32500, "message": "AA21 didn't pay prefund" }
        });
        let err = extract_result(body).unwrap_err();
        assert!(err.to_string().contains("AA21"));
    }

    #[test]
    fn extract_result_requires_result_or_error() {
        assert!(extract_result(json!({ "jsonrpc": "2.0", "id": 1 })).is_err());
    }
}
