use crate::bundler::BundlerClient;
use crate::config::Settings;
use crate::contracts::{
    plugin_manifest_call, CreateAccountCall, EntryPoint, ExecuteCall, ModularAccount,
    MultiOwnerAccountFactory,
};
use crate::encoding::{self, fmt_h256};
use crate::error::{ConfigError, PluginError, Result};
use crate::paymaster::PaymasterClient;
use crate::types::{UserOperation, UserOperationCall, UserOperationReceipt};
use async_trait::async_trait;
use ethers::abi::AbiEncode;
use ethers::prelude::*;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::utils::keccak256;
use std::sync::Arc;
use std::time::Duration;

/// What the plugin client and the account orchestrator need from a smart
/// account: loupe reads plus "send one user operation, wait for it".
#[async_trait]
pub trait SmartAccount: Send + Sync {
    fn address(&self) -> Address;

    async fn installed_plugins(&self) -> Result<Vec<Address>>;

    /// `keccak256` of the plugin's encoded `pluginManifest()`.
    async fn plugin_manifest_hash(&self, plugin: Address) -> Result<H256>;

    /// Returns the userOp hash once the bundler has accepted the operation.
    async fn send_user_operation(&self, call: UserOperationCall) -> Result<H256>;

    /// Blocks until the operation is mined; returns the bundle transaction hash.
    async fn wait_for_user_operation_transaction(&self, user_op_hash: H256) -> Result<H256>;
}

/// Connect to the chain RPC and refuse to continue on a chain id mismatch.
pub async fn connect_provider(settings: &Settings) -> Result<Arc<Provider<Http>>> {
    let provider = Provider::<Http>::try_from(settings.rpc_url.as_str())
        .map_err(|e| ConfigError::Invalid {
            name: "SUBPLUG_RPC_URL",
            reason: e.to_string(),
        })?
        .interval(Duration::from_millis(350));

    let actual = provider
        .get_chainid()
        .await
        .map_err(|e| PluginError::rpc("eth_chainId", e))?
        .as_u64();
    if actual != settings.chain_id() {
        return Err(ConfigError::ChainMismatch {
            expected: settings.chain_id(),
            actual,
        }
        .into());
    }
    Ok(Arc::new(provider))
}

/// ERC-6900 modular account owned by a single key through the multi-owner
/// plugin, driven over an ERC-4337 bundler.
pub struct ModularAccountClient<M> {
    client: Arc<M>,
    wallet: LocalWallet,
    entrypoint: Address,
    factory: Address,
    salt: U256,
    address: Address,
    bundler: BundlerClient,
    paymaster: Option<PaymasterClient>,
    gas_multiplier_bps: u64,
    receipt_timeout: Duration,
}

impl<M: Middleware + 'static> ModularAccountClient<M> {
    pub async fn connect(settings: &Settings, client: Arc<M>) -> Result<Self> {
        let dep = &settings.deployment;
        let owner = settings.owner.address();

        let factory = MultiOwnerAccountFactory::new(dep.account_factory, client.clone());
        let address = factory
            .get_address(settings.account_salt, vec![owner])
            .call()
            .await
            .map_err(|e| PluginError::rpc("factory.getAddress", e))?;

        let paymaster = settings.gas_policy.as_ref().map(|policy| {
            PaymasterClient::new(
                policy.paymaster_url.clone(),
                dep.entry_point,
                dep.chain_id,
                policy.policy_id.clone(),
            )
        });

        tracing::info!(
            owner = ?owner,
            account = ?address,
            sponsored = paymaster.is_some(),
            "smart account client ready"
        );

        Ok(Self {
            client,
            wallet: settings.owner.clone(),
            entrypoint: dep.entry_point,
            factory: dep.account_factory,
            salt: settings.account_salt,
            address,
            bundler: BundlerClient::new(settings.bundler_url.clone(), dep.entry_point),
            paymaster,
            gas_multiplier_bps: settings.gas_multiplier_bps,
            receipt_timeout: settings.receipt_timeout,
        })
    }

    pub fn owner(&self) -> Address {
        self.wallet.address()
    }

    pub fn client(&self) -> Arc<M> {
        self.client.clone()
    }

    pub async fn is_deployed(&self) -> Result<bool> {
        let code = self
            .client
            .get_code(self.address, None)
            .await
            .map_err(|e| PluginError::rpc("eth_getCode", e))?;
        Ok(!code.as_ref().is_empty())
    }

    async fn build_user_operation(&self, call: UserOperationCall) -> anyhow::Result<UserOperation> {
        let entrypoint = EntryPoint::new(self.entrypoint, self.client.clone());
        let nonce = entrypoint
            .get_nonce(self.address, U256::zero())
            .call()
            .await
            .map_err(|e| anyhow::anyhow!("entryPoint.getNonce failed: {e}"))?;

        let init_code = if self.is_deployed().await? {
            Bytes::default()
        } else {
            let create = CreateAccountCall {
                salt: self.salt,
                owners: vec![self.wallet.address()],
            }
            .encode();
            let mut v = Vec::with_capacity(20 + create.len());
            v.extend_from_slice(self.factory.as_bytes());
            v.extend_from_slice(&create);
            Bytes::from(v)
        };

        let call_data = match call {
            UserOperationCall::Raw(data) => data,
            UserOperationCall::Execute {
                target,
                value,
                data,
            } => ExecuteCall {
                target,
                value,
                data,
            }
            .encode()
            .into(),
        };

        let gas_price = self
            .client
            .get_gas_price()
            .await
            .map_err(|e| anyhow::anyhow!("failed to fetch gas price: {e}"))?;
        let fee = gas_price * U256::from(self.gas_multiplier_bps) / U256::from(10_000u64);

        Ok(UserOperation {
            sender: self.address,
            nonce,
            init_code,
            call_data,
            // Filled in by eth_estimateUserOperationGas.
            call_gas_limit: U256::zero(),
            verification_gas_limit: U256::zero(),
            pre_verification_gas: U256::zero(),
            max_fee_per_gas: fee,
            max_priority_fee_per_gas: fee,
            paymaster_and_data: Bytes::default(),
            signature: Bytes::from(vec![0u8; 65]),
        })
    }

    async fn sign(&self, op: &mut UserOperation) -> anyhow::Result<()> {
        let entrypoint = EntryPoint::new(self.entrypoint, self.client.clone());
        let hash: [u8; 32] = entrypoint
            .get_user_op_hash(op.to_entry_point())
            .call()
            .await
            .map_err(|e| anyhow::anyhow!("entryPoint.getUserOpHash failed: {e}"))?;

        let sig = self.wallet.sign_message(hash).await?;
        op.signature = Bytes::from(sig.to_vec());
        Ok(())
    }

    async fn sponsor_and_send(&self, mut op: UserOperation) -> anyhow::Result<H256> {
        if let Some(pm) = self.paymaster.as_ref() {
            tracing::debug!(policy_id = pm.policy_id(), "requesting paymaster stub data");
            op.paymaster_and_data = pm.stub_data(encoding::user_op_to_json(&op)).await?;
        }

        self.sign(&mut op).await?;

        let est = self
            .bundler
            .estimate_user_operation_gas(encoding::user_op_to_json(&op))
            .await?;
        op.call_gas_limit = est.call_gas_limit;
        op.verification_gas_limit = est.verification_gas_limit;
        op.pre_verification_gas = est.pre_verification_gas;

        if let Some(pm) = self.paymaster.as_ref() {
            op.paymaster_and_data = pm.sponsor_data(encoding::user_op_to_json(&op)).await?;
        }

        // Gas limits and paymasterAndData are covered by the hash.
        self.sign(&mut op).await?;

        self.bundler
            .send_user_operation(encoding::user_op_to_json(&op))
            .await
    }
}

#[async_trait]
impl<M: Middleware + 'static> SmartAccount for ModularAccountClient<M> {
    fn address(&self) -> Address {
        self.address
    }

    async fn installed_plugins(&self) -> Result<Vec<Address>> {
        // An undeployed account has only its initial plugins, none of ours.
        if !self.is_deployed().await? {
            return Ok(Vec::new());
        }
        ModularAccount::new(self.address, self.client.clone())
            .get_installed_plugins()
            .call()
            .await
            .map_err(|e| PluginError::rpc("account.getInstalledPlugins", e))
    }

    async fn plugin_manifest_hash(&self, plugin: Address) -> Result<H256> {
        let tx: TypedTransaction = TransactionRequest::new()
            .to(plugin)
            .data(plugin_manifest_call())
            .into();
        let manifest = self
            .client
            .call(&tx, None)
            .await
            .map_err(|e| PluginError::rpc("plugin.pluginManifest", e))?;
        Ok(H256::from(keccak256(manifest.as_ref())))
    }

    async fn send_user_operation(&self, call: UserOperationCall) -> Result<H256> {
        let op = self
            .build_user_operation(call)
            .await
            .map_err(|e| PluginError::submission("building userOp", e))?;
        let hash = self
            .sponsor_and_send(op)
            .await
            .map_err(|e| PluginError::submission("sending userOp", e))?;
        tracing::info!(user_op_hash = %fmt_h256(hash), "userOp accepted by bundler");
        Ok(hash)
    }

    async fn wait_for_user_operation_transaction(&self, user_op_hash: H256) -> Result<H256> {
        let raw = self
            .bundler
            .wait_user_operation_receipt(user_op_hash, self.receipt_timeout)
            .await
            .map_err(|e| PluginError::confirmation("waiting for userOp receipt", e))?;
        let receipt = UserOperationReceipt::from_json(raw)?;
        let block = receipt.receipt.block_number;
        let tx_hash = receipt.into_transaction_hash()?;
        tracing::info!(
            user_op_hash = %fmt_h256(user_op_hash),
            tx_hash = %fmt_h256(tx_hash),
            block = ?block,
            "userOp mined"
        );
        Ok(tx_hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::abi::AbiDecode;
    use ethers::providers::MockProvider;

    // Well-known anvil dev key #0.
    const OWNER_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    fn factory() -> Address {
        "0x000000e92D78D90000007F0082006FDA09BD5f11".parse().unwrap()
    }

    fn account_client(provider: Provider<MockProvider>) -> ModularAccountClient<Provider<MockProvider>> {
        let entrypoint: Address = "0x5FF137D4b0FDCD49DcA30c7CF57E578a026d2789".parse().unwrap();
        ModularAccountClient {
            client: Arc::new(provider),
            wallet: OWNER_KEY.parse::<LocalWallet>().unwrap().with_chain_id(80002u64),
            entrypoint,
            factory: factory(),
            salt: U256::from(7),
            address: Address::repeat_byte(0xaa),
            bundler: BundlerClient::new("http://localhost:0".to_string(), entrypoint),
            paymaster: None,
            gas_multiplier_bps: 12_500,
            receipt_timeout: Duration::from_secs(1),
        }
    }

    /// Queues the three reads `build_user_operation` makes. The mock serves
    /// responses last-in first-out, so they go in reverse request order.
    fn queue_build_reads(mock: &MockProvider, nonce: u64, code: Bytes, gas_price: u64) {
        mock.push::<U256, _>(U256::from(gas_price)).unwrap();
        mock.push::<Bytes, _>(code).unwrap();
        mock.push::<Bytes, _>(Bytes::from(U256::from(nonce).encode()))
            .unwrap();
    }

    #[tokio::test]
    async fn undeployed_account_gets_init_code_and_execute_wrapping() {
        let (provider, mock) = Provider::mocked();
        queue_build_reads(&mock, 3, Bytes::default(), 1_000_000_000);
        let client = account_client(provider);

        let target = Address::repeat_byte(0x11);
        let data = Bytes::from(vec![0xde, 0xad, 0xbe, 0xef]);
        let op = client
            .build_user_operation(UserOperationCall::Execute {
                target,
                value: U256::zero(),
                data: data.clone(),
            })
            .await
            .unwrap();

        assert_eq!(op.sender, Address::repeat_byte(0xaa));
        assert_eq!(op.nonce, U256::from(3));

        assert_eq!(&op.init_code[..20], factory().as_bytes());
        let create = CreateAccountCall::decode(&op.init_code[20..]).unwrap();
        assert_eq!(
            create,
            CreateAccountCall {
                salt: U256::from(7),
                owners: vec![client.owner()],
            }
        );

        assert_eq!(
            ExecuteCall::decode(&op.call_data).unwrap(),
            ExecuteCall {
                target,
                value: U256::zero(),
                data,
            }
        );

        // 1 gwei * 12_500 / 10_000
        assert_eq!(op.max_fee_per_gas, U256::from(1_250_000_000u64));
        assert_eq!(op.max_priority_fee_per_gas, op.max_fee_per_gas);
        assert!(op.call_gas_limit.is_zero());
        assert!(op.paymaster_and_data.is_empty());
    }

    #[tokio::test]
    async fn deployed_account_sends_raw_call_data_without_init_code() {
        let (provider, mock) = Provider::mocked();
        queue_build_reads(&mock, 9, Bytes::from(vec![0x60, 0x80, 0x60, 0x40]), 30);
        let client = account_client(provider);

        let raw = Bytes::from(ethers::utils::id("unSubscribe(uint256)").to_vec());
        let op = client
            .build_user_operation(UserOperationCall::Raw(raw.clone()))
            .await
            .unwrap();

        assert!(op.init_code.is_empty());
        assert_eq!(op.call_data, raw);
        assert_eq!(op.nonce, U256::from(9));
        // Integer division rounds down: 30 * 12_500 / 10_000 = 37.
        assert_eq!(op.max_fee_per_gas, U256::from(37));
    }

    #[tokio::test]
    async fn undeployed_account_reports_no_plugins() {
        let (provider, mock) = Provider::mocked();
        mock.push::<Bytes, _>(Bytes::default()).unwrap();
        let client = account_client(provider);

        assert!(client.installed_plugins().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn manifest_hash_is_keccak_of_raw_return_data() {
        let (provider, mock) = Provider::mocked();
        let manifest = Bytes::from(vec![0x00, 0x01, 0x02, 0x03]);
        mock.push::<Bytes, _>(manifest.clone()).unwrap();
        let client = account_client(provider);

        let hash = client
            .plugin_manifest_hash(Address::repeat_byte(0xf7))
            .await
            .unwrap();
        assert_eq!(hash, H256::from(keccak256(manifest.as_ref())));
    }

    #[tokio::test]
    async fn failed_build_is_submission_error() {
        let (provider, _mock) = Provider::mocked();
        let client = account_client(provider);

        let err = client
            .send_user_operation(UserOperationCall::Raw(Bytes::default()))
            .await
            .unwrap_err();
        assert!(matches!(err, PluginError::Submission(_)));
    }
}
