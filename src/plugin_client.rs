use crate::contracts::{InstallPluginCall, UninstallPluginCall};
use crate::encoding::{encode_bytes32_name, fmt_h256, format_price};
use crate::error::{PluginError, Result};
use crate::smart_account::SmartAccount;
use crate::subscription_plugin::{
    ChangeSubscriptionEndTimeCall, CreatePlanCall, CreateProductCall, CreateProductWithPlansCall,
    CreateRecurringPaymentCall, PlanParams, SubscribeCall, UnSubscribeCall, UpdatePlanCall,
    UpdateProductCall, DEPENDENCY_FUNCTION_IDS, SUBSCRIPTION_PRODUCT_TYPE,
};
use crate::types::{FunctionReference, Plan, UserOperationCall};
use ethers::abi::AbiEncode;
use ethers::contract::EthCall;
use ethers::types::{Address, Bytes, H256, U256};

/// Product fields shared by `createProduct` and `createProductWithPlans`.
#[derive(Clone, Debug)]
pub struct ProductDetails {
    pub name: String,
    pub description: String,
    pub logo_url: String,
    pub charge_token: Address,
    pub recipient: Address,
    pub destination_chain: u64,
}

/// Recurring-payment parameters (`createRecurringPayment`).
#[derive(Clone, Debug)]
pub struct RecurringPayment {
    pub name: String,
    pub description: String,
    pub logo_url: String,
    pub charge_token: Address,
    pub recipient: Address,
    pub destination_chain: u64,
    pub charge_interval: u64,
    pub end_time: u64,
    pub price: U256,
}

/// Talks to the Subscription Plugin through a smart account.
///
/// Reads and install management live here; every plugin-gated mutation lives
/// on [`PluginSession`], which can only be obtained through
/// [`PluginClient::ensure_installed`].
pub struct PluginClient<A> {
    chain_id: u64,
    plugin: Address,
    dependency_plugin: Address,
    account: A,
}

impl<A: SmartAccount> PluginClient<A> {
    pub fn new(chain_id: u64, plugin: Address, dependency_plugin: Address, account: A) -> Self {
        Self {
            chain_id,
            plugin,
            dependency_plugin,
            account,
        }
    }

    pub fn plugin_address(&self) -> Address {
        self.plugin
    }

    pub fn account(&self) -> &A {
        &self.account
    }

    /// Scales a whole-token price to base units (`price * 10^decimals`).
    pub fn format_price(price: U256, decimals: u32) -> Result<U256> {
        format_price(price, decimals)
    }

    pub async fn installed_plugins(&self) -> Result<Vec<Address>> {
        self.account.installed_plugins().await
    }

    /// Addresses are compared as parsed 20-byte values, so the hex letter
    /// case of either side does not matter.
    pub async fn is_plugin_installed(&self) -> Result<bool> {
        let installed = self.installed_plugins().await?;
        Ok(installed.contains(&self.plugin))
    }

    /// Validation functions of the multi-owner plugin this plugin hooks into.
    pub fn dependencies(&self) -> [FunctionReference; 2] {
        DEPENDENCY_FUNCTION_IDS.map(|id| FunctionReference::pack(self.dependency_plugin, id))
    }

    /// Sends `installPlugin` and waits for it to be mined. Does not check the
    /// result; [`PluginClient::ensure_installed`] does.
    pub async fn install_plugin(&self) -> Result<H256> {
        let manifest_hash = self.account.plugin_manifest_hash(self.plugin).await?;
        let dependencies = self.dependencies();
        tracing::info!(
            chain_id = self.chain_id,
            plugin = ?self.plugin,
            account = ?self.account.address(),
            dependency = ?self.dependency_plugin,
            "installing subscription plugin"
        );
        let call = InstallPluginCall {
            plugin: self.plugin,
            manifest_hash: manifest_hash.into(),
            plugin_install_data: Bytes::default(),
            dependencies: dependencies.iter().map(|d| d.into_bytes()).collect(),
        };
        self.submit(call).await
    }

    pub async fn uninstall_plugin(&self) -> Result<H256> {
        tracing::info!(plugin = ?self.plugin, "uninstalling subscription plugin");
        let call = UninstallPluginCall {
            plugin: self.plugin,
            config: Bytes::default(),
            plugin_uninstall_data: Bytes::default(),
        };
        self.submit(call).await
    }

    /// Installs the plugin when it is missing, then confirms it shows up in
    /// the account loupe before handing out a session.
    pub async fn ensure_installed(&self) -> Result<PluginSession<'_, A>> {
        if !self.is_plugin_installed().await? {
            let tx_hash = self.install_plugin().await?;
            if !self.is_plugin_installed().await? {
                return Err(PluginError::InstallNotVerified {
                    plugin: self.plugin,
                    tx_hash,
                });
            }
            tracing::info!(
                chain_id = self.chain_id,
                tx_hash = %fmt_h256(tx_hash),
                "subscription plugin installed"
            );
        }
        Ok(PluginSession { client: self })
    }

    async fn submit<C: EthCall + AbiEncode>(&self, call: C) -> Result<H256> {
        let function = C::function_name();
        let data = Bytes::from(call.encode());
        let user_op_hash = self
            .account
            .send_user_operation(UserOperationCall::Raw(data))
            .await?;
        let tx_hash = self
            .account
            .wait_for_user_operation_transaction(user_op_hash)
            .await?;
        tracing::info!(function = %function, tx_hash = %fmt_h256(tx_hash), "plugin call confirmed");
        Ok(tx_hash)
    }
}

/// Proof that the plugin was installed on the account when the session was
/// opened. Each operation is one user operation, awaited until mined.
pub struct PluginSession<'a, A> {
    client: &'a PluginClient<A>,
}

impl<'a, A: SmartAccount> PluginSession<'a, A> {
    pub async fn create_product(&self, product: &ProductDetails) -> Result<H256> {
        self.client
            .submit(CreateProductCall {
                name: encode_bytes32_name(&product.name)?,
                description: product.description.clone(),
                logo_url: product.logo_url.clone(),
                product_type: SUBSCRIPTION_PRODUCT_TYPE,
                charge_token: product.charge_token,
                receiving_address: product.recipient,
                destination_chain: U256::from(product.destination_chain),
            })
            .await
    }

    pub async fn update_product(
        &self,
        product_id: U256,
        recipient: Address,
        destination_chain: u64,
        is_active: bool,
    ) -> Result<H256> {
        self.client
            .submit(UpdateProductCall {
                product_id,
                receiving_address: recipient,
                destination_chain: U256::from(destination_chain),
                is_active,
            })
            .await
    }

    pub async fn create_plan(
        &self,
        product_id: U256,
        charge_interval: u64,
        price: U256,
        decimals: u32,
    ) -> Result<H256> {
        self.client
            .submit(CreatePlanCall {
                product_id,
                charge_interval: U256::from(charge_interval),
                price: PluginClient::<A>::format_price(price, decimals)?,
            })
            .await
    }

    pub async fn update_plan(&self, plan_id: U256, is_active: bool) -> Result<H256> {
        self.client
            .submit(UpdatePlanCall { plan_id, is_active })
            .await
    }

    pub async fn create_product_with_plans(
        &self,
        product: &ProductDetails,
        plans: &[Plan],
        decimals: u32,
    ) -> Result<H256> {
        let plans = plans
            .iter()
            .map(|plan| {
                Ok(PlanParams {
                    price: PluginClient::<A>::format_price(plan.price, decimals)?,
                    charge_interval: U256::from(plan.charge_interval),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        self.client
            .submit(CreateProductWithPlansCall {
                name: encode_bytes32_name(&product.name)?,
                description: product.description.clone(),
                logo_url: product.logo_url.clone(),
                product_type: SUBSCRIPTION_PRODUCT_TYPE,
                charge_token: product.charge_token,
                receiving_address: product.recipient,
                destination_chain: U256::from(product.destination_chain),
                plans,
            })
            .await
    }

    pub async fn create_recurring_payment(
        &self,
        payment: &RecurringPayment,
        decimals: u32,
    ) -> Result<H256> {
        self.client
            .submit(CreateRecurringPaymentCall {
                name: encode_bytes32_name(&payment.name)?,
                description: payment.description.clone(),
                logo_url: payment.logo_url.clone(),
                charge_token: payment.charge_token,
                receiving_address: payment.recipient,
                destination_chain: U256::from(payment.destination_chain),
                charge_interval: U256::from(payment.charge_interval),
                end_time: U256::from(payment.end_time),
                price: PluginClient::<A>::format_price(payment.price, decimals)?,
            })
            .await
    }

    pub async fn subscribe(&self, plan_id: U256, end_time: u64) -> Result<H256> {
        self.client
            .submit(SubscribeCall {
                plan_id,
                end_time: U256::from(end_time),
            })
            .await
    }

    pub async fn unsubscribe(&self, subscription_id: U256) -> Result<H256> {
        self.client
            .submit(UnSubscribeCall { subscription_id })
            .await
    }

    /// `end_time` is passed through as is; the contract reads 0 as "no end".
    pub async fn change_subscription_end_time(
        &self,
        subscription_id: U256,
        end_time: u64,
    ) -> Result<H256> {
        self.client
            .submit(ChangeSubscriptionEndTimeCall {
                subscription_id,
                end_time: U256::from(end_time),
            })
            .await
    }
}
