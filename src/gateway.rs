use crate::encoding::fmt_h256;
use crate::error::{PluginError, Result};
use ethers::abi::AbiEncode;
use ethers::contract::abigen;
use ethers::providers::Middleware;
use ethers::types::{Address, Bytes, TransactionReceipt, H256, U256, U64};
use std::sync::Arc;

// Subscription bookkeeping as seen by subscribers and the operator. Shares its
// address with the plugin unless the deployment profile overrides it.
abigen!(
    SubscriptionManager,
    r#"[
        struct SubscriptionRecord { uint256 id; uint256 planId; address subscriber; uint256 startTime; uint256 endTime; uint256 lastChargedAt; bool isActive; }

        function getSubscriptions(address subscriber) view returns (SubscriptionRecord[])
        function getSubscriptionInfo(address subscriber, uint256 subscriptionId) view returns (SubscriptionRecord)
        function getSubscriptionById(uint256 subscriptionId) view returns (SubscriptionRecord)
        function numSubscriptionPlans() view returns (uint256)
        function subscribe(uint256 planId, uint256 duration)
        function charge(uint256 subscriptionId, address subscriber)
    ]"#
);

/// `SubscriptionRecord` as the human-readable binding returns it.
type RecordTuple = (U256, U256, Address, U256, U256, U256, bool);

fn into_record(
    (id, plan_id, subscriber, start_time, end_time, last_charged_at, is_active): RecordTuple,
) -> SubscriptionRecord {
    SubscriptionRecord {
        id,
        plan_id,
        subscriber,
        start_time,
        end_time,
        last_charged_at,
        is_active,
    }
}

/// Call data for `subscribe(planId, duration)`, executed by the account.
pub fn subscribe_call(plan_id: U256, duration: U256) -> Bytes {
    SubscribeCall { plan_id, duration }.encode().into()
}

pub struct SubscriptionGateway<M> {
    contract: SubscriptionManager<M>,
}

impl<M: Middleware + 'static> SubscriptionGateway<M> {
    pub fn new(address: Address, client: Arc<M>) -> Self {
        Self {
            contract: SubscriptionManager::new(address, client),
        }
    }

    pub fn address(&self) -> Address {
        self.contract.address()
    }

    pub async fn get_subscriptions(&self, subscriber: Address) -> Result<Vec<SubscriptionRecord>> {
        self.contract
            .get_subscriptions(subscriber)
            .call()
            .await
            .map(|records| records.into_iter().map(into_record).collect())
            .map_err(|e| PluginError::rpc("gateway.getSubscriptions", e))
    }

    pub async fn get_subscription_info(
        &self,
        subscriber: Address,
        subscription_id: U256,
    ) -> Result<SubscriptionRecord> {
        self.contract
            .get_subscription_info(subscriber, subscription_id)
            .call()
            .await
            .map(into_record)
            .map_err(|e| PluginError::rpc("gateway.getSubscriptionInfo", e))
    }

    pub async fn get_subscription_by_id(&self, subscription_id: U256) -> Result<SubscriptionRecord> {
        self.contract
            .get_subscription_by_id(subscription_id)
            .call()
            .await
            .map(into_record)
            .map_err(|e| PluginError::rpc("gateway.getSubscriptionById", e))
    }

    pub async fn num_subscription_plans(&self) -> Result<U256> {
        self.contract
            .num_subscription_plans()
            .call()
            .await
            .map_err(|e| PluginError::rpc("gateway.numSubscriptionPlans", e))
    }

    /// Charges one subscription period from an EOA. `M` must sign, e.g. a
    /// `SignerMiddleware` over the operator key.
    pub async fn charge(&self, subscription_id: U256, subscriber: Address) -> Result<H256> {
        tracing::info!(
            subscription_id = %subscription_id,
            subscriber = ?subscriber,
            "charging subscription"
        );
        let call = self.contract.charge(subscription_id, subscriber);
        let pending = call
            .send()
            .await
            .map_err(|e| PluginError::submission("gateway.charge", e))?;
        let tx_hash = *pending;

        let receipt = pending
            .await
            .map_err(|e| PluginError::confirmation("gateway.charge receipt", e))?;
        check_charge_receipt(tx_hash, receipt)
    }
}

/// A charge only counts once it is mined with status 1.
fn check_charge_receipt(tx_hash: H256, receipt: Option<TransactionReceipt>) -> Result<H256> {
    let receipt = receipt.ok_or_else(|| {
        PluginError::Confirmation(format!("charge tx {} dropped", fmt_h256(tx_hash)))
    })?;
    if receipt.status != Some(U64::one()) {
        return Err(PluginError::Confirmation(format!(
            "charge tx {} reverted",
            fmt_h256(tx_hash)
        )));
    }

    tracing::info!(
        tx_hash = %fmt_h256(tx_hash),
        block = ?receipt.block_number,
        "charge confirmed"
    );
    Ok(tx_hash)
}
