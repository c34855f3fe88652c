use crate::config::Settings;
use crate::encoding::fmt_h256;
use crate::error::Result;
use crate::gateway::{subscribe_call, SubscriptionGateway, SubscriptionRecord};
use crate::smart_account::{connect_provider, ModularAccountClient, SmartAccount};
use crate::types::UserOperationCall;
use ethers::providers::{Http, Middleware, Provider};
use ethers::types::{Address, H256, U256};

/// The subscriber side: one smart account reading and joining subscriptions
/// through the gateway.
pub struct UserAccount<A> {
    account: A,
}

impl UserAccount<ModularAccountClient<Provider<Http>>> {
    pub async fn initialize_account_client(settings: &Settings) -> Result<Self> {
        let provider = connect_provider(settings).await?;
        let account = ModularAccountClient::connect(settings, provider).await?;
        Ok(Self { account })
    }
}

impl<A: SmartAccount> UserAccount<A> {
    #[cfg(test)]
    pub fn from_account(account: A) -> Self {
        Self { account }
    }

    pub fn address(&self) -> Address {
        self.account.address()
    }

    pub fn account(&self) -> &A {
        &self.account
    }

    pub fn into_account(self) -> A {
        self.account
    }

    pub async fn get_subscriptions<M: Middleware + 'static>(
        &self,
        gateway: &SubscriptionGateway<M>,
    ) -> Result<Vec<SubscriptionRecord>> {
        gateway.get_subscriptions(self.address()).await
    }

    pub async fn get_subscription_info<M: Middleware + 'static>(
        &self,
        gateway: &SubscriptionGateway<M>,
        subscription_id: U256,
    ) -> Result<SubscriptionRecord> {
        gateway
            .get_subscription_info(self.address(), subscription_id)
            .await
    }

    /// Executes `gateway.subscribe(planId, duration)` from the account.
    pub async fn subscribe<M: Middleware + 'static>(
        &self,
        gateway: &SubscriptionGateway<M>,
        plan_id: U256,
        duration: U256,
    ) -> Result<H256> {
        tracing::info!(
            account = ?self.address(),
            plan_id = %plan_id,
            duration = %duration,
            "subscribing"
        );
        let user_op_hash = self
            .account
            .send_user_operation(UserOperationCall::Execute {
                target: gateway.address(),
                value: U256::zero(),
                data: subscribe_call(plan_id, duration),
            })
            .await?;
        let tx_hash = self
            .account
            .wait_for_user_operation_transaction(user_op_hash)
            .await?;
        tracing::info!(tx_hash = %fmt_h256(tx_hash), "subscribed");
        Ok(tx_hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::SubscribeCall;
    use crate::testing::{AccountEvent, MockAccount};
    use ethers::abi::AbiDecode;
    use ethers::providers::Provider;
    use std::sync::Arc;

    #[tokio::test]
    async fn subscribe_executes_against_gateway() {
        let (provider, _mock) = Provider::mocked();
        let gateway_addr = Address::repeat_byte(0x11);
        let gateway = SubscriptionGateway::new(gateway_addr, Arc::new(provider));
        let user = UserAccount::from_account(MockAccount::new());

        let tx = user
            .subscribe(&gateway, U256::from(1), U256::from(2_592_000))
            .await
            .unwrap();

        let events = user.account().events();
        assert_eq!(events.len(), 2);
        let AccountEvent::Send(UserOperationCall::Execute {
            target,
            value,
            data,
        }) = &events[0]
        else {
            panic!("expected an execute call, got {:?}", events[0]);
        };
        assert_eq!(*target, gateway_addr);
        assert!(value.is_zero());
        let call = SubscribeCall::decode(data).unwrap();
        assert_eq!(call.plan_id, U256::from(1));
        assert_eq!(call.duration, U256::from(2_592_000));
        assert!(matches!(events[1], AccountEvent::Wait(_)));
        assert!(!tx.is_zero());
    }

    #[tokio::test]
    async fn subscribe_surfaces_confirmation_failure() {
        let (provider, _mock) = Provider::mocked();
        let gateway = SubscriptionGateway::new(Address::repeat_byte(0x11), Arc::new(provider));
        let user = UserAccount::from_account(MockAccount::new().reverting());

        let err = user
            .subscribe(&gateway, U256::from(1), U256::from(60))
            .await
            .unwrap_err();
        assert!(err.is_confirmation());
    }

    #[tokio::test]
    async fn reads_are_scoped_to_the_account() {
        let (provider, mock) = Provider::mocked();
        mock.push::<ethers::types::Bytes, _>(ethers::types::Bytes::from(
            ethers::abi::encode(&[ethers::abi::Token::Array(vec![])]),
        ))
        .unwrap();
        let gateway = SubscriptionGateway::new(Address::repeat_byte(0x11), Arc::new(provider));
        let user = UserAccount::from_account(MockAccount::new());

        assert!(user.get_subscriptions(&gateway).await.unwrap().is_empty());
        assert_eq!(user.address(), Address::repeat_byte(0xaa));
    }
}
