//! In-memory smart account for exercising the plugin client and the
//! orchestrator without a bundler.

use crate::contracts::{InstallPluginCall, UninstallPluginCall};
use crate::error::{PluginError, Result};
use crate::smart_account::SmartAccount;
use crate::types::UserOperationCall;
use async_trait::async_trait;
use ethers::abi::AbiDecode;
use ethers::types::{Address, H256};
use std::sync::Mutex;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AccountEvent {
    QueryInstalled,
    ManifestHash(Address),
    Send(UserOperationCall),
    Wait(H256),
}

#[derive(Default)]
struct State {
    installed: Vec<Address>,
    events: Vec<AccountEvent>,
    next_op: u64,
}

pub struct MockAccount {
    address: Address,
    apply_installs: bool,
    revert: bool,
    state: Mutex<State>,
}

impl MockAccount {
    pub const MANIFEST_HASH: H256 = H256([0xab; 32]);

    pub fn new() -> Self {
        Self {
            address: Address::repeat_byte(0xaa),
            apply_installs: true,
            revert: false,
            state: Mutex::default(),
        }
    }

    pub fn with_installed(self, plugins: Vec<Address>) -> Self {
        self.state.lock().unwrap().installed = plugins;
        self
    }

    /// `installPlugin` is mined but the loupe never lists the plugin.
    pub fn ignoring_installs(mut self) -> Self {
        self.apply_installs = false;
        self
    }

    /// Every user operation lands with `success = false`.
    pub fn reverting(mut self) -> Self {
        self.revert = true;
        self
    }

    pub fn events(&self) -> Vec<AccountEvent> {
        self.state.lock().unwrap().events.clone()
    }
}

impl Default for MockAccount {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SmartAccount for MockAccount {
    fn address(&self) -> Address {
        self.address
    }

    async fn installed_plugins(&self) -> Result<Vec<Address>> {
        let mut state = self.state.lock().unwrap();
        state.events.push(AccountEvent::QueryInstalled);
        Ok(state.installed.clone())
    }

    async fn plugin_manifest_hash(&self, plugin: Address) -> Result<H256> {
        let mut state = self.state.lock().unwrap();
        state.events.push(AccountEvent::ManifestHash(plugin));
        Ok(Self::MANIFEST_HASH)
    }

    async fn send_user_operation(&self, call: UserOperationCall) -> Result<H256> {
        let mut state = self.state.lock().unwrap();
        if let UserOperationCall::Raw(data) = &call {
            if let Ok(install) = InstallPluginCall::decode(data) {
                if self.apply_installs {
                    state.installed.push(install.plugin);
                }
            } else if let Ok(uninstall) = UninstallPluginCall::decode(data) {
                state.installed.retain(|p| *p != uninstall.plugin);
            }
        }
        state.events.push(AccountEvent::Send(call));
        state.next_op += 1;
        Ok(H256::from_low_u64_be(state.next_op))
    }

    async fn wait_for_user_operation_transaction(&self, user_op_hash: H256) -> Result<H256> {
        let mut state = self.state.lock().unwrap();
        state.events.push(AccountEvent::Wait(user_op_hash));
        if self.revert {
            return Err(PluginError::Confirmation(format!(
                "userOp {user_op_hash:?} reverted"
            )));
        }
        Ok(H256::from_low_u64_be(0x1000 + user_op_hash.to_low_u64_be()))
    }
}
