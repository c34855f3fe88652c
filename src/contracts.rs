use ethers::contract::abigen;

// Account-abstraction side of the stack: EntryPoint v0.6, the ERC-6900 modular
// account (plugin manager + loupe) and the multi-owner account factory.

abigen!(
    EntryPoint,
    r#"[
        struct UserOperation { address sender; uint256 nonce; bytes initCode; bytes callData; uint256 callGasLimit; uint256 verificationGasLimit; uint256 preVerificationGas; uint256 maxFeePerGas; uint256 maxPriorityFeePerGas; bytes paymasterAndData; bytes signature; }
        function getNonce(address sender, uint192 key) view returns (uint256)
        function getUserOpHash(UserOperation userOp) view returns (bytes32)
    ]"#
);

abigen!(
    ModularAccount,
    r#"[
        function execute(address target, uint256 value, bytes data) payable returns (bytes)
        function installPlugin(address plugin, bytes32 manifestHash, bytes pluginInstallData, bytes21[] dependencies)
        function uninstallPlugin(address plugin, bytes config, bytes pluginUninstallData)
        function getInstalledPlugins() view returns (address[])
    ]"#
);

abigen!(
    MultiOwnerAccountFactory,
    r#"[
        function createAccount(uint256 salt, address[] owners) returns (address)
        function getAddress(uint256 salt, address[] owners) view returns (address)
    ]"#
);

/// Call data for `pluginManifest()`. Its raw return data is what the account
/// expects to be hashed into `manifestHash`.
pub fn plugin_manifest_call() -> ethers::types::Bytes {
    ethers::utils::id("pluginManifest()").to_vec().into()
}
