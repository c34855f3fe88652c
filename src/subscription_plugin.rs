use ethers::contract::abigen;

// Execution functions the Subscription Plugin exposes on the account. The
// parameter order of every entry is the wire contract with the deployed plugin.
abigen!(
    SubscriptionPlugin,
    r#"[
        struct PlanParams { uint256 price; uint256 chargeInterval; }

        function createProduct(bytes32 name, string description, string logoUrl, uint8 productType, address chargeToken, address receivingAddress, uint256 destinationChain)
        function updateProduct(uint256 productId, address receivingAddress, uint256 destinationChain, bool isActive)
        function createPlan(uint256 productId, uint256 chargeInterval, uint256 price)
        function updatePlan(uint256 planId, bool isActive)
        function createProductWithPlans(bytes32 name, string description, string logoUrl, uint8 productType, address chargeToken, address receivingAddress, uint256 destinationChain, PlanParams[] plans)
        function createRecurringPayment(bytes32 name, string description, string logoUrl, address chargeToken, address receivingAddress, uint256 destinationChain, uint256 chargeInterval, uint256 endTime, uint256 price)
        function subscribe(uint256 planId, uint256 endTime)
        function unSubscribe(uint256 subscriptionId)
        function changeSubscriptionEndTime(uint256 subscriptionId, uint256 endTime)

        function pack(address addr, uint8 functionId) pure returns (bytes21)
    ]"#
);

/// `productType` tag for products created with plans.
pub const SUBSCRIPTION_PRODUCT_TYPE: u8 = 1;

/// Function ids of the multi-owner plugin the subscription plugin depends on
/// (user-op validation, runtime validation).
pub const DEPENDENCY_FUNCTION_IDS: [u8; 2] = [0, 1];
