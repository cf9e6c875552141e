//! Contract bindings for the hub protocol surface.
//!
//! Tuple shapes stay inside this module and the adapter; everything above
//! works with the typed records in [`crate::chain::types`].

use alloy::sol;

sol! {
    #[allow(missing_docs)]
    #[sol(rpc)]
    contract Hub {
        struct RequestData {
            bytes32 endpointId;
            address requester;
            address agent;
            uint256 totalCost;
            uint256 baseCost;
            uint256 markup;
            uint256 gasReimbursement;
            uint64 createdAt;
            uint8 status;
            bytes params;
            bytes response;
            bool hasCallback;
        }

        struct EndpointData {
            string url;
            string inputFormat;
            string outputFormat;
            uint256 baseCost;
            uint256 maxResponseBytes;
            uint256 callbackGasLimit;
            uint256 estimatedGasCostWei;
            address owner;
            bool active;
            uint64 registeredAt;
        }

        struct HubStatsData {
            uint256 totalRequests;
            uint256 servedRequests;
            uint256 pendingProtocolFees;
            uint256 totalVolume;
            uint256 endpointCount;
        }

        struct AgentStatsData {
            uint256 fulfilled;
            uint256 cancelled;
            uint256 earnedTotal;
            uint64 lastActiveAt;
        }

        function getEndpointCount() external view returns (uint256 count);
        function endpointIds(uint256 index) external view returns (bytes32 id);
        function getEndpoint(bytes32 endpointId) external view returns (EndpointData memory data);
        function getEthPrice() external view returns (uint256 priceUnits);
        function estimateGasReimbursement(uint256 weiCost) external view returns (uint256 units);
        function getEndpointPrice(bytes32 endpointId)
            external
            view
            returns (uint256 estimatedGasCostWei, uint256 baseCostUnits);
        function getBalance(address account) external view returns (uint256 balance);
        function protocolFeesAccumulator() external view returns (uint256 accumulated);
        function getRequest(bytes32 requestId) external view returns (RequestData memory data);
        function getCallback(bytes32 requestId)
            external
            view
            returns (address target, uint256 gasLimit);
        function getAgentStats(address agent) external view returns (AgentStatsData memory stats);
        function getHubStats() external view returns (HubStatsData memory stats);

        function depositUSDC(uint256 amount) external;
        function createRequest(bytes32 endpointId, bytes calldata params)
            external
            returns (bytes32 requestId);
        function createRequestWithCallback(bytes32 endpointId, bytes calldata params)
            external
            returns (bytes32 requestId);
        function fulfillRequest(bytes32 requestId, bytes calldata response, bytes32 sessionId) external;
        function cancelRequest(bytes32 requestId) external;
        function flushProtocolFeesToBuyback() external;

        event RequestCreated(
            bytes32 indexed requestId,
            bytes32 indexed endpointId,
            address indexed requester,
            uint256 totalCost,
            uint64 createdAt
        );
        event RequestFulfilled(
            bytes32 indexed requestId,
            bytes32 indexed endpointId,
            address indexed agent,
            uint256 agentPayout
        );
        event RequestCancelled(bytes32 indexed requestId, address indexed canceller);
        event CallbackExecuted(bytes32 indexed requestId, bool success);
        event PriceOracleUpdated(address indexed oracle, uint256 priceUnits);
        event EndpointUpdated(bytes32 indexed endpointId);
        event EndpointGasConfigUpdated(bytes32 indexed endpointId, uint256 estimatedGasCostWei);
    }
}

sol! {
    #[allow(missing_docs)]
    #[sol(rpc)]
    contract KeepAlive {
        struct SubscriptionData {
            address consumer;
            address callbackTarget;
            uint256 callbackGasLimit;
            uint64 intervalSecs;
            uint256 feePerCycle;
            uint256 estimatedGasCostWei;
            uint64 maxFulfillments;
            uint64 fulfillmentCount;
            uint64 lastFulfilledAt;
            bool active;
        }

        struct KeepAliveStatsData {
            uint256 subscriptionCount;
            uint256 activeSubscriptions;
            uint256 totalFulfillments;
            uint256 totalFeesPaid;
        }

        function getSubscriptionCount() external view returns (uint256 count);
        function subscriptionIds(uint256 index) external view returns (bytes32 id);
        function getSubscription(bytes32 subscriptionId)
            external
            view
            returns (SubscriptionData memory data);
        function getSubscriptionCost(bytes32 subscriptionId)
            external
            view
            returns (uint256 feeUnits, uint256 gasReimbursementUnits);
        function isReady(bytes32 subscriptionId) external view returns (bool ready);
        function getBalance(address account) external view returns (uint256 balance);
        function getEthPrice() external view returns (uint256 priceUnits);
        function estimateGasReimbursement(uint256 weiCost) external view returns (uint256 units);
        function getStats() external view returns (KeepAliveStatsData memory stats);

        function depositUSDC(uint256 amount) external;
        function createSubscription(
            address callbackTarget,
            uint256 callbackGasLimit,
            uint64 intervalSecs,
            uint64 maxFulfillments
        ) external returns (bytes32 subscriptionId);
        function updateSubscription(
            bytes32 subscriptionId,
            uint64 intervalSecs,
            uint64 maxFulfillments
        ) external;
        function cancelSubscription(bytes32 subscriptionId) external;
        function fulfill(bytes32 subscriptionId) external;

        event SubscriptionCreated(
            bytes32 indexed subscriptionId,
            address indexed consumer,
            uint64 intervalSecs
        );
        event SubscriptionFulfilled(
            bytes32 indexed subscriptionId,
            address indexed agent,
            uint256 feePaid
        );
        event SubscriptionCancelled(bytes32 indexed subscriptionId);
    }
}

sol! {
    #[allow(missing_docs)]
    #[sol(rpc)]
    contract Staking {
        struct StakeInfoData {
            uint256 staked;
            uint256 unstakeRequested;
            uint64 unstakeAvailableAt;
            uint64 stakedSince;
        }

        function getStakeInfo(address account) external view returns (StakeInfoData memory info);
        function pendingRewards(address account) external view returns (uint256 amount);
        function totalStaked() external view returns (uint256 amount);
        function getReputation(address account) external view returns (uint256 score);
        function isEligibleAgent(address account) external view returns (bool eligible);
        function minimumStake() external view returns (uint256 amount);
        function unstakeDelaySecs() external view returns (uint64 secs);

        function stake(uint256 amount) external;
        function requestUnstake(uint256 amount) external;
        function withdraw() external;
        function claimRewards() external;
        function compound() external;
    }
}

sol! {
    #[allow(missing_docs)]
    #[sol(rpc)]
    contract SwapRouter {
        struct PoolKey {
            address token0;
            address token1;
            uint24 fee;
        }

        function swap(uint256 minMid) external payable returns (uint256 outAmount);
        function swapToToken(
            PoolKey calldata poolKey,
            uint256 minMid,
            uint256 minOut,
            bool midIsToken0
        ) external payable returns (uint256 outAmount);
    }
}

sol! {
    #[allow(missing_docs)]
    #[sol(rpc)]
    contract Erc20 {
        function allowance(address owner, address spender) external view returns (uint256 amount);
        function approve(address spender, uint256 amount) external returns (bool ok);
        function balanceOf(address account) external view returns (uint256 amount);
    }
}
