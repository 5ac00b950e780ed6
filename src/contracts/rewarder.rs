use ethers::prelude::*;

// Rewarder genérico (MasterChef v2 / rewarder por segundo)
abigen!(
    Rewarder,
    r#"[
        function rewardPerSecond() external view returns (uint256)
    ]"#,
);
