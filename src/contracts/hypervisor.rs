use ethers::prelude::*;

// Hypervisor (vault ERC20) - solo las funciones y eventos que lee el scraper.
// Los eventos se decodifican contra HYPERVISOR_ABI (ver chain_reader).
abigen!(
    Hypervisor,
    r#"[
        function totalSupply() external view returns (uint256)
        function decimals() external view returns (uint8)
        function symbol() external view returns (string)
        function getTotalAmounts() external view returns (uint256 total0, uint256 total1)
        function balanceOf(address account) external view returns (uint256)
        event Deposit(address indexed sender, address indexed to, uint256 shares, uint256 amount0, uint256 amount1)
        event Withdraw(address indexed sender, address indexed to, uint256 shares, uint256 amount0, uint256 amount1)
        event Rebalance(int24 tick, uint256 totalAmount0, uint256 totalAmount1, uint256 feeAmount0, uint256 feeAmount1, uint256 totalSupply)
        event ZeroBurn(uint8 fee, uint256 fees0, uint256 fees1)
        event Transfer(address indexed from, address indexed to, uint256 value)
        event Approval(address indexed owner, address indexed spender, uint256 value)
    ]"#,
);
