use ethers::prelude::abigen;
use ethers::types::H256;
use ethers::utils::keccak256;
use once_cell::sync::Lazy;

abigen!(
    Erc20,
    r#"[
        function symbol() external view returns (string)
        function decimals() external view returns (uint8)
        function balanceOf(address owner) external view returns (uint256)
        event Transfer(address indexed from, address indexed to, uint256 value)
    ]"#
);

/// topic0 of `Transfer(address,address,uint256)`.
pub static TRANSFER_TOPIC: Lazy<H256> =
    Lazy::new(|| H256::from(keccak256("Transfer(address,address,uint256)")));
