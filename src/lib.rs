use alloy::primitives::{
    Address,
    address,
};

pub mod chain;
pub mod config;
pub mod controller;
pub mod error;
pub mod outcome;
pub mod test_helpers;
pub mod view;
pub mod wager;
pub mod wallets;

pub use error::WagerError;

pub mod lucky_digit_types {
    use alloy::sol;

    sol! {
        #[sol(rpc)]
        contract LuckyDigit {
            event GamePlayed(address player, uint256 amount, uint256 prediction, uint256 houseNumber);
            event GameWon(address player, uint256 amount);
            event GameLost(address player, uint256 amount);

            function houseBalance() external view returns (uint256);
            function play(uint256 prediction) external payable;
        }
    }
}

/// The only contract this client reads from, simulates against and queries.
pub const CONTRACT_ADDRESS: Address = address!("8fa509ab0087755fdd5fb49df1d5fad95f9d9eb7");

pub const LINEA_SEPOLIA_CHAIN_ID: u64 = 59_141;
