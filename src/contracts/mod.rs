// Contracts Module - Public ABIs Only

pub mod erc20;

pub use erc20::{Erc20, TRANSFER_TOPIC};
