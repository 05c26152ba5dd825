//! # Chain Transport Capability
//!
//! The injected boundary between the SDK and the chain. Every suspension point
//! in the core crosses this trait; nothing else in the core suspends.
//!
//! The transport is constructed explicitly and passed down as
//! `Arc<dyn ChainTransport>` — there is no process-wide default client, so
//! tests substitute a fake transport without touching global state. The handle
//! is owned by the [`ConnectionSupervisor`](crate::connection::ConnectionSupervisor);
//! every component below it shares the handle read-only and never closes it.

use async_trait::async_trait;
use ethers::types::{Address, H256, U256};
use tokio::sync::{broadcast, mpsc};

use crate::error::Result;
use crate::types::ChainParams;

/// A decoded `Transfer(address,address,uint256)` log, before filtering and
/// formatting. The indexed `from`/`to` topics are already extracted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawTransferLog {
    /// Emitting token contract.
    pub address: Address,
    pub from: Address,
    pub to: Address,
    pub value: U256,
    pub transaction_hash: H256,
    pub log_index: u64,
    pub block_number: u64,
}

/// Wallet-side change notification, forwarded by the transport.
#[derive(Debug, Clone)]
pub enum WalletEvent {
    /// The authorized account set changed; an empty list means revoked.
    AccountsChanged(Vec<Address>),
    /// The active chain changed.
    ChainChanged(u64),
    /// The transport lost its session entirely.
    Disconnected,
}

/// Handle for one live log subscription. Raw logs arrive on `receiver`;
/// `id` is passed back to [`ChainTransport::unsubscribe`].
pub struct LogSubscription {
    pub id: u64,
    pub receiver: mpsc::Receiver<RawTransferLog>,
}

/// The full chain capability consumed by the SDK.
///
/// Read calls (`get_*`, `query_*`, `erc20_*`) are shared by all components;
/// wallet calls (`request_*`) are issued only by the connection supervisor.
#[async_trait]
pub trait ChainTransport: Send + Sync {
    /// Latest block number known to the node.
    async fn get_current_block_number(&self) -> Result<u64>;

    /// Timestamp (seconds) of a committed block.
    async fn get_block_timestamp(&self, block_number: u64) -> Result<u64>;

    /// Range query for Transfer logs of `contract`.
    ///
    /// `from_topic` / `to_topic` restrict the indexed endpoints; a caller that
    /// needs "either endpoint" must issue two queries and union the results —
    /// the topics compose as AND, not OR.
    async fn query_transfer_logs(
        &self,
        contract: Address,
        from_topic: Option<Address>,
        to_topic: Option<Address>,
        from_block: u64,
        to_block: Option<u64>,
    ) -> Result<Vec<RawTransferLog>>;

    /// Push-style subscription for new Transfer logs of `contract`.
    async fn subscribe_transfers(&self, contract: Address) -> Result<LogSubscription>;

    /// Remove exactly the subscription identified by `id`. Removing an
    /// unknown id is a no-op.
    async fn unsubscribe(&self, id: u64) -> Result<()>;

    /// `symbol()` on the token contract. Optional in the ERC20 standard.
    async fn erc20_symbol(&self, token: Address) -> Result<String>;

    /// `decimals()` on the token contract. Optional in the ERC20 standard.
    async fn erc20_decimals(&self, token: Address) -> Result<u8>;

    /// `balanceOf(owner)` on the token contract.
    async fn erc20_balance_of(&self, token: Address, owner: Address) -> Result<U256>;

    /// Prompt for account access (`eth_requestAccounts`).
    async fn request_accounts(&self) -> Result<Vec<Address>>;

    /// Accounts already authorized, without prompting (`eth_accounts`).
    async fn authorized_accounts(&self) -> Result<Vec<Address>>;

    /// Active chain id.
    async fn get_chain_id(&self) -> Result<u64>;

    /// Native-currency balance of an account.
    async fn get_native_balance(&self, account: Address) -> Result<U256>;

    /// Ask the transport to switch its active chain.
    async fn request_chain_switch(&self, chain_id: u64) -> Result<()>;

    /// Ask the transport to register a chain it does not know yet.
    async fn request_add_chain(&self, params: &ChainParams) -> Result<()>;

    /// Change notifications for accounts/chain. Each call returns a fresh
    /// receiver on the same broadcast channel.
    fn wallet_events(&self) -> broadcast::Receiver<WalletEvent>;
}
