//! Scriptable in-process transport for integration tests.
//!
//! Backs the dependency-injection seam: a `MockTransport` plays the role of
//! the chain (historical corpus, push feed, wallet prompts) and records what
//! the SDK asked of it.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use ethers::types::{Address, H256, U256};
use tokio::sync::{broadcast, mpsc};

use transfer_monitor_sdk::error::{MonitorError, Result};
use transfer_monitor_sdk::transport::{
    ChainTransport, LogSubscription, RawTransferLog, WalletEvent,
};

/// Per-token scripted balance outcome.
pub struct BalanceScript {
    pub delay: Duration,
    pub result: std::result::Result<U256, String>,
}

pub struct MockTransport {
    pub current_block: AtomicU64,
    /// Historical corpus served by `query_transfer_logs`.
    pub logs: Mutex<Vec<RawTransferLog>>,
    pub block_timestamps: Mutex<HashMap<u64, u64>>,
    pub fail_queries: AtomicBool,
    pub fail_block_lookup: AtomicBool,
    pub fail_subscribe: AtomicBool,
    pub fail_symbol: AtomicBool,
    pub fail_decimals: AtomicBool,
    pub query_delay_ms: AtomicU64,
    pub query_calls: AtomicU64,
    pub symbol_calls: AtomicU64,
    pub decimals_calls: AtomicU64,
    pub balance_calls: AtomicU64,
    pub token_symbol: Mutex<String>,
    pub token_decimals: AtomicU64,
    pub balance_scripts: Mutex<HashMap<Address, BalanceScript>>,
    pub accounts: Mutex<Vec<Address>>,
    pub chain_id: AtomicU64,
    pub known_chains: Mutex<HashSet<u64>>,
    pub unsubscribed: Mutex<Vec<u64>>,
    live_tx: Mutex<Option<mpsc::Sender<RawTransferLog>>>,
    next_sub_id: AtomicU64,
    wallet_tx: broadcast::Sender<WalletEvent>,
}

impl MockTransport {
    pub fn new() -> Self {
        let (wallet_tx, _) = broadcast::channel(16);
        Self {
            current_block: AtomicU64::new(10_000),
            logs: Mutex::new(Vec::new()),
            block_timestamps: Mutex::new(HashMap::new()),
            fail_queries: AtomicBool::new(false),
            fail_block_lookup: AtomicBool::new(false),
            fail_subscribe: AtomicBool::new(false),
            fail_symbol: AtomicBool::new(false),
            fail_decimals: AtomicBool::new(false),
            query_delay_ms: AtomicU64::new(0),
            query_calls: AtomicU64::new(0),
            symbol_calls: AtomicU64::new(0),
            decimals_calls: AtomicU64::new(0),
            balance_calls: AtomicU64::new(0),
            token_symbol: Mutex::new("MCK".to_string()),
            token_decimals: AtomicU64::new(18),
            balance_scripts: Mutex::new(HashMap::new()),
            accounts: Mutex::new(vec![Address::repeat_byte(0xEE)]),
            chain_id: AtomicU64::new(11155111),
            known_chains: Mutex::new(HashSet::from([11155111])),
            unsubscribed: Mutex::new(Vec::new()),
            live_tx: Mutex::new(None),
            next_sub_id: AtomicU64::new(0),
            wallet_tx,
        }
    }

    pub fn seed_log(&self, raw: RawTransferLog) {
        self.logs.lock().unwrap().push(raw);
    }

    /// Push one notification into the live subscription, if attached.
    pub async fn push_live(&self, raw: RawTransferLog) {
        let tx = self.live_tx.lock().unwrap().clone();
        if let Some(tx) = tx {
            tx.send(raw).await.expect("live channel closed");
        }
    }

    /// Simulate the transport dropping the live feed.
    pub fn drop_subscription(&self) {
        *self.live_tx.lock().unwrap() = None;
    }

    pub fn has_live_subscriber(&self) -> bool {
        self.live_tx.lock().unwrap().is_some()
    }

    pub fn emit_wallet_event(&self, event: WalletEvent) {
        let _ = self.wallet_tx.send(event);
    }

    pub fn script_balance(&self, token: Address, delay: Duration, result: std::result::Result<U256, String>) {
        self.balance_scripts
            .lock()
            .unwrap()
            .insert(token, BalanceScript { delay, result });
    }
}

pub fn raw_log(tx_byte: u8, log_index: u64, block: u64, from: Address, to: Address) -> RawTransferLog {
    RawTransferLog {
        address: Address::repeat_byte(0xAA),
        from,
        to,
        value: U256::exp10(18),
        transaction_hash: H256::repeat_byte(tx_byte),
        log_index,
        block_number: block,
    }
}

#[async_trait]
impl ChainTransport for MockTransport {
    async fn get_current_block_number(&self) -> Result<u64> {
        Ok(self.current_block.load(Ordering::SeqCst))
    }

    async fn get_block_timestamp(&self, block_number: u64) -> Result<u64> {
        if self.fail_block_lookup.load(Ordering::SeqCst) {
            return Err(MonitorError::query("get_block", "scripted failure"));
        }
        let ts = self
            .block_timestamps
            .lock()
            .unwrap()
            .get(&block_number)
            .copied()
            .unwrap_or(1_700_000_000 + block_number * 12);
        Ok(ts)
    }

    async fn query_transfer_logs(
        &self,
        contract: Address,
        from_topic: Option<Address>,
        to_topic: Option<Address>,
        from_block: u64,
        to_block: Option<u64>,
    ) -> Result<Vec<RawTransferLog>> {
        self.query_calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.query_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.fail_queries.load(Ordering::SeqCst) {
            return Err(MonitorError::query("eth_getLogs", "scripted failure"));
        }
        let upper = to_block.unwrap_or(u64::MAX);
        let logs = self
            .logs
            .lock()
            .unwrap()
            .iter()
            .filter(|l| l.address == contract)
            .filter(|l| l.block_number >= from_block && l.block_number <= upper)
            .filter(|l| from_topic.map_or(true, |a| l.from == a))
            .filter(|l| to_topic.map_or(true, |a| l.to == a))
            .cloned()
            .collect();
        Ok(logs)
    }

    async fn subscribe_transfers(&self, _contract: Address) -> Result<LogSubscription> {
        if self.fail_subscribe.load(Ordering::SeqCst) {
            return Err(MonitorError::subscription("scripted attach failure"));
        }
        let id = self.next_sub_id.fetch_add(1, Ordering::SeqCst) + 1;
        let (tx, rx) = mpsc::channel(64);
        *self.live_tx.lock().unwrap() = Some(tx);
        Ok(LogSubscription { id, receiver: rx })
    }

    async fn unsubscribe(&self, id: u64) -> Result<()> {
        self.unsubscribed.lock().unwrap().push(id);
        *self.live_tx.lock().unwrap() = None;
        Ok(())
    }

    async fn erc20_symbol(&self, _token: Address) -> Result<String> {
        self.symbol_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_symbol.load(Ordering::SeqCst) {
            return Err(MonitorError::query("symbol()", "scripted failure"));
        }
        Ok(self.token_symbol.lock().unwrap().clone())
    }

    async fn erc20_decimals(&self, _token: Address) -> Result<u8> {
        self.decimals_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_decimals.load(Ordering::SeqCst) {
            return Err(MonitorError::query("decimals()", "scripted failure"));
        }
        Ok(self.token_decimals.load(Ordering::SeqCst) as u8)
    }

    async fn erc20_balance_of(&self, token: Address, _owner: Address) -> Result<U256> {
        self.balance_calls.fetch_add(1, Ordering::SeqCst);
        let script = {
            let scripts = self.balance_scripts.lock().unwrap();
            scripts
                .get(&token)
                .map(|s| (s.delay, s.result.clone()))
        };
        match script {
            Some((delay, result)) => {
                tokio::time::sleep(delay).await;
                result.map_err(|reason| MonitorError::query("balanceOf()", reason))
            }
            None => Ok(U256::exp10(18)),
        }
    }

    async fn request_accounts(&self) -> Result<Vec<Address>> {
        Ok(self.accounts.lock().unwrap().clone())
    }

    async fn authorized_accounts(&self) -> Result<Vec<Address>> {
        Ok(self.accounts.lock().unwrap().clone())
    }

    async fn get_chain_id(&self) -> Result<u64> {
        Ok(self.chain_id.load(Ordering::SeqCst))
    }

    async fn get_native_balance(&self, _account: Address) -> Result<U256> {
        Ok(U256::exp10(18))
    }

    async fn request_chain_switch(&self, chain_id: u64) -> Result<()> {
        if self.known_chains.lock().unwrap().contains(&chain_id) {
            self.chain_id.store(chain_id, Ordering::SeqCst);
            Ok(())
        } else {
            Err(MonitorError::query(
                "wallet_switchEthereumChain",
                format!("unrecognized chain {}", chain_id),
            ))
        }
    }

    async fn request_add_chain(&self, params: &transfer_monitor_sdk::types::ChainParams) -> Result<()> {
        self.known_chains.lock().unwrap().insert(params.chain_id);
        Ok(())
    }

    fn wallet_events(&self) -> broadcast::Receiver<WalletEvent> {
        self.wallet_tx.subscribe()
    }
}
