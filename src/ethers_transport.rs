//! Production [`ChainTransport`] over an ethers WebSocket provider.
//!
//! Wallet-style calls (`eth_requestAccounts`, `wallet_switchEthereumChain`,
//! `wallet_addEthereumChain`) are forwarded as raw JSON-RPC requests; a plain
//! node that does not implement the prompt-style account request falls back to
//! `eth_accounts`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use ethers::prelude::{Middleware, Provider, Ws};
use ethers::types::{Address, Filter, Log, H256, U256};
use futures_util::StreamExt;
use log::{debug, info, warn};
use serde_json::json;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::contracts::{Erc20, TRANSFER_TOPIC};
use crate::error::{MonitorError, Result};
use crate::transport::{ChainTransport, LogSubscription, RawTransferLog, WalletEvent};
use crate::types::ChainParams;

struct SubEntry {
    remote_id: U256,
    forwarder: JoinHandle<()>,
}

pub struct EthersTransport {
    provider: Arc<Provider<Ws>>,
    subs: DashMap<u64, SubEntry>,
    next_sub_id: AtomicU64,
    wallet_tx: broadcast::Sender<WalletEvent>,
}

impl EthersTransport {
    /// Connect to a WebSocket endpoint. An unreachable endpoint maps to
    /// [`MonitorError::NoProviderFound`]: there is no transport to talk to.
    pub async fn connect(url: &str) -> Result<Self> {
        info!("EthersTransport: connecting to {}", url);
        let provider = Provider::<Ws>::connect(url).await.map_err(|e| {
            warn!("EthersTransport: connect failed: {}", e);
            MonitorError::NoProviderFound
        })?;
        let (wallet_tx, _) = broadcast::channel(16);
        Ok(Self {
            provider: Arc::new(provider),
            subs: DashMap::new(),
            next_sub_id: AtomicU64::new(0),
            wallet_tx,
        })
    }

    fn erc20(&self, token: Address) -> Erc20<Provider<Ws>> {
        Erc20::new(token, Arc::clone(&self.provider))
    }

    fn transfer_filter(
        contract: Address,
        from_topic: Option<Address>,
        to_topic: Option<Address>,
    ) -> Filter {
        let mut filter = Filter::new().address(contract).topic0(*TRANSFER_TOPIC);
        if let Some(from) = from_topic {
            filter = filter.topic1(H256::from(from));
        }
        if let Some(to) = to_topic {
            filter = filter.topic2(H256::from(to));
        }
        filter
    }
}

/// Decode a raw `Transfer` log. Returns `None` for pending or malformed logs
/// (missing provenance fields, wrong topic count).
fn decode_transfer_log(log: &Log) -> Option<RawTransferLog> {
    if log.topics.len() != 3 || log.topics[0] != *TRANSFER_TOPIC {
        return None;
    }
    let transaction_hash = log.transaction_hash?;
    let log_index = log.log_index?.as_u64();
    let block_number = log.block_number?.as_u64();
    Some(RawTransferLog {
        address: log.address,
        from: Address::from_slice(&log.topics[1].as_bytes()[12..]),
        to: Address::from_slice(&log.topics[2].as_bytes()[12..]),
        value: U256::from_big_endian(log.data.as_ref()),
        transaction_hash,
        log_index,
        block_number,
    })
}

#[async_trait]
impl ChainTransport for EthersTransport {
    async fn get_current_block_number(&self) -> Result<u64> {
        self.provider
            .get_block_number()
            .await
            .map(|n| n.as_u64())
            .map_err(|e| MonitorError::query("eth_blockNumber", e))
    }

    async fn get_block_timestamp(&self, block_number: u64) -> Result<u64> {
        let block = self
            .provider
            .get_block(block_number)
            .await
            .map_err(|e| MonitorError::query("eth_getBlockByNumber", e))?
            .ok_or_else(|| {
                MonitorError::query("eth_getBlockByNumber", format!("block {} not found", block_number))
            })?;
        Ok(block.timestamp.as_u64())
    }

    async fn query_transfer_logs(
        &self,
        contract: Address,
        from_topic: Option<Address>,
        to_topic: Option<Address>,
        from_block: u64,
        to_block: Option<u64>,
    ) -> Result<Vec<RawTransferLog>> {
        let mut filter = Self::transfer_filter(contract, from_topic, to_topic).from_block(from_block);
        if let Some(to) = to_block {
            filter = filter.to_block(to);
        }
        let logs = self
            .provider
            .get_logs(&filter)
            .await
            .map_err(|e| MonitorError::query("eth_getLogs", e))?;
        let decoded: Vec<RawTransferLog> = logs
            .iter()
            .filter_map(|log| {
                let raw = decode_transfer_log(log);
                if raw.is_none() {
                    warn!("EthersTransport: skipping malformed transfer log {:?}", log.transaction_hash);
                }
                raw
            })
            .collect();
        debug!(
            "EthersTransport: {} logs ({} decoded) for {:?} from block {}",
            logs.len(),
            decoded.len(),
            contract,
            from_block
        );
        Ok(decoded)
    }

    async fn subscribe_transfers(&self, contract: Address) -> Result<LogSubscription> {
        let id = self.next_sub_id.fetch_add(1, Ordering::SeqCst) + 1;
        let (tx, rx) = mpsc::channel(256);
        let (ready_tx, ready_rx) = oneshot::channel();
        let provider = Arc::clone(&self.provider);
        let filter = Self::transfer_filter(contract, None, None);

        // The stream borrows the provider, so subscribe inside the forwarder
        // task and hand the remote id back through a oneshot.
        let forwarder = tokio::spawn(async move {
            let mut stream = match provider.subscribe_logs(&filter).await {
                Ok(stream) => {
                    let _ = ready_tx.send(Ok(stream.id));
                    stream
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(MonitorError::subscription(e)));
                    return;
                }
            };
            while let Some(log) = stream.next().await {
                if let Some(raw) = decode_transfer_log(&log) {
                    if tx.send(raw).await.is_err() {
                        break;
                    }
                }
            }
            // Dropping tx here closes the receiver; the listener observes the
            // feed as dropped.
        });

        let remote_id = ready_rx
            .await
            .map_err(|_| MonitorError::subscription("subscription task exited"))??;
        self.subs.insert(id, SubEntry { remote_id, forwarder });
        info!(
            "EthersTransport: subscription {} ({}) attached for {:?}",
            id, remote_id, contract
        );
        Ok(LogSubscription { id, receiver: rx })
    }

    async fn unsubscribe(&self, id: u64) -> Result<()> {
        let Some((_, entry)) = self.subs.remove(&id) else {
            return Ok(());
        };
        entry.forwarder.abort();
        self.provider
            .unsubscribe(entry.remote_id)
            .await
            .map_err(|e| MonitorError::query("eth_unsubscribe", e))?;
        Ok(())
    }

    async fn erc20_symbol(&self, token: Address) -> Result<String> {
        self.erc20(token)
            .symbol()
            .call()
            .await
            .map_err(|e| MonitorError::query("symbol()", e))
    }

    async fn erc20_decimals(&self, token: Address) -> Result<u8> {
        self.erc20(token)
            .decimals()
            .call()
            .await
            .map_err(|e| MonitorError::query("decimals()", e))
    }

    async fn erc20_balance_of(&self, token: Address, owner: Address) -> Result<U256> {
        self.erc20(token)
            .balance_of(owner)
            .call()
            .await
            .map_err(|e| MonitorError::query("balanceOf()", e))
    }

    async fn request_accounts(&self) -> Result<Vec<Address>> {
        match self
            .provider
            .request::<_, Vec<Address>>("eth_requestAccounts", ())
            .await
        {
            Ok(accounts) => Ok(accounts),
            Err(e) => {
                let msg = e.to_string();
                if msg.contains("rejected") || msg.contains("denied") {
                    return Err(MonitorError::UserRejected);
                }
                // Plain nodes do not implement the prompt-style request.
                debug!("EthersTransport: eth_requestAccounts unavailable ({}), trying eth_accounts", msg);
                self.authorized_accounts().await
            }
        }
    }

    async fn authorized_accounts(&self) -> Result<Vec<Address>> {
        self.provider
            .request::<_, Vec<Address>>("eth_accounts", ())
            .await
            .map_err(|e| MonitorError::query("eth_accounts", e))
    }

    async fn get_chain_id(&self) -> Result<u64> {
        self.provider
            .get_chainid()
            .await
            .map(|id| id.as_u64())
            .map_err(|e| MonitorError::query("eth_chainId", e))
    }

    async fn get_native_balance(&self, account: Address) -> Result<U256> {
        self.provider
            .get_balance(account, None)
            .await
            .map_err(|e| MonitorError::query("eth_getBalance", e))
    }

    async fn request_chain_switch(&self, chain_id: u64) -> Result<()> {
        self.provider
            .request::<_, Option<serde_json::Value>>(
                "wallet_switchEthereumChain",
                [json!({ "chainId": format!("0x{:x}", chain_id) })],
            )
            .await
            .map(|_| ())
            .map_err(|e| MonitorError::query("wallet_switchEthereumChain", e))
    }

    async fn request_add_chain(&self, params: &ChainParams) -> Result<()> {
        self.provider
            .request::<_, Option<serde_json::Value>>(
                "wallet_addEthereumChain",
                [json!({
                    "chainId": format!("0x{:x}", params.chain_id),
                    "chainName": params.chain_name,
                    "rpcUrls": params.rpc_urls,
                    "nativeCurrency": {
                        "name": params.native_currency_symbol,
                        "symbol": params.native_currency_symbol,
                        "decimals": params.native_currency_decimals,
                    },
                    "blockExplorerUrls": params.block_explorer_urls,
                })],
            )
            .await
            .map(|_| ())
            .map_err(|e| MonitorError::query("wallet_addEthereumChain", e))
    }

    fn wallet_events(&self) -> broadcast::Receiver<WalletEvent> {
        // A plain RPC endpoint never pushes account/chain changes; the channel
        // stays idle. Wallet-style transports feed it.
        self.wallet_tx.subscribe()
    }
}
