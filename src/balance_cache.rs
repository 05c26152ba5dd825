//! Token balance polling for the connected account.
//!
//! Simpler sibling of the reconciliation store: no merge problem, just a map
//! of per-token entries refreshed in place. Multi-token polls run one future
//! per address concurrently, so wall latency tracks the slowest token, and a
//! failure on one address never fails or blocks the others.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ethers::types::Address;
use futures::future::join_all;
use log::{debug, info};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::connection::{ConnectionSnapshot, ConnectionSupervisor, SupervisorEvent};
use crate::token_metadata::TokenMetadataResolver;
use crate::transport::ChainTransport;
use crate::types::{format_token_amount, TokenBalanceEntry};

type BalanceMap = HashMap<Address, TokenBalanceEntry>;

struct BalanceShared {
    entries: Mutex<BalanceMap>,
    changes: watch::Sender<BalanceMap>,
}

impl BalanceShared {
    fn publish(&self) {
        let map = self.entries.lock().expect("balance lock poisoned").clone();
        let _ = self.changes.send(map);
    }
}

pub struct BalanceCache {
    transport: Arc<dyn ChainTransport>,
    resolver: Arc<TokenMetadataResolver>,
    conn: watch::Receiver<ConnectionSnapshot>,
    shared: Arc<BalanceShared>,
    refresh: Mutex<Option<JoinHandle<()>>>,
    watchers: Mutex<Vec<JoinHandle<()>>>,
}

impl BalanceCache {
    pub fn new(
        transport: Arc<dyn ChainTransport>,
        resolver: Arc<TokenMetadataResolver>,
        supervisor: &ConnectionSupervisor,
    ) -> Arc<Self> {
        let (changes, _) = watch::channel(BalanceMap::new());
        Arc::new(Self {
            transport,
            resolver,
            conn: supervisor.subscribe(),
            shared: Arc::new(BalanceShared {
                entries: Mutex::new(BalanceMap::new()),
                changes,
            }),
            refresh: Mutex::new(None),
            watchers: Mutex::new(Vec::new()),
        })
    }

    /// Poll one token balance for the connected account and refresh its entry
    /// in place.
    ///
    /// Metadata and balance are fetched independently: a metadata failure is
    /// absorbed by the resolver's fallback and never poisons the balance; a
    /// balance failure yields an error-flagged entry that still carries the
    /// resolved metadata.
    pub async fn poll_balance(&self, token: Address) -> TokenBalanceEntry {
        let entry = self.fetch_entry(token).await;
        {
            let mut entries = self.shared.entries.lock().expect("balance lock poisoned");
            entries.insert(token, entry.clone());
        }
        self.shared.publish();
        entry
    }

    /// Poll many tokens concurrently: one future per address, outcomes
    /// collected independently. A failing address is error-flagged in the
    /// returned map; the others are unaffected.
    pub async fn poll_many(&self, tokens: &[Address]) -> BalanceMap {
        let fetched = join_all(tokens.iter().map(|&t| self.fetch_entry(t))).await;
        let map: BalanceMap = fetched.into_iter().map(|e| (e.address, e)).collect();
        {
            let mut entries = self.shared.entries.lock().expect("balance lock poisoned");
            entries.extend(map.iter().map(|(k, v)| (*k, v.clone())));
        }
        self.shared.publish();
        map
    }

    async fn fetch_entry(&self, token: Address) -> TokenBalanceEntry {
        let Some(owner) = self.conn.borrow().account else {
            let mut entry = TokenBalanceEntry::empty(token);
            entry.last_error = Some("not connected".to_string());
            return entry;
        };

        // Balance and metadata in flight together.
        let (balance, info) = tokio::join!(
            self.transport.erc20_balance_of(token, owner),
            self.resolver.resolve(token)
        );

        match balance {
            Ok(raw) => TokenBalanceEntry {
                address: token,
                raw_balance: raw,
                formatted_balance: format_token_amount(raw, info.decimals),
                token_info: Some(info),
                is_loading: false,
                last_error: None,
            },
            Err(e) => {
                debug!("BalanceCache: balanceOf failed for {:?}: {}", token, e);
                TokenBalanceEntry {
                    address: token,
                    raw_balance: Default::default(),
                    formatted_balance: "0".to_string(),
                    token_info: Some(info),
                    is_loading: false,
                    last_error: Some(e.to_string()),
                }
            }
        }
    }

    /// Re-poll `tokens` on a fixed interval while the session is connected.
    /// The timer stops on its own when the session drops and is torn down
    /// immediately by [`stop_auto_refresh`](Self::stop_auto_refresh) or
    /// supervisor disconnect.
    pub fn start_auto_refresh(self: &Arc<Self>, tokens: Vec<Address>, interval: Duration) {
        self.stop_auto_refresh();
        info!(
            "BalanceCache: auto-refresh every {:?} for {} tokens",
            interval,
            tokens.len()
        );
        let cache = Arc::clone(self);
        let conn = self.conn.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // First tick fires immediately; skip it so the cadence starts one
            // interval from now.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if !conn.borrow().connected {
                    info!("BalanceCache: session gone, stopping auto-refresh");
                    break;
                }
                cache.poll_many(&tokens).await;
            }
        });
        *self.refresh.lock().expect("refresh lock poisoned") = Some(handle);
    }

    /// Tear down the interval timer immediately. No orphaned timer keeps
    /// polling after the session ends.
    pub fn stop_auto_refresh(&self) {
        if let Some(handle) = self.refresh.lock().expect("refresh lock poisoned").take() {
            handle.abort();
        }
    }

    /// Stop auto-refresh and reset all entries to their initial state when the
    /// owning account disconnects.
    pub fn bind_supervisor(self: &Arc<Self>, supervisor: &ConnectionSupervisor) {
        let cache = Arc::clone(self);
        let mut events = supervisor.subscribe_events();
        let handle = tokio::spawn(async move {
            while let Ok(event) = events.recv().await {
                if matches!(event, SupervisorEvent::Disconnected) {
                    cache.stop_auto_refresh();
                    cache.reset();
                }
            }
        });
        self.watchers
            .lock()
            .expect("watcher lock poisoned")
            .push(handle);
    }

    /// Reset every entry to the initial/zero state, keeping the key set.
    pub fn reset(&self) {
        {
            let mut entries = self.shared.entries.lock().expect("balance lock poisoned");
            for (addr, entry) in entries.iter_mut() {
                *entry = TokenBalanceEntry::empty(*addr);
            }
        }
        self.shared.publish();
        info!("BalanceCache: entries reset");
    }

    pub fn snapshot(&self) -> BalanceMap {
        self.shared.entries.lock().expect("balance lock poisoned").clone()
    }

    pub fn subscribe_changes(&self) -> watch::Receiver<BalanceMap> {
        self.shared.changes.subscribe()
    }
}

impl Drop for BalanceCache {
    fn drop(&mut self) {
        if let Some(handle) = self
            .refresh
            .lock()
            .ok()
            .and_then(|mut refresh| refresh.take())
        {
            handle.abort();
        }
        if let Ok(mut watchers) = self.watchers.lock() {
            for handle in watchers.drain(..) {
                handle.abort();
            }
        }
    }
}
