//! # Connection Supervisor
//!
//! Owns the chain-transport handle and the wallet session around it. Every
//! other component (resolver, fetcher, listener, balance cache) shares the
//! handle read-only; only the supervisor creates it, reacts to account/chain
//! change notifications, and tears the session down.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use ethers::types::{Address, U256};
use log::{info, warn};
use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::error::{MonitorError, Result};
use crate::settings::Network;
use crate::transport::{ChainTransport, WalletEvent};
use crate::types::ChainParams;

/// Session-level notification consumed by the store and the balance cache.
#[derive(Debug, Clone)]
pub enum SupervisorEvent {
    Connected(Address),
    Disconnected,
    ChainChanged(u64),
}

/// Point-in-time view of the wallet session.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionSnapshot {
    pub account: Option<Address>,
    pub chain_id: Option<u64>,
    pub native_balance: Option<U256>,
    pub connected: bool,
    /// Warning flag: the active chain differs from the expected target. The
    /// session keeps operating; callers decide what to surface.
    pub wrong_network: bool,
}

impl ConnectionSnapshot {
    fn empty() -> Self {
        Self {
            account: None,
            chain_id: None,
            native_balance: None,
            connected: false,
            wrong_network: false,
        }
    }
}

struct ConnShared {
    state: Mutex<ConnectionSnapshot>,
    changes: watch::Sender<ConnectionSnapshot>,
    events: broadcast::Sender<SupervisorEvent>,
    expected_chain_id: u64,
}

impl ConnShared {
    fn publish(&self) {
        let snapshot = self.state.lock().expect("connection lock poisoned").clone();
        let _ = self.changes.send(snapshot);
    }
}

pub struct ConnectionSupervisor {
    transport: Arc<dyn ChainTransport>,
    chain_params: ChainParams,
    shared: Arc<ConnShared>,
    was_connected: AtomicBool,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionSupervisor {
    pub fn new(transport: Arc<dyn ChainTransport>, network: &Network) -> Self {
        let (changes, _) = watch::channel(ConnectionSnapshot::empty());
        let (events, _) = broadcast::channel(16);
        Self {
            transport,
            chain_params: network.chain_params(),
            shared: Arc::new(ConnShared {
                state: Mutex::new(ConnectionSnapshot::empty()),
                changes,
                events,
                expected_chain_id: network.expected_chain_id,
            }),
            was_connected: AtomicBool::new(false),
            watcher: Mutex::new(None),
        }
    }

    /// The shared read-only transport handle.
    pub fn transport(&self) -> Arc<dyn ChainTransport> {
        Arc::clone(&self.transport)
    }

    /// Request wallet access and populate the session.
    ///
    /// Fails with [`MonitorError::NoProviderFound`] when no transport is
    /// reachable, [`MonitorError::UserRejected`] when the prompt is declined,
    /// and [`MonitorError::QueryFailed`] when the follow-up reads error.
    pub async fn connect(&self) -> Result<ConnectionSnapshot> {
        let accounts = self.transport.request_accounts().await?;
        let account = accounts.first().copied().ok_or(MonitorError::UserRejected)?;

        populate(&self.transport, &self.shared, account).await?;
        self.was_connected.store(true, Ordering::SeqCst);
        self.spawn_wallet_watcher();

        let snapshot = self.snapshot();
        let _ = self.shared.events.send(SupervisorEvent::Connected(account));
        info!(
            "Supervisor: connected as {:?} on chain {:?}",
            account, snapshot.chain_id
        );
        Ok(snapshot)
    }

    /// Silently restore a prior session: if the transport still reports an
    /// authorized account, populate state without prompting. Returns whether
    /// a session was restored.
    pub async fn try_restore(&self) -> Result<bool> {
        let accounts = self.transport.authorized_accounts().await.unwrap_or_default();
        let Some(account) = accounts.first().copied() else {
            return Ok(false);
        };
        populate(&self.transport, &self.shared, account).await?;
        self.was_connected.store(true, Ordering::SeqCst);
        self.spawn_wallet_watcher();
        let _ = self.shared.events.send(SupervisorEvent::Connected(account));
        info!("Supervisor: restored session for {:?}", account);
        Ok(true)
    }

    /// Clear all session state synchronously. Has no failure mode.
    pub fn disconnect(&self) {
        if let Ok(mut watcher) = self.watcher.lock() {
            if let Some(handle) = watcher.take() {
                handle.abort();
            }
        }
        {
            let mut state = self.shared.state.lock().expect("connection lock poisoned");
            *state = ConnectionSnapshot::empty();
        }
        self.was_connected.store(false, Ordering::SeqCst);
        self.shared.publish();
        let _ = self.shared.events.send(SupervisorEvent::Disconnected);
        info!("Supervisor: disconnected");
    }

    /// Ask the transport to change its active chain.
    ///
    /// If the switch fails for the one well-known target network, the chain is
    /// registered via `request_add_chain` and the switch retried once. Any
    /// other failure is [`MonitorError::NetworkSwitchFailed`].
    pub async fn switch_network(&self, target_chain_id: u64) -> Result<()> {
        match self.transport.request_chain_switch(target_chain_id).await {
            Ok(()) => {
                self.apply_chain(target_chain_id);
                Ok(())
            }
            Err(first) if target_chain_id == self.shared.expected_chain_id => {
                info!(
                    "Supervisor: chain {} unknown to transport ({}), registering it",
                    target_chain_id, first
                );
                self.transport
                    .request_add_chain(&self.chain_params)
                    .await
                    .map_err(|e| MonitorError::NetworkSwitchFailed {
                        chain_id: target_chain_id,
                        reason: e.to_string(),
                    })?;
                self.transport
                    .request_chain_switch(target_chain_id)
                    .await
                    .map_err(|e| MonitorError::NetworkSwitchFailed {
                        chain_id: target_chain_id,
                        reason: e.to_string(),
                    })?;
                self.apply_chain(target_chain_id);
                Ok(())
            }
            Err(e) => Err(MonitorError::NetworkSwitchFailed {
                chain_id: target_chain_id,
                reason: e.to_string(),
            }),
        }
    }

    pub fn snapshot(&self) -> ConnectionSnapshot {
        self.shared
            .state
            .lock()
            .expect("connection lock poisoned")
            .clone()
    }

    pub fn account(&self) -> Option<Address> {
        self.shared
            .state
            .lock()
            .expect("connection lock poisoned")
            .account
    }

    pub fn is_connected(&self) -> bool {
        self.shared
            .state
            .lock()
            .expect("connection lock poisoned")
            .connected
    }

    /// Whether a session was established during this process lifetime.
    pub fn was_connected(&self) -> bool {
        self.was_connected.load(Ordering::SeqCst)
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionSnapshot> {
        self.shared.changes.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SupervisorEvent> {
        self.shared.events.subscribe()
    }

    fn apply_chain(&self, chain_id: u64) {
        {
            let mut state = self.shared.state.lock().expect("connection lock poisoned");
            state.chain_id = Some(chain_id);
            state.wrong_network = chain_id != self.shared.expected_chain_id;
        }
        self.shared.publish();
    }

    /// Register for accounts-changed and chain-changed notifications.
    ///
    /// Accounts changed triggers a full resync of the session; chain changed
    /// updates the chain id and raises the wrong-network warning when the new
    /// chain is not the expected target.
    fn spawn_wallet_watcher(&self) {
        let mut watcher = self.watcher.lock().expect("watcher lock poisoned");
        if watcher.is_some() {
            return;
        }
        let transport = Arc::clone(&self.transport);
        let shared = Arc::clone(&self.shared);
        let mut events = self.transport.wallet_events();
        *watcher = Some(tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(WalletEvent::AccountsChanged(accounts)) => {
                        match accounts.first().copied() {
                            Some(account) => {
                                info!("Supervisor: accounts changed, resyncing as {:?}", account);
                                if let Err(e) = populate(&transport, &shared, account).await {
                                    warn!("Supervisor: resync failed: {}", e);
                                }
                                let _ =
                                    shared.events.send(SupervisorEvent::Connected(account));
                            }
                            None => {
                                info!("Supervisor: authorization revoked");
                                {
                                    let mut state = shared
                                        .state
                                        .lock()
                                        .expect("connection lock poisoned");
                                    *state = ConnectionSnapshot::empty();
                                }
                                shared.publish();
                                let _ = shared.events.send(SupervisorEvent::Disconnected);
                            }
                        }
                    }
                    Ok(WalletEvent::ChainChanged(chain_id)) => {
                        let wrong = chain_id != shared.expected_chain_id;
                        if wrong {
                            warn!(
                                "Supervisor: chain changed to {} (expected {})",
                                chain_id, shared.expected_chain_id
                            );
                        }
                        {
                            let mut state =
                                shared.state.lock().expect("connection lock poisoned");
                            state.chain_id = Some(chain_id);
                            state.wrong_network = wrong;
                        }
                        shared.publish();
                        let _ = shared.events.send(SupervisorEvent::ChainChanged(chain_id));
                    }
                    Ok(WalletEvent::Disconnected) => {
                        {
                            let mut state =
                                shared.state.lock().expect("connection lock poisoned");
                            *state = ConnectionSnapshot::empty();
                        }
                        shared.publish();
                        let _ = shared.events.send(SupervisorEvent::Disconnected);
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Supervisor: missed {} wallet events", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }));
    }
}

impl Drop for ConnectionSupervisor {
    fn drop(&mut self) {
        if let Ok(mut watcher) = self.watcher.lock() {
            if let Some(handle) = watcher.take() {
                handle.abort();
            }
        }
    }
}

/// Fetch chain id and a native balance snapshot for `account`, concurrently,
/// and install them as the session state.
async fn populate(
    transport: &Arc<dyn ChainTransport>,
    shared: &Arc<ConnShared>,
    account: Address,
) -> Result<()> {
    let (chain_id, balance) = tokio::try_join!(
        transport.get_chain_id(),
        transport.get_native_balance(account)
    )?;
    {
        let mut state = shared.state.lock().expect("connection lock poisoned");
        state.account = Some(account);
        state.chain_id = Some(chain_id);
        state.native_balance = Some(balance);
        state.connected = true;
        state.wrong_network = chain_id != shared.expected_chain_id;
    }
    shared.publish();
    Ok(())
}
