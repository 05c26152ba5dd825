//! # Event Reconciliation Store
//!
//! The core state machine: merges the historical backfill and the live
//! subscription into one ordered, capacity-bounded, duplicate-free log and
//! exposes it as a snapshot plus change notifications.
//!
//! States: `idle -> loading -> listening -> stopped`, with an error sub-state
//! reachable from `loading` or `listening` that never wipes already-held
//! events — errors are surfaced alongside stale-but-valid data.
//!
//! Ordering: events are kept newest-first by the canonical
//! `(block_number, log_index)` key. Arrival order of a backfilled event vs a
//! live notification for the same block is not deterministic across runs, so
//! the chain-ordering key is authoritative and insertion is positional, not a
//! blind prepend.
//!
//! The merge step (duplicate check, positional insert, truncate) runs under a
//! synchronous lock with no suspension point in between, so two
//! near-simultaneous live arrivals are both merged without a lost update.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use ethers::types::Address;
use log::{debug, info, warn};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::backfill::HistoricalBackfillFetcher;
use crate::connection::{ConnectionSupervisor, SupervisorEvent};
use crate::live::{ListenerSignal, LiveSubscriptionListener};
use crate::settings::Settings;
use crate::token_metadata::TokenMetadataResolver;
use crate::transport::ChainTransport;
use crate::types::{EventFilter, StoreSnapshot, TransferEvent};

/// Per-store configuration, usually derived from [`Settings`].
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Token contract to monitor.
    pub contract: Address,
    /// Address restriction applied to backfill and live paths alike.
    pub filter: EventFilter,
    /// Cap on retained events. Eviction drops the oldest by current order.
    pub max_events: usize,
    /// Begin listening immediately on construction.
    pub auto_start: bool,
    /// Skip the backfill entirely if false.
    pub include_historical_events: bool,
    /// Backfill window size in blocks.
    pub historical_block_range: u64,
}

impl MonitorConfig {
    pub fn from_settings(contract: Address, filter: EventFilter, settings: &Settings) -> Self {
        Self {
            contract,
            filter,
            max_events: settings.monitor.max_events,
            auto_start: settings.monitor.auto_start,
            include_historical_events: settings.monitor.include_historical_events,
            historical_block_range: settings.monitor.historical_block_range,
        }
    }
}

struct StoreState {
    events: Vec<TransferEvent>,
    is_listening: bool,
    is_loading: bool,
    last_error: Option<String>,
    connected: bool,
}

impl StoreState {
    fn new() -> Self {
        Self {
            events: Vec::new(),
            is_listening: false,
            is_loading: false,
            last_error: None,
            connected: false,
        }
    }

    fn snapshot(&self) -> StoreSnapshot {
        StoreSnapshot {
            events: self.events.clone(),
            is_listening: self.is_listening,
            is_loading: self.is_loading,
            last_error: self.last_error.clone(),
            connected: self.connected,
        }
    }

    /// Merge one live event. Returns false when the id is already present
    /// (idempotent re-delivery from the transport must not create duplicates
    /// or reorder existing entries).
    fn merge_live(&mut self, event: TransferEvent, max_events: usize) -> bool {
        if self.events.iter().any(|e| e.id == event.id) {
            return false;
        }
        let key = event.order_key();
        let pos = self
            .events
            .iter()
            .position(|e| e.order_key() < key)
            .unwrap_or(self.events.len());
        self.events.insert(pos, event);
        // Capacity eviction is FIFO by current order: the oldest entries at
        // the tail fall off first.
        self.events.truncate(max_events);
        true
    }
}

struct StoreShared {
    state: Mutex<StoreState>,
    changes: watch::Sender<StoreSnapshot>,
    /// Bumped by stop/teardown; async work checks it before applying results
    /// so a backfill that settles after `stop_listening()` is discarded.
    generation: AtomicU64,
}

impl StoreShared {
    fn publish(&self) {
        let snapshot = {
            let state = self.state.lock().expect("store lock poisoned");
            state.snapshot()
        };
        // Receivers may all be gone; that is fine.
        let _ = self.changes.send(snapshot);
    }
}

/// Reconciles backfilled and live Transfer events for one contract.
pub struct EventReconciliationStore {
    config: MonitorConfig,
    resolver: Arc<TokenMetadataResolver>,
    backfill: HistoricalBackfillFetcher,
    listener: LiveSubscriptionListener,
    shared: Arc<StoreShared>,
    watchers: Mutex<Vec<JoinHandle<()>>>,
}

impl EventReconciliationStore {
    pub fn new(
        transport: Arc<dyn ChainTransport>,
        resolver: Arc<TokenMetadataResolver>,
        config: MonitorConfig,
    ) -> Arc<Self> {
        let (changes, _) = watch::channel(StoreSnapshot::empty());
        let store = Arc::new(Self {
            config,
            resolver,
            backfill: HistoricalBackfillFetcher::new(transport.clone()),
            listener: LiveSubscriptionListener::new(transport),
            shared: Arc::new(StoreShared {
                state: Mutex::new(StoreState::new()),
                changes,
                generation: AtomicU64::new(0),
            }),
            watchers: Mutex::new(Vec::new()),
        });
        if store.config.auto_start {
            let auto = Arc::clone(&store);
            let handle = tokio::spawn(async move {
                auto.start_listening().await;
            });
            store.watchers.lock().expect("watcher lock poisoned").push(handle);
        }
        store
    }

    /// Current state, cheap to hand to a rendering layer.
    pub fn snapshot(&self) -> StoreSnapshot {
        self.shared
            .state
            .lock()
            .expect("store lock poisoned")
            .snapshot()
    }

    /// Change notifications. The receiver always holds the latest snapshot.
    pub fn subscribe_changes(&self) -> watch::Receiver<StoreSnapshot> {
        self.shared.changes.subscribe()
    }

    /// Resolve metadata, seed from the backfill and attach the live listener.
    ///
    /// On backfill failure the store enters the error sub-state: `last_error`
    /// is set, previously held events are preserved and `connected` is false.
    /// On listener-attach failure `is_listening` stays true (we intend to
    /// listen) while `connected` reports that we are not receiving.
    pub async fn start_listening(&self) {
        let gen = {
            let mut state = self.shared.state.lock().expect("store lock poisoned");
            if state.is_listening {
                debug!("Store: start_listening ignored, already listening");
                return;
            }
            state.is_loading = true;
            state.last_error = None;
            self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1
        };
        self.shared.publish();

        let token = self.resolver.resolve(self.config.contract).await;

        let seeded = if self.config.include_historical_events {
            match self
                .backfill
                .fetch(
                    self.config.contract,
                    &self.config.filter,
                    &token,
                    self.config.max_events,
                    self.config.historical_block_range,
                )
                .await
            {
                Ok(events) => Some(events),
                Err(e) => {
                    warn!("Store: backfill failed: {}", e);
                    {
                        let mut state =
                            self.shared.state.lock().expect("store lock poisoned");
                        if self.shared.generation.load(Ordering::SeqCst) == gen {
                            state.is_loading = false;
                            state.connected = false;
                            state.last_error = Some(e.to_string());
                        }
                    }
                    self.shared.publish();
                    return;
                }
            }
        } else {
            None
        };

        {
            let mut state = self.shared.state.lock().expect("store lock poisoned");
            if self.shared.generation.load(Ordering::SeqCst) != gen {
                // Stopped while the backfill was in flight: discard the result.
                debug!("Store: discarding stale backfill result");
                return;
            }
            if let Some(events) = seeded {
                state.events = events;
            }
            state.is_loading = false;
            state.is_listening = true;
        }
        self.shared.publish();

        let sink = self.make_sink(gen);
        match self
            .listener
            .attach(self.config.contract, self.config.filter, token, sink)
            .await
        {
            Ok(()) => {
                let mut state = self.shared.state.lock().expect("store lock poisoned");
                if self.shared.generation.load(Ordering::SeqCst) == gen {
                    state.connected = true;
                }
                drop(state);
                self.shared.publish();
                info!("Store: listening on {:?}", self.config.contract);
            }
            Err(e) => {
                warn!("Store: live attach failed: {}", e);
                let mut state = self.shared.state.lock().expect("store lock poisoned");
                state.connected = false;
                state.last_error = Some(e.to_string());
                drop(state);
                self.shared.publish();
            }
        }
    }

    fn make_sink(&self, gen: u64) -> crate::live::ListenerSink {
        let shared = Arc::clone(&self.shared);
        let max_events = self.config.max_events;
        Arc::new(move |signal| match signal {
            ListenerSignal::Event(event) => {
                let merged = {
                    let mut state = shared.state.lock().expect("store lock poisoned");
                    if shared.generation.load(Ordering::SeqCst) != gen || !state.is_listening {
                        return;
                    }
                    state.merge_live(event, max_events)
                };
                if merged {
                    shared.publish();
                }
            }
            ListenerSignal::Dropped(reason) => {
                {
                    let mut state = shared.state.lock().expect("store lock poisoned");
                    if shared.generation.load(Ordering::SeqCst) != gen {
                        return;
                    }
                    // We still intend to listen; we are just not receiving.
                    state.connected = false;
                    state.last_error = Some(reason);
                }
                shared.publish();
            }
        })
    }

    /// Detach the live listener. Explicitly preserves `events`: stopping is
    /// not clearing.
    pub async fn stop_listening(&self) {
        self.shared.generation.fetch_add(1, Ordering::SeqCst);
        self.listener.detach().await;
        {
            let mut state = self.shared.state.lock().expect("store lock poisoned");
            state.is_listening = false;
            state.is_loading = false;
            state.connected = false;
        }
        self.shared.publish();
        info!("Store: stopped listening on {:?}", self.config.contract);
    }

    /// Empty the log unconditionally. Independent of the listening state.
    pub fn clear_events(&self) {
        {
            let mut state = self.shared.state.lock().expect("store lock poisoned");
            state.events.clear();
        }
        self.shared.publish();
    }

    /// Re-run the backfill and replace the log wholesale with its result.
    ///
    /// This is a deliberate reset to the historical source of truth, not a
    /// merge: live-received events that are not inside the fresh backfill
    /// window are dropped. Token metadata comes from the resolver cache, so no
    /// metadata calls are re-issued.
    pub async fn refresh_events(&self) {
        let gen = self.shared.generation.load(Ordering::SeqCst);
        {
            let mut state = self.shared.state.lock().expect("store lock poisoned");
            state.is_loading = true;
        }
        self.shared.publish();

        let token = self.resolver.resolve(self.config.contract).await;
        match self
            .backfill
            .fetch(
                self.config.contract,
                &self.config.filter,
                &token,
                self.config.max_events,
                self.config.historical_block_range,
            )
            .await
        {
            Ok(events) => {
                let mut state = self.shared.state.lock().expect("store lock poisoned");
                if self.shared.generation.load(Ordering::SeqCst) == gen {
                    state.events = events;
                    state.last_error = None;
                }
                state.is_loading = false;
            }
            Err(e) => {
                warn!("Store: refresh failed: {}", e);
                let mut state = self.shared.state.lock().expect("store lock poisoned");
                state.is_loading = false;
                state.last_error = Some(e.to_string());
            }
        }
        self.shared.publish();
    }

    /// Force `stop_listening()` whenever the supervisor reports a disconnect.
    pub fn bind_supervisor(self: &Arc<Self>, supervisor: &ConnectionSupervisor) {
        let store = Arc::clone(self);
        let mut events = supervisor.subscribe_events();
        let handle = tokio::spawn(async move {
            while let Ok(event) = events.recv().await {
                if matches!(event, SupervisorEvent::Disconnected) {
                    info!("Store: supervisor disconnected, stopping listener");
                    store.stop_listening().await;
                }
            }
        });
        self.watchers
            .lock()
            .expect("watcher lock poisoned")
            .push(handle);
    }

    /// Teardown: stop listening and drop background watchers.
    pub async fn shutdown(&self) {
        self.stop_listening().await;
        let handles = {
            let mut watchers = self.watchers.lock().expect("watcher lock poisoned");
            std::mem::take(&mut *watchers)
        };
        for handle in handles {
            handle.abort();
        }
    }
}

impl Drop for EventReconciliationStore {
    fn drop(&mut self) {
        if let Ok(mut watchers) = self.watchers.lock() {
            for handle in watchers.drain(..) {
                handle.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EventId, TokenInfo};
    use ethers::types::{H256, U256};

    fn event(tx: u8, log_index: u64, block: u64) -> TransferEvent {
        TransferEvent {
            id: EventId::new(H256::repeat_byte(tx), log_index),
            from: Address::repeat_byte(1),
            to: Address::repeat_byte(2),
            raw_amount: U256::from(1u64),
            formatted_amount: "1".to_string(),
            transaction_hash: H256::repeat_byte(tx),
            block_number: block,
            observed_at_ms: 0,
            token_symbol: "TST".to_string(),
            token_decimals: 18,
        }
    }

    #[test]
    fn merge_drops_duplicate_id() {
        let mut state = StoreState::new();
        assert!(state.merge_live(event(1, 0, 100), 10));
        assert!(!state.merge_live(event(1, 0, 100), 10));
        assert_eq!(state.events.len(), 1);
    }

    #[test]
    fn merge_orders_by_canonical_key() {
        let mut state = StoreState::new();
        state.merge_live(event(1, 0, 100), 10);
        state.merge_live(event(2, 0, 102), 10);
        // Late arrival for an older block slots into position, not the front.
        state.merge_live(event(3, 0, 101), 10);
        let blocks: Vec<u64> = state.events.iter().map(|e| e.block_number).collect();
        assert_eq!(blocks, vec![102, 101, 100]);
    }

    #[test]
    fn merge_breaks_same_block_ties_by_log_index() {
        let mut state = StoreState::new();
        state.merge_live(event(1, 1, 100), 10);
        state.merge_live(event(2, 3, 100), 10);
        state.merge_live(event(3, 2, 100), 10);
        let idx: Vec<u64> = state.events.iter().map(|e| e.id.log_index).collect();
        assert_eq!(idx, vec![3, 2, 1]);
    }

    #[test]
    fn capacity_evicts_oldest() {
        let mut state = StoreState::new();
        state.merge_live(event(1, 0, 100), 2);
        state.merge_live(event(2, 0, 101), 2);
        state.merge_live(event(3, 0, 102), 2);
        assert_eq!(state.events.len(), 2);
        let blocks: Vec<u64> = state.events.iter().map(|e| e.block_number).collect();
        assert_eq!(blocks, vec![102, 101]);
    }

    #[test]
    fn duplicate_does_not_reorder() {
        let mut state = StoreState::new();
        state.merge_live(event(1, 0, 100), 10);
        state.merge_live(event(2, 0, 101), 10);
        let before: Vec<EventId> = state.events.iter().map(|e| e.id).collect();
        let mut dup = event(1, 0, 100);
        dup.observed_at_ms = 999;
        assert!(!state.merge_live(dup, 10));
        let after: Vec<EventId> = state.events.iter().map(|e| e.id).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn snapshot_reflects_state() {
        let mut state = StoreState::new();
        state.merge_live(event(1, 0, 100), 10);
        state.is_listening = true;
        let snap = state.snapshot();
        assert_eq!(snap.events.len(), 1);
        assert!(snap.is_listening);
        assert!(!snap.is_loading);
    }

    #[test]
    fn token_info_stamped_on_events() {
        let token = TokenInfo {
            symbol: "TST".into(),
            decimals: 6,
        };
        let raw = crate::transport::RawTransferLog {
            address: Address::repeat_byte(0xaa),
            from: Address::repeat_byte(1),
            to: Address::repeat_byte(2),
            value: U256::from(1_500_000u64),
            transaction_hash: H256::repeat_byte(9),
            log_index: 0,
            block_number: 5,
        };
        let ev = TransferEvent::from_raw(&raw, &token, 0);
        assert_eq!(ev.token_symbol, "TST");
        assert_eq!(ev.token_decimals, 6);
        assert_eq!(ev.formatted_amount, "1.5");
    }
}
