//! Live subscription listener: push-style Transfer notifications.
//!
//! The listener applies the configured [`EventFilter`] synchronously before
//! anything else happens to a notification — a filtered-out log produces no
//! observable side effect anywhere, not even a transient store entry.

use std::sync::{Arc, Mutex};

use ethers::types::Address;
use log::{debug, info, warn};
use tokio::task::JoinHandle;

use crate::error::{MonitorError, Result};
use crate::transport::ChainTransport;
use crate::types::{EventFilter, TokenInfo, TransferEvent};

/// Signal delivered to the sink installed by [`LiveSubscriptionListener::attach`].
pub enum ListenerSignal {
    /// A fully formatted event that passed the filter. `observed_at_ms` is the
    /// wall-clock time at which the listener processed the notification.
    Event(TransferEvent),
    /// The transport dropped the subscription; the feed is no longer live.
    Dropped(String),
}

/// Sink callback. Must not block; the reconciliation store's sink takes a
/// short synchronous lock and returns.
pub type ListenerSink = Arc<dyn Fn(ListenerSignal) + Send + Sync>;

struct ActiveSubscription {
    id: u64,
    drain: JoinHandle<()>,
}

/// Attaches one push-style subscription per monitored contract and fans the
/// filtered, formatted events into a sink.
pub struct LiveSubscriptionListener {
    transport: Arc<dyn ChainTransport>,
    active: Mutex<Option<ActiveSubscription>>,
}

impl LiveSubscriptionListener {
    pub fn new(transport: Arc<dyn ChainTransport>) -> Self {
        Self {
            transport,
            active: Mutex::new(None),
        }
    }

    /// Subscribe to `contract` and start dispatching matching events.
    ///
    /// Replaces any previous subscription. Attach failure surfaces as
    /// [`MonitorError::SubscriptionError`].
    pub async fn attach(
        &self,
        contract: Address,
        filter: EventFilter,
        token: TokenInfo,
        sink: ListenerSink,
    ) -> Result<()> {
        self.detach().await;

        let sub = self
            .transport
            .subscribe_transfers(contract)
            .await
            .map_err(|e| MonitorError::subscription(e))?;
        let sub_id = sub.id;
        let mut receiver = sub.receiver;

        let drain = tokio::spawn(async move {
            while let Some(raw) = receiver.recv().await {
                // Filter first: a non-matching log must leave no trace.
                if !filter.matches(&raw) {
                    debug!(
                        "LiveListener: dropped non-matching log {:?}#{}",
                        raw.transaction_hash, raw.log_index
                    );
                    continue;
                }
                let event = TransferEvent::from_raw_now(&raw, &token);
                sink(ListenerSignal::Event(event));
            }
            // Channel closed without detach: the transport dropped us.
            warn!("LiveListener: subscription stream for {:?} ended", contract);
            sink(ListenerSignal::Dropped(format!(
                "subscription for {:?} was dropped by the transport",
                contract
            )));
        });

        let mut active = self.active.lock().expect("listener lock poisoned");
        *active = Some(ActiveSubscription { id: sub_id, drain });
        info!("LiveListener: attached to {:?} (subscription {})", contract, sub_id);
        Ok(())
    }

    /// Remove exactly the current subscription. Idempotent: detaching twice,
    /// or without a prior attach, is a no-op. An attach immediately followed
    /// by a detach dispatches zero events.
    pub async fn detach(&self) {
        let taken = {
            let mut active = self.active.lock().expect("listener lock poisoned");
            active.take()
        };
        if let Some(sub) = taken {
            // Abort the drain first so no Dropped signal fires for a
            // deliberate detach.
            sub.drain.abort();
            if let Err(e) = self.transport.unsubscribe(sub.id).await {
                warn!("LiveListener: unsubscribe({}) failed: {}", sub.id, e);
            }
            info!("LiveListener: detached subscription {}", sub.id);
        }
    }

    /// True while a subscription is attached.
    pub fn is_attached(&self) -> bool {
        self.active.lock().expect("listener lock poisoned").is_some()
    }
}

impl Drop for LiveSubscriptionListener {
    fn drop(&mut self) {
        if let Ok(mut active) = self.active.lock() {
            if let Some(sub) = active.take() {
                sub.drain.abort();
            }
        }
    }
}
