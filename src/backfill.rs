//! Historical backfill over a bounded block window.
//!
//! One-shot retrieval of past Transfer logs, merged and deduplicated into the
//! newest-first shape the reconciliation store seeds from. Backfill is
//! all-or-nothing: a failed range query or block lookup fails the whole
//! operation rather than returning partial data.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use ethers::types::Address;
use futures::future::try_join_all;
use log::{debug, info};

use crate::error::Result;
use crate::transport::{ChainTransport, RawTransferLog};
use crate::types::{EventFilter, EventId, TokenInfo, TransferEvent};

pub struct HistoricalBackfillFetcher {
    transport: Arc<dyn ChainTransport>,
}

impl HistoricalBackfillFetcher {
    pub fn new(transport: Arc<dyn ChainTransport>) -> Self {
        Self { transport }
    }

    /// Fetch matching events over the last `historical_block_range` blocks,
    /// newest first, capped at `max_events`.
    ///
    /// The "either endpoint" filter mode issues two range queries (sent and
    /// received) and unions the raw results before deduplication — indexed
    /// topics compose as AND, so a single composed query cannot express OR.
    /// `observed_at_ms` is stamped from each containing block's recorded
    /// timestamp, not wall-clock capture time.
    pub async fn fetch(
        &self,
        contract: Address,
        filter: &EventFilter,
        token: &TokenInfo,
        max_events: usize,
        historical_block_range: u64,
    ) -> Result<Vec<TransferEvent>> {
        let current_block = self.transport.get_current_block_number().await?;
        let from_block = current_block.saturating_sub(historical_block_range);

        let raw = match *filter {
            EventFilter::All => {
                self.query(contract, None, None, from_block).await?
            }
            EventFilter::From(a) => {
                self.query(contract, Some(a), None, from_block).await?
            }
            EventFilter::To(a) => {
                self.query(contract, None, Some(a), from_block).await?
            }
            EventFilter::Either(a) => {
                let (sent, received) = tokio::try_join!(
                    self.query(contract, Some(a), None, from_block),
                    self.query(contract, None, Some(a), from_block)
                )?;
                let mut union = sent;
                union.extend(received);
                union
            }
        };

        debug!(
            "Backfill: {} raw logs for {:?} over blocks {}..={}",
            raw.len(),
            contract,
            from_block,
            current_block
        );

        let retained = dedupe_and_order(raw, max_events);

        // One timestamp lookup per distinct block, issued concurrently.
        let blocks: Vec<u64> = {
            let mut seen = HashSet::new();
            retained
                .iter()
                .filter(|log| seen.insert(log.block_number))
                .map(|log| log.block_number)
                .collect()
        };
        let timestamps = try_join_all(
            blocks
                .iter()
                .map(|&b| self.transport.get_block_timestamp(b)),
        )
        .await?;
        let block_times: HashMap<u64, u64> = blocks.into_iter().zip(timestamps).collect();

        let events = retained
            .iter()
            .map(|log| {
                let ts_ms = block_times
                    .get(&log.block_number)
                    .map(|&s| s as i64 * 1000)
                    .unwrap_or_default();
                TransferEvent::from_raw(log, token, ts_ms)
            })
            .collect::<Vec<_>>();

        info!(
            "Backfill: seeded {} events for {:?} (window {} blocks, cap {})",
            events.len(),
            contract,
            historical_block_range,
            max_events
        );
        Ok(events)
    }

    async fn query(
        &self,
        contract: Address,
        from_topic: Option<Address>,
        to_topic: Option<Address>,
        from_block: u64,
    ) -> Result<Vec<RawTransferLog>> {
        self.transport
            .query_transfer_logs(contract, from_topic, to_topic, from_block, None)
            .await
    }
}

/// Union/dedup step: drop duplicate `(transaction_hash, log_index)` pairs,
/// order newest-first by the canonical `(block_number, log_index)` key and
/// keep the first `max_events`.
pub(crate) fn dedupe_and_order(
    raw: Vec<RawTransferLog>,
    max_events: usize,
) -> Vec<RawTransferLog> {
    let mut seen: HashSet<EventId> = HashSet::with_capacity(raw.len());
    let mut unique: Vec<RawTransferLog> = raw
        .into_iter()
        .filter(|log| seen.insert(EventId::new(log.transaction_hash, log.log_index)))
        .collect();
    unique.sort_by(|a, b| {
        (b.block_number, b.log_index).cmp(&(a.block_number, a.log_index))
    });
    unique.truncate(max_events);
    unique
}
