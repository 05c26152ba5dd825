//! Core data model: transfer events, filters and balance entries.
//!
//! `TransferEvent` is immutable once created; the only correct deduplication
//! key is [`EventId`], the `(transaction_hash, log_index)` pair. Amounts are
//! carried as `U256` end to end and formatted by integer arithmetic only —
//! never through a float.

use chrono::Utc;
use ethers::types::{Address, H256, U256};
use serde::{Deserialize, Serialize};

use crate::transport::RawTransferLog;

/// Stable identity of an observed transfer log.
///
/// `(transaction_hash, log_index)` uniquely identifies a log entry on chain.
/// Block number is NOT part of the identity; the same event delivered via
/// backfill and via a live push carries the same `EventId`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId {
    pub transaction_hash: H256,
    pub log_index: u64,
}

impl EventId {
    pub fn new(transaction_hash: H256, log_index: u64) -> Self {
        Self {
            transaction_hash,
            log_index,
        }
    }
}

/// One observed token transfer, fully formatted for consumption.
///
/// Created by the backfill fetcher (batch) or the live listener (singly),
/// owned by the reconciliation store afterwards, and never mutated. Evicted
/// only by capacity truncation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferEvent {
    pub id: EventId,
    pub from: Address,
    pub to: Address,
    /// Integer amount exactly as transferred on chain.
    pub raw_amount: U256,
    /// `raw_amount` scaled by `token_decimals`. Derived, display-only.
    pub formatted_amount: String,
    pub transaction_hash: H256,
    pub block_number: u64,
    /// Wall-clock capture time in milliseconds. For historical events this is
    /// the containing block's timestamp; for live events the processing time.
    /// Display-only, never an ordering key.
    pub observed_at_ms: i64,
    pub token_symbol: String,
    pub token_decimals: u8,
}

impl TransferEvent {
    /// Build an event from a raw log plus resolved token metadata.
    pub fn from_raw(raw: &RawTransferLog, token: &TokenInfo, observed_at_ms: i64) -> Self {
        Self {
            id: EventId::new(raw.transaction_hash, raw.log_index),
            from: raw.from,
            to: raw.to,
            raw_amount: raw.value,
            formatted_amount: format_token_amount(raw.value, token.decimals),
            transaction_hash: raw.transaction_hash,
            block_number: raw.block_number,
            observed_at_ms,
            token_symbol: token.symbol.clone(),
            token_decimals: token.decimals,
        }
    }

    /// Live-path constructor: stamps wall-clock capture time.
    pub fn from_raw_now(raw: &RawTransferLog, token: &TokenInfo) -> Self {
        Self::from_raw(raw, token, Utc::now().timestamp_millis())
    }

    /// Zero-address sender denotes a mint.
    pub fn is_mint(&self) -> bool {
        self.from == Address::zero()
    }

    /// Zero-address recipient denotes a burn.
    pub fn is_burn(&self) -> bool {
        self.to == Address::zero()
    }

    /// Canonical chain-ordering key: `(block_number, log_index)`.
    ///
    /// Arrival order of live vs backfilled events for the same block is not
    /// deterministic across runs, so the store orders by this key instead.
    pub fn order_key(&self) -> (u64, u64) {
        (self.block_number, self.id.log_index)
    }
}

/// Address filter applied identically to range queries and live notifications.
///
/// Exactly one mode is active. `Either` cannot be expressed as a single
/// composed topic filter: it requires two underlying range queries (sent and
/// received) whose results are unioned and deduplicated by [`EventId`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventFilter {
    /// No address restriction.
    All,
    /// Only transfers sent by the address.
    From(Address),
    /// Only transfers received by the address.
    To(Address),
    /// Transfers where the address is either endpoint.
    Either(Address),
}

impl EventFilter {
    /// Synchronous membership test, applied at the listener before any side
    /// effect. A log failing this test must produce nothing observable.
    pub fn matches(&self, raw: &RawTransferLog) -> bool {
        match *self {
            EventFilter::All => true,
            EventFilter::From(a) => raw.from == a,
            EventFilter::To(a) => raw.to == a,
            EventFilter::Either(a) => raw.from == a || raw.to == a,
        }
    }
}

/// Resolved token metadata, cached per contract address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenInfo {
    pub symbol: String,
    pub decimals: u8,
}

impl TokenInfo {
    /// Fallback used when a non-standard token omits the optional interface
    /// methods: `decimals() = 18`, `symbol() = "Unknown"`.
    pub fn fallback() -> Self {
        Self {
            symbol: "Unknown".to_string(),
            decimals: 18,
        }
    }
}

/// One polled token balance for the connected account.
///
/// Created on first poll, refreshed in place on each tick, reset to the
/// initial state when the owning account disconnects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenBalanceEntry {
    pub address: Address,
    pub raw_balance: U256,
    pub formatted_balance: String,
    pub token_info: Option<TokenInfo>,
    pub is_loading: bool,
    pub last_error: Option<String>,
}

impl TokenBalanceEntry {
    /// Initial/zero state for a token address.
    pub fn empty(address: Address) -> Self {
        Self {
            address,
            raw_balance: U256::zero(),
            formatted_balance: "0".to_string(),
            token_info: None,
            is_loading: false,
            last_error: None,
        }
    }
}

/// Point-in-time view of the reconciliation store, cheap to clone and safe to
/// hand to a rendering layer.
#[derive(Debug, Clone, Serialize)]
pub struct StoreSnapshot {
    /// Reconciled log, newest first by `(block_number, log_index)`.
    pub events: Vec<TransferEvent>,
    /// We intend to receive live events.
    pub is_listening: bool,
    /// A backfill or refresh is in flight.
    pub is_loading: bool,
    pub last_error: Option<String>,
    /// We are currently receiving from an attached subscription. Can be false
    /// while `is_listening` is true if the transport dropped the feed.
    pub connected: bool,
}

impl StoreSnapshot {
    pub fn empty() -> Self {
        Self {
            events: Vec::new(),
            is_listening: false,
            is_loading: false,
            last_error: None,
            connected: false,
        }
    }
}

/// Parameters for `wallet_addEthereumChain` on the well-known target network.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainParams {
    pub chain_id: u64,
    pub chain_name: String,
    pub rpc_urls: Vec<String>,
    pub native_currency_symbol: String,
    pub native_currency_decimals: u8,
    pub block_explorer_urls: Vec<String>,
}

/// Format an integer token amount by decimal scaling, pure integer math.
///
/// Trailing fractional zeros are trimmed; an exact multiple formats without a
/// decimal point.
pub fn format_token_amount(raw: U256, decimals: u8) -> String {
    if decimals == 0 {
        return raw.to_string();
    }
    let base = U256::from(10u64).pow(U256::from(decimals));
    let whole = raw / base;
    let frac = raw % base;
    if frac.is_zero() {
        return whole.to_string();
    }
    let frac_str = format!("{:0>width$}", frac.to_string(), width = decimals as usize);
    let trimmed = frac_str.trim_end_matches('0');
    format!("{}.{}", whole, trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(from: Address, to: Address) -> RawTransferLog {
        RawTransferLog {
            address: Address::repeat_byte(0xaa),
            from,
            to,
            value: U256::from(1u64),
            transaction_hash: H256::repeat_byte(0x11),
            log_index: 0,
            block_number: 100,
        }
    }

    #[test]
    fn filter_modes() {
        let a = Address::repeat_byte(1);
        let b = Address::repeat_byte(2);
        let c = Address::repeat_byte(3);

        assert!(EventFilter::All.matches(&raw(b, c)));
        assert!(EventFilter::From(a).matches(&raw(a, b)));
        assert!(!EventFilter::From(a).matches(&raw(b, a)));
        assert!(EventFilter::To(a).matches(&raw(b, a)));
        assert!(!EventFilter::To(a).matches(&raw(a, b)));
        assert!(EventFilter::Either(a).matches(&raw(a, b)));
        assert!(EventFilter::Either(a).matches(&raw(b, a)));
        assert!(!EventFilter::Either(a).matches(&raw(b, c)));
    }

    #[test]
    fn filter_self_transfer_matches_once() {
        // from == to == a matches Either exactly like any other match; dedup
        // by EventId is what guarantees it appears once in the store.
        let a = Address::repeat_byte(1);
        assert!(EventFilter::Either(a).matches(&raw(a, a)));
    }

    #[test]
    fn format_whole_amounts() {
        let one_token = U256::from(10u64).pow(U256::from(18u8));
        assert_eq!(format_token_amount(one_token, 18), "1");
        assert_eq!(format_token_amount(U256::zero(), 18), "0");
        assert_eq!(format_token_amount(U256::from(42u64), 0), "42");
    }

    #[test]
    fn format_fractional_amounts() {
        // 1.5 tokens at 18 decimals
        let amount = U256::from(15u64) * U256::from(10u64).pow(U256::from(17u8));
        assert_eq!(format_token_amount(amount, 18), "1.5");
        // One base unit at 6 decimals
        assert_eq!(format_token_amount(U256::from(1u64), 6), "0.000001");
        // Sub-unit with leading zeros preserved
        assert_eq!(format_token_amount(U256::from(1u64), 18), "0.000000000000000001");
    }

    #[test]
    fn mint_and_burn_sentinels() {
        let token = TokenInfo {
            symbol: "TST".into(),
            decimals: 18,
        };
        let mint = TransferEvent::from_raw(&raw(Address::zero(), Address::repeat_byte(2)), &token, 0);
        assert!(mint.is_mint());
        assert!(!mint.is_burn());
        let burn = TransferEvent::from_raw(&raw(Address::repeat_byte(2), Address::zero()), &token, 0);
        assert!(burn.is_burn());
    }

    #[test]
    fn event_id_ignores_block_number() {
        let mut a = raw(Address::repeat_byte(1), Address::repeat_byte(2));
        let mut b = a.clone();
        a.block_number = 100;
        b.block_number = 101;
        let token = TokenInfo::fallback();
        let ea = TransferEvent::from_raw(&a, &token, 0);
        let eb = TransferEvent::from_raw(&b, &token, 0);
        assert_eq!(ea.id, eb.id);
    }
}
