//! # Transfer Monitor SDK
//!
//! A Rust library for live ERC20 transfer ingestion: it subscribes to a token
//! contract's `Transfer` event stream, merges it with a backfilled window of
//! historical events, deduplicates, filters, bounds memory, and exposes a
//! continuously updating ordered log plus a companion balance cache.
//!
//! ## Overview
//!
//! Two partially overlapping sources — historical range queries and live push
//! notifications — are reconciled into one consistent feed:
//!
//! - **Backfill**: one-shot retrieval of past events over a bounded block window
//! - **Live subscription**: push-based feed of newly observed events
//! - **Reconciliation**: deduplicated, ordered, capacity-bounded merge of both
//! - **Balances**: interval polling of token balances for the connected account
//!
//! ## Architecture
//!
//! ### Connection Layer
//! The [`connection::ConnectionSupervisor`] owns the injected chain-transport
//! handle, the wallet session and its change notifications. Everything below
//! shares the handle read-only.
//!
//! ### Ingestion Layer
//! [`backfill::HistoricalBackfillFetcher`] retrieves and orders historical
//! events; [`live::LiveSubscriptionListener`] attaches the push subscription
//! and applies the address filter before anything else observes a log.
//!
//! ### Reconciliation Layer
//! [`event_store::EventReconciliationStore`] merges both streams into a
//! duplicate-free, newest-first, bounded log with loading/error/connection
//! status, exposed as snapshots plus change notifications.
//!
//! ### Balance Layer
//! [`balance_cache::BalanceCache`] polls one or many token balances
//! concurrently on an interval, sharing the supervisor's session lifecycle.
//!
//! No component holds global state: the transport is an explicitly
//! constructed [`transport::ChainTransport`] object passed down by reference,
//! so tests substitute a fake without touching process-wide state.

// Core Types
/// Transfer events, filters, balances and snapshots
pub mod types;
/// Error taxonomy shared by all components
pub mod error;

// Transport
/// Injected chain-transport capability (trait)
pub mod transport;
/// Production transport over an ethers WebSocket provider
pub mod ethers_transport;
/// Smart contract ABIs (read-only)
pub mod contracts;

// Connection Layer
/// Wallet session supervision and change notifications
pub mod connection;

// Ingestion Layer
/// Token metadata resolution with per-address caching
pub mod token_metadata;
/// Historical backfill over a bounded block window
pub mod backfill;
/// Live push-style subscription listener
pub mod live;

// Reconciliation & Balances
/// Ordered, bounded, duplicate-free event log (the core state machine)
pub mod event_store;
/// Interval-polled token balance cache
pub mod balance_cache;

// Settings & Configuration
/// Configuration management
pub mod settings;

// Re-exports for convenience
pub use balance_cache::BalanceCache;
pub use connection::{ConnectionSupervisor, SupervisorEvent};
pub use error::MonitorError;
pub use ethers_transport::EthersTransport;
pub use event_store::{EventReconciliationStore, MonitorConfig};
pub use settings::Settings;
pub use token_metadata::TokenMetadataResolver;
pub use transport::{ChainTransport, RawTransferLog, WalletEvent};
pub use types::{EventFilter, EventId, StoreSnapshot, TokenBalanceEntry, TokenInfo, TransferEvent};
