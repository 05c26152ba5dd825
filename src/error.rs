//! # Error Taxonomy
//!
//! Every failure the SDK can produce is one of the variants below, so callers
//! can pattern-match severity instead of inspecting error strings:
//!
//! - `NoProviderFound` / `UserRejected` are fatal to `connect()` and never
//!   retried automatically.
//! - `NetworkSwitchFailed` is a warning; operation continues on the wrong chain.
//! - `QueryFailed` fails a whole backfill (no partial data) but is scoped to a
//!   single address during multi-token balance polling.
//! - `SubscriptionError` means the live feed dropped; the store keeps
//!   `is_listening = true` while reporting `connected = false`.
//!
//! Nothing in this crate is fatal to the process. Components below the store
//! propagate `MonitorError` with `?`; the store and balance cache convert
//! failures into state-visible fields (`last_error`, per-address error,
//! `connected`) that the UI observes through snapshots.

use thiserror::Error;

/// Unified error type for all monitor operations.
#[derive(Debug, Error, Clone)]
pub enum MonitorError {
    /// No chain transport is reachable at all. Fatal to `connect()`.
    #[error("No provider found: no chain transport is available")]
    NoProviderFound,

    /// The user declined a connection or permission prompt.
    #[error("Connection request was rejected by the user")]
    UserRejected,

    /// A chain switch or chain add request failed or was rejected.
    #[error("Failed to switch to chain {chain_id}: {reason}")]
    NetworkSwitchFailed { chain_id: u64, reason: String },

    /// A range query, block lookup, balance read or metadata call failed.
    #[error("Query failed ({context}): {reason}")]
    QueryFailed { context: String, reason: String },

    /// A live listener failed to attach or was dropped by the transport.
    #[error("Subscription error: {reason}")]
    SubscriptionError { reason: String },
}

impl MonitorError {
    /// Shorthand for wrapping a transport-level failure with its call site.
    pub fn query(context: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        MonitorError::QueryFailed {
            context: context.into(),
            reason: reason.to_string(),
        }
    }

    /// Shorthand for subscription attach/drop failures.
    pub fn subscription(reason: impl std::fmt::Display) -> Self {
        MonitorError::SubscriptionError {
            reason: reason.to_string(),
        }
    }

    /// True for failures that should never trigger an automatic retry.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            MonitorError::NoProviderFound | MonitorError::UserRejected
        )
    }
}

pub type Result<T> = std::result::Result<T, MonitorError>;
