//! Token metadata resolution with a per-address, process-lifetime cache.

use std::sync::Arc;

use dashmap::DashMap;
use ethers::types::Address;
use log::{debug, warn};

use crate::transport::ChainTransport;
use crate::types::TokenInfo;

/// Resolves a token contract to `{symbol, decimals}`.
///
/// `symbol()` and `decimals()` are optional in the ERC20 standard, so the two
/// calls are issued independently and each failure falls back on its own
/// (`decimals = 18`, `symbol = "Unknown"`) instead of failing the resolution.
/// Results are cached for the lifetime of the resolver; a cache hit
/// short-circuits both calls.
pub struct TokenMetadataResolver {
    transport: Arc<dyn ChainTransport>,
    cache: DashMap<Address, TokenInfo>,
}

impl TokenMetadataResolver {
    pub fn new(transport: Arc<dyn ChainTransport>) -> Self {
        Self {
            transport,
            cache: DashMap::new(),
        }
    }

    /// Resolve metadata for `token`. Infallible by construction: every
    /// transport failure is absorbed by a field-level fallback.
    pub async fn resolve(&self, token: Address) -> TokenInfo {
        if let Some(cached) = self.cache.get(&token) {
            debug!("TokenMetadataResolver: cache hit for {:?}", token);
            return cached.clone();
        }

        // Two independent calls, issued concurrently so their latencies
        // overlap.
        let (decimals, symbol) = tokio::join!(
            self.transport.erc20_decimals(token),
            self.transport.erc20_symbol(token)
        );

        let fallback = TokenInfo::fallback();
        let decimals = match decimals {
            Ok(d) => d,
            Err(e) => {
                warn!(
                    "TokenMetadataResolver: decimals() failed for {:?}, using {}: {}",
                    token, fallback.decimals, e
                );
                fallback.decimals
            }
        };
        let symbol = match symbol {
            Ok(s) => s,
            Err(e) => {
                warn!(
                    "TokenMetadataResolver: symbol() failed for {:?}, using {:?}: {}",
                    token, fallback.symbol, e
                );
                fallback.symbol
            }
        };

        let info = TokenInfo { symbol, decimals };
        self.cache.insert(token, info.clone());
        info
    }

    /// Cached entry without touching the transport, if any.
    pub fn cached(&self, token: Address) -> Option<TokenInfo> {
        self.cache.get(&token).map(|e| e.clone())
    }
}
