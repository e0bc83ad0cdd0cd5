//! Rate Limiting Middleware using GCRA Algorithm
//!
//! Per-peer-IP limiting using tower_governor. Sensors post readings at a
//! steady rate, so the quota is expressed as a replenish interval plus burst.

use governor::middleware::StateInformationMiddleware;
use serde::Deserialize;
use std::sync::Arc;
use tower_governor::governor::GovernorConfigBuilder;
use tower_governor::key_extractor::PeerIpKeyExtractor;

/// Governor config keyed by peer IP, with X-RateLimit-* headers
pub type DefaultGovernorConfig =
    tower_governor::governor::GovernorConfig<PeerIpKeyExtractor, StateInformationMiddleware>;

/// Rate limiting configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Apply the limiter at all
    pub enabled: bool,
    /// One request is replenished every this many milliseconds
    pub replenish_ms: u64,
    /// Burst size (max requests that can be made immediately)
    pub burst_size: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            replenish_ms: 50, // 20 req/s sustained
            burst_size: 100,
        }
    }
}

/// Build the governor config, `None` when disabled or when the quota is zero.
///
/// Requires the service to be served with
/// `into_make_service_with_connect_info::<SocketAddr>()` for IP extraction.
pub fn create_governor_config(config: &RateLimitConfig) -> Option<Arc<DefaultGovernorConfig>> {
    if !config.enabled {
        return None;
    }

    GovernorConfigBuilder::default()
        .per_millisecond(config.replenish_ms)
        .burst_size(config.burst_size)
        .use_headers()
        .finish()
        .map(Arc::new)
}
