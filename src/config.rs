//! Engine configuration. Injected explicitly into `Engine::new`; nothing
//! in the crate reads ambient global state.

use std::time::Duration;

use crate::refund::CancellationPolicy;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Bound on waiting for a trip's capacity lock. On expiry the caller
    /// gets a recoverable `LockTimeout` and may retry.
    pub lock_wait: Duration,
    /// Bound on waiting for a concurrent settlement attempt on the same
    /// idempotency key to publish its record.
    pub settlement_wait: Duration,
    pub default_currency: String,
    pub cancellation_policy: CancellationPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lock_wait: Duration::from_millis(500),
            settlement_wait: Duration::from_secs(5),
            default_currency: "USD".to_string(),
            cancellation_policy: CancellationPolicy::default(),
        }
    }
}
