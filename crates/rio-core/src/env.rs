//! Environment overrides for `RioConfig` and logging.
//!
//! ```ignore
//! use rio_core::env::{env_get, env_flag};
//!
//! let capacity: u32 = env_get("RIO_CQ_CAPACITY", 1024);
//! let flush = env_flag("RIO_FLUSH_EPRINT", false);
//! ```

use std::str::FromStr;
use std::time::Duration;

/// Parse `key` as `T`, falling back to `default` when unset or malformed.
#[inline]
pub fn env_get<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Boolean switch. "1", "true", "yes", "on" (any case) enable it.
/// Any other set value disables it; unset returns `default`.
#[inline]
pub fn env_flag(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(val) => matches!(
            val.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        Err(_) => default,
    }
}

/// Millisecond duration, e.g. `RIO_WAIT_TIMEOUT_MS=250`.
#[inline]
pub fn env_millis(key: &str, default_ms: u64) -> Duration {
    Duration::from_millis(env_get(key, default_ms))
}
