//! Wakeup and socket abstractions consumed by the core.
//!
//! The core never creates either object as part of its protocol; it only
//! stores references to them for as long as a queue needs them.
//!
//! # Implementors
//!
//! - `WaitEvent` (rio-module): eventfd on Unix, Win32 event on Windows.
//! - `RegisteredSocket` (Windows) / `EmulatedSocket` (emulated provider).

use std::time::Duration;

use crate::entry::{RawEvent, RawSocket};
use crate::error::Result;

/// An auto-reset synchronization object a completion queue signals.
///
/// **Contract:**
/// - A signal means "at least one completion may be available".
/// - `wait()` consumes the signal. A second wait without a new signal
///   blocks until timeout.
pub trait Waitable: Send + Sync {
    /// The native handle passed to the platform.
    fn raw_event(&self) -> RawEvent;

    /// Block until signalled or `timeout` elapses (`None` = forever).
    ///
    /// Returns `Ok(true)` if a signal was consumed, `Ok(false)` on timeout.
    fn wait(&self, timeout: Option<Duration>) -> Result<bool>;
}

/// A socket eligible for a request queue.
pub trait RioSocket: Send + Sync {
    fn raw_socket(&self) -> RawSocket;
}
