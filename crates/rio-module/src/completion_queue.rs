//! `CompletionQueue` — owning handle for a RIO completion queue.
//!
//! Cloning shares the queue. The platform queue is closed when the last
//! clone drops; request queues hold clones, so a completion queue always
//! outlives the request queues bound to it. The waitable, if any, is held
//! by the queue and released after the close.
//!
//! # Notification cycle
//!
//! ```text
//!   drain ── empty? ──▶ notify (arm) ──▶ wait ──▶ drain ──▶ ...
//! ```
//!
//! `notify` arms one signal. The signal fires on the next completion, or
//! at once if completions are already queued. After it fires, the queue
//! must be re-armed before the next wait. `poll` runs the whole cycle and
//! keeps track of whether the queue is armed.
//!
//! # Corruption
//!
//! Once the platform reports `RIO_CORRUPT_CQ` the handle latches: every
//! later dequeue, notify or poll returns `RioError::CorruptQueue` without
//! touching the platform. The only remaining operation is dropping it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rio_core::entry::{NotificationCompletion, RawCq, RioResult, RIO_CORRUPT_CQ};
use rio_core::error::{status, Result, RioError};
use rio_core::extension::RioExtension;
use rio_core::waitable::Waitable;
use rio_core::{rio_debug, rio_error, rio_trace};

struct CqInner<X: RioExtension> {
    rio: Arc<X>,
    raw: RawCq,
    capacity: u32,
    event: Option<Arc<dyn Waitable>>,
    corrupt: AtomicBool,
    armed: AtomicBool,
}

impl<X: RioExtension> Drop for CqInner<X> {
    fn drop(&mut self) {
        self.rio.close_completion_queue(self.raw);
        rio_debug!("completion queue {:#x} closed", self.raw.0);
        // `event` is released after the close.
    }
}

pub struct CompletionQueue<X: RioExtension> {
    inner: Arc<CqInner<X>>,
}

impl<X: RioExtension> Clone for CompletionQueue<X> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<X: RioExtension> std::fmt::Debug for CompletionQueue<X> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionQueue")
            .field("raw", &self.inner.raw)
            .field("capacity", &self.inner.capacity)
            .field("event", &self.inner.event.is_some())
            .field("corrupt", &self.is_corrupt())
            .finish()
    }
}

impl<X: RioExtension> CompletionQueue<X> {
    /// Create a queue of `capacity` entries.
    ///
    /// With a waitable, the queue uses event notification with
    /// reset-on-notify. Without one it can only be polled by `dequeue`.
    pub fn create(rio: Arc<X>, capacity: u32, event: Option<Arc<dyn Waitable>>) -> Result<Self> {
        if capacity == 0 {
            return Err(RioError::InvalidArgument("completion queue capacity must be > 0"));
        }
        let notification = event
            .as_ref()
            .map(|e| NotificationCompletion::event(e.raw_event(), true));
        let raw = rio.create_completion_queue(capacity, notification.as_ref());
        if raw.is_invalid() {
            let code = rio.last_error();
            rio_error!("completion queue creation failed: status {}", code);
            return Err(RioError::CreateCompletionQueue(code));
        }
        rio_debug!(
            "completion queue {:#x} created, capacity {}, event {}",
            raw.0,
            capacity,
            event.is_some()
        );
        Ok(Self {
            inner: Arc::new(CqInner {
                rio,
                raw,
                capacity,
                event,
                corrupt: AtomicBool::new(false),
                armed: AtomicBool::new(false),
            }),
        })
    }

    #[inline]
    pub fn raw(&self) -> RawCq {
        self.inner.raw
    }

    #[inline]
    pub fn capacity(&self) -> u32 {
        self.inner.capacity
    }

    #[inline]
    pub fn rio(&self) -> &Arc<X> {
        &self.inner.rio
    }

    pub fn has_event(&self) -> bool {
        self.inner.event.is_some()
    }

    pub fn is_corrupt(&self) -> bool {
        self.inner.corrupt.load(Ordering::Acquire)
    }

    pub fn is_armed(&self) -> bool {
        self.inner.armed.load(Ordering::Acquire)
    }

    fn check_corrupt(&self) -> Result<()> {
        if self.is_corrupt() {
            return Err(RioError::CorruptQueue);
        }
        Ok(())
    }

    fn event(&self) -> Result<&Arc<dyn Waitable>> {
        self.inner
            .event
            .as_ref()
            .ok_or(RioError::InvalidArgument("completion queue has no waitable"))
    }

    /// Arm the waitable for the next completion.
    ///
    /// Arming twice without an intervening signal is a protocol error
    /// (`Notify(WSAEALREADY)`).
    pub fn notify(&self) -> Result<()> {
        self.check_corrupt()?;
        self.event()?;
        let code = self.inner.rio.notify(self.inner.raw);
        if code != 0 {
            rio_error!("notify on cq {:#x} failed: status {}", self.inner.raw.0, code);
            return Err(RioError::Notify(code));
        }
        self.inner.armed.store(true, Ordering::Release);
        Ok(())
    }

    /// Block on the waitable. `Ok(true)` means a signal was consumed and
    /// the queue must be re-armed before the next wait.
    pub fn wait(&self, timeout: Option<Duration>) -> Result<bool> {
        let signalled = self.event()?.wait(timeout)?;
        if signalled {
            self.inner.armed.store(false, Ordering::Release);
        }
        Ok(signalled)
    }

    /// Move available completions into `out`. Never blocks.
    ///
    /// Returns the number written; zero means nothing was available.
    pub fn dequeue(&self, out: &mut [RioResult]) -> Result<usize> {
        self.check_corrupt()?;
        if out.is_empty() {
            return Ok(0);
        }
        let limit = out.len().min(u32::MAX as usize - 1);
        let n = self.inner.rio.dequeue_completion(self.inner.raw, &mut out[..limit]);
        if n == RIO_CORRUPT_CQ {
            self.inner.corrupt.store(true, Ordering::Release);
            rio_error!("completion queue {:#x} is corrupt", self.inner.raw.0);
            return Err(RioError::CorruptQueue);
        }
        if n > 0 {
            rio_trace!("cq {:#x}: dequeued {}", self.inner.raw.0, n);
        }
        Ok(n as usize)
    }

    /// Drain, and if nothing is queued, arm and wait, then drain again.
    /// Returns the number of records written to `out`.
    ///
    /// A signal with nothing behind it (left over from records a plain
    /// `dequeue` already took) re-arms and keeps waiting, so `Ok(0)` is only
    /// returned once `timeout` has run out. `None` waits for a completion.
    pub fn poll(&self, out: &mut [RioResult], timeout: Option<Duration>) -> Result<usize> {
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        loop {
            let n = self.dequeue(out)?;
            if n > 0 {
                return Ok(n);
            }
            self.event()?;
            self.arm()?;

            let remaining = deadline.map(|d| d.saturating_duration_since(Instant::now()));
            self.wait(remaining)?;
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return self.dequeue(out);
            }
        }
    }

    fn arm(&self) -> Result<()> {
        if self.is_armed() {
            return Ok(());
        }
        match self.inner.rio.notify(self.inner.raw) {
            // Already armed through another clone's notify.
            0 | status::WSAEALREADY => {
                self.inner.armed.store(true, Ordering::Release);
                Ok(())
            }
            code => {
                rio_error!("notify on cq {:#x} failed: status {}", self.inner.raw.0, code);
                Err(RioError::Notify(code))
            }
        }
    }

    /// Dequeue repeatedly in `batch`-sized steps until the queue is empty.
    pub fn drain_all(&self, batch: usize) -> Result<Vec<RioResult>> {
        let mut buf = vec![RioResult::default(); batch.max(1)];
        let mut all = Vec::new();
        loop {
            let n = self.dequeue(&mut buf)?;
            if n == 0 {
                return Ok(all);
            }
            all.extend_from_slice(&buf[..n]);
        }
    }
}
