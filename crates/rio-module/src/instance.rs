//! `RioInstance` — the compositor that ties a provider to a config.
//!
//! The provider is a generic parameter. Swapping Winsock for the
//! emulated table changes the type, nothing else:
//!
//! ```text
//! RioInstance<X: RioExtension = WinsockRio | EmulatedRio>
//!     ├── register_buffer()              → RegisteredBuffer<X>
//!     ├── completion_queue[_with_event]() → CompletionQueue<X>
//!     └── request_queue(socket, cq)      → RequestQueue<X, S>
//! ```
//!
//! Sizes come from `RioConfig`; the lower-level `create` functions on each
//! handle remain available for anything the config does not cover.

use std::sync::Arc;
use std::time::Duration;

use rio_core::config::RioConfig;
use rio_core::entry::{RioResult, SocketContext};
use rio_core::error::Result;
use rio_core::extension::RioExtension;
use rio_core::rio_info;
use rio_core::waitable::{RioSocket, Waitable};

use crate::buffer::RegisteredBuffer;
use crate::completion_queue::CompletionQueue;
use crate::emulated::EmulatedRio;
use crate::request_queue::RequestQueue;

pub struct RioInstance<X: RioExtension> {
    rio: Arc<X>,
    config: RioConfig,
}

pub type EmulatedInstance = RioInstance<EmulatedRio>;

#[cfg(windows)]
pub type SystemInstance = RioInstance<crate::winsock::WinsockRio>;

impl<X: RioExtension> RioInstance<X> {
    /// Wrap a bound provider. Fails if `config` does not validate.
    pub fn new(rio: Arc<X>, config: RioConfig) -> Result<Self> {
        config.validate()?;
        rio_info!(
            "instance ready: cq {} recv {}x{} send {}x{} batch {}",
            config.cq_capacity,
            config.limits.max_outstanding_receive,
            config.limits.max_receive_data_buffers,
            config.limits.max_outstanding_send,
            config.limits.max_send_data_buffers,
            config.dequeue_batch
        );
        Ok(Self { rio, config })
    }

    pub fn rio(&self) -> &Arc<X> {
        &self.rio
    }

    pub fn config(&self) -> &RioConfig {
        &self.config
    }

    pub fn register_buffer(&self, len: usize) -> Result<RegisteredBuffer<X>> {
        RegisteredBuffer::allocate(Arc::clone(&self.rio), len)
    }

    /// A polled completion queue of `cq_capacity` entries.
    pub fn completion_queue(&self) -> Result<CompletionQueue<X>> {
        CompletionQueue::create(Arc::clone(&self.rio), self.config.cq_capacity, None)
    }

    /// A completion queue that signals `event`.
    pub fn completion_queue_with_event(
        &self,
        event: Arc<dyn Waitable>,
    ) -> Result<CompletionQueue<X>> {
        CompletionQueue::create(Arc::clone(&self.rio), self.config.cq_capacity, Some(event))
    }

    /// A request queue with the configured limits.
    pub fn request_queue<S: RioSocket>(
        &self,
        socket: S,
        cq: &CompletionQueue<X>,
        context: SocketContext,
    ) -> Result<RequestQueue<X, S>> {
        RequestQueue::create(socket, cq, context, self.config.limits)
    }

    /// A result buffer of `dequeue_batch` records.
    pub fn completion_buffer(&self) -> Vec<RioResult> {
        vec![RioResult::default(); self.config.dequeue_batch]
    }

    pub fn wait_timeout(&self) -> Duration {
        self.config.wait_timeout
    }
}

impl RioInstance<EmulatedRio> {
    /// Emulated provider, config from the environment.
    pub fn emulated() -> Result<Self> {
        Self::new(Arc::new(EmulatedRio::new()), RioConfig::from_env())
    }
}

#[cfg(windows)]
impl RioInstance<crate::winsock::WinsockRio> {
    /// The process-wide Winsock table, config from the environment.
    pub fn system() -> Result<Self> {
        let rio = crate::winsock::resolver().ensure_initialized()?;
        Self::new(rio, RioConfig::from_env())
    }
}

/// Builder for an instance with config overrides.
pub struct InstanceBuilder {
    config: RioConfig,
}

impl Default for InstanceBuilder {
    fn default() -> Self {
        Self {
            config: RioConfig::from_env(),
        }
    }
}

impl InstanceBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an explicit config instead of the environment.
    pub fn config(mut self, config: RioConfig) -> Self {
        self.config = config;
        self
    }

    pub fn cq_capacity(mut self, n: u32) -> Self {
        self.config = self.config.cq_capacity(n);
        self
    }

    pub fn max_outstanding_receive(mut self, n: u32) -> Self {
        self.config = self.config.max_outstanding_receive(n);
        self
    }

    pub fn max_outstanding_send(mut self, n: u32) -> Self {
        self.config = self.config.max_outstanding_send(n);
        self
    }

    pub fn max_receive_data_buffers(mut self, n: u32) -> Self {
        self.config = self.config.max_receive_data_buffers(n);
        self
    }

    pub fn max_send_data_buffers(mut self, n: u32) -> Self {
        self.config = self.config.max_send_data_buffers(n);
        self
    }

    pub fn dequeue_batch(mut self, n: usize) -> Self {
        self.config = self.config.dequeue_batch(n);
        self
    }

    pub fn wait_timeout(mut self, d: Duration) -> Self {
        self.config = self.config.wait_timeout(d);
        self
    }

    /// Build on an already bound provider.
    pub fn build_with<X: RioExtension>(self, rio: Arc<X>) -> Result<RioInstance<X>> {
        RioInstance::new(rio, self.config)
    }

    pub fn build_emulated(self) -> Result<EmulatedInstance> {
        self.build_with(Arc::new(EmulatedRio::new()))
    }

    #[cfg(windows)]
    pub fn build_system(self) -> Result<SystemInstance> {
        let rio = crate::winsock::resolver().ensure_initialized()?;
        self.build_with(rio)
    }
}
