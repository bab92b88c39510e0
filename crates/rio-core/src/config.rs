//! RIO configuration.
//!
//! Library defaults with runtime environment overrides:
//!
//! ```rust,ignore
//! use rio_core::config::RioConfig;
//!
//! let config = RioConfig::from_env()
//!     .cq_capacity(4096)
//!     .max_outstanding_send(64);
//! config.validate()?;
//! ```

use std::time::Duration;

use crate::entry::QueueLimits;
use crate::env::{env_get, env_millis};
use crate::error::{Result, RioError};

pub mod defaults {
    pub const CQ_CAPACITY: u32 = 1024;
    pub const MAX_OUTSTANDING_RECEIVE: u32 = 32;
    pub const MAX_RECEIVE_DATA_BUFFERS: u32 = 1;
    pub const MAX_OUTSTANDING_SEND: u32 = 32;
    pub const MAX_SEND_DATA_BUFFERS: u32 = 1;
    pub const DEQUEUE_BATCH: usize = 128;
    pub const WAIT_TIMEOUT_MS: u64 = 1000;
}

/// Sizing for queues created through a `RioInstance`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RioConfig {
    /// Completion queue ring size
    pub cq_capacity: u32,
    /// Request queue ceilings
    pub limits: QueueLimits,
    /// Records drained per dequeue call
    pub dequeue_batch: usize,
    /// Upper bound for one wait on a completion event
    pub wait_timeout: Duration,
}

impl Default for RioConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl RioConfig {
    /// Defaults with environment overrides (all optional):
    /// - `RIO_CQ_CAPACITY`
    /// - `RIO_MAX_OUTSTANDING_RECV`
    /// - `RIO_MAX_RECV_BUFFERS`
    /// - `RIO_MAX_OUTSTANDING_SEND`
    /// - `RIO_MAX_SEND_BUFFERS`
    /// - `RIO_DEQUEUE_BATCH`
    /// - `RIO_WAIT_TIMEOUT_MS`
    pub fn from_env() -> Self {
        Self {
            cq_capacity: env_get("RIO_CQ_CAPACITY", defaults::CQ_CAPACITY),
            limits: QueueLimits {
                max_outstanding_receive: env_get(
                    "RIO_MAX_OUTSTANDING_RECV",
                    defaults::MAX_OUTSTANDING_RECEIVE,
                ),
                max_receive_data_buffers: env_get(
                    "RIO_MAX_RECV_BUFFERS",
                    defaults::MAX_RECEIVE_DATA_BUFFERS,
                ),
                max_outstanding_send: env_get(
                    "RIO_MAX_OUTSTANDING_SEND",
                    defaults::MAX_OUTSTANDING_SEND,
                ),
                max_send_data_buffers: env_get(
                    "RIO_MAX_SEND_BUFFERS",
                    defaults::MAX_SEND_DATA_BUFFERS,
                ),
            },
            dequeue_batch: env_get("RIO_DEQUEUE_BATCH", defaults::DEQUEUE_BATCH),
            wait_timeout: env_millis("RIO_WAIT_TIMEOUT_MS", defaults::WAIT_TIMEOUT_MS),
        }
    }

    /// Library defaults only, no environment.
    pub fn new() -> Self {
        Self {
            cq_capacity: defaults::CQ_CAPACITY,
            limits: QueueLimits {
                max_outstanding_receive: defaults::MAX_OUTSTANDING_RECEIVE,
                max_receive_data_buffers: defaults::MAX_RECEIVE_DATA_BUFFERS,
                max_outstanding_send: defaults::MAX_OUTSTANDING_SEND,
                max_send_data_buffers: defaults::MAX_SEND_DATA_BUFFERS,
            },
            dequeue_batch: defaults::DEQUEUE_BATCH,
            wait_timeout: Duration::from_millis(defaults::WAIT_TIMEOUT_MS),
        }
    }

    pub fn cq_capacity(mut self, n: u32) -> Self {
        self.cq_capacity = n;
        self
    }

    pub fn max_outstanding_receive(mut self, n: u32) -> Self {
        self.limits.max_outstanding_receive = n;
        self
    }

    pub fn max_receive_data_buffers(mut self, n: u32) -> Self {
        self.limits.max_receive_data_buffers = n;
        self
    }

    pub fn max_outstanding_send(mut self, n: u32) -> Self {
        self.limits.max_outstanding_send = n;
        self
    }

    pub fn max_send_data_buffers(mut self, n: u32) -> Self {
        self.limits.max_send_data_buffers = n;
        self
    }

    pub fn dequeue_batch(mut self, n: usize) -> Self {
        self.dequeue_batch = n;
        self
    }

    pub fn wait_timeout(mut self, d: Duration) -> Self {
        self.wait_timeout = d;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.cq_capacity == 0 {
            return Err(RioError::InvalidArgument("cq_capacity must be > 0"));
        }
        let l = &self.limits;
        if l.max_outstanding_receive == 0 && l.max_outstanding_send == 0 {
            return Err(RioError::InvalidArgument(
                "request queue must allow receives or sends",
            ));
        }
        if l.max_outstanding_receive > 0 && l.max_receive_data_buffers == 0 {
            return Err(RioError::InvalidArgument("max_receive_data_buffers must be > 0"));
        }
        if l.max_outstanding_send > 0 && l.max_send_data_buffers == 0 {
            return Err(RioError::InvalidArgument("max_send_data_buffers must be > 0"));
        }
        if l.completion_slots() > self.cq_capacity as u64 {
            return Err(RioError::InvalidArgument(
                "outstanding limits exceed cq_capacity",
            ));
        }
        if self.dequeue_batch == 0 {
            return Err(RioError::InvalidArgument("dequeue_batch must be > 0"));
        }
        Ok(())
    }
}
