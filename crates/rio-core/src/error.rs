//! RIO error types.
//!
//! Per-request failures are not errors: they arrive in-band as a nonzero
//! `RioResult::status`. Everything here is either a synchronous rejection
//! or a condition that makes the subsystem or one queue unusable.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RioError {
    /// Extension discovery failed; the subsystem is unusable.
    Unsupported(i32),
    /// Discovery returned a function table of the wrong size.
    TableMismatch { expected: usize, actual: usize },
    /// Buffer registration failed.
    RegisterBuffer(i32),
    /// Completion queue creation failed.
    CreateCompletionQueue(i32),
    /// Request queue creation failed.
    CreateRequestQueue(i32),
    /// A caller precondition was violated before reaching the platform.
    InvalidArgument(&'static str),
    /// Arming a completion queue failed. Protocol error.
    Notify(i32),
    /// The completion queue is corrupt and must be closed.
    CorruptQueue,
    /// A send/receive was rejected. No completion will arrive for it.
    Submit(i32),
    /// OS error outside the extension (events, sockets).
    Os(i32),
}

impl RioError {
    /// Errors the caller's control layer must handle; the subsystem or the
    /// queue cannot continue.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Unsupported(_) | Self::TableMismatch { .. } | Self::Notify(_) | Self::CorruptQueue
        )
    }

    /// Platform status carried by this error, if any.
    pub fn status(&self) -> Option<i32> {
        match *self {
            Self::Unsupported(s)
            | Self::RegisterBuffer(s)
            | Self::CreateCompletionQueue(s)
            | Self::CreateRequestQueue(s)
            | Self::Notify(s)
            | Self::Submit(s)
            | Self::Os(s) => Some(s),
            Self::TableMismatch { .. } | Self::InvalidArgument(_) | Self::CorruptQueue => None,
        }
    }
}

impl fmt::Display for RioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unsupported(e) => write!(f, "registered I/O unsupported: status {}", e),
            Self::TableMismatch { expected, actual } => write!(
                f,
                "extension table size mismatch: expected {} bytes, got {}",
                expected, actual
            ),
            Self::RegisterBuffer(e) => write!(f, "buffer registration failed: status {}", e),
            Self::CreateCompletionQueue(e) => {
                write!(f, "completion queue creation failed: status {}", e)
            }
            Self::CreateRequestQueue(e) => write!(f, "request queue creation failed: status {}", e),
            Self::InvalidArgument(msg) => write!(f, "invalid argument: {}", msg),
            Self::Notify(e) => write!(f, "completion queue notify failed: status {}", e),
            Self::CorruptQueue => write!(f, "completion queue is corrupt"),
            Self::Submit(e) => write!(f, "request submission failed: status {}", e),
            Self::Os(e) => write!(f, "OS error: status {}", e),
        }
    }
}

impl std::error::Error for RioError {}

pub type Result<T> = std::result::Result<T, RioError>;

/// Winsock status codes the core and the emulated provider report.
pub mod status {
    pub const ERROR_OPERATION_ABORTED: i32 = 995;
    pub const WSAEINVAL: i32 = 10022;
    pub const WSAEALREADY: i32 = 10037;
    pub const WSAENOTSOCK: i32 = 10038;
    pub const WSAENOBUFS: i32 = 10055;
    pub const WSAENOTCONN: i32 = 10057;
    pub const WSAECONNRESET: i32 = 10054;
    pub const WSAEOPNOTSUPP: i32 = 10045;
}
