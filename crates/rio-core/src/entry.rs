//! Native-layout records and raw handle types.
//!
//! These mirror the structs in `mswsock.h` byte for byte. They are passed
//! straight through the extension function pointers, so field order, size
//! and alignment are part of the contract. Sizes are asserted at compile
//! time at the bottom of this file.

/// Opaque identifier of a registered buffer (`RIO_BUFFERID`).
///
/// Pointer-sized. All-bits-one is the platform's failure sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct BufferId(pub usize);

impl BufferId {
    pub const INVALID: Self = Self(usize::MAX);

    #[inline]
    pub fn is_invalid(self) -> bool {
        self == Self::INVALID
    }
}

/// Raw completion queue handle (`RIO_CQ`). Zero is invalid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct RawCq(pub usize);

impl RawCq {
    pub const INVALID: Self = Self(0);

    #[inline]
    pub fn is_invalid(self) -> bool {
        self == Self::INVALID
    }
}

/// Raw request queue handle (`RIO_RQ`). Zero is invalid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct RawRq(pub usize);

impl RawRq {
    pub const INVALID: Self = Self(0);

    #[inline]
    pub fn is_invalid(self) -> bool {
        self == Self::INVALID
    }
}

/// Raw socket handle (`SOCKET` on Windows, a provider-local id elsewhere).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct RawSocket(pub usize);

impl RawSocket {
    pub const INVALID: Self = Self(usize::MAX);
}

/// Raw waitable handle (`HANDLE` on Windows, an eventfd on Unix).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct RawEvent(pub usize);

/// Caller value echoed back in `RioResult::socket_context`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(transparent)]
pub struct SocketContext(pub u64);

/// Caller value echoed back in `RioResult::request_context`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(transparent)]
pub struct RequestContext(pub u64);

/// A slice of a registered buffer used by one request (`RIO_BUF`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct RioBuf {
    pub buffer_id: BufferId,
    pub offset: u32,
    pub length: u32,
}

/// One completion record (`RIORESULT`).
///
/// `status` is zero on success. A nonzero status is a failure of this one
/// request only; the queue that produced it stays healthy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(C)]
pub struct RioResult {
    pub status: i32,
    pub bytes_transferred: u32,
    pub socket_context: u64,
    pub request_context: u64,
}

impl RioResult {
    #[inline]
    pub fn is_ok(&self) -> bool {
        self.status == 0
    }

    #[inline]
    pub fn socket_context(&self) -> SocketContext {
        SocketContext(self.socket_context)
    }

    #[inline]
    pub fn request_context(&self) -> RequestContext {
        RequestContext(self.request_context)
    }
}

/// Notification descriptor for event-style completion queues
/// (`RIO_NOTIFICATION_COMPLETION` with the `Event` union arm).
///
/// `_pad` covers the larger IOCP arm of the native union so the record
/// has the native size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct NotificationCompletion {
    pub kind: i32,
    pub event_handle: usize,
    pub notify_reset: i32,
    pub _pad: usize,
}

impl NotificationCompletion {
    /// Event notification; `notify_reset` resets the event on every notify.
    pub fn event(event: RawEvent, notify_reset: bool) -> Self {
        Self {
            kind: RIO_EVENT_COMPLETION,
            event_handle: event.0,
            notify_reset: notify_reset as i32,
            _pad: 0,
        }
    }

    #[inline]
    pub fn event_handle(&self) -> RawEvent {
        RawEvent(self.event_handle)
    }
}

/// Per-socket request queue ceilings, enforced by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueLimits {
    pub max_outstanding_receive: u32,
    pub max_receive_data_buffers: u32,
    pub max_outstanding_send: u32,
    pub max_send_data_buffers: u32,
}

impl QueueLimits {
    /// Completion slots this queue can occupy at once.
    #[inline]
    pub fn completion_slots(&self) -> u64 {
        self.max_outstanding_receive as u64 + self.max_outstanding_send as u64
    }
}

/// Returned by dequeue when the completion queue is corrupt.
pub const RIO_CORRUPT_CQ: u32 = 0xFFFF_FFFF;

/// `RIO_NOTIFICATION_COMPLETION_TYPE::RIO_EVENT_COMPLETION`.
pub const RIO_EVENT_COMPLETION: i32 = 1;

/// Send/receive flags (`RIO_MSG_*`).
pub mod msg_flags {
    /// The completion does not fire an armed notification.
    pub const DONT_NOTIFY: u32 = 0x0000_0001;
    /// Queue the request without starting it.
    pub const DEFER: u32 = 0x0000_0002;
    /// Receive completes only when the buffers are full.
    pub const WAITALL: u32 = 0x0000_0004;
    /// Start all deferred requests. Takes no buffers.
    pub const COMMIT_ONLY: u32 = 0x0000_0008;

    pub const ALL: u32 = DONT_NOTIFY | DEFER | WAITALL | COMMIT_ONLY;
}

const _: () = assert!(std::mem::size_of::<RioResult>() == 24);
const _: () = assert!(std::mem::align_of::<RioResult>() == 8);
#[cfg(target_pointer_width = "64")]
const _: () = assert!(std::mem::size_of::<RioBuf>() == 16);
#[cfg(target_pointer_width = "64")]
const _: () = assert!(std::mem::size_of::<NotificationCompletion>() == 32);
#[cfg(target_pointer_width = "32")]
const _: () = assert!(std::mem::size_of::<RioBuf>() == 12);
#[cfg(target_pointer_width = "32")]
const _: () = assert!(std::mem::size_of::<NotificationCompletion>() == 16);
