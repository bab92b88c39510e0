//! Raw layouts of the Winsock RIO extension.
//!
//! Mirrors `mswsock.h`. Nothing here calls into the OS, so the layouts and
//! the table binding are checked on every platform.

use std::ffi::c_void;

use rio_core::entry::{BufferId, NotificationCompletion, RawCq, RawRq, RioBuf, RioResult};
use rio_core::error::{Result, RioError};

// ── Discovery ──

/// `WSAID_MULTIPLE_RIO` {8509e081-96dd-4005-b165-9e2ee8c79e3f}, in memory order.
pub const WSAID_MULTIPLE_RIO: [u8; 16] = [
    0x81, 0xe0, 0x09, 0x85, 0xdd, 0x96, 0x05, 0x40, 0xb1, 0x65, 0x9e, 0x2e, 0xe8, 0xc7, 0x9e, 0x3f,
];

pub const SIO_GET_MULTIPLE_EXTENSION_FUNCTION_POINTER: u32 = 0xC800_0024;

// ── Socket creation ──

pub const WSA_FLAG_OVERLAPPED: u32 = 0x01;
pub const WSA_FLAG_REGISTERED_IO: u32 = 0x100;

pub const AF_INET: i32 = 2;
pub const AF_INET6: i32 = 23;
pub const SOCK_STREAM: i32 = 1;
pub const SOCK_DGRAM: i32 = 2;
pub const IPPROTO_TCP: i32 = 6;
pub const IPPROTO_UDP: i32 = 17;

// ── Entry point signatures ──

pub type RioRegisterBufferFn = unsafe extern "system" fn(data: *mut u8, len: u32) -> BufferId;
pub type RioDeregisterBufferFn = unsafe extern "system" fn(id: BufferId);
pub type RioCreateCompletionQueueFn =
    unsafe extern "system" fn(size: u32, notification: *const NotificationCompletion) -> RawCq;
pub type RioCloseCompletionQueueFn = unsafe extern "system" fn(cq: RawCq);
pub type RioNotifyFn = unsafe extern "system" fn(cq: RawCq) -> i32;
pub type RioCreateRequestQueueFn = unsafe extern "system" fn(
    socket: usize,
    max_outstanding_receive: u32,
    max_receive_data_buffers: u32,
    max_outstanding_send: u32,
    max_send_data_buffers: u32,
    receive_cq: RawCq,
    send_cq: RawCq,
    socket_context: *mut c_void,
) -> RawRq;
pub type RioDequeueCompletionFn =
    unsafe extern "system" fn(cq: RawCq, results: *mut RioResult, count: u32) -> u32;
pub type RioSendFn = unsafe extern "system" fn(
    rq: RawRq,
    bufs: *const RioBuf,
    count: u32,
    flags: u32,
    request_context: *mut c_void,
) -> i32;
pub type RioReceiveFn = RioSendFn;

/// `RIO_EXTENSION_FUNCTION_TABLE` as returned by the ioctl.
///
/// Slots the core does not use are kept as plain addresses.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct RawExtensionTable {
    pub cb_size: u32,
    pub receive: Option<RioReceiveFn>,
    pub receive_ex: usize,
    pub send: Option<RioSendFn>,
    pub send_ex: usize,
    pub close_completion_queue: Option<RioCloseCompletionQueueFn>,
    pub create_completion_queue: Option<RioCreateCompletionQueueFn>,
    pub create_request_queue: Option<RioCreateRequestQueueFn>,
    pub dequeue_completion: Option<RioDequeueCompletionFn>,
    pub deregister_buffer: Option<RioDeregisterBufferFn>,
    pub notify: Option<RioNotifyFn>,
    pub register_buffer: Option<RioRegisterBufferFn>,
    pub resize_completion_queue: usize,
    pub resize_request_queue: usize,
}

pub const EXTENSION_TABLE_SIZE: usize = std::mem::size_of::<RawExtensionTable>();

#[cfg(target_pointer_width = "64")]
const _: () = assert!(EXTENSION_TABLE_SIZE == 112);
#[cfg(target_pointer_width = "32")]
const _: () = assert!(EXTENSION_TABLE_SIZE == 56);

impl RawExtensionTable {
    pub fn zeroed() -> Self {
        Self {
            cb_size: 0,
            receive: None,
            receive_ex: 0,
            send: None,
            send_ex: 0,
            close_completion_queue: None,
            create_completion_queue: None,
            create_request_queue: None,
            dequeue_completion: None,
            deregister_buffer: None,
            notify: None,
            register_buffer: None,
            resize_completion_queue: 0,
            resize_request_queue: 0,
        }
    }

    /// Check the byte count the ioctl reported and the table's own size field.
    pub fn validate(&self, returned: usize) -> Result<()> {
        if returned != EXTENSION_TABLE_SIZE {
            return Err(RioError::TableMismatch {
                expected: EXTENSION_TABLE_SIZE,
                actual: returned,
            });
        }
        if self.cb_size as usize != EXTENSION_TABLE_SIZE {
            return Err(RioError::TableMismatch {
                expected: EXTENSION_TABLE_SIZE,
                actual: self.cb_size as usize,
            });
        }
        Ok(())
    }

    /// Bind every slot the core uses. A null slot means the platform
    /// does not really provide the extension.
    pub fn bind(&self) -> std::result::Result<BoundTable, &'static str> {
        Ok(BoundTable {
            register_buffer: self.register_buffer.ok_or("RIORegisterBuffer")?,
            deregister_buffer: self.deregister_buffer.ok_or("RIODeregisterBuffer")?,
            create_completion_queue: self
                .create_completion_queue
                .ok_or("RIOCreateCompletionQueue")?,
            close_completion_queue: self.close_completion_queue.ok_or("RIOCloseCompletionQueue")?,
            notify: self.notify.ok_or("RIONotify")?,
            create_request_queue: self.create_request_queue.ok_or("RIOCreateRequestQueue")?,
            dequeue_completion: self.dequeue_completion.ok_or("RIODequeueCompletion")?,
            send: self.send.ok_or("RIOSend")?,
            receive: self.receive.ok_or("RIOReceive")?,
        })
    }
}

/// The nine entry points, each typed to its exact signature.
#[derive(Debug, Clone, Copy)]
pub struct BoundTable {
    pub register_buffer: RioRegisterBufferFn,
    pub deregister_buffer: RioDeregisterBufferFn,
    pub create_completion_queue: RioCreateCompletionQueueFn,
    pub close_completion_queue: RioCloseCompletionQueueFn,
    pub notify: RioNotifyFn,
    pub create_request_queue: RioCreateRequestQueueFn,
    pub dequeue_completion: RioDequeueCompletionFn,
    pub send: RioSendFn,
    pub receive: RioReceiveFn,
}
