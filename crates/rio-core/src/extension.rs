//! The registered-I/O function table seam.
//!
//! A `RioExtension` is one bound set of the nine RIO entry points. The
//! methods are thin: they take and return the raw native values
//! (sentinels included) and never log or allocate. Checking sentinels,
//! mapping them to `RioError` and enforcing handle lifetimes is the job of
//! the owning handles in `rio-module`.
//!
//! # Implementors
//!
//! - `WinsockRio` (Windows): function pointers obtained from
//!   `SIO_GET_MULTIPLE_EXTENSION_FUNCTION_POINTER`.
//! - `EmulatedRio`: in-process provider with the same observable
//!   protocol, used by tests and on platforms without RIO.

use crate::entry::{
    BufferId, NotificationCompletion, QueueLimits, RawCq, RawRq, RawSocket, RequestContext,
    RioBuf, RioResult, SocketContext,
};

/// Typed view of the RIO extension function table.
///
/// **Contract:**
/// - No method blocks.
/// - Failure is reported through the native sentinel; the status is then
///   available from `last_error()` on the same thread.
/// - Handles are not synchronized by the table. Callers serialize access
///   per queue.
pub trait RioExtension: Send + Sync + 'static {
    /// Register `len` bytes at `ptr`. Returns `BufferId::INVALID` on failure.
    ///
    /// # Safety
    /// `ptr..ptr+len` must be valid memory that stays allocated until the
    /// id is deregistered.
    unsafe fn register_buffer(&self, ptr: *mut u8, len: u32) -> BufferId;

    /// Release a registration. Passing an id twice is undefined.
    fn deregister_buffer(&self, id: BufferId);

    /// Create a completion queue. Returns `RawCq::INVALID` on failure.
    fn create_completion_queue(
        &self,
        capacity: u32,
        notification: Option<&NotificationCompletion>,
    ) -> RawCq;

    /// Close a completion queue no request queue still references.
    fn close_completion_queue(&self, cq: RawCq);

    /// Arm the queue's notification. Returns 0 or a status code.
    fn notify(&self, cq: RawCq) -> i32;

    /// Create a request queue on `socket`. Returns `RawRq::INVALID` on failure.
    fn create_request_queue(
        &self,
        socket: RawSocket,
        limits: &QueueLimits,
        receive_cq: RawCq,
        send_cq: RawCq,
        context: SocketContext,
    ) -> RawRq;

    /// Move up to `results.len()` completions into `results`.
    ///
    /// Returns the count, or `RIO_CORRUPT_CQ` if the queue is corrupt.
    fn dequeue_completion(&self, cq: RawCq, results: &mut [RioResult]) -> u32;

    /// Submit a send. Returns false if the request was not accepted.
    ///
    /// # Safety
    /// Every segment must reference a live registration and stay within it
    /// until the completion is dequeued.
    unsafe fn send(&self, rq: RawRq, bufs: &[RioBuf], flags: u32, ctx: RequestContext) -> bool;

    /// Submit a receive. Returns false if the request was not accepted.
    ///
    /// # Safety
    /// Same as `send`; the platform writes into the referenced memory.
    unsafe fn receive(&self, rq: RawRq, bufs: &[RioBuf], flags: u32, ctx: RequestContext)
        -> bool;

    /// Status of the last failed call on this thread.
    fn last_error(&self) -> i32;
}
