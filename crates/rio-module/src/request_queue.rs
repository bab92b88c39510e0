//! `RequestQueue` — per-socket submission queue.
//!
//! The queue owns its socket. Closing the socket is the only way the
//! platform destroys a request queue, so dropping the `RequestQueue`
//! closes the socket first and only then releases its completion queues.
//!
//! Limits are hard ceilings. A submission beyond `max_outstanding_*`
//! fails synchronously with `Submit(WSAENOBUFS)` and produces no
//! completion; a slot frees up when a completion is dequeued.

use std::sync::Arc;

use rio_core::entry::{msg_flags, QueueLimits, RawRq, RequestContext, RioBuf, SocketContext};
use rio_core::error::{Result, RioError};
use rio_core::extension::RioExtension;
use rio_core::waitable::RioSocket;
use rio_core::{rio_debug, rio_error, rio_trace};

use crate::completion_queue::CompletionQueue;

pub struct RequestQueue<X: RioExtension, S: RioSocket> {
    // Field order is drop order: the socket must close before the
    // completion queues can be released.
    socket: S,
    raw: RawRq,
    receive_cq: CompletionQueue<X>,
    send_cq: CompletionQueue<X>,
    rio: Arc<X>,
    context: SocketContext,
    limits: QueueLimits,
}

impl<X: RioExtension, S: RioSocket> RequestQueue<X, S> {
    /// Create a queue whose sends and receives complete on the same `cq`.
    pub fn create(
        socket: S,
        cq: &CompletionQueue<X>,
        context: SocketContext,
        limits: QueueLimits,
    ) -> Result<Self> {
        Self::create_split(socket, cq, cq, context, limits)
    }

    /// Create a queue with separate receive and send completion queues.
    ///
    /// On failure the socket is dropped (closed).
    pub fn create_split(
        socket: S,
        receive_cq: &CompletionQueue<X>,
        send_cq: &CompletionQueue<X>,
        context: SocketContext,
        limits: QueueLimits,
    ) -> Result<Self> {
        if !Arc::ptr_eq(receive_cq.rio(), send_cq.rio()) {
            return Err(RioError::InvalidArgument(
                "completion queues belong to different providers",
            ));
        }
        if limits.completion_slots() == 0 {
            return Err(RioError::InvalidArgument(
                "request queue must allow receives or sends",
            ));
        }
        let rio = Arc::clone(receive_cq.rio());
        let raw = rio.create_request_queue(
            socket.raw_socket(),
            &limits,
            receive_cq.raw(),
            send_cq.raw(),
            context,
        );
        if raw.is_invalid() {
            let code = rio.last_error();
            rio_error!(
                "request queue creation on socket {:#x} failed: status {}",
                socket.raw_socket().0,
                code
            );
            return Err(RioError::CreateRequestQueue(code));
        }
        rio_debug!(
            "request queue {:#x} on socket {:#x}: recv {}x{} send {}x{}",
            raw.0,
            socket.raw_socket().0,
            limits.max_outstanding_receive,
            limits.max_receive_data_buffers,
            limits.max_outstanding_send,
            limits.max_send_data_buffers
        );
        Ok(Self {
            socket,
            raw,
            receive_cq: receive_cq.clone(),
            send_cq: send_cq.clone(),
            rio,
            context,
            limits,
        })
    }

    fn check_submission(bufs: &[RioBuf], flags: u32) -> Result<()> {
        if flags & !msg_flags::ALL != 0 {
            return Err(RioError::InvalidArgument("unknown message flags"));
        }
        if bufs.is_empty() && flags & msg_flags::COMMIT_ONLY == 0 {
            return Err(RioError::InvalidArgument("empty segment list"));
        }
        if bufs.len() > u32::MAX as usize {
            return Err(RioError::InvalidArgument("too many segments"));
        }
        Ok(())
    }

    /// Submit a send of `bufs`. The completion carries `ctx`.
    ///
    /// # Safety
    /// Every segment must reference a registered buffer that stays
    /// registered and unmodified until the completion is dequeued.
    pub unsafe fn send(&mut self, bufs: &[RioBuf], flags: u32, ctx: RequestContext) -> Result<()> {
        Self::check_submission(bufs, flags)?;
        if !self.rio.send(self.raw, bufs, flags, ctx) {
            let code = self.rio.last_error();
            rio_trace!("rq {:#x}: send ctx {} rejected: {}", self.raw.0, ctx.0, code);
            return Err(RioError::Submit(code));
        }
        rio_trace!("rq {:#x}: send ctx {} ({} segs)", self.raw.0, ctx.0, bufs.len());
        Ok(())
    }

    /// Submit a receive into `bufs`. The completion carries `ctx`.
    ///
    /// # Safety
    /// Every segment must reference a registered buffer that stays
    /// registered, and is not otherwise accessed, until the completion is
    /// dequeued.
    pub unsafe fn receive(
        &mut self,
        bufs: &[RioBuf],
        flags: u32,
        ctx: RequestContext,
    ) -> Result<()> {
        Self::check_submission(bufs, flags)?;
        if !self.rio.receive(self.raw, bufs, flags, ctx) {
            let code = self.rio.last_error();
            rio_trace!("rq {:#x}: receive ctx {} rejected: {}", self.raw.0, ctx.0, code);
            return Err(RioError::Submit(code));
        }
        rio_trace!("rq {:#x}: receive ctx {} ({} segs)", self.raw.0, ctx.0, bufs.len());
        Ok(())
    }

    /// Start every send submitted with `DEFER`.
    pub fn commit_sends(&mut self) -> Result<()> {
        // Safety: no new segments; deferred ones were vouched for when
        // they were submitted.
        unsafe { self.send(&[], msg_flags::COMMIT_ONLY, RequestContext::default()) }
    }

    /// Start every receive submitted with `DEFER`.
    pub fn commit_receives(&mut self) -> Result<()> {
        // Safety: as in `commit_sends`.
        unsafe { self.receive(&[], msg_flags::COMMIT_ONLY, RequestContext::default()) }
    }

    #[inline]
    pub fn raw(&self) -> RawRq {
        self.raw
    }

    #[inline]
    pub fn context(&self) -> SocketContext {
        self.context
    }

    #[inline]
    pub fn limits(&self) -> &QueueLimits {
        &self.limits
    }

    pub fn socket(&self) -> &S {
        &self.socket
    }

    pub fn receive_cq(&self) -> &CompletionQueue<X> {
        &self.receive_cq
    }

    pub fn send_cq(&self) -> &CompletionQueue<X> {
        &self.send_cq
    }
}

impl<X: RioExtension, S: RioSocket> std::fmt::Debug for RequestQueue<X, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestQueue")
            .field("raw", &self.raw)
            .field("socket", &self.socket.raw_socket())
            .field("receive_cq", &self.receive_cq.raw())
            .field("send_cq", &self.send_cq.raw())
            .field("context", &self.context)
            .field("limits", &self.limits)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    use rio_core::error::status;

    use crate::buffer::RegisteredBuffer;
    use crate::emulated::{EmulatedRio, EmulatedSocket};

    type Rq = RequestQueue<EmulatedRio, EmulatedSocket>;

    fn limits(recv: u32, send: u32) -> QueueLimits {
        QueueLimits {
            max_outstanding_receive: recv,
            max_receive_data_buffers: 1,
            max_outstanding_send: send,
            max_send_data_buffers: 1,
        }
    }

    struct Pair {
        rio: Arc<EmulatedRio>,
        cq: CompletionQueue<EmulatedRio>,
        a: Rq,
        b: Rq,
    }

    fn pair(cq_capacity: u32, l: QueueLimits) -> Pair {
        let rio = Arc::new(EmulatedRio::new());
        let cq = CompletionQueue::create(Arc::clone(&rio), cq_capacity, None).unwrap();
        let (sa, sb) = rio.socket_pair();
        let a = RequestQueue::create(sa, &cq, SocketContext(0xA), l).unwrap();
        let b = RequestQueue::create(sb, &cq, SocketContext(0xB), l).unwrap();
        Pair { rio, cq, a, b }
    }

    #[test]
    fn test_four_sends_complete() {
        let mut p = pair(16, limits(1, 4));
        let buf = RegisteredBuffer::allocate(Arc::clone(&p.rio), 4096).unwrap();
        let segs = buf.segments(256);

        for (i, seg) in segs.iter().take(4).enumerate() {
            unsafe { p.a.send(&[*seg], 0, RequestContext(i as u64 + 1)).unwrap() };
        }

        let all = p.cq.drain_all(8).unwrap();
        assert_eq!(all.len(), 4);
        let contexts: HashSet<u64> = all.iter().map(|r| r.request_context).collect();
        assert_eq!(contexts, HashSet::from([1, 2, 3, 4]));
        for r in &all {
            assert!(r.is_ok());
            assert_eq!(r.bytes_transferred, 256);
            assert_eq!(r.socket_context(), SocketContext(0xA));
        }
    }

    #[cfg(any(target_os = "linux", target_os = "android", windows))]
    #[test]
    fn test_four_sends_signal_armed_queue() {
        use std::time::Duration;

        use rio_core::entry::RioResult;
        use rio_core::waitable::Waitable;

        use crate::event::WaitEvent;

        let rio = Arc::new(EmulatedRio::new());
        let event: Arc<dyn Waitable> = Arc::new(WaitEvent::create().unwrap());
        let cq = CompletionQueue::create(Arc::clone(&rio), 16, Some(event)).unwrap();
        let (sa, _sb) = rio.socket_pair();
        let mut a = RequestQueue::create(sa, &cq, SocketContext(0xA), limits(1, 4)).unwrap();
        let buf = RegisteredBuffer::allocate(Arc::clone(&rio), 4096).unwrap();
        let segs = buf.segments(256);

        cq.notify().unwrap();
        for (i, seg) in segs.iter().take(4).enumerate() {
            unsafe { a.send(&[*seg], 0, RequestContext(i as u64 + 1)).unwrap() };
        }
        assert_eq!(cq.wait(Some(Duration::from_secs(1))), Ok(true));

        let mut out = [RioResult::default(); 16];
        let n = cq.dequeue(&mut out).unwrap();
        assert_eq!(n, 4);
        let contexts: HashSet<u64> = out[..n].iter().map(|r| r.request_context).collect();
        assert_eq!(contexts, HashSet::from([1, 2, 3, 4]));
        for r in &out[..n] {
            assert_eq!(r.status, 0);
            assert_eq!(r.bytes_transferred, 256);
        }
    }

    #[test]
    fn test_fifth_send_rejected() {
        let mut p = pair(16, limits(1, 4));
        let buf = RegisteredBuffer::allocate(Arc::clone(&p.rio), 4096).unwrap();
        let segs = buf.segments(256);

        for (i, seg) in segs.iter().take(4).enumerate() {
            unsafe { p.a.send(&[*seg], 0, RequestContext(i as u64 + 1)).unwrap() };
        }
        let err = unsafe { p.a.send(&[segs[4]], 0, RequestContext(5)) }.unwrap_err();
        assert_eq!(err, RioError::Submit(status::WSAENOBUFS));
        assert!(!err.is_fatal());

        // No completion for the rejected send.
        let all = p.cq.drain_all(8).unwrap();
        assert_eq!(all.len(), 4);
        assert!(all.iter().all(|r| r.request_context != 5));

        // Draining released the slots.
        unsafe { p.a.send(&[segs[4]], 0, RequestContext(5)).unwrap() };
        assert_eq!(p.cq.drain_all(8).unwrap()[0].request_context, 5);
    }

    #[test]
    fn test_submission_completion_bijection() {
        let mut p = pair(256, limits(64, 64));
        let mut buf = RegisteredBuffer::allocate(Arc::clone(&p.rio), 64 * 64 * 2).unwrap();
        for (i, b) in buf.as_mut_slice().iter_mut().enumerate() {
            *b = i as u8;
        }
        let segs = buf.segments(64);
        let (send_segs, recv_segs) = segs.split_at(64);

        for (i, seg) in recv_segs.iter().enumerate() {
            unsafe { p.b.receive(&[*seg], 0, RequestContext(1000 + i as u64)).unwrap() };
        }
        for (i, seg) in send_segs.iter().enumerate() {
            unsafe { p.a.send(&[*seg], 0, RequestContext(i as u64)).unwrap() };
        }

        let all = p.cq.drain_all(16).unwrap();
        assert_eq!(all.len(), 128);
        let contexts: HashSet<u64> = all.iter().map(|r| r.request_context).collect();
        assert_eq!(contexts.len(), 128);
        assert!(all.iter().all(|r| r.is_ok() && r.bytes_transferred == 64));

        // The stream arrived intact in the receive half.
        let (sent, received) = buf.as_slice().split_at(64 * 64);
        assert_eq!(sent, received);
    }

    #[test]
    fn test_closed_queue_aborts_and_peer_sees_eof() {
        let p = pair(16, limits(2, 2));
        let Pair { rio, cq, mut a, mut b } = p;
        let buf = RegisteredBuffer::allocate(Arc::clone(&rio), 64).unwrap();

        unsafe {
            a.receive(&[buf.segment(0, 32).unwrap()], 0, RequestContext(1)).unwrap();
            b.receive(&[buf.segment(32, 32).unwrap()], 0, RequestContext(2)).unwrap();
        }
        drop(a);
        assert_eq!(rio.open_sockets(), 1);

        // Records produced by the close stay dequeuable.
        let all = cq.drain_all(8).unwrap();
        assert_eq!(all.len(), 2);
        let aborted = all.iter().find(|r| r.request_context == 1).unwrap();
        assert_eq!(aborted.status, status::ERROR_OPERATION_ABORTED);
        assert_eq!(aborted.socket_context(), SocketContext(0xA));
        let eof = all.iter().find(|r| r.request_context == 2).unwrap();
        assert!(eof.is_ok());
        assert_eq!(eof.bytes_transferred, 0);

        // Sending to the closed peer completes with a per-request failure.
        unsafe { b.send(&[buf.segment(0, 8).unwrap()], 0, RequestContext(3)).unwrap() };
        let all = cq.drain_all(8).unwrap();
        assert_eq!(all[0].status, status::WSAECONNRESET);
        assert!(!cq.is_corrupt());
    }

    #[test]
    fn test_rejects_bad_submissions() {
        let mut p = pair(16, limits(2, 2));
        let buf = RegisteredBuffer::allocate(Arc::clone(&p.rio), 64).unwrap();

        let err = unsafe { p.a.send(&[], 0, RequestContext(1)) }.unwrap_err();
        assert!(matches!(err, RioError::InvalidArgument(_)));

        let err = unsafe { p.a.send(&[buf.full_segment()], 0x100, RequestContext(1)) }.unwrap_err();
        assert!(matches!(err, RioError::InvalidArgument(_)));

        // Two segments against max_send_data_buffers = 1.
        let two = [buf.segment(0, 8).unwrap(), buf.segment(8, 8).unwrap()];
        let err = unsafe { p.a.send(&two, 0, RequestContext(1)) }.unwrap_err();
        assert_eq!(err, RioError::Submit(status::WSAEINVAL));

        assert!(p.cq.drain_all(8).unwrap().is_empty());
    }

    #[test]
    fn test_deferred_sends_start_on_commit() {
        let mut p = pair(16, limits(1, 4));
        let buf = RegisteredBuffer::allocate(Arc::clone(&p.rio), 64).unwrap();
        let segs = buf.segments(16);

        for (i, seg) in segs.iter().enumerate() {
            unsafe { p.a.send(&[*seg], msg_flags::DEFER, RequestContext(i as u64)).unwrap() };
        }
        assert!(p.cq.drain_all(8).unwrap().is_empty());

        p.a.commit_sends().unwrap();
        assert_eq!(p.cq.drain_all(8).unwrap().len(), 4);
        // Nothing deferred: committing again is a no-op.
        p.a.commit_sends().unwrap();
        p.b.commit_receives().unwrap();
        assert!(p.cq.drain_all(8).unwrap().is_empty());
    }

    #[test]
    fn test_split_queues() {
        let rio = Arc::new(EmulatedRio::new());
        let recv_cq = CompletionQueue::create(Arc::clone(&rio), 8, None).unwrap();
        let send_cq = CompletionQueue::create(Arc::clone(&rio), 8, None).unwrap();
        let (sa, sb) = rio.socket_pair();
        let mut a = RequestQueue::create_split(sa, &recv_cq, &send_cq, SocketContext(1), limits(4, 4)).unwrap();
        let mut b = RequestQueue::create_split(sb, &recv_cq, &send_cq, SocketContext(2), limits(4, 4)).unwrap();
        let buf = RegisteredBuffer::allocate(Arc::clone(&rio), 64).unwrap();

        unsafe {
            b.receive(&[buf.segment(32, 32).unwrap()], 0, RequestContext(20)).unwrap();
            a.send(&[buf.segment(0, 16).unwrap()], 0, RequestContext(10)).unwrap();
        }
        let sends = send_cq.drain_all(8).unwrap();
        let recvs = recv_cq.drain_all(8).unwrap();
        assert_eq!(sends.len(), 1);
        assert_eq!(sends[0].request_context, 10);
        assert_eq!(recvs.len(), 1);
        assert_eq!(recvs[0].request_context, 20);
        assert_eq!(recvs[0].bytes_transferred, 16);
    }

    #[test]
    fn test_create_failures() {
        let rio = Arc::new(EmulatedRio::new());
        let cq = CompletionQueue::create(Arc::clone(&rio), 4, None).unwrap();
        let (sa, sb) = rio.socket_pair();

        // 8 slots do not fit a 4-entry queue; the socket is closed.
        let err = RequestQueue::create(sa, &cq, SocketContext(0), limits(4, 4)).unwrap_err();
        assert_eq!(err, RioError::CreateRequestQueue(status::WSAENOBUFS));
        assert_eq!(rio.open_sockets(), 1);

        let err = RequestQueue::create(sb, &cq, SocketContext(0), limits(0, 0)).unwrap_err();
        assert!(matches!(err, RioError::InvalidArgument(_)));

        let other = Arc::new(EmulatedRio::new());
        let foreign_cq = CompletionQueue::create(Arc::clone(&other), 8, None).unwrap();
        let (sc, _sd) = rio.socket_pair();
        let err = RequestQueue::create_split(sc, &cq, &foreign_cq, SocketContext(0), limits(1, 1))
            .unwrap_err();
        assert!(matches!(err, RioError::InvalidArgument(_)));
    }

    #[test]
    fn test_teardown_order() {
        let p = pair(16, limits(1, 1));
        let Pair { rio, cq, a, b } = p;
        drop(cq);
        // Request queues keep the completion queue alive.
        assert_eq!(rio.open_completion_queues(), 1);
        drop(a);
        drop(b);
        assert_eq!(rio.open_completion_queues(), 0);
        assert_eq!(rio.open_request_queues(), 0);
        assert_eq!(rio.open_sockets(), 0);
    }
}
