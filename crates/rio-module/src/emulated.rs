//! `EmulatedRio` — in-process `RioExtension` provider.
//!
//! Reproduces the observable registered-I/O protocol without the Windows
//! extension, so every layer above the function table runs (and is
//! tested) on any platform.
//!
//! # Model
//!
//! - Buffers: a table of (base, len) registrations. Segments are bounds
//!   checked against it on every submission.
//! - Completion queues: bounded lock-free rings. Each request queue bound
//!   to a CQ reserves `max_outstanding_*` slots in it at creation, so a
//!   correctly sized CQ can never overflow. An overflow (only reachable by
//!   fault injection or raw misuse) marks the CQ corrupt.
//! - Sockets: connected pairs. A send copies the bytes out of registered
//!   memory into the peer's stream and completes immediately; a receive
//!   completes once stream bytes or EOF are available.
//! - Outstanding slots are released when the completion is dequeued, not
//!   when it is produced. Closing a socket releases only its idle slots;
//!   the ones behind queued or aborted records stay reserved until those
//!   records are dequeued.
//!
//! Every call takes one state lock. This is a test and fallback provider;
//! it does not try to match RIO's performance.

use std::cell::Cell;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crossbeam_queue::ArrayQueue;

use rio_core::entry::{
    msg_flags, BufferId, NotificationCompletion, QueueLimits, RawCq, RawRq, RawSocket,
    RequestContext, RioBuf, RioResult, SocketContext, RIO_CORRUPT_CQ, RIO_EVENT_COMPLETION,
};
use rio_core::error::status;
use rio_core::extension::RioExtension;
use rio_core::waitable::RioSocket;
use rio_core::{rio_debug, rio_error, rio_trace, rio_warn};

use crate::event;

/// Largest completion queue the emulated provider will allocate.
pub const MAX_CQ_CAPACITY: u32 = 1 << 20;

thread_local! {
    static LAST_ERROR: Cell<i32> = const { Cell::new(0) };
}

fn set_last_error(code: i32) {
    LAST_ERROR.with(|c| c.set(code));
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Receive,
    Send,
}

struct Region {
    base: usize,
    len: u32,
}

struct Completion {
    result: RioResult,
    rq: usize,
    direction: Direction,
    notify: bool,
}

struct CqState {
    ring: ArrayQueue<Completion>,
    reserved: u64,
    notification: Option<NotificationCompletion>,
    armed: bool,
    corrupt: bool,
}

struct Request {
    bufs: Vec<RioBuf>,
    context: u64,
    flags: u32,
}

struct RqState {
    socket: usize,
    receive_cq: usize,
    send_cq: usize,
    context: u64,
    limits: QueueLimits,
    outstanding_receive: u32,
    outstanding_send: u32,
    /// Started receives waiting for stream data, in post order.
    receives: VecDeque<Request>,
    deferred_receives: Vec<Request>,
    deferred_sends: Vec<Request>,
}

#[derive(Default)]
struct SocketState {
    peer: Option<usize>,
    rq: Option<usize>,
    /// Bytes the peer sent that no receive has consumed yet.
    inbound: VecDeque<u8>,
    peer_closed: bool,
}

/// A closed request queue whose completions are still in its rings.
/// Each undrained record keeps one reserved slot until dequeued.
struct Draining {
    receive_cq: usize,
    send_cq: usize,
    receive: u32,
    send: u32,
}

#[derive(Default)]
struct State {
    next_handle: usize,
    buffers: HashMap<usize, Region>,
    cqs: HashMap<usize, CqState>,
    rqs: HashMap<usize, RqState>,
    draining: HashMap<usize, Draining>,
    sockets: HashMap<usize, SocketState>,
}

pub struct EmulatedRio {
    state: Mutex<State>,
}

impl Default for EmulatedRio {
    fn default() -> Self {
        Self::new()
    }
}

impl EmulatedRio {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                next_handle: 1,
                ..State::default()
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create a connected pair of sockets.
    pub fn socket_pair(self: &Arc<Self>) -> (EmulatedSocket, EmulatedSocket) {
        let mut st = self.lock();
        let a = st.alloc_handle();
        let b = st.alloc_handle();
        st.sockets.insert(
            a,
            SocketState {
                peer: Some(b),
                ..SocketState::default()
            },
        );
        st.sockets.insert(
            b,
            SocketState {
                peer: Some(a),
                ..SocketState::default()
            },
        );
        rio_debug!("emulated socket pair {:#x} <-> {:#x}", a, b);
        (
            EmulatedSocket {
                rio: Arc::clone(self),
                raw: RawSocket(a),
            },
            EmulatedSocket {
                rio: Arc::clone(self),
                raw: RawSocket(b),
            },
        )
    }

    /// Fault injection: make `cq` report `RIO_CORRUPT_CQ` from now on.
    pub fn corrupt_completion_queue(&self, cq: RawCq) {
        if let Some(q) = self.lock().cqs.get_mut(&cq.0) {
            q.corrupt = true;
        }
    }

    pub fn registered_buffers(&self) -> usize {
        self.lock().buffers.len()
    }

    pub fn open_completion_queues(&self) -> usize {
        self.lock().cqs.len()
    }

    pub fn open_request_queues(&self) -> usize {
        self.lock().rqs.len()
    }

    pub fn open_sockets(&self) -> usize {
        self.lock().sockets.len()
    }

    /// Close a socket: destroys its request queue, aborts its pending
    /// requests and delivers EOF to the peer.
    fn close_socket(&self, socket: RawSocket) {
        let mut st = self.lock();
        let Some(sock) = st.sockets.remove(&socket.0) else {
            return;
        };

        if let Some(rq_id) = sock.rq {
            if let Some(mut rq) = st.rqs.remove(&rq_id) {
                let mut aborted: Vec<(usize, Direction, Request)> = Vec::new();
                for req in rq.receives.drain(..).chain(rq.deferred_receives.drain(..)) {
                    aborted.push((rq.receive_cq, Direction::Receive, req));
                }
                for req in rq.deferred_sends.drain(..) {
                    aborted.push((rq.send_cq, Direction::Send, req));
                }
                for (cq, direction, req) in aborted {
                    st.push_completion(
                        cq,
                        Completion {
                            result: RioResult {
                                status: status::ERROR_OPERATION_ABORTED,
                                bytes_transferred: 0,
                                socket_context: rq.context,
                                request_context: req.context,
                            },
                            rq: rq_id,
                            direction,
                            notify: req.flags & msg_flags::DONT_NOTIFY == 0,
                        },
                    );
                }

                let idle_receive = rq
                    .limits
                    .max_outstanding_receive
                    .saturating_sub(rq.outstanding_receive);
                let idle_send = rq
                    .limits
                    .max_outstanding_send
                    .saturating_sub(rq.outstanding_send);
                st.release(rq.receive_cq, idle_receive as u64);
                st.release(rq.send_cq, idle_send as u64);
                if rq.outstanding_receive + rq.outstanding_send > 0 {
                    st.draining.insert(
                        rq_id,
                        Draining {
                            receive_cq: rq.receive_cq,
                            send_cq: rq.send_cq,
                            receive: rq.outstanding_receive,
                            send: rq.outstanding_send,
                        },
                    );
                }
            }
        }

        if let Some(peer) = sock.peer {
            if let Some(p) = st.sockets.get_mut(&peer) {
                p.peer = None;
                p.peer_closed = true;
            }
            st.pump(peer);
        }
        rio_debug!("emulated socket {:#x} closed", socket.0);
    }

    fn submit(
        &self,
        rq: RawRq,
        bufs: &[RioBuf],
        flags: u32,
        ctx: RequestContext,
        direction: Direction,
    ) -> bool {
        let mut st = self.lock();
        match st.submit(rq.0, bufs, flags, ctx.0, direction) {
            Ok(()) => true,
            Err(code) => {
                rio_trace!(
                    "emulated {:?} on rq {:#x} rejected: status {}",
                    direction,
                    rq.0,
                    code
                );
                set_last_error(code);
                false
            }
        }
    }
}

impl State {
    fn alloc_handle(&mut self) -> usize {
        let h = self.next_handle;
        self.next_handle += 1;
        h
    }

    /// Unreserved slots of a healthy CQ; `None` if missing or corrupt.
    fn free_slots(&self, cq: usize) -> Option<u64> {
        self.cqs
            .get(&cq)
            .filter(|q| !q.corrupt)
            .map(|q| (q.ring.capacity() as u64).saturating_sub(q.reserved))
    }

    fn release(&mut self, cq: usize, slots: u64) {
        if let Some(q) = self.cqs.get_mut(&cq) {
            q.reserved = q.reserved.saturating_sub(slots);
        }
    }

    fn push_completion(&mut self, cq_id: usize, completion: Completion) {
        let Some(cq) = self.cqs.get_mut(&cq_id) else {
            rio_warn!("completion for closed cq {:#x} dropped", cq_id);
            return;
        };
        if cq.corrupt {
            return;
        }
        let notify = completion.notify;
        if cq.ring.push(completion).is_err() {
            cq.corrupt = true;
            rio_error!("emulated cq {:#x} overflowed; marked corrupt", cq_id);
            return;
        }
        if cq.armed && notify {
            cq.armed = false;
            if let Some(n) = cq.notification {
                if let Err(e) = event::signal_raw(n.event_handle()) {
                    rio_error!("signal for cq {:#x} failed: {}", cq_id, e);
                }
            }
        }
    }

    /// All-or-nothing validation of a segment list against the registry.
    /// Every segment must be non-empty and inside its registration.
    fn check_segments(&self, bufs: &[RioBuf]) -> Result<(), i32> {
        for b in bufs {
            let region = self.buffers.get(&b.buffer_id.0).ok_or(status::WSAEINVAL)?;
            // A zero-byte receive completion means EOF; empty segments would blur that.
            if b.length == 0 {
                return Err(status::WSAEINVAL);
            }
            if b.offset as u64 + b.length as u64 > region.len as u64 {
                return Err(status::WSAEINVAL);
            }
        }
        Ok(())
    }

    fn submit(
        &mut self,
        rq_id: usize,
        bufs: &[RioBuf],
        flags: u32,
        ctx: u64,
        direction: Direction,
    ) -> Result<(), i32> {
        if flags & !msg_flags::ALL != 0 {
            return Err(status::WSAEINVAL);
        }
        let rq = self.rqs.get(&rq_id).ok_or(status::WSAEINVAL)?;

        if flags & msg_flags::COMMIT_ONLY != 0 {
            if !bufs.is_empty() || flags & msg_flags::DEFER != 0 {
                return Err(status::WSAEINVAL);
            }
            self.start_deferred(rq_id, direction);
            return Ok(());
        }

        let (outstanding, max_outstanding, max_buffers) = match direction {
            Direction::Receive => (
                rq.outstanding_receive,
                rq.limits.max_outstanding_receive,
                rq.limits.max_receive_data_buffers,
            ),
            Direction::Send => (
                rq.outstanding_send,
                rq.limits.max_outstanding_send,
                rq.limits.max_send_data_buffers,
            ),
        };
        if bufs.is_empty() || bufs.len() > max_buffers as usize {
            return Err(status::WSAEINVAL);
        }
        self.check_segments(bufs)?;
        if outstanding >= max_outstanding {
            return Err(status::WSAENOBUFS);
        }

        let request = Request {
            bufs: bufs.to_vec(),
            context: ctx,
            flags,
        };
        let Some(rq) = self.rqs.get_mut(&rq_id) else {
            return Err(status::WSAEINVAL);
        };
        match direction {
            Direction::Receive => rq.outstanding_receive += 1,
            Direction::Send => rq.outstanding_send += 1,
        }

        if flags & msg_flags::DEFER != 0 {
            match direction {
                Direction::Receive => rq.deferred_receives.push(request),
                Direction::Send => rq.deferred_sends.push(request),
            }
            return Ok(());
        }

        self.start_deferred(rq_id, direction);
        self.start(rq_id, request, direction);
        Ok(())
    }

    fn start_deferred(&mut self, rq_id: usize, direction: Direction) {
        let Some(rq) = self.rqs.get_mut(&rq_id) else {
            return;
        };
        let deferred = match direction {
            Direction::Receive => std::mem::take(&mut rq.deferred_receives),
            Direction::Send => std::mem::take(&mut rq.deferred_sends),
        };
        for request in deferred {
            self.start(rq_id, request, direction);
        }
    }

    fn start(&mut self, rq_id: usize, request: Request, direction: Direction) {
        match direction {
            Direction::Send => self.start_send(rq_id, request),
            Direction::Receive => {
                let Some(rq) = self.rqs.get_mut(&rq_id) else {
                    return;
                };
                let socket = rq.socket;
                rq.receives.push_back(request);
                self.pump(socket);
            }
        }
    }

    fn start_send(&mut self, rq_id: usize, request: Request) {
        let Some(rq) = self.rqs.get(&rq_id) else {
            return;
        };
        let (socket, send_cq, socket_context) = (rq.socket, rq.send_cq, rq.context);
        let peer = self.sockets.get(&socket).and_then(|s| s.peer);

        let mut total: u32 = 0;
        let mut status_code = status::WSAECONNRESET;
        if let Some(peer_id) = peer {
            let mut bytes = Vec::new();
            for b in &request.bufs {
                // Registration may have been dropped since submission.
                let Some(region) = self.buffers.get(&b.buffer_id.0) else {
                    continue;
                };
                // Safety: the segment was bounds checked against a live
                // registration, whose memory the caller keeps allocated.
                let src = unsafe {
                    std::slice::from_raw_parts(
                        (region.base + b.offset as usize) as *const u8,
                        b.length as usize,
                    )
                };
                bytes.extend_from_slice(src);
                total = total.saturating_add(b.length);
            }
            if let Some(p) = self.sockets.get_mut(&peer_id) {
                p.inbound.extend(bytes);
                status_code = 0;
            }
        }

        self.push_completion(
            send_cq,
            Completion {
                result: RioResult {
                    status: status_code,
                    bytes_transferred: if status_code == 0 { total } else { 0 },
                    socket_context,
                    request_context: request.context,
                },
                rq: rq_id,
                direction: Direction::Send,
                notify: request.flags & msg_flags::DONT_NOTIFY == 0,
            },
        );

        if let (Some(peer_id), 0) = (peer, status_code) {
            self.pump(peer_id);
        }
    }

    /// Complete posted receives on `socket` from its inbound stream.
    fn pump(&mut self, socket: usize) {
        loop {
            let Some(sock) = self.sockets.get(&socket) else {
                return;
            };
            let Some(rq_id) = sock.rq else {
                return;
            };
            if sock.inbound.is_empty() && !sock.peer_closed {
                return;
            }
            let Some(rq) = self.rqs.get_mut(&rq_id) else {
                return;
            };
            let Some(request) = rq.receives.pop_front() else {
                return;
            };
            let (receive_cq, socket_context) = (rq.receive_cq, rq.context);

            let mut total: u32 = 0;
            if let Some(sock) = self.sockets.get_mut(&socket) {
                for b in &request.bufs {
                    if sock.inbound.is_empty() {
                        break;
                    }
                    let Some(region) = self.buffers.get(&b.buffer_id.0) else {
                        continue;
                    };
                    let n = (b.length as usize).min(sock.inbound.len());
                    let dst = (region.base + b.offset as usize) as *mut u8;
                    for (i, byte) in sock.inbound.drain(..n).enumerate() {
                        // Safety: bounds checked at submission; `i < length`.
                        unsafe { dst.add(i).write(byte) };
                    }
                    total = total.saturating_add(n as u32);
                }
            }

            self.push_completion(
                receive_cq,
                Completion {
                    result: RioResult {
                        status: 0,
                        bytes_transferred: total,
                        socket_context,
                        request_context: request.context,
                    },
                    rq: rq_id,
                    direction: Direction::Receive,
                    notify: request.flags & msg_flags::DONT_NOTIFY == 0,
                },
            );
        }
    }
}

impl RioExtension for EmulatedRio {
    unsafe fn register_buffer(&self, ptr: *mut u8, len: u32) -> BufferId {
        if ptr.is_null() || len == 0 {
            set_last_error(status::WSAEINVAL);
            return BufferId::INVALID;
        }
        let mut st = self.lock();
        let id = st.alloc_handle();
        st.buffers.insert(
            id,
            Region {
                base: ptr as usize,
                len,
            },
        );
        rio_trace!("emulated buffer {:#x} registered ({} bytes)", id, len);
        BufferId(id)
    }

    fn deregister_buffer(&self, id: BufferId) {
        let removed = self.lock().buffers.remove(&id.0).is_some();
        debug_assert!(removed, "buffer {:#x} deregistered twice or never registered", id.0);
        if !removed {
            rio_warn!("deregister of unknown buffer {:#x}", id.0);
        }
    }

    fn create_completion_queue(
        &self,
        capacity: u32,
        notification: Option<&NotificationCompletion>,
    ) -> RawCq {
        if capacity == 0 {
            set_last_error(status::WSAEINVAL);
            return RawCq::INVALID;
        }
        if capacity > MAX_CQ_CAPACITY {
            set_last_error(status::WSAENOBUFS);
            return RawCq::INVALID;
        }
        if let Some(n) = notification {
            if n.kind != RIO_EVENT_COMPLETION {
                set_last_error(status::WSAEOPNOTSUPP);
                return RawCq::INVALID;
            }
        }
        let mut st = self.lock();
        let id = st.alloc_handle();
        st.cqs.insert(
            id,
            CqState {
                ring: ArrayQueue::new(capacity as usize),
                reserved: 0,
                notification: notification.copied(),
                armed: false,
                corrupt: false,
            },
        );
        RawCq(id)
    }

    fn close_completion_queue(&self, cq: RawCq) {
        let mut st = self.lock();
        if st.cqs.remove(&cq.0).is_none() {
            rio_warn!("close of unknown cq {:#x}", cq.0);
            return;
        }
        if st
            .rqs
            .values()
            .any(|rq| rq.receive_cq == cq.0 || rq.send_cq == cq.0)
        {
            rio_warn!("cq {:#x} closed while a request queue still uses it", cq.0);
        }
        // Records of closed queues went down with the ring.
        st.draining.retain(|_, d| {
            if d.receive_cq == cq.0 {
                d.receive = 0;
            }
            if d.send_cq == cq.0 {
                d.send = 0;
            }
            d.receive + d.send > 0
        });
    }

    fn notify(&self, cq: RawCq) -> i32 {
        let mut st = self.lock();
        let Some(q) = st.cqs.get_mut(&cq.0) else {
            return status::WSAEINVAL;
        };
        let Some(n) = q.notification else {
            return status::WSAEINVAL;
        };
        if q.armed {
            return status::WSAEALREADY;
        }
        if n.notify_reset != 0 {
            if let Err(e) = event::reset_raw(n.event_handle()) {
                return e.status().unwrap_or(status::WSAEINVAL);
            }
        }
        if q.ring.is_empty() {
            q.armed = true;
            return 0;
        }
        // Completions already waiting: fire now, stay disarmed.
        match event::signal_raw(n.event_handle()) {
            Ok(()) => 0,
            Err(e) => e.status().unwrap_or(status::WSAEINVAL),
        }
    }

    fn create_request_queue(
        &self,
        socket: RawSocket,
        limits: &QueueLimits,
        receive_cq: RawCq,
        send_cq: RawCq,
        context: SocketContext,
    ) -> RawRq {
        let mut st = self.lock();
        let fail = |code| {
            set_last_error(code);
            RawRq::INVALID
        };

        match st.sockets.get(&socket.0) {
            None => return fail(status::WSAENOTSOCK),
            Some(s) if s.rq.is_some() => return fail(status::WSAEINVAL),
            Some(_) => {}
        }
        if limits.completion_slots() == 0
            || (limits.max_outstanding_receive > 0 && limits.max_receive_data_buffers == 0)
            || (limits.max_outstanding_send > 0 && limits.max_send_data_buffers == 0)
        {
            return fail(status::WSAEINVAL);
        }

        if receive_cq == send_cq {
            match st.free_slots(receive_cq.0) {
                None => return fail(status::WSAEINVAL),
                Some(f) if f < limits.completion_slots() => return fail(status::WSAENOBUFS),
                Some(_) => {}
            }
        } else {
            match (st.free_slots(receive_cq.0), st.free_slots(send_cq.0)) {
                (Some(r), Some(s)) => {
                    if r < limits.max_outstanding_receive as u64
                        || s < limits.max_outstanding_send as u64
                    {
                        return fail(status::WSAENOBUFS);
                    }
                }
                _ => return fail(status::WSAEINVAL),
            }
        }

        let id = st.alloc_handle();
        let rq = RqState {
            socket: socket.0,
            receive_cq: receive_cq.0,
            send_cq: send_cq.0,
            context: context.0,
            limits: *limits,
            outstanding_receive: 0,
            outstanding_send: 0,
            receives: VecDeque::new(),
            deferred_receives: Vec::new(),
            deferred_sends: Vec::new(),
        };
        if receive_cq == send_cq {
            if let Some(q) = st.cqs.get_mut(&receive_cq.0) {
                q.reserved += limits.completion_slots();
            }
        } else {
            if let Some(q) = st.cqs.get_mut(&receive_cq.0) {
                q.reserved += limits.max_outstanding_receive as u64;
            }
            if let Some(q) = st.cqs.get_mut(&send_cq.0) {
                q.reserved += limits.max_outstanding_send as u64;
            }
        }
        st.rqs.insert(id, rq);
        if let Some(s) = st.sockets.get_mut(&socket.0) {
            s.rq = Some(id);
        }
        // Data may have arrived before the queue existed.
        st.pump(socket.0);
        RawRq(id)
    }

    fn dequeue_completion(&self, cq: RawCq, results: &mut [RioResult]) -> u32 {
        let mut st = self.lock();
        let State {
            cqs, rqs, draining, ..
        } = &mut *st;
        let Some(q) = cqs.get_mut(&cq.0) else {
            set_last_error(status::WSAEINVAL);
            return RIO_CORRUPT_CQ;
        };
        if q.corrupt {
            return RIO_CORRUPT_CQ;
        }

        let mut count = 0;
        while count < results.len() {
            let Some(c) = q.ring.pop() else {
                break;
            };
            if let Some(rq) = rqs.get_mut(&c.rq) {
                match c.direction {
                    Direction::Receive => {
                        rq.outstanding_receive = rq.outstanding_receive.saturating_sub(1)
                    }
                    Direction::Send => rq.outstanding_send = rq.outstanding_send.saturating_sub(1),
                }
            } else if let Some(d) = draining.get_mut(&c.rq) {
                match c.direction {
                    Direction::Receive => d.receive = d.receive.saturating_sub(1),
                    Direction::Send => d.send = d.send.saturating_sub(1),
                }
                q.reserved = q.reserved.saturating_sub(1);
                if d.receive == 0 && d.send == 0 {
                    draining.remove(&c.rq);
                }
            }
            results[count] = c.result;
            count += 1;
        }
        count as u32
    }

    unsafe fn send(&self, rq: RawRq, bufs: &[RioBuf], flags: u32, ctx: RequestContext) -> bool {
        self.submit(rq, bufs, flags, ctx, Direction::Send)
    }

    unsafe fn receive(
        &self,
        rq: RawRq,
        bufs: &[RioBuf],
        flags: u32,
        ctx: RequestContext,
    ) -> bool {
        self.submit(rq, bufs, flags, ctx, Direction::Receive)
    }

    fn last_error(&self) -> i32 {
        LAST_ERROR.with(|c| c.get())
    }
}

/// One end of an emulated connected socket pair. Closed on drop.
pub struct EmulatedSocket {
    rio: Arc<EmulatedRio>,
    raw: RawSocket,
}

impl RioSocket for EmulatedSocket {
    fn raw_socket(&self) -> RawSocket {
        self.raw
    }
}

impl Drop for EmulatedSocket {
    fn drop(&mut self) {
        self.rio.close_socket(self.raw);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits(recv: u32, send: u32) -> QueueLimits {
        QueueLimits {
            max_outstanding_receive: recv,
            max_receive_data_buffers: 2,
            max_outstanding_send: send,
            max_send_data_buffers: 2,
        }
    }

    fn drain(rio: &EmulatedRio, cq: RawCq) -> Vec<RioResult> {
        let mut out = [RioResult::default(); 32];
        let n = rio.dequeue_completion(cq, &mut out);
        assert_ne!(n, RIO_CORRUPT_CQ);
        out[..n as usize].to_vec()
    }

    #[test]
    fn test_register_rejects_bad_args() {
        let rio = EmulatedRio::new();
        let id = unsafe { rio.register_buffer(std::ptr::null_mut(), 16) };
        assert!(id.is_invalid());
        assert_eq!(rio.last_error(), status::WSAEINVAL);

        let mut mem = [0u8; 4];
        let id = unsafe { rio.register_buffer(mem.as_mut_ptr(), 0) };
        assert!(id.is_invalid());
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "deregistered twice")]
    fn test_double_deregister_asserts() {
        let rio = EmulatedRio::new();
        let mut mem = vec![0u8; 64];
        let id = unsafe { rio.register_buffer(mem.as_mut_ptr(), 64) };
        rio.deregister_buffer(id);
        rio.deregister_buffer(id);
    }

    #[test]
    fn test_send_receive_roundtrip() {
        let rio = Arc::new(EmulatedRio::new());
        let (a, b) = rio.socket_pair();
        let cq = rio.create_completion_queue(16, None);

        let mut mem = vec![0u8; 64];
        mem[..5].copy_from_slice(b"hello");
        let id = unsafe { rio.register_buffer(mem.as_mut_ptr(), 64) };

        let rq_a = rio.create_request_queue(a.raw_socket(), &limits(4, 4), cq, cq, SocketContext(1));
        let rq_b = rio.create_request_queue(b.raw_socket(), &limits(4, 4), cq, cq, SocketContext(2));
        assert!(!rq_a.is_invalid() && !rq_b.is_invalid());

        let recv_seg = RioBuf { buffer_id: id, offset: 32, length: 32 };
        let send_seg = RioBuf { buffer_id: id, offset: 0, length: 5 };
        unsafe {
            assert!(rio.receive(rq_b, &[recv_seg], 0, RequestContext(20)));
            assert!(rio.send(rq_a, &[send_seg], 0, RequestContext(10)));
        }

        let results = drain(&rio, cq);
        assert_eq!(results.len(), 2);
        let send = results.iter().find(|r| r.request_context == 10).unwrap();
        assert_eq!((send.status, send.bytes_transferred, send.socket_context), (0, 5, 1));
        let recv = results.iter().find(|r| r.request_context == 20).unwrap();
        assert_eq!((recv.status, recv.bytes_transferred, recv.socket_context), (0, 5, 2));
        assert_eq!(&mem[32..37], b"hello");

        drop(a);
        drop(b);
        rio.close_completion_queue(cq);
        rio.deregister_buffer(id);
    }

    #[test]
    fn test_receive_before_queue_gets_buffered_data() {
        let rio = Arc::new(EmulatedRio::new());
        let (a, b) = rio.socket_pair();
        let cq = rio.create_completion_queue(8, None);
        let mut mem = vec![7u8; 8];
        let id = unsafe { rio.register_buffer(mem.as_mut_ptr(), 8) };

        let rq_a = rio.create_request_queue(a.raw_socket(), &limits(0, 2), cq, cq, SocketContext(1));
        let seg = RioBuf { buffer_id: id, offset: 0, length: 4 };
        unsafe { assert!(rio.send(rq_a, &[seg], 0, RequestContext(1))) };

        let rq_b = rio.create_request_queue(b.raw_socket(), &limits(2, 0), cq, cq, SocketContext(2));
        let seg = RioBuf { buffer_id: id, offset: 4, length: 4 };
        unsafe { assert!(rio.receive(rq_b, &[seg], 0, RequestContext(2))) };

        let results = drain(&rio, cq);
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.is_ok() && r.bytes_transferred == 4));
        drop((a, b));
        rio.deregister_buffer(id);
        rio.close_completion_queue(cq);
    }

    #[test]
    fn test_out_of_bounds_segment_rejected() {
        let rio = Arc::new(EmulatedRio::new());
        let (a, _b) = rio.socket_pair();
        let cq = rio.create_completion_queue(8, None);
        let mut mem = vec![0u8; 16];
        let id = unsafe { rio.register_buffer(mem.as_mut_ptr(), 16) };
        let rq = rio.create_request_queue(a.raw_socket(), &limits(2, 2), cq, cq, SocketContext(0));

        let good = RioBuf { buffer_id: id, offset: 0, length: 8 };
        let bad = RioBuf { buffer_id: id, offset: 12, length: 8 };
        unsafe { assert!(!rio.send(rq, &[good, bad], 0, RequestContext(1))) };
        assert_eq!(rio.last_error(), status::WSAEINVAL);
        // Nothing was partially submitted.
        assert!(drain(&rio, cq).is_empty());
        rio.deregister_buffer(id);
    }

    #[test]
    fn test_empty_segment_rejected() {
        let rio = Arc::new(EmulatedRio::new());
        let (a, _b) = rio.socket_pair();
        let cq = rio.create_completion_queue(8, None);
        let mut mem = vec![0u8; 16];
        let id = unsafe { rio.register_buffer(mem.as_mut_ptr(), 16) };
        let rq = rio.create_request_queue(a.raw_socket(), &limits(2, 2), cq, cq, SocketContext(0));

        let good = RioBuf { buffer_id: id, offset: 0, length: 8 };
        let empty = RioBuf { buffer_id: id, offset: 8, length: 0 };
        unsafe {
            assert!(!rio.send(rq, &[good, empty], 0, RequestContext(1)));
            assert_eq!(rio.last_error(), status::WSAEINVAL);
            assert!(!rio.receive(rq, &[empty], 0, RequestContext(2)));
            assert_eq!(rio.last_error(), status::WSAEINVAL);
        }
        assert!(drain(&rio, cq).is_empty());

        // Both slots per direction are still free.
        unsafe {
            assert!(rio.send(rq, &[good], 0, RequestContext(3)));
            assert!(rio.send(rq, &[good], 0, RequestContext(4)));
        }
        assert_eq!(drain(&rio, cq).len(), 2);
        rio.deregister_buffer(id);
    }

    #[test]
    fn test_cq_reservation() {
        let rio = Arc::new(EmulatedRio::new());
        let (a, b) = rio.socket_pair();
        let cq = rio.create_completion_queue(8, None);

        let rq = rio.create_request_queue(a.raw_socket(), &limits(4, 4), cq, cq, SocketContext(0));
        assert!(!rq.is_invalid());
        let rq2 = rio.create_request_queue(b.raw_socket(), &limits(1, 0), cq, cq, SocketContext(0));
        assert!(rq2.is_invalid());
        assert_eq!(rio.last_error(), status::WSAENOBUFS);

        // Closing the first socket frees its slots.
        drop(a);
        let rq2 = rio.create_request_queue(b.raw_socket(), &limits(1, 0), cq, cq, SocketContext(0));
        assert!(!rq2.is_invalid());
    }

    #[test]
    fn test_closed_queue_holds_slots_until_drained() {
        let rio = Arc::new(EmulatedRio::new());
        let (a, b) = rio.socket_pair();
        let (c, _d) = rio.socket_pair();
        let cq = rio.create_completion_queue(4, None);
        let mut mem = vec![1u8; 16];
        let id = unsafe { rio.register_buffer(mem.as_mut_ptr(), 16) };
        let seg = RioBuf { buffer_id: id, offset: 0, length: 4 };

        let rq_a = rio.create_request_queue(a.raw_socket(), &limits(0, 4), cq, cq, SocketContext(1));
        for ctx in 1..=4 {
            unsafe { assert!(rio.send(rq_a, &[seg], 0, RequestContext(ctx))) };
        }
        // Four completions are queued and stay there after the close.
        drop(a);
        let rq_c = rio.create_request_queue(c.raw_socket(), &limits(0, 1), cq, cq, SocketContext(2));
        assert!(rq_c.is_invalid());
        assert_eq!(rio.last_error(), status::WSAENOBUFS);

        let mut out = [RioResult::default(); 2];
        assert_eq!(rio.dequeue_completion(cq, &mut out), 2);
        let rq_c = rio.create_request_queue(c.raw_socket(), &limits(0, 2), cq, cq, SocketContext(2));
        assert!(!rq_c.is_invalid());
        unsafe {
            assert!(rio.send(rq_c, &[seg], 0, RequestContext(5)));
            assert!(rio.send(rq_c, &[seg], 0, RequestContext(6)));
        }

        let mut ctxs: Vec<u64> = drain(&rio, cq).iter().map(|r| r.request_context).collect();
        ctxs.sort_unstable();
        assert_eq!(ctxs, vec![3, 4, 5, 6]);
        let mut out = [RioResult::default(); 4];
        assert_ne!(rio.dequeue_completion(cq, &mut out), RIO_CORRUPT_CQ);
        drop(b);
        rio.deregister_buffer(id);
    }

    #[test]
    fn test_second_queue_on_socket_rejected() {
        let rio = Arc::new(EmulatedRio::new());
        let (a, _b) = rio.socket_pair();
        let cq = rio.create_completion_queue(16, None);
        let first = rio.create_request_queue(a.raw_socket(), &limits(1, 1), cq, cq, SocketContext(0));
        assert!(!first.is_invalid());
        let second = rio.create_request_queue(a.raw_socket(), &limits(1, 1), cq, cq, SocketContext(0));
        assert!(second.is_invalid());
        assert_eq!(rio.last_error(), status::WSAEINVAL);

        let unknown =
            rio.create_request_queue(RawSocket(9999), &limits(1, 1), cq, cq, SocketContext(0));
        assert!(unknown.is_invalid());
        assert_eq!(rio.last_error(), status::WSAENOTSOCK);
    }

    #[test]
    fn test_close_aborts_pending_and_signals_eof() {
        let rio = Arc::new(EmulatedRio::new());
        let (a, b) = rio.socket_pair();
        let cq = rio.create_completion_queue(16, None);
        let mut mem = vec![0u8; 32];
        let id = unsafe { rio.register_buffer(mem.as_mut_ptr(), 32) };
        let rq_a = rio.create_request_queue(a.raw_socket(), &limits(2, 2), cq, cq, SocketContext(1));
        let rq_b = rio.create_request_queue(b.raw_socket(), &limits(2, 2), cq, cq, SocketContext(2));

        let seg_a = RioBuf { buffer_id: id, offset: 0, length: 16 };
        let seg_b = RioBuf { buffer_id: id, offset: 16, length: 16 };
        unsafe {
            assert!(rio.receive(rq_a, &[seg_a], 0, RequestContext(100)));
            assert!(rio.receive(rq_b, &[seg_b], 0, RequestContext(200)));
        }
        assert!(drain(&rio, cq).is_empty());

        drop(a);
        let results = drain(&rio, cq);
        assert_eq!(results.len(), 2);
        let aborted = results.iter().find(|r| r.request_context == 100).unwrap();
        assert_eq!(aborted.status, status::ERROR_OPERATION_ABORTED);
        let eof = results.iter().find(|r| r.request_context == 200).unwrap();
        assert_eq!((eof.status, eof.bytes_transferred), (0, 0));

        // The closed queue accepts nothing more.
        unsafe { assert!(!rio.send(rq_a, &[seg_a], 0, RequestContext(1))) };
        // Sending to a closed peer fails in-band.
        unsafe { assert!(rio.send(rq_b, &[seg_b], 0, RequestContext(300))) };
        let results = drain(&rio, cq);
        assert_eq!(results[0].status, status::WSAECONNRESET);
        drop(b);
        rio.deregister_buffer(id);
    }

    #[test]
    fn test_defer_then_commit() {
        let rio = Arc::new(EmulatedRio::new());
        let (a, _b) = rio.socket_pair();
        let cq = rio.create_completion_queue(8, None);
        let mut mem = vec![1u8; 8];
        let id = unsafe { rio.register_buffer(mem.as_mut_ptr(), 8) };
        let rq = rio.create_request_queue(a.raw_socket(), &limits(1, 4), cq, cq, SocketContext(0));
        let seg = RioBuf { buffer_id: id, offset: 0, length: 8 };

        unsafe {
            assert!(rio.send(rq, &[seg], msg_flags::DEFER, RequestContext(1)));
            assert!(rio.send(rq, &[seg], msg_flags::DEFER, RequestContext(2)));
        }
        assert!(drain(&rio, cq).is_empty());

        unsafe {
            assert!(!rio.send(rq, &[seg], msg_flags::COMMIT_ONLY, RequestContext(0)));
            assert!(rio.send(rq, &[], msg_flags::COMMIT_ONLY, RequestContext(0)));
        }
        let mut ctxs: Vec<u64> = drain(&rio, cq).iter().map(|r| r.request_context).collect();
        ctxs.sort_unstable();
        assert_eq!(ctxs, vec![1, 2]);
        rio.deregister_buffer(id);
    }

    #[test]
    fn test_corrupt_queue_sentinel() {
        let rio = EmulatedRio::new();
        let cq = rio.create_completion_queue(4, None);
        assert!(drain(&rio, cq).is_empty());
        rio.corrupt_completion_queue(cq);
        let mut out = [RioResult::default(); 4];
        assert_eq!(rio.dequeue_completion(cq, &mut out), RIO_CORRUPT_CQ);
        assert_eq!(rio.dequeue_completion(cq, &mut out), RIO_CORRUPT_CQ);
    }

    #[test]
    fn test_notify_without_event_rejected() {
        let rio = EmulatedRio::new();
        let cq = rio.create_completion_queue(4, None);
        assert_eq!(rio.notify(cq), status::WSAEINVAL);
        assert_eq!(rio.notify(RawCq(777)), status::WSAEINVAL);
    }
}
