//! RIO End-to-End Smoke Test
//!
//! Exercises the full stack on the emulated provider:
//!   Part A — Provider: fixed layouts, instance config
//!   Part B — Buffer registry
//!   Part C — Completion queue: notify/wait cycle, corruption latch
//!   Part D — Request queue: limits, send/receive, close
//!   Part E — System provider (Windows only)
//!
//! Run: ./target/release/rio-smoke
//! Sizes come from RIO_* environment variables; RIO_LOG_LEVEL=debug shows
//! queue lifecycle.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use rio_core::config::RioConfig;
use rio_core::entry::{
    msg_flags, QueueLimits, RequestContext, RioBuf, RioResult, SocketContext,
};
use rio_core::error::{status, RioError};
use rio_core::klog;

use rio_module::completion_queue::CompletionQueue;
use rio_module::emulated::EmulatedRio;
use rio_module::instance::{EmulatedInstance, InstanceBuilder};
use rio_module::request_queue::RequestQueue;
use rio_module::winsock_sys;

// ── Test harness ──

struct TestRunner {
    total: usize,
    passed: usize,
    failed: usize,
}

const LINE: &str = "────────────────────────────────────────────────────────────";

impl TestRunner {
    fn new() -> Self {
        Self { total: 0, passed: 0, failed: 0 }
    }

    fn section(&self, name: &str) {
        println!("\n{}", LINE);
        println!("  {}", name);
        println!("{}", LINE);
    }

    fn pass(&mut self, name: &str) {
        self.total += 1;
        self.passed += 1;
        println!("  [{:2}] {:<52} PASS", self.total, name);
    }

    fn fail(&mut self, name: &str, reason: &str) {
        self.total += 1;
        self.failed += 1;
        println!("  [{:2}] {:<52} FAIL: {}", self.total, name, reason);
    }

    fn check(&mut self, name: &str, ok: bool, reason: &str) {
        if ok { self.pass(name); } else { self.fail(name, reason); }
    }

    fn summary(&self) {
        println!("\n{}", LINE);
        println!(
            "  Total: {}  Passed: {}  Failed: {}",
            self.total, self.passed, self.failed
        );
        println!("{}", LINE);
    }
}

fn send_limits(n: u32) -> QueueLimits {
    QueueLimits {
        max_outstanding_receive: 1,
        max_receive_data_buffers: 1,
        max_outstanding_send: n,
        max_send_data_buffers: 1,
    }
}

// ════════════════════════════════════════════════════════════
// Part A: Provider
// ════════════════════════════════════════════════════════════

fn test_provider(t: &mut TestRunner, inst: &EmulatedInstance) {
    t.section("Part A: Provider");

    t.check(
        &format!("RIORESULT size = {}", std::mem::size_of::<RioResult>()),
        std::mem::size_of::<RioResult>() == 24,
        "expected 24",
    );
    t.check(
        &format!("extension table size = {}", winsock_sys::EXTENSION_TABLE_SIZE),
        winsock_sys::EXTENSION_TABLE_SIZE == 14 * std::mem::size_of::<usize>(),
        "layout mismatch",
    );

    let c = inst.config();
    t.check(
        &format!(
            "config: cq={} recv={} send={} batch={}",
            c.cq_capacity,
            c.limits.max_outstanding_receive,
            c.limits.max_outstanding_send,
            c.dequeue_batch
        ),
        c.validate().is_ok(),
        "invalid config",
    );

    let bad = InstanceBuilder::new()
        .config(RioConfig::new().cq_capacity(0))
        .build_emulated();
    t.check(
        "zero-capacity config rejected",
        matches!(bad, Err(RioError::InvalidArgument(_))),
        "accepted",
    );
}

// ════════════════════════════════════════════════════════════
// Part B: Buffer registry
// ════════════════════════════════════════════════════════════

fn test_buffers(t: &mut TestRunner, inst: &EmulatedInstance) {
    t.section("Part B: Buffer Registry");
    let rio = inst.rio();

    match inst.register_buffer(4096) {
        Ok(buf) => {
            t.check("register 4096 bytes", !buf.id().is_invalid(), "invalid id");
            t.check("registry holds 1 buffer", rio.registered_buffers() == 1, "count");
            t.check(
                "segment(3840, 256) in bounds",
                buf.segment(3840, 256).is_ok(),
                "rejected",
            );
            t.check(
                "segment(3841, 256) out of bounds",
                buf.segment(3841, 256).is_err(),
                "accepted",
            );
            let memory = buf.deregister();
            t.check(
                "deregister returns memory",
                memory.len() == 4096 && rio.registered_buffers() == 0,
                "registry not empty",
            );
        }
        Err(e) => t.fail("register 4096 bytes", &e.to_string()),
    }

    t.check(
        "zero-length registration rejected",
        matches!(inst.register_buffer(0), Err(RioError::InvalidArgument(_))),
        "accepted",
    );
}

// ════════════════════════════════════════════════════════════
// Part C: Completion queue
// ════════════════════════════════════════════════════════════

fn test_completion_queue(t: &mut TestRunner, inst: &EmulatedInstance) {
    t.section("Part C: Completion Queue");
    let rio = inst.rio();

    let cq = match inst.completion_queue() {
        Ok(cq) => { t.pass("create polled queue"); cq }
        Err(e) => { t.fail("create polled queue", &e.to_string()); return; }
    };
    let mut out = inst.completion_buffer();
    t.check(
        "dequeue on empty queue = 0",
        matches!(cq.dequeue(&mut out), Ok(0)),
        "non-zero",
    );
    t.check(
        "notify without waitable rejected",
        matches!(cq.notify(), Err(RioError::InvalidArgument(_))),
        "accepted",
    );

    rio.corrupt_completion_queue(cq.raw());
    let first = cq.dequeue(&mut out);
    let second = cq.dequeue(&mut out);
    t.check(
        "corrupt queue latches",
        first == Err(RioError::CorruptQueue) && second == Err(RioError::CorruptQueue),
        &format!("{:?} / {:?}", first, second),
    );
    drop(cq);
    t.check("queue closed on drop", rio.open_completion_queues() == 0, "still open");

    test_notification(t, inst);
}

#[cfg(any(target_os = "linux", target_os = "android", windows))]
fn test_notification(t: &mut TestRunner, inst: &EmulatedInstance) {
    use rio_core::waitable::Waitable;
    use rio_module::event::WaitEvent;

    let short = Some(Duration::from_millis(20));
    let event: Arc<dyn Waitable> = match WaitEvent::create() {
        Ok(e) => Arc::new(e),
        Err(e) => { t.fail("create wait event", &e.to_string()); return; }
    };
    let cq = match inst.completion_queue_with_event(event) {
        Ok(cq) => cq,
        Err(e) => { t.fail("create event queue", &e.to_string()); return; }
    };

    let armed = cq.notify();
    let woke = cq.wait(short);
    t.check(
        "notify on empty queue: no signal",
        armed.is_ok() && matches!(woke, Ok(false)),
        &format!("{:?} / {:?}", armed, woke),
    );
    t.check(
        "second notify = WSAEALREADY",
        cq.notify() == Err(RioError::Notify(status::WSAEALREADY)),
        "not rejected",
    );

    let (sa, sb) = inst.rio().socket_pair();
    let mut rq = match RequestQueue::create(sa, &cq, SocketContext(1), send_limits(2)) {
        Ok(rq) => rq,
        Err(e) => { t.fail("request queue on event cq", &e.to_string()); return; }
    };
    let buf = match inst.register_buffer(64) {
        Ok(b) => b,
        Err(e) => { t.fail("register 64 bytes", &e.to_string()); return; }
    };
    let seg = buf.full_segment();
    let sent = unsafe { rq.send(&[seg], 0, RequestContext(1)) };
    t.check(
        "completion fires armed event once",
        sent.is_ok() && matches!(cq.wait(short), Ok(true)) && matches!(cq.wait(short), Ok(false)),
        "signal count",
    );

    // Not re-armed: the next completion must not signal.
    let sent = unsafe { rq.send(&[seg], 0, RequestContext(2)) };
    t.check(
        "no signal without re-notify",
        sent.is_ok() && matches!(cq.wait(short), Ok(false)),
        "spurious signal",
    );

    let mut out = [RioResult::default(); 8];
    let n = cq.poll(&mut out, short);
    t.check("poll drains queued records", matches!(n, Ok(2)), &format!("{:?}", n));
    drop(rq);
    drop(sb);
}

#[cfg(not(any(target_os = "linux", target_os = "android", windows)))]
fn test_notification(t: &mut TestRunner, _inst: &EmulatedInstance) {
    t.pass("event notification skipped (no wait events on this platform)");
}

// ════════════════════════════════════════════════════════════
// Part D: Request queue
// ════════════════════════════════════════════════════════════

/// Waitable for the send scenario's queue, where the platform has one.
#[cfg(any(target_os = "linux", target_os = "android", windows))]
fn scenario_event() -> Option<Arc<dyn rio_core::waitable::Waitable>> {
    match rio_module::event::WaitEvent::create() {
        Ok(e) => Some(Arc::new(e)),
        Err(_) => None,
    }
}

#[cfg(not(any(target_os = "linux", target_os = "android", windows)))]
fn scenario_event() -> Option<Arc<dyn rio_core::waitable::Waitable>> {
    None
}

fn test_request_queue(t: &mut TestRunner, inst: &EmulatedInstance) {
    t.section("Part D: Request Queue");
    let rio = inst.rio();

    let cq = match CompletionQueue::create(Arc::clone(rio), 16, scenario_event()) {
        Ok(cq) => cq,
        Err(e) => { t.fail("create cq(16)", &e.to_string()); return; }
    };
    let buf = match inst.register_buffer(4096) {
        Ok(b) => b,
        Err(e) => { t.fail("register 4096 bytes", &e.to_string()); return; }
    };
    let segs = buf.segments(256);

    let (sa, sb) = rio.socket_pair();
    let mut a = match RequestQueue::create(sa, &cq, SocketContext(0xA), send_limits(4)) {
        Ok(rq) => { t.pass("create rq (send 4)"); rq }
        Err(e) => { t.fail("create rq (send 4)", &e.to_string()); return; }
    };
    if cq.has_event() {
        t.check("arm cq before sends", cq.notify().is_ok(), "notify failed");
    }

    let mut accepted = 0;
    for (i, seg) in segs.iter().take(4).enumerate() {
        if unsafe { a.send(&[*seg], 0, RequestContext(i as u64 + 1)) }.is_ok() {
            accepted += 1;
        }
    }
    t.check("4 sends accepted", accepted == 4, &format!("{} accepted", accepted));

    let fifth = unsafe { a.send(&[segs[4]], 0, RequestContext(5)) };
    t.check(
        "5th send = Submit(WSAENOBUFS)",
        fifth == Err(RioError::Submit(status::WSAENOBUFS)),
        &format!("{:?}", fifth),
    );

    if cq.has_event() {
        let woke = cq.wait(Some(Duration::from_secs(1)));
        t.check("wait on armed cq = Ok(true)", matches!(woke, Ok(true)), &format!("{:?}", woke));
    }

    let mut out = [RioResult::default(); 16];
    match cq.dequeue(&mut out) {
        Ok(n) => {
            let all = &out[..n];
            let ctx: HashSet<u64> = all.iter().map(|r| r.request_context).collect();
            t.check(
                "one dequeue: 4 completions, contexts {1,2,3,4}",
                n == 4 && ctx == HashSet::from([1, 2, 3, 4]),
                &format!("{} records {:?}", n, ctx),
            );
            t.check(
                "status 0, 256 bytes each",
                all.iter().all(|r| r.is_ok() && r.bytes_transferred == 256),
                "bad record",
            );
        }
        Err(e) => t.fail("dequeue", &e.to_string()),
    }

    let mut b = match RequestQueue::create(sb, &cq, SocketContext(0xB), send_limits(4)) {
        Ok(rq) => rq,
        Err(e) => { t.fail("create peer rq", &e.to_string()); return; }
    };
    // The peer already holds 1024 buffered bytes; one receive takes 256.
    let recv = unsafe { b.receive(&[segs[8]], 0, RequestContext(100)) };
    let all = cq.drain_all(8).unwrap_or_default();
    t.check(
        "receive completes from buffered stream",
        recv.is_ok() && all.len() == 1 && all[0].bytes_transferred == 256,
        &format!("{:?} / {} records", recv, all.len()),
    );

    let deferred = unsafe { a.send(&[segs[0]], msg_flags::DEFER, RequestContext(6)) };
    let before = cq.drain_all(8).unwrap_or_default().len();
    let commit = a.commit_sends();
    let after = cq.drain_all(8).unwrap_or_default().len();
    t.check(
        "DEFER holds until commit",
        deferred.is_ok() && commit.is_ok() && before == 0 && after == 1,
        &format!("before={} after={}", before, after),
    );

    let empty: [RioBuf; 0] = [];
    t.check(
        "empty segment list rejected",
        matches!(unsafe { a.send(&empty, 0, RequestContext(7)) }, Err(RioError::InvalidArgument(_))),
        "accepted",
    );

    // Take everything `b` has buffered so its next receive stays pending.
    let r1 = unsafe { b.receive(&[buf.full_segment()], 0, RequestContext(200)) };
    let drained = cq.drain_all(8).unwrap_or_default();
    t.check(
        "large receive takes the whole stream",
        r1.is_ok() && drained.len() == 1 && drained[0].bytes_transferred == 1024,
        &format!("{:?}", drained.first()),
    );

    // Close: pending receive on `a` is aborted, `b` sees EOF.
    let r2 = unsafe { a.receive(&[segs[10]], 0, RequestContext(201)) };
    let r3 = unsafe { b.receive(&[segs[11]], 0, RequestContext(202)) };
    drop(a);
    let all = cq.drain_all(8).unwrap_or_default();
    let aborted = all
        .iter()
        .any(|r| r.request_context == 201 && r.status == status::ERROR_OPERATION_ABORTED);
    let eof = all
        .iter()
        .any(|r| r.request_context == 202 && r.is_ok() && r.bytes_transferred == 0);
    t.check(
        "close aborts pending (995), peer gets EOF",
        r2.is_ok() && r3.is_ok() && aborted && eof,
        &format!("{} records", all.len()),
    );

    drop(b);
    drop(cq);
    drop(buf);
    t.check(
        "teardown releases everything",
        rio.open_sockets() == 0
            && rio.open_request_queues() == 0
            && rio.open_completion_queues() == 0
            && rio.registered_buffers() == 0,
        "leak",
    );
}

// ════════════════════════════════════════════════════════════
// Part E: System provider
// ════════════════════════════════════════════════════════════

#[cfg(windows)]
fn test_system(t: &mut TestRunner) {
    use rio_module::instance::SystemInstance;
    use rio_module::winsock::RegisteredSocket;

    t.section("Part E: System Provider (Winsock)");

    let inst = match SystemInstance::system() {
        Ok(i) => { t.pass("RIO extension discovered"); i }
        Err(e) => {
            t.fail("RIO extension discovered", &e.to_string());
            return;
        }
    };
    let buf = inst.register_buffer(4096);
    t.check("RIORegisterBuffer", buf.is_ok(), &format!("{:?}", buf.as_ref().err()));
    let cq = match inst.completion_queue() {
        Ok(cq) => { t.pass("RIOCreateCompletionQueue"); cq }
        Err(e) => { t.fail("RIOCreateCompletionQueue", &e.to_string()); return; }
    };
    match RegisteredSocket::tcp() {
        Ok(s) => {
            let rq = inst.request_queue(s, &cq, SocketContext(1));
            t.check("RIOCreateRequestQueue", rq.is_ok(), &format!("{:?}", rq.as_ref().err()));
        }
        Err(e) => t.fail("WSASocketW(REGISTERED_IO)", &e.to_string()),
    }
    let mut out = inst.completion_buffer();
    t.check("RIODequeueCompletion empty", matches!(cq.dequeue(&mut out), Ok(0)), "non-zero");
}

#[cfg(not(windows))]
fn test_system(t: &mut TestRunner) {
    t.section("Part E: System Provider (Winsock)");
    t.pass("skipped: not Windows");
}

fn main() {
    klog::init();
    println!("=== RIO End-to-End Smoke Test ===");
    println!("    os: {}", std::env::consts::OS);

    let mut t = TestRunner::new();

    let inst = match InstanceBuilder::new().build_with(Arc::new(EmulatedRio::new())) {
        Ok(i) => i,
        Err(e) => {
            println!("\nFATAL: InstanceBuilder failed: {}", e);
            t.summary();
            std::process::exit(1);
        }
    };

    test_provider(&mut t, &inst);
    test_buffers(&mut t, &inst);
    test_completion_queue(&mut t, &inst);
    test_request_queue(&mut t, &inst);
    test_system(&mut t);

    drop(inst);
    t.summary();
    std::process::exit(if t.failed > 0 { 1 } else { 0 });
}
