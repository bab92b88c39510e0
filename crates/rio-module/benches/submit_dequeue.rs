// Submit/dequeue hot path on the emulated provider.
//
// Measures the owning-handle overhead around the function table: one
// send plus the matching dequeue, and a batched variant that fills the
// request queue before draining.

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use rio_core::entry::{QueueLimits, RequestContext, RioResult, SocketContext};
use rio_module::buffer::RegisteredBuffer;
use rio_module::completion_queue::CompletionQueue;
use rio_module::emulated::{EmulatedRio, EmulatedSocket};
use rio_module::request_queue::RequestQueue;

const DEPTH: u32 = 64;

struct Fixture {
    cq: CompletionQueue<EmulatedRio>,
    tx: RequestQueue<EmulatedRio, EmulatedSocket>,
    rx: RequestQueue<EmulatedRio, EmulatedSocket>,
    buf: RegisteredBuffer<EmulatedRio>,
}

fn fixture() -> Fixture {
    let rio = Arc::new(EmulatedRio::new());
    let limits = QueueLimits {
        max_outstanding_receive: DEPTH,
        max_receive_data_buffers: 1,
        max_outstanding_send: DEPTH,
        max_send_data_buffers: 1,
    };
    let cq = CompletionQueue::create(Arc::clone(&rio), DEPTH * 4, None).unwrap();
    let (a, b) = rio.socket_pair();
    let tx = RequestQueue::create(a, &cq, SocketContext(1), limits).unwrap();
    let rx = RequestQueue::create(b, &cq, SocketContext(2), limits).unwrap();
    let buf = RegisteredBuffer::allocate(rio, 64 * 1024).unwrap();
    Fixture { cq, tx, rx, buf }
}

fn send_dequeue(c: &mut Criterion) {
    let mut f = fixture();
    let tx_seg = f.buf.segment(0, 256).unwrap();
    let rx_seg = f.buf.segment(4096, 256).unwrap();
    let mut out = [RioResult::default(); 8];

    // Paired with a receive so the peer's stream does not grow.
    c.bench_function("send_recv_dequeue_256b", |b| {
        b.iter(|| {
            unsafe {
                f.rx.receive(&[rx_seg], 0, RequestContext(2)).unwrap();
                f.tx.send(&[tx_seg], 0, RequestContext(1)).unwrap();
            }
            black_box(f.cq.dequeue(&mut out).unwrap());
        })
    });
}

fn batch_roundtrip(c: &mut Criterion) {
    let mut f = fixture();
    let segs = f.buf.segments(512);
    let (send_segs, recv_segs) = segs.split_at(DEPTH as usize);
    let mut out = vec![RioResult::default(); 128];

    c.bench_function("batch_64_send_recv", |b| {
        b.iter(|| {
            for (i, seg) in recv_segs.iter().enumerate() {
                unsafe { f.rx.receive(&[*seg], 0, RequestContext(i as u64)).unwrap() };
            }
            for (i, seg) in send_segs.iter().enumerate() {
                unsafe { f.tx.send(&[*seg], 0, RequestContext(i as u64)).unwrap() };
            }
            let mut total = 0;
            while total < 2 * DEPTH as usize {
                total += f.cq.dequeue(&mut out).unwrap();
            }
            black_box(total)
        })
    });
}

criterion_group!(benches, send_dequeue, batch_roundtrip);
criterion_main!(benches);
