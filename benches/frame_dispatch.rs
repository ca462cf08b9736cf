//! Frame codec and dispatch benchmark suite.
//!
//! Measures the per-message cost on the hot path of a transport:
//! - JSON decode and encode of data frames
//! - Multiplexer dispatch of a data frame to an echoing channel
//!
//! Run with: cargo bench --bench frame_dispatch
//! Results saved to: target/criterion/

use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use wschannel::transport::Outbound;
use wschannel::{ChannelId, Frame, Multiplexer, Router, Side};

// ============================================================================
// Benchmark Parameters
// ============================================================================

const PAYLOAD_SIZES: &[usize] = &[16, 1024, 16 * 1024];

fn payload(size: usize) -> String {
    "x".repeat(size)
}

// ============================================================================
// Benchmark: Codec
// ============================================================================

fn bench_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_codec");

    for &size in PAYLOAD_SIZES {
        let frame = Frame::data(ChannelId::new(200), payload(size));
        let encoded = frame.encode().expect("encode");
        group.throughput(Throughput::Bytes(encoded.len() as u64));

        group.bench_with_input(BenchmarkId::new("decode", size), &encoded, |b, text| {
            b.iter(|| Frame::decode(black_box(text)).expect("decode"));
        });
        group.bench_with_input(BenchmarkId::new("encode", size), &frame, |b, frame| {
            b.iter(|| black_box(frame).encode().expect("encode"));
        });
    }

    group.finish();
}

// ============================================================================
// Benchmark: Dispatch
// ============================================================================

fn bench_dispatch(c: &mut Criterion) {
    let mut group = c.benchmark_group("mux_dispatch");

    for &size in PAYLOAD_SIZES {
        let router = Router::builder()
            .route("/echo/:id", |_, channel| {
                channel.on_message(|channel, content| {
                    let _ = channel.send(content);
                });
                Ok(())
            })
            .build()
            .expect("router");

        let (outbound, mut frames_rx) = Outbound::unobserved();
        let mux = Multiplexer::new(Side::Server, outbound, Some(router));

        let id = ChannelId::new(200);
        let open = Frame::open(id, "/echo/1").encode().expect("encode");
        mux.handle_incoming_frame(&open);
        while frames_rx.try_recv().is_ok() {}

        let data = Frame::data(id, payload(size)).encode().expect("encode");
        group.throughput(Throughput::Bytes(data.len() as u64));

        group.bench_with_input(BenchmarkId::new("echo", size), &data, |b, data| {
            b.iter(|| {
                mux.handle_incoming_frame(black_box(data));
                black_box(frames_rx.try_recv().is_ok())
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_codec, bench_dispatch);
criterion_main!(benches);
