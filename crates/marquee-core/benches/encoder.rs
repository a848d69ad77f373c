//! Encoding and upload benchmarks for marquee-core.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use marquee_core::{
    upload_payload, AckStrategy, AnimationFrame, FrameEncoder, PixelFrame, Rgb, SessionConfig,
    UploadOptions,
};
use marquee_protocol::FLEX_96X20_V1;
use marquee_transport::{DeviceId, MemoryTransport};
use std::time::{Duration, Instant};

fn frames(count: u16) -> Vec<AnimationFrame> {
    let panel = FLEX_96X20_V1.panel;
    (0..count)
        .map(|step| {
            let frame = PixelFrame::from_fn(panel, |x, y| {
                Rgb::new((x * 2) as u8, (y * 12) as u8, (step * 10) as u8)
            });
            AnimationFrame::new(frame, 100)
        })
        .collect()
}

fn bench_encode(c: &mut Criterion) {
    let encoder = FrameEncoder::new(FLEX_96X20_V1);

    let mut group = c.benchmark_group("encode_animation");
    for count in [1u16, 20] {
        let input = frames(count);
        group.throughput(Throughput::Elements(u64::from(count)));
        group.bench_function(format!("{count}_frames"), |b| {
            b.iter(|| encoder.encode(black_box(&input)).unwrap())
        });
    }
    group.finish();
}

/// Full session over the in-memory link with no settle delays.
fn bench_upload(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .unwrap();
    let payload = FrameEncoder::new(FLEX_96X20_V1).encode(&frames(20)).unwrap();
    let session = SessionConfig {
        handshake_ack: AckStrategy::Settle {
            delay: Duration::ZERO,
        },
        ..SessionConfig::default()
    };

    let mut group = c.benchmark_group("upload");
    group.throughput(Throughput::Bytes(payload.len() as u64));
    group.bench_function("memory_20_frames", |b| {
        b.iter_custom(|iters| {
            let start = Instant::now();
            for _ in 0..iters {
                let transport = MemoryTransport::new();
                let options = UploadOptions::new(FLEX_96X20_V1).with_session(session.clone());
                let result = runtime.block_on(upload_payload(
                    &transport,
                    &DeviceId::new("FF:24:06:18:41:5F"),
                    &payload,
                    options,
                ));
                assert!(result.is_success());
            }
            start.elapsed()
        })
    });
    group.finish();
}

criterion_group!(benches, bench_encode, bench_upload);
criterion_main!(benches);
