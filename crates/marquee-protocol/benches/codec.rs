//! Packet and chunking benchmarks for marquee-protocol.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use marquee_protocol::{codec, Chunker, ControlFrame, EncodedPayload, FLEX_96X20_V1};

fn bench_encode_data(c: &mut Criterion) {
    let payload = EncodedPayload::new(vec![0x5Au8; 196]);
    let chunker = Chunker::new(&payload, 243, &FLEX_96X20_V1).unwrap();
    let frame = chunker.frame(0).unwrap();

    let mut group = c.benchmark_group("encode");
    group.throughput(Throughput::Bytes(196));
    group.bench_function("data_196B", |b| {
        b.iter(|| codec::encode_data(&FLEX_96X20_V1, black_box(&frame)))
    });
    group.bench_function("control", |b| {
        b.iter(|| codec::encode_control(&FLEX_96X20_V1, black_box(ControlFrame::PrepareUpload)))
    });
    group.finish();
}

fn bench_decode_data(c: &mut Criterion) {
    let payload = EncodedPayload::new(vec![0x5Au8; 196]);
    let chunker = Chunker::new(&payload, 243, &FLEX_96X20_V1).unwrap();
    let packet = codec::encode_data(&FLEX_96X20_V1, &chunker.frame(0).unwrap()).unwrap();

    let mut group = c.benchmark_group("decode");
    group.throughput(Throughput::Bytes(packet.len() as u64));
    group.bench_function("data_196B", |b| {
        b.iter(|| codec::decode(&FLEX_96X20_V1, black_box(&packet)))
    });
    group.finish();
}

fn bench_full_payload(c: &mut Criterion) {
    let payload = EncodedPayload::new(vec![0xA5u8; FLEX_96X20_V1.max_payload_bytes]);

    let mut group = c.benchmark_group("chunk_and_encode");
    group.throughput(Throughput::Bytes(payload.len() as u64));
    group.bench_function("max_payload_243B_writes", |b| {
        b.iter(|| {
            let chunker = Chunker::new(black_box(&payload), 243, &FLEX_96X20_V1).unwrap();
            chunker
                .frames()
                .map(|frame| codec::encode_data(&FLEX_96X20_V1, &frame).unwrap().len())
                .sum::<usize>()
        })
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_encode_data,
    bench_decode_data,
    bench_full_payload
);
criterion_main!(benches);
