//! Codec benchmarks for chatflow-protocol.

use chatflow_protocol::{codec, ChatMessage, Content, Scope, ServerEvent};
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};

fn message_event(body_len: usize) -> ServerEvent {
    ServerEvent::Message {
        message: ChatMessage {
            id: 1,
            sender_id: "conn_bench".into(),
            sender: "bench".into(),
            content: Content::Text {
                body: "x".repeat(body_len),
            },
            created_at: 1_700_000_000_000,
            scope: Scope::Broadcast,
            recipient_id: None,
        },
    }
}

fn bench_encode(c: &mut Criterion) {
    let event = message_event(64);

    let mut group = c.benchmark_group("encode");
    group.throughput(Throughput::Elements(1));
    group.bench_function("msgpack_64B", |b| b.iter(|| codec::encode(black_box(&event))));
    group.bench_function("json_64B", |b| {
        b.iter(|| codec::encode_json(black_box(&event)))
    });
    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let event = message_event(64);
    let binary = codec::encode(&event).unwrap();
    let text = codec::encode_json(&event).unwrap();

    let mut group = c.benchmark_group("decode");
    group.bench_function("msgpack_64B", |b| {
        b.iter(|| codec::decode::<ServerEvent>(black_box(&binary)))
    });
    group.bench_function("json_64B", |b| {
        b.iter(|| codec::decode_json::<ServerEvent>(black_box(&text)))
    });
    group.finish();
}

criterion_group!(benches, bench_encode, bench_decode);
criterion_main!(benches);
