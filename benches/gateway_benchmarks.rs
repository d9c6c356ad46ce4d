//! Performance benchmarks for the Arnold gateway
//!
//! Run with: cargo bench
//! Or for specific benchmarks: cargo bench -- <filter>

use base64::Engine;
use base64::prelude::BASE64_STANDARD;
use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use arnold_gateway::core::realtime::openai::{ClientEvent, ServerEvent};
use arnold_gateway::core::realtime::{
    AudioFormat, AudioFrame, AudioFrameBuffer, BufferConfig, Direction, FunctionCallBroker,
    FunctionCallRequest, Playout,
};
use arnold_gateway::core::workouts::InMemoryWorkoutStore;

/// 20ms of PCM16 mono at 24kHz
const FRAME_BYTES: usize = 960;

/// Benchmark jitter buffer push/pop cycles
fn bench_audio_buffer(c: &mut Criterion) {
    let mut group = c.benchmark_group("audio_buffer");
    group.measurement_time(Duration::from_secs(5));
    let format = AudioFormat::default();
    let frame = vec![0u8; FRAME_BYTES];

    for frames in [8usize, 64, 256] {
        group.throughput(Throughput::Elements(frames as u64));
        group.bench_with_input(BenchmarkId::new("push_pop", frames), &frames, |b, &frames| {
            b.iter(|| {
                let buffer =
                    AudioFrameBuffer::new(Direction::Egress, &BufferConfig::default(), &format);
                for seq in 0..frames as u64 {
                    buffer.push(AudioFrame::new(Direction::Egress, seq, frame.clone()));
                }
                buffer.mark_end();
                let mut popped = 0;
                while let Playout::Frame(f) = buffer.pop() {
                    popped += f.data.len();
                }
                black_box(popped)
            });
        });
    }

    // Overflowing a small buffer exercises the drop-oldest path.
    group.bench_function("overflow_drop_oldest", |b| {
        let config = BufferConfig {
            capacity_frames: 16,
            ..Default::default()
        };
        b.iter(|| {
            let buffer = AudioFrameBuffer::new(Direction::Ingress, &config, &format);
            for seq in 0..128u64 {
                black_box(buffer.push(AudioFrame::new(Direction::Ingress, seq, frame.clone())));
            }
            black_box(buffer.dropped())
        });
    });

    group.finish();
}

/// Benchmark protocol encoding and decoding
fn bench_protocol(c: &mut Criterion) {
    let mut group = c.benchmark_group("protocol");

    let audio = vec![1u8; FRAME_BYTES * 5];
    group.throughput(Throughput::Bytes(audio.len() as u64));
    group.bench_function("encode_audio_append", |b| {
        b.iter(|| ClientEvent::audio_append(black_box(&audio)).to_json())
    });

    let audio_event = json!({
        "type": "response.audio.delta",
        "response_id": "resp_1",
        "item_id": "item_1",
        "output_index": 0,
        "content_index": 0,
        "delta": BASE64_STANDARD.encode(&audio),
    })
    .to_string();
    group.throughput(Throughput::Bytes(audio_event.len() as u64));
    group.bench_function("decode_audio_delta", |b| {
        b.iter(|| {
            if let Ok(ServerEvent::AudioDelta { delta, .. }) =
                ServerEvent::decode(black_box(&audio_event))
            {
                black_box(ServerEvent::decode_audio_delta(&delta).ok());
            }
        })
    });

    let call = json!({
        "type": "response.function_call_arguments.done",
        "call_id": "call_1",
        "name": "log_set",
        "arguments": "{\"exercise\":\"bench press\",\"reps\":10,\"weight_lbs\":135}",
    })
    .to_string();
    group.throughput(Throughput::Bytes(call.len() as u64));
    group.bench_function("decode_function_call", |b| {
        b.iter(|| ServerEvent::decode(black_box(&call)))
    });

    group.finish();
}

/// Benchmark function call execution and dedup replay
fn bench_function_calls(c: &mut Criterion) {
    let mut group = c.benchmark_group("function_calls");
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let broker = Arc::new(FunctionCallBroker::new(
        Arc::new(InMemoryWorkoutStore::new()),
        10_000,
    ));

    let request = FunctionCallRequest {
        call_id: "call_replayed".to_string(),
        name: "log_set".to_string(),
        arguments: json!({"exercise": "bench press", "reps": 10, "weight_lbs": 135}),
        item_id: None,
        response_id: None,
    };
    runtime.block_on(broker.execute(&request));

    group.bench_function("replay_cached_result", |b| {
        b.to_async(&runtime).iter(|| {
            let broker = broker.clone();
            let request = request.clone();
            async move { black_box(broker.execute(&request).await) }
        })
    });

    group.bench_function("query_recent", |b| {
        let mut n = 0u64;
        b.to_async(&runtime).iter(|| {
            n += 1;
            let broker = broker.clone();
            let request = FunctionCallRequest {
                call_id: format!("call_recent_{n}"),
                name: "query_recent".to_string(),
                arguments: json!({"limit": 10}),
                item_id: None,
                response_id: None,
            };
            async move { black_box(broker.execute(&request).await) }
        })
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_audio_buffer,
    bench_protocol,
    bench_function_calls,
);

criterion_main!(benches);
