//! Throughput benchmarks

use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use modemlink_core::core::at::{self, AtEngine};
use modemlink_core::SimulatedModem;
use std::hint::black_box;
use std::time::Duration;

fn response_benchmark(c: &mut Criterion) {
    let mut response = b"\r\n+CEREG: 2,1,\"2F4A\",\"01A2D101\",7\r\n".to_vec();
    response.extend(std::iter::repeat(b' ').take(900));
    response.extend_from_slice(b"\r\nOK\r\n");

    let mut group = c.benchmark_group("response");
    group.throughput(Throughput::Bytes(response.len() as u64));

    group.bench_function("ok_marker", |b| {
        b.iter(|| black_box(at::is_ok_response(black_box(&response))))
    });

    group.bench_function("registration", |b| {
        b.iter(|| black_box(at::is_registered(black_box(&response))))
    });

    group.finish();
}

fn transaction_benchmark(c: &mut Criterion) {
    let mut modem = SimulatedModem::new();
    modem.respond_exact("AT+CSQ", "\r\n+CSQ: 21,99\r\n\r\nOK\r\n");
    let handle = modem.handle();
    let mut engine = AtEngine::new(at::DEFAULT_BUFFER_CAPACITY, Duration::ZERO);

    c.bench_function("send_and_wait", |b| {
        b.iter(|| {
            let ok = engine.send_and_wait(&mut modem, black_box("AT+CSQ"), 3);
            handle.clear_log();
            black_box(ok)
        })
    });
}

fn relay_benchmark(c: &mut Criterion) {
    let frame: Vec<u8> = (0..1024).map(|i| (i % 256) as u8).collect();

    let mut group = c.benchmark_group("relay");
    group.throughput(Throughput::Bytes(frame.len() as u64));

    group.bench_function("hex_trace", |b| {
        b.iter(|| black_box(hex::encode(black_box(&frame))))
    });

    group.finish();
}

criterion_group!(benches, response_benchmark, transaction_benchmark, relay_benchmark);
criterion_main!(benches);
