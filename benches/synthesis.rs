//! Criterion benchmarks for the readout hot path.
//!
//! Key metrics:
//! - Synthesis throughput per channel for various record lengths
//! - Encoding cost of a full 8-channel event
//! - `produce_event` end to end, including the config snapshot and locking
//!
//! Run with: cargo bench --bench synthesis

use std::sync::Arc;

use bytes::BytesMut;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use sinus_daq::clock::ManualClock;
use sinus_daq::controller::{AcquisitionController, ControllerOptions};
use sinus_daq::encoder::{event_size, EventEncoder};
use sinus_daq::store::MemoryStore;
use sinus_daq::synth::synthesize;
use sinus_daq::{InstrumentConfig, NUM_CHANNELS};

const RECORD_LENGTHS: [u32; 4] = [64, 1024, 4096, 16384];

fn config_with(record_length: u32) -> InstrumentConfig {
    InstrumentConfig {
        record_length,
        ..Default::default()
    }
}

/// One channel's waveform, the inner loop of every readout.
fn synthesis_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("synthesize");

    for length in RECORD_LENGTHS {
        let config = config_with(length);
        let mut out = vec![0u16; length as usize];

        group.throughput(Throughput::Elements(u64::from(length)));
        group.bench_with_input(BenchmarkId::new("channel", length), &length, |b, _| {
            b.iter(|| synthesize(black_box(&config), 3, black_box(1_234_567), &mut out));
        });
    }

    group.finish();
}

/// Bank packing of precomputed waveforms.
fn encode_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode");
    let encoder = EventEncoder::new(0);

    for length in RECORD_LENGTHS {
        let config = config_with(length);
        let waveforms: [Vec<u16>; NUM_CHANNELS] =
            std::array::from_fn(|_| vec![2048u16; length as usize]);
        let metadata = encoder.metadata(&config, 1, 0);
        let mut buf = BytesMut::with_capacity(event_size(&config));

        group.throughput(Throughput::Bytes(event_size(&config) as u64));
        group.bench_with_input(BenchmarkId::new("event", length), &length, |b, _| {
            b.iter(|| {
                buf.clear();
                encoder.encode(black_box(&metadata), &config, &waveforms, &mut buf)
            });
        });
    }

    group.finish();
}

/// Full readout through the controller.
fn produce_event_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("produce_event");

    for length in RECORD_LENGTHS {
        let seed = format!("Equipment.sinus.Settings.waveform_length = {length}");
        let store = Arc::new(MemoryStore::from_toml_str(&seed).unwrap());
        let clock = Arc::new(ManualClock::new(0));
        let controller =
            AcquisitionController::new(store, clock.clone(), ControllerOptions::default());
        controller.initialize().unwrap();
        controller.start(1).unwrap();

        let mut buf = BytesMut::new();
        group.throughput(Throughput::Bytes(controller.event_size() as u64));
        group.bench_with_input(BenchmarkId::new("event", length), &length, |b, _| {
            b.iter(|| {
                clock.advance_ns(1_000);
                black_box(controller.produce_event(&mut buf))
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    synthesis_throughput,
    encode_throughput,
    produce_event_throughput
);
criterion_main!(benches);
