//! Criterion benchmarks for the per-tick packing path.
//!
//! Every tick packs each connected device's panels out of the canvas, so
//! this measures one pin at realistic chain lengths and a full multi-pin
//! device frame as the dispatcher builds it.
//!
//! Run with:
//! ```bash
//! cargo bench --package ledwall-server --bench packing_bench
//! ```

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use ledwall_core::protocol::{ColorOrder, LedType};
use ledwall_core::{Device, LedMatrix, MacAddress, PinConnection, PixelBuffer, Rotation};
use ledwall_server::application::dispatch::Dispatcher;
use ledwall_server::application::manage_devices::{ConnectionRegistry, DeviceTable};
use ledwall_server::application::packing::{pack_pin, PackingPolicy};
use ledwall_server::infrastructure::network::TcpDeviceLink;

// ── Fixtures ──────────────────────────────────────────────────────────────────

const PANEL: u32 = 16;

fn canvas(width: u32, height: u32) -> PixelBuffer {
    let data = (0..width as usize * height as usize * 3)
        .map(|i| (i % 251) as u8)
        .collect();
    PixelBuffer::from_raw(width, height, data).unwrap_or_else(|| PixelBuffer::new(width, height))
}

/// A pin chaining `panels` 16×16 panels side by side, alternating rotation.
fn pin(pin: u8, row: u32, panels: u32) -> PinConnection {
    let rotations = [Rotation::Up, Rotation::Left, Rotation::Down, Rotation::Right];
    PinConnection {
        pin,
        color_order: ColorOrder::Grb,
        led_type: LedType::Ws2812,
        matrices: (0..panels)
            .map(|i| LedMatrix {
                width: PANEL,
                height: PANEL,
                power_limit_amps: 2.0,
                x: (i * PANEL) as i32,
                y: (row * PANEL) as i32,
                rotation: rotations[i as usize % rotations.len()],
            })
            .collect(),
    }
}

// ── Benchmark groups ──────────────────────────────────────────────────────────

/// Benchmarks one pin with 1, 4 and 8 chained panels.
fn bench_pack_pin(c: &mut Criterion) {
    let canvas = canvas(PANEL * 8, PANEL);
    let policy = PackingPolicy::default();

    let mut group = c.benchmark_group("pack_pin");
    for panels in [1u32, 4, 8] {
        let pin = pin(0, 0, panels);
        group.throughput(Throughput::Bytes(pin.packed_size() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(panels), &pin, |b, pin| {
            b.iter(|| pack_pin(black_box(&canvas), pin, ColorOrder::Rgb, &policy))
        });
    }
    group.finish();
}

/// Benchmarks a full 8-pin device frame: batched pixels plus REDRAW.
fn bench_build_frame(c: &mut Criterion) {
    let canvas = canvas(PANEL * 4, PANEL * 8);
    let device = Device {
        mac: MacAddress::new([0x02, 0, 0, 0, 0, 1]),
        name: "bench".into(),
        channel_order: ColorOrder::Rgb,
        pins: (0..8).map(|p| pin(p, p as u32, 4)).collect(),
    };
    let devices = Arc::new(DeviceTable::new([device.clone()]));
    let registry = Arc::new(ConnectionRegistry::<TcpDeviceLink>::new(devices.macs()));
    let dispatcher = Dispatcher::new(devices, registry, PackingPolicy::default());
    let mut out = Vec::new();

    let mut group = c.benchmark_group("build_frame");
    group.throughput(Throughput::Bytes(device.total_leds() * 3));
    group.bench_function("8_pins_4_panels", |b| {
        b.iter(|| {
            out.clear();
            dispatcher
                .build_frame(black_box(&device), black_box(&canvas), &mut out)
                .unwrap();
        })
    });
    group.finish();
}

criterion_group!(benches, bench_pack_pin, bench_build_frame);
criterion_main!(benches);
