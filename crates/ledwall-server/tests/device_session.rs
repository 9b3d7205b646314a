//! Integration tests for the device session over loopback TCP.
//!
//! A real [`DeviceListener`] accepts plain `TcpStream` clients that play the
//! device side of the protocol by hand.  Frames are then pushed with a
//! [`Dispatcher`] sharing the listener's registry, exactly as the server
//! binary wires them.
//!
//! ```text
//! test client                 DeviceListener / Dispatcher
//! ───────────                 ───────────────────────────
//! CHECK_IN(mac)        ──►
//!                      ◄──    SET_CONFIG
//!                      ◄──    SET_LEDS[_BATCHED] + REDRAW   (per frame)
//! ```

use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ledwall_core::protocol::{
    decode_message, encode_check_in, encode_send_logs, read_frame, ColorOrder, FrameError,
    LedType, Message,
};
use ledwall_core::{Device, LedMatrix, MacAddress, PinConnection, PixelBuffer, Rotation};
use ledwall_server::application::dispatch::Dispatcher;
use ledwall_server::application::manage_devices::{ConnectionRegistry, DeviceTable};
use ledwall_server::application::packing::PackingPolicy;
use ledwall_server::infrastructure::network::{DeviceListener, ListenerConfig, TcpDeviceLink};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

// ── Fixtures ──────────────────────────────────────────────────────────────────

const KNOWN: MacAddress = MacAddress::new([0x02, 0x00, 0x00, 0x00, 0x00, 0x01]);

/// Two pins, one 2×1 panel each, stacked on a 2×2 canvas.
fn two_pin_device() -> Device {
    let pin = |num: u8, y: i32| PinConnection {
        pin: num,
        color_order: ColorOrder::Grb,
        led_type: LedType::Ws2812,
        matrices: vec![LedMatrix {
            width: 2,
            height: 1,
            power_limit_amps: 2.0,
            x: 0,
            y,
            rotation: Rotation::Up,
        }],
    };
    Device {
        mac: KNOWN,
        name: "left-column".to_string(),
        channel_order: ColorOrder::Rgb,
        pins: vec![pin(4, 0), pin(5, 1)],
    }
}

struct Harness {
    addr: std::net::SocketAddr,
    registry: Arc<ConnectionRegistry<TcpDeviceLink>>,
    dispatcher: Dispatcher<TcpDeviceLink>,
    running: Arc<AtomicBool>,
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
    }
}

async fn start() -> Harness {
    let devices = Arc::new(DeviceTable::new([two_pin_device()]));
    let registry = Arc::new(ConnectionRegistry::new(devices.macs()));
    let config = ListenerConfig {
        bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
        port_start: 0,
        port_end: 0,
        checkin_timeout: Duration::from_secs(2),
    };
    let listener = DeviceListener::bind(&config, Arc::clone(&devices), Arc::clone(&registry))
        .await
        .unwrap();
    let addr = listener.local_addr().unwrap();
    let running = Arc::new(AtomicBool::new(true));
    tokio::spawn(listener.run(Arc::clone(&running)));

    let dispatcher = Dispatcher::new(devices, Arc::clone(&registry), PackingPolicy::default());
    Harness {
        addr,
        registry,
        dispatcher,
        running,
    }
}

/// Polls `condition` for up to two seconds.
async fn wait_until(condition: impl Fn() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within 2s");
}

async fn check_in(addr: std::net::SocketAddr, mac: MacAddress) -> TcpStream {
    let mut client = TcpStream::connect(addr).await.unwrap();
    client.write_all(&encode_check_in(mac)).await.unwrap();
    client
}

async fn next_message(client: &mut TcpStream) -> Vec<u8> {
    tokio::time::timeout(Duration::from_secs(2), read_frame(client))
        .await
        .expect("no frame within 2s")
        .unwrap()
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_check_in_gets_config_before_any_pixels() {
    // Arrange
    let mut harness = start().await;
    let mut client = check_in(harness.addr, KNOWN).await;

    // Act: the first frame is the configuration.
    let first = next_message(&mut client).await;
    let registry = Arc::clone(&harness.registry);
    wait_until(|| registry.is_connected(&KNOWN)).await;
    let report = harness
        .dispatcher
        .dispatch_frame(&PixelBuffer::filled(2, 2, [100, 100, 100]))
        .await;

    // Assert
    let Message::SetConfig(config) = decode_message(&first).unwrap().0 else {
        panic!("expected SET_CONFIG first");
    };
    assert_eq!(config.num_color_channels, 3);
    assert_eq!(config.pins.len(), 2);
    assert_eq!(config.pins[0].pin_num, 4);
    assert_eq!(config.pins[0].max_leds, 2);
    assert_eq!(config.pins[1].color_order, ColorOrder::Grb);
    assert_eq!(report.sent, 1);

    let pixels = next_message(&mut client).await;
    let Message::SetLedsBatched(entries) = decode_message(&pixels).unwrap().0 else {
        panic!("expected SET_LEDS_BATCHED for a two-pin device");
    };
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].gpio_pin, 4);
    assert_eq!(entries[0].pixel_data, &[10u8; 6][..]);
    assert_eq!(entries[1].gpio_pin, 5);

    let redraw = next_message(&mut client).await;
    assert_eq!(decode_message(&redraw).unwrap().0, Message::Redraw);
}

#[tokio::test]
async fn test_unknown_device_is_closed_without_config() {
    let harness = start().await;
    let mut client = check_in(harness.addr, MacAddress::new([0xde, 0xad, 0, 0, 0, 1])).await;

    let result = tokio::time::timeout(Duration::from_secs(2), read_frame(&mut client))
        .await
        .expect("server kept the connection open");

    assert!(matches!(result, Err(FrameError::Closed) | Err(FrameError::Io(_))));
    assert!(harness.registry.all_connected().is_empty());
}

#[tokio::test]
async fn test_second_check_in_replaces_stale_connection() {
    // Arrange: first connection fully registered.
    let mut harness = start().await;
    let mut old = check_in(harness.addr, KNOWN).await;
    next_message(&mut old).await;
    let registry = Arc::clone(&harness.registry);
    wait_until(|| registry.is_connected(&KNOWN)).await;
    let old_peer = registry.get_socket(&KNOWN).unwrap().peer_addr();

    // Act
    let mut new = check_in(harness.addr, KNOWN).await;
    next_message(&mut new).await;
    wait_until(|| {
        registry
            .get_socket(&KNOWN)
            .is_some_and(|link| link.peer_addr() != old_peer)
    })
    .await;

    // Assert: the old socket sees EOF, frames reach only the new one.
    let ended = tokio::time::timeout(Duration::from_secs(2), read_frame(&mut old))
        .await
        .expect("stale connection left open");
    assert!(ended.is_err());

    let report = harness.dispatcher.dispatch_frame(&PixelBuffer::new(2, 2)).await;
    assert_eq!(report.sent, 1);
    let pixels = next_message(&mut new).await;
    assert!(matches!(
        decode_message(&pixels).unwrap().0,
        Message::SetLedsBatched(_)
    ));
}

#[tokio::test]
async fn test_device_hangup_marks_it_disconnected() {
    let harness = start().await;
    let mut client = check_in(harness.addr, KNOWN).await;
    next_message(&mut client).await;
    let registry = Arc::clone(&harness.registry);
    wait_until(|| registry.is_connected(&KNOWN)).await;

    // Logs are accepted on the live connection before hanging up.
    client
        .write_all(&encode_send_logs("[INFO] panel warm").unwrap())
        .await
        .unwrap();
    drop(client);

    wait_until(|| !registry.is_connected(&KNOWN)).await;
    assert_eq!(registry.all_disconnected(), vec![KNOWN]);
}
