//! Per-tick frame dispatch to every connected device.
//!
//! For each device the dispatcher packs one stream per pin, wraps it as a
//! SET_LEDS (one pin) or SET_LEDS_BATCHED (several pins), appends REDRAW and
//! any pending diagnostic requests, and writes the whole buffer in a single
//! call.  A transport failure demotes that device and closes its link; the
//! remaining devices are still served in the same tick.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use ledwall_core::protocol::{
    encode_into, BatchEntry, Message, ProtocolError, SetLedsMessage,
};
use ledwall_core::{Device, MacAddress, PixelBuffer};
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::application::manage_devices::{ConnectionRegistry, DeviceLink, DeviceTable};
use crate::application::packing::{pack_pin, PackingPolicy};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("device {0} is not in the device table")]
    UnknownDevice(MacAddress),

    #[error("could not encode frame for {mac}: {source}")]
    Encode {
        mac: MacAddress,
        #[source]
        source: ProtocolError,
    },

    #[error("send to {mac} failed: {source}")]
    Send {
        mac: MacAddress,
        #[source]
        source: io::Error,
    },

    #[error("send to {mac} timed out after {timeout:?}")]
    Timeout { mac: MacAddress, timeout: Duration },
}

impl DispatchError {
    /// `true` for failures of the connection itself, which demote the device.
    pub fn is_transport(&self) -> bool {
        matches!(self, DispatchError::Send { .. } | DispatchError::Timeout { .. })
    }
}

/// Outcome of one dispatch pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub sent: usize,
    pub failed: usize,
    pub demoted: usize,
}

pub struct Dispatcher<L> {
    devices: Arc<DeviceTable>,
    registry: Arc<ConnectionRegistry<L>>,
    policy: PackingPolicy,
    send_timeout: Option<Duration>,
    pending_logs: bool,
    pending_status: bool,
    /// Reused across devices and ticks.
    buf: Vec<u8>,
}

impl<L: DeviceLink> Dispatcher<L> {
    pub fn new(
        devices: Arc<DeviceTable>,
        registry: Arc<ConnectionRegistry<L>>,
        policy: PackingPolicy,
    ) -> Self {
        Self {
            devices,
            registry,
            policy,
            send_timeout: None,
            pending_logs: false,
            pending_status: false,
            buf: Vec::new(),
        }
    }

    /// Bounds every device write; an expired write counts as a send failure.
    pub fn with_send_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.send_timeout = timeout;
        self
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry<L>> {
        &self.registry
    }

    /// Appends GET_LOGS to every device's next frame.
    pub fn request_logs(&mut self) {
        self.pending_logs = true;
    }

    /// Appends GET_STATUS to every device's next frame.
    pub fn request_status(&mut self) {
        self.pending_status = true;
    }

    /// Appends the messages for one device's frame to `out`.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError`] if the frame cannot be encoded, e.g. a pin
    /// stream larger than the maximum message size.
    pub fn build_frame(
        &self,
        device: &Device,
        canvas: &PixelBuffer,
        out: &mut Vec<u8>,
    ) -> Result<(), ProtocolError> {
        let streams: Vec<(u8, Vec<u8>)> = device
            .pins
            .iter()
            .map(|pin| (pin.pin, pack_pin(canvas, pin, device.channel_order, &self.policy)))
            .collect();

        match streams.as_slice() {
            [] => {}
            [(pin, data)] => encode_into(
                out,
                &Message::SetLeds(SetLedsMessage {
                    gpio_pin: *pin,
                    pixel_data: data,
                }),
            )?,
            many => {
                let entries = many
                    .iter()
                    .map(|(pin, data)| BatchEntry {
                        gpio_pin: *pin,
                        pixel_data: data,
                    })
                    .collect();
                encode_into(out, &Message::SetLedsBatched(entries))?;
            }
        }
        if !streams.is_empty() {
            encode_into(out, &Message::Redraw)?;
        }
        if self.pending_logs {
            encode_into(out, &Message::GetLogs)?;
        }
        if self.pending_status {
            encode_into(out, &Message::GetStatus)?;
        }
        Ok(())
    }

    /// Packs and sends one frame to `mac` through `link`.
    ///
    /// Does not touch the registry; see [`Dispatcher::dispatch_frame`].
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError`] on an unknown device, an encoding failure,
    /// a write error or a write timeout.
    pub async fn pack_and_send(
        &mut self,
        mac: MacAddress,
        link: &L,
        canvas: &PixelBuffer,
    ) -> Result<(), DispatchError> {
        let devices = Arc::clone(&self.devices);
        let device = devices.get(&mac).ok_or(DispatchError::UnknownDevice(mac))?;

        let mut buf = std::mem::take(&mut self.buf);
        buf.clear();
        let built = self.build_frame(device, canvas, &mut buf);
        let result = match built {
            Err(source) => Err(DispatchError::Encode { mac, source }),
            Ok(()) if buf.is_empty() => Ok(()),
            Ok(()) => self.send(mac, link, &buf).await,
        };
        self.buf = buf;
        result
    }

    async fn send(&self, mac: MacAddress, link: &L, bytes: &[u8]) -> Result<(), DispatchError> {
        match self.send_timeout {
            Some(timeout) => match tokio::time::timeout(timeout, link.send(bytes)).await {
                Ok(result) => result.map_err(|source| DispatchError::Send { mac, source }),
                Err(_) => Err(DispatchError::Timeout { mac, timeout }),
            },
            None => link
                .send(bytes)
                .await
                .map_err(|source| DispatchError::Send { mac, source }),
        }
    }

    /// Sends the current canvas to every connected device.
    ///
    /// Devices are served one after another in registry snapshot order.  A
    /// device whose link fails is marked disconnected and its link closed;
    /// it will only receive frames again after a fresh check-in.
    pub async fn dispatch_frame(&mut self, canvas: &PixelBuffer) -> DispatchReport {
        let mut report = DispatchReport::default();

        for (mac, link) in self.registry.all_connected() {
            match self.pack_and_send(mac, &link, canvas).await {
                Ok(()) => report.sent += 1,
                Err(e) if e.is_transport() => {
                    report.failed += 1;
                    warn!("{e}; marking {mac} disconnected");
                    if let Some(stale) = self.registry.set_disconnected_if_current(mac, &link) {
                        stale.close().await;
                        report.demoted += 1;
                    }
                }
                Err(e) => {
                    report.failed += 1;
                    error!("{e}");
                }
            }
        }

        if self.pending_logs || self.pending_status {
            debug!(
                "diagnostic requests sent to {} device(s) (logs={}, status={})",
                report.sent, self.pending_logs, self.pending_status
            );
        }
        self.pending_logs = false;
        self.pending_status = false;
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::manage_devices::test_support::RecordingLink;
    use crate::application::packing::Serpentine;
    use ledwall_core::protocol::{decode_message, ColorOrder, LedType, OpCode};
    use ledwall_core::{LedMatrix, PinConnection, Rotation};

    fn mac(n: u8) -> MacAddress {
        MacAddress::new([0x10, 0, 0, 0, 0, n])
    }

    fn pin(num: u8, x: i32) -> PinConnection {
        PinConnection {
            pin: num,
            color_order: ColorOrder::Grb,
            led_type: LedType::Ws2811,
            matrices: vec![LedMatrix {
                width: 2,
                height: 1,
                power_limit_amps: 1.0,
                x,
                y: 0,
                rotation: Rotation::Up,
            }],
        }
    }

    fn device(n: u8, pins: Vec<PinConnection>) -> Device {
        Device {
            mac: mac(n),
            name: format!("dev-{n}"),
            channel_order: ColorOrder::Rgb,
            pins,
        }
    }

    fn raw_policy() -> PackingPolicy {
        PackingPolicy {
            brightness_divisor: 1,
            serpentine: Serpentine::None,
        }
    }

    fn setup(devices: Vec<Device>) -> (Dispatcher<RecordingLink>, Arc<ConnectionRegistry<RecordingLink>>) {
        let table = Arc::new(DeviceTable::new(devices));
        let registry = Arc::new(ConnectionRegistry::new(table.macs()));
        let dispatcher = Dispatcher::new(table, Arc::clone(&registry), raw_policy());
        (dispatcher, registry)
    }

    /// Splits a written buffer back into op codes.
    fn op_codes(bytes: &[u8]) -> Vec<OpCode> {
        let mut ops = Vec::new();
        let mut rest = bytes;
        while !rest.is_empty() {
            let (msg, used) = decode_message(rest).unwrap();
            ops.push(msg.op_code());
            rest = &rest[used..];
        }
        ops
    }

    fn canvas() -> PixelBuffer {
        let mut c = PixelBuffer::new(4, 1);
        for x in 0..4 {
            c.set_pixel(x, 0, [x as u8 + 1, 0, 0]);
        }
        c
    }

    #[tokio::test]
    async fn test_single_pin_device_gets_set_leds_then_redraw() {
        // Arrange
        let (mut d, reg) = setup(vec![device(1, vec![pin(18, 0)])]);
        let link = RecordingLink::new();
        reg.set_connected(mac(1), link.clone());

        // Act
        let report = d.dispatch_frame(&canvas()).await;

        // Assert
        assert_eq!(report.sent, 1);
        let sent = link.sent();
        assert_eq!(sent.len(), 1, "one write per device per tick");
        assert_eq!(op_codes(&sent[0]), vec![OpCode::SetLeds, OpCode::Redraw]);
        match decode_message(&sent[0]).unwrap().0 {
            Message::SetLeds(m) => {
                assert_eq!(m.gpio_pin, 18);
                assert_eq!(m.pixel_data, &[1, 0, 0, 2, 0, 0]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_multi_pin_device_gets_one_batched_message() {
        let (mut d, reg) = setup(vec![device(1, vec![pin(18, 0), pin(19, 2)])]);
        let link = RecordingLink::new();
        reg.set_connected(mac(1), link.clone());

        d.dispatch_frame(&canvas()).await;

        let sent = link.sent();
        assert_eq!(op_codes(&sent[0]), vec![OpCode::SetLedsBatched, OpCode::Redraw]);
        match decode_message(&sent[0]).unwrap().0 {
            Message::SetLedsBatched(entries) => {
                assert_eq!(entries.len(), 2);
                assert_eq!(entries[0].gpio_pin, 18);
                assert_eq!(entries[1].gpio_pin, 19);
                assert_eq!(entries[1].pixel_data, &[3, 0, 0, 4, 0, 0]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_disconnected_devices_receive_nothing() {
        let (mut d, _reg) = setup(vec![device(1, vec![pin(18, 0)])]);
        let report = d.dispatch_frame(&canvas()).await;
        assert_eq!(report, DispatchReport::default());
    }

    #[tokio::test]
    async fn test_send_failure_demotes_only_that_device() {
        // Arrange
        let (mut d, reg) = setup(vec![
            device(1, vec![pin(18, 0)]),
            device(2, vec![pin(18, 0)]),
        ]);
        let bad = RecordingLink::failing();
        let good = RecordingLink::new();
        reg.set_connected(mac(1), bad.clone());
        reg.set_connected(mac(2), good.clone());

        // Act
        let report = d.dispatch_frame(&canvas()).await;

        // Assert
        assert_eq!(report.sent, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.demoted, 1);
        assert!(bad.is_closed());
        assert_eq!(good.sent().len(), 1);
        let connected: Vec<_> = reg.all_connected().into_iter().map(|(m, _)| m).collect();
        assert_eq!(connected, vec![mac(2)]);
        assert_eq!(reg.all_disconnected(), vec![mac(1)]);
    }

    #[tokio::test]
    async fn test_demoted_device_is_not_retried_in_later_ticks() {
        let (mut d, reg) = setup(vec![device(1, vec![pin(18, 0)])]);
        reg.set_connected(mac(1), RecordingLink::failing());

        d.dispatch_frame(&canvas()).await;
        let second = d.dispatch_frame(&canvas()).await;

        assert_eq!(second, DispatchReport::default());
    }

    #[tokio::test]
    async fn test_pending_requests_are_appended_once() {
        let (mut d, reg) = setup(vec![device(1, vec![pin(18, 0)])]);
        let link = RecordingLink::new();
        reg.set_connected(mac(1), link.clone());

        d.request_logs();
        d.request_status();
        d.dispatch_frame(&canvas()).await;
        d.dispatch_frame(&canvas()).await;

        let sent = link.sent();
        assert_eq!(
            op_codes(&sent[0]),
            vec![OpCode::SetLeds, OpCode::Redraw, OpCode::GetLogs, OpCode::GetStatus]
        );
        assert_eq!(op_codes(&sent[1]), vec![OpCode::SetLeds, OpCode::Redraw]);
    }

    #[tokio::test]
    async fn test_device_without_pins_only_gets_requests() {
        let (mut d, reg) = setup(vec![device(1, vec![])]);
        let link = RecordingLink::new();
        reg.set_connected(mac(1), link.clone());

        d.dispatch_frame(&canvas()).await;
        assert!(link.sent().is_empty());

        d.request_logs();
        d.dispatch_frame(&canvas()).await;
        assert_eq!(op_codes(&link.sent()[0]), vec![OpCode::GetLogs]);
    }

    #[tokio::test]
    async fn test_pack_and_send_unknown_device_is_reported() {
        let (mut d, _reg) = setup(vec![]);
        let result = d.pack_and_send(mac(5), &RecordingLink::new(), &canvas()).await;
        assert!(matches!(result, Err(DispatchError::UnknownDevice(_))));
    }
}
