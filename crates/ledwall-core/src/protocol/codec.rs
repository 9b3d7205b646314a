//! Binary codec for encoding and decoding LED wall protocol messages.
//!
//! Wire format:
//! ```text
//! [size:4][op_code:1][payload:size-5]
//! ```
//! `size` counts the whole message including itself.  All multi-byte
//! integers are little-endian and payloads are packed with no padding.
//!
//! Decoding is zero-copy: pixel data and log text in the returned
//! [`Message`] borrow from the input slice.  Every length is checked against
//! the declared message size before it is used, so a corrupt header can
//! never cause a read past the end of the buffer.

use std::borrow::Cow;

use thiserror::Error;

use crate::domain::device::MacAddress;
use crate::protocol::messages::{
    BatchEntry, ColorOrder, LedType, Message, MessageHeader, OpCode, PinInfo, SetConfigMessage,
    SetLedsMessage, BATCH_ENTRY_HEADER_SIZE, BYTES_PER_PIXEL, CHECK_IN_SIZE, HEADER_SIZE,
    MAX_MESSAGE_SIZE, PIN_INFO_SIZE,
};

/// Errors that can occur during message encoding or decoding.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// The byte slice is shorter than the minimum required length.
    #[error("insufficient data: need at least {needed} bytes, got {available}")]
    InsufficientData { needed: usize, available: usize },

    /// The size field is zero.
    #[error("declared message size is zero")]
    ZeroLength,

    /// The size field is too small to even hold the header.
    #[error("declared message size {declared} is smaller than the 5-byte header")]
    TruncatedHeader { declared: usize },

    /// The size field exceeds [`MAX_MESSAGE_SIZE`].
    #[error("declared message size {declared} exceeds the {max}-byte limit")]
    MessageTooLarge { declared: usize, max: usize },

    /// The op code byte in the header is not a recognized value.
    #[error("unknown op code: 0x{0:02X}")]
    UnknownOpCode(u8),

    /// The declared size is smaller than the fixed portion of the operation.
    #[error("{op_code:?} message declares {declared} bytes but needs at least {minimum}")]
    Undersized {
        op_code: OpCode,
        declared: usize,
        minimum: usize,
    },

    /// The buffer holds fewer bytes than the header declares.
    #[error("message length mismatch: header says {declared}, available is {available}")]
    LengthMismatch { declared: usize, available: usize },

    /// A SET_LEDS_BATCHED entry would read past the end of the message.
    #[error("batch entry {index} needs {needed} bytes but only {remaining} remain")]
    BatchOverrun {
        index: usize,
        needed: usize,
        remaining: usize,
    },

    /// A message of the wrong kind arrived where a specific one was required.
    #[error("expected {expected:?}, got {actual:?}")]
    UnexpectedOpCode { expected: OpCode, actual: OpCode },

    /// The payload could not be parsed (field value out of range, bad count, etc.).
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Encodes a [`Message`] into a fresh byte vector including the 5-byte header.
///
/// The size field is always computed here from the encoded payload; callers
/// never supply it.
///
/// # Errors
///
/// Returns [`ProtocolError::MessageTooLarge`] if the encoded message would
/// exceed [`MAX_MESSAGE_SIZE`], or [`ProtocolError::MalformedPayload`] if a
/// count does not fit its wire field.
///
/// # Examples
///
/// ```rust
/// use ledwall_core::protocol::{decode_message, encode_message, Message};
///
/// let msg = Message::SetBrightness(128);
/// let bytes = encode_message(&msg).unwrap();
/// let (decoded, consumed) = decode_message(&bytes).unwrap();
/// assert_eq!(decoded, msg);
/// assert_eq!(consumed, bytes.len());
/// ```
pub fn encode_message(msg: &Message<'_>) -> Result<Vec<u8>, ProtocolError> {
    let mut buf = Vec::with_capacity(msg.encoded_len());
    encode_into(&mut buf, msg)?;
    Ok(buf)
}

/// Appends one encoded message to `buf`.
///
/// Several messages appended to the same buffer can be written to a socket
/// in one call.  On error `buf` is restored to its original length.
///
/// # Errors
///
/// Same as [`encode_message`].
pub fn encode_into(buf: &mut Vec<u8>, msg: &Message<'_>) -> Result<(), ProtocolError> {
    let start = buf.len();
    buf.extend_from_slice(&[0u8; 4]);
    buf.push(msg.op_code() as u8);

    if let Err(e) = encode_payload(buf, msg) {
        buf.truncate(start);
        return Err(e);
    }

    let total = buf.len() - start;
    if total > MAX_MESSAGE_SIZE {
        buf.truncate(start);
        return Err(ProtocolError::MessageTooLarge {
            declared: total,
            max: MAX_MESSAGE_SIZE,
        });
    }
    buf[start..start + 4].copy_from_slice(&(total as u32).to_le_bytes());
    Ok(())
}

/// Parses and validates the 5-byte header at the start of `bytes`.
///
/// Checks the declared size against zero, the header size, the maximum
/// message size, and the minimum size of the announced operation.  The
/// buffer length beyond the header is not checked here.
///
/// # Errors
///
/// Returns [`ProtocolError`] if the header is absent or inconsistent.
pub fn decode_header(bytes: &[u8]) -> Result<MessageHeader, ProtocolError> {
    if bytes.len() < HEADER_SIZE {
        return Err(ProtocolError::InsufficientData {
            needed: HEADER_SIZE,
            available: bytes.len(),
        });
    }

    let size = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    validate_declared_size(size as usize)?;

    let op_byte = bytes[4];
    let op_code = OpCode::try_from(op_byte).map_err(|_| ProtocolError::UnknownOpCode(op_byte))?;

    let minimum = op_code.min_size();
    if (size as usize) < minimum {
        return Err(ProtocolError::Undersized {
            op_code,
            declared: size as usize,
            minimum,
        });
    }

    Ok(MessageHeader { size, op_code })
}

/// Checks a size field on its own, before the op code is known.
///
/// Used by stream readers to refuse a frame before allocating for it.
///
/// # Errors
///
/// Returns [`ProtocolError::ZeroLength`], [`ProtocolError::TruncatedHeader`]
/// or [`ProtocolError::MessageTooLarge`].
pub fn validate_declared_size(declared: usize) -> Result<(), ProtocolError> {
    if declared == 0 {
        return Err(ProtocolError::ZeroLength);
    }
    if declared < HEADER_SIZE {
        return Err(ProtocolError::TruncatedHeader { declared });
    }
    if declared > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge {
            declared,
            max: MAX_MESSAGE_SIZE,
        });
    }
    Ok(())
}

/// Decodes one [`Message`] from the beginning of `bytes`.
///
/// Returns the decoded message and the total number of bytes consumed
/// (the declared size), so the caller can advance their read cursor.
/// Trailing bytes after the declared size are left untouched.
///
/// # Errors
///
/// Returns [`ProtocolError`] if the bytes are malformed.
///
/// # Examples
///
/// ```rust
/// use ledwall_core::protocol::{decode_message, encode_message, Message};
///
/// let bytes = encode_message(&Message::Redraw).unwrap();
/// assert_eq!(bytes, vec![5, 0, 0, 0, 0x03]);
/// let (msg, consumed) = decode_message(&bytes).unwrap();
/// assert_eq!(msg, Message::Redraw);
/// assert_eq!(consumed, 5);
/// ```
pub fn decode_message(bytes: &[u8]) -> Result<(Message<'_>, usize), ProtocolError> {
    let header = decode_header(bytes)?;
    let declared = header.size as usize;

    if bytes.len() < declared {
        return Err(ProtocolError::LengthMismatch {
            declared,
            available: bytes.len(),
        });
    }

    let payload = &bytes[HEADER_SIZE..declared];
    let msg = decode_payload(header.op_code, payload)?;
    Ok((msg, declared))
}

/// Decodes a CHECK_IN message, requiring the exact 11-byte size.
///
/// # Errors
///
/// Returns [`ProtocolError::UnexpectedOpCode`] for any other operation and
/// [`ProtocolError::MalformedPayload`] if the size is not exactly 11.
pub fn decode_check_in(bytes: &[u8]) -> Result<MacAddress, ProtocolError> {
    decode_check_in_header(bytes)?;
    match decode_message(bytes)? {
        (Message::CheckIn(mac), _) => Ok(mac),
        (other, _) => Err(ProtocolError::UnexpectedOpCode {
            expected: OpCode::CheckIn,
            actual: other.op_code(),
        }),
    }
}

/// Checks that a 5-byte header announces an 11-byte CHECK_IN.
///
/// Lets a listener refuse anything else before reading a body.
///
/// # Errors
///
/// Same as [`decode_check_in`], minus the payload checks.
pub fn decode_check_in_header(bytes: &[u8]) -> Result<MessageHeader, ProtocolError> {
    let header = decode_header(bytes)?;
    if header.op_code != OpCode::CheckIn {
        return Err(ProtocolError::UnexpectedOpCode {
            expected: OpCode::CheckIn,
            actual: header.op_code,
        });
    }
    if header.size as usize != CHECK_IN_SIZE {
        return Err(ProtocolError::MalformedPayload(format!(
            "CHECK_IN must be exactly {CHECK_IN_SIZE} bytes, got {}",
            header.size
        )));
    }
    Ok(header)
}

// ── Convenience encoders ──────────────────────────────────────────────────────

/// Encodes CHECK_IN for the given device identifier.
pub fn encode_check_in(mac: MacAddress) -> Vec<u8> {
    let mut buf = Vec::with_capacity(CHECK_IN_SIZE);
    buf.extend_from_slice(&(CHECK_IN_SIZE as u32).to_le_bytes());
    buf.push(OpCode::CheckIn as u8);
    buf.extend_from_slice(mac.as_bytes());
    buf
}

/// Encodes SET_CONFIG for the given pins.
///
/// # Errors
///
/// Fails if more than 255 pins are given.
pub fn encode_set_config(num_color_channels: u8, pins: &[PinInfo]) -> Result<Vec<u8>, ProtocolError> {
    encode_message(&Message::SetConfig(SetConfigMessage {
        num_color_channels,
        pins: pins.to_vec(),
    }))
}

/// Encodes SET_LEDS for a single pin.
///
/// # Errors
///
/// Fails if the message would exceed [`MAX_MESSAGE_SIZE`].
pub fn encode_set_leds(gpio_pin: u8, pixel_data: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    encode_message(&Message::SetLeds(SetLedsMessage {
        gpio_pin,
        pixel_data,
    }))
}

/// Encodes SET_LEDS_BATCHED for several pins.
///
/// # Errors
///
/// Fails on more than 255 entries, pixel data not a multiple of three, or an
/// oversized message.
pub fn encode_set_leds_batched(entries: &[BatchEntry<'_>]) -> Result<Vec<u8>, ProtocolError> {
    encode_message(&Message::SetLedsBatched(entries.to_vec()))
}

/// Encodes SEND_LOGS with a trailing NUL.
///
/// # Errors
///
/// Fails if the text would exceed [`MAX_MESSAGE_SIZE`].
pub fn encode_send_logs(text: &str) -> Result<Vec<u8>, ProtocolError> {
    encode_message(&Message::SendLogs(Cow::Borrowed(text)))
}

/// Encodes REDRAW.
pub fn encode_redraw() -> Vec<u8> {
    encode_header_only(OpCode::Redraw)
}

/// Encodes GET_LOGS.
pub fn encode_get_logs() -> Vec<u8> {
    encode_header_only(OpCode::GetLogs)
}

/// Encodes GET_STATUS.
pub fn encode_get_status() -> Vec<u8> {
    encode_header_only(OpCode::GetStatus)
}

fn encode_header_only(op_code: OpCode) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_SIZE);
    buf.extend_from_slice(&(HEADER_SIZE as u32).to_le_bytes());
    buf.push(op_code as u8);
    buf
}

// ── Payload encoders ──────────────────────────────────────────────────────────

fn encode_payload(buf: &mut Vec<u8>, msg: &Message<'_>) -> Result<(), ProtocolError> {
    match msg {
        Message::CheckIn(mac) => buf.extend_from_slice(mac.as_bytes()),
        Message::SetConfig(m) => encode_set_config_payload(buf, m)?,
        Message::SetLeds(m) => {
            buf.push(m.gpio_pin);
            buf.extend_from_slice(m.pixel_data);
        }
        Message::SetLedsBatched(entries) => encode_batched_payload(buf, entries)?,
        Message::Redraw | Message::GetLogs | Message::GetStatus => {}
        Message::SendLogs(text) => {
            buf.extend_from_slice(text.as_bytes());
            buf.push(0);
        }
        Message::SetBrightness(level) => buf.push(*level),
    }
    Ok(())
}

fn encode_set_config_payload(buf: &mut Vec<u8>, m: &SetConfigMessage) -> Result<(), ProtocolError> {
    let pins_used = u8::try_from(m.pins.len()).map_err(|_| {
        ProtocolError::MalformedPayload(format!("{} pins exceed the 255-pin limit", m.pins.len()))
    })?;
    buf.push(m.num_color_channels);
    buf.push(pins_used);
    for pin in &m.pins {
        buf.push(pin.pin_num);
        buf.push(pin.color_order as u8);
        buf.extend_from_slice(&pin.max_leds.to_le_bytes());
        buf.push(pin.led_type as u8);
    }
    Ok(())
}

fn encode_batched_payload(buf: &mut Vec<u8>, entries: &[BatchEntry<'_>]) -> Result<(), ProtocolError> {
    let batch_count = u8::try_from(entries.len()).map_err(|_| {
        ProtocolError::MalformedPayload(format!(
            "{} batch entries exceed the 255-entry limit",
            entries.len()
        ))
    })?;
    buf.push(batch_count);
    for (index, entry) in entries.iter().enumerate() {
        if entry.pixel_data.len() % BYTES_PER_PIXEL != 0 {
            return Err(ProtocolError::MalformedPayload(format!(
                "batch entry {index} has {} pixel bytes, not a multiple of {BYTES_PER_PIXEL}",
                entry.pixel_data.len()
            )));
        }
        let num_leds = u32::try_from(entry.num_leds()).map_err(|_| {
            ProtocolError::MalformedPayload(format!("batch entry {index} has too many LEDs"))
        })?;
        buf.push(entry.gpio_pin);
        buf.extend_from_slice(&num_leds.to_le_bytes());
        buf.extend_from_slice(entry.pixel_data);
    }
    Ok(())
}

// ── Payload decoders ──────────────────────────────────────────────────────────

fn decode_payload(op_code: OpCode, payload: &[u8]) -> Result<Message<'_>, ProtocolError> {
    match op_code {
        OpCode::CheckIn => {
            require_len(payload, 6, "CheckIn")?;
            let mut mac = [0u8; 6];
            mac.copy_from_slice(&payload[..6]);
            Ok(Message::CheckIn(MacAddress::new(mac)))
        }
        OpCode::SetConfig => decode_set_config(payload).map(Message::SetConfig),
        OpCode::SetLeds => {
            require_len(payload, 1, "SetLeds")?;
            Ok(Message::SetLeds(SetLedsMessage {
                gpio_pin: payload[0],
                pixel_data: &payload[1..],
            }))
        }
        OpCode::SetLedsBatched => decode_batched(payload).map(Message::SetLedsBatched),
        OpCode::Redraw => Ok(Message::Redraw),
        OpCode::GetLogs => Ok(Message::GetLogs),
        OpCode::GetStatus => Ok(Message::GetStatus),
        OpCode::SendLogs => {
            let text = match payload.iter().position(|&b| b == 0) {
                Some(nul) => &payload[..nul],
                None => payload,
            };
            Ok(Message::SendLogs(String::from_utf8_lossy(text)))
        }
        OpCode::SetBrightness => {
            require_len(payload, 1, "SetBrightness")?;
            Ok(Message::SetBrightness(payload[0]))
        }
    }
}

fn decode_set_config(p: &[u8]) -> Result<SetConfigMessage, ProtocolError> {
    require_len(p, 2, "SetConfig")?;
    let num_color_channels = p[0];
    let pins_used = p[1] as usize;
    require_len(p, 2 + pins_used * PIN_INFO_SIZE, "SetConfig pin table")?;

    let mut pins = Vec::with_capacity(pins_used);
    for i in 0..pins_used {
        let rec = &p[2 + i * PIN_INFO_SIZE..2 + (i + 1) * PIN_INFO_SIZE];
        let color_order = ColorOrder::try_from(rec[1])
            .map_err(|_| ProtocolError::MalformedPayload(format!("unknown color order: {}", rec[1])))?;
        let led_type = LedType::try_from(rec[6])
            .map_err(|_| ProtocolError::MalformedPayload(format!("unknown LED type: {}", rec[6])))?;
        pins.push(PinInfo {
            pin_num: rec[0],
            color_order,
            max_leds: u32::from_le_bytes([rec[2], rec[3], rec[4], rec[5]]),
            led_type,
        });
    }
    Ok(SetConfigMessage {
        num_color_channels,
        pins,
    })
}

fn decode_batched(p: &[u8]) -> Result<Vec<BatchEntry<'_>>, ProtocolError> {
    require_len(p, 1, "SetLedsBatched")?;
    let batch_count = p[0] as usize;
    let mut entries = Vec::with_capacity(batch_count);
    let mut offset = 1;

    for index in 0..batch_count {
        let remaining = p.len() - offset;
        if remaining < BATCH_ENTRY_HEADER_SIZE {
            return Err(ProtocolError::BatchOverrun {
                index,
                needed: BATCH_ENTRY_HEADER_SIZE,
                remaining,
            });
        }
        let gpio_pin = p[offset];
        let num_leds =
            u32::from_le_bytes([p[offset + 1], p[offset + 2], p[offset + 3], p[offset + 4]]) as usize;
        offset += BATCH_ENTRY_HEADER_SIZE;

        let remaining = p.len() - offset;
        let needed = num_leds.checked_mul(BYTES_PER_PIXEL).unwrap_or(usize::MAX);
        if needed > remaining {
            return Err(ProtocolError::BatchOverrun {
                index,
                needed: BATCH_ENTRY_HEADER_SIZE.saturating_add(needed),
                remaining: remaining + BATCH_ENTRY_HEADER_SIZE,
            });
        }
        entries.push(BatchEntry {
            gpio_pin,
            pixel_data: &p[offset..offset + needed],
        });
        offset += needed;
    }
    Ok(entries)
}

// ── Helper functions ──────────────────────────────────────────────────────────

fn require_len(buf: &[u8], needed: usize, context: &str) -> Result<(), ProtocolError> {
    if buf.len() < needed {
        Err(ProtocolError::MalformedPayload(format!(
            "{context}: need {needed} bytes, got {}",
            buf.len()
        )))
    } else {
        Ok(())
    }
}
