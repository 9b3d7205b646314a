//! Protocol module containing message types, the binary codec, and the
//! async frame reader shared by both ends of a connection.

pub mod codec;
pub mod messages;
pub mod stream;

pub use codec::{
    decode_check_in, decode_check_in_header, decode_header, decode_message, encode_check_in, encode_get_logs,
    encode_get_status, encode_into, encode_message, encode_redraw, encode_send_logs,
    encode_set_config, encode_set_leds, encode_set_leds_batched, ProtocolError,
};
pub use messages::*;
pub use stream::{read_frame, read_frame_into, FrameError};
