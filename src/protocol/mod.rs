//! Protocol module - wire format, framing, and frame types.
//!
//! This module implements the binary protocol of the stack port:
//! - 1-byte header encoding/decoding
//! - Frame buffer for accumulating partial reads
//! - Request/response types with wire encoders

mod frame;
mod frame_buffer;
mod wire_format;

pub use frame::{build_pop_frame, build_push_frame, Request, Response};
pub use frame_buffer::{Decode, FrameBuffer};
pub use wire_format::{
    decode_header, encode_pop_response_header, Header, Op, BUSY_BYTE, HEADER_SIZE, LENGTH_MASK,
    MAX_PAYLOAD_SIZE, OP_MASK, PUSH_ACK,
};
