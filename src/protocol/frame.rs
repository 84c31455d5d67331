//! Request and response frames with typed accessors.
//!
//! Uses `bytes::Bytes` so a pushed payload moves into the stack and back out
//! to the popping session without copying.
//!
//! # Example
//!
//! ```
//! use lifo_server::protocol::{build_push_frame, Response};
//! use bytes::Bytes;
//!
//! let frame = build_push_frame(b"hello").unwrap();
//! assert_eq!(frame, vec![0x05, b'h', b'e', b'l', b'l', b'o']);
//!
//! let response = Response::Popped(Bytes::from_static(b"hi"));
//! assert_eq!(response.encode().unwrap().as_ref(), &[0x02, b'h', b'i']);
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use super::wire_format::{
    encode_pop_response_header, Header, BUSY_BYTE, HEADER_SIZE, MAX_PAYLOAD_SIZE, PUSH_ACK,
};
use crate::error::{LifoError, Result};

/// A complete client request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Store the payload on top of the stack.
    Push(Bytes),
    /// Remove and return the top of the stack.
    Pop,
}

impl Request {
    /// Short name used in log lines.
    pub fn name(&self) -> &'static str {
        match self {
            Request::Push(_) => "push",
            Request::Pop => "pop",
        }
    }

    /// Payload carried by a push (`None` for pop).
    #[inline]
    pub fn payload(&self) -> Option<&Bytes> {
        match self {
            Request::Push(payload) => Some(payload),
            Request::Pop => None,
        }
    }

    /// Check if this is a pop request.
    #[inline]
    pub fn is_pop(&self) -> bool {
        matches!(self, Request::Pop)
    }
}

/// A server response. Every session sends exactly one before closing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Push stored (`0x00`).
    PushAck,
    /// Pop result (`len` + payload).
    Popped(Bytes),
    /// Admission rejected (`0xFF`).
    Busy,
}

impl Response {
    /// Encode to wire bytes.
    ///
    /// Fails only if a popped payload is longer than the 7-bit limit, which
    /// cannot happen for payloads that went through the frame buffer.
    pub fn encode(&self) -> Result<Bytes> {
        match self {
            Response::PushAck => Ok(Bytes::from_static(&[PUSH_ACK])),
            Response::Busy => Ok(Bytes::from_static(&[BUSY_BYTE])),
            Response::Popped(payload) => {
                let header = encode_pop_response_header(payload.len())?;
                let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload.len());
                buf.put_u8(header);
                buf.extend_from_slice(payload);
                Ok(buf.freeze())
            }
        }
    }

    /// Total size of this response on the wire.
    #[inline]
    pub fn size(&self) -> usize {
        match self {
            Response::Popped(payload) => HEADER_SIZE + payload.len(),
            _ => 1,
        }
    }
}

/// Build a complete push frame (header + payload) for a client to send.
pub fn build_push_frame(payload: &[u8]) -> Result<Vec<u8>> {
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(LifoError::Protocol(format!(
            "Payload size {} exceeds maximum {}",
            payload.len(),
            MAX_PAYLOAD_SIZE
        )));
    }
    let mut frame = Vec::with_capacity(HEADER_SIZE + payload.len());
    frame.push(Header::push(payload.len() as u8).encode());
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Build a pop request frame.
#[inline]
pub fn build_pop_frame() -> [u8; HEADER_SIZE] {
    [Header::pop().encode()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_ack_encoding() {
        let bytes = Response::PushAck.encode().unwrap();
        assert_eq!(bytes.as_ref(), &[0x00]);
        assert_eq!(Response::PushAck.size(), 1);
    }

    #[test]
    fn test_busy_encoding() {
        let bytes = Response::Busy.encode().unwrap();
        assert_eq!(bytes.as_ref(), &[0xFF]);
    }

    #[test]
    fn test_popped_encoding() {
        let response = Response::Popped(Bytes::from_static(b"abc"));
        let bytes = response.encode().unwrap();
        assert_eq!(bytes.as_ref(), &[0x03, b'a', b'b', b'c']);
        assert_eq!(response.size(), 4);
    }

    #[test]
    fn test_popped_empty_payload() {
        let bytes = Response::Popped(Bytes::new()).encode().unwrap();
        assert_eq!(bytes.as_ref(), &[0x00]);
    }

    #[test]
    fn test_popped_max_payload() {
        let payload = Bytes::from(vec![0xAB; MAX_PAYLOAD_SIZE]);
        let bytes = Response::Popped(payload).encode().unwrap();
        assert_eq!(bytes[0], 0x7F);
        assert_eq!(bytes.len(), 128);
    }

    #[test]
    fn test_popped_oversized_payload_rejected() {
        let payload = Bytes::from(vec![0u8; MAX_PAYLOAD_SIZE + 1]);
        assert!(Response::Popped(payload).encode().is_err());
    }

    #[test]
    fn test_build_push_frame() {
        let frame = build_push_frame(b"xyz").unwrap();
        assert_eq!(frame, vec![0x03, b'x', b'y', b'z']);

        let empty = build_push_frame(b"").unwrap();
        assert_eq!(empty, vec![0x00]);
    }

    #[test]
    fn test_build_push_frame_too_large() {
        let payload = vec![0u8; 200];
        assert!(build_push_frame(&payload).is_err());
    }

    #[test]
    fn test_build_pop_frame() {
        assert_eq!(build_pop_frame(), [0x80]);
    }

    #[test]
    fn test_request_accessors() {
        let push = Request::Push(Bytes::from_static(b"p"));
        assert_eq!(push.name(), "push");
        assert_eq!(push.payload().map(|p| p.as_ref()), Some(&b"p"[..]));
        assert!(!push.is_pop());

        assert_eq!(Request::Pop.name(), "pop");
        assert!(Request::Pop.payload().is_none());
        assert!(Request::Pop.is_pop());
    }
}
