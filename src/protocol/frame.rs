//! WebSocket frame decoding and encoding (RFC 6455 Section 5.2).
//!
//! The codec is a pure deserializer: it splits the wire layout apart and
//! reports what it saw, including the raw (still-masked) payload and the
//! masking key. It does not unmask and it does not enforce protocol rules;
//! the connection state machine owns conformance.

use crate::error::{Error, Result};
use crate::protocol::OpCode;

/// Maximum payload size for control frames (RFC 6455 Section 5.5).
pub const MAX_CONTROL_FRAME_PAYLOAD: usize = 125;

const MASK_FIN: u8 = 0x80;
const MASK_RSV1: u8 = 0x40;
const MASK_RSV2: u8 = 0x20;
const MASK_RSV3: u8 = 0x10;
const MASK_OPCODE: u8 = 0x0F;
const MASK_MASKED: u8 = 0x80;
const MASK_PAYLOAD_LEN: u8 = 0x7F;

const PAYLOAD_LEN_16BITS: u8 = 126;
const PAYLOAD_LEN_64BITS: u8 = 127;

/// A WebSocket frame as defined in RFC 6455.
///
/// ## Wire layout
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-------+-+-------------+-------------------------------+
/// |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
/// |I|S|S|S|  (4)  |A|     (7)     |            (16/64)            |
/// |N|V|V|V|       |S|             |  (if payload len==126/127)    |
/// | |1|2|3|       |K|             |                               |
/// +-+-+-+-+-------+-+-------------+-------------------------------+
/// |                 Masking key (4 bytes, if MASK=1)              |
/// +---------------------------------------------------------------+
/// |                         Payload data                          |
/// +---------------------------------------------------------------+
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Final fragment flag. True on the last frame of a message.
    pub fin: bool,
    /// Reserved bit 1. Signals a compressed payload under permessage-deflate.
    pub rsv1: bool,
    /// Reserved bit 2. Must be 0 without a negotiated extension.
    pub rsv2: bool,
    /// Reserved bit 3. Must be 0 without a negotiated extension.
    pub rsv3: bool,
    /// Frame opcode.
    pub opcode: OpCode,
    /// Masking key, mandatory on client frames and forbidden on server
    /// frames. The payload is stored as it appeared on the wire; the caller
    /// unmasks with [`apply_mask_fast`](crate::protocol::apply_mask_fast).
    pub mask: Option<[u8; 4]>,
    /// Payload bytes as seen on the wire.
    pub payload: Vec<u8>,
}

impl Frame {
    /// Create a new unmasked frame with clear reserved bits.
    #[must_use]
    pub fn new(fin: bool, opcode: OpCode, payload: Vec<u8>) -> Self {
        Self {
            fin,
            rsv1: false,
            rsv2: false,
            rsv3: false,
            opcode,
            mask: None,
            payload,
        }
    }

    /// Create a final text frame.
    #[must_use]
    pub fn text(data: impl Into<Vec<u8>>) -> Self {
        Self::new(true, OpCode::Text, data.into())
    }

    /// Create a final binary frame.
    #[must_use]
    pub fn binary(data: impl Into<Vec<u8>>) -> Self {
        Self::new(true, OpCode::Binary, data.into())
    }

    /// Create a close frame carrying the status code as a 2-byte
    /// big-endian payload.
    #[must_use]
    pub fn close(code: u16) -> Self {
        Self::new(true, OpCode::Close, code.to_be_bytes().to_vec())
    }

    /// Create a ping frame.
    #[must_use]
    pub fn ping(data: impl Into<Vec<u8>>) -> Self {
        Self::new(true, OpCode::Ping, data.into())
    }

    /// Create a pong frame.
    #[must_use]
    pub fn pong(data: impl Into<Vec<u8>>) -> Self {
        Self::new(true, OpCode::Pong, data.into())
    }

    /// Decode a single frame from the front of `buf`.
    ///
    /// Returns the frame and the number of bytes consumed. Every length
    /// check that fails yields the recoverable
    /// [`Error::UnexpectedEndOfPacket`]; the caller reads more bytes and
    /// decodes again.
    ///
    /// # Errors
    ///
    /// - [`Error::UnexpectedEndOfPacket`] if `buf` ends before the frame does
    /// - [`Error::InvalidOpcode`] for opcodes outside {0, 1, 2, 8, 9, 10}
    pub fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        if buf.len() < 2 {
            return Err(Error::UnexpectedEndOfPacket {
                needed: 2 - buf.len(),
            });
        }

        let byte0 = buf[0];
        let byte1 = buf[1];

        let fin = (byte0 & MASK_FIN) != 0;
        let rsv1 = (byte0 & MASK_RSV1) != 0;
        let rsv2 = (byte0 & MASK_RSV2) != 0;
        let rsv3 = (byte0 & MASK_RSV3) != 0;
        let opcode = OpCode::from_u8(byte0 & MASK_OPCODE)?;

        let masked = (byte1 & MASK_MASKED) != 0;
        let length_hint = byte1 & MASK_PAYLOAD_LEN;

        let (payload_len, mut header_len) = match length_hint {
            PAYLOAD_LEN_16BITS => {
                if buf.len() < 4 {
                    return Err(Error::UnexpectedEndOfPacket {
                        needed: 4 - buf.len(),
                    });
                }
                (u16::from_be_bytes([buf[2], buf[3]]) as u64, 4)
            }
            PAYLOAD_LEN_64BITS => {
                if buf.len() < 10 {
                    return Err(Error::UnexpectedEndOfPacket {
                        needed: 10 - buf.len(),
                    });
                }
                let len = u64::from_be_bytes([
                    buf[2], buf[3], buf[4], buf[5], buf[6], buf[7], buf[8], buf[9],
                ]);
                (len, 10)
            }
            hint => (hint as u64, 2),
        };

        let payload_len = usize::try_from(payload_len).map_err(|_| {
            Error::ProtocolViolation("frame length exceeds platform limits".into())
        })?;

        let mask = if masked {
            if buf.len() < header_len + 4 {
                return Err(Error::UnexpectedEndOfPacket {
                    needed: header_len + 4 - buf.len(),
                });
            }
            let key = [
                buf[header_len],
                buf[header_len + 1],
                buf[header_len + 2],
                buf[header_len + 3],
            ];
            header_len += 4;
            Some(key)
        } else {
            None
        };

        let total_len = header_len.checked_add(payload_len).ok_or_else(|| {
            Error::ProtocolViolation("frame length exceeds platform limits".into())
        })?;
        if buf.len() < total_len {
            return Err(Error::UnexpectedEndOfPacket {
                needed: total_len - buf.len(),
            });
        }

        let frame = Frame {
            fin,
            rsv1,
            rsv2,
            rsv3,
            opcode,
            mask,
            payload: buf[header_len..total_len].to_vec(),
        };
        Ok((frame, total_len))
    }

    /// Encode the frame into a fresh buffer.
    ///
    /// Chooses the inline, 16-bit or 64-bit length form, writes the masking
    /// key when present, and appends the payload as given. The payload is
    /// not transformed: a caller that sets a key must have masked the
    /// payload already. Server frames never carry a key.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let payload_len = self.payload.len();
        let mut out = Vec::with_capacity(14 + payload_len);

        let mut byte0 = self.opcode.as_u8();
        if self.fin {
            byte0 |= MASK_FIN;
        }
        if self.rsv1 {
            byte0 |= MASK_RSV1;
        }
        if self.rsv2 {
            byte0 |= MASK_RSV2;
        }
        if self.rsv3 {
            byte0 |= MASK_RSV3;
        }
        out.push(byte0);

        let mask_bit = if self.mask.is_some() { MASK_MASKED } else { 0 };
        if payload_len < PAYLOAD_LEN_16BITS as usize {
            out.push(mask_bit | payload_len as u8);
        } else if payload_len <= u16::MAX as usize {
            out.push(mask_bit | PAYLOAD_LEN_16BITS);
            out.extend_from_slice(&(payload_len as u16).to_be_bytes());
        } else {
            out.push(mask_bit | PAYLOAD_LEN_64BITS);
            out.extend_from_slice(&(payload_len as u64).to_be_bytes());
        }

        if let Some(key) = self.mask {
            out.extend_from_slice(&key);
        }
        out.extend_from_slice(&self.payload);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::apply_mask_fast;

    #[test]
    fn test_decode_unmasked_text_frame() {
        // FIN=1, opcode=1 (text), unmasked, payload="Hello"
        let data = &[0x81, 0x05, 0x48, 0x65, 0x6c, 0x6c, 0x6f];
        let (frame, consumed) = Frame::decode(data).unwrap();
        assert_eq!(consumed, 7);
        assert!(frame.fin);
        assert!(!frame.rsv1);
        assert!(!frame.rsv2);
        assert!(!frame.rsv3);
        assert_eq!(frame.opcode, OpCode::Text);
        assert!(frame.mask.is_none());
        assert_eq!(frame.payload, b"Hello");
    }

    #[test]
    fn test_decode_masked_text_frame() {
        // FIN=1, opcode=1 (text), mask key 37 fa 21 3d, masked "Hello"
        let data = &[
            0x81, 0x85, 0x37, 0xfa, 0x21, 0x3d, 0x7f, 0x9f, 0x4d, 0x51, 0x58,
        ];
        let (mut frame, consumed) = Frame::decode(data).unwrap();
        assert_eq!(consumed, 11);
        assert!(frame.fin);
        assert_eq!(frame.opcode, OpCode::Text);
        assert_eq!(frame.mask, Some([0x37, 0xfa, 0x21, 0x3d]));
        assert_eq!(frame.payload, [0x7f, 0x9f, 0x4d, 0x51, 0x58]);

        let key = frame.mask.unwrap();
        apply_mask_fast(&mut frame.payload, key);
        assert_eq!(frame.payload, b"Hello");
    }

    #[test]
    fn test_decode_fragmented_pair() {
        let first = &[0x01, 0x03, 0x48, 0x65, 0x6c];
        let (frame, _) = Frame::decode(first).unwrap();
        assert!(!frame.fin);
        assert_eq!(frame.opcode, OpCode::Text);
        assert_eq!(frame.payload, b"Hel");

        let second = &[0x80, 0x02, 0x6c, 0x6f];
        let (frame, _) = Frame::decode(second).unwrap();
        assert!(frame.fin);
        assert_eq!(frame.opcode, OpCode::Continuation);
        assert_eq!(frame.payload, b"lo");
    }

    #[test]
    fn test_decode_rsv_bits_independent() {
        // Each reserved bit is tested against its own mask.
        let (frame, _) = Frame::decode(&[0xc1, 0x00]).unwrap();
        assert!(frame.rsv1 && !frame.rsv2 && !frame.rsv3);
        let (frame, _) = Frame::decode(&[0xa1, 0x00]).unwrap();
        assert!(!frame.rsv1 && frame.rsv2 && !frame.rsv3);
        let (frame, _) = Frame::decode(&[0x91, 0x00]).unwrap();
        assert!(!frame.rsv1 && !frame.rsv2 && frame.rsv3);
    }

    #[test]
    fn test_decode_extended_length_16() {
        let mut data = vec![0x82, 0x7e, 0x01, 0x00];
        data.extend(vec![0xab; 256]);
        let (frame, consumed) = Frame::decode(&data).unwrap();
        assert_eq!(consumed, 4 + 256);
        assert_eq!(frame.opcode, OpCode::Binary);
        assert_eq!(frame.payload.len(), 256);
    }

    #[test]
    fn test_decode_extended_length_64() {
        let mut data = vec![0x82, 0x7f];
        data.extend(65536u64.to_be_bytes());
        data.extend(vec![0xcd; 65536]);
        let (frame, consumed) = Frame::decode(&data).unwrap();
        assert_eq!(consumed, 10 + 65536);
        assert_eq!(frame.payload.len(), 65536);
    }

    #[test]
    fn test_decode_empty_payload() {
        let (frame, consumed) = Frame::decode(&[0x81, 0x00]).unwrap();
        assert_eq!(consumed, 2);
        assert!(frame.payload.is_empty());
    }

    #[test]
    fn test_decode_invalid_opcode() {
        assert!(matches!(
            Frame::decode(&[0x83, 0x00]),
            Err(Error::InvalidOpcode(0x3))
        ));
        assert!(matches!(
            Frame::decode(&[0x8b, 0x00]),
            Err(Error::InvalidOpcode(0xB))
        ));
    }

    #[test]
    fn test_decode_incomplete_header() {
        assert!(matches!(
            Frame::decode(&[0x81]),
            Err(Error::UnexpectedEndOfPacket { needed: 1 })
        ));
        assert!(matches!(
            Frame::decode(&[]),
            Err(Error::UnexpectedEndOfPacket { needed: 2 })
        ));
    }

    #[test]
    fn test_decode_incomplete_extended_length() {
        assert!(matches!(
            Frame::decode(&[0x82, 0x7e, 0x01]),
            Err(Error::UnexpectedEndOfPacket { needed: 1 })
        ));
        assert!(matches!(
            Frame::decode(&[0x82, 0x7f, 0x00, 0x00, 0x00]),
            Err(Error::UnexpectedEndOfPacket { needed: 5 })
        ));
    }

    #[test]
    fn test_decode_incomplete_mask_key() {
        let data = &[0x81, 0x85, 0x37, 0xfa];
        assert!(matches!(
            Frame::decode(data),
            Err(Error::UnexpectedEndOfPacket { needed: 2 })
        ));
    }

    #[test]
    fn test_decode_incomplete_payload() {
        let data = &[0x81, 0x05, 0x48, 0x65, 0x6c];
        assert!(matches!(
            Frame::decode(data),
            Err(Error::UnexpectedEndOfPacket { needed: 2 })
        ));
    }

    #[test]
    fn test_decode_trailing_bytes_left_alone() {
        // Two frames back to back; decode consumes exactly the first.
        let data = &[0x81, 0x01, 0x41, 0x82, 0x01, 0x42];
        let (frame, consumed) = Frame::decode(data).unwrap();
        assert_eq!(consumed, 3);
        assert_eq!(frame.payload, b"A");
        let (frame, consumed) = Frame::decode(&data[3..]).unwrap();
        assert_eq!(consumed, 3);
        assert_eq!(frame.payload, b"B");
    }

    #[test]
    fn test_encode_unmasked_text() {
        let out = Frame::text(b"Hello".to_vec()).encode();
        assert_eq!(out, [0x81, 0x05, 0x48, 0x65, 0x6c, 0x6c, 0x6f]);
    }

    #[test]
    fn test_encode_length_forms() {
        let out = Frame::binary(vec![0u8; 125]).encode();
        assert_eq!(out[1], 125);
        assert_eq!(out.len(), 2 + 125);

        let out = Frame::binary(vec![0u8; 126]).encode();
        assert_eq!(out[1], 0x7e);
        assert_eq!(&out[2..4], &126u16.to_be_bytes());
        assert_eq!(out.len(), 4 + 126);

        let out = Frame::binary(vec![0u8; 65536]).encode();
        assert_eq!(out[1], 0x7f);
        assert_eq!(&out[2..10], &65536u64.to_be_bytes());
        assert_eq!(out.len(), 10 + 65536);
    }

    #[test]
    fn test_encode_close_code_payload() {
        let out = Frame::close(1000).encode();
        assert_eq!(out, [0x88, 0x02, 0x03, 0xe8]);
    }

    #[test]
    fn test_encode_mask_key_written_payload_untouched() {
        let mut frame = Frame::text(b"Hello".to_vec());
        frame.mask = Some([0x37, 0xfa, 0x21, 0x3d]);
        let out = frame.encode();
        assert_eq!(out[0], 0x81);
        assert_eq!(out[1], 0x85);
        assert_eq!(&out[2..6], &[0x37, 0xfa, 0x21, 0x3d]);
        // The encoder writes the payload as given; masking is the caller's job.
        assert_eq!(&out[6..], b"Hello");
    }

    #[test]
    fn test_encode_rsv1_bit() {
        let mut frame = Frame::text(b"x".to_vec());
        frame.rsv1 = true;
        let out = frame.encode();
        assert_eq!(out[0], 0xc1);
    }

    #[test]
    fn test_roundtrip() {
        for payload_len in [0usize, 1, 125, 126, 300, 65535, 65536] {
            let payload: Vec<u8> = (0..payload_len).map(|i| (i % 256) as u8).collect();
            let frame = Frame::binary(payload);
            let encoded = frame.encode();
            let (decoded, consumed) = Frame::decode(&encoded).unwrap();
            assert_eq!(consumed, encoded.len());
            assert_eq!(decoded, frame);
        }
    }
}
