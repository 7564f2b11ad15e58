//! RFC 6455 frame codec.
//!
//! Wire-level frame parsing and encoding over `tokio_util`'s codec seam.
//! The decoder defends against hostile length fields: 64-bit lengths with
//! the high bit set are rejected outright, declared lengths are checked
//! against the configured ceiling before any buffer growth, and additions
//! onto the existing buffer use checked arithmetic.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::WsError;

/// Close code: normal closure
pub const CLOSE_NORMAL: u16 = 1000;
/// Close code: endpoint going away
pub const CLOSE_GOING_AWAY: u16 = 1001;
/// Close code: protocol error
pub const CLOSE_PROTOCOL_ERROR: u16 = 1002;
/// Close code: unsupported data
pub const CLOSE_UNSUPPORTED_DATA: u16 = 1003;
/// Close code: no status received (never sent on the wire)
pub const CLOSE_NO_STATUS: u16 = 1005;
/// Close code: abnormal closure (never sent on the wire)
pub const CLOSE_ABNORMAL: u16 = 1006;
/// Close code: invalid frame payload data
pub const CLOSE_INVALID_PAYLOAD: u16 = 1007;
/// Close code: policy violation
pub const CLOSE_POLICY_VIOLATION: u16 = 1008;
/// Close code: message too big
pub const CLOSE_MESSAGE_TOO_BIG: u16 = 1009;
/// Close code: mandatory extension missing
pub const CLOSE_MANDATORY_EXTENSION: u16 = 1010;
/// Close code: internal server error
pub const CLOSE_INTERNAL_ERROR: u16 = 1011;
/// Close code: service restart
pub const CLOSE_SERVICE_RESTART: u16 = 1012;
/// Close code: try again later
pub const CLOSE_TRY_AGAIN_LATER: u16 = 1013;
/// Close code: TLS handshake failure (never sent on the wire)
pub const CLOSE_TLS_HANDSHAKE: u16 = 1015;

/// Frame opcode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    /// Continuation of a fragmented message
    Continuation,
    /// UTF-8 text frame
    Text,
    /// Binary frame
    Binary,
    /// Close control frame
    Close,
    /// Ping control frame
    Ping,
    /// Pong control frame
    Pong,
}

impl Opcode {
    /// Whether this is a control opcode
    pub fn is_control(self) -> bool {
        matches!(self, Self::Close | Self::Ping | Self::Pong)
    }

    fn from_bits(bits: u8) -> Result<Self, WsError> {
        match bits {
            0x0 => Ok(Self::Continuation),
            0x1 => Ok(Self::Text),
            0x2 => Ok(Self::Binary),
            0x8 => Ok(Self::Close),
            0x9 => Ok(Self::Ping),
            0xA => Ok(Self::Pong),
            other => Err(WsError::Protocol(format!("reserved opcode {other:#x}"))),
        }
    }

    fn bits(self) -> u8 {
        match self {
            Self::Continuation => 0x0,
            Self::Text => 0x1,
            Self::Binary => 0x2,
            Self::Close => 0x8,
            Self::Ping => 0x9,
            Self::Pong => 0xA,
        }
    }
}

/// A parsed WebSocket frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Final fragment flag
    pub fin: bool,
    /// Frame opcode
    pub opcode: Opcode,
    /// Unmasked payload
    pub payload: Bytes,
}

impl Frame {
    /// A final data/control frame
    pub fn new(opcode: Opcode, payload: impl Into<Bytes>) -> Self {
        Self {
            fin: true,
            opcode,
            payload: payload.into(),
        }
    }

    /// A close frame with code and UTF-8 reason
    pub fn close(code: u16, reason: &str) -> Self {
        let mut payload = BytesMut::with_capacity(2 + reason.len());
        payload.put_u16(code);
        payload.put_slice(reason.as_bytes());
        Self::new(Opcode::Close, payload.freeze())
    }

    /// Parse a close payload into code and reason. An empty payload means
    /// no status was received (1005).
    pub fn parse_close(payload: &[u8]) -> (u16, String) {
        if payload.len() < 2 {
            return (CLOSE_NO_STATUS, String::new());
        }
        let code = u16::from_be_bytes([payload[0], payload[1]]);
        let reason = String::from_utf8_lossy(&payload[2..]).into_owned();
        (code, reason)
    }
}

/// Frame-level codec configuration and state
#[derive(Debug)]
pub struct FrameCodec {
    /// Reject unmasked frames (a server must)
    require_mask: bool,
    /// Mask outgoing frames (a client must)
    mask_writes: bool,
    /// Per-frame payload ceiling
    max_frame_size: usize,
}

impl FrameCodec {
    /// Codec for the server role: inbound frames must be masked, outbound
    /// frames are sent clear
    pub fn server(max_frame_size: usize) -> Self {
        Self {
            require_mask: true,
            mask_writes: false,
            max_frame_size,
        }
    }

    /// Codec for the client role: outbound frames are masked
    pub fn client(max_frame_size: usize) -> Self {
        Self {
            require_mask: false,
            mask_writes: true,
            max_frame_size,
        }
    }
}

fn apply_mask(payload: &mut [u8], key: [u8; 4]) {
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= key[i % 4];
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = WsError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, WsError> {
        if src.len() < 2 {
            return Ok(None);
        }

        let b0 = src[0];
        let b1 = src[1];
        let fin = b0 & 0x80 != 0;
        let rsv = b0 & 0x70;
        if rsv != 0 {
            return Err(WsError::Protocol("non-zero RSV bits without negotiated extension".into()));
        }
        let opcode = Opcode::from_bits(b0 & 0x0F)?;
        let masked = b1 & 0x80 != 0;
        let len7 = (b1 & 0x7F) as u64;

        let mut header_len = 2usize;
        let payload_len: u64 = match len7 {
            126 => {
                if src.len() < 4 {
                    return Ok(None);
                }
                header_len += 2;
                u64::from(u16::from_be_bytes([src[2], src[3]]))
            }
            127 => {
                if src.len() < 10 {
                    return Ok(None);
                }
                header_len += 8;
                let len = u64::from_be_bytes([
                    src[2], src[3], src[4], src[5], src[6], src[7], src[8], src[9],
                ]);
                if len & (1 << 63) != 0 {
                    return Err(WsError::Protocol("64-bit payload length with high bit set".into()));
                }
                len
            }
            n => n,
        };

        if opcode.is_control() && (payload_len > 125 || !fin) {
            return Err(WsError::Protocol("fragmented or oversized control frame".into()));
        }
        if payload_len > self.max_frame_size as u64 {
            return Err(WsError::MessageTooBig {
                size: payload_len,
                limit: self.max_frame_size,
            });
        }
        // The length fits the ceiling; make sure header + mask + payload
        // also fits the platform size type before reserving.
        let payload_len = usize::try_from(payload_len)
            .map_err(|_| WsError::Protocol("payload length exceeds addressable memory".into()))?;
        if masked {
            header_len = header_len
                .checked_add(4)
                .ok_or_else(|| WsError::Protocol("frame header overflow".into()))?;
        }
        let total = header_len
            .checked_add(payload_len)
            .ok_or_else(|| WsError::Protocol("frame length overflow".into()))?;

        if self.require_mask && !masked {
            return Err(WsError::Protocol("client frame not masked".into()));
        }

        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        src.advance(if masked { header_len - 4 } else { header_len });
        let key = if masked {
            let key = [src[0], src[1], src[2], src[3]];
            src.advance(4);
            Some(key)
        } else {
            None
        };
        let mut payload = src.split_to(payload_len);
        if let Some(key) = key {
            apply_mask(&mut payload, key);
        }

        Ok(Some(Frame {
            fin,
            opcode,
            payload: payload.freeze(),
        }))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = WsError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), WsError> {
        let payload_len = frame.payload.len();
        dst.reserve(payload_len + 14);

        let mut b0 = frame.opcode.bits();
        if frame.fin {
            b0 |= 0x80;
        }
        dst.put_u8(b0);

        let mask_bit = if self.mask_writes { 0x80 } else { 0x00 };
        if payload_len < 126 {
            dst.put_u8(mask_bit | payload_len as u8);
        } else if payload_len <= u16::MAX as usize {
            dst.put_u8(mask_bit | 126);
            dst.put_u16(payload_len as u16);
        } else {
            dst.put_u8(mask_bit | 127);
            dst.put_u64(payload_len as u64);
        }

        if self.mask_writes {
            let key = fastrand::u32(..).to_be_bytes();
            dst.put_slice(&key);
            let mut masked = frame.payload.to_vec();
            apply_mask(&mut masked, key);
            dst.put_slice(&masked);
        } else {
            dst.put_slice(&frame.payload);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn masked_frame(fin: bool, opcode: u8, payload: &[u8]) -> BytesMut {
        let key = [0x11, 0x22, 0x33, 0x44];
        let mut buf = BytesMut::new();
        buf.put_u8(if fin { 0x80 | opcode } else { opcode });
        assert!(payload.len() < 126);
        buf.put_u8(0x80 | payload.len() as u8);
        buf.put_slice(&key);
        let mut masked = payload.to_vec();
        apply_mask(&mut masked, key);
        buf.put_slice(&masked);
        buf
    }

    #[test]
    fn test_decode_masked_text() {
        let mut codec = FrameCodec::server(1024);
        let mut buf = masked_frame(true, 0x1, b"hi");
        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert!(frame.fin);
        assert_eq!(frame.opcode, Opcode::Text);
        assert_eq!(&frame.payload[..], b"hi");
    }

    #[test]
    fn test_unmasked_client_frame_rejected() {
        let mut codec = FrameCodec::server(1024);
        let mut buf = BytesMut::new();
        buf.put_u8(0x81);
        buf.put_u8(0x02);
        buf.put_slice(b"hi");
        assert!(matches!(
            codec.decode(&mut buf),
            Err(WsError::Protocol(_))
        ));
    }

    #[test]
    fn test_partial_frame_waits() {
        let mut codec = FrameCodec::server(1024);
        let full = masked_frame(true, 0x2, b"abcdef");
        let mut buf = BytesMut::from(&full[..4]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.put_slice(&full[4..]);
        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(&frame.payload[..], b"abcdef");
    }

    #[test]
    fn test_extended_length_high_bit_rejected() {
        let mut codec = FrameCodec::server(usize::MAX);
        let mut buf = BytesMut::new();
        buf.put_u8(0x82);
        buf.put_u8(0x80 | 127);
        buf.put_u64(1 << 63);
        assert!(matches!(codec.decode(&mut buf), Err(WsError::Protocol(_))));
    }

    #[test]
    fn test_oversized_declared_length_rejected_before_buffering() {
        let mut codec = FrameCodec::server(1024);
        let mut buf = BytesMut::new();
        buf.put_u8(0x82);
        buf.put_u8(0x80 | 127);
        buf.put_u64(1024 * 1024);
        match codec.decode(&mut buf) {
            Err(WsError::MessageTooBig { size, limit }) => {
                assert_eq!(size, 1024 * 1024);
                assert_eq!(limit, 1024);
            }
            other => panic!("expected MessageTooBig, got {other:?}"),
        }
    }

    #[test]
    fn test_rsv_bits_rejected() {
        let mut codec = FrameCodec::server(1024);
        let mut buf = masked_frame(true, 0x1, b"x");
        buf[0] |= 0x40;
        assert!(matches!(codec.decode(&mut buf), Err(WsError::Protocol(_))));
    }

    #[test]
    fn test_fragmented_control_frame_rejected() {
        let mut codec = FrameCodec::server(1024);
        let mut buf = masked_frame(false, 0x9, b"p");
        assert!(matches!(codec.decode(&mut buf), Err(WsError::Protocol(_))));
    }

    #[test]
    fn test_encode_decode_roundtrip_via_client_codec() {
        let mut client = FrameCodec::client(1024);
        let mut server = FrameCodec::server(1024);
        let mut wire = BytesMut::new();
        client
            .encode(Frame::new(Opcode::Text, "payload"), &mut wire)
            .unwrap();
        let frame = server.decode(&mut wire).unwrap().unwrap();
        assert_eq!(frame.opcode, Opcode::Text);
        assert_eq!(&frame.payload[..], b"payload");
    }

    #[test]
    fn test_server_writes_unmasked() {
        let mut server = FrameCodec::server(1024);
        let mut wire = BytesMut::new();
        server
            .encode(Frame::new(Opcode::Text, "ok"), &mut wire)
            .unwrap();
        assert_eq!(wire[1] & 0x80, 0);
    }

    #[test]
    fn test_close_frame_roundtrip() {
        let frame = Frame::close(CLOSE_MESSAGE_TOO_BIG, "message too big");
        let (code, reason) = Frame::parse_close(&frame.payload);
        assert_eq!(code, CLOSE_MESSAGE_TOO_BIG);
        assert_eq!(reason, "message too big");
    }

    #[test]
    fn test_close_without_status() {
        let (code, reason) = Frame::parse_close(b"");
        assert_eq!(code, CLOSE_NO_STATUS);
        assert!(reason.is_empty());
    }

    #[test]
    fn test_extended_16bit_length() {
        let mut codec = FrameCodec::server(200_000);
        let payload = vec![0xABu8; 300];
        let key = [9, 9, 9, 9];
        let mut buf = BytesMut::new();
        buf.put_u8(0x82);
        buf.put_u8(0x80 | 126);
        buf.put_u16(300);
        buf.put_slice(&key);
        let mut masked = payload.clone();
        apply_mask(&mut masked, key);
        buf.put_slice(&masked);

        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.payload.len(), 300);
        assert_eq!(&frame.payload[..], &payload[..]);
    }
}
