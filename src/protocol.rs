//! Wire format for audio packets
//!
//! Every datagram is a fixed little-endian header followed by the
//! compressed payload. Only `HEADER_LEN + payload_size` bytes go on
//! the air.
//!
//! ```text
//! ┌──────────┬───────────┬──────────────┬───────┬──────────┬─────────────┐
//! │ sequence │ timestamp │ payload_size │ flags │ reserved │ payload     │
//! │ u32 LE   │ u32 LE    │ u16 LE       │ u8    │ u8 (= 0) │ ≤ 256 bytes │
//! └──────────┴───────────┴──────────────┴───────┴──────────┴─────────────┘
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::PacketError;

/// Size of the fixed header in bytes
pub const HEADER_LEN: usize = 12;

/// Maximum compressed payload carried by one packet
pub const MAX_PAYLOAD: usize = 256;

/// Largest datagram the protocol ever produces
pub const MAX_DATAGRAM: usize = HEADER_LEN + MAX_PAYLOAD;

/// Packet flag bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct PacketFlags(u8);

impl PacketFlags {
    /// Sender is transmitting live microphone audio
    pub const PTT: u8 = 1 << 0;
    /// Sender has its call signal raised
    pub const CALL: u8 = 1 << 1;

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    pub fn new(ptt: bool, call: bool) -> Self {
        let mut bits = 0;
        if ptt {
            bits |= Self::PTT;
        }
        if call {
            bits |= Self::CALL;
        }
        Self(bits)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn ptt(self) -> bool {
        self.0 & Self::PTT != 0
    }

    pub const fn call(self) -> bool {
        self.0 & Self::CALL != 0
    }
}

/// A decoded audio packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioPacket {
    /// Sender-local counter, wraps at 2^32
    pub sequence: u32,
    /// Capture time in microseconds, truncated to 32 bits
    pub timestamp: u32,
    pub flags: PacketFlags,
    /// Opaque compressed audio; empty for flag-only packets
    pub payload: Bytes,
}

impl AudioPacket {
    /// Number of valid payload bytes
    pub fn payload_size(&self) -> usize {
        self.payload.len()
    }

    /// True when the packet carries audio rather than only flags
    pub fn has_audio(&self) -> bool {
        !self.payload.is_empty()
    }

    /// Size of this packet on the wire
    pub fn wire_len(&self) -> usize {
        HEADER_LEN + self.payload.len()
    }

    /// Serialize this packet
    pub fn to_bytes(&self) -> Result<Bytes, PacketError> {
        encode(self.sequence, self.timestamp, self.flags, &self.payload)
    }
}

/// Build a datagram from its fields.
///
/// The result is exactly `HEADER_LEN + payload.len()` bytes long.
pub fn encode(
    sequence: u32,
    timestamp: u32,
    flags: PacketFlags,
    payload: &[u8],
) -> Result<Bytes, PacketError> {
    if payload.len() > MAX_PAYLOAD {
        return Err(PacketError::PayloadTooLarge(payload.len()));
    }

    let mut buf = BytesMut::with_capacity(HEADER_LEN + payload.len());
    buf.put_u32_le(sequence);
    buf.put_u32_le(timestamp);
    buf.put_u16_le(payload.len() as u16);
    buf.put_u8(flags.bits());
    buf.put_u8(0); // reserved
    buf.put_slice(payload);

    Ok(buf.freeze())
}

/// Parse a received datagram.
///
/// Rejects datagrams shorter than the header, declared payloads above
/// capacity, and declared payloads longer than the bytes actually
/// received. Trailing bytes past the declared payload are ignored, as is
/// the reserved byte.
pub fn decode(datagram: &[u8]) -> Result<AudioPacket, PacketError> {
    if datagram.len() < HEADER_LEN {
        return Err(PacketError::TooShort(datagram.len()));
    }

    let mut header = &datagram[..HEADER_LEN];
    let sequence = header.get_u32_le();
    let timestamp = header.get_u32_le();
    let payload_size = header.get_u16_le() as usize;
    let flags = PacketFlags::from_bits(header.get_u8());
    let _reserved = header.get_u8();

    if payload_size > MAX_PAYLOAD {
        return Err(PacketError::PayloadTooLarge(payload_size));
    }

    let available = datagram.len() - HEADER_LEN;
    if payload_size > available {
        return Err(PacketError::Truncated {
            declared: payload_size,
            available,
        });
    }

    Ok(AudioPacket {
        sequence,
        timestamp,
        flags,
        payload: Bytes::copy_from_slice(&datagram[HEADER_LEN..HEADER_LEN + payload_size]),
    })
}
