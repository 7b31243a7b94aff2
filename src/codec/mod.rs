//! Chunk wire codec
//!
//! One datagram carries exactly one chunk: a 2-byte big-endian sequence
//! number followed by raw little-endian int16 PCM, no padding, no checksum.
//!
//! The codec does not validate the sequence range or the sample count
//! against the expected chunk size; callers own that.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::CodecError;

/// Wire header size: the sequence number field
pub const HEADER_SIZE: usize = 2;

/// Serialize a sequence number and sample payload into one datagram.
///
/// Output length is exactly `2 + 2 * samples.len()`.
pub fn encode(seq: u16, samples: &[i16]) -> Bytes {
    let mut buf = BytesMut::with_capacity(HEADER_SIZE + samples.len() * 2);
    encode_into(&mut buf, seq, samples);
    buf.freeze()
}

/// Serialize into a caller-owned buffer, clearing it first.
///
/// Lets a per-period sender reuse one buffer instead of allocating a
/// datagram every period.
pub fn encode_into(buf: &mut BytesMut, seq: u16, samples: &[i16]) {
    buf.clear();
    buf.reserve(HEADER_SIZE + samples.len() * 2);
    buf.put_u16(seq);
    for &sample in samples {
        buf.put_i16_le(sample);
    }
}

/// Parse a datagram back into its sequence number and sample payload.
///
/// Fails with [`CodecError::MalformedPacket`] if the input is shorter
/// than the header or the payload is not a whole number of int16 samples.
pub fn decode(mut packet: &[u8]) -> Result<(u16, Vec<i16>), CodecError> {
    if packet.len() < HEADER_SIZE {
        return Err(CodecError::MalformedPacket(format!(
            "datagram of {} bytes is shorter than the {}-byte header",
            packet.len(),
            HEADER_SIZE
        )));
    }
    let seq = packet.get_u16();
    if packet.remaining() % 2 != 0 {
        return Err(CodecError::MalformedPacket(format!(
            "payload of {} bytes is not a whole number of int16 samples",
            packet.remaining()
        )));
    }

    let mut samples = Vec::with_capacity(packet.remaining() / 2);
    while packet.has_remaining() {
        samples.push(packet.get_i16_le());
    }
    Ok((seq, samples))
}
