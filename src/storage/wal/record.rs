//! Log record framing.

use byteorder::{BigEndian, ByteOrder};

/// Multiplier of the rolling checksum.
pub const SEED: u32 = 13331;

/// `[4B length][4B checksum]` in front of every payload.
pub const FRAME_HEADER_LEN: usize = 8;

const OF_SIZE: usize = 0;
const OF_CHECKSUM: usize = 4;

/// Fold `data` into `seed`: `x = x * 13331 + byte`, wrapping.
pub fn checksum(seed: u32, data: &[u8]) -> u32 {
    data.iter()
        .fold(seed, |x, &b| x.wrapping_mul(SEED).wrapping_add(b as u32))
}

/// Frame a payload for appending to the log.
pub fn wrap(payload: &[u8]) -> Vec<u8> {
    let mut frame = vec![0u8; FRAME_HEADER_LEN + payload.len()];
    BigEndian::write_u32(&mut frame[OF_SIZE..OF_CHECKSUM], payload.len() as u32);
    BigEndian::write_u32(
        &mut frame[OF_CHECKSUM..FRAME_HEADER_LEN],
        checksum(0, payload),
    );
    frame[FRAME_HEADER_LEN..].copy_from_slice(payload);
    frame
}

/// Payload length and checksum from a frame header.
pub fn parse_header(header: &[u8]) -> (u32, u32) {
    (
        BigEndian::read_u32(&header[OF_SIZE..OF_CHECKSUM]),
        BigEndian::read_u32(&header[OF_CHECKSUM..FRAME_HEADER_LEN]),
    )
}
