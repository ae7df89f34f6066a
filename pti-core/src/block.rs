//! Acquisition block decoding: raw byte images to sample arrays.
//!
//! Wire layout per block:
//! 1. 8-byte preamble: two 32-bit integers written by the acquisition tool,
//!    carrying sizing diagnostics the pipeline does not use
//! 2. Seven channel arrays of S little-endian IEEE-754 f64 samples each, in
//!    the fixed order dc1, dc2, dc3, ref, ac1, ac2, ac3
//!
//! A 30-byte opaque header precedes the first block of a capture file. The
//! caller owns stream positioning; this module only decodes complete block
//! images.

use byteorder::{ByteOrder, LittleEndian};

use crate::types::{PtiError, RawBlock, Result};

/// Opaque capture-file header, skipped once before the first block.
pub const FILE_HEADER_BYTES: usize = 30;

/// Per-block preamble (two ignored 32-bit integers).
pub const BLOCK_PREAMBLE_BYTES: usize = 8;

/// Channels in one block, in wire order.
pub const BLOCK_CHANNELS: usize = 7;

/// Samples per channel at the standard 50 kHz rate and 1 s decimation
/// interval.
pub const DEFAULT_SAMPLES: usize = 50_000;

/// Total bytes of one block image, preamble included.
pub const fn block_bytes(samples: usize) -> usize {
    BLOCK_PREAMBLE_BYTES + BLOCK_CHANNELS * 8 * samples
}

/// Decode one complete block image into sample arrays.
///
/// `bytes` must hold exactly [`block_bytes`]`(samples)`; anything shorter is
/// a truncated block (the caller distinguishes a clean end-of-stream by
/// having read zero bytes).
pub fn decode_block(bytes: &[u8], samples: usize) -> Result<RawBlock> {
    let mut block = RawBlock::zeroed(samples);
    decode_block_into(bytes, &mut block)?;
    Ok(block)
}

/// Decode one block image into an existing block, reusing its arrays.
pub fn decode_block_into(bytes: &[u8], block: &mut RawBlock) -> Result<()> {
    let samples = block.samples();
    let expected = block_bytes(samples);
    if bytes.len() != expected {
        return Err(PtiError::TruncatedBlock {
            expected,
            actual: bytes.len(),
        });
    }

    let channel_bytes = 8 * samples;
    let mut offset = BLOCK_PREAMBLE_BYTES;
    for channel in [
        &mut block.dc1,
        &mut block.dc2,
        &mut block.dc3,
        &mut block.reference,
        &mut block.ac1,
        &mut block.ac2,
        &mut block.ac3,
    ] {
        LittleEndian::read_f64_into(&bytes[offset..offset + channel_bytes], channel);
        offset += channel_bytes;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
