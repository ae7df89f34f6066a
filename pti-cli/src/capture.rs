//! Capture-file streaming: block framing over a byte stream plus the
//! per-block decimation loop.
//!
//! A capture file is a 30-byte opaque header followed by back-to-back block
//! images. The stream is read forward-only; a short read at a block boundary
//! is a clean end-of-stream, a short read inside a block is a truncated
//! capture.

use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::Path;

use pti_core::block::{self, block_bytes, FILE_HEADER_BYTES};
use pti_core::lockin;
use pti_core::reference::Reference;
use pti_core::types::{DecimatedRow, PipelineOptions, PtiError, RawBlock, Result};

use crate::csv_io::DecimationWriter;

/// Forward-only reader of acquisition blocks. The byte buffer and the decoded
/// block are allocated once and reused for the life of the stream.
pub struct BlockStream<R: Read> {
    inner: R,
    buffer: Vec<u8>,
    block: RawBlock,
}

impl BlockStream<BufReader<File>> {
    /// Open a capture file and position past the global header.
    pub fn open(path: impl AsRef<Path>, samples: usize) -> Result<Self> {
        BlockStream::new(BufReader::new(File::open(path)?), samples)
    }
}

impl<R: Read> BlockStream<R> {
    /// Wrap a byte stream, consuming the 30-byte file header.
    pub fn new(mut inner: R, samples: usize) -> Result<Self> {
        let mut header = [0u8; FILE_HEADER_BYTES];
        inner.read_exact(&mut header)?;
        Ok(BlockStream {
            inner,
            buffer: vec![0u8; block_bytes(samples)],
            block: RawBlock::zeroed(samples),
        })
    }

    pub fn samples(&self) -> usize {
        self.block.samples()
    }

    /// Read the next block, or `None` at a clean end-of-stream.
    pub fn next_block(&mut self) -> Result<Option<&mut RawBlock>> {
        let expected = self.buffer.len();
        let mut filled = 0;
        while filled < expected {
            let n = self.inner.read(&mut self.buffer[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        if filled == 0 {
            return Ok(None);
        }
        if filled < expected {
            return Err(PtiError::TruncatedBlock {
                expected,
                actual: filled,
            });
        }
        block::decode_block_into(&self.buffer, &mut self.block)?;
        Ok(Some(&mut self.block))
    }
}

/// Drive the block cycle: read, decimate, write one CSV row per block.
///
/// The reference pair is scratch storage owned by this loop, reused across
/// blocks. Returns the number of blocks processed.
pub fn decimate_stream<R: Read, W: Write>(
    stream: &mut BlockStream<R>,
    writer: &mut DecimationWriter<W>,
    options: PipelineOptions,
) -> Result<usize> {
    let mut reference = Reference::with_capacity(stream.samples());
    let mut blocks = 0;
    loop {
        let block = match stream.next_block()? {
            Some(block) => block,
            None => break,
        };
        let dc = lockin::dc_means(block);
        if options.common_noise_rejection {
            lockin::common_noise_rejection(block, &dc);
        }
        reference.update(&block.reference)?;
        let (x, y) = lockin::lock_in_filter(block, &reference);
        writer.write_row(&DecimatedRow { dc, x, y })?;
        blocks += 1;
    }
    writer.flush()?;
    Ok(blocks)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
