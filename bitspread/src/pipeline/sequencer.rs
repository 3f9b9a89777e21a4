//! Bit-packed element I/O: de-packing fixed-width integers from a byte
//! stream and packing them back out, with sub-byte alignment carried across
//! calls on both ends.

use std::io::{Read, Write};

use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use super::{ElementSource, Endianness};
use crate::error::PipelineError;

// ELEMENT READER
// ================================================================================================

/// Reads fixed-width unsigned integers from a byte stream.
///
/// Bits are consumed MSB-first; byte-aligned little-endian elements are
/// byte-swapped after extraction. A trailing partial element at end of stream
/// is discarded with a warning (element-boundary truncation, never byte
/// boundary). Maintains a running SHA-256 digest of every byte read.
pub struct ElementReader<R: Read> {
    inner: R,
    width: u32,
    endian: Endianness,
    buf: Vec<u8>,
    bit_pos: usize,
    eof: bool,
    digest: Sha256,
    bytes_read: u64,
    bits_delivered: u64,
    max_bits: Option<u64>,
    misaligned_chunk: Option<usize>,
    little_warned: bool,
}

impl<R: Read> ElementReader<R> {
    /// Wraps `inner`, de-packing `width`-bit elements.
    ///
    /// `max_bits` caps the logical bits delivered; the cap truncates at
    /// element boundaries.
    pub fn new(inner: R, width: u32, endian: Endianness, max_bits: Option<u64>) -> Self {
        Self {
            inner,
            width,
            endian,
            buf: Vec::new(),
            bit_pos: 0,
            eof: false,
            digest: Sha256::new(),
            bytes_read: 0,
            bits_delivered: 0,
            max_bits,
            misaligned_chunk: None,
            little_warned: false,
        }
    }

    fn available_bits(&self) -> usize {
        self.buf.len() * 8 - self.bit_pos
    }

    /// Refills the buffer until a full element is available or the stream
    /// ends. Chunk sizing is a throughput knob only; leftover bits are
    /// carried across refills so chunk boundaries never split an element.
    fn refill(&mut self) -> Result<(), PipelineError> {
        // Drop fully-consumed bytes before reading more.
        let consumed = self.bit_pos / 8;
        if consumed > 0 {
            self.buf.drain(..consumed);
            self.bit_pos -= consumed * 8;
        }

        let chunk_bytes = self.width as usize * 512;
        while !self.eof && self.available_bits() < self.width as usize {
            let start = self.buf.len();
            self.buf.resize(start + chunk_bytes, 0);
            let n = self.inner.read(&mut self.buf[start..])?;
            self.buf.truncate(start + n);

            if n == 0 {
                self.eof = true;
                break;
            }
            self.digest.update(&self.buf[start..]);
            self.bytes_read += n as u64;

            // A misaligned chunk is only worth flagging if it turns out not
            // to be the final one.
            if let Some(prev) = self.misaligned_chunk.take() {
                warn!(
                    chunk_bytes = prev,
                    width = self.width,
                    "non-final read chunk is not a multiple of the element width"
                );
            }
            if (n * 8) % self.width as usize != 0 {
                self.misaligned_chunk = Some(n);
            }
        }
        Ok(())
    }

    fn extract(&mut self) -> u128 {
        let mut v = 0u128;
        for _ in 0..self.width {
            let byte = self.buf[self.bit_pos / 8];
            let bit = (byte >> (7 - (self.bit_pos % 8))) & 1;
            v = (v << 1) | bit as u128;
            self.bit_pos += 1;
        }

        match self.endian {
            Endianness::Big => v,
            Endianness::Little => {
                if self.width % 8 == 0 {
                    swap_element_bytes(v, self.width)
                } else {
                    if !self.little_warned {
                        warn!(
                            width = self.width,
                            "little-endian elements of non-byte-aligned width are ill-defined; \
                             using big-endian bit order"
                        );
                        self.little_warned = true;
                    }
                    v
                }
            },
        }
    }
}

impl<R: Read> ElementSource for ElementReader<R> {
    fn next_element(&mut self) -> Result<Option<u128>, PipelineError> {
        if let Some(cap) = self.max_bits
            && self.bits_delivered + self.width as u64 > cap
        {
            return Ok(None);
        }

        if self.available_bits() < self.width as usize {
            self.refill()?;
        }
        if self.available_bits() < self.width as usize {
            let leftover = self.available_bits();
            if leftover > 0 {
                warn!(
                    leftover_bits = leftover,
                    width = self.width,
                    "input ended mid-element; discarding trailing bits"
                );
                self.bit_pos = self.buf.len() * 8;
            }
            return Ok(None);
        }

        let v = self.extract();
        self.bits_delivered += self.width as u64;
        Ok(Some(v))
    }

    fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    fn bits_read(&self) -> u64 {
        self.bits_delivered
    }

    fn read_digest(&self) -> [u8; 32] {
        self.digest.clone().finalize().into()
    }
}

// OUTPUT SEQUENCER
// ================================================================================================

/// Packs fixed-width unsigned integers into the output byte sink.
///
/// Owns the sink exclusively; partial bytes are buffered across calls and the
/// final partial byte is flushed zero-padded on [finish](Self::finish). Total
/// bits written always equals the sum of per-element widths, whether or not
/// the width divides 8. Optionally renders elements as hex text lines
/// instead of raw packed bits.
pub struct OutputSequencer<W: Write> {
    inner: W,
    width: u32,
    endian: Endianness,
    hex: bool,
    acc: u8,
    acc_bits: u32,
    bits_written: u64,
    bytes_written: u64,
    digest: Sha256,
    little_warned: bool,
}

impl<W: Write> OutputSequencer<W> {
    /// Wraps `inner`, packing `width`-bit elements.
    pub fn new(inner: W, width: u32, endian: Endianness, hex: bool) -> Self {
        Self {
            inner,
            width,
            endian,
            hex,
            acc: 0,
            acc_bits: 0,
            bits_written: 0,
            bytes_written: 0,
            digest: Sha256::new(),
            little_warned: false,
        }
    }

    /// Appends one element. Values above the element mask are truncated to
    /// the low `width` bits.
    pub fn push(&mut self, value: u128) -> Result<(), PipelineError> {
        let mask = if self.width == 128 { u128::MAX } else { (1u128 << self.width) - 1 };
        let mut v = value & mask;

        if self.hex {
            let digits = self.width.div_ceil(4) as usize;
            let line = format!("{v:0digits$x}\n");
            self.write_bytes(line.as_bytes())?;
            self.bits_written += self.width as u64;
            return Ok(());
        }

        if self.endian == Endianness::Little {
            if self.width % 8 == 0 {
                v = swap_element_bytes(v, self.width);
            } else if !self.little_warned {
                warn!(
                    width = self.width,
                    "little-endian elements of non-byte-aligned width are ill-defined; \
                     using big-endian bit order"
                );
                self.little_warned = true;
            }
        }

        for i in (0..self.width).rev() {
            let bit = ((v >> i) & 1) as u8;
            self.acc = (self.acc << 1) | bit;
            self.acc_bits += 1;
            if self.acc_bits == 8 {
                let byte = self.acc;
                self.write_bytes(&[byte])?;
                self.acc = 0;
                self.acc_bits = 0;
            }
        }
        self.bits_written += self.width as u64;
        Ok(())
    }

    /// Flushes the final partial byte (zero-padded in its low bits) and the
    /// underlying sink.
    pub fn finish(&mut self) -> Result<(), PipelineError> {
        if self.acc_bits > 0 {
            let byte = self.acc << (8 - self.acc_bits);
            self.write_bytes(&[byte])?;
            self.acc = 0;
            self.acc_bits = 0;
            debug!("flushed final partial byte");
        }
        self.inner.flush()?;
        Ok(())
    }

    /// Logical bits emitted so far (excludes the zero padding of a final
    /// partial byte).
    pub fn bits_written(&self) -> u64 {
        self.bits_written
    }

    /// Physical bytes handed to the sink so far.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// SHA-256 digest over every byte handed to the sink.
    pub fn written_digest(&self) -> [u8; 32] {
        self.digest.clone().finalize().into()
    }

    /// Consumes the sequencer and returns the underlying sink.
    ///
    /// Call [finish](Self::finish) first; a buffered partial byte is
    /// otherwise lost.
    pub fn into_inner(self) -> W {
        self.inner
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), PipelineError> {
        self.inner.write_all(bytes)?;
        self.digest.update(bytes);
        self.bytes_written += bytes.len() as u64;
        Ok(())
    }
}

// HELPERS
// ================================================================================================

/// Reverses the byte order of a byte-aligned element.
fn swap_element_bytes(v: u128, width: u32) -> u128 {
    debug_assert_eq!(width % 8, 0);
    let nbytes = (width / 8) as usize;
    let be = v.to_be_bytes();
    let mut out = 0u128;
    for &byte in be[16 - nbytes..].iter().rev() {
        out = (out << 8) | byte as u128;
    }
    out
}
