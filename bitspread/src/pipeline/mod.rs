//! Single-threaded batch pipeline: read fixed-width bit-packed elements,
//! spread each one, write fixed-width bit-packed output, and keep SHA-256
//! digests of the read, processed, and written byte streams for end-to-end
//! verification.
//!
//! One thread owns the element source, the spreader's generator streams, and
//! the output buffer for the whole run; I/O errors are fatal and propagate
//! immediately (this is an offline batch tool, not a resilient service).

use std::{fmt, io::Write, str::FromStr, time::{Duration, Instant}};

use sha2::{Digest, Sha256};

pub mod generator;
mod sequencer;

pub use generator::{GeneratorKind, GeneratorSource};
pub use sequencer::{ElementReader, OutputSequencer};

use crate::{
    MAX_WIDTH_BITS,
    error::{ConfigError, PipelineError},
    rand::Backend,
    spread::{ModulusSpreader, Strategy},
    utils::{bytes_to_hex_string, element_to_be_bytes},
};


// ENDIANNESS
// ================================================================================================

/// Byte order of byte-aligned elements within the bit stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Endianness {
    #[default]
    Big,
    Little,
}

impl FromStr for Endianness {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "big" | "be" => Ok(Endianness::Big),
            "little" | "le" => Ok(Endianness::Little),
            _ => Err(ConfigError::UnknownEndianness(s.into())),
        }
    }
}

// ELEMENT SOURCE
// ================================================================================================

/// A stream of fixed-width input elements: a bit-packed byte stream (file or
/// stdin) or an internal generator.
pub trait ElementSource {
    /// Returns the next element, or `None` at end of stream.
    fn next_element(&mut self) -> Result<Option<u128>, PipelineError>;

    /// Physical bytes consumed (or synthesized) so far.
    fn bytes_read(&self) -> u64;

    /// Logical element bits delivered so far.
    fn bits_read(&self) -> u64;

    /// SHA-256 digest over the byte stream read so far.
    fn read_digest(&self) -> [u8; 32];
}

// PIPELINE CONFIGURATION
// ================================================================================================

/// The configuration surface the pipeline honors.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Size of the discrete input domain `Z_m`.
    pub modulus: u128,
    /// Input element width in bits.
    pub input_width: u32,
    /// Output element width in bits.
    pub output_width: u32,
    /// Spreading strategy; [Strategy::Binary] converts widths without spreading.
    pub strategy: Strategy,
    pub endian_in: Endianness,
    pub endian_out: Endianness,
    /// Fixes the run for reproducibility; OS entropy when absent.
    pub seed: Option<u64>,
    /// Cap on logical input bits consumed, truncated at element boundaries.
    pub max_input_bits: Option<u64>,
    /// Cap on logical output bits written, truncated at element boundaries.
    pub max_output_bits: Option<u64>,
    pub backend: Backend,
    /// Render output elements as hex text lines instead of packed bits.
    pub hex_output: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            modulus: 1,
            input_width: 8,
            output_width: 8,
            strategy: Strategy::Reject,
            endian_in: Endianness::Big,
            endian_out: Endianness::Big,
            seed: None,
            max_input_bits: None,
            max_output_bits: None,
            backend: Backend::ChaCha,
            hex_output: false,
        }
    }
}

impl PipelineConfig {
    /// Validates the configuration, before any I/O.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.modulus == 0 {
            return Err(ConfigError::InvalidModulus);
        }
        if self.input_width == 0 || self.input_width > MAX_WIDTH_BITS {
            return Err(ConfigError::InvalidInputWidth(self.input_width));
        }
        if self.output_width == 0 || self.output_width > MAX_WIDTH_BITS {
            return Err(ConfigError::InvalidOutputWidth(self.output_width));
        }
        Ok(())
    }
}

// RUN REPORT
// ================================================================================================

/// End-of-stream accounting for one pipeline run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub elements_in: u64,
    pub elements_out: u64,
    pub bytes_read: u64,
    pub bits_read: u64,
    pub bytes_written: u64,
    pub bits_written: u64,
    /// Elements discarded by the active strategy.
    pub rejections: u64,
    /// Spread results above the output mask; strategies should prevent these,
    /// the pipeline checks defensively and truncates.
    pub overflows: u64,
    pub elapsed: Duration,
    /// SHA-256 hex digest of the bytes read from the input.
    pub read_digest: String,
    /// SHA-256 hex digest of the canonical bytes of every element processed.
    pub processed_digest: String,
    /// SHA-256 hex digest of the bytes written to the output.
    pub written_digest: String,
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "elements in:      {}", self.elements_in)?;
        writeln!(f, "elements out:     {}", self.elements_out)?;
        writeln!(f, "bytes read:       {}", self.bytes_read)?;
        writeln!(f, "bits read:        {}", self.bits_read)?;
        writeln!(f, "bytes written:    {}", self.bytes_written)?;
        writeln!(f, "bits written:     {}", self.bits_written)?;
        writeln!(f, "rejections:       {}", self.rejections)?;
        writeln!(f, "overflows:        {}", self.overflows)?;
        writeln!(f, "elapsed:          {:.3?}", self.elapsed)?;
        writeln!(f, "read digest:      {}", self.read_digest)?;
        writeln!(f, "processed digest: {}", self.processed_digest)?;
        write!(f, "written digest:   {}", self.written_digest)
    }
}

// DRIVER
// ================================================================================================

/// Runs the pipeline to completion: one chunk-at-a-time batch loop with no
/// concurrency and no retries.
///
/// Rejected elements are discarded and counted; retrying the same element
/// would bias rejection-based strategies toward inputs with smaller
/// acceptance sets and would never terminate on the deterministically
/// rejecting ones.
pub fn run<W: Write>(
    config: &PipelineConfig,
    source: &mut dyn ElementSource,
    sink: W,
) -> Result<RunReport, PipelineError> {
    config.validate()?;
    let start = Instant::now();

    let mut spreader = ModulusSpreader::new(
        config.modulus,
        config.output_width,
        config.backend.source(config.seed),
    )?;
    let out_mask = spreader.max_mask();
    let out_width = config.output_width as u64;

    let mut sequencer =
        OutputSequencer::new(sink, config.output_width, config.endian_out, config.hex_output);
    let mut processed = Sha256::new();

    let mut elements_in = 0u64;
    let mut elements_out = 0u64;
    let mut rejections = 0u64;
    let mut overflows = 0u64;

    while let Some(z) = source.next_element()? {
        elements_in += 1;
        processed.update(element_to_be_bytes(z, config.input_width));

        let Some(mut out) = spreader.spread(config.strategy, z) else {
            rejections += 1;
            continue;
        };
        if out > out_mask {
            overflows += 1;
            out &= out_mask;
        }

        if let Some(cap) = config.max_output_bits
            && sequencer.bits_written() + out_width > cap
        {
            break;
        }
        sequencer.push(out)?;
        elements_out += 1;
    }
    sequencer.finish()?;

    Ok(RunReport {
        elements_in,
        elements_out,
        bytes_read: source.bytes_read(),
        bits_read: source.bits_read(),
        bytes_written: sequencer.bytes_written(),
        bits_written: sequencer.bits_written(),
        rejections,
        overflows,
        elapsed: start.elapsed(),
        read_digest: bytes_to_hex_string(&source.read_digest()),
        processed_digest: bytes_to_hex_string(&processed.finalize()),
        written_digest: bytes_to_hex_string(&sequencer.written_digest()),
    })
}
