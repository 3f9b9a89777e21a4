//! Internal element generators: synthetic modulus streams used in place of a
//! file or stdin, including deliberately biased shapes for stress-testing a
//! spreader's ability to propagate input defects.

use num::{BigUint, ToPrimitive};
use sha2::{Digest, Sha256};

use super::ElementSource;
use crate::{
    error::{ConfigError, PipelineError},
    rand::RandomSource,
    utils::element_to_be_bytes,
};

// CONSTANTS
// ================================================================================================

/// Default probability of the biased mixture drawing from the sub-range.
pub const DEFAULT_MIX_PROBABILITY: f64 = 0.1;

/// Default fraction of `Z_m` forming the biased sub-range.
pub const DEFAULT_SUB_RANGE_FRACTION: f64 = 0.25;

// GENERATOR KIND
// ================================================================================================

/// Shape of an internal element generator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GeneratorKind {
    /// Monotonic counter, optionally wrapping modulo `m`.
    Counter { wrap: bool },
    /// Uniform draw from `Z_m`.
    Uniform,
    /// Mixture of uniform draws with occasional draws biased toward the low
    /// `fraction` sub-range of `Z_m`, at probability `mix_prob`.
    Biased { mix_prob: f64, fraction: f64 },
    /// Normal-shaped draw folded into `Z_m` (mean `m/2`, scale `m/6`).
    Normal,
    /// `x^3 mod m` for uniform `x`; injects nonlinear structure.
    Cube,
}

impl GeneratorKind {
    /// Parses a generator spec: `counter[:wrap]`, `uniform`,
    /// `biased[:prob[:frac]]`, `normal`, or `cube`.
    pub fn parse(spec: &str) -> Result<Self, ConfigError> {
        let mut parts = spec.split(':');
        let head = parts.next().unwrap_or_default();
        let kind = match head {
            "counter" => {
                let wrap = match parts.next() {
                    None => false,
                    Some("wrap") => true,
                    Some(_) => return Err(ConfigError::UnknownGenerator(spec.into())),
                };
                GeneratorKind::Counter { wrap }
            },
            "uniform" => GeneratorKind::Uniform,
            "biased" => {
                let mix_prob = match parts.next() {
                    None => DEFAULT_MIX_PROBABILITY,
                    Some(p) => p
                        .parse()
                        .map_err(|_| ConfigError::UnknownGenerator(spec.into()))?,
                };
                let fraction = match parts.next() {
                    None => DEFAULT_SUB_RANGE_FRACTION,
                    Some(f) => f
                        .parse()
                        .map_err(|_| ConfigError::UnknownGenerator(spec.into()))?,
                };
                GeneratorKind::Biased { mix_prob, fraction }
            },
            "normal" => GeneratorKind::Normal,
            "cube" => GeneratorKind::Cube,
            _ => return Err(ConfigError::UnknownGenerator(spec.into())),
        };
        if parts.next().is_some() {
            return Err(ConfigError::UnknownGenerator(spec.into()));
        }
        kind.validate()?;
        Ok(kind)
    }

    fn validate(self) -> Result<(), ConfigError> {
        if let GeneratorKind::Biased { mix_prob, fraction } = self {
            if !(0.0..=1.0).contains(&mix_prob) {
                return Err(ConfigError::InvalidMixProbability(mix_prob));
            }
            if !(fraction > 0.0 && fraction <= 1.0) {
                return Err(ConfigError::InvalidSubRangeFraction(fraction));
            }
        }
        Ok(())
    }
}

// GENERATOR SOURCE
// ================================================================================================

/// An [ElementSource] producing synthetic `width`-bit elements.
///
/// Generators are unbounded by nature, so a `max_bits` cap is mandatory.
/// The read digest covers the canonical big-endian bytes of every element
/// emitted, mirroring what a file-backed run would have hashed.
pub struct GeneratorSource {
    kind: GeneratorKind,
    m: u128,
    width: u32,
    source: Box<dyn RandomSource>,
    counter: u128,
    digest: Sha256,
    bits_emitted: u64,
    max_bits: u64,
}

impl GeneratorSource {
    /// Returns a generator of `width`-bit elements over `Z_m`, emitting at
    /// most `max_bits` logical bits.
    pub fn new(
        kind: GeneratorKind,
        m: u128,
        width: u32,
        max_bits: u64,
        source: Box<dyn RandomSource>,
    ) -> Result<Self, ConfigError> {
        if m == 0 {
            return Err(ConfigError::InvalidModulus);
        }
        kind.validate()?;
        Ok(Self {
            kind,
            m,
            width,
            source,
            counter: 0,
            digest: Sha256::new(),
            bits_emitted: 0,
            max_bits,
        })
    }

    fn generate(&mut self) -> u128 {
        let m = self.m;
        match self.kind {
            GeneratorKind::Counter { wrap } => {
                let v = self.counter;
                self.counter = if wrap { (v + 1) % m } else { v.wrapping_add(1) };
                v
            },
            GeneratorKind::Uniform => self.source.draw_int(0, m - 1),
            GeneratorKind::Biased { mix_prob, fraction } => {
                if self.source.draw_uniform(0.0, 1.0) < mix_prob {
                    let sub = ((m as f64 * fraction).ceil() as u128).clamp(1, m);
                    self.source.draw_int(0, sub - 1)
                } else {
                    self.source.draw_int(0, m - 1)
                }
            },
            GeneratorKind::Normal => {
                let v = self.source.draw_normal(m as f64 / 2.0, m as f64 / 6.0);
                // f64-to-int casts saturate, clamping the tails into Z_m.
                (v as u128).min(m - 1)
            },
            GeneratorKind::Cube => {
                let x = self.source.draw_int(0, m - 1);
                cube_mod(x, m)
            },
        }
    }
}

impl ElementSource for GeneratorSource {
    fn next_element(&mut self) -> Result<Option<u128>, PipelineError> {
        if self.bits_emitted + self.width as u64 > self.max_bits {
            return Ok(None);
        }

        let mask = if self.width == 128 { u128::MAX } else { (1u128 << self.width) - 1 };
        let v = self.generate() & mask;
        self.digest.update(element_to_be_bytes(v, self.width));
        self.bits_emitted += self.width as u64;
        Ok(Some(v))
    }

    fn bytes_read(&self) -> u64 {
        (self.bits_emitted / self.width as u64) * self.width.div_ceil(8) as u64
    }

    fn bits_read(&self) -> u64 {
        self.bits_emitted
    }

    fn read_digest(&self) -> [u8; 32] {
        self.digest.clone().finalize().into()
    }
}

// HELPERS
// ================================================================================================

/// `x^3 mod m`, widening through [BigUint] so the cube cannot overflow.
fn cube_mod(x: u128, m: u128) -> u128 {
    let cube = BigUint::from(x).pow(3) % BigUint::from(m);
    cube.to_u128().expect("residue mod a u128 modulus fits u128")
}
