//! Random source abstraction over interchangeable bit generators.
//!
//! Every consumer of randomness in this crate takes a [RandomSource] by
//! parameter; there is no module-level default generator. Backends differ in
//! algorithm, so two backends seeded identically are not bit-for-bit equal —
//! callers may rely only on the distributional contract of each draw.

use std::str::FromStr;

use num::{BigInt, BigRational, BigUint, One, Zero};
use rand::{Rng, SeedableRng, rngs::StdRng};
use rand_chacha::ChaCha20Rng;
use rand_core::RngCore;
use rand_distr::{Distribution, Normal};
use tracing::warn;

use crate::error::ConfigError;


// CONSTANTS
// ================================================================================================

/// Spans at or above this magnitude bypass the backend's native ranged draw
/// and use rejection sampling from raw bytes instead.
const NATIVE_RANGE_CEILING: u128 = 1 << 63;

/// Above this bound, floating-point uniform draws lose integer precision.
const F64_EXACT_CEILING: f64 = (1u64 << 53) as f64;

/// Width of one native-precision draw concatenated by
/// [draw_precise_uniform](RandomSource::draw_precise_uniform).
pub const PRECISE_DRAW_BITS: u32 = 50;

// RANDOM SOURCE
// ================================================================================================

/// A uniform interface over an underlying bit generator.
///
/// Operations are pure draws against exclusively-owned generator state; the
/// trait is object-safe so pipeline components can hold `Box<dyn RandomSource>`.
pub trait RandomSource {
    /// Draws an integer uniformly from the closed interval `[low, high]`.
    fn draw_int(&mut self, low: u128, high: u128) -> u128;

    /// Draws `n` raw random bytes.
    fn draw_bytes(&mut self, n: usize) -> Vec<u8>;

    /// Draws an integer uniformly from `[0, 2^(n+1) - 1]`.
    ///
    /// The range is intentionally one bit wider than `n`: downstream spread
    /// strategies were calibrated against this widened draw, so it is kept
    /// for output compatibility rather than narrowed to `[0, 2^n - 1]`.
    fn draw_bits(&mut self, n: u32) -> u128;

    /// Draws a float uniformly from `[low, high)`.
    ///
    /// Warns once per source when `high` exceeds the exact-integer range of
    /// an `f64`, since results above that bound are imprecise.
    fn draw_uniform(&mut self, low: f64, high: f64) -> f64;

    /// Draws from a normal distribution with the given location and scale.
    fn draw_normal(&mut self, loc: f64, scale: f64) -> f64;

    /// Draws a fixed-point rational uniformly from `[0, 1)` with at least
    /// `precision` bits, by concatenating [PRECISE_DRAW_BITS]-bit native
    /// draws into one wide numerator over `2^(PRECISE_DRAW_BITS * k)`.
    ///
    /// Native floating-point draws lose precision above 53 bits; this draw
    /// does not.
    fn draw_precise_uniform(&mut self, precision: u32) -> BigRational;

    /// Splits off an independent child source keyed from this one.
    ///
    /// The child is a fresh ChaCha20 stream seeded with 32 bytes drawn from
    /// `self`, so its consumption is decoupled from the parent's while
    /// remaining reproducible for a fixed parent seed.
    fn fork(&mut self) -> Box<dyn RandomSource>;
}

// PRNG SOURCE
// ================================================================================================

/// [RandomSource] over any [RngCore] bit generator.
pub struct PrngSource<R: RngCore> {
    rng: R,
    uniform_warned: bool,
}

/// Platform default PRNG backend.
pub type SystemSource = PrngSource<StdRng>;

/// ChaCha20 stream backend for high-throughput reproducible streams.
pub type ChaChaSource = PrngSource<ChaCha20Rng>;

impl<R: RngCore> PrngSource<R> {
    /// Wraps a bit generator in the [RandomSource] capability set.
    pub fn new(rng: R) -> Self {
        Self { rng, uniform_warned: false }
    }
}

impl<R: RngCore + 'static> RandomSource for PrngSource<R> {
    fn draw_int(&mut self, low: u128, high: u128) -> u128 {
        debug_assert!(low <= high, "draw_int interval is inverted");
        let span = high - low;
        if span < NATIVE_RANGE_CEILING {
            return self.rng.random_range(low..=high);
        }

        // Rejection sampling from raw bytes: draw just enough big-endian
        // bytes to cover the span, redraw while the value overshoots.
        let nbytes = crate::utils::bit_length(span).div_ceil(8) as usize;
        loop {
            let mut buf = [0u8; 16];
            self.rng.fill_bytes(&mut buf[16 - nbytes..]);
            let v = u128::from_be_bytes(buf);
            if v <= span {
                return low + v;
            }
        }
    }

    fn draw_bytes(&mut self, n: usize) -> Vec<u8> {
        let mut bytes = vec![0u8; n];
        self.rng.fill_bytes(&mut bytes);
        bytes
    }

    fn draw_bits(&mut self, n: u32) -> u128 {
        debug_assert!(n < 128, "draw_bits width out of range");
        let width = n + 1;
        if width == 128 {
            let mut buf = [0u8; 16];
            self.rng.fill_bytes(&mut buf);
            u128::from_be_bytes(buf)
        } else {
            self.draw_int(0, (1u128 << width) - 1)
        }
    }

    fn draw_uniform(&mut self, low: f64, high: f64) -> f64 {
        if high >= F64_EXACT_CEILING && !self.uniform_warned {
            warn!(high, "uniform draw bound exceeds exact f64 integer range; results are imprecise");
            self.uniform_warned = true;
        }
        low + (high - low) * self.rng.random::<f64>()
    }

    fn draw_normal(&mut self, loc: f64, scale: f64) -> f64 {
        let normal = Normal::new(loc, scale).expect("scale must be finite and non-negative");
        normal.sample(&mut self.rng)
    }

    fn draw_precise_uniform(&mut self, precision: u32) -> BigRational {
        let k = precision.max(1).div_ceil(PRECISE_DRAW_BITS);
        let limb_max = (1u128 << PRECISE_DRAW_BITS) - 1;

        let mut numer = BigUint::zero();
        for _ in 0..k {
            numer = (numer << PRECISE_DRAW_BITS) | BigUint::from(self.draw_int(0, limb_max));
        }
        let denom = BigUint::one() << (PRECISE_DRAW_BITS * k) as usize;

        BigRational::new(BigInt::from(numer), BigInt::from(denom))
    }

    fn fork(&mut self) -> Box<dyn RandomSource> {
        let mut seed = [0u8; 32];
        self.rng.fill_bytes(&mut seed);
        Box::new(PrngSource::new(ChaCha20Rng::from_seed(seed)))
    }
}

// BACKEND SELECTION
// ================================================================================================

/// Identifies a concrete [RandomSource] implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backend {
    /// Platform default PRNG ([StdRng]); simplest, slower.
    System,
    /// ChaCha20 keyed stream; high-throughput, reproducible from a seed.
    #[default]
    ChaCha,
}

impl Backend {
    /// Instantiates the backend, seeded explicitly or from OS entropy.
    pub fn source(self, seed: Option<u64>) -> Box<dyn RandomSource> {
        match self {
            Backend::System => match seed {
                Some(seed) => Box::new(PrngSource::new(StdRng::seed_from_u64(seed))),
                None => Box::new(PrngSource::new(StdRng::from_os_rng())),
            },
            Backend::ChaCha => match seed {
                Some(seed) => Box::new(PrngSource::new(ChaCha20Rng::seed_from_u64(seed))),
                None => Box::new(PrngSource::new(ChaCha20Rng::from_os_rng())),
            },
        }
    }
}

impl FromStr for Backend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "system" | "std" => Ok(Backend::System),
            "chacha" | "chacha20" => Ok(Backend::ChaCha),
            _ => Err(ConfigError::UnknownBackend(s.into())),
        }
    }
}
