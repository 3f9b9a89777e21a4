//! Modulus spreading: mapping integers drawn from `Z_m` into a fixed-width
//! output domain `[0, 2^osize)`.
//!
//! Eighteen strategies are provided, from unbiased rejection and inversion
//! sampling to deliberately biased diagnostic mappings used to verify that
//! statistical test suites detect the documented defects. Acceptance
//! boundaries are reproduced exactly; an off-by-one would change measurable
//! bias, which is the whole point of these tools.

use std::{collections::BTreeMap, str::FromStr};

use num::{BigInt, BigRational, BigUint, One, ToPrimitive, Zero};
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::{
    MAX_WIDTH_BITS,
    error::ConfigError,
    rand::{PrngSource, RandomSource},
    utils::bit_length,
};

#[cfg(test)]
mod tests;

// CONSTANTS
// ================================================================================================

/// Largest magnitude at which f64 arithmetic is still exact on integers.
const F64_EXACT_CEILING: u128 = 1 << 53;

// STRATEGY
// ================================================================================================

/// A spreading strategy, selected once at configuration time.
///
/// Ids 1..=18 are the spreading table; id 0 is the binary passthrough mode
/// (plain bit-width conversion, no statistical spreading).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Strategy {
    /// Zero-pad or truncate to the output width; no spreading.
    Binary = 0,
    /// `m * q + z` with the quotient range adapted per `z`; slight top bias.
    Spread = 1,
    /// Random high bits above the modulus width; biased toward low residues.
    Weak = 2,
    /// Random draw stripped of its `m`-residue plus `z`; upper region under-covered.
    WeakMinus = 3,
    /// Conditionally `m`-shifted random draw plus `z`; deliberately non-uniform.
    WeakWeird = 4,
    /// Zeroes a random low-bit window of `z` first; deliberately biased.
    Flat = 5,
    /// `m * q + z`, rejecting the tail; unbiased.
    Reject = 6,
    /// Like [Reject](Strategy::Reject) but substitutes a fresh uniform draw; unbiased.
    Gen = 7,
    /// Float-widened `z`; input weight diluted for large domains.
    Wider = 8,
    /// [Wider](Strategy::Wider) with explicit rejection instead of masking.
    WiderReject = 9,
    /// Inversion sampling in f64; unbiased below the f64 precision ceiling.
    InverseSample = 10,
    /// Ignores `z` entirely; decorrelated diagnostic.
    Rand = 11,
    /// Always sets bit 15; obviously biased diagnostic.
    MaskFixed = 12,
    /// `z & (2^osize - 1)`; biased unless `2m >= 2^osize`.
    Mask = 13,
    /// `(z << osize) / m`; deterministic gaps.
    InverseGaps = 14,
    /// Inversion sampling in exact rational arithmetic; valid at any magnitude.
    InverseFrac = 15,
    /// Passes `z` through, rejecting values outside the output domain.
    Drop = 16,
    /// Like [Drop](Strategy::Drop) but substitutes a fresh uniform draw.
    DropGen = 17,
    /// ORs a random high-bit field onto `z`; exact for power-of-two `m`.
    Expand = 18,
}

impl Strategy {
    /// All strategies, in id order.
    pub const ALL: [Strategy; 19] = [
        Strategy::Binary,
        Strategy::Spread,
        Strategy::Weak,
        Strategy::WeakMinus,
        Strategy::WeakWeird,
        Strategy::Flat,
        Strategy::Reject,
        Strategy::Gen,
        Strategy::Wider,
        Strategy::WiderReject,
        Strategy::InverseSample,
        Strategy::Rand,
        Strategy::MaskFixed,
        Strategy::Mask,
        Strategy::InverseGaps,
        Strategy::InverseFrac,
        Strategy::Drop,
        Strategy::DropGen,
        Strategy::Expand,
    ];

    /// Numeric id of this strategy.
    pub const fn id(self) -> u8 {
        self as u8
    }

    /// Canonical name, as accepted by [FromStr].
    pub const fn name(self) -> &'static str {
        match self {
            Strategy::Binary => "binary",
            Strategy::Spread => "spread",
            Strategy::Weak => "spread_weak",
            Strategy::WeakMinus => "spread_weak_minus",
            Strategy::WeakWeird => "spread_weak_weird",
            Strategy::Flat => "spread_flat",
            Strategy::Reject => "spread_reject",
            Strategy::Gen => "spread_gen",
            Strategy::Wider => "spread_wider",
            Strategy::WiderReject => "spread_wider_reject",
            Strategy::InverseSample => "spread_inverse_sample",
            Strategy::Rand => "spread_rand",
            Strategy::MaskFixed => "spread_mask_fixed",
            Strategy::Mask => "spread_mask",
            Strategy::InverseGaps => "spread_inverse_gaps",
            Strategy::InverseFrac => "spread_inverse_frac",
            Strategy::Drop => "spread_drop",
            Strategy::DropGen => "spread_drop_gen",
            Strategy::Expand => "spread_expand",
        }
    }

    /// Whether this strategy can return the rejection sentinel.
    pub const fn can_reject(self) -> bool {
        matches!(
            self,
            Strategy::Reject
                | Strategy::WiderReject
                | Strategy::InverseSample
                | Strategy::InverseGaps
                | Strategy::InverseFrac
                | Strategy::Drop
                | Strategy::Expand
        )
    }
}

impl TryFrom<u8> for Strategy {
    type Error = ConfigError;

    fn try_from(id: u8) -> Result<Self, Self::Error> {
        Strategy::ALL
            .get(id as usize)
            .copied()
            .ok_or(ConfigError::UnknownStrategyId(id))
    }
}

impl FromStr for Strategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(id) = s.parse::<u8>() {
            return Strategy::try_from(id);
        }
        Strategy::ALL
            .iter()
            .copied()
            .find(|strategy| strategy.name() == s)
            .ok_or_else(|| ConfigError::UnknownStrategy(s.into()))
    }
}

// MODULUS SPREADER
// ================================================================================================

/// Maps integers from `Z_m` into `[0, 2^osize)`.
///
/// Configured once with the modulus `m`, the output width in bits, and a
/// bound [RandomSource]. Strategies that need auxiliary randomness each own a
/// lazily-opened draw stream keyed from a master value drawn at construction,
/// so per-strategy draw consumption stays independent and reproducible for a
/// fixed seed. Resetting the streams requires constructing a new spreader.
pub struct ModulusSpreader {
    m: u128,
    osize: u32,
    max: u128,
    max_mask: u128,
    tp: u128,
    tc: u128,
    rm: u128,
    msize: u32,
    master: [u8; 32],
    aux: BTreeMap<Strategy, Box<dyn RandomSource>>,
    precision_warned: bool,
    expand_warned: bool,
}

impl std::fmt::Debug for ModulusSpreader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModulusSpreader")
            .field("m", &self.m)
            .field("osize", &self.osize)
            .field("max", &self.max)
            .field("max_mask", &self.max_mask)
            .field("tp", &self.tp)
            .field("tc", &self.tc)
            .field("rm", &self.rm)
            .field("msize", &self.msize)
            .field("master", &self.master)
            .field("precision_warned", &self.precision_warned)
            .field("expand_warned", &self.expand_warned)
            .finish_non_exhaustive()
    }
}

impl ModulusSpreader {
    // CONSTRUCTOR
    // --------------------------------------------------------------------------------------------

    /// Returns a spreader for modulus `m` and an output domain of `osize` bits.
    ///
    /// # Errors
    /// Returns a [ConfigError] if `m` is zero or `osize` is outside
    /// `1..=`[MAX_WIDTH_BITS].
    pub fn new(
        m: u128,
        osize: u32,
        mut source: Box<dyn RandomSource>,
    ) -> Result<Self, ConfigError> {
        if m == 0 {
            return Err(ConfigError::InvalidModulus);
        }
        if osize == 0 || osize > MAX_WIDTH_BITS {
            return Err(ConfigError::InvalidOutputWidth(osize));
        }

        let max = 1u128 << osize;
        let max_mask = max - 1;
        let tp = max / m;
        let tc = max.div_ceil(m) - 1;
        let rm = max - tp * m;
        let msize = bit_length(m);

        if max < m {
            warn!(
                m = %m,
                osize,
                "output domain is smaller than the modulus; masking and dropping \
                 strategies collide multiple inputs and will be biased"
            );
        } else {
            let ratio = predicted_rejection_ratio(m, tc, max);
            info!(
                m = %m,
                osize,
                rejection_ratio = ratio,
                "predicted rejection ratio for rejection-based spreading"
            );
        }

        let mut master = [0u8; 32];
        master.copy_from_slice(&source.draw_bytes(32));

        Ok(Self {
            m,
            osize,
            max,
            max_mask,
            tp,
            tc,
            rm,
            msize,
            master,
            aux: BTreeMap::new(),
            precision_warned: false,
            expand_warned: false,
        })
    }

    // ACCESSORS
    // --------------------------------------------------------------------------------------------

    /// The configured modulus.
    pub fn modulus(&self) -> u128 {
        self.m
    }

    /// The configured output width in bits.
    pub fn output_width(&self) -> u32 {
        self.osize
    }

    /// The output domain ceiling, `2^osize`.
    pub fn max(&self) -> u128 {
        self.max
    }

    /// Mask of the output domain, `2^osize - 1`.
    pub fn max_mask(&self) -> u128 {
        self.max_mask
    }

    /// Expected fraction of candidates discarded by rejection-based
    /// strategies, `((tc+1)*m - max) / ((tc+1)*m)`.
    pub fn predicted_rejection_ratio(&self) -> f64 {
        predicted_rejection_ratio(self.m, self.tc, self.max)
    }

    // SPREADING
    // --------------------------------------------------------------------------------------------

    /// Spreads `z` (reduced mod `m` on entry) into `[0, 2^osize)`.
    ///
    /// Returns `None` when the strategy rejects the value; the caller decides
    /// whether to discard the element or draw a fresh one. Diagnostic
    /// strategies may return values above the output mask; callers check the
    /// mask defensively and count overflows.
    pub fn spread(&mut self, strategy: Strategy, z: u128) -> Option<u128> {
        if strategy == Strategy::Binary {
            return Some(z & self.max_mask);
        }

        let z = z % self.m;
        match strategy {
            Strategy::Binary => unreachable!("handled above"),
            Strategy::Spread => self.spread_basic(z),
            Strategy::Weak => self.spread_weak(z),
            Strategy::WeakMinus => self.spread_weak_minus(z),
            Strategy::WeakWeird => self.spread_weak_weird(z),
            Strategy::Flat => self.spread_flat(z),
            Strategy::Reject => self.spread_reject(z),
            Strategy::Gen => self.spread_gen(z),
            Strategy::Wider => self.spread_wider(z),
            Strategy::WiderReject => self.spread_wider_reject(z),
            Strategy::InverseSample => self.spread_inverse_sample(z),
            Strategy::Rand => self.spread_rand(),
            Strategy::MaskFixed => Some(z | (1 << 15)),
            Strategy::Mask => Some(z & self.max_mask),
            Strategy::InverseGaps => self.spread_inverse_gaps(z),
            Strategy::InverseFrac => self.spread_inverse_frac(z),
            Strategy::Drop => self.spread_drop(z),
            Strategy::DropGen => self.spread_drop_gen(z),
            Strategy::Expand => self.spread_expand(z),
        }
    }

    // STRATEGY IMPLEMENTATIONS
    // --------------------------------------------------------------------------------------------

    /// Strategy 1: `m * q + z`, with `q` drawn from `[0, tp]` when `z` falls
    /// in the remainder region and `[0, tp - 1]` otherwise. Never rejects;
    /// slightly biased at the top of the range.
    fn spread_basic(&mut self, z: u128) -> Option<u128> {
        let hi = if z < self.rm { self.tp } else { self.tp.saturating_sub(1) };
        let q = self.aux(Strategy::Spread).draw_int(0, hi);
        Some(self.m * q + z)
    }

    /// Strategy 2: `z + (bits << msize)`. Strongly biased toward the low
    /// moduli range; the widened draw can overshoot the output mask.
    fn spread_weak(&mut self, z: u128) -> Option<u128> {
        let shift = self.osize.saturating_sub(self.msize);
        let msize = self.msize;
        let r = self.aux(Strategy::Weak).draw_bits(shift);
        Some(z.wrapping_add(shl_lossy(r, msize)))
    }

    /// Strategy 3: strip the low `m`-residue from an `osize`-bit draw, then
    /// add `z`. The upper region of the output domain is under-covered.
    fn spread_weak_minus(&mut self, z: u128) -> Option<u128> {
        let m = self.m;
        let osize = self.osize;
        let r = self.aux(Strategy::WeakMinus).draw_bits(osize);
        Some((r - r % m).wrapping_add(z))
    }

    /// Strategy 4: conditionally subtract `m` from the raw draw before
    /// adding `z`. Deliberately highly non-uniform; diagnostic only.
    fn spread_weak_weird(&mut self, z: u128) -> Option<u128> {
        let m = self.m;
        let osize = self.osize;
        let mut r = self.aux(Strategy::WeakWeird).draw_bits(osize);
        if r >= m {
            r -= m;
        }
        Some(r.wrapping_add(z))
    }

    /// Strategy 5: zero a random-width low-bit window of `z`, then apply
    /// strategy 1. Deliberately biased; diagnostic only.
    fn spread_flat(&mut self, z: u128) -> Option<u128> {
        let msize = self.msize;
        let width = self.aux(Strategy::Flat).draw_int(0, msize as u128) as u32;
        let flattened = if width >= 128 { 0 } else { (z >> width) << width };
        self.spread_basic(flattened)
    }

    /// Strategy 6: `m * q + z` with `q` in `[0, tc]`, rejecting candidates at
    /// or above the ceiling. Unbiased when the caller discards rejected
    /// elements; rejects exactly the tail.
    fn spread_reject(&mut self, z: u128) -> Option<u128> {
        let tc = self.tc;
        let q = self.aux(Strategy::Reject).draw_int(0, tc);
        let candidate = self.m * q + z;
        (candidate < self.max).then_some(candidate)
    }

    /// Strategy 7: strategy 6, substituting a fresh uniform draw instead of
    /// rejecting. Same expected distribution, no rejection.
    fn spread_gen(&mut self, z: u128) -> Option<u128> {
        let tc = self.tc;
        let q = self.aux(Strategy::Gen).draw_int(0, tc);
        let candidate = self.m * q + z;
        if candidate < self.max {
            Some(candidate)
        } else {
            let max_mask = self.max_mask;
            Some(self.aux(Strategy::Gen).draw_int(0, max_mask))
        }
    }

    /// Strategy 8: `floor(U(0, max/m) * m + z)`, masked into the output
    /// domain. Biased for large domains; the weight of `z` is diluted.
    fn spread_wider(&mut self, z: u128) -> Option<u128> {
        Some(self.wider_candidate(Strategy::Wider, z) & self.max_mask)
    }

    /// Strategy 9: the strategy-8 candidate with explicit rejection instead
    /// of masking.
    fn spread_wider_reject(&mut self, z: u128) -> Option<u128> {
        let candidate = self.wider_candidate(Strategy::WiderReject, z);
        (candidate < self.max).then_some(candidate)
    }

    fn wider_candidate(&mut self, strategy: Strategy, z: u128) -> u128 {
        let bound = self.max as f64 / self.m as f64;
        let m = self.m as f64;
        let u = self.aux(strategy).draw_uniform(0.0, bound);
        // f64-to-int casts saturate, which keeps pathological magnitudes in
        // the integer domain rather than wrapping.
        (u * m + z as f64).floor() as u128
    }

    /// Strategy 10: inversion sampling in f64. Valid only while
    /// `max(m, 2^osize) < 2^53`; larger magnitudes are routed to the exact
    /// rational variant (strategy 15) with a one-time warning.
    fn spread_inverse_sample(&mut self, z: u128) -> Option<u128> {
        if self.m.max(self.max) >= F64_EXACT_CEILING {
            if !self.precision_warned {
                warn!(
                    m = %self.m,
                    osize = self.osize,
                    "inversion sampling exceeds f64 precision; routing to exact rational arithmetic"
                );
                self.precision_warned = true;
            }
            return self.spread_inverse_frac(z);
        }

        let (u, step) = if self.m == 1 {
            (0.0, 1.0)
        } else {
            let denom = (self.m - 1) as f64;
            (z as f64 / denom, 1.0 / denom)
        };
        let jitter = self.aux(Strategy::InverseSample).draw_uniform(0.0, step);
        let candidate = ((u + jitter) * self.max_mask as f64).floor() as u128;
        (candidate < self.max).then_some(candidate)
    }

    /// Strategy 11: ignore `z`, draw uniformly from the output domain.
    /// Completely decorrelated from the input; diagnostic only.
    fn spread_rand(&mut self) -> Option<u128> {
        let max_mask = self.max_mask;
        Some(self.aux(Strategy::Rand).draw_int(0, max_mask))
    }

    /// Strategy 14: `(z << osize) / m`, exact. Deterministic gaps of size
    /// `max % m`; biased.
    fn spread_inverse_gaps(&mut self, z: u128) -> Option<u128> {
        let candidate = if z.leading_zeros() >= self.osize {
            (z << self.osize) / self.m
        } else {
            let wide = (BigUint::from(z) << self.osize as usize) / BigUint::from(self.m);
            wide.to_u128().expect("quotient is below 2^osize and fits u128")
        };
        (candidate < self.max).then_some(candidate)
    }

    /// Strategy 15: inversion sampling in exact rational arithmetic. No
    /// precision ceiling; unbiased with minimal rejection.
    fn spread_inverse_frac(&mut self, z: u128) -> Option<u128> {
        let (u, step) = if self.m == 1 {
            (BigRational::zero(), BigRational::one())
        } else {
            let denom = BigInt::from(self.m - 1);
            (
                BigRational::new(BigInt::from(z), denom.clone()),
                BigRational::new(BigInt::one(), denom),
            )
        };

        // Enough fractional bits to resolve every output slot exactly.
        let precision = self.osize + crate::rand::PRECISE_DRAW_BITS;
        let jitter = self.aux(Strategy::InverseFrac).draw_precise_uniform(precision) * &step;
        let scaled = (u + jitter) * BigRational::from_integer(BigInt::from(self.max_mask));
        let candidate = scaled
            .floor()
            .to_integer()
            .to_u128()
            .expect("candidate is below 2 * 2^osize and fits u128");
        (candidate < self.max).then_some(candidate)
    }

    /// Strategy 16: pass `z` through, rejecting values outside the output
    /// domain. Only sensible when the output domain is smaller than `m`.
    fn spread_drop(&self, z: u128) -> Option<u128> {
        (z < self.max).then_some(z)
    }

    /// Strategy 17: strategy 16, substituting a fresh uniform draw instead
    /// of rejecting.
    fn spread_drop_gen(&mut self, z: u128) -> Option<u128> {
        if z < self.max {
            Some(z)
        } else {
            let max_mask = self.max_mask;
            Some(self.aux(Strategy::DropGen).draw_int(0, max_mask))
        }
    }

    /// Strategy 18: OR a random high-bit field above `m`'s bit width onto
    /// `z`, rejecting overshoots. Exact only for power-of-two `m`.
    fn spread_expand(&mut self, z: u128) -> Option<u128> {
        if !self.m.is_power_of_two() && !self.expand_warned {
            warn!(
                m = %self.m,
                "modulus is not a power of two; bit-aligned expansion is inexact"
            );
            self.expand_warned = true;
        }
        // Bit width of the occupied low region: ceil(log2(m)).
        let k = bit_length(self.m.saturating_sub(1));
        let width = self.osize.saturating_sub(k);
        let high = self.aux(Strategy::Expand).draw_bits(width);
        let candidate = z | shl_lossy(high, k);
        (candidate < self.max).then_some(candidate)
    }

    // HELPERS
    // --------------------------------------------------------------------------------------------

    /// Returns the auxiliary draw stream owned by `strategy`, opening it on
    /// first use. Streams are constructed once and advanced on demand, never
    /// re-created.
    ///
    /// Each stream is keyed as `SHA-256(master || strategy id)`, so a
    /// strategy's draws do not depend on which other strategies have been
    /// exercised or in what order.
    fn aux(&mut self, strategy: Strategy) -> &mut dyn RandomSource {
        let Self { aux, master, .. } = self;
        aux.entry(strategy)
            .or_insert_with(|| {
                let mut hasher = Sha256::new();
                hasher.update(*master);
                hasher.update([strategy.id()]);
                let seed: [u8; 32] = hasher.finalize().into();
                Box::new(PrngSource::new(ChaCha20Rng::from_seed(seed)))
            })
            .as_mut()
    }
}

// HELPERS
// ================================================================================================

/// Closed-form rejection ratio `((tc+1)*m - max) / ((tc+1)*m)`.
fn predicted_rejection_ratio(m: u128, tc: u128, max: u128) -> f64 {
    let candidates = (tc + 1) * m;
    (candidates - max) as f64 / candidates as f64
}

/// Left shift that yields zero for shift amounts at or above the bit width,
/// instead of panicking.
fn shl_lossy(v: u128, shift: u32) -> u128 {
    if shift >= 128 { 0 } else { v << shift }
}
