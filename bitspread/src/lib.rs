//! Modulus spreading and uniform-distribution stretching for synthetic
//! statistical test data.
//!
//! The crate maps integers drawn uniformly from `Z_m` (integers mod `m`) into
//! a fixed-width output domain `[0, 2^osize)` using one of eighteen spreading
//! strategies with documented bias and rejection-rate tradeoffs, and drives
//! those strategies over bit-packed element streams.
//!
//! The three layers are:
//!
//! - `rand`: a uniform [RandomSource](crate::rand::RandomSource) interface
//!   over interchangeable bit generators (system PRNG, ChaCha20 stream).
//! - `spread`: the [ModulusSpreader](crate::spread::ModulusSpreader) core and
//!   its [Strategy](crate::spread::Strategy) table.
//! - `pipeline`: a single-threaded batch pipeline reading fixed-width
//!   bit-packed integers, spreading each element, and writing fixed-width
//!   bit-packed output while tracking SHA-256 digests for verification.
//!
//! Randomness sourcing is fully explicit: every component takes its source by
//! parameter; there is no ambient or global generator.

pub mod error;
pub mod pipeline;
pub mod rand;
pub mod spread;
pub mod utils;

// RE-EXPORTS
// ================================================================================================
pub use error::{ConfigError, PipelineError};
pub use pipeline::{Endianness, PipelineConfig, RunReport};
pub use rand::{Backend, RandomSource};
pub use spread::{ModulusSpreader, Strategy};

/// Widest element the pipeline supports, in bits.
///
/// Elements are carried as `u128` values and the output ceiling `2^osize`
/// must itself fit in a `u128`, so widths are capped one bit short of 128.
pub const MAX_WIDTH_BITS: u32 = 127;
