use thiserror::Error;

use crate::MAX_WIDTH_BITS;

// CONFIGURATION ERRORS
// ================================================================================================

/// Errors raised while validating a run configuration, before any I/O.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("modulus must be greater than zero")]
    InvalidModulus,
    #[error("input width must be between 1 and {MAX_WIDTH_BITS} bits, got {0}")]
    InvalidInputWidth(u32),
    #[error("output width must be between 1 and {MAX_WIDTH_BITS} bits, got {0}")]
    InvalidOutputWidth(u32),
    #[error("unknown strategy id {0}, expected 0..=18")]
    UnknownStrategyId(u8),
    #[error("unknown strategy `{0}`")]
    UnknownStrategy(String),
    #[error("unknown generator backend `{0}`, expected `system` or `chacha`")]
    UnknownBackend(String),
    #[error("unknown endianness `{0}`, expected `big` or `little`")]
    UnknownEndianness(String),
    #[error("unknown generator `{0}`")]
    UnknownGenerator(String),
    #[error("generator inputs are unbounded; `max_input_bits` is required")]
    UnboundedGenerator,
    #[error("mixture probability must be within [0, 1], got {0}")]
    InvalidMixProbability(f64),
    #[error("sub-range fraction must be within (0, 1], got {0}")]
    InvalidSubRangeFraction(f64),
}

// PIPELINE ERRORS
// ================================================================================================

/// Errors terminating a pipeline run.
///
/// I/O failures are fatal and propagate immediately; partial output written
/// before the failure is left in place.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),
}
