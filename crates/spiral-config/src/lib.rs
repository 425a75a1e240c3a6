//! Process-wide runtime configuration shared by the SpiralTorch crates:
//! deterministic seeding and tracing subscriber setup.

pub mod determinism;
pub mod tracing;

pub use self::determinism::{DeterminismConfig, derive_seed, rng_from_label, rng_from_optional};
pub use self::tracing::{
    flush_chrome_trace, init_tracing, init_tracing_with, InitError, TracingConfig,
};
