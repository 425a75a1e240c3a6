use rand::{rngs::StdRng, SeedableRng};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::OnceLock;

/// Process-wide reproducibility settings shared by tensor initialisers and
/// the decoder's teacher-forcing coin.
#[derive(Clone, Debug)]
pub struct DeterminismConfig {
    /// Whether label-derived seeds replace OS entropy.
    pub enabled: bool,
    /// Base seed mixed into every label-derived seed.
    pub base_seed: u64,
    /// Forces row reductions (matmul) onto a single thread.
    pub fix_reduction: bool,
}

fn flag(value: &str) -> bool {
    !matches!(value, "0" | "false" | "False" | "off" | "OFF" | "")
}

impl DeterminismConfig {
    /// Reads `SPIRAL_DETERMINISTIC`, `SPIRAL_DETERMINISTIC_SEED` and
    /// `SPIRAL_DETERMINISTIC_REDUCTION`.
    fn from_env() -> Self {
        let enabled = std::env::var("SPIRAL_DETERMINISTIC")
            .ok()
            .map(|v| flag(v.trim()))
            .unwrap_or(false);

        let base_seed = std::env::var("SPIRAL_DETERMINISTIC_SEED")
            .ok()
            .and_then(|v| v.trim().parse::<u64>().ok())
            .unwrap_or(42);

        let fix_reduction = std::env::var("SPIRAL_DETERMINISTIC_REDUCTION")
            .ok()
            .map(|v| flag(v.trim()))
            .unwrap_or(enabled);

        Self {
            enabled,
            base_seed,
            fix_reduction,
        }
    }

    /// Derives a stable seed for a component label.
    pub fn seed_for<L: Hash>(&self, label: L) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.base_seed.hash(&mut hasher);
        label.hash(&mut hasher);
        hasher.finish()
    }
}

static CONFIG: OnceLock<DeterminismConfig> = OnceLock::new();

/// Returns the lazily initialised configuration.
pub fn config() -> &'static DeterminismConfig {
    CONFIG.get_or_init(DeterminismConfig::from_env)
}

/// RNG derived from `label` when determinism is enabled, OS entropy otherwise.
pub fn rng_from_label(label: &str) -> StdRng {
    let cfg = config();
    if cfg.enabled {
        StdRng::seed_from_u64(cfg.seed_for(label))
    } else {
        StdRng::from_entropy()
    }
}

/// Explicit seeds always win; otherwise falls back to [`rng_from_label`].
pub fn rng_from_optional(seed: Option<u64>, label: &str) -> StdRng {
    match seed {
        Some(value) => StdRng::seed_from_u64(value),
        None => rng_from_label(label),
    }
}

/// Mixes an explicit base seed with a label so sibling layers built from one
/// seed do not share initial weights.
pub fn derive_seed(seed: Option<u64>, label: &str) -> Option<u64> {
    seed.map(|base| {
        let mut hasher = DefaultHasher::new();
        base.hash(&mut hasher);
        label.hash(&mut hasher);
        hasher.finish()
    })
}

/// Whether reductions must run sequentially.
pub fn lock_reduction_order() -> bool {
    config().enabled && config().fix_reduction
}
