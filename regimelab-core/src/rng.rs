//! Deterministic RNG hierarchy.
//!
//! A master seed generates deterministic sub-seeds for each `(stream, key,
//! index)` tuple, e.g. `("synthetic", "AAA", 0)`. Sub-seeds are derived via
//! BLAKE3 hashing, independently of thread scheduling order, so results are
//! identical regardless of thread count.

use rand::rngs::StdRng;
use rand::SeedableRng;

#[derive(Debug, Clone)]
pub struct RngHierarchy {
    master_seed: u64,
}

impl RngHierarchy {
    pub fn new(master_seed: u64) -> Self {
        Self { master_seed }
    }

    pub fn master_seed(&self) -> u64 {
        self.master_seed
    }

    /// Derive a deterministic sub-seed for `(stream, key, index)`.
    ///
    /// The sub-seed is independent of derivation order: deriving "AAA" then
    /// "BBB" yields the same seeds as deriving them in reverse order.
    pub fn sub_seed(&self, stream: &str, key: &str, index: u64) -> u64 {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.master_seed.to_le_bytes());
        hasher.update(stream.as_bytes());
        hasher.update(&[0xff]);
        hasher.update(key.as_bytes());
        hasher.update(&index.to_le_bytes());
        let hash = hasher.finalize();
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&hash.as_bytes()[..8]);
        u64::from_le_bytes(bytes)
    }

    /// Create a seeded StdRng from a sub-seed.
    pub fn rng_for(&self, stream: &str, key: &str, index: u64) -> StdRng {
        StdRng::seed_from_u64(self.sub_seed(stream, key, index))
    }
}

/// One standard normal draw (Box-Muller).
pub fn standard_normal<R: rand::Rng + ?Sized>(rng: &mut R) -> f64 {
    let u1: f64 = rng.gen::<f64>().max(f64::MIN_POSITIVE);
    let u2: f64 = rng.gen::<f64>();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}
