// src/noise.rs

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

/// Source of per-cell random amplitudes.
///
/// A sample must depend only on `(seed, level, wrapped global cell index)`,
/// never on patch layout or evaluation order, so that overlapping parent and
/// child patches see phase-coherent noise. Coordinates are in level-native
/// fine cells and may be negative or beyond the domain; implementations wrap
/// them periodically.
pub trait NoiseSource: Send + Sync {
    fn sample(&self, level: u32, i: i64, j: i64, k: i64) -> f64;
}

/// Gaussian white noise with counter-based per-cell seeding.
pub struct WhiteNoise {
    seed: u64,
}

impl WhiteNoise {
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }
}

fn mix(mut h: u64, v: u64) -> u64 {
    // splitmix64 finalizer step, good enough as a cell hash
    h ^= v.wrapping_add(0x9e3779b97f4a7c15);
    h = (h ^ (h >> 30)).wrapping_mul(0xbf58476d1ce4e5b9);
    h = (h ^ (h >> 27)).wrapping_mul(0x94d049bb133111eb);
    h ^ (h >> 31)
}

impl NoiseSource for WhiteNoise {
    fn sample(&self, level: u32, i: i64, j: i64, k: i64) -> f64 {
        let n = 1i64 << level;
        let iw = i.rem_euclid(n) as u64;
        let jw = j.rem_euclid(n) as u64;
        let kw = k.rem_euclid(n) as u64;

        let mut h = mix(self.seed, level as u64);
        h = mix(h, iw);
        h = mix(h, jw);
        h = mix(h, kw);

        let mut rng = SmallRng::seed_from_u64(h);
        // Box-Muller; clamp away from zero so the log stays finite
        let u1: f64 = rng.gen::<f64>().max(f64::MIN_POSITIVE);
        let u2: f64 = rng.gen();
        (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
    }
}
