use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

/// Seeded 32-bit generator (mulberry32 mixing). Not cryptographic.
///
/// Every consumer owns its own instance; the whole stream is reproduced by
/// constructing a new instance from the same seed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rng {
    state: u32,
    #[serde(default)]
    cached_normal: Option<f64>,
}

impl Rng {
    pub fn new(seed: u32) -> Self {
        Self {
            state: seed,
            cached_normal: None,
        }
    }

    pub fn from_text(seed: &str) -> Self {
        Self::new(seed_from_text(seed))
    }

    pub fn reseed(&mut self, seed: u32) {
        self.state = seed;
        self.cached_normal = None;
    }

    pub fn next_u32(&mut self) -> u32 {
        self.state = self.state.wrapping_add(0x6D2B_79F5);
        let mut t = self.state;
        t = (t ^ (t >> 15)).wrapping_mul(t | 1);
        t ^= t.wrapping_add((t ^ (t >> 7)).wrapping_mul(t | 61));
        t ^ (t >> 14)
    }

    pub fn next_f64(&mut self) -> f64 {
        const DENOM: f64 = 4_294_967_296.0;
        self.next_u32() as f64 / DENOM
    }

    pub fn range(&mut self, lo: f64, hi: f64) -> f64 {
        lo + (hi - lo) * self.next_f64()
    }

    pub fn noise(&mut self, scale: f64) -> f64 {
        (self.next_f64() * 2.0 - 1.0) * scale
    }

    pub fn int_inclusive(&mut self, lo: u32, hi: u32) -> u32 {
        if hi <= lo {
            return lo;
        }
        let span = (hi - lo) as f64 + 1.0;
        lo + ((self.next_f64() * span) as u32).min(hi - lo)
    }

    pub fn index(&mut self, len: usize) -> usize {
        if len <= 1 {
            return 0;
        }
        ((self.next_f64() * len as f64) as usize).min(len - 1)
    }

    pub fn chance(&mut self, p: f64) -> bool {
        self.next_f64() < p
    }

    pub fn standard_normal(&mut self) -> f64 {
        if let Some(z) = self.cached_normal.take() {
            return z;
        }

        let u1 = self.next_f64().max(1e-12);
        let u2 = self.next_f64();
        let r = (-2.0 * u1.ln()).sqrt();
        let theta = 2.0 * PI * u2;

        let z0 = r * theta.cos();
        let z1 = r * theta.sin();
        self.cached_normal = Some(z1);
        z0
    }
}

pub fn seed_from_text(text: &str) -> u32 {
    let mut h: u32 = 0x811C_9DC5;
    for byte in text.bytes() {
        h ^= byte as u32;
        h = h.wrapping_mul(0x0100_0193);
    }
    // fmix32 avalanche so short seeds that differ by one char diverge fully
    h ^= h >> 16;
    h = h.wrapping_mul(0x85EB_CA6B);
    h ^= h >> 13;
    h = h.wrapping_mul(0xC2B2_AE35);
    h ^ (h >> 16)
}
