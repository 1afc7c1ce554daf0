//! Deterministic random number streams for simulation and filtering
//!
//! Every source of randomness in this crate draws from a [RandomStream], a small
//! xorshift-based generator that implements [rand::RngCore] so the samplers in
//! [`rand_distr`](https://crates.io/crates/rand_distr) can drive it directly. Streams
//! are never shared between concerns: each consumer derives its own stream from the
//! run's root seed, the step index, and a [StreamPurpose] tag through the pure
//! [RandomStream::derive] function. Because the derivation depends only on those three
//! values, any step of a run can be reproduced in isolation and two runs with the same
//! root seed produce bit-identical trajectories regardless of how the consumers
//! interleave their draws.

use rand::{RngCore, SeedableRng};

/// Labels the consumer of a derived stream.
///
/// The discriminant values feed [RandomStream::derive] directly, so they are part of
/// the reproducibility contract: changing a value changes every run seeded through
/// that purpose.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamPurpose {
    /// Scattering landmark positions when generating a map.
    MapLayout = 1,
    /// Spreading the initial particle cloud around the initial pose guess.
    InitialCloud = 2,
    /// Odometry noise injected by the simulated wheel encoders.
    Odometry = 3,
    /// Observation noise and landmark selection for the simulated sensor.
    Observation = 4,
    /// Process noise drawn during stochastic particle propagation.
    ProcessNoise = 5,
    /// Offset draws consumed by the resampling algorithms.
    Resampling = 6,
}

/// Deterministic pseudo-random stream (xorshift64* with a splitmix64-mixed seed).
///
/// Not cryptographic. The statistical quality is more than sufficient for injecting
/// simulation noise and for the particle filter's importance sampling, and the whole
/// generator is a single `u64` of state, so deriving one stream per step per purpose
/// costs nothing.
#[derive(Clone, Debug)]
pub struct RandomStream {
    state: u64,
}

/// splitmix64 finalizer, used to spread seed material across the state word.
fn mix(value: u64) -> u64 {
    let mut z = value.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

impl RandomStream {
    /// Derive the stream for `(seed, step, purpose)`.
    ///
    /// Pure: the same three inputs always yield a stream producing the same sample
    /// sequence, independent of any other stream's consumption.
    ///
    /// # Example
    /// ```rust
    /// use landnav::rng::{RandomStream, StreamPurpose};
    /// let mut a = RandomStream::derive(123456, 7, StreamPurpose::Observation);
    /// let mut b = RandomStream::derive(123456, 7, StreamPurpose::Observation);
    /// assert_eq!(a.uniform(), b.uniform());
    /// ```
    pub fn derive(seed: u64, step: u64, purpose: StreamPurpose) -> RandomStream {
        let mut state = mix(seed);
        state = mix(state ^ step.wrapping_mul(0xA24B_AED4_963E_E407));
        state = mix(state ^ (purpose as u64).wrapping_mul(0x9FB2_1C65_1E98_DF25));
        // xorshift64* has a single absorbing state at zero.
        if state == 0 {
            state = 0x9E37_79B9_7F4A_7C15;
        }
        RandomStream { state }
    }

    fn step_state(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545_F491_4F6C_DD1D)
    }

    /// Uniform sample in `[0, 1)` with 53 bits of mantissa.
    pub fn uniform(&mut self) -> f64 {
        (self.step_state() >> 11) as f64 * (1.0 / (1u64 << 53) as f64)
    }
}

impl RngCore for RandomStream {
    fn next_u32(&mut self) -> u32 {
        (self.step_state() >> 32) as u32
    }

    fn next_u64(&mut self) -> u64 {
        self.step_state()
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        for chunk in dest.chunks_mut(8) {
            let bytes = self.step_state().to_le_bytes();
            chunk.copy_from_slice(&bytes[..chunk.len()]);
        }
    }
}

impl SeedableRng for RandomStream {
    type Seed = [u8; 8];

    fn from_seed(seed: Self::Seed) -> Self {
        let mut state = mix(u64::from_le_bytes(seed));
        if state == 0 {
            state = 0x9E37_79B9_7F4A_7C15;
        }
        RandomStream { state }
    }
}
