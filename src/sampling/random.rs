use std::sync::{Mutex, PoisonError};

use rand::{Rng, SeedableRng, rngs::StdRng};

/// Uniform random draws shared by every sampling decision.
///
/// The generator sits behind a mutex, the one lock on the sampling path. A
/// poisoned lock is recovered because a draw can never leave the generator
/// in a broken state.
#[derive(Debug)]
pub struct RandomSource {
    rng: Mutex<StdRng>,
}

impl RandomSource {
    #[must_use]
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            rng: Mutex::new(rng),
        }
    }

    /// Draws uniformly from `[0, max)`. Returns 0 when `max` is 0.
    pub fn next_below(&self, max: u32) -> u32 {
        if max == 0 {
            return 0;
        }
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        rng.gen_range(0..max)
    }

    /// Draws uniformly from `[0, 1)`.
    pub fn next_unit(&self) -> f64 {
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        rng.r#gen::<f64>()
    }
}

impl Default for RandomSource {
    fn default() -> Self {
        Self::new(None)
    }
}
