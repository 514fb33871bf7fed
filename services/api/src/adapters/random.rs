//! services/api/src/adapters/random.rs

use amibuddy_core::ports::RandomSource;
use rand::Rng;

/// Picks with the thread-local generator.
#[derive(Clone, Copy, Default)]
pub struct ThreadRandom;

impl RandomSource for ThreadRandom {
    fn pick(&self, len: usize) -> usize {
        if len == 0 {
            return 0;
        }
        rand::thread_rng().gen_range(0..len)
    }
}
