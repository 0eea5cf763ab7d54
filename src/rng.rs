use std::sync::{Arc, Mutex};

use rand_chacha::{
    rand_core::{RngCore, SeedableRng},
    ChaChaRng,
};

/// Injected source of nondeterminism: call id allocation and sweep jitter.
pub trait Random: Send + Sync {
    fn next_u32(&self) -> u32;

    /// A jitter value in `[-fuzz/2, fuzz/2]`, in milliseconds.
    fn fuzz_millis(&self, fuzz_millis: u64) -> i64 {
        if fuzz_millis == 0 {
            return 0;
        }
        let half = (fuzz_millis / 2).max(1);
        let raw = (self.next_u32() as u64) % (2 * half + 1);
        raw as i64 - half as i64
    }
}

pub struct ChaChaRandom(Mutex<ChaChaRng>);

impl ChaChaRandom {
    pub fn from_entropy() -> Arc<Self> {
        Arc::new(Self(Mutex::new(ChaChaRng::from_entropy())))
    }

    pub fn from_seed(seed: u64) -> Arc<Self> {
        Arc::new(Self(Mutex::new(ChaChaRng::seed_from_u64(seed))))
    }
}

impl Random for ChaChaRandom {
    fn next_u32(&self) -> u32 {
        self.0.lock().unwrap().next_u32()
    }
}

pub fn system() -> Arc<dyn Random> {
    ChaChaRandom::from_entropy()
}
