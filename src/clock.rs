use std::sync::Arc;

pub use tokio::time::Instant;

/// Injected time source.
///
/// The default implementation delegates to [`tokio::time::Instant`], which
/// means a test that wraps its runtime in `tokio::time::pause()` /
/// `tokio::time::advance()` gets deterministic sweep behaviour for free,
/// without needing a bespoke fake clock. A fake implementation is still
/// useful for unit tests that exercise the operation table or sweep
/// arithmetic in isolation, without driving a real socket.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

pub fn system() -> Arc<dyn Clock> {
    Arc::new(SystemClock)
}

#[cfg(test)]
pub mod test_support {
    use super::*;
    use std::sync::Mutex;

    /// A clock a test can advance by hand without touching the Tokio
    /// runtime's own paused-time machinery.
    pub struct FakeClock {
        base: Instant,
        offset: Mutex<std::time::Duration>,
    }

    impl FakeClock {
        pub fn new() -> Arc<Self> {
            Arc::new(Self {
                base: Instant::now(),
                offset: Mutex::new(std::time::Duration::ZERO),
            })
        }

        pub fn advance(&self, by: std::time::Duration) {
            *self.offset.lock().unwrap() += by;
        }
    }

    impl Clock for FakeClock {
        fn now(&self) -> Instant {
            self.base + *self.offset.lock().unwrap()
        }
    }
}
