use std::{future::Future, time::Duration};

use tokio::time::Instant;

/// Time source and sleeper shared by the cooldown scheduler and the call loop.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> Instant;

    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send;
}

/// Wall clock backed by the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }
}

#[cfg(test)]
pub mod manual {
    use std::{
        future::{Future, ready},
        sync::{Arc, Mutex},
        time::Duration,
    };

    use tokio::time::Instant;

    use super::Clock;

    #[derive(Debug, Default)]
    struct ManualState {
        elapsed: Duration,
        naps:    Vec<Duration>,
    }

    /// Clock that only moves when told to. Sleeping advances it instantly and
    /// records the requested nap.
    #[derive(Debug, Clone)]
    pub struct ManualClock {
        origin: Instant,
        state:  Arc<Mutex<ManualState>>,
    }

    impl ManualClock {
        pub fn new() -> Self {
            Self {
                origin: Instant::now(),
                state:  Arc::new(Mutex::new(ManualState::default())),
            }
        }

        pub fn advance(&self, by: Duration) {
            self.state.lock().unwrap().elapsed += by;
        }

        pub fn naps(&self) -> Vec<Duration> {
            self.state.lock().unwrap().naps.clone()
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> Instant {
            self.origin + self.state.lock().unwrap().elapsed
        }

        fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send {
            let mut state = self.state.lock().unwrap();
            state.elapsed += duration;
            state.naps.push(duration);
            ready(())
        }
    }
}
