//! Wall-clock timer for training loops.

use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct Timer {
    start: Instant,
    shift: Duration,
    target: Duration,
}

impl Default for Timer {
    fn default() -> Self {
        Self::new(Duration::ZERO)
    }
}

impl Timer {
    /// Start a timer that is [`finished`](Self::finished) once `target` has passed.
    pub fn new(target: Duration) -> Self {
        Self {
            start: Instant::now(),
            shift: Duration::ZERO,
            target,
        }
    }

    pub fn restart(&mut self) {
        self.start = Instant::now();
        self.shift = Duration::ZERO;
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed() + self.shift
    }

    /// Log the elapsed time and restart.
    pub fn lap(&mut self) -> Duration {
        let elapsed = self.elapsed();
        tracing::info!("elapsed time: {:.5}s", elapsed.as_secs_f64());
        self.restart();
        elapsed
    }

    pub fn finished(&self) -> bool {
        self.elapsed() >= self.target
    }

    /// Move the start point back by `by`, as if the timer had started earlier.
    pub fn shift_back(&mut self, by: Duration) {
        self.shift += by;
    }
}
