use std::time::{Duration, Instant};

/// Rate limiter for progress lines on standard output
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    period: Duration,
    last: Instant,
}

impl ProgressReporter {
    pub fn new(period: Duration) -> Self {
        ProgressReporter {
            period,
            last: Instant::now(),
        }
    }

    /// Build from a period in seconds, clamping negative or non-finite values to zero
    pub fn from_secs(seconds: f64) -> Self {
        let seconds = if seconds.is_finite() { seconds.max(0.0) } else { 0.0 };
        Self::new(Duration::from_secs_f64(seconds))
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Whether a full period has elapsed since the last printed line
    pub fn due(&self) -> bool {
        self.last.elapsed() >= self.period
    }

    /// Print `line` and restart the period
    pub fn print(&mut self, line: &str) {
        println!("{}", line);
        self.last = Instant::now();
    }

    /// Print `line` only when a period has elapsed; returns whether it printed
    pub fn maybe_print(&mut self, line: impl FnOnce() -> String) -> bool {
        if self.due() {
            self.print(&line());
            true
        } else {
            false
        }
    }
}
