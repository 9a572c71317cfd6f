use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Rejected window: the minimum is larger than the maximum.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("minimum interval {min:?} cannot be greater than maximum interval {max:?}")]
pub struct InvalidWindow {
    pub min: Duration,
    pub max: Duration,
}

/// Inclusive `[min, max]` window for randomized waits. `min <= max` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntervalWindow {
    min: Duration,
    max: Duration,
}

impl IntervalWindow {
    pub fn new(min: Duration, max: Duration) -> Result<Self, InvalidWindow> {
        if min > max {
            return Err(InvalidWindow { min, max });
        }
        Ok(Self { min, max })
    }

    pub fn from_secs(min: u64, max: u64) -> Result<Self, InvalidWindow> {
        Self::new(Duration::from_secs(min), Duration::from_secs(max))
    }

    pub fn min(&self) -> Duration {
        self.min
    }

    pub fn max(&self) -> Duration {
        self.max
    }

    /// Uniform sample in `[min, max]`.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        if self.min == self.max {
            return self.min;
        }
        rng.random_range(self.min..=self.max)
    }
}

/// How a cancellable sleep ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wake {
    Elapsed,
    Cancelled,
}

/// Sleep for `duration` unless `token` fires first. Cancellation wins ties:
/// an already-cancelled token returns `Cancelled` without sleeping.
pub async fn sleep_or_cancel(duration: Duration, token: &CancellationToken) -> Wake {
    if token.is_cancelled() {
        return Wake::Cancelled;
    }
    tokio::select! {
        biased;
        _ = token.cancelled() => Wake::Cancelled,
        _ = tokio::time::sleep(duration) => Wake::Elapsed,
    }
}

/// Uniform delay in `[0, ceiling)`; zero when the ceiling is zero.
pub fn jitter_below<R: Rng + ?Sized>(ceiling: Duration, rng: &mut R) -> Duration {
    if ceiling.is_zero() {
        return Duration::ZERO;
    }
    rng.random_range(Duration::ZERO..ceiling)
}

/// RNG for one loop. A configured seed makes runs reproducible; `stream`
/// keeps loops sharing a seed from drawing identical sequences.
pub fn seeded_rng(seed: Option<u64>, stream: u64) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed ^ stream.wrapping_mul(0x9E37_79B9_7F4A_7C15)),
        None => StdRng::from_os_rng(),
    }
}

/// Randomized, cancellable wait between cycles.
#[derive(Debug)]
pub struct IntervalScheduler {
    window: IntervalWindow,
    rng: StdRng,
}

impl IntervalScheduler {
    pub fn new(window: IntervalWindow, rng: StdRng) -> Self {
        Self { window, rng }
    }

    pub fn window(&self) -> IntervalWindow {
        self.window
    }

    /// Draw the next wait duration.
    pub fn next_interval(&mut self) -> Duration {
        self.window.sample(&mut self.rng)
    }

    /// Draw a duration and sleep it, or stop early on cancellation.
    pub async fn wait(&mut self, token: &CancellationToken) -> (Duration, Wake) {
        let interval = self.next_interval();
        tracing::info!(next_in_secs = interval.as_secs(), "waiting for next cycle");
        (interval, sleep_or_cancel(interval, token).await)
    }
}
