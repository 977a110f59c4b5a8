use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Throughput meter fed with the size of each committed part.
///
/// Keeps the samples seen within `window` (at most `capacity` of them)
/// and reports the rate between the oldest and newest one.
pub struct SpeedCalculator {
    window: Duration,
    capacity: usize,
    state: Mutex<Window>,
}

#[derive(Default)]
struct Window {
    samples: VecDeque<(Instant, u64)>,
    total: u64,
}

impl Window {
    fn pop_front(&mut self) {
        if let Some((_, bytes)) = self.samples.pop_front() {
            self.total -= bytes;
        }
    }
}

impl Default for SpeedCalculator {
    fn default() -> Self {
        Self::new(Duration::from_secs(5), 100)
    }
}

impl SpeedCalculator {
    pub fn new(window: Duration, capacity: usize) -> Self {
        Self {
            window,
            capacity: capacity.max(2),
            state: Mutex::new(Window::default()),
        }
    }

    /// Records `bytes` as transferred now.
    pub fn add_sample(&self, bytes: u64) {
        self.record_at(Instant::now(), bytes);
    }

    fn record_at(&self, at: Instant, bytes: u64) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.samples.push_back((at, bytes));
        state.total += bytes;

        while state
            .samples
            .front()
            .is_some_and(|(t, _)| at.saturating_duration_since(*t) > self.window)
        {
            state.pop_front();
        }
        while state.samples.len() > self.capacity {
            state.pop_front();
        }
    }

    /// Bytes per second across the retained samples, or `0.0` until two
    /// samples with distinct timestamps exist.
    pub fn bytes_per_second(&self) -> f64 {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        match (state.samples.front(), state.samples.back()) {
            (Some((first, _)), Some((last, _))) if last > first => {
                state.total as f64 / last.duration_since(*first).as_secs_f64()
            }
            _ => 0.0,
        }
    }

    /// Time left for `remaining` bytes at the current rate.
    pub fn eta(&self, remaining: u64) -> Option<Duration> {
        let rate = self.bytes_per_second();
        (rate > 0.0).then(|| Duration::from_secs_f64(remaining as f64 / rate))
    }

    pub fn reset(&self) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = Window::default();
    }

    #[cfg(test)]
    fn retained(&self) -> (usize, u64) {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        (state.samples.len(), state.total)
    }
}
