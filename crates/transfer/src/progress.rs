use std::sync::Mutex;
use std::time::{Duration, Instant};

// ---------------------------------------------------------------------------
// SpeedCalculator
// ---------------------------------------------------------------------------

struct SpeedSample {
    bytes: u64,
    timestamp: Instant,
}

/// Calculates transfer speed using a sliding window of samples.
pub struct SpeedCalculator {
    inner: Mutex<SpeedInner>,
}

struct SpeedInner {
    samples: Vec<SpeedSample>,
    max_samples: usize,
    window_size: Duration,
}

impl Default for SpeedCalculator {
    fn default() -> Self {
        Self::new(None, None)
    }
}

impl SpeedCalculator {
    /// Creates a new calculator.
    ///
    /// - `window_size`: time window for speed calculation (default 5 s).
    /// - `max_samples`: maximum retained samples (default 100).
    pub fn new(window_size: Option<Duration>, max_samples: Option<usize>) -> Self {
        Self {
            inner: Mutex::new(SpeedInner {
                samples: Vec::new(),
                max_samples: max_samples.unwrap_or(100),
                window_size: window_size.unwrap_or(Duration::from_secs(5)),
            }),
        }
    }

    /// Records `bytes` sent since the previous sample.
    pub fn add_sample(&self, bytes: u64) {
        self.add_sample_at(bytes, Instant::now());
    }

    fn add_sample_at(&self, bytes: u64, now: Instant) {
        let mut s = self.inner.lock().unwrap();
        s.samples.push(SpeedSample {
            bytes,
            timestamp: now,
        });

        // Prune samples outside the window.
        if let Some(cutoff) = now.checked_sub(s.window_size) {
            s.samples.retain(|sample| sample.timestamp >= cutoff);
        }

        if s.samples.len() > s.max_samples {
            let excess = s.samples.len() - s.max_samples;
            s.samples.drain(..excess);
        }
    }

    /// Average speed in bytes/second within the window.
    ///
    /// The first sample only marks the start of the window, so fewer than
    /// two samples yield 0.0.
    pub fn bytes_per_second(&self) -> f64 {
        let s = self.inner.lock().unwrap();
        if s.samples.len() < 2 {
            return 0.0;
        }

        let first = &s.samples[0];
        let last = &s.samples[s.samples.len() - 1];
        let elapsed = last.timestamp.duration_since(first.timestamp);
        if elapsed.is_zero() {
            return 0.0;
        }

        let sent: u64 = s.samples[1..].iter().map(|sample| sample.bytes).sum();
        sent as f64 / elapsed.as_secs_f64()
    }

    /// Estimates time remaining to transfer `remaining_bytes`.
    ///
    /// Returns `None` while the speed is unknown.
    pub fn eta(&self, remaining_bytes: u64) -> Option<Duration> {
        let speed = self.bytes_per_second();
        if speed <= 0.0 {
            return None;
        }
        Some(Duration::from_secs_f64(remaining_bytes as f64 / speed))
    }

    /// Clears all recorded samples.
    pub fn reset(&self) {
        self.inner.lock().unwrap().samples.clear();
    }
}

// ---------------------------------------------------------------------------
// Formatting
// ---------------------------------------------------------------------------

const KIB: f64 = 1024.0;
const MIB: f64 = 1024.0 * 1024.0;

/// `512 B/s`, `12.5 KB/s`, `3.2 MB/s`.
pub fn format_speed(bytes_per_second: f64) -> String {
    if bytes_per_second < KIB {
        format!("{bytes_per_second:.0} B/s")
    } else if bytes_per_second < MIB {
        format!("{:.1} KB/s", bytes_per_second / KIB)
    } else {
        format!("{:.1} MB/s", bytes_per_second / MIB)
    }
}

/// `42s` below a minute, `3m 5s` otherwise; seconds round up.
pub fn format_eta(eta: Duration) -> String {
    let secs = eta.as_secs_f64();
    if secs < 60.0 {
        return format!("{}s", secs.ceil() as u64);
    }
    let minutes = (secs / 60.0).floor() as u64;
    let rest = (secs % 60.0).ceil() as u64;
    format!("{minutes}m {rest}s")
}

/// `900 B`, `1.50 KB`, `2.38 MB`.
pub fn format_size(bytes: u64) -> String {
    let b = bytes as f64;
    if b < KIB {
        format!("{bytes} B")
    } else if b < MIB {
        format!("{:.2} KB", b / KIB)
    } else {
        format!("{:.2} MB", b / MIB)
    }
}
