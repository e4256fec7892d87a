use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Controllable time for boundary-detection testing.
///
/// Passed to `HistoryEngine::open_with_clock` so idle, max-duration, and
/// grace-window behavior can be driven deterministically.
#[derive(Clone)]
pub struct MockClock {
    current_ms: Arc<AtomicI64>,
}

impl MockClock {
    /// Create a new mock clock at an arbitrary fixed epoch.
    pub fn new() -> Self {
        Self {
            current_ms: Arc::new(AtomicI64::new(1_700_000_000_000)),
        }
    }

    /// Creates a provider closure suitable for the engine.
    pub fn as_provider(&self) -> impl Fn() -> i64 + Send + Sync + 'static {
        let current = self.current_ms.clone();
        move || current.load(Ordering::SeqCst)
    }

    /// Current timestamp in epoch milliseconds.
    pub fn now_ms(&self) -> i64 {
        self.current_ms.load(Ordering::SeqCst)
    }

    /// Advance time by a duration.
    pub fn advance(&self, duration: Duration) {
        self.current_ms
            .fetch_add(duration.as_millis() as i64, Ordering::SeqCst);
    }

    /// Advance time by milliseconds.
    pub fn advance_ms(&self, ms: i64) {
        self.current_ms.fetch_add(ms, Ordering::SeqCst);
    }

    /// Advance time by minutes.
    pub fn advance_minutes(&self, minutes: i64) {
        self.advance_ms(minutes * 60_000);
    }

    /// Advance time by hours.
    pub fn advance_hours(&self, hours: i64) {
        self.advance_ms(hours * 3_600_000);
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}
