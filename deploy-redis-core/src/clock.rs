//! Time source for history scores

/// Supplies upload timestamps in milliseconds since the Unix epoch
pub trait Clock: Send + Sync {
    /// Current time in milliseconds
    fn now_millis(&self) -> i64;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}
