//! Global log capture for assertions on library log output.

use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};

use log::Level;
use logtest::Logger;
use rstest::fixture;

/// Handle to the global logger with exclusive access.
///
/// Holding the handle serialises tests that inspect captured records. Pair it
/// with `#[serial]` when other tests in the same binary log concurrently.
pub struct LoggerHandle {
    guard: MutexGuard<'static, Logger>,
}

impl LoggerHandle {
    /// Acquire the global [`Logger`] instance.
    pub fn new() -> Self {
        static LOGGER: OnceLock<Mutex<Logger>> = OnceLock::new();

        let logger = LOGGER.get_or_init(|| Mutex::new(Logger::start()));
        let guard = logger.lock().unwrap_or_else(PoisonError::into_inner);

        Self { guard }
    }

    /// Drop every record captured so far.
    pub fn clear(&mut self) { while self.guard.pop().is_some() {} }

    /// Drain captured records and report whether one at `level` contains
    /// every needle.
    pub fn drain_contains(&mut self, level: Level, needles: &[&str]) -> bool {
        let mut found = false;
        while let Some(record) = self.guard.pop() {
            if record.level() == level && needles.iter().all(|n| record.args().contains(n)) {
                found = true;
            }
        }
        found
    }
}

impl Default for LoggerHandle {
    fn default() -> Self { Self::new() }
}

impl std::ops::Deref for LoggerHandle {
    type Target = Logger;

    fn deref(&self) -> &Self::Target { &self.guard }
}

impl std::ops::DerefMut for LoggerHandle {
    fn deref_mut(&mut self) -> &mut Self::Target { &mut self.guard }
}

#[allow(
    unused_braces,
    reason = "rustc false positive for single line rstest fixtures"
)]
#[fixture]
pub fn logger() -> LoggerHandle { LoggerHandle::new() }
