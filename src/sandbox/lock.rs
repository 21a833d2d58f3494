//! Sandbox exclusivity via a PostgreSQL advisory lock

use crate::executor::{ExecutorError, TargetExecutor};
use std::time::{Duration, Instant};

/// Advisory lock key ("lifeport" in ASCII)
pub const SANDBOX_LOCK_KEY: i64 = 0x6c69_6665_706f_7274;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Holds the sandbox advisory lock; released on drop
pub struct SandboxLock<'a> {
    target: &'a dyn TargetExecutor,
}

impl<'a> SandboxLock<'a> {
    /// Poll `pg_try_advisory_lock` until it is granted or `timeout` elapses
    ///
    /// # Errors
    ///
    /// Returns `ExecutorError::Other` on timeout, or the query error if the lock query fails.
    pub fn acquire(target: &'a dyn TargetExecutor, timeout: Duration) -> Result<Self, ExecutorError> {
        let start = Instant::now();
        let sql = format!("SELECT pg_try_advisory_lock({SANDBOX_LOCK_KEY})::text");
        loop {
            let rows = target.query_rows(&sql)?;
            let granted = rows
                .first()
                .and_then(|r| r.first())
                .and_then(|c| c.as_deref())
                .map(|v| v == "true" || v == "t")
                .unwrap_or(false);
            if granted {
                log::debug!("Acquired sandbox lock");
                return Ok(Self { target });
            }
            if start.elapsed() >= timeout {
                return Err(ExecutorError::Other(format!(
                    "Failed to acquire sandbox lock within {} seconds. \
                     Another run may be using this sandbox.",
                    timeout.as_secs()
                )));
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }
}

impl Drop for SandboxLock<'_> {
    fn drop(&mut self) {
        let sql = format!("SELECT pg_advisory_unlock({SANDBOX_LOCK_KEY})::text");
        if let Err(e) = self.target.query_rows(&sql) {
            log::warn!("Failed to release sandbox lock: {}", e);
        }
    }
}
