//! Structured console output plus a captured debug trace embedded into the
//! run record at teardown.
//!
//! Grounded on the original source's `logging.Logger` singleton (console
//! print helpers plus a `debug_log: list[str]` buffer), reworked per §9's
//! "no module-level singleton" design note: a `RunLogger` is a plain,
//! caller-constructed value threaded through the coordinator and agents
//! rather than a process-global. Console output itself goes through the
//! `log` facade (`log::debug!`/`info!`/`warn!`/`error!`); initializing a
//! sink (`env_logger`, color, verbosity) is the binary entry point's concern,
//! never this crate's.

use chrono::Utc;
use tokio::sync::Mutex;

/// One captured line of the debug trace, timestamped at append time so the
/// embedded `debug_log` in the run record reads like a transcript.
fn timestamped(message: &str) -> String {
    format!("[{}] {}", Utc::now().to_rfc3339(), message)
}

/// Process-scoped logging facade for one run. Forwards to the `log` facade
/// at the appropriate level and additionally appends every message to an
/// in-memory buffer that [`crate::run_log::RunRecord`] embeds verbatim.
pub struct RunLogger {
    target: &'static str,
    debug_log: Mutex<Vec<String>>,
}

impl RunLogger {
    pub fn new(target: &'static str) -> Self {
        RunLogger {
            target,
            debug_log: Mutex::new(Vec::new()),
        }
    }

    pub async fn debug(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        log::debug!(target: self.target, "{}", message);
        self.debug_log.lock().await.push(timestamped(message));
    }

    pub async fn info(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        log::info!(target: self.target, "{}", message);
        self.debug_log.lock().await.push(timestamped(message));
    }

    pub async fn warn(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        log::warn!(target: self.target, "{}", message);
        self.debug_log.lock().await.push(timestamped(message));
    }

    pub async fn error(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        log::error!(target: self.target, "{}", message);
        self.debug_log.lock().await.push(timestamped(message));
    }

    /// Snapshot of every line logged so far, in append order, for embedding
    /// into the run record.
    pub async fn debug_log(&self) -> Vec<String> {
        self.debug_log.lock().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn captures_lines_in_order_with_timestamps() {
        let logger = RunLogger::new("test");
        logger.info("round 1 started").await;
        logger.warn("retrying after rate limit").await;
        let lines = logger.debug_log().await;
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("round 1 started"));
        assert!(lines[1].contains("retrying after rate limit"));
    }
}
