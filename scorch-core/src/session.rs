//! Per-operation bookkeeping for one image write.

use log::debug;

/// Where a write operation currently stands.
///
/// `Failed` and `Cancelled` are reachable from any phase after `Init`; the
/// others advance in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WritePhase {
    Init,
    Unmounting,
    OpeningSource,
    OpeningTarget,
    AllocatingBuffers,
    Writing,
    Finalizing,
    Done,
    Failed,
    Cancelled,
}

/// State for a single image write, owned by the orchestrator and torn down
/// with it. Nothing here is shared globally or persisted across invocations.
#[derive(Debug)]
pub struct WriteSession {
    total_size: u64,
    written_bytes: u64,
    retried_attempts: u32,
    phase: WritePhase,
    last_error: Option<String>,
}

impl WriteSession {
    pub(crate) fn new() -> Self {
        Self {
            total_size: 0,
            written_bytes: 0,
            retried_attempts: 0,
            phase: WritePhase::Init,
            last_error: None,
        }
    }

    pub(crate) fn enter(&mut self, phase: WritePhase) {
        debug!("write phase {:?} -> {:?}", self.phase, phase);
        self.phase = phase;
    }

    pub(crate) fn begin_write(&mut self, total_size: u64) {
        self.total_size = total_size;
        self.enter(WritePhase::Writing);
    }

    /// Accounts for one fully written chunk by its pre-padding length.
    pub(crate) fn advance(&mut self, chunk_len: usize) {
        self.written_bytes += chunk_len as u64;
    }

    pub(crate) fn record_attempts(&mut self, attempts: u32) {
        self.retried_attempts += attempts.saturating_sub(1);
    }

    pub(crate) fn fail(&mut self, detail: &str) {
        self.last_error = Some(detail.to_string());
        self.enter(WritePhase::Failed);
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn written_bytes(&self) -> u64 {
        self.written_bytes
    }

    /// Retries accumulated across all chunks (attempts beyond each chunk's
    /// first).
    pub fn retried_attempts(&self) -> u32 {
        self.retried_attempts
    }

    pub fn phase(&self) -> WritePhase {
        self.phase
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Completion fraction in `[0, 1]`.
    pub fn progress_fraction(&self) -> f64 {
        if self.total_size == 0 {
            0.0
        } else {
            (self.written_bytes as f64 / self.total_size as f64).clamp(0.0, 1.0)
        }
    }
}

/// Terminal result of a write that did not fail.
///
/// Failures are the `Err` arm of [`crate::write::run`]; cancellation is a
/// requested stop, not an error.
#[derive(Debug)]
pub enum WriteOutcome {
    /// Every byte of the image reached the device.
    Done(WriteSession),
    /// Cancellation was requested and honoured at a checkpoint.
    Cancelled(WriteSession),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fraction_stays_in_bounds() {
        let mut session = WriteSession::new();
        assert_eq!(session.progress_fraction(), 0.0);

        session.begin_write(1000);
        session.advance(500);
        assert_eq!(session.progress_fraction(), 0.5);

        session.advance(700);
        assert_eq!(session.progress_fraction(), 1.0);
    }

    #[test]
    fn attempts_beyond_the_first_count_as_retries() {
        let mut session = WriteSession::new();
        session.record_attempts(1);
        session.record_attempts(3);
        assert_eq!(session.retried_attempts(), 2);
    }

    #[test]
    fn failure_records_phase_and_detail() {
        let mut session = WriteSession::new();
        session.begin_write(10);
        session.fail("boom");

        assert_eq!(session.phase(), WritePhase::Failed);
        assert_eq!(session.last_error(), Some("boom"));
    }
}
