//! The bounded retry-with-backoff loop around device writes.

use std::io::{self, ErrorKind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use log::warn;

use crate::target::{DeviceWriter, TargetHandle};

/// Retry configuration, immutable for the whole operation.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Write attempts per chunk before the operation is abandoned.
    pub max_attempts: u32,
    /// Backoff before re-attempting a failed write.
    pub attempt_delay: Duration,
    /// Settle pause after every attempt, success or failure. Removable media
    /// can acknowledge a write before it is ready for the next command.
    pub inter_attempt_pause: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            attempt_delay: Duration::from_millis(5000),
            inter_attempt_pause: Duration::from_millis(200),
        }
    }
}

/// What became of one chunk after up to `max_attempts` tries.
#[derive(Debug)]
pub enum WriteVerdict {
    /// The chunk reached the device in full. `attempts` counts the tries it
    /// took, so `attempts - 1` of them were retries.
    Written { attempts: u32 },
    /// Every attempt failed; carries the last error observed. Fatal: the
    /// block at this offset may have been left partially written, and there
    /// is no partial-block recovery path.
    Exhausted { attempts: u32, last: io::Error },
    /// The cancellation flag was observed before an attempt started.
    Cancelled,
}

/// Wraps individual write attempts in the retry policy.
pub struct RetryController {
    policy: RetryPolicy,
    running: Arc<AtomicBool>,
}

impl RetryController {
    pub fn new(policy: RetryPolicy, running: Arc<AtomicBool>) -> Self {
        Self { policy, running }
    }

    /// Writes `chunk` at `offset`, retrying transient failures.
    ///
    /// A partial write counts as a failure and is retried from the same
    /// offset; the cursor never advances past a chunk that has not fully
    /// succeeded. [`DeviceWriter::write_attempt`] re-seeks on every call, so
    /// each retry starts from a known position.
    pub fn write_with_retry<W: TargetHandle>(
        &self,
        writer: &mut DeviceWriter<W>,
        chunk: &[u8],
        offset: u64,
    ) -> WriteVerdict {
        let mut last = None;

        for attempt in 1..=self.policy.max_attempts {
            if !self.running.load(Ordering::SeqCst) {
                return WriteVerdict::Cancelled;
            }

            let error = match writer.write_attempt(chunk, offset) {
                Ok(n) if n == chunk.len() => {
                    thread::sleep(self.policy.inter_attempt_pause);
                    return WriteVerdict::Written { attempts: attempt };
                }
                Ok(n) => io::Error::new(
                    ErrorKind::WriteZero,
                    format!("short write: {n} of {} bytes", chunk.len()),
                ),
                Err(e) => e,
            };

            warn!(
                "write attempt {attempt}/{} failed at offset {offset}: {error}",
                self.policy.max_attempts
            );
            last = Some(error);

            if attempt < self.policy.max_attempts {
                thread::sleep(self.policy.attempt_delay);
            }
            thread::sleep(self.policy.inter_attempt_pause);
        }

        WriteVerdict::Exhausted {
            attempts: self.policy.max_attempts,
            last: last.unwrap_or_else(|| ErrorKind::WriteZero.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::io::{Cursor, Seek, SeekFrom, Write};

    enum AttemptPlan {
        Short(usize),
        Fail,
    }

    /// In-memory target that consumes a script of failures before accepting
    /// writes normally.
    struct ScriptedTarget {
        store: Cursor<Vec<u8>>,
        script: VecDeque<AttemptPlan>,
        write_offsets: Vec<u64>,
    }

    impl ScriptedTarget {
        fn new(script: Vec<AttemptPlan>) -> Self {
            Self {
                store: Cursor::new(Vec::new()),
                script: script.into(),
                write_offsets: Vec::new(),
            }
        }
    }

    impl Write for ScriptedTarget {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.write_offsets.push(self.store.position());
            match self.script.pop_front() {
                Some(AttemptPlan::Short(n)) => self.store.write(&buf[..n]),
                Some(AttemptPlan::Fail) => Err(io::Error::other("injected failure")),
                None => self.store.write(buf),
            }
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Seek for ScriptedTarget {
        fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
            self.store.seek(pos)
        }
    }

    impl crate::target::TargetHandle for ScriptedTarget {
        fn sync_storage(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 5,
            attempt_delay: Duration::ZERO,
            inter_attempt_pause: Duration::ZERO,
        }
    }

    fn running_flag(value: bool) -> Arc<AtomicBool> {
        Arc::new(AtomicBool::new(value))
    }

    #[test]
    fn first_attempt_success() {
        let mut writer = DeviceWriter::new(ScriptedTarget::new(vec![]));
        let retry = RetryController::new(fast_policy(), running_flag(true));

        match retry.write_with_retry(&mut writer, &[7u8; 1024], 0) {
            WriteVerdict::Written { attempts } => assert_eq!(attempts, 1),
            other => panic!("unexpected verdict: {other:?}"),
        }
    }

    #[test]
    fn failures_are_retried_at_the_same_offset() {
        let script = vec![AttemptPlan::Fail, AttemptPlan::Fail];
        let mut writer = DeviceWriter::new(ScriptedTarget::new(script));
        let retry = RetryController::new(fast_policy(), running_flag(true));
        let chunk = vec![3u8; 512];

        match retry.write_with_retry(&mut writer, &chunk, 2048) {
            WriteVerdict::Written { attempts } => assert_eq!(attempts, 3),
            other => panic!("unexpected verdict: {other:?}"),
        }

        let target = writer.handle();
        assert_eq!(target.write_offsets, vec![2048, 2048, 2048]);
        assert_eq!(&target.store.get_ref()[2048..2560], &chunk[..]);
    }

    #[test]
    fn partial_write_is_retried() {
        let script = vec![AttemptPlan::Short(256)];
        let mut writer = DeviceWriter::new(ScriptedTarget::new(script));
        let retry = RetryController::new(fast_policy(), running_flag(true));
        let chunk = vec![9u8; 512];

        match retry.write_with_retry(&mut writer, &chunk, 0) {
            WriteVerdict::Written { attempts } => assert_eq!(attempts, 2),
            other => panic!("unexpected verdict: {other:?}"),
        }
        assert_eq!(&writer.handle().store.get_ref()[..512], &chunk[..]);
    }

    #[test]
    fn exhausted_after_max_attempts() {
        let script = (0..5).map(|_| AttemptPlan::Fail).collect();
        let mut writer = DeviceWriter::new(ScriptedTarget::new(script));
        let retry = RetryController::new(fast_policy(), running_flag(true));

        match retry.write_with_retry(&mut writer, &[1u8; 512], 4096) {
            WriteVerdict::Exhausted { attempts, last } => {
                assert_eq!(attempts, 5);
                assert_eq!(last.to_string(), "injected failure");
            }
            other => panic!("unexpected verdict: {other:?}"),
        }
        assert_eq!(writer.handle().write_offsets.len(), 5);
    }

    #[test]
    fn cancellation_preempts_the_first_attempt() {
        let mut writer = DeviceWriter::new(ScriptedTarget::new(vec![]));
        let retry = RetryController::new(fast_policy(), running_flag(false));

        assert!(matches!(
            retry.write_with_retry(&mut writer, &[1u8; 512], 0),
            WriteVerdict::Cancelled
        ));
        assert!(writer.handle().write_offsets.is_empty());
    }
}
