//! Drives one image write end to end.
//!
//! The pipeline stages the source, opens the target, then loops: read a
//! chunk into one buffer slot, rotate, write the other slot to the device
//! through the retry layer, report progress, check for cancellation.
//! Execution is strictly sequential on the calling thread; the two-slot
//! rotation keeps the read/write stages distinct without real overlap.
//! Device offsets only ever move forward — a chunk may be re-attempted at
//! the same offset, but is never skipped or reordered.

use std::io;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use log::{info, warn};

use crate::DEFAULT_CHUNK_CAPACITY;
use crate::SECTOR_SIZE;
use crate::buffer::BufferPool;
use crate::error::FlashError;
use crate::progress::{ProgressReporter, ProgressSink};
use crate::retry::{RetryController, RetryPolicy, WriteVerdict};
use crate::session::{WriteOutcome, WritePhase, WriteSession};
use crate::source::{self, ImageReader};
use crate::target::{DeviceWriter, TargetHandle};
use crate::unmount::Unmounter;

/// Writes an image file to a block device.
///
/// This is the main entry point for the writing process. It unmounts the
/// device (best-effort), stages the image (decompressing it if necessary),
/// streams it to the device chunk by chunk, and finishes with a full sync,
/// reporting progress throughout.
///
/// # Arguments
///
/// * `image_path` - Path to the source image file. Can be compressed.
/// * `device_path` - Path to the target block device.
/// * `unmounter` - The host's unmount capability; failures are non-fatal.
/// * `policy` - Retry configuration for transient device-write failures.
/// * `running` - An `Arc<AtomicBool>` for graceful cancellation: storing
///   `false` stops the operation at the next checkpoint.
/// * `on_stage_start` - Closure called when staging begins.
/// * `on_stage_progress` - Closure called with the number of bytes staged.
/// * `on_write_start` - Closure called when writing begins, with the total
///   image size.
/// * `sink` - Receives one progress event before the first write and one
///   per chunk after that.
///
/// # Errors
///
/// Returns a [`FlashError`] when the image or device cannot be accessed,
/// the image does not fit, buffers cannot be allocated, a source read
/// fails, or a device write keeps failing after all retries. Cancellation
/// is not an error; it is the [`WriteOutcome::Cancelled`] return.
#[allow(clippy::too_many_arguments)]
pub fn run<S: ProgressSink>(
    image_path: &Path,
    device_path: &Path,
    unmounter: &dyn Unmounter,
    policy: RetryPolicy,
    running: Arc<AtomicBool>,
    on_stage_start: impl FnOnce(),
    on_stage_progress: impl FnMut(u64),
    on_write_start: impl FnOnce(u64),
    sink: &mut S,
) -> Result<WriteOutcome, FlashError> {
    let mut session = WriteSession::new();

    let end = match run_stages(
        image_path,
        device_path,
        unmounter,
        policy,
        running,
        on_stage_start,
        on_stage_progress,
        on_write_start,
        sink,
        &mut session,
    ) {
        Ok(end) => end,
        Err(err) => {
            session.fail(&err.to_string());
            return Err(err);
        }
    };

    Ok(match end {
        PumpEnd::Finished => WriteOutcome::Done(session),
        PumpEnd::Cancelled => WriteOutcome::Cancelled(session),
    })
}

/// How the pipeline stopped, short of an error.
#[derive(Debug, PartialEq, Eq)]
enum PumpEnd {
    Finished,
    Cancelled,
}

#[allow(clippy::too_many_arguments)]
fn run_stages<S: ProgressSink>(
    image_path: &Path,
    device_path: &Path,
    unmounter: &dyn Unmounter,
    policy: RetryPolicy,
    running: Arc<AtomicBool>,
    on_stage_start: impl FnOnce(),
    on_stage_progress: impl FnMut(u64),
    on_write_start: impl FnOnce(u64),
    sink: &mut S,
    session: &mut WriteSession,
) -> Result<PumpEnd, FlashError> {
    session.enter(WritePhase::Unmounting);
    if let Err(e) = unmounter.unmount(device_path) {
        // Best-effort: the exclusive open below fails explicitly if the
        // device is still busy.
        warn!("could not unmount {}: {e}", device_path.display());
    }

    session.enter(WritePhase::OpeningSource);
    on_stage_start();
    let staged = match source::stage(image_path, running.clone(), on_stage_progress) {
        Ok(staged) => staged,
        Err(e) if e.kind() == io::ErrorKind::Interrupted => {
            session.enter(WritePhase::Cancelled);
            return Ok(PumpEnd::Cancelled);
        }
        Err(source) => {
            return Err(FlashError::SourceOpen {
                path: image_path.to_path_buf(),
                source,
            });
        }
    };
    let mut reader = ImageReader::open(staged.path())?;
    let image_len = reader.size();

    session.enter(WritePhase::OpeningTarget);
    let mut writer = DeviceWriter::open(device_path)?;
    if let Some(device_len) = writer.capacity() {
        if image_len > device_len {
            return Err(FlashError::TargetTooSmall {
                image_bytes: image_len,
                device_bytes: device_len,
            });
        }
    }

    session.enter(WritePhase::AllocatingBuffers);
    let mut pool = BufferPool::new(DEFAULT_CHUNK_CAPACITY)?;

    info!(
        "writing {image_len} bytes from {} to {}",
        image_path.display(),
        device_path.display()
    );
    on_write_start(image_len);

    let retry = RetryController::new(policy, running.clone());
    execute(
        &mut reader,
        &mut writer,
        &mut pool,
        &retry,
        &running,
        sink,
        session,
    )
}

/// The writing and finalizing phases, separated from the staging/open
/// sequence so tests can drive them against in-memory targets.
fn execute<W: TargetHandle, S: ProgressSink>(
    reader: &mut ImageReader,
    writer: &mut DeviceWriter<W>,
    pool: &mut BufferPool,
    retry: &RetryController,
    running: &AtomicBool,
    sink: &mut S,
    session: &mut WriteSession,
) -> Result<PumpEnd, FlashError> {
    session.begin_write(reader.size());

    match pump(reader, writer, pool, retry, running, sink, session)? {
        PumpEnd::Cancelled => {
            session.enter(WritePhase::Cancelled);
            return Ok(PumpEnd::Cancelled);
        }
        PumpEnd::Finished => {}
    }

    session.enter(WritePhase::Finalizing);
    writer
        .finalize()
        .map_err(|source| FlashError::Finalize { source })?;
    host_sync();

    session.enter(WritePhase::Done);
    info!(
        "wrote {} bytes ({} retried attempts)",
        session.written_bytes(),
        session.retried_attempts()
    );
    Ok(PumpEnd::Finished)
}

/// The read/rotate/write loop.
fn pump<W: TargetHandle, S: ProgressSink>(
    reader: &mut ImageReader,
    writer: &mut DeviceWriter<W>,
    pool: &mut BufferPool,
    retry: &RetryController,
    running: &AtomicBool,
    sink: &mut S,
    session: &mut WriteSession,
) -> Result<PumpEnd, FlashError> {
    let total = reader.size();
    let mut reporter = ProgressReporter::new(sink);
    reporter.begin(total);

    // Prime the pipeline: the first chunk lands in the slot that rotation
    // will turn into the write source.
    let mut chunk_len = reader.read_into(pool.read_target())?;

    while chunk_len > 0 {
        if !running.load(Ordering::SeqCst) {
            return Ok(PumpEnd::Cancelled);
        }

        let offset = session.written_bytes();
        pool.rotate();

        let verdict = {
            let slot = pool.write_source();
            retry.write_with_retry(writer, slot.padded_data(), offset)
        };
        match verdict {
            WriteVerdict::Written { attempts } => {
                session.advance(chunk_len);
                session.record_attempts(attempts);
                reporter.update(session.written_bytes(), total);
            }
            WriteVerdict::Exhausted { attempts, last } => {
                return Err(FlashError::WriteExhausted {
                    offset,
                    len: chunk_len.next_multiple_of(SECTOR_SIZE),
                    attempts,
                    source: last,
                });
            }
            WriteVerdict::Cancelled => return Ok(PumpEnd::Cancelled),
        }

        // The next chunk goes into the slot the device is done with.
        chunk_len = reader.read_into(pool.read_target())?;
    }

    Ok(PumpEnd::Finished)
}

/// Asks the OS to push any remaining dirty pages for the whole system, the
/// way `sync(1)` would after a manual `dd`.
fn host_sync() {
    #[cfg(unix)]
    unsafe {
        libc::sync()
    };
}
