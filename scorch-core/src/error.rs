//! The error taxonomy for imaging operations.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can end an imaging operation.
///
/// Transient single-attempt write failures are handled inside
/// [`crate::retry::RetryController`] and never surface here; every variant
/// below is terminal for the operation that produced it. Cancellation is not
/// an error — it is reported as
/// [`WriteOutcome::Cancelled`](crate::session::WriteOutcome).
#[derive(Debug, Error)]
pub enum FlashError {
    /// The source image is missing or unreadable.
    #[error("cannot open source image {path}: {source}")]
    SourceOpen { path: PathBuf, source: io::Error },

    /// The source image reports a size of zero, or its size cannot be read.
    #[error("source image {path} has zero or unreadable size")]
    SourceSize { path: PathBuf },

    /// A mid-stream read from the source failed. Source reads are never
    /// retried; the retry policy applies to device writes only.
    #[error("source read failed at offset {offset}: {source}")]
    SourceRead { offset: u64, source: io::Error },

    /// The target device could not be opened, most commonly for lack of
    /// privileges.
    #[error("cannot open target device {path}: {source}")]
    TargetOpen { path: PathBuf, source: io::Error },

    /// The image is larger than the device it is being written to.
    #[error("image ({image_bytes} bytes) does not fit on the target device ({device_bytes} bytes)")]
    TargetTooSmall { image_bytes: u64, device_bytes: u64 },

    /// A sector-aligned staging buffer could not be allocated.
    #[error("cannot allocate a {capacity}-byte sector-aligned buffer")]
    Allocation { capacity: usize },

    /// Every attempt at one offset failed; carries the last error observed.
    /// The block at `offset` may have been left partially written.
    #[error("write failed at offset {offset} ({len} bytes) after {attempts} attempts: {source}")]
    WriteExhausted {
        offset: u64,
        len: usize,
        attempts: u32,
        source: io::Error,
    },

    /// The closing flush/sync after the last chunk failed.
    #[error("final device sync failed: {source}")]
    Finalize { source: io::Error },
}
