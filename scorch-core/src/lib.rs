//! The core, UI-agnostic library for the `scorch` disk imaging utility.
//!
//! `scorch-core` is designed to be used as a library by any front-end, whether
//! it's a command-line interface (like `scorch`) or a graphical user interface.
//! It handles the complexities of device discovery, image staging, aligned
//! raw-device I/O, retry policy, and cooperative cancellation.
//!
//! The library is structured into several key modules:
//! - [`device`]: Contains the cross-platform `Device` struct.
//! - [`platform`]: Provides platform-specific logic for discovering removable
//!   block devices and for the system unmounter.
//! - [`source`]: Stages the source image (decompressing it if needed) and
//!   reads it sequentially.
//! - [`buffer`]: The two rotating sector-aligned staging buffers.
//! - [`target`]: Unbuffered device access and single bounded write attempts.
//! - [`retry`]: The bounded retry-with-backoff loop around device writes.
//! - [`progress`]: Progress events and the sink they are delivered to.
//! - [`session`]: Per-operation state, from `Init` through the terminal
//!   states.
//! - [`mod@write`]: The orchestrator that composes all of the above.
//!
//! The primary entry point is [`write::run`]. It blocks the calling thread
//! for the duration of the operation and reports progress through a
//! caller-supplied sink, so a front-end that wants a responsive UI runs it on
//! a worker thread.
//!
//! ## Example: Writing an Image with Progress Reporting
//!
//! ```rust,no_run
//! use scorch_core::platform::{self, SystemUnmounter};
//! use scorch_core::progress::ProgressEvent;
//! use scorch_core::retry::RetryPolicy;
//! use scorch_core::write;
//! use std::path::Path;
//! use std::sync::{Arc, atomic::AtomicBool};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let image_path = Path::new("path/to/image.img.xz");
//!     let devices = platform::get_removable_devices()?;
//!     let device = devices.first().expect("No removable devices found.");
//!
//!     // A shared flag to allow for graceful cancellation: storing `false`
//!     // requests an abort at the next checkpoint.
//!     let running = Arc::new(AtomicBool::new(true));
//!
//!     let mut on_progress = |event: ProgressEvent| {
//!         println!("{:5.1}% ({} bytes)", event.percent, event.written_bytes);
//!     };
//!
//!     let outcome = write::run(
//!         image_path,
//!         &device.path,
//!         &SystemUnmounter,
//!         RetryPolicy::default(),
//!         running.clone(),
//!         || {},  // on_stage_start
//!         |_| {}, // on_stage_progress
//!         |_| {}, // on_write_start
//!         &mut on_progress,
//!     )?;
//!
//!     println!("{outcome:?}");
//!     Ok(())
//! }
//! ```

pub mod buffer;
pub mod device;
pub mod error;
pub mod platform;
pub mod progress;
pub mod retry;
pub mod session;
pub mod source;
pub mod target;
pub mod unmount;
pub mod write;

pub use error::FlashError;
pub use session::{WriteOutcome, WritePhase, WriteSession};

/// Minimum addressable unit for raw device I/O. Every write handed to the
/// device is a multiple of this, and every staging buffer is aligned to it.
pub const SECTOR_SIZE: usize = 512;

/// Default capacity of each staging buffer, a multiple of [`SECTOR_SIZE`].
pub const DEFAULT_CHUNK_CAPACITY: usize = 8 * 1024 * 1024;
