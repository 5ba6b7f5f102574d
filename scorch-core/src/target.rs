//! Raw device access: unbuffered opens and single bounded write attempts.

use std::fs::{File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::Path;

use crate::SECTOR_SIZE;
use crate::error::FlashError;

#[cfg(windows)]
const FILE_FLAG_NO_BUFFERING: u32 = 0x2000_0000;
#[cfg(windows)]
const FILE_FLAG_WRITE_THROUGH: u32 = 0x8000_0000;

#[cfg(target_os = "linux")]
use nix::ioctl_read;

#[cfg(target_os = "linux")]
ioctl_read!(blkgetsize64, 0x12, 114, u64);

/// A handle the write engine can push image data through.
///
/// [`File`] is the implementation used against real devices; tests and
/// alternative front-ends can substitute in-memory handles.
pub trait TargetHandle: Write + Seek {
    /// Force everything written so far down to stable storage.
    fn sync_storage(&mut self) -> io::Result<()>;

    /// Total capacity of the underlying storage in bytes, where the handle
    /// can report one.
    fn storage_size(&self) -> Option<u64> {
        None
    }
}

impl TargetHandle for File {
    fn sync_storage(&mut self) -> io::Result<()> {
        self.sync_all()
    }

    fn storage_size(&self) -> Option<u64> {
        #[cfg(target_os = "linux")]
        {
            use std::os::unix::io::AsRawFd;
            let mut size: u64 = 0;
            if unsafe { blkgetsize64(self.as_raw_fd(), &mut size) }.is_ok() && size > 0 {
                return Some(size);
            }
        }
        // Not a block device (or not Linux): fall back to file metadata.
        self.metadata().ok().map(|m| m.len()).filter(|len| *len > 0)
    }
}

/// Owns the target handle for the duration of one imaging operation.
///
/// Performs exactly one bounded write per [`write_attempt`] call; the retry
/// policy lives one layer up in [`crate::retry`].
///
/// [`write_attempt`]: DeviceWriter::write_attempt
pub struct DeviceWriter<W> {
    handle: W,
}

impl DeviceWriter<File> {
    /// Opens `path` for unbuffered writing.
    ///
    /// Raw device nodes usually require elevated privileges, so the most
    /// common failure here is a permissions error.
    pub fn open(path: &Path) -> Result<Self, FlashError> {
        let mut options = OpenOptions::new();
        options.write(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.custom_flags(libc::O_DIRECT);
        }
        #[cfg(windows)]
        {
            use std::os::windows::fs::OpenOptionsExt;
            options.custom_flags(FILE_FLAG_NO_BUFFERING | FILE_FLAG_WRITE_THROUGH);
        }
        let handle = options.open(path).map_err(|source| FlashError::TargetOpen {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self { handle })
    }
}

impl<W: TargetHandle> DeviceWriter<W> {
    /// Wraps an already-open handle.
    pub fn new(handle: W) -> Self {
        Self { handle }
    }

    /// The wrapped handle.
    pub fn handle(&self) -> &W {
        &self.handle
    }

    /// Total device capacity, where the handle can report one.
    pub fn capacity(&self) -> Option<u64> {
        self.handle.storage_size()
    }

    /// One bounded write of `chunk` at `offset`.
    ///
    /// The position is re-established on every call: a previous failed or
    /// partial attempt may have left it anywhere. On a full-length write the
    /// data is flushed and synced before this returns, so a reported success
    /// is durable. Returns the number of bytes the handle accepted; a short
    /// count is the caller's problem to retry.
    pub fn write_attempt(&mut self, chunk: &[u8], offset: u64) -> io::Result<usize> {
        debug_assert_eq!(chunk.len() % SECTOR_SIZE, 0);
        self.handle.seek(SeekFrom::Start(offset))?;
        let written = self.handle.write(chunk)?;
        if written == chunk.len() {
            self.handle.flush()?;
            self.handle.sync_storage()?;
        }
        Ok(written)
    }

    /// Final flush once the whole image has been written.
    pub fn finalize(&mut self) -> io::Result<()> {
        self.handle.flush()?;
        self.handle.sync_storage()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    struct MemTarget {
        store: Cursor<Vec<u8>>,
        short_by: usize,
        syncs: usize,
    }

    impl MemTarget {
        fn new() -> Self {
            Self {
                store: Cursor::new(Vec::new()),
                short_by: 0,
                syncs: 0,
            }
        }
    }

    impl Write for MemTarget {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let take = buf.len() - self.short_by.min(buf.len());
            self.short_by = 0;
            self.store.write(&buf[..take])
        }

        fn flush(&mut self) -> io::Result<()> {
            self.store.flush()
        }
    }

    impl Seek for MemTarget {
        fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
            self.store.seek(pos)
        }
    }

    impl TargetHandle for MemTarget {
        fn sync_storage(&mut self) -> io::Result<()> {
            self.syncs += 1;
            Ok(())
        }
    }

    #[test]
    fn full_write_is_synced() {
        let mut writer = DeviceWriter::new(MemTarget::new());
        let chunk = vec![0xABu8; 1024];

        let written = writer.write_attempt(&chunk, 512).unwrap();
        assert_eq!(written, 1024);
        assert_eq!(writer.handle().syncs, 1);
        assert_eq!(&writer.handle().store.get_ref()[512..1536], &chunk[..]);
    }

    #[test]
    fn short_write_is_reported_not_synced() {
        let mut target = MemTarget::new();
        target.short_by = 100;
        let mut writer = DeviceWriter::new(target);

        let written = writer.write_attempt(&[0x11u8; 512], 0).unwrap();
        assert_eq!(written, 412);
        assert_eq!(writer.handle().syncs, 0);
    }

    #[test]
    fn reseek_overwrites_the_same_offset() {
        let mut writer = DeviceWriter::new(MemTarget::new());
        writer.write_attempt(&[0x22u8; 512], 0).unwrap();
        writer.write_attempt(&[0x33u8; 512], 0).unwrap();

        let store = writer.handle().store.get_ref();
        assert_eq!(store.len(), 512);
        assert!(store.iter().all(|b| *b == 0x33));
    }
}
