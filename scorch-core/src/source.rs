//! Source image staging and sequential chunk reads.
//!
//! A compressed image (`.gz`, `.xz`, `.zst`) is decompressed to a temporary
//! file before any device work starts; the write engine then streams from
//! the staged copy exactly as it would from a raw image.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use flate2::read::GzDecoder;
use log::info;
use tempfile::{NamedTempFile, TempPath};
use xz2::read::XzDecoder;
use zstd::stream::read::Decoder as ZstdDecoder;

use crate::buffer::BufferSlot;
use crate::error::FlashError;

/// A source image ready for writing.
///
/// If staging decompressed to a temp file, this struct holds the handle and
/// deletes the file on drop.
#[derive(Debug)]
pub struct StagedImage {
    path: PathBuf,
    _temp_handle: Option<TempPath>,
}

impl StagedImage {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Stages `input_path` for writing, decompressing it to a temporary file if
/// the extension says it is compressed.
///
/// Cancellation during staging surfaces as `io::ErrorKind::Interrupted`.
pub fn stage<F>(
    input_path: &Path,
    running: Arc<AtomicBool>,
    mut on_progress: F,
) -> io::Result<StagedImage>
where
    F: FnMut(u64),
{
    let ext = input_path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();

    let input_file = File::open(input_path)?;

    let mut reader: Box<dyn Read> = match ext.as_str() {
        "gz" | "gzip" => Box::new(GzDecoder::new(BufReader::new(input_file))),
        "xz" => Box::new(XzDecoder::new(BufReader::new(input_file))),
        "zst" | "zstd" => Box::new(ZstdDecoder::new(BufReader::new(input_file))?),
        // Not a compressed file; the write engine can stream it directly.
        _ => {
            return Ok(StagedImage {
                path: input_path.to_path_buf(),
                _temp_handle: None,
            });
        }
    };

    info!("decompressing {} to a staging file", input_path.display());

    let mut temp_file = NamedTempFile::new()?;
    {
        let mut writer = BufWriter::new(&mut temp_file);
        let mut buffer = [0u8; 8192];
        let mut total: u64 = 0;

        loop {
            if !running.load(Ordering::SeqCst) {
                return Err(io::Error::new(
                    io::ErrorKind::Interrupted,
                    "Operation cancelled by user",
                ));
            }

            let n = reader.read(&mut buffer)?;
            if n == 0 {
                break;
            }
            writer.write_all(&buffer[..n])?;
            total += n as u64;
            on_progress(total);
        }
        writer.flush()?;
    }

    // Hand over ownership of the temp file to the StagedImage struct.
    let temp_path = temp_file.into_temp_path();
    Ok(StagedImage {
        path: temp_path.to_path_buf(),
        _temp_handle: Some(temp_path),
    })
}

/// Sequential reader over a staged image.
#[derive(Debug)]
pub struct ImageReader {
    file: File,
    total_size: u64,
    cursor: u64,
}

impl ImageReader {
    /// Opens the staged image and validates that it has a usable size.
    pub fn open(path: &Path) -> Result<Self, FlashError> {
        let file = File::open(path).map_err(|source| FlashError::SourceOpen {
            path: path.to_path_buf(),
            source,
        })?;
        let total_size = file
            .metadata()
            .map_err(|_| FlashError::SourceSize {
                path: path.to_path_buf(),
            })?
            .len();
        if total_size == 0 {
            return Err(FlashError::SourceSize {
                path: path.to_path_buf(),
            });
        }
        Ok(Self {
            file,
            total_size,
            cursor: 0,
        })
    }

    /// Total image size in bytes.
    pub fn size(&self) -> u64 {
        self.total_size
    }

    /// Fills `slot` with the next chunk and returns its length, 0 once the
    /// image is exhausted. Never reads more than the slot's capacity.
    pub fn read_into(&mut self, slot: &mut BufferSlot) -> Result<usize, FlashError> {
        let remaining = self.total_size - self.cursor;
        let to_read = std::cmp::min(slot.capacity() as u64, remaining) as usize;
        if to_read == 0 {
            slot.set_valid_len(0);
            return Ok(0);
        }

        self.file
            .read_exact(&mut slot.space()[..to_read])
            .map_err(|source| FlashError::SourceRead {
                offset: self.cursor,
                source,
            })?;
        self.cursor += to_read as u64;
        slot.set_valid_len(to_read);
        Ok(to_read)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferPool;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::io::Write as _;

    fn image_file(len: usize) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        file.write_all(&data).unwrap();
        file.flush().unwrap();
        file
    }

    fn keep_running() -> Arc<AtomicBool> {
        Arc::new(AtomicBool::new(true))
    }

    #[test]
    fn missing_image_is_a_source_open_error() {
        let err = ImageReader::open(Path::new("/no/such/image.img")).unwrap_err();
        assert!(matches!(err, FlashError::SourceOpen { .. }));
    }

    #[test]
    fn empty_image_is_rejected() {
        let file = NamedTempFile::new().unwrap();
        let err = ImageReader::open(file.path()).unwrap_err();
        assert!(matches!(err, FlashError::SourceSize { .. }));
    }

    #[test]
    fn chunks_are_sequential_and_bounded() {
        let file = image_file(1500);
        let mut reader = ImageReader::open(file.path()).unwrap();
        let mut pool = BufferPool::new(512).unwrap();

        assert_eq!(reader.size(), 1500);
        assert_eq!(reader.read_into(pool.slot(0)).unwrap(), 512);
        assert_eq!(pool.slot(0).data()[0], 0);
        assert_eq!(reader.read_into(pool.slot(0)).unwrap(), 512);
        assert_eq!(pool.slot(0).data()[0], (512 % 251) as u8);
        assert_eq!(reader.read_into(pool.slot(0)).unwrap(), 476);
        assert_eq!(reader.read_into(pool.slot(0)).unwrap(), 0);
    }

    #[test]
    fn raw_images_stage_in_place() {
        let file = image_file(64);
        let staged = stage(file.path(), keep_running(), |_| {}).unwrap();
        assert_eq!(staged.path(), file.path());
    }

    #[test]
    fn gzip_images_are_decompressed() {
        let payload: Vec<u8> = (0..4096).map(|i| (i % 7) as u8).collect();
        let mut compressed = tempfile::Builder::new().suffix(".gz").tempfile().unwrap();
        let mut encoder = GzEncoder::new(&mut compressed, Compression::default());
        encoder.write_all(&payload).unwrap();
        encoder.finish().unwrap();
        compressed.flush().unwrap();

        let mut staged_bytes = 0;
        let staged = stage(compressed.path(), keep_running(), |total| {
            staged_bytes = total;
        })
        .unwrap();

        assert_ne!(staged.path(), compressed.path());
        assert_eq!(staged_bytes, payload.len() as u64);
        assert_eq!(std::fs::read(staged.path()).unwrap(), payload);
    }

    #[test]
    fn staging_honours_cancellation() {
        let mut compressed = tempfile::Builder::new().suffix(".gz").tempfile().unwrap();
        let mut encoder = GzEncoder::new(&mut compressed, Compression::default());
        encoder.write_all(&[0u8; 1024]).unwrap();
        encoder.finish().unwrap();
        compressed.flush().unwrap();

        let cancelled = Arc::new(AtomicBool::new(false));
        let err = stage(compressed.path(), cancelled, |_| {}).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Interrupted);
    }
}
