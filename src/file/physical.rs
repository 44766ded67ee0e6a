//! Memory-mapped backend for images on disk.

use super::Backend;
use crate::{Error::FileError, Result};

use memmap2::Mmap;
use std::{fs, path::Path};

/// A read-only mapping of a file on disk.
///
/// The mapping lives exactly as long as this value. When the owning image handle is
/// dropped (for example by the losing thread of an insert race) the mapping and the
/// file handle are released.
#[derive(Debug)]
pub struct Physical {
    data: Mmap,
}

impl Physical {
    /// Maps the file at `path` into memory.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::FileError`] if the file does not exist or cannot be opened
    /// or mapped. The original [`std::io::ErrorKind`] is preserved so callers can tell a
    /// missing candidate apart from an unreadable one.
    pub fn new(path: impl AsRef<Path>) -> Result<Physical> {
        let file = fs::File::open(path).map_err(FileError)?;

        // SAFETY: the mapping is read-only and owned by this value; external truncation
        // of a probed image is outside what the binder can guard against.
        let mmap = unsafe { Mmap::map(&file) }.map_err(FileError)?;

        Ok(Physical { data: mmap })
    }
}

impl Backend for Physical {
    fn data(&self) -> &[u8] {
        self.data.as_ref()
    }

    fn len(&self) -> usize {
        self.data.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn physical() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"MZ\x90\x00\x03\x00\x00\x00").unwrap();
        file.flush().unwrap();

        let physical = Physical::new(file.path()).unwrap();

        assert_eq!(physical.len(), 8);
        assert_eq!(physical.data()[0], 0x4D);
        assert_eq!(physical.data()[1], 0x5A);
        assert_eq!(physical.data_slice(2, 2).unwrap(), &[0x90, 0x00]);
        assert!(physical.data_slice(4, 5).is_err());
        assert!(physical
            .data_slice(u32::MAX as usize, u32::MAX as usize)
            .is_err());
    }

    #[test]
    fn test_physical_invalid_file_path() {
        let result = Physical::new("/nonexistent/path/to/file.dll");
        match result.unwrap_err() {
            FileError(io_error) => {
                assert_eq!(io_error.kind(), std::io::ErrorKind::NotFound);
            }
            other => panic!("Expected FileError, got {other:?}"),
        }
    }

    #[test]
    fn test_physical_empty_file() {
        let file = tempfile::NamedTempFile::new().unwrap();

        let physical = Physical::new(file.path()).unwrap();
        assert_eq!(physical.len(), 0);
        assert!(physical.data_slice(0, 1).is_err());
    }
}
