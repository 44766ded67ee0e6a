//! Byte-level access to assembly images.
//!
//! Probing opens many candidate files and reads only a few hundred bytes of each. This
//! module provides the storage layer underneath [`crate::image::ImageHandle`]: a small
//! [`Backend`] trait with a memory-mapped implementation for files on disk and a shared
//! buffer implementation for images supplied by the host, plus the little-endian readers
//! used by the metadata decoder.
//!
//! # Key Components
//!
//! - [`Backend`] - Trait for data sources (disk files, memory buffers)
//! - [`Physical`] - Memory-mapped file backend
//! - [`Memory`] - Shared in-memory buffer backend
//! - [`io`] - Bounds-checked little-endian readers
//!
//! # Examples
//!
//! ```rust,no_run
//! use clrbind::file::{Backend, Physical};
//!
//! let file = Physical::new("app/Foo.dll")?;
//! let magic = file.data_slice(0, 2)?;
//! assert_eq!(magic, b"MZ");
//! # Ok::<(), clrbind::Error>(())
//! ```

pub mod io;

mod memory;
mod physical;

pub use memory::Memory;
pub use physical::Physical;

use crate::Result;

/// Backend trait for image data sources.
///
/// This trait abstracts over the source of image bytes, allowing both on-disk and
/// in-memory representations. All implementations must be thread-safe, since an image
/// handle is shared by every thread that receives the same bound assembly.
pub trait Backend: Send + Sync + std::fmt::Debug {
    /// Returns a slice of the data at the given offset and length.
    ///
    /// # Arguments
    ///
    /// * `offset` - The starting offset within the data.
    /// * `len` - The length of the slice in bytes.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::OutOfBounds`] if the requested range is out of bounds.
    fn data_slice(&self, offset: usize, len: usize) -> Result<&[u8]> {
        let Some(offset_end) = offset.checked_add(len) else {
            return Err(crate::Error::OutOfBounds);
        };

        self.data()
            .get(offset..offset_end)
            .ok_or(crate::Error::OutOfBounds)
    }

    /// Returns the entire data buffer.
    fn data(&self) -> &[u8];

    /// Returns the total length of the data buffer.
    fn len(&self) -> usize {
        self.data().len()
    }

    /// Returns `true` if the source holds no bytes at all.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
