//! Image and metadata reader collaborators.
//!
//! The binder never parses files itself. It asks an [`ImageReader`] to open a candidate
//! ([`ImageReader::open_image`]) and to report the identity embedded in it
//! ([`ImageReader::read_identity`]). Two readers ship with the crate:
//!
//! - [`PeImageReader`] - decodes real PE images: locates the CLI header with `goblin`,
//!   walks the metadata root and decodes the `Assembly` table row
//! - [`CatalogImageReader`] - serves identities from a registry or from plain-text
//!   manifests, for hosts that already know their assemblies (bundles, tests)
//!
//! # Opening candidates
//!
//! A candidate that does not exist must surface as [`crate::Error::FileError`] with
//! [`std::io::ErrorKind::NotFound`]; the probe treats that as an empty slot and moves on.
//! Any other failure is reported as a bad image.
//!
//! # Examples
//!
//! ```rust,no_run
//! use clrbind::image::{ImageReader, ImageSource, PeImageReader};
//!
//! let reader = PeImageReader::new();
//! let image = reader.open_image(&ImageSource::from("app/Foo.dll"))?;
//! let identity = reader.read_identity(&image)?;
//! println!("{} -> {}", image.location(), identity);
//! # Ok::<(), clrbind::Error>(())
//! ```

mod catalog;
mod pe;
mod tables;

pub use catalog::CatalogImageReader;
pub use pe::{read_pe_identity, PeImageReader};
pub use tables::{read_assembly_identity, MetadataRoot};

use std::{
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
};

use crate::{
    file::{Backend, Memory, Physical},
    identity::AssemblyIdentity,
    Result,
};

/// Where a candidate image comes from.
#[derive(Clone)]
pub enum ImageSource {
    /// A file on disk
    Path(PathBuf),
    /// Bytes supplied by the host, with a name used for diagnostics
    Memory {
        /// Diagnostic name of the image
        name: String,
        /// Image bytes
        data: Arc<[u8]>,
    },
}

impl ImageSource {
    /// Creates an in-memory source.
    pub fn memory(name: impl Into<String>, data: impl Into<Arc<[u8]>>) -> Self {
        ImageSource::Memory {
            name: name.into(),
            data: data.into(),
        }
    }

    /// Human readable location, used in errors and the binding log.
    #[must_use]
    pub fn location(&self) -> String {
        match self {
            ImageSource::Path(path) => path.display().to_string(),
            ImageSource::Memory { name, .. } => format!("memory:{name}"),
        }
    }

    /// The file path, if this source is on disk.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        match self {
            ImageSource::Path(path) => Some(path),
            ImageSource::Memory { .. } => None,
        }
    }
}

impl fmt::Debug for ImageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageSource::Path(path) => f.debug_tuple("Path").field(path).finish(),
            ImageSource::Memory { name, data } => f
                .debug_struct("Memory")
                .field("name", name)
                .field("len", &data.len())
                .finish(),
        }
    }
}

impl From<PathBuf> for ImageSource {
    fn from(path: PathBuf) -> Self {
        ImageSource::Path(path)
    }
}

impl From<&Path> for ImageSource {
    fn from(path: &Path) -> Self {
        ImageSource::Path(path.to_path_buf())
    }
}

impl From<&str> for ImageSource {
    fn from(path: &str) -> Self {
        ImageSource::Path(PathBuf::from(path))
    }
}

/// An opened image.
///
/// Owns the image bytes through a [`Backend`]. Dropping the handle releases the mapping
/// and the underlying file handle.
#[derive(Debug)]
pub struct ImageHandle {
    location: String,
    backend: Box<dyn Backend>,
}

impl ImageHandle {
    /// Opens `source` with the default backends: a memory map for files, the shared
    /// buffer for in-memory images.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::FileError`] if the file cannot be opened or mapped.
    pub fn open(source: &ImageSource) -> Result<Self> {
        let backend: Box<dyn Backend> = match source {
            ImageSource::Path(path) => Box::new(Physical::new(path)?),
            ImageSource::Memory { data, .. } => Box::new(Memory::new(data.clone())),
        };

        Ok(Self::from_backend(source.location(), backend))
    }

    /// Wraps an existing backend.
    pub fn from_backend(location: impl Into<String>, backend: Box<dyn Backend>) -> Self {
        ImageHandle {
            location: location.into(),
            backend,
        }
    }

    /// Where the image was opened from.
    #[must_use]
    pub fn location(&self) -> &str {
        &self.location
    }

    /// The complete image.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        self.backend.data()
    }

    /// Bounds-checked slice of the image.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::OutOfBounds`] if the range exceeds the image.
    pub fn data_slice(&self, offset: usize, len: usize) -> Result<&[u8]> {
        self.backend.data_slice(offset, len)
    }

    /// Size of the image in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.backend.len()
    }

    /// Returns `true` for a zero-length image.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.backend.is_empty()
    }
}

/// Image/metadata reader consumed by the probe.
///
/// Implementations must be thread-safe; the binder calls them from every thread that
/// resolves an assembly.
pub trait ImageReader: Send + Sync {
    /// Opens a candidate image.
    ///
    /// # Errors
    ///
    /// A missing file must be reported as [`crate::Error::FileError`] with
    /// [`std::io::ErrorKind::NotFound`].
    fn open_image(&self, source: &ImageSource) -> Result<ImageHandle> {
        ImageHandle::open(source)
    }

    /// Reads the assembly identity embedded in an opened image.
    ///
    /// # Errors
    ///
    /// Returns an error if the image is not a readable assembly.
    fn read_identity(&self, image: &ImageHandle) -> Result<AssemblyIdentity>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_location() {
        assert_eq!(
            ImageSource::from("/app/Foo.dll").location(),
            "/app/Foo.dll"
        );
        assert_eq!(
            ImageSource::memory("Foo", b"data".to_vec()).location(),
            "memory:Foo"
        );
        assert!(ImageSource::memory("Foo", Vec::<u8>::new()).path().is_none());
    }

    #[test]
    fn test_open_memory_source() {
        let source = ImageSource::memory("Foo", b"MZ".to_vec());
        let image = ImageHandle::open(&source).unwrap();

        assert_eq!(image.location(), "memory:Foo");
        assert_eq!(image.data(), b"MZ");
        assert_eq!(image.len(), 2);
        assert!(image.data_slice(1, 2).is_err());
    }

    #[test]
    fn test_open_missing_file() {
        let error = ImageHandle::open(&ImageSource::from("/nonexistent/Foo.dll")).unwrap_err();
        assert!(error.is_not_found());
    }
}
