//! Catalog image reader.
//!
//! Hosts that already know the identity of every assembly they ship (single-file bundles,
//! test harnesses, tooling that works from a manifest) do not need to parse PE images.
//! [`CatalogImageReader`] serves identities from two places:
//!
//! - a registry of declared paths, checked first
//! - plain-text manifest images, whose content is a display name in UTF-8
//!
//! Manifests are read as assembly *definitions*: an omitted version is `0.0.0.0`, an
//! omitted culture is neutral and an omitted token is `null`.
//!
//! The reader counts [`ImageReader::open_image`] calls, which makes the amount of probing
//! a bind request performed directly observable.

use std::{
    path::{Path, PathBuf},
    sync::atomic::{AtomicUsize, Ordering},
};

use dashmap::DashMap;

use crate::{
    file::Memory,
    identity::AssemblyIdentity,
    image::{ImageHandle, ImageReader, ImageSource},
    Error::Empty,
    Result,
};

/// Image reader backed by declared identities and text manifests.
#[derive(Debug, Default)]
pub struct CatalogImageReader {
    entries: DashMap<PathBuf, AssemblyIdentity>,
    opens: AtomicUsize,
}

impl CatalogImageReader {
    /// Creates an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares the identity of the image at `path`; replaces an earlier declaration.
    pub fn register(&self, path: impl Into<PathBuf>, identity: AssemblyIdentity) {
        self.entries.insert(path.into(), identity);
    }

    /// Builder form of [`CatalogImageReader::register`] taking a display name.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Bind`] if `display_name` does not parse.
    pub fn with_assembly(self, path: impl Into<PathBuf>, display_name: &str) -> Result<Self> {
        let identity = as_definition(AssemblyIdentity::parse(display_name)?);
        self.register(path, identity);
        Ok(self)
    }

    /// Removes a declaration; later opens of `path` fall back to the filesystem.
    pub fn unregister(&self, path: &Path) -> bool {
        self.entries.remove(path).is_some()
    }

    /// Number of images opened through this reader so far.
    #[must_use]
    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::Acquire)
    }

    /// Number of declared images.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing is declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl ImageReader for CatalogImageReader {
    fn open_image(&self, source: &ImageSource) -> Result<ImageHandle> {
        self.opens.fetch_add(1, Ordering::AcqRel);

        if let ImageSource::Path(path) = source {
            if let Some(identity) = self.entries.get(path) {
                let manifest = identity.display_name().into_bytes();
                return Ok(ImageHandle::from_backend(
                    source.location(),
                    Box::new(Memory::new(manifest)),
                ));
            }
        }

        ImageHandle::open(source)
    }

    fn read_identity(&self, image: &ImageHandle) -> Result<AssemblyIdentity> {
        let text = std::str::from_utf8(image.data())
            .map_err(|_| malformed_error!("Manifest at {} is not UTF-8", image.location()))?
            .trim();

        if text.is_empty() {
            return Err(Empty);
        }

        let identity = AssemblyIdentity::parse(text)
            .map_err(|error| malformed_error!("Invalid manifest - {}", error))?;
        Ok(as_definition(identity))
    }
}

fn as_definition(identity: AssemblyIdentity) -> AssemblyIdentity {
    AssemblyIdentity::new(
        identity.name(),
        identity.version(),
        identity.culture().map(str::to_string),
        identity.public_key_token().copied(),
        identity.processor_architecture(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_registered_identity() {
        let reader = CatalogImageReader::new()
            .with_assembly("/app/Foo.dll", "Foo, Version=1.2.0.0")
            .unwrap();

        let image = reader
            .open_image(&ImageSource::from("/app/Foo.dll"))
            .unwrap();
        let identity = reader.read_identity(&image).unwrap();

        assert_eq!(
            identity.display_name(),
            "Foo, Version=1.2.0.0, Culture=neutral, PublicKeyToken=null"
        );
        assert!(!identity.is_partial());
        assert_eq!(reader.open_count(), 1);
    }

    #[test]
    fn test_missing_path_is_not_found() {
        let reader = CatalogImageReader::new();
        let error = reader
            .open_image(&ImageSource::from("/nonexistent/Foo.dll"))
            .unwrap_err();

        assert!(error.is_not_found());
        assert_eq!(reader.open_count(), 1);
    }

    #[test]
    fn test_manifest_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "Bar, Version=2.0.0.0, Culture=de").unwrap();
        file.flush().unwrap();

        let reader = CatalogImageReader::new();
        let image = reader
            .open_image(&ImageSource::from(file.path()))
            .unwrap();
        let identity = reader.read_identity(&image).unwrap();

        assert_eq!(identity.name(), "Bar");
        assert_eq!(identity.culture(), Some("de"));
    }

    #[test]
    fn test_memory_manifest() {
        let reader = CatalogImageReader::new();
        let source = ImageSource::memory("Baz", b"Baz, Version=3.0".to_vec());

        let image = reader.open_image(&source).unwrap();
        assert_eq!(
            reader.read_identity(&image).unwrap().display_name(),
            "Baz, Version=3.0.0.0, Culture=neutral, PublicKeyToken=null"
        );
    }

    #[test]
    fn test_invalid_manifest() {
        let reader = CatalogImageReader::new();

        let contents: [&[u8]; 4] = [b"", b"   ", b"\xFF\xFE", b"Baz, Flavor=Vanilla"];
        for content in contents {
            let source = ImageSource::memory("Baz", content.to_vec());
            let image = reader.open_image(&source).unwrap();
            assert!(reader.read_identity(&image).is_err());
        }
    }

    #[test]
    fn test_unregister() {
        let reader = CatalogImageReader::new()
            .with_assembly("/app/Foo.dll", "Foo")
            .unwrap();

        assert_eq!(reader.len(), 1);
        assert!(reader.unregister(Path::new("/app/Foo.dll")));
        assert!(reader.is_empty());
        assert!(reader
            .open_image(&ImageSource::from("/app/Foo.dll"))
            .unwrap_err()
            .is_not_found());
    }
}
