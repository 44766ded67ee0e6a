//! Assembly probing.
//!
//! [`AssemblyProbe`] turns a requested identity and an ordered list of directories into
//! a validated candidate image. For every directory it tries `<name>.dll` and then,
//! unless disabled, `<name>.exe`; every candidate that exists is opened through the
//! [`ImageReader`] just far enough to read its identity, which is then compared against
//! the request with [`AssemblyIdentity::satisfies`].
//!
//! The first directory holding any candidate decides: a match there wins regardless of
//! the versions found in later directories, and a rejection there ends the probe. Within
//! one directory a culture-neutral candidate is preferred, followed by the configured
//! culture fallback order.
//!
//! Failures are reported by how far a candidate got: a missing file is not an error, an
//! unreadable image is [`BindError::BadImageFormat`] and a readable image with the wrong
//! identity is [`BindError::IdentityMismatch`]. The most specific failure of the deciding
//! directory is returned, or [`BindError::NotFound`] if no candidate existed at all.
//!
//! # Platform assemblies
//!
//! [`AssemblyProbe::probe_platform`] puts a trusted platform assembly in front of the
//! application directories. A platform image that fails the comparison does not end the
//! search, but it does prevent an application copy of the same assembly (same name,
//! culture and token) from being used in its place.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use log::{debug, trace, warn};

use crate::{
    binder::BinderStats,
    error::merge_failure,
    identity::AssemblyIdentity,
    image::{ImageHandle, ImageReader, ImageSource},
    BindError, BindResult,
};

/// A candidate image that passed probing.
#[derive(Debug, Clone)]
pub struct ProbeHit {
    /// Definition identity read from the image
    pub identity: AssemblyIdentity,
    /// Where the image was found
    pub location: String,
    /// The opened image
    pub image: Arc<ImageHandle>,
    /// `true` if the image is a trusted platform assembly
    pub is_platform: bool,
}

enum Examined {
    Missing,
    Unreadable(BindError),
    Found(ProbeHit),
}

/// Filesystem probe over an [`ImageReader`].
///
/// # Examples
///
/// ```rust
/// use std::path::PathBuf;
/// use clrbind::{binder::AssemblyProbe, identity::AssemblyIdentity, image::CatalogImageReader};
///
/// let reader = CatalogImageReader::new().with_assembly("/app/Foo.dll", "Foo, Version=1.2.0.0")?;
/// let probe = AssemblyProbe::new(&reader);
///
/// let request = AssemblyIdentity::parse("Foo, Version=1.0.0.0")?;
/// let hit = probe.probe(&request, &[PathBuf::from("/app")])?;
/// assert_eq!(hit.location, "/app/Foo.dll");
/// # Ok::<(), clrbind::Error>(())
/// ```
pub struct AssemblyProbe<'a> {
    reader: &'a dyn ImageReader,
    probe_executables: bool,
    culture_fallback: &'a [String],
    stats: Option<&'a BinderStats>,
}

impl<'a> AssemblyProbe<'a> {
    /// Creates a probe that tries `.dll` and `.exe` candidates.
    pub fn new(reader: &'a dyn ImageReader) -> Self {
        AssemblyProbe {
            reader,
            probe_executables: true,
            culture_fallback: &[],
            stats: None,
        }
    }

    /// Enables or disables `.exe` candidates.
    #[must_use]
    pub fn with_executables(mut self, probe_executables: bool) -> Self {
        self.probe_executables = probe_executables;
        self
    }

    /// Sets the preference order among non-neutral cultures.
    #[must_use]
    pub fn with_culture_fallback(mut self, cultures: &'a [String]) -> Self {
        self.culture_fallback = cultures;
        self
    }

    /// Counts image opens into `stats`.
    #[must_use]
    pub fn with_stats(mut self, stats: &'a BinderStats) -> Self {
        self.stats = Some(stats);
        self
    }

    /// Probes `directories` in order for an image satisfying `request`.
    ///
    /// The first directory holding a candidate decides the outcome: later directories
    /// are not consulted once a candidate was rejected.
    ///
    /// # Errors
    ///
    /// Returns [`BindError::NotFound`] if no candidate exists, otherwise the most
    /// specific rejection of the first directory with candidates
    /// ([`BindError::IdentityMismatch`] over [`BindError::BadImageFormat`]).
    pub fn probe(&self, request: &AssemblyIdentity, directories: &[PathBuf]) -> BindResult<ProbeHit> {
        for directory in directories {
            let mut matches = Vec::new();
            let mut failure = None;

            for candidate in self.candidates(directory, request.name()) {
                match self.examine(ImageSource::Path(candidate)) {
                    Examined::Missing => {}
                    Examined::Unreadable(error) => failure = merge_failure(failure, error),
                    Examined::Found(hit) => match validate(request, hit) {
                        Ok(hit) if hit.identity.is_culture_neutral() => return Ok(hit),
                        Ok(hit) => matches.push(hit),
                        Err(error) => failure = merge_failure(failure, error),
                    },
                }
            }

            if let Some(hit) = self.preferred(matches) {
                return Ok(hit);
            }
            if let Some(error) = failure {
                debug!("Probing for {request} ends in {}", directory.display());
                return Err(error);
            }
        }

        Err(not_found(request))
    }

    /// Probes `<directory>/<culture>/<name>.dll` for a culture-specific request.
    ///
    /// # Errors
    ///
    /// As [`AssemblyProbe::probe`].
    pub fn probe_satellite(
        &self,
        request: &AssemblyIdentity,
        directories: &[PathBuf],
    ) -> BindResult<ProbeHit> {
        let Some(culture) = request.culture() else {
            return self.probe(request, directories);
        };

        for directory in directories {
            let candidate = directory
                .join(culture)
                .join(format!("{}.dll", request.name()));

            match self.examine(ImageSource::Path(candidate)) {
                Examined::Missing => {}
                Examined::Unreadable(error) => return Err(error),
                Examined::Found(hit) => return validate(request, hit),
            }
        }

        Err(not_found(request))
    }

    /// Probes the trusted platform image first, then the application directories.
    ///
    /// # Arguments
    ///
    /// * `request` - The identity to resolve
    /// * `platform` - The trusted platform file registered under the request's name
    /// * `directories` - Application directories
    ///
    /// # Errors
    ///
    /// Returns [`BindError::BadImageFormat`] at once for an unreadable platform image.
    /// An application copy that belongs to the same assembly as a rejected platform
    /// image fails with the platform image's [`BindError::IdentityMismatch`]. Otherwise
    /// as [`AssemblyProbe::probe`].
    pub fn probe_platform(
        &self,
        request: &AssemblyIdentity,
        platform: Option<&Path>,
        directories: &[PathBuf],
    ) -> BindResult<ProbeHit> {
        let mut partial: Option<(ProbeHit, BindError)> = None;

        if let Some(path) = platform {
            match self.examine(ImageSource::from(path)) {
                Examined::Missing => trace!("Platform image {} is missing", path.display()),
                Examined::Unreadable(error) => return Err(error),
                Examined::Found(mut hit) => {
                    if hit.identity.satisfies(request) {
                        hit.is_platform = true;
                        return Ok(hit);
                    }
                    debug!(
                        "Platform image {} ({}) does not satisfy {}",
                        hit.location, hit.identity, request
                    );
                    let error = mismatch(request, &hit);
                    partial = Some((hit, error));
                }
            }
        }

        match (self.probe(request, directories), partial) {
            (Ok(hit), Some((platform, error))) if platform.identity.same_family(&hit.identity) => {
                debug!(
                    "Application copy {} unified with platform image {}",
                    hit.location, platform.location
                );
                Err(error)
            }
            (Ok(hit), _) => Ok(hit),
            (Err(error), Some((_, platform_error))) => Err(platform_error.most_specific(error)),
            (Err(error), None) => Err(error),
        }
    }

    /// Opens `source` and reads its identity without comparing it to anything.
    ///
    /// # Errors
    ///
    /// Returns [`BindError::NotFound`] for a missing file and
    /// [`BindError::BadImageFormat`] for an unreadable one.
    pub fn load(&self, source: &ImageSource) -> BindResult<ProbeHit> {
        match self.examine(source.clone()) {
            Examined::Missing => Err(BindError::NotFound {
                identity: source.location(),
            }),
            Examined::Unreadable(error) => Err(error),
            Examined::Found(hit) => Ok(hit),
        }
    }

    /// Opens `source` and validates it against `request`.
    ///
    /// # Errors
    ///
    /// As [`AssemblyProbe::load`], plus [`BindError::IdentityMismatch`].
    pub fn validate(&self, request: &AssemblyIdentity, source: &ImageSource) -> BindResult<ProbeHit> {
        validate(request, self.load(source)?)
    }

    fn candidates(&self, directory: &Path, name: &str) -> Vec<PathBuf> {
        let mut candidates = vec![directory.join(format!("{name}.dll"))];
        if self.probe_executables {
            candidates.push(directory.join(format!("{name}.exe")));
        }
        candidates
    }

    fn examine(&self, source: ImageSource) -> Examined {
        let location = source.location();
        trace!("Probing {location}");

        if let Some(stats) = self.stats {
            stats.count_image_open();
        }

        let image = match self.reader.open_image(&source) {
            Ok(image) => image,
            Err(error) if error.is_not_found() => return Examined::Missing,
            Err(error) => {
                warn!("Cannot open {location} - {error}");
                return Examined::Unreadable(BindError::BadImageFormat {
                    location,
                    reason: error.to_string(),
                });
            }
        };

        match self.reader.read_identity(&image) {
            Ok(identity) => Examined::Found(ProbeHit {
                identity,
                location,
                image: Arc::new(image),
                is_platform: false,
            }),
            Err(error) => {
                warn!("Rejected {location} - {error}");
                Examined::Unreadable(BindError::BadImageFormat {
                    location,
                    reason: error.to_string(),
                })
            }
        }
    }

    fn preferred(&self, matches: Vec<ProbeHit>) -> Option<ProbeHit> {
        matches.into_iter().min_by_key(|hit| {
            hit.identity.culture().map_or(0, |culture| {
                self.culture_fallback
                    .iter()
                    .position(|preferred| preferred.eq_ignore_ascii_case(culture))
                    .map_or(usize::MAX, |index| index + 1)
            })
        })
    }
}

fn validate(request: &AssemblyIdentity, hit: ProbeHit) -> BindResult<ProbeHit> {
    if hit.identity.satisfies(request) {
        trace!("{} satisfies {}", hit.location, request);
        Ok(hit)
    } else {
        warn!(
            "Rejected {} - found {}, requested {}",
            hit.location, hit.identity, request
        );
        Err(mismatch(request, &hit))
    }
}

fn mismatch(request: &AssemblyIdentity, hit: &ProbeHit) -> BindError {
    BindError::IdentityMismatch {
        requested: request.display_name(),
        found: hit.identity.display_name(),
        location: hit.location.clone(),
    }
}

pub(crate) fn not_found(request: &AssemblyIdentity) -> BindError {
    BindError::NotFound {
        identity: request.display_name(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{image::CatalogImageReader, BindErrorKind};

    fn request(display_name: &str) -> AssemblyIdentity {
        AssemblyIdentity::parse(display_name).unwrap()
    }

    fn dirs(paths: &[&str]) -> Vec<PathBuf> {
        paths.iter().map(PathBuf::from).collect()
    }

    #[test]
    fn test_newer_version_satisfies() {
        let reader = CatalogImageReader::new()
            .with_assembly("/app/Foo.dll", "Foo, Version=1.2.0.0, Culture=neutral, PublicKeyToken=null")
            .unwrap();
        let probe = AssemblyProbe::new(&reader);

        let hit = probe
            .probe(
                &request("Foo, Version=1.0.0.0, Culture=neutral, PublicKeyToken=null"),
                &dirs(&["/app"]),
            )
            .unwrap();
        assert_eq!(hit.location, "/app/Foo.dll");
        assert!(!hit.is_platform);
    }

    #[test]
    fn test_older_version_is_mismatch() {
        let reader = CatalogImageReader::new()
            .with_assembly("/app/Foo.dll", "Foo, Version=0.9.0.0")
            .unwrap();
        let probe = AssemblyProbe::new(&reader);

        let error = probe
            .probe(&request("Foo, Version=1.0.0.0"), &dirs(&["/app"]))
            .unwrap_err();
        assert_eq!(error.kind(), BindErrorKind::IdentityMismatch);
    }

    #[test]
    fn test_no_directories_is_not_found() {
        let reader = CatalogImageReader::new();
        let error = AssemblyProbe::new(&reader)
            .probe(&request("Bar"), &[])
            .unwrap_err();

        assert_eq!(error.kind(), BindErrorKind::NotFound);
        assert_eq!(reader.open_count(), 0);
    }

    #[test]
    fn test_first_directory_wins() {
        let reader = CatalogImageReader::new()
            .with_assembly("/first/Foo.dll", "Foo, Version=1.0.0.0")
            .unwrap()
            .with_assembly("/second/Foo.dll", "Foo, Version=9.0.0.0")
            .unwrap();

        let hit = AssemblyProbe::new(&reader)
            .probe(&request("Foo"), &dirs(&["/first", "/second"]))
            .unwrap();
        assert_eq!(hit.location, "/first/Foo.dll");
    }

    #[test]
    fn test_mismatch_ends_probing() {
        let reader = CatalogImageReader::new()
            .with_assembly("/first/Foo.dll", "Foo, Version=0.5.0.0")
            .unwrap()
            .with_assembly("/second/Foo.dll", "Foo, Version=2.0.0.0")
            .unwrap();

        let error = AssemblyProbe::new(&reader)
            .probe(&request("Foo, Version=1.0"), &dirs(&["/first", "/second"]))
            .unwrap_err();
        match error {
            BindError::IdentityMismatch { location, .. } => {
                assert_eq!(location, "/first/Foo.dll");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_match_in_same_directory_beats_mismatch() {
        let reader = CatalogImageReader::new()
            .with_assembly("/first/Foo.dll", "Foo, Version=0.5.0.0")
            .unwrap()
            .with_assembly("/first/Foo.exe", "Foo, Version=1.5.0.0")
            .unwrap()
            .with_assembly("/second/Foo.dll", "Foo, Version=2.0.0.0")
            .unwrap();

        let hit = AssemblyProbe::new(&reader)
            .probe(&request("Foo, Version=1.0"), &dirs(&["/first", "/second"]))
            .unwrap();
        assert_eq!(hit.location, "/first/Foo.exe");
    }

    #[test]
    fn test_satellite_mismatch_ends_probing() {
        let reader = CatalogImageReader::new()
            .with_assembly("/app/de/Foo.resources.dll", "Foo.resources, Version=0.1.0.0, Culture=de")
            .unwrap()
            .with_assembly("/res/de/Foo.resources.dll", "Foo.resources, Version=1.0.0.0, Culture=de")
            .unwrap();

        let error = AssemblyProbe::new(&reader)
            .probe_satellite(
                &request("Foo.resources, Version=1.0.0.0, Culture=de"),
                &dirs(&["/app", "/res"]),
            )
            .unwrap_err();
        assert_eq!(error.kind(), BindErrorKind::IdentityMismatch);
    }

    #[test]
    fn test_executables() {
        let reader = CatalogImageReader::new()
            .with_assembly("/app/Tool.exe", "Tool, Version=1.0.0.0")
            .unwrap();

        let hit = AssemblyProbe::new(&reader)
            .probe(&request("Tool"), &dirs(&["/app"]))
            .unwrap();
        assert_eq!(hit.location, "/app/Tool.exe");

        let error = AssemblyProbe::new(&reader)
            .with_executables(false)
            .probe(&request("Tool"), &dirs(&["/app"]))
            .unwrap_err();
        assert_eq!(error.kind(), BindErrorKind::NotFound);
    }

    #[test]
    fn test_neutral_culture_preferred() {
        let reader = CatalogImageReader::new()
            .with_assembly("/app/Foo.dll", "Foo, Version=1.0.0.0, Culture=de")
            .unwrap()
            .with_assembly("/app/Foo.exe", "Foo, Version=1.0.0.0, Culture=neutral")
            .unwrap();

        let hit = AssemblyProbe::new(&reader)
            .probe(&request("Foo"), &dirs(&["/app"]))
            .unwrap();
        assert_eq!(hit.location, "/app/Foo.exe");
    }

    #[test]
    fn test_culture_fallback_order() {
        let reader = CatalogImageReader::new()
            .with_assembly("/app/Foo.dll", "Foo, Version=1.0.0.0, Culture=de")
            .unwrap()
            .with_assembly("/app/Foo.exe", "Foo, Version=1.0.0.0, Culture=fr")
            .unwrap();
        let fallback = vec!["fr".to_string(), "de".to_string()];

        let hit = AssemblyProbe::new(&reader)
            .with_culture_fallback(&fallback)
            .probe(&request("Foo"), &dirs(&["/app"]))
            .unwrap();
        assert_eq!(hit.location, "/app/Foo.exe");

        let hit = AssemblyProbe::new(&reader)
            .probe(&request("Foo"), &dirs(&["/app"]))
            .unwrap();
        assert_eq!(hit.location, "/app/Foo.dll");
    }

    #[test]
    fn test_satellite() {
        let reader = CatalogImageReader::new()
            .with_assembly("/res/de/Foo.resources.dll", "Foo.resources, Version=1.0.0.0, Culture=de")
            .unwrap();

        let hit = AssemblyProbe::new(&reader)
            .probe_satellite(
                &request("Foo.resources, Version=1.0.0.0, Culture=de"),
                &dirs(&["/app", "/res"]),
            )
            .unwrap();
        assert_eq!(hit.location, "/res/de/Foo.resources.dll");

        let error = AssemblyProbe::new(&reader)
            .probe_satellite(&request("Foo.resources, Culture=fr"), &dirs(&["/res"]))
            .unwrap_err();
        assert_eq!(error.kind(), BindErrorKind::NotFound);
    }

    #[test]
    fn test_platform_first() {
        let reader = CatalogImageReader::new()
            .with_assembly("/platform/System.Runtime.dll", "System.Runtime, Version=8.0.0.0")
            .unwrap()
            .with_assembly("/app/System.Runtime.dll", "System.Runtime, Version=8.0.0.0")
            .unwrap();

        let hit = AssemblyProbe::new(&reader)
            .probe_platform(
                &request("System.Runtime, Version=8.0"),
                Some(Path::new("/platform/System.Runtime.dll")),
                &dirs(&["/app"]),
            )
            .unwrap();
        assert!(hit.is_platform);
        assert_eq!(hit.location, "/platform/System.Runtime.dll");
        assert_eq!(reader.open_count(), 1);
    }

    #[test]
    fn test_missing_platform_falls_through() {
        let reader = CatalogImageReader::new()
            .with_assembly("/app/Foo.dll", "Foo, Version=1.0.0.0")
            .unwrap();

        let hit = AssemblyProbe::new(&reader)
            .probe_platform(
                &request("Foo"),
                Some(Path::new("/platform/Foo.dll")),
                &dirs(&["/app"]),
            )
            .unwrap();
        assert!(!hit.is_platform);
    }

    #[test]
    fn test_application_copy_unified_with_platform() {
        let reader = CatalogImageReader::new()
            .with_assembly("/platform/Foo.dll", "Foo, Version=1.0.0.0")
            .unwrap()
            .with_assembly("/app/Foo.dll", "Foo, Version=2.0.0.0")
            .unwrap();

        let error = AssemblyProbe::new(&reader)
            .probe_platform(
                &request("Foo, Version=2.0"),
                Some(Path::new("/platform/Foo.dll")),
                &dirs(&["/app"]),
            )
            .unwrap_err();

        match error {
            BindError::IdentityMismatch { location, .. } => {
                assert_eq!(location, "/platform/Foo.dll");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_application_copy_of_other_family_wins() {
        let reader = CatalogImageReader::new()
            .with_assembly("/platform/Foo.dll", "Foo, Version=1.0.0.0, PublicKeyToken=b77a5c561934e089")
            .unwrap()
            .with_assembly("/app/Foo.dll", "Foo, Version=2.0.0.0")
            .unwrap();

        let hit = AssemblyProbe::new(&reader)
            .probe_platform(
                &request("Foo, Version=2.0"),
                Some(Path::new("/platform/Foo.dll")),
                &dirs(&["/app"]),
            )
            .unwrap();
        assert_eq!(hit.location, "/app/Foo.dll");
    }

    #[test]
    fn test_unreadable_candidate() {
        let reader = CatalogImageReader::new();
        let source = ImageSource::memory("Broken", b"\xFF\xFE".to_vec());

        let error = AssemblyProbe::new(&reader).load(&source).unwrap_err();
        assert_eq!(error.kind(), BindErrorKind::BadImageFormat);

        let missing = AssemblyProbe::new(&reader)
            .load(&ImageSource::from("/nonexistent/Foo.dll"))
            .unwrap_err();
        assert_eq!(missing.kind(), BindErrorKind::NotFound);
    }

    #[test]
    fn test_validate_source() {
        let reader = CatalogImageReader::new();
        let source = ImageSource::memory("Foo", b"Foo, Version=3.0".to_vec());
        let probe = AssemblyProbe::new(&reader);

        assert!(probe.validate(&request("Foo, Version=2.0"), &source).is_ok());
        assert_eq!(
            probe
                .validate(&request("Foo, Version=4.0"), &source)
                .unwrap_err()
                .kind(),
            BindErrorKind::IdentityMismatch
        );
    }
}
