use thiserror::Error;

use crate::binder::ContextId;

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, covering every failure the library can return outside of the
/// bind protocol itself.
///
/// Image reading, configuration and file access report through this type. Failures of a
/// bind request are described by [`BindError`], which converts into [`Error::Bind`] so
/// both can travel through a single `?` chain.
///
/// # Error Categories
///
/// ## Image Parsing Errors
/// - [`Error::Malformed`] - Corrupted or invalid image structure
/// - [`Error::OutOfBounds`] - Attempted to read beyond the image boundaries
/// - [`Error::NotSupported`] - Image kind that carries no assembly manifest
/// - [`Error::Empty`] - Empty input provided
///
/// ## I/O and External Errors
/// - [`Error::FileError`] - Filesystem I/O errors
/// - [`Error::GoblinErr`] - PE parsing errors from the goblin crate
/// - [`Error::XmlError`] - Application configuration file could not be parsed
///
/// ## Runtime Errors
/// - [`Error::Configuration`] - Invalid host property or builder input
/// - [`Error::LockError`] - Thread synchronization failure
/// - [`Error::Bind`] - A bind request failed
///
/// # Examples
///
/// ```rust,no_run
/// use clrbind::{Error, image::{ImageReader, ImageSource, PeImageReader}};
///
/// let reader = PeImageReader::new();
/// match reader.open_image(&ImageSource::from("app/Foo.dll")) {
///     Ok(image) => println!("mapped {} bytes", image.len()),
///     Err(Error::FileError(io)) => eprintln!("I/O error: {io}"),
///     Err(e) => eprintln!("Other error: {e}"),
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// The image is damaged and could not be parsed.
    ///
    /// Carries the source location where the problem was detected.
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// What went wrong
        message: String,
        /// Source file that raised the error
        file: &'static str,
        /// Source line that raised the error
        line: u32,
    },

    /// An out of bound access was attempted while parsing the image.
    #[error("Out of Bound read would have occurred!")]
    OutOfBounds,

    /// The image is a valid PE file but carries no assembly manifest.
    #[error("This image type is not supported")]
    NotSupported,

    /// Provided input was empty.
    #[error("Provided input was empty")]
    Empty,

    /// File I/O error.
    #[error("{0}")]
    FileError(#[from] std::io::Error),

    /// Error from the goblin PE parser.
    #[error("{0}")]
    GoblinErr(#[from] goblin::error::Error),

    /// Invalid host property, builder input or context configuration.
    #[error("Invalid configuration - {0}")]
    Configuration(String),

    /// The application configuration XML could not be parsed.
    #[error("Invalid application configuration - {0}")]
    XmlError(String),

    /// Failed to lock target.
    #[error("Failed to lock target")]
    LockError,

    /// A bind request failed.
    #[error(transparent)]
    Bind(#[from] BindError),
}

impl Error {
    /// Returns `true` if this error means "there is no file at this location".
    ///
    /// Probing treats a missing candidate as an empty slot and moves on, every other
    /// failure while opening a candidate is reported.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::FileError(io) if io.kind() == std::io::ErrorKind::NotFound)
    }
}

impl From<quick_xml::Error> for Error {
    fn from(error: quick_xml::Error) -> Self {
        Error::XmlError(error.to_string())
    }
}

impl From<quick_xml::events::attributes::AttrError> for Error {
    fn from(error: quick_xml::events::attributes::AttrError) -> Self {
        Error::XmlError(error.to_string())
    }
}

/// Fieldless discriminant of a [`BindError`].
///
/// Used wherever only the category matters: failure cache statistics, the binding log
/// and the "most specific error" selection of the bind protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumIter)]
pub enum BindErrorKind {
    /// The reference text could not be parsed
    MalformedIdentity,
    /// No candidate at any search location
    NotFound,
    /// A candidate was found but rejected by the identity comparison
    IdentityMismatch,
    /// A candidate was found but is not a readable assembly image
    BadImageFormat,
    /// The host resolver failed or returned an unusable image
    HostCallbackFailed,
    /// The parent chain of a load context loops back onto itself
    CircularDelegation,
    /// A load context id that is not (or no longer) registered
    UnknownContext,
}

impl BindErrorKind {
    /// Rank used when several sources failed for one request; higher wins.
    ///
    /// Kinds that end a request immediately rank above everything else so that they are
    /// never replaced by a later, more generic failure.
    #[must_use]
    pub fn specificity(self) -> u8 {
        match self {
            BindErrorKind::NotFound => 0,
            BindErrorKind::HostCallbackFailed => 1,
            BindErrorKind::BadImageFormat => 2,
            BindErrorKind::IdentityMismatch => 3,
            BindErrorKind::MalformedIdentity
            | BindErrorKind::CircularDelegation
            | BindErrorKind::UnknownContext => 4,
        }
    }

    /// Returns `true` for kinds that stop the bind protocol on the spot.
    #[must_use]
    pub fn is_fatal(self) -> bool {
        matches!(
            self,
            BindErrorKind::MalformedIdentity
                | BindErrorKind::CircularDelegation
                | BindErrorKind::UnknownContext
        )
    }
}

/// Typed failure of a bind request.
///
/// Every terminal failure of the binder carries one of these. The type is `Clone` because
/// the same failure is stored in the failure cache and handed out to every later request
/// for the same key.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BindError {
    /// The reference could not be parsed into an assembly identity.
    #[error("Malformed assembly reference '{input}' - {reason}")]
    MalformedIdentity {
        /// The offending reference text
        input: String,
        /// Why parsing failed
        reason: String,
    },

    /// No candidate image was found at any search location.
    #[error("Could not locate assembly '{identity}'")]
    NotFound {
        /// Display name of the request
        identity: String,
    },

    /// A candidate image exists but its identity does not satisfy the request.
    #[error("Assembly '{found}' at '{location}' does not satisfy the reference '{requested}'")]
    IdentityMismatch {
        /// Display name of the request
        requested: String,
        /// Display name read from the candidate
        found: String,
        /// Where the candidate was found
        location: String,
    },

    /// A candidate exists but could not be read as an assembly image.
    #[error("Could not read assembly image at '{location}' - {reason}")]
    BadImageFormat {
        /// Where the candidate was found
        location: String,
        /// Reader error text
        reason: String,
    },

    /// The host resolver failed, panicked or returned an unusable image.
    #[error("Host resolver failed for '{identity}' - {reason}")]
    HostCallbackFailed {
        /// Display name of the request
        identity: String,
        /// Failure description
        reason: String,
    },

    /// The parent chain loops back to a context that was already visited.
    #[error("Circular parent delegation detected at load context {context}")]
    CircularDelegation {
        /// The context that was reached twice
        context: ContextId,
    },

    /// The request named a load context that does not exist.
    #[error("Unknown load context {context}")]
    UnknownContext {
        /// The unknown context id
        context: ContextId,
    },
}

impl BindError {
    /// Returns the fieldless kind of this error.
    #[must_use]
    pub fn kind(&self) -> BindErrorKind {
        match self {
            BindError::MalformedIdentity { .. } => BindErrorKind::MalformedIdentity,
            BindError::NotFound { .. } => BindErrorKind::NotFound,
            BindError::IdentityMismatch { .. } => BindErrorKind::IdentityMismatch,
            BindError::BadImageFormat { .. } => BindErrorKind::BadImageFormat,
            BindError::HostCallbackFailed { .. } => BindErrorKind::HostCallbackFailed,
            BindError::CircularDelegation { .. } => BindErrorKind::CircularDelegation,
            BindError::UnknownContext { .. } => BindErrorKind::UnknownContext,
        }
    }

    /// Keeps the more specific of two failures.
    ///
    /// On equal specificity the current (earlier) failure is kept, so that the first
    /// root cause observed for a request is the one reported.
    #[must_use]
    pub fn most_specific(self, other: BindError) -> BindError {
        if other.kind().specificity() > self.kind().specificity() {
            other
        } else {
            self
        }
    }
}

/// Result type of the bind protocol and of identity parsing.
pub type BindResult<T> = std::result::Result<T, BindError>;

/// Merges an optional collected failure with a new one, see [`BindError::most_specific`].
pub(crate) fn merge_failure(current: Option<BindError>, next: BindError) -> Option<BindError> {
    Some(match current {
        Some(current) => current.most_specific(next),
        None => next,
    })
}
