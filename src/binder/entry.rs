//! Bound assemblies.

use std::{fmt, sync::Arc};

use crate::{binder::ContextId, identity::AssemblyIdentity, image::ImageHandle};

/// One successfully bound assembly image.
///
/// Entries are handed out behind an [`Arc`]; every caller that binds the same assembly
/// in the same load context receives the same allocation, so `Arc::ptr_eq` is a valid
/// "same assembly" test. The entry keeps its image mapped for as long as any caller
/// holds it.
#[derive(Debug)]
pub struct AssemblyEntry {
    identity: AssemblyIdentity,
    location: String,
    is_platform: bool,
    image: Arc<ImageHandle>,
    context: ContextId,
}

impl AssemblyEntry {
    pub(crate) fn new(
        identity: AssemblyIdentity,
        location: String,
        is_platform: bool,
        image: Arc<ImageHandle>,
        context: ContextId,
    ) -> Self {
        AssemblyEntry {
            identity,
            location,
            is_platform,
            image,
            context,
        }
    }

    /// Definition identity read from the image.
    #[must_use]
    pub fn identity(&self) -> &AssemblyIdentity {
        &self.identity
    }

    /// File path or in-memory name the image was loaded from.
    #[must_use]
    pub fn location(&self) -> &str {
        &self.location
    }

    /// Returns `true` if the image came from the trusted platform assembly list.
    #[must_use]
    pub fn is_platform(&self) -> bool {
        self.is_platform
    }

    /// The backing image.
    #[must_use]
    pub fn image(&self) -> &Arc<ImageHandle> {
        &self.image
    }

    /// The load context whose resolved table first received this entry.
    #[must_use]
    pub fn context(&self) -> ContextId {
        self.context
    }
}

impl fmt::Display for AssemblyEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.identity, self.location)?;
        if self.is_platform {
            f.write_str(" [platform]")?;
        }
        Ok(())
    }
}
