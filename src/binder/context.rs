//! Load contexts.
//!
//! A load context is one isolation domain: within it every assembly identity resolves
//! to at most one [`AssemblyEntry`]. Contexts live in an arena owned by the
//! [`crate::binder::ApplicationContext`] and refer to their fallback parent by
//! [`ContextId`], never by pointer, so unloading a child never touches its parent and
//! cycles are detected by walking ids.
//!
//! # Key Components
//!
//! - [`LoadContext`] - Resolved-assembly table plus delegation settings
//! - [`ContextId`] - Opaque arena index
//! - [`ContextFlags`] - Isolation, collectibility and caching switches
//! - [`ContextOptions`] - Creation record
//! - [`HostResolver`] - Host-supplied resolution capability
//!
//! # Thread Safety
//!
//! The resolved table is a [`DashMap`]; [`LoadContext::insert`] is first-committer-wins,
//! so racing binds of the same assembly all observe the same entry.

use std::{
    fmt,
    path::PathBuf,
    sync::{Arc, RwLock},
};

use bitflags::bitflags;
use dashmap::DashMap;

use crate::{
    binder::AssemblyEntry,
    identity::AssemblyIdentity,
    image::ImageSource,
    Result,
};

/// Opaque identifier of a load context.
///
/// Ids are never reused within one application context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContextId(u64);

impl ContextId {
    /// Id of the default load context.
    pub const DEFAULT: ContextId = ContextId(0);

    /// Wraps a raw id.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        ContextId(value)
    }

    /// The raw id.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

bitflags! {
    /// Behavior switches of a load context.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ContextFlags: u8 {
        /// Never delegate to the parent context
        const ISOLATED = 0x01;
        /// The context may be unloaded
        const COLLECTIBLE = 0x02;
        /// Entries resolved through a parent are also inserted into this context
        const CACHE_FALLBACK_LOCALLY = 0x04;
        /// Skip platform and application path probing; only own paths and the host
        /// resolver are consulted
        const DISABLE_APP_PATHS = 0x08;
    }
}

/// Host-supplied resolution capability.
///
/// Consulted after probing failed in the owning context, at most once per request and
/// context. Returning `Ok(None)` declines; the returned source is validated against the
/// request exactly like a probed candidate.
pub trait HostResolver: Send + Sync {
    /// Resolves `request` on behalf of load context `context`.
    ///
    /// # Errors
    ///
    /// Any error is reported to the caller as a failed host callback.
    fn resolve(&self, request: &AssemblyIdentity, context: ContextId) -> Result<Option<ImageSource>>;
}

impl<F> HostResolver for F
where
    F: Fn(&AssemblyIdentity, ContextId) -> Result<Option<ImageSource>> + Send + Sync,
{
    fn resolve(&self, request: &AssemblyIdentity, context: ContextId) -> Result<Option<ImageSource>> {
        (self)(request, context)
    }
}

/// Creation record of a load context.
///
/// ```rust
/// use clrbind::binder::{ContextFlags, ContextOptions};
///
/// let options = ContextOptions::new("plugins")
///     .with_flags(ContextFlags::COLLECTIBLE)
///     .with_probing_path("/app/plugins");
/// assert_eq!(options.name, "plugins");
/// ```
#[derive(Clone, Default)]
pub struct ContextOptions {
    /// Diagnostic name
    pub name: String,
    /// Fallback context; the default context when `None`
    pub parent: Option<ContextId>,
    /// Behavior switches
    pub flags: ContextFlags,
    /// Own probing directories; empty means the application paths
    pub probing_paths: Vec<PathBuf>,
    /// Host resolution capability
    pub resolver: Option<Arc<dyn HostResolver>>,
}

impl ContextOptions {
    /// Creates options for a non-isolated, non-collectible context.
    pub fn new(name: impl Into<String>) -> Self {
        ContextOptions {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Sets the fallback context.
    #[must_use]
    pub fn with_parent(mut self, parent: ContextId) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Sets the behavior switches.
    #[must_use]
    pub fn with_flags(mut self, flags: ContextFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Adds an own probing directory.
    #[must_use]
    pub fn with_probing_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.probing_paths.push(path.into());
        self
    }

    /// Sets the host resolver.
    #[must_use]
    pub fn with_resolver(mut self, resolver: Arc<dyn HostResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }
}

impl fmt::Debug for ContextOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextOptions")
            .field("name", &self.name)
            .field("parent", &self.parent)
            .field("flags", &self.flags)
            .field("probing_paths", &self.probing_paths)
            .field("resolver", &self.resolver.is_some())
            .finish()
    }
}

/// One isolation domain.
pub struct LoadContext {
    id: ContextId,
    name: String,
    parent: RwLock<Option<ContextId>>,
    flags: ContextFlags,
    probing_paths: Vec<PathBuf>,
    resolver: Option<Arc<dyn HostResolver>>,
    resolved: DashMap<AssemblyIdentity, Arc<AssemblyEntry>>,
}

impl LoadContext {
    pub(crate) fn new(id: ContextId, options: ContextOptions) -> Self {
        LoadContext {
            id,
            name: options.name,
            parent: RwLock::new(options.parent),
            flags: options.flags,
            probing_paths: options.probing_paths,
            resolver: options.resolver,
            resolved: DashMap::new(),
        }
    }

    /// Id of this context.
    #[must_use]
    pub fn id(&self) -> ContextId {
        self.id
    }

    /// Diagnostic name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Behavior switches.
    #[must_use]
    pub fn flags(&self) -> ContextFlags {
        self.flags
    }

    /// Returns `true` if this context never delegates to a parent.
    #[must_use]
    pub fn is_isolated(&self) -> bool {
        self.flags.contains(ContextFlags::ISOLATED)
    }

    /// Returns `true` if this context may be unloaded.
    #[must_use]
    pub fn is_collectible(&self) -> bool {
        self.flags.contains(ContextFlags::COLLECTIBLE)
    }

    /// Fallback context, if any.
    #[must_use]
    pub fn parent(&self) -> Option<ContextId> {
        *read_lock!(self.parent)
    }

    /// Re-points fallback delegation.
    ///
    /// Cycles are not rejected here; a request that runs into one fails with
    /// [`crate::BindError::CircularDelegation`].
    pub fn set_parent(&self, parent: Option<ContextId>) {
        *write_lock!(self.parent) = parent;
    }

    /// Own probing directories.
    #[must_use]
    pub fn probing_paths(&self) -> &[PathBuf] {
        &self.probing_paths
    }

    /// Host resolver, if any.
    #[must_use]
    pub fn resolver(&self) -> Option<&Arc<dyn HostResolver>> {
        self.resolver.as_ref()
    }

    /// Returns `true` if probing in this context uses the application-wide paths and
    /// the trusted platform assemblies.
    #[must_use]
    pub fn uses_application_paths(&self) -> bool {
        self.probing_paths.is_empty() && !self.flags.contains(ContextFlags::DISABLE_APP_PATHS)
    }

    /// Directories probed in this context.
    ///
    /// # Arguments
    ///
    /// * `application` - The application-wide probing paths
    #[must_use]
    pub fn search_paths<'a>(&'a self, application: &'a [PathBuf]) -> &'a [PathBuf] {
        if self.uses_application_paths() {
            application
        } else {
            &self.probing_paths
        }
    }

    /// Table lookup only, no probing.
    ///
    /// An exact key match wins. Otherwise every bound entry is tested with
    /// [`AssemblyIdentity::satisfies`]; among several matches the highest version is
    /// returned, ties broken by display name so the answer does not depend on map order.
    #[must_use]
    pub fn bind_local(&self, request: &AssemblyIdentity) -> Option<Arc<AssemblyEntry>> {
        if let Some(entry) = self.resolved.get(request) {
            return Some(entry.value().clone());
        }

        self.resolved
            .iter()
            .filter(|entry| entry.key().satisfies(request))
            .map(|entry| entry.value().clone())
            .max_by(|left, right| {
                left.identity()
                    .version()
                    .cmp(&right.identity().version())
                    .then_with(|| {
                        right
                            .identity()
                            .display_name()
                            .cmp(&left.identity().display_name())
                    })
            })
    }

    /// Inserts `entry` under its definition identity.
    ///
    /// If an entry is already bound under that identity it is returned and `entry` is
    /// dropped, releasing its image.
    pub fn insert(&self, entry: Arc<AssemblyEntry>) -> Arc<AssemblyEntry> {
        self.resolved
            .entry(entry.identity().clone())
            .or_insert(entry)
            .value()
            .clone()
    }

    /// Returns the entry bound under exactly `identity`.
    #[must_use]
    pub fn get(&self, identity: &AssemblyIdentity) -> Option<Arc<AssemblyEntry>> {
        self.resolved.get(identity).map(|entry| entry.value().clone())
    }

    /// Snapshot of all bound entries, ordered by display name.
    #[must_use]
    pub fn entries(&self) -> Vec<Arc<AssemblyEntry>> {
        let mut entries: Vec<_> = self
            .resolved
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        entries.sort_by_cached_key(|entry| entry.identity().display_name());
        entries
    }

    /// Number of bound entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.resolved.len()
    }

    /// Returns `true` if nothing is bound.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resolved.is_empty()
    }

    pub(crate) fn clear(&self) {
        self.resolved.clear();
    }
}

impl fmt::Debug for LoadContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadContext")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("parent", &self.parent())
            .field("flags", &self.flags)
            .field("probing_paths", &self.probing_paths)
            .field("resolver", &self.resolver.is_some())
            .field("resolved", &self.resolved.len())
            .finish()
    }
}
