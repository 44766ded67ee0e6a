//! Application context and its builder.
//!
//! The [`ApplicationContext`] is the root object of the binder. It is constructed once,
//! shared behind an [`Arc`] and owns everything that outlives a single bind request:
//!
//! - the binder properties and the trusted platform assembly index built from them
//! - the arena of load contexts, starting with the default context
//! - the failure cache
//! - the binding log sink, redirect policy and image reader
//! - the binder statistics
//!
//! Configuration happens through [`ApplicationContextBuilder`]; after
//! [`ApplicationContextBuilder::build`] only application paths can still be appended.
//!
//! # Examples
//!
//! ```rust,no_run
//! use clrbind::binder::{ApplicationContext, PropertyName, PropertyValue};
//!
//! let app = ApplicationContext::builder()
//!     .with_app_path("/srv/app")
//!     .with_trusted_platform_assembly("/usr/share/dotnet/System.Runtime.dll")
//!     .with_property(PropertyName::ProbeExecutables, PropertyValue::Flag(false))?
//!     .build()?;
//!
//! let plugins = app.create_load_context(None, false)?;
//! assert_eq!(plugins.parent(), Some(app.default_context().id()));
//! # Ok::<(), clrbind::Error>(())
//! ```

use std::{
    collections::HashMap,
    fmt,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, RwLock,
    },
};

use crossbeam_skiplist::SkipMap;
use log::{debug, warn};

use crate::{
    binder::{
        BinderStats, BindingLog, BindingLogSink, BindingPolicy, ContextFlags, ContextId,
        ContextOptions, FailureCache, FailureSubject, HostResolver, LoadContext, PropertyMap,
        PropertyName, PropertyValue,
    },
    image::{ImageReader, PeImageReader},
    BindError, BindResult,
    Error::Configuration,
    Result,
};

/// Process-wide root of the binder.
pub struct ApplicationContext {
    properties: RwLock<PropertyMap>,
    contexts: SkipMap<ContextId, Arc<LoadContext>>,
    default_context: Arc<LoadContext>,
    next_id: AtomicU64,
    failures: FailureCache,
    log_sink: Arc<dyn BindingLogSink>,
    memory_log: Option<Arc<BindingLog>>,
    platform: HashMap<String, PathBuf>,
    policy: BindingPolicy,
    reader: Arc<dyn ImageReader>,
    stats: BinderStats,
}

impl ApplicationContext {
    /// Starts configuring a new application context.
    #[must_use]
    pub fn builder() -> ApplicationContextBuilder {
        ApplicationContextBuilder::new()
    }

    /// The default load context.
    #[must_use]
    pub fn default_context(&self) -> &Arc<LoadContext> {
        &self.default_context
    }

    /// Creates a custom load context.
    ///
    /// # Arguments
    ///
    /// * `parent` - Fallback context, the default context when `None`
    /// * `isolated` - Never delegate to the parent
    ///
    /// # Errors
    ///
    /// Returns [`BindError::UnknownContext`] if `parent` does not exist.
    pub fn create_load_context(
        &self,
        parent: Option<ContextId>,
        isolated: bool,
    ) -> Result<Arc<LoadContext>> {
        let mut options = ContextOptions::new(String::new());
        options.parent = parent;
        if isolated {
            options.flags |= ContextFlags::ISOLATED;
        }
        self.create_context(options)
    }

    /// Creates a custom load context from a full creation record.
    ///
    /// Unnamed contexts are named after their id.
    ///
    /// # Errors
    ///
    /// Returns [`BindError::UnknownContext`] if the requested parent does not exist.
    pub fn create_context(&self, mut options: ContextOptions) -> Result<Arc<LoadContext>> {
        let parent = options.parent.unwrap_or(ContextId::DEFAULT);
        if !self.contexts.contains_key(&parent) {
            return Err(BindError::UnknownContext { context: parent }.into());
        }

        let id = ContextId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        options.parent = Some(parent);
        if options.name.is_empty() {
            options.name = format!("Context{}", id.value());
        }

        let context = Arc::new(LoadContext::new(id, options));
        self.contexts.insert(id, context.clone());
        debug!(
            "Created load context {} '{}' (parent {}, flags {:?})",
            id,
            context.name(),
            parent,
            context.flags()
        );

        Ok(context)
    }

    /// Looks up a load context.
    #[must_use]
    pub fn context(&self, id: ContextId) -> Option<Arc<LoadContext>> {
        self.contexts.get(&id).map(|entry| entry.value().clone())
    }

    pub(crate) fn require_context(&self, id: ContextId) -> BindResult<Arc<LoadContext>> {
        self.context(id)
            .ok_or(BindError::UnknownContext { context: id })
    }

    /// All live load contexts in id order.
    #[must_use]
    pub fn contexts(&self) -> Vec<Arc<LoadContext>> {
        self.contexts
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Unloads a collectible context.
    ///
    /// The context leaves the arena, its entries are released once no caller holds
    /// them any more, and only its own failure-cache entries are purged. Contexts that
    /// still delegate to it fail with [`BindError::UnknownContext`] when they reach it.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Configuration`] for the default or a non-collectible
    /// context, and [`BindError::UnknownContext`] for an unknown id.
    pub fn unload(&self, id: ContextId) -> Result<()> {
        if id == ContextId::DEFAULT {
            return Err(Configuration(
                "The default load context cannot be unloaded".to_string(),
            ));
        }

        let context = self.require_context(id)?;
        if !context.is_collectible() {
            return Err(Configuration(format!(
                "Load context {id} '{}' is not collectible",
                context.name()
            )));
        }

        self.contexts.remove(&id);
        let released = context.len();
        context.clear();
        let purged = self.failures.purge_context(id);
        debug!(
            "Unloaded load context {id}: released {released} entries, purged {purged} failures"
        );

        Ok(())
    }

    /// Caches `error` for `(subject, context)` while `context` is live.
    ///
    /// A bind that was still running when its context was unloaded may finish after the
    /// purge. The recheck after recording drops such an entry, so no failure outlives its
    /// context.
    pub(crate) fn record_failure(
        &self,
        subject: impl Into<FailureSubject>,
        context: ContextId,
        error: BindError,
    ) -> bool {
        let subject = subject.into();
        if !self.contexts.contains_key(&context) {
            return false;
        }
        let recorded = self.failures.record(subject.clone(), context, error);
        if recorded && !self.contexts.contains_key(&context) {
            self.failures.evict(subject, context);
            return false;
        }
        recorded
    }

    /// Snapshot of the binder properties.
    #[must_use]
    pub fn properties(&self) -> PropertyMap {
        read_lock!(self.properties).clone()
    }

    /// Appends an application probing directory.
    ///
    /// Returns `false` if the directory was already configured. Requests that failed
    /// before the call stay cached as failures.
    ///
    /// # Errors
    ///
    /// Never fails for a valid path; the signature mirrors [`PropertyMap::append_path`].
    pub fn append_app_path(&self, path: impl AsRef<Path>) -> Result<bool> {
        write_lock!(self.properties).append_path(PropertyName::AppPaths, path)
    }

    /// Application probing directories.
    ///
    /// Falls back to the application base directory when no app paths are configured.
    #[must_use]
    pub fn app_paths(&self) -> Vec<PathBuf> {
        with_read!(self.properties, |properties: &PropertyMap| {
            let paths = properties.paths(PropertyName::AppPaths);
            if paths.is_empty() {
                properties
                    .text(PropertyName::AppContextBaseDirectory)
                    .map(|base| vec![PathBuf::from(base)])
                    .unwrap_or_default()
            } else {
                paths.to_vec()
            }
        })
    }

    /// Roots searched for satellite assemblies.
    #[must_use]
    pub fn platform_resource_roots(&self) -> Vec<PathBuf> {
        read_lock!(self.properties)
            .paths(PropertyName::PlatformResourceRoots)
            .to_vec()
    }

    /// Preference order among non-neutral cultures.
    #[must_use]
    pub fn culture_fallback(&self) -> Vec<String> {
        read_lock!(self.properties)
            .list(PropertyName::CultureFallbackList)
            .to_vec()
    }

    /// Whether `<name>.exe` candidates are probed.
    #[must_use]
    pub fn probe_executables(&self) -> bool {
        read_lock!(self.properties).flag(PropertyName::ProbeExecutables)
    }

    /// The trusted platform file registered under `simple_name`.
    #[must_use]
    pub fn platform_assembly(&self, simple_name: &str) -> Option<&Path> {
        self.platform
            .get(&simple_name.to_ascii_lowercase())
            .map(PathBuf::as_path)
    }

    /// Number of trusted platform assemblies.
    #[must_use]
    pub fn platform_assembly_count(&self) -> usize {
        self.platform.len()
    }

    /// The failure cache.
    #[must_use]
    pub fn failure_cache(&self) -> &FailureCache {
        &self.failures
    }

    /// The binding log sink.
    #[must_use]
    pub fn log_sink(&self) -> &Arc<dyn BindingLogSink> {
        &self.log_sink
    }

    /// The in-memory binding log, unless a custom sink was configured.
    #[must_use]
    pub fn binding_log(&self) -> Option<&Arc<BindingLog>> {
        self.memory_log.as_ref()
    }

    /// The binding redirect policy.
    #[must_use]
    pub fn policy(&self) -> &BindingPolicy {
        &self.policy
    }

    /// The image reader used for probing.
    #[must_use]
    pub fn image_reader(&self) -> &dyn ImageReader {
        self.reader.as_ref()
    }

    /// The binder statistics.
    #[must_use]
    pub fn stats(&self) -> &BinderStats {
        &self.stats
    }
}

impl fmt::Debug for ApplicationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApplicationContext")
            .field("properties", &self.properties)
            .field("contexts", &self.contexts.len())
            .field("failures", &self.failures.len())
            .field("platform", &self.platform.len())
            .field("policy", &self.policy.len())
            .finish_non_exhaustive()
    }
}

/// Builder for [`ApplicationContext`].
#[derive(Default)]
pub struct ApplicationContextBuilder {
    properties: PropertyMap,
    app_paths: Vec<PathBuf>,
    platform_assemblies: Vec<PathBuf>,
    resource_roots: Vec<PathBuf>,
    reader: Option<Arc<dyn ImageReader>>,
    log_sink: Option<Arc<dyn BindingLogSink>>,
    policy: BindingPolicy,
    default_resolver: Option<Arc<dyn HostResolver>>,
}

impl ApplicationContextBuilder {
    /// Create a new builder with default properties.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set one property.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Configuration`] if the value type does not match.
    pub fn with_property(mut self, name: PropertyName, value: PropertyValue) -> Result<Self> {
        self.properties.set(name, value)?;
        Ok(self)
    }

    /// Set properties from host key/value strings.
    ///
    /// # Errors
    ///
    /// See [`PropertyMap::from_pairs`].
    pub fn with_properties<K, V>(mut self, keys: &[K], values: &[V]) -> Result<Self>
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let parsed = PropertyMap::from_pairs(keys, values)?;
        for (name, value) in parsed.iter() {
            self.properties.set(name, value.clone())?;
        }
        Ok(self)
    }

    /// Add an application probing directory.
    #[must_use]
    pub fn with_app_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.app_paths.push(path.into());
        self
    }

    /// Add a trusted platform assembly file.
    #[must_use]
    pub fn with_trusted_platform_assembly(mut self, path: impl Into<PathBuf>) -> Self {
        self.platform_assemblies.push(path.into());
        self
    }

    /// Add a satellite resource root.
    #[must_use]
    pub fn with_platform_resource_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.resource_roots.push(path.into());
        self
    }

    /// Use `reader` instead of the PE reader.
    #[must_use]
    pub fn with_image_reader(mut self, reader: Arc<dyn ImageReader>) -> Self {
        self.reader = Some(reader);
        self
    }

    /// Send binding events to `sink` instead of the in-memory log.
    #[must_use]
    pub fn with_binding_log(mut self, sink: Arc<dyn BindingLogSink>) -> Self {
        self.log_sink = Some(sink);
        self
    }

    /// Add redirect rules; they take precedence over the application configuration file.
    #[must_use]
    pub fn with_binding_policy(mut self, policy: BindingPolicy) -> Self {
        self.policy.extend(policy);
        self
    }

    /// Install a host resolver on the default load context.
    #[must_use]
    pub fn with_default_resolver(mut self, resolver: Arc<dyn HostResolver>) -> Self {
        self.default_resolver = Some(resolver);
        self
    }

    /// Validate the configuration and create the application context.
    ///
    /// # Errors
    ///
    /// Returns an error if a property is invalid or the application configuration file
    /// cannot be read or parsed.
    pub fn build(self) -> Result<Arc<ApplicationContext>> {
        let mut properties = self.properties;
        for path in self.app_paths {
            properties.append_path(PropertyName::AppPaths, path)?;
        }
        for path in self.platform_assemblies {
            properties.append_path(PropertyName::TrustedPlatformAssemblies, path)?;
        }
        for path in self.resource_roots {
            properties.append_path(PropertyName::PlatformResourceRoots, path)?;
        }

        let platform = platform_index(properties.paths(PropertyName::TrustedPlatformAssemblies));

        let mut policy = self.policy;
        if let Some(config) = properties.text(PropertyName::AppConfigFile) {
            policy.extend(BindingPolicy::from_file(config)?);
        }

        let (log_sink, memory_log) = match self.log_sink {
            Some(sink) => (sink, None),
            None => {
                let log = Arc::new(if properties.flag(PropertyName::BindingLogEnabled) {
                    BindingLog::new()
                } else {
                    BindingLog::disabled()
                });
                let sink: Arc<dyn BindingLogSink> = log.clone();
                (sink, Some(log))
            }
        };

        let mut default_options = ContextOptions::new("Default");
        default_options.resolver = self.default_resolver;
        let default_context = Arc::new(LoadContext::new(ContextId::DEFAULT, default_options));

        let contexts = SkipMap::new();
        contexts.insert(ContextId::DEFAULT, default_context.clone());

        debug!(
            "Application context ready: {} app paths, {} platform assemblies, {} redirects",
            properties.paths(PropertyName::AppPaths).len(),
            platform.len(),
            policy.len()
        );

        Ok(Arc::new(ApplicationContext {
            properties: RwLock::new(properties),
            contexts,
            default_context,
            next_id: AtomicU64::new(1),
            failures: FailureCache::new(),
            log_sink,
            memory_log,
            platform,
            policy,
            reader: self.reader.unwrap_or_else(|| Arc::new(PeImageReader::new())),
            stats: BinderStats::new(),
        }))
    }
}

/// Maps lowercase simple names to platform files; the first file of a name wins.
fn platform_index(files: &[PathBuf]) -> HashMap<String, PathBuf> {
    let mut index: HashMap<String, PathBuf> = HashMap::with_capacity(files.len());

    for file in files {
        let Some(stem) = file.file_stem().and_then(|stem| stem.to_str()) else {
            warn!("Ignoring platform assembly with invalid name {}", file.display());
            continue;
        };
        let lower = stem.to_ascii_lowercase();
        let simple = lower.strip_suffix(".ni").unwrap_or(&lower).to_string();

        if let Some(existing) = index.get(&simple) {
            warn!(
                "Duplicate platform assembly {} ignored, {} is already registered",
                file.display(),
                existing.display()
            );
            continue;
        }
        index.insert(simple, file.clone());
    }

    index
}
