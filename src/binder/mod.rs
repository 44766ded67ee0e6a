//! Assembly binding and load-context resolution.
//!
//! This module decides, for every assembly reference, which image satisfies it in a
//! given load context. It enforces the identity policy, delegates between load
//! contexts, caches positive and negative results and records every decision in the
//! binding log.
//!
//! # Architecture
//!
//! - **Application Context**: the process-wide root, owning properties, the load
//!   context arena, the failure cache and the binding log sink
//! - **Load Contexts**: isolation domains with a resolved-assembly table each, linked to
//!   a fallback parent by id
//! - **Probe**: filesystem search over trusted platform assemblies and ordered
//!   directories, validating every candidate's identity
//! - **Binder**: the state machine tying everything together
//!
//! # Bind protocol
//!
//! A request `(reference, context)` first has the redirect policy applied. Then, for the
//! requesting context and each parent it delegates to:
//!
//! 1. **Local hit** - the context's resolved table satisfies the request
//! 2. **Failure cache hit** - the request already failed in this context
//! 3. **Probing** - trusted platform assemblies, application paths or the context's own
//!    paths; satellite directories for culture-specific requests
//! 4. **Host callback** - the context's [`HostResolver`], at most once
//!
//! A result from step 3 or 4 is committed to the context that produced it; the first
//! committed entry wins and every racing caller receives it. If every context failed,
//! the most specific error is returned. Each visited context caches the most specific
//! error of itself and the contexts it delegates to, so a child's failure never
//! becomes its parent's.
//!
//! Delegation stops at an isolated context or at a context without parent. Revisiting
//! a context within one request fails with [`BindError::CircularDelegation`].
//!
//! # Key Components
//!
//! - [`Binder`] - Entry point: [`Binder::bind`], [`Binder::bind_path`],
//!   [`Binder::bind_image`], [`Binder::bind_many`]
//! - [`ApplicationContext`] / [`ApplicationContextBuilder`] - Root object and configuration
//! - [`LoadContext`] / [`ContextOptions`] / [`ContextFlags`] - Isolation domains
//! - [`AssemblyProbe`] - Candidate search and validation
//! - [`FailureCache`] - Negative results
//! - [`BindingLog`] / [`BindingLogSink`] - Structured decision record
//! - [`PropertyMap`] - Typed configuration
//! - [`BindingPolicy`] - Binding redirects
//!
//! # Usage Examples
//!
//! ```rust,no_run
//! use clrbind::binder::{ApplicationContext, Binder, ContextId};
//!
//! let app = ApplicationContext::builder()
//!     .with_app_path("/srv/app")
//!     .with_trusted_platform_assembly("/usr/share/dotnet/System.Runtime.dll")
//!     .build()?;
//! let binder = Binder::new(app.clone());
//!
//! let runtime = binder.bind("System.Runtime, Version=8.0.0.0", ContextId::DEFAULT)?;
//! assert!(runtime.is_platform());
//!
//! let plugins = app.create_load_context(None, false)?;
//! let json = binder.bind("Newtonsoft.Json, Version=13.0", plugins.id())?;
//! println!("{json}");
//! # Ok::<(), clrbind::Error>(())
//! ```
//!
//! # Thread Safety
//!
//! [`Binder`] is cheap to clone and can be used from any number of threads. No lock is
//! held while images are opened.

mod application;
mod binding_log;
mod context;
mod entry;
mod failure;
mod policy;
mod probe;
mod properties;
mod result;

pub use application::{ApplicationContext, ApplicationContextBuilder};
pub use binding_log::{BindOutcome, BindingEvent, BindingLog, BindingLogSink};
pub use context::{ContextFlags, ContextId, ContextOptions, HostResolver, LoadContext};
pub use entry::AssemblyEntry;
pub use failure::{FailureCache, FailureCacheEntry, FailureKey, FailureSubject};
pub use policy::{BindingPolicy, BindingRedirect};
pub use probe::{AssemblyProbe, ProbeHit};
pub use properties::{PropertyKind, PropertyMap, PropertyName, PropertyValue};
pub use result::{BatchBindResult, BinderStats, BinderStatsSnapshot};

use std::{
    any::Any,
    panic::{self, AssertUnwindSafe},
    path::Path,
    sync::Arc,
};

use log::{debug, warn};
use rayon::prelude::*;

use crate::{
    identity::AssemblyIdentity,
    image::ImageSource,
    BindError, BindResult,
};

/// A request after redirect policy, with what the binding log needs to describe it.
struct Request {
    identity: AssemblyIdentity,
    context: ContextId,
    redirected_from: Option<String>,
}

impl Request {
    fn event(&self, outcome: BindOutcome) -> BindingEvent {
        BindingEvent::new(self.identity.display_name(), self.context, outcome)
            .with_redirect(self.redirected_from.clone())
    }
}

/// The bind state machine.
///
/// A `Binder` is a thin handle over an [`ApplicationContext`]; all state lives in the
/// application context, so any number of binders over the same context observe the
/// same load contexts and caches.
#[derive(Debug, Clone)]
pub struct Binder {
    app: Arc<ApplicationContext>,
}

impl Binder {
    /// Creates a binder over `app`.
    #[must_use]
    pub fn new(app: Arc<ApplicationContext>) -> Self {
        Binder { app }
    }

    /// The application context this binder works on.
    #[must_use]
    pub fn application(&self) -> &Arc<ApplicationContext> {
        &self.app
    }

    /// Current statistics.
    #[must_use]
    pub fn stats(&self) -> BinderStatsSnapshot {
        self.app.stats().snapshot()
    }

    /// Binds a display-name reference in load context `context`.
    ///
    /// # Arguments
    ///
    /// * `reference` - Display name, e.g. `Foo, Version=1.0.0.0, Culture=neutral`
    /// * `context` - Requesting load context
    ///
    /// # Errors
    ///
    /// Returns [`BindError::MalformedIdentity`] if `reference` does not parse (never
    /// cached), otherwise the errors of [`Binder::bind_identity`].
    pub fn bind(&self, reference: &str, context: ContextId) -> BindResult<Arc<AssemblyEntry>> {
        match AssemblyIdentity::parse(reference) {
            Ok(request) => self.bind_identity(&request, context),
            Err(error) => {
                let stats = self.app.stats();
                stats.count_request();
                stats.count_failure();
                debug!("Rejected reference '{reference}' - {error}");
                self.app.log_sink().emit(
                    BindingEvent::new(reference, context, BindOutcome::Failed)
                        .with_error(error.clone()),
                );
                Err(error)
            }
        }
    }

    /// Binds a parsed identity in load context `context`.
    ///
    /// # Errors
    ///
    /// - [`BindError::UnknownContext`] if `context` or a delegation target does not exist
    /// - [`BindError::CircularDelegation`] if the parent chain loops
    /// - the most specific of [`BindError::IdentityMismatch`],
    ///   [`BindError::BadImageFormat`], [`BindError::HostCallbackFailed`] and
    ///   [`BindError::NotFound`] collected over all consulted contexts
    pub fn bind_identity(
        &self,
        request: &AssemblyIdentity,
        context: ContextId,
    ) -> BindResult<Arc<AssemblyEntry>> {
        let stats = self.app.stats();
        stats.count_request();

        let request = match self.app.policy().apply(request) {
            Some(redirected) => {
                debug!("Redirected {request} to {redirected}");
                Request {
                    identity: redirected,
                    context,
                    redirected_from: Some(request.display_name()),
                }
            }
            None => Request {
                identity: request.clone(),
                context,
                redirected_from: None,
            },
        };

        let origin = match self.app.require_context(context) {
            Ok(origin) => origin,
            Err(error) => return Err(self.reject(&request, error)),
        };

        if let Some(entry) = origin.bind_local(&request.identity) {
            stats.count_local_hit();
            debug!("{} bound locally in {}", request.identity, context);
            self.app.log_sink().emit(
                request
                    .event(BindOutcome::LocalHit)
                    .with_location(entry.location()),
            );
            return Ok(entry);
        }

        if let Some(error) = self.app.failure_cache().lookup(&request.identity, context) {
            stats.count_failure_cache_hit();
            debug!("{} failed before in {}", request.identity, context);
            self.app.log_sink().emit(
                request
                    .event(BindOutcome::FailureCacheHit)
                    .with_error(error.clone()),
            );
            return Err(error);
        }

        let mut visited: Vec<ContextId> = Vec::new();
        let mut attempts: Vec<(ContextId, BindError)> = Vec::new();
        let mut inherited: Option<BindError> = None;
        let mut current = origin.clone();

        loop {
            if visited.contains(&current.id()) {
                let error = BindError::CircularDelegation {
                    context: current.id(),
                };
                return Err(self.reject(&request, error));
            }
            visited.push(current.id());

            if current.id() != origin.id() {
                if let Some(entry) = current.bind_local(&request.identity) {
                    stats.count_local_hit();
                    debug!(
                        "{} bound in parent {} of {}",
                        request.identity,
                        current.id(),
                        context
                    );
                    let entry = adopt(&origin, entry);
                    self.app.log_sink().emit(
                        request
                            .event(BindOutcome::LocalHit)
                            .with_location(entry.location())
                            .with_resolved_by(current.id()),
                    );
                    return Ok(entry);
                }

                if let Some(error) = self
                    .app
                    .failure_cache()
                    .lookup(&request.identity, current.id())
                {
                    stats.count_failure_cache_hit();
                    debug!(
                        "{} failed before in parent {}, ending delegation",
                        request.identity,
                        current.id()
                    );
                    inherited = Some(error);
                    break;
                }
            }

            match self.resolve_in(&request.identity, &current) {
                Ok(entry) => {
                    for id in &visited {
                        self.app.failure_cache().evict(&request.identity, *id);
                    }
                    let entry = adopt(&origin, entry);
                    stats.count_success();
                    debug!("{} bound to {}", request.identity, entry.location());
                    self.app.log_sink().emit(
                        request
                            .event(BindOutcome::Bound)
                            .with_location(entry.location())
                            .with_resolved_by(current.id()),
                    );
                    return Ok(entry);
                }
                Err(error) => attempts.push((current.id(), error)),
            }

            if current.is_isolated() {
                break;
            }
            let Some(parent) = current.parent() else {
                break;
            };
            current = match self.app.require_context(parent) {
                Ok(parent) => parent,
                Err(error) => return Err(self.reject(&request, error)),
            };
        }

        // A context caches what a request made directly to it would report: its own
        // failure merged with those of the contexts it delegates to, never its children's.
        let mut failure = inherited;
        for (id, own) in attempts.into_iter().rev() {
            let merged = match failure {
                Some(rest) => own.most_specific(rest),
                None => own,
            };
            self.app.record_failure(&request.identity, id, merged.clone());
            failure = Some(merged);
        }
        let error = failure.unwrap_or_else(|| probe::not_found(&request.identity));
        stats.count_failure();
        debug!("Failed to bind {} in {} - {}", request.identity, context, error);
        self.app
            .log_sink()
            .emit(request.event(BindOutcome::Failed).with_error(error.clone()));

        Err(error)
    }

    /// Loads the image at `path` into load context `context`.
    ///
    /// The image is accepted under whatever identity it declares. If that identity is
    /// already bound in the context, the existing entry is returned. Failures are cached
    /// under the canonical path.
    ///
    /// # Errors
    ///
    /// Returns [`BindError::NotFound`] for a missing file, [`BindError::BadImageFormat`]
    /// for an unreadable one and [`BindError::UnknownContext`] for an unknown context.
    pub fn bind_path(
        &self,
        path: impl AsRef<Path>,
        context: ContextId,
    ) -> BindResult<Arc<AssemblyEntry>> {
        let path = path.as_ref();
        let canonical = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        let subject = FailureSubject::Path(canonical.display().to_string());

        self.load_explicit(ImageSource::Path(canonical), Some(subject), context)
    }

    /// Loads an in-memory image into load context `context`.
    ///
    /// Failures are not cached; there is no stable key for them.
    ///
    /// # Errors
    ///
    /// Returns [`BindError::BadImageFormat`] for an unreadable image and
    /// [`BindError::UnknownContext`] for an unknown context.
    pub fn bind_image(
        &self,
        name: &str,
        data: impl Into<Arc<[u8]>>,
        context: ContextId,
    ) -> BindResult<Arc<AssemblyEntry>> {
        self.load_explicit(ImageSource::memory(name, data), None, context)
    }

    /// Binds many references in parallel.
    ///
    /// Outcomes are reported in input order.
    pub fn bind_many<S>(&self, references: &[S], context: ContextId) -> BatchBindResult
    where
        S: AsRef<str> + Sync,
    {
        let outcomes: Vec<_> = references
            .par_iter()
            .map(|reference| {
                let reference = reference.as_ref();
                (reference.to_string(), self.bind(reference, context))
            })
            .collect();

        let mut result = BatchBindResult::new();
        for (reference, outcome) in outcomes {
            match outcome {
                Ok(entry) => result.record_success(reference, entry),
                Err(error) => result.record_failure(reference, error),
            }
        }
        result
    }

    /// Probing and host callback within one context.
    fn resolve_in(
        &self,
        request: &AssemblyIdentity,
        context: &LoadContext,
    ) -> BindResult<Arc<AssemblyEntry>> {
        let culture_fallback = self.app.culture_fallback();
        let probe = AssemblyProbe::new(self.app.image_reader())
            .with_executables(self.app.probe_executables())
            .with_culture_fallback(&culture_fallback)
            .with_stats(self.app.stats());

        debug!("Probing for {request} in {}", context.id());
        self.app.stats().count_probe();

        let failure = match self.probe_in(&probe, request, context) {
            Ok(hit) => return Ok(self.commit(context, hit)),
            Err(error) => error,
        };

        let Some(resolver) = context.resolver() else {
            return Err(failure);
        };

        self.app.stats().count_host_callback();
        debug!("Asking host resolver of {} for {request}", context.id());

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            resolver.resolve(request, context.id())
        }));
        let source = match outcome {
            Ok(Ok(Some(source))) => source,
            Ok(Ok(None)) => {
                debug!("Host resolver of {} declined {request}", context.id());
                return Err(failure);
            }
            Ok(Err(error)) => {
                let error = host_failure(request, error.to_string());
                return Err(failure.most_specific(error));
            }
            Err(payload) => {
                let error = host_failure(request, panic_message(payload.as_ref()));
                return Err(failure.most_specific(error));
            }
        };

        match probe.validate(request, &source) {
            Ok(hit) => Ok(self.commit(context, hit)),
            Err(error @ BindError::IdentityMismatch { .. }) => Err(failure.most_specific(error)),
            Err(error) => Err(failure.most_specific(host_failure(request, error.to_string()))),
        }
    }

    fn probe_in(
        &self,
        probe: &AssemblyProbe<'_>,
        request: &AssemblyIdentity,
        context: &LoadContext,
    ) -> BindResult<ProbeHit> {
        let app_paths = self.app.app_paths();
        let directories = context.search_paths(&app_paths);

        if request.culture().is_some() {
            let mut satellite_roots = if context.uses_application_paths() {
                self.app.platform_resource_roots()
            } else {
                Vec::new()
            };
            satellite_roots.extend(directories.iter().cloned());
            probe.probe_satellite(request, &satellite_roots)
        } else if context.uses_application_paths() {
            probe.probe_platform(
                request,
                self.app.platform_assembly(request.name()),
                directories,
            )
        } else {
            probe.probe(request, directories)
        }
    }

    /// Inserts a probed image into `context`; the first committed entry wins.
    fn commit(&self, context: &LoadContext, hit: ProbeHit) -> Arc<AssemblyEntry> {
        let entry = Arc::new(AssemblyEntry::new(
            hit.identity,
            hit.location,
            hit.is_platform,
            hit.image,
            context.id(),
        ));

        let winner = context.insert(entry.clone());
        if !Arc::ptr_eq(&winner, &entry) {
            self.app.stats().count_lost_race();
            debug!(
                "Discarding {} - {} is already bound in {}",
                entry.location(),
                winner.identity(),
                context.id()
            );
        }
        winner
    }

    fn load_explicit(
        &self,
        source: ImageSource,
        subject: Option<FailureSubject>,
        context: ContextId,
    ) -> BindResult<Arc<AssemblyEntry>> {
        let stats = self.app.stats();
        stats.count_request();

        let location = source.location();
        let event = |outcome| BindingEvent::new(location.clone(), context, outcome);

        let target = match self.app.require_context(context) {
            Ok(target) => target,
            Err(error) => {
                stats.count_failure();
                self.app
                    .log_sink()
                    .emit(event(BindOutcome::Failed).with_error(error.clone()));
                return Err(error);
            }
        };

        if let Some(subject) = &subject {
            if let Some(error) = self.app.failure_cache().lookup(subject.clone(), context) {
                stats.count_failure_cache_hit();
                self.app
                    .log_sink()
                    .emit(event(BindOutcome::FailureCacheHit).with_error(error.clone()));
                return Err(error);
            }
        }

        let probe = AssemblyProbe::new(self.app.image_reader()).with_stats(stats);
        match probe.load(&source) {
            Ok(hit) => {
                let entry = self.commit(&target, hit);
                if let Some(subject) = subject {
                    self.app.failure_cache().evict(subject, context);
                }
                stats.count_success();
                debug!("Loaded {} from {location} into {context}", entry.identity());
                self.app
                    .log_sink()
                    .emit(event(BindOutcome::Bound).with_location(entry.location()));
                Ok(entry)
            }
            Err(error) => {
                if let Some(subject) = subject {
                    self.app.record_failure(subject, context, error.clone());
                }
                stats.count_failure();
                debug!("Failed to load {location} into {context} - {error}");
                self.app
                    .log_sink()
                    .emit(event(BindOutcome::Failed).with_error(error.clone()));
                Err(error)
            }
        }
    }

    /// Ends a request without caching; the error is about the request, not the identity.
    fn reject(&self, request: &Request, error: BindError) -> BindError {
        self.app.stats().count_failure();
        debug!("Request for {} failed - {}", request.identity, error);
        self.app
            .log_sink()
            .emit(request.event(BindOutcome::Failed).with_error(error.clone()));
        error
    }
}

/// Copies an entry resolved through a parent into `origin` when it caches fallbacks.
fn adopt(origin: &LoadContext, entry: Arc<AssemblyEntry>) -> Arc<AssemblyEntry> {
    if entry.context() != origin.id()
        && origin.flags().contains(ContextFlags::CACHE_FALLBACK_LOCALLY)
    {
        origin.insert(entry)
    } else {
        entry
    }
}

fn host_failure(request: &AssemblyIdentity, reason: String) -> BindError {
    warn!("Host resolver failed for {request} - {reason}");
    BindError::HostCallbackFailed {
        identity: request.display_name(),
        reason,
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("resolver panicked: {message}")
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("resolver panicked: {message}")
    } else {
        "resolver panicked".to_string()
    }
}
