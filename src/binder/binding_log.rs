//! Binding log.
//!
//! Every bind request leaves a structured record of its outcome: which reference was
//! asked for, in which load context, how it ended and where the image came from. The
//! binder only writes to the log; it is meant for diagnostic tooling and post-mortem
//! analysis.
//!
//! Hosts can plug their own sink through [`BindingLogSink`]. The default sink,
//! [`BindingLog`], keeps events in memory using `boxcar::Vec`, which supports lock-free
//! concurrent appends from every binding thread.
//!
//! # Examples
//!
//! ```rust
//! use clrbind::binder::{BindOutcome, BindingEvent, BindingLog, BindingLogSink, ContextId};
//!
//! let log = BindingLog::new();
//! log.emit(BindingEvent::new("Foo", ContextId::DEFAULT, BindOutcome::Bound).with_location("/app/Foo.dll"));
//!
//! assert_eq!(log.len(), 1);
//! assert_eq!(log.count(BindOutcome::Bound), 1);
//! ```
//!
//! # Thread Safety
//!
//! All types in this module are [`Send`] and [`Sync`].

use std::{
    fmt::{self, Write},
    time::SystemTime,
};

use crate::{binder::ContextId, BindError};

/// How a bind request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumIter)]
pub enum BindOutcome {
    /// Served from the resolved table of a load context
    LocalHit,
    /// Served from the failure cache
    FailureCacheHit,
    /// Resolved by probing, explicit load or host resolver and committed
    Bound,
    /// Resolution failed
    Failed,
}

/// One binding log record.
#[derive(Debug, Clone)]
pub struct BindingEvent {
    /// The reference as resolved (after redirects) or the explicit path
    pub identity: String,
    /// Requesting load context
    pub context: ContextId,
    /// How the request ended
    pub outcome: BindOutcome,
    /// Failure reason, for failed requests
    pub error: Option<BindError>,
    /// Image location, for successful requests
    pub location: Option<String>,
    /// Load context that provided the result when it differs from the requester
    pub resolved_by: Option<ContextId>,
    /// Original reference when a binding redirect applied
    pub redirected_from: Option<String>,
    /// Time of the decision
    pub timestamp: SystemTime,
}

impl BindingEvent {
    /// Creates an event stamped with the current time.
    pub fn new(identity: impl Into<String>, context: ContextId, outcome: BindOutcome) -> Self {
        BindingEvent {
            identity: identity.into(),
            context,
            outcome,
            error: None,
            location: None,
            resolved_by: None,
            redirected_from: None,
            timestamp: SystemTime::now(),
        }
    }

    /// Attaches a failure reason.
    #[must_use]
    pub fn with_error(mut self, error: BindError) -> Self {
        self.error = Some(error);
        self
    }

    /// Attaches the image location.
    #[must_use]
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Records the context that produced the result, if it is not the requester.
    #[must_use]
    pub fn with_resolved_by(mut self, context: ContextId) -> Self {
        if context != self.context {
            self.resolved_by = Some(context);
        }
        self
    }

    /// Records the reference a binding redirect was applied to.
    #[must_use]
    pub fn with_redirect(mut self, original: Option<String>) -> Self {
        self.redirected_from = original;
        self
    }
}

impl fmt::Display for BindingEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {} in {}", self.outcome, self.identity, self.context)?;
        if let Some(original) = &self.redirected_from {
            write!(f, " (redirected from {original})")?;
        }
        if let Some(location) = &self.location {
            write!(f, " -> {location}")?;
        }
        if let Some(context) = self.resolved_by {
            write!(f, " via {context}")?;
        }
        if let Some(error) = &self.error {
            write!(f, ": {error}")?;
        }
        Ok(())
    }
}

/// Receiver of binding log events.
pub trait BindingLogSink: Send + Sync {
    /// Appends one event.
    fn emit(&self, event: BindingEvent);
}

/// In-memory, append-only binding log.
#[derive(Debug)]
pub struct BindingLog {
    events: boxcar::Vec<BindingEvent>,
    enabled: bool,
}

impl Default for BindingLog {
    fn default() -> Self {
        Self::new()
    }
}

impl BindingLog {
    /// Creates an empty, recording log.
    #[must_use]
    pub fn new() -> Self {
        BindingLog {
            events: boxcar::Vec::new(),
            enabled: true,
        }
    }

    /// Creates a log that drops every event.
    #[must_use]
    pub fn disabled() -> Self {
        BindingLog {
            events: boxcar::Vec::new(),
            enabled: false,
        }
    }

    /// Returns `true` if events are recorded.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Number of recorded events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.count()
    }

    /// Returns `true` if nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Recorded events in append order.
    pub fn iter(&self) -> impl Iterator<Item = &BindingEvent> {
        self.events.iter().map(|(_, event)| event)
    }

    /// Number of events with `outcome`.
    #[must_use]
    pub fn count(&self, outcome: BindOutcome) -> usize {
        self.iter().filter(|event| event.outcome == outcome).count()
    }

    /// All failed requests.
    #[must_use]
    pub fn failures(&self) -> Vec<&BindingEvent> {
        self.iter()
            .filter(|event| event.outcome == BindOutcome::Failed)
            .collect()
    }

    /// Events requested from `context`.
    #[must_use]
    pub fn for_context(&self, context: ContextId) -> Vec<&BindingEvent> {
        self.iter().filter(|event| event.context == context).collect()
    }

    /// One line per event, for display.
    #[must_use]
    pub fn summary(&self) -> String {
        let mut output = String::new();
        for event in self.iter() {
            let _ = writeln!(output, "{event}");
        }
        output
    }
}

impl BindingLogSink for BindingLog {
    fn emit(&self, event: BindingEvent) {
        if self.enabled {
            self.events.push(event);
        }
    }
}
