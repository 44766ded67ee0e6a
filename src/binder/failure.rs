//! Negative-result cache.
//!
//! A failed resolution is recorded per `(subject, context)` so that repeating the same
//! request in the same load context costs one map lookup instead of another round of
//! filesystem probing. The first recorded reason is kept; a later success evicts the
//! entry.

use std::time::SystemTime;

use dashmap::{mapref::entry::Entry, DashMap};

use crate::{
    binder::ContextId,
    identity::AssemblyIdentity,
    BindError, BindErrorKind,
};

/// What a cached failure is about.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FailureSubject {
    /// A by-name request, after redirect policy was applied
    Identity(AssemblyIdentity),
    /// An explicit load of a file
    Path(String),
}

impl From<AssemblyIdentity> for FailureSubject {
    fn from(identity: AssemblyIdentity) -> Self {
        FailureSubject::Identity(identity)
    }
}

impl From<&AssemblyIdentity> for FailureSubject {
    fn from(identity: &AssemblyIdentity) -> Self {
        FailureSubject::Identity(identity.clone())
    }
}

/// Key of a cached failure.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FailureKey {
    /// Request subject
    pub subject: FailureSubject,
    /// Requesting load context
    pub context: ContextId,
}

/// A cached failure.
#[derive(Debug, Clone)]
pub struct FailureCacheEntry {
    /// The error returned to every later request for the key
    pub error: BindError,
    /// When the failure was first recorded
    pub recorded_at: SystemTime,
}

/// Concurrent failure cache, shared by all load contexts of an application.
#[derive(Debug, Default)]
pub struct FailureCache {
    entries: DashMap<FailureKey, FailureCacheEntry>,
}

impl FailureCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `error` for `(subject, context)`.
    ///
    /// Returns `false` and keeps the existing reason if the key already holds a failure.
    pub fn record(
        &self,
        subject: impl Into<FailureSubject>,
        context: ContextId,
        error: BindError,
    ) -> bool {
        let key = FailureKey {
            subject: subject.into(),
            context,
        };

        match self.entries.entry(key) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(FailureCacheEntry {
                    error,
                    recorded_at: SystemTime::now(),
                });
                true
            }
        }
    }

    /// Returns the cached error for `(subject, context)`.
    #[must_use]
    pub fn lookup(&self, subject: impl Into<FailureSubject>, context: ContextId) -> Option<BindError> {
        let key = FailureKey {
            subject: subject.into(),
            context,
        };
        self.entries.get(&key).map(|entry| entry.error.clone())
    }

    /// Removes the failure for `(subject, context)`; returns `true` if one existed.
    pub fn evict(&self, subject: impl Into<FailureSubject>, context: ContextId) -> bool {
        let key = FailureKey {
            subject: subject.into(),
            context,
        };
        self.entries.remove(&key).is_some()
    }

    /// Drops every failure recorded for `context`; returns how many were removed.
    pub fn purge_context(&self, context: ContextId) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, _| key.context != context);
        before.saturating_sub(self.entries.len())
    }

    /// Number of cached failures of `kind`.
    #[must_use]
    pub fn count_kind(&self, kind: BindErrorKind) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.error.kind() == kind)
            .count()
    }

    /// Snapshot of all cached failures, ordered by context and then by time of recording.
    #[must_use]
    pub fn entries(&self) -> Vec<(FailureKey, FailureCacheEntry)> {
        let mut entries: Vec<_> = self
            .entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        entries.sort_by(|(left_key, left), (right_key, right)| {
            left_key
                .context
                .cmp(&right_key.context)
                .then(left.recorded_at.cmp(&right.recorded_at))
        });
        entries
    }

    /// Number of cached failures.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn not_found(name: &str) -> BindError {
        BindError::NotFound {
            identity: name.to_string(),
        }
    }

    #[test]
    fn test_record_and_lookup() {
        let cache = FailureCache::new();
        let request = AssemblyIdentity::simple("Bar");

        assert!(cache.lookup(&request, ContextId::DEFAULT).is_none());
        assert!(cache.record(&request, ContextId::DEFAULT, not_found("Bar")));

        assert_eq!(
            cache.lookup(&request, ContextId::DEFAULT),
            Some(not_found("Bar"))
        );
        assert!(cache.lookup(&request, ContextId::new(1)).is_none());
    }

    #[test]
    fn test_first_failure_wins() {
        let cache = FailureCache::new();
        let request = AssemblyIdentity::simple("Bar");
        let mismatch = BindError::IdentityMismatch {
            requested: "Bar".to_string(),
            found: "Baz".to_string(),
            location: "/app/Bar.dll".to_string(),
        };

        assert!(cache.record(&request, ContextId::DEFAULT, not_found("first")));
        assert!(!cache.record(&request, ContextId::DEFAULT, mismatch));

        assert_eq!(
            cache.lookup(&request, ContextId::DEFAULT),
            Some(not_found("first"))
        );
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_evict() {
        let cache = FailureCache::new();
        let request = AssemblyIdentity::simple("Bar");
        cache.record(&request, ContextId::DEFAULT, not_found("Bar"));

        assert!(cache.evict(&request, ContextId::DEFAULT));
        assert!(!cache.evict(&request, ContextId::DEFAULT));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_path_subjects_are_separate() {
        let cache = FailureCache::new();
        cache.record(
            FailureSubject::Path("/app/Bar.dll".to_string()),
            ContextId::DEFAULT,
            not_found("/app/Bar.dll"),
        );

        assert!(cache
            .lookup(&AssemblyIdentity::simple("Bar"), ContextId::DEFAULT)
            .is_none());
        assert!(cache
            .lookup(
                FailureSubject::Path("/app/Bar.dll".to_string()),
                ContextId::DEFAULT
            )
            .is_some());
    }

    #[test]
    fn test_purge_context() {
        let cache = FailureCache::new();
        let custom = ContextId::new(3);
        cache.record(&AssemblyIdentity::simple("A"), custom, not_found("A"));
        cache.record(&AssemblyIdentity::simple("B"), custom, not_found("B"));
        cache.record(&AssemblyIdentity::simple("A"), ContextId::DEFAULT, not_found("A"));

        assert_eq!(cache.purge_context(custom), 2);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.count_kind(BindErrorKind::NotFound), 1);
        assert_eq!(cache.entries()[0].0.context, ContextId::DEFAULT);
    }

    #[test]
    fn test_concurrent_record() {
        let cache = Arc::new(FailureCache::new());
        let request = AssemblyIdentity::simple("Contended");

        let recorded: usize = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|index| {
                    let cache = cache.clone();
                    let request = request.clone();
                    scope.spawn(move || {
                        usize::from(cache.record(
                            &request,
                            ContextId::DEFAULT,
                            not_found(&index.to_string()),
                        ))
                    })
                })
                .collect();
            handles.into_iter().map(|handle| handle.join().unwrap()).sum()
        });

        assert_eq!(recorded, 1);
        assert_eq!(cache.len(), 1);
    }
}
