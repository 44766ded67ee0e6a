//! Batch results and binder statistics.

use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use crate::{binder::AssemblyEntry, BindError, BindErrorKind};

/// Outcome of [`crate::binder::Binder::bind_many`].
///
/// Outcomes are kept in input order, each paired with the reference text it belongs to.
///
/// ```rust,no_run
/// use clrbind::binder::{ApplicationContext, Binder, ContextId};
///
/// # fn main() -> clrbind::Result<()> {
/// let binder = Binder::new(ApplicationContext::builder().with_app_path("app").build()?);
/// let result = binder.bind_many(&["Foo", "Bar, Version=2.0"], ContextId::DEFAULT);
///
/// if !result.is_complete_success() {
///     for (reference, error) in &result.failed {
///         println!("{reference}: {error}");
///     }
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct BatchBindResult {
    /// Successfully bound references
    pub bound: Vec<(String, Arc<AssemblyEntry>)>,
    /// Failed references with their reason
    pub failed: Vec<(String, BindError)>,
    /// Total number of successful binds
    pub bound_count: usize,
    /// Total number of failed binds
    pub failed_count: usize,
}

impl BatchBindResult {
    /// Create a new empty result.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if every reference was bound.
    #[must_use]
    pub fn is_complete_success(&self) -> bool {
        self.failed_count == 0
    }

    /// Check if any reference failed.
    #[must_use]
    pub fn has_failures(&self) -> bool {
        self.failed_count > 0
    }

    /// Get the number of bound references.
    #[must_use]
    pub fn success_count(&self) -> usize {
        self.bound_count
    }

    /// Get the number of failed references.
    #[must_use]
    pub fn failure_count(&self) -> usize {
        self.failed_count
    }

    /// Get the entry bound for `reference`.
    #[must_use]
    pub fn entry(&self, reference: &str) -> Option<&Arc<AssemblyEntry>> {
        self.bound
            .iter()
            .find(|(bound, _)| bound == reference)
            .map(|(_, entry)| entry)
    }

    /// Failures of one kind.
    pub fn failures_of_kind(&self, kind: BindErrorKind) -> impl Iterator<Item = &(String, BindError)> {
        self.failed
            .iter()
            .filter(move |(_, error)| error.kind() == kind)
    }

    /// Record a successful bind.
    pub(crate) fn record_success(&mut self, reference: String, entry: Arc<AssemblyEntry>) {
        self.bound.push((reference, entry));
        self.bound_count += 1;
    }

    /// Record a failed bind.
    pub(crate) fn record_failure(&mut self, reference: String, error: BindError) {
        self.failed.push((reference, error));
        self.failed_count += 1;
    }
}

/// Running counters of a binder.
///
/// Shared by every binder over the same application context.
#[derive(Debug, Default)]
pub struct BinderStats {
    requests: AtomicU64,
    local_hits: AtomicU64,
    failure_cache_hits: AtomicU64,
    probes: AtomicU64,
    image_opens: AtomicU64,
    host_callbacks: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    lost_races: AtomicU64,
}

macro_rules! counter {
    ($($name:ident => $field:ident),* $(,)?) => {
        impl BinderStats {
            $(
                pub(crate) fn $name(&self) {
                    self.$field.fetch_add(1, Ordering::Relaxed);
                }
            )*
        }
    };
}

counter! {
    count_request => requests,
    count_local_hit => local_hits,
    count_failure_cache_hit => failure_cache_hits,
    count_probe => probes,
    count_image_open => image_opens,
    count_host_callback => host_callbacks,
    count_success => successes,
    count_failure => failures,
    count_lost_race => lost_races,
}

impl BinderStats {
    /// Creates zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Point-in-time copy of all counters.
    #[must_use]
    pub fn snapshot(&self) -> BinderStatsSnapshot {
        BinderStatsSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            local_hits: self.local_hits.load(Ordering::Relaxed),
            failure_cache_hits: self.failure_cache_hits.load(Ordering::Relaxed),
            probes: self.probes.load(Ordering::Relaxed),
            image_opens: self.image_opens.load(Ordering::Relaxed),
            host_callbacks: self.host_callbacks.load(Ordering::Relaxed),
            successes: self.successes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            lost_races: self.lost_races.load(Ordering::Relaxed),
        }
    }
}

/// Plain copy of [`BinderStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BinderStatsSnapshot {
    /// Bind requests received
    pub requests: u64,
    /// Requests served from a resolved table
    pub local_hits: u64,
    /// Requests served from the failure cache
    pub failure_cache_hits: u64,
    /// Probe runs (one per context consulted)
    pub probes: u64,
    /// Candidate images opened
    pub image_opens: u64,
    /// Host resolver invocations
    pub host_callbacks: u64,
    /// Requests that ended with a new entry
    pub successes: u64,
    /// Requests that ended with a new failure
    pub failures: u64,
    /// Probed images discarded because an entry for the same identity was already committed
    pub lost_races: u64,
}

impl fmt::Display for BinderStatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Requests:            {}", self.requests)?;
        writeln!(f, "Local hits:          {}", self.local_hits)?;
        writeln!(f, "Failure cache hits:  {}", self.failure_cache_hits)?;
        writeln!(f, "Probes:              {}", self.probes)?;
        writeln!(f, "Images opened:       {}", self.image_opens)?;
        writeln!(f, "Host callbacks:      {}", self.host_callbacks)?;
        writeln!(f, "Successes:           {}", self.successes)?;
        writeln!(f, "Failures:            {}", self.failures)?;
        write!(f, "Lost insert races:   {}", self.lost_races)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        binder::ContextId,
        file::Memory,
        identity::AssemblyIdentity,
        image::ImageHandle,
    };

    #[test]
    fn test_batch_result_counts() {
        let mut result = BatchBindResult::new();
        assert!(result.is_complete_success());

        let image = Arc::new(ImageHandle::from_backend(
            "/app/Foo.dll",
            Box::new(Memory::new(Vec::<u8>::new())),
        ));
        let entry = Arc::new(AssemblyEntry::new(
            AssemblyIdentity::simple("Foo"),
            "/app/Foo.dll".to_string(),
            false,
            image,
            ContextId::DEFAULT,
        ));

        result.record_success("Foo".to_string(), entry);
        result.record_failure(
            "Bar".to_string(),
            BindError::NotFound {
                identity: "Bar".to_string(),
            },
        );

        assert_eq!(result.success_count(), 1);
        assert_eq!(result.failure_count(), 1);
        assert!(result.has_failures());
        assert!(result.entry("Foo").is_some());
        assert!(result.entry("Bar").is_none());
        assert_eq!(result.failures_of_kind(BindErrorKind::NotFound).count(), 1);
        assert_eq!(
            result
                .failures_of_kind(BindErrorKind::IdentityMismatch)
                .count(),
            0
        );
    }

    #[test]
    fn test_stats_snapshot() {
        let stats = BinderStats::new();
        stats.count_request();
        stats.count_request();
        stats.count_probe();
        stats.count_lost_race();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.requests, 2);
        assert_eq!(snapshot.probes, 1);
        assert_eq!(snapshot.lost_races, 1);
        assert_eq!(snapshot.successes, 0);
        assert!(snapshot.to_string().contains("Requests:            2"));
    }
}
