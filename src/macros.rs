//! Helper macros for lock handling.
//!
//! Two pieces of shared state sit behind a `RwLock`: the application property map and the
//! parent link of each load context. Every other shared table is a lock-free map.
//! Poisoning is treated as unrecoverable, the same way a panic inside a bind request is.

/// Helper macro for reading locked items
///
/// ```rust, ignore
///  let paths = read_lock!(self.properties).paths(PropertyName::AppPaths);
/// ```
macro_rules! read_lock {
    ($arc_rwlock:expr) => {
        $arc_rwlock.read().expect("Failed to acquire read lock")
    };
}

/// Helper macro for writing to locked items
///
/// ```rust, ignore
///  write_lock!(self.properties).append_path(PropertyName::AppPaths, path);
/// ```
macro_rules! write_lock {
    ($arc_rwlock:expr) => {
        $arc_rwlock.write().expect("Failed to acquire write lock")
    };
}

/// Helper macro for reading a value out of a locked item
///
/// ```rust, ignore
///  let base = with_read!(self.properties, |map: &PropertyMap| map.text(name).map(str::to_string));
/// ```
macro_rules! with_read {
    ($arc_rwlock:expr, $closure:expr) => {{
        let guard = $arc_rwlock.read().expect("Failed to acquire read lock");
        $closure(&*guard)
    }};
}
