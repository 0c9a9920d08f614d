use super::models::ids::{MGNum, MolNum};
use std::cmp::Ordering as CmpOrdering;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError, Weak};
use uuid::Uuid;

const PRUNE_INTERVAL: usize = 1024;

/// A shared, thread-safe monotonic counter.
///
/// Cloning an `Incremint` shares the underlying stream, so every clone mints
/// values that no other clone will ever return.
#[derive(Debug, Clone)]
pub struct Incremint(Arc<AtomicU64>);

impl Incremint {
    pub fn new(start: u64) -> Self {
        Self(Arc::new(AtomicU64::new(start)))
    }

    /// Returns a value strictly greater than every value previously returned
    /// by this stream.
    pub fn increment(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn current(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }

    pub fn shares_stream_with(&self, other: &Incremint) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Default for Incremint {
    fn default() -> Self {
        Self::new(0)
    }
}

/// A `(major, minor)` version stamp.
///
/// Major increments mark structural change and restart the minor stream;
/// minor increments mark content change. Copies of a stamp share both
/// streams, so two copies that diverge never arrive at the same stamp.
#[derive(Debug, Clone)]
pub struct Version {
    major: u64,
    minor: u64,
    major_counter: Incremint,
    minor_counter: Incremint,
}

impl Version {
    /// A version with its own private major stream.
    pub fn new() -> Self {
        Self::from_counter(Incremint::new(0))
    }

    fn from_counter(major_counter: Incremint) -> Self {
        let major = major_counter.increment();
        Self {
            major,
            minor: 0,
            major_counter,
            minor_counter: Incremint::new(0),
        }
    }

    pub fn major(&self) -> u64 {
        self.major
    }

    pub fn minor(&self) -> u64 {
        self.minor
    }

    pub fn increment_major(&mut self) {
        self.major = self.major_counter.increment();
        self.minor_counter = Incremint::new(0);
        self.minor = 0;
    }

    pub fn increment_minor(&mut self) {
        self.minor = self.minor_counter.increment();
    }
}

impl Default for Version {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.major == other.major && self.minor == other.minor
    }
}

impl Eq for Version {}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        (self.major, self.minor).cmp(&(other.major, other.minor))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// The identity a version stream is registered under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VersionKey {
    Uid(Uuid),
    Molecule(MolNum),
    Group(MGNum),
}

impl From<Uuid> for VersionKey {
    fn from(value: Uuid) -> Self {
        Self::Uid(value)
    }
}

impl From<MolNum> for VersionKey {
    fn from(value: MolNum) -> Self {
        Self::Molecule(value)
    }
}

impl From<MGNum> for VersionKey {
    fn from(value: MGNum) -> Self {
        Self::Group(value)
    }
}

/// Process-wide issuer of version stamps.
///
/// Every object registered under the same key mints its major versions from
/// one shared stream, so independently constructed objects with the same
/// identity never share a stamp while any of them is alive. Streams are held
/// weakly; a stream is reclaimed once no live object uses it.
#[derive(Debug, Default)]
pub struct VersionRegistry {
    streams: Mutex<HashMap<VersionKey, Weak<AtomicU64>>>,
}

impl VersionRegistry {
    pub fn global() -> &'static VersionRegistry {
        static REGISTRY: OnceLock<VersionRegistry> = OnceLock::new();
        REGISTRY.get_or_init(VersionRegistry::default)
    }

    pub fn register(&self, key: impl Into<VersionKey>) -> Version {
        let key = key.into();
        let mut streams = self.streams.lock().unwrap_or_else(PoisonError::into_inner);

        let counter = match streams.get(&key).and_then(Weak::upgrade) {
            Some(stream) => Incremint(stream),
            None => {
                let counter = Incremint::new(0);
                streams.insert(key, Arc::downgrade(&counter.0));
                if streams.len() % PRUNE_INTERVAL == 0 {
                    streams.retain(|_, stream| stream.strong_count() > 0);
                }
                counter
            }
        };

        Version::from_counter(counter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn incremint_is_strictly_increasing_across_clones() {
        let a = Incremint::new(0);
        let b = a.clone();
        assert_eq!(a.increment(), 1);
        assert_eq!(b.increment(), 2);
        assert_eq!(a.increment(), 3);
        assert!(a.shares_stream_with(&b));
        assert!(!a.shares_stream_with(&Incremint::new(0)));
    }

    #[test]
    fn incremint_is_safe_under_concurrent_increments() {
        let counter = Incremint::new(0);
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let counter = counter.clone();
                thread::spawn(move || (0..250).map(|_| counter.increment()).collect::<Vec<_>>())
            })
            .collect();

        let mut seen: Vec<u64> = handles
            .into_iter()
            .flat_map(|h| h.join().expect("worker panicked"))
            .collect();
        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen.len(), 1000);
        assert_eq!(counter.current(), 1000);
    }

    #[test]
    fn diverging_copies_never_share_a_version() {
        let mut a = Version::new();
        let mut b = a.clone();
        assert_eq!(a, b);

        a.increment_minor();
        b.increment_minor();
        assert_ne!(a, b);

        let mut c = a.clone();
        a.increment_major();
        c.increment_major();
        assert_ne!(a, c);
        assert_eq!(a.minor(), 0);
    }

    #[test]
    fn version_ordering_is_lexicographic() {
        let mut v = Version::new();
        let start = v.clone();
        v.increment_minor();
        assert!(v > start);
        let after_minor = v.clone();
        v.increment_major();
        assert!(v > after_minor);
        assert_eq!(v.to_string(), format!("{}.0", v.major()));
    }

    #[test]
    fn registry_shares_streams_per_key() {
        let registry = VersionRegistry::default();
        let uid = Uuid::new_v4();
        let first = registry.register(uid);
        let second = registry.register(uid);
        assert_ne!(first, second);
        assert!(second.major() > first.major());

        let other = registry.register(Uuid::new_v4());
        assert_eq!(other.major(), 1);
    }

    #[test]
    fn registry_reclaims_streams_of_dead_objects() {
        let registry = VersionRegistry::default();
        let key = MolNum::new(11);
        let first = registry.register(key);
        assert_eq!(first.major(), 1);
        drop(first);
        assert_eq!(registry.register(key).major(), 1);
    }
}
