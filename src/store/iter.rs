//! Lazy, one-shot scans over skip-list partitions.
//!
//! Scans are live views: a cursor holds no lock, and every step seeks the
//! successor of the last yielded key across the partitions it was opened over.
//! Keys come out strictly ascending and never repeat; inserts ahead of the
//! cursor are visible, values are whatever is current when the key is yielded.
//!
//! Each cursor holds a [`ScanGuard`] registered in the owning engine's
//! open-iterator counter. The guard and the partition handles are released
//! either when the scan is exhausted or when the iterator is dropped early.

use crossbeam_skiplist::SkipMap;
use std::ops::Bound;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};

use super::types::{Entry, Value};

/// Key of a windowed entry: `(record key, window start)`.
pub(crate) type WindowKey = (String, i64);

pub(crate) struct ScanGuard {
    open: Arc<AtomicUsize>,
}

impl ScanGuard {
    pub(crate) fn register(open: &Arc<AtomicUsize>) -> Self {
        open.fetch_add(1, Ordering::AcqRel);
        Self { open: open.clone() }
    }
}

impl Drop for ScanGuard {
    fn drop(&mut self) {
        self.open.fetch_sub(1, Ordering::AcqRel);
    }
}

pub(crate) struct Cursor<K, V> {
    sources: Vec<Arc<SkipMap<K, V>>>,
    lower: Bound<K>,
    upper: Bound<K>,
    guard: Option<ScanGuard>,
}

impl<K, V> Cursor<K, V>
where
    K: Ord + Clone,
    V: Clone,
{
    pub(crate) fn new(
        sources: Vec<Arc<SkipMap<K, V>>>,
        lower: Bound<K>,
        upper: Bound<K>,
        guard: ScanGuard,
    ) -> Self {
        Self {
            sources,
            lower,
            upper,
            guard: Some(guard),
        }
    }

    fn release(&mut self) {
        self.sources.clear();
        self.guard = None;
    }

    fn below_upper(&self, key: &K) -> bool {
        match &self.upper {
            Bound::Unbounded => true,
            Bound::Included(upper) => key <= upper,
            Bound::Excluded(upper) => key < upper,
        }
    }
}

impl<K, V> Iterator for Cursor<K, V>
where
    K: Ord + Clone,
    V: Clone,
{
    type Item = (K, V);

    fn next(&mut self) -> Option<Self::Item> {
        self.guard.as_ref()?;

        let mut best: Option<(K, V)> = None;
        for source in &self.sources {
            let Some(entry) = source.lower_bound(self.lower.as_ref()) else {
                continue;
            };
            if !self.below_upper(entry.key()) {
                continue;
            }
            let smaller = match &best {
                Some((key, _)) => entry.key() < key,
                None => true,
            };
            if smaller {
                best = Some((entry.key().clone(), entry.value().clone()));
            }
        }

        match best {
            Some((key, value)) => {
                self.lower = Bound::Excluded(key.clone());
                Some((key, value))
            }
            None => {
                self.release();
                None
            }
        }
    }
}

/// Stream-time clock of a windowed store.
///
/// A window is expired once `window_start <= stream_time - retention`. Before
/// the first record is observed nothing is expired.
#[derive(Clone)]
pub(crate) struct RetentionClock {
    inner: Arc<StreamTime>,
    retention_ms: i64,
}

struct StreamTime {
    max: AtomicI64,
    /// Set after the first `max` update, so a set flag implies a valid `max`.
    observed: AtomicBool,
}

impl RetentionClock {
    pub(crate) fn new(retention_ms: i64) -> Self {
        Self {
            inner: Arc::new(StreamTime {
                max: AtomicI64::new(i64::MIN),
                observed: AtomicBool::new(false),
            }),
            retention_ms,
        }
    }

    pub(crate) fn observe(&self, timestamp: i64) {
        self.inner.max.fetch_max(timestamp, Ordering::AcqRel);
        self.inner.observed.store(true, Ordering::Release);
    }

    pub(crate) fn stream_time(&self) -> Option<i64> {
        if !self.inner.observed.load(Ordering::Acquire) {
            return None;
        }
        Some(self.inner.max.load(Ordering::Acquire))
    }

    /// `None` until a record is observed, or while stream time is too close to
    /// `i64::MIN` for any window to be out of retention.
    pub(crate) fn cutoff(&self) -> Option<i64> {
        self.stream_time()?.checked_sub(self.retention_ms)
    }

    pub(crate) fn is_expired(&self, window_start: i64) -> bool {
        self.cutoff().is_some_and(|cutoff| window_start <= cutoff)
    }
}

enum EntrySource {
    Plain(Cursor<String, Value>),
    Windowed(Cursor<WindowKey, Value>, RetentionClock),
}

/// Iterator returned by `range` and `all`, ascending by key (then window start).
pub struct EntryIter {
    source: EntrySource,
}

impl EntryIter {
    pub(crate) fn plain(cursor: Cursor<String, Value>) -> Self {
        Self {
            source: EntrySource::Plain(cursor),
        }
    }

    pub(crate) fn windowed(cursor: Cursor<WindowKey, Value>, clock: RetentionClock) -> Self {
        Self {
            source: EntrySource::Windowed(cursor, clock),
        }
    }
}

impl Iterator for EntryIter {
    type Item = Entry;

    fn next(&mut self) -> Option<Entry> {
        match &mut self.source {
            EntrySource::Plain(cursor) => cursor
                .next()
                .map(|(key, value)| Entry::plain(key, value)),
            EntrySource::Windowed(cursor, clock) => loop {
                let ((key, start), value) = cursor.next()?;
                if !clock.is_expired(start) {
                    return Some(Entry::windowed(key, start, value));
                }
            },
        }
    }
}

/// Iterator returned by `fetch_window`: `(window start, value)` ascending.
pub struct WindowIter {
    cursor: Cursor<WindowKey, Value>,
    clock: RetentionClock,
}

impl WindowIter {
    pub(crate) fn new(cursor: Cursor<WindowKey, Value>, clock: RetentionClock) -> Self {
        Self { cursor, clock }
    }
}

impl Iterator for WindowIter {
    type Item = (i64, Value);

    fn next(&mut self) -> Option<(i64, Value)> {
        loop {
            let ((_, start), value) = self.cursor.next()?;
            if !self.clock.is_expired(start) {
                return Some((start, value));
            }
        }
    }
}
