//! Backend endpoint list with per-entry health state.

use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// One backend endpoint. An entry is healthy iff the clock has passed its
/// down-until timestamp; recovery needs no probe and no explicit re-enable.
#[derive(Debug)]
struct ServerEntry {
    url: String,
    down_until: Mutex<Option<Instant>>,
}

/// Ordered set of backend endpoints with round-robin selection.
#[derive(Debug, Default)]
pub struct ServerPool {
    entries: Vec<ServerEntry>,
    cursor: AtomicUsize,
}

impl ServerPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a backend endpoint, healthy by default.
    pub fn add_server(&mut self, url: impl Into<String>) {
        let url = url.into().trim_end_matches('/').to_string();
        self.entries.push(ServerEntry {
            url,
            down_until: Mutex::new(None),
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn url(&self, idx: usize) -> Option<&str> {
        self.entries.get(idx).map(|e| e.url.as_str())
    }

    pub fn is_healthy(&self, idx: usize) -> bool {
        self.entries.get(idx).is_some_and(|entry| {
            match *entry.down_until.lock() {
                Some(until) => Instant::now() >= until,
                None => true,
            }
        })
    }

    /// Next healthy entry not in the exclusion set, cycling round-robin
    /// from a shared cursor to spread load across calls.
    pub fn pick_healthy(&self, exclude: &HashSet<usize>) -> Option<usize> {
        let n = self.entries.len();
        if n == 0 {
            return None;
        }
        let start = self.cursor.fetch_add(1, Ordering::Relaxed) % n;
        (0..n)
            .map(|i| (start + i) % n)
            .find(|idx| !exclude.contains(idx) && self.is_healthy(*idx))
    }

    /// Exclude an entry from selection until `timeout` elapses.
    pub fn mark_down(&self, idx: usize, timeout: Duration) {
        if let Some(entry) = self.entries.get(idx) {
            *entry.down_until.lock() = Some(Instant::now() + timeout);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    fn pool(urls: &[&str]) -> ServerPool {
        let mut pool = ServerPool::new();
        for url in urls {
            pool.add_server(*url);
        }
        pool
    }

    #[test]
    fn round_robin_cycles_through_entries() {
        let pool = pool(&["http://a:8123", "http://b:8123", "http://c:8123"]);
        let none = HashSet::new();

        let picks: Vec<usize> = (0..6)
            .map(|_| pool.pick_healthy(&none).unwrap())
            .collect();
        assert_eq!(picks, vec![0, 1, 2, 0, 1, 2]);
    }

    #[test]
    fn excluded_entries_are_skipped() {
        let pool = pool(&["http://a:8123", "http://b:8123"]);
        let exclude: HashSet<usize> = [0].into();

        assert_eq!(pool.pick_healthy(&exclude), Some(1));
        let all: HashSet<usize> = [0, 1].into();
        assert_eq!(pool.pick_healthy(&all), None);
    }

    #[test]
    fn marked_down_entry_recovers_after_timeout() {
        let pool = pool(&["http://a:8123"]);
        let none = HashSet::new();

        pool.mark_down(0, Duration::from_millis(30));
        assert!(!pool.is_healthy(0));
        assert_eq!(pool.pick_healthy(&none), None);

        sleep(Duration::from_millis(40));
        assert!(pool.is_healthy(0));
        assert_eq!(pool.pick_healthy(&none), Some(0));
    }

    #[test]
    fn trailing_slash_is_trimmed() {
        let pool = pool(&["http://a:8123/"]);
        assert_eq!(pool.url(0), Some("http://a:8123"));
    }

    #[test]
    fn empty_pool_picks_nothing() {
        let pool = ServerPool::new();
        assert_eq!(pool.pick_healthy(&HashSet::new()), None);
    }
}
