use std::collections::HashMap;
use std::future::Future;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::{Arc, Mutex};

use crate::Result;

/// Which component produced a cacheable value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComponentKind {
    Script,
    Narration,
    Media,
}

impl ComponentKind {
    fn as_str(&self) -> &'static str {
        match self {
            ComponentKind::Script => "script",
            ComponentKind::Narration => "narration",
            ComponentKind::Media => "media",
        }
    }
}

/// Stable hash key identifying one cacheable external request
///
/// Built from the component kind plus normalized request parameters, so two
/// callers asking for "Arcade  Cabinet" and "arcade cabinet" share one entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint(u64);

impl Fingerprint {
    pub fn new(kind: ComponentKind, parts: &[&str]) -> Self {
        let mut hasher = DefaultHasher::new();
        kind.as_str().hash(&mut hasher);
        for part in parts {
            normalize(part).hash(&mut hasher);
        }
        Fingerprint(hasher.finish())
    }

    /// Derive a fresh fingerprint for a deliberate retry
    ///
    /// Failed entries are never reused automatically; folding an attempt
    /// counter into the hash gives the retry its own single-flight slot.
    pub fn with_attempt(self, attempt: u32) -> Self {
        let mut hasher = DefaultHasher::new();
        self.0.hash(&mut hasher);
        attempt.hash(&mut hasher);
        Fingerprint(hasher.finish())
    }
}

fn normalize(part: &str) -> String {
    part.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Run-scoped memoization with single-flight semantics
///
/// The first caller for a fingerprint owns the pending entry and runs the
/// producer; concurrent callers for the same fingerprint park on the entry's
/// async mutex and receive the stored outcome, success or failure alike.
/// Entries for different fingerprints race freely.
pub struct SegmentCache<V> {
    entries: Mutex<HashMap<Fingerprint, Arc<tokio::sync::Mutex<Option<Result<V>>>>>>,
}

impl<V: Clone> SegmentCache<V> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Get the cached value for `fingerprint`, producing it on first request
    pub async fn get_or_create<F, Fut>(&self, fingerprint: Fingerprint, producer: F) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>>,
    {
        let entry = {
            let mut entries = self.entries.lock().expect("cache map poisoned");
            entries
                .entry(fingerprint)
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(None)))
                .clone()
        };

        // Whoever takes the entry lock first becomes the producer; everyone
        // else queues here and wakes to find the slot filled.
        let mut slot = entry.lock().await;
        if let Some(result) = slot.as_ref() {
            return result.clone();
        }

        let result = producer().await;
        *slot = Some(result.clone());
        result
    }

    /// Number of fingerprints seen so far
    pub fn len(&self) -> usize {
        self.entries.lock().expect("cache map poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<V: Clone> Default for SegmentCache<V> {
    fn default() -> Self {
        Self::new()
    }
}
