use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use reqwest::Url;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Payload of a cached read together with the token used to revalidate it.
#[derive(Debug, Clone)]
pub struct CachedResponse {
    pub payload: Arc<[u8]>,
    pub validation_token: String,
    pub inserted_at: Instant,
    generation: u64,
}

impl CachedResponse {
    pub fn age(&self) -> Duration {
        self.inserted_at.elapsed()
    }
}

#[derive(Debug, Clone)]
enum Slot {
    Cached(CachedResponse),
    // Left behind by an invalidation while reads of the key are in flight,
    // so that reads issued before it cannot store their payload afterwards.
    Invalidated { generation: u64 },
}

impl Slot {
    fn generation(&self) -> u64 {
        match self {
            Slot::Cached(entry) => entry.generation,
            Slot::Invalidated { generation } => *generation,
        }
    }
}

/// Cache of read responses keyed by normalized request path.
///
/// Entries never expire on their own; staleness is settled by revalidating
/// with the server. An entry is only replaced by a response whose request was
/// issued later, or removed by `invalidate`.
#[derive(Debug)]
pub struct ResponseCache {
    entries: DashMap<String, Slot>,
    // reads per key that may still store a response
    pending: DashMap<String, usize>,
    next_generation: AtomicU64,
    enabled: bool,
}

/// A read that may store its response once it arrives.
///
/// The generation is taken when the read is registered, before its request is
/// sent. While any read of a key is registered, invalidating that key leaves
/// a tombstone behind; the last read to finish clears it.
#[derive(Debug)]
pub struct PendingRead {
    cache: Arc<ResponseCache>,
    key: String,
    generation: u64,
}

impl PendingRead {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Stores the payload unless a newer response or invalidation holds the key.
    pub fn put(&self, payload: &[u8], validation_token: &str) -> bool {
        self.cache
            .store(&self.key, payload, validation_token, self.generation)
    }

    pub fn touch(&self, validation_token: &str) {
        self.cache.touch(&self.key, validation_token);
    }
}

impl Drop for PendingRead {
    fn drop(&mut self) {
        self.cache.finish_read(&self.key);
    }
}

impl ResponseCache {
    pub fn new(enabled: bool) -> Self {
        ResponseCache {
            entries: DashMap::new(),
            pending: DashMap::new(),
            next_generation: AtomicU64::new(1),
            enabled,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Registers a read of `key` about to be sent and stamps it with a
    /// generation ordering it against later writes of the same key.
    pub fn begin_read(self: &Arc<Self>, key: &str) -> PendingRead {
        *self.pending.entry(key.to_string()).or_insert(0) += 1;
        PendingRead {
            cache: Arc::clone(self),
            key: key.to_string(),
            generation: self.next_generation(),
        }
    }

    fn next_generation(&self) -> u64 {
        self.next_generation.fetch_add(1, Ordering::SeqCst)
    }

    pub fn get(&self, key: &str) -> Option<CachedResponse> {
        if !self.enabled {
            return None;
        }
        match self.entries.get(key)?.value() {
            Slot::Cached(entry) => Some(entry.clone()),
            Slot::Invalidated { .. } => None,
        }
    }

    fn store(&self, key: &str, payload: &[u8], validation_token: &str, generation: u64) -> bool {
        if !self.enabled {
            return false;
        }
        let entry = CachedResponse {
            payload: Arc::from(payload),
            validation_token: validation_token.to_string(),
            inserted_at: Instant::now(),
            generation,
        };
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().generation() >= generation {
                    debug!(key, generation, "skipping cache store from an older request");
                    return false;
                }
                occupied.insert(Slot::Cached(entry));
                true
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Slot::Cached(entry));
                true
            }
        }
    }

    /// Re-stamps the insertion time after the server confirmed the entry is
    /// still current.
    pub fn touch(&self, key: &str, validation_token: &str) {
        if let Some(mut slot) = self.entries.get_mut(key) {
            if let Slot::Cached(entry) = slot.value_mut() {
                if entry.validation_token == validation_token {
                    entry.inserted_at = Instant::now();
                }
            }
        }
    }

    pub fn invalidate(&self, key: &str) {
        if !self.enabled {
            return;
        }
        let generation = self.next_generation();
        // lock order: pending before entries, as in finish_read
        let reads_in_flight = self.pending.get(key);
        if reads_in_flight.is_some() {
            self.entries
                .insert(key.to_string(), Slot::Invalidated { generation });
        } else {
            self.entries.remove(key);
        }
        drop(reads_in_flight);
        debug!(key, "invalidated cached response");
    }

    fn finish_read(&self, key: &str) {
        if let Entry::Occupied(mut pending) = self.pending.entry(key.to_string()) {
            *pending.get_mut() -= 1;
            if *pending.get() == 0 {
                pending.remove();
                self.entries
                    .remove_if(key, |_, slot| matches!(slot, Slot::Invalidated { .. }));
            }
        }
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.entries
            .iter()
            .filter(|slot| matches!(slot.value(), Slot::Cached(_)))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Live entries plus tombstones.
    #[cfg(test)]
    pub(crate) fn slot_count(&self) -> usize {
        self.entries.len()
    }
}

/// Key of a request: its path and query, with the query pairs sorted so that
/// the same resource maps to one entry whichever node serves it.
pub fn normalize_key(request_url: &str) -> String {
    let url = match Url::parse(request_url) {
        Ok(url) => url,
        Err(_) => return request_url.to_string(),
    };

    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    pairs.sort();

    let mut key = url.path().to_string();
    if !pairs.is_empty() {
        let query: Vec<String> = pairs
            .into_iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        key.push('?');
        key.push_str(&query.join("&"));
    }
    key
}
