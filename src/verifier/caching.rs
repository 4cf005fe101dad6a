use crate::error::AuthError;
use crate::settings::{RealmSettings, SettingsError};
use crate::token::{fingerprint, TokenInfo};
use crate::verifier::TokenVerifier;
use lru::LruCache;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, RwLock, RwLockWriteGuard};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const DEFAULT_MAX_SIZE: usize = 20_000;
const DEFAULT_MAX_AGE: Duration = Duration::from_secs(300);

/// Decides whether a cached [`TokenInfo`] may still be served.
pub type ExpirationPredicate = Arc<dyn Fn(&TokenInfo) -> bool + Send + Sync>;

type LookupResult = Result<Option<TokenInfo>, AuthError>;

/// Bounds of the token-info cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheSettings {
    /// Maximum number of tokens kept; least recently used entries go first
    pub max_size: usize,
    /// Time-to-live measured from the write
    pub max_age: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_MAX_SIZE,
            max_age: DEFAULT_MAX_AGE,
        }
    }
}

impl CacheSettings {
    #[must_use]
    pub fn max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    #[must_use]
    pub fn max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    /// Reads `token-info.cache.max-size` and `token-info.cache.expire-in-seconds`.
    pub fn from_settings(settings: &RealmSettings) -> Result<Self, SettingsError> {
        const MAX_SIZE: &str = "token-info.cache.max-size";
        let max_size: usize = settings.get_parsed_or(MAX_SIZE, DEFAULT_MAX_SIZE)?;
        if max_size == 0 {
            return Err(SettingsError::invalid(MAX_SIZE, "0", "must be greater than 0"));
        }
        let max_age: u64 = settings
            .get_parsed_or("token-info.cache.expire-in-seconds", DEFAULT_MAX_AGE.as_secs())?;
        Ok(Self {
            max_size,
            max_age: Duration::from_secs(max_age),
        })
    }
}

/// Cache counters, a snapshot taken by [`CachingTokenVerifier::stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups answered from the cache
    pub hits: u64,
    /// Lookups that called the delegate verifier
    pub misses: u64,
    /// Lookups that waited on another caller's delegate call
    pub coalesced: u64,
    /// Entries dropped for capacity, age or expiry
    pub evictions: u64,
    /// Current number of entries
    pub size: usize,
    /// Maximum number of entries
    pub capacity: usize,
}

impl CacheStats {
    /// Hit rate as a percentage; coalesced lookups count as hits.
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let served = self.hits + self.coalesced;
        let total = served + self.misses;
        if total == 0 {
            0.0
        } else {
            (served as f64 / total as f64) * 100.0
        }
    }
}

struct CacheEntry {
    written: Instant,
    info: TokenInfo,
}

enum Lookup {
    Hit(TokenInfo),
    /// Cached, but the token itself has expired
    Expired,
    Miss,
}

/// One delegate call that other callers for the same token wait on.
#[derive(Default)]
struct InFlight {
    result: Mutex<Option<LookupResult>>,
    ready: Condvar,
}

impl InFlight {
    fn complete(&self, result: LookupResult) {
        let mut slot = self.result.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_none() {
            *slot = Some(result);
        }
        self.ready.notify_all();
    }

    fn wait(&self) -> LookupResult {
        let mut slot = self.result.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if let Some(result) = slot.as_ref() {
                return result.clone();
            }
            slot = self
                .ready
                .wait(slot)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

/// Token-info cache in front of another [`TokenVerifier`].
///
/// - only successful lookups are stored; absence and errors always reach the
///   delegate again on the next call
/// - an entry older than [`CacheSettings::max_age`] is dropped and looked up
///   again
/// - the expiration predicate runs on every read, cached or fresh: an expired
///   token is dropped and reported absent
/// - concurrent misses for the same token share a single delegate call
///   whose result (value or error) is handed to every waiter
pub struct CachingTokenVerifier {
    delegate: Arc<dyn TokenVerifier>,
    settings: CacheSettings,
    is_expired: ExpirationPredicate,
    // RwLock, LruCache::get needs &mut for recency updates
    entries: RwLock<LruCache<Arc<str>, CacheEntry>>,
    in_flight: Mutex<HashMap<Arc<str>, Arc<InFlight>>>,
    hits: AtomicU64,
    misses: AtomicU64,
    coalesced: AtomicU64,
    evictions: AtomicU64,
}

impl CachingTokenVerifier {
    /// A `max_size` of 0 is raised to 1.
    pub fn new(delegate: Arc<dyn TokenVerifier>, settings: CacheSettings) -> Self {
        let capacity = NonZeroUsize::new(settings.max_size).unwrap_or(NonZeroUsize::MIN);
        Self {
            delegate,
            settings,
            is_expired: Arc::new(|info: &TokenInfo| info.is_expired()),
            entries: RwLock::new(LruCache::new(capacity)),
            in_flight: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            coalesced: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Replace the default [`TokenInfo::is_expired`] check.
    #[must_use]
    pub fn with_expiration_predicate(mut self, is_expired: ExpirationPredicate) -> Self {
        self.is_expired = is_expired;
        self
    }

    #[must_use]
    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    /// Drop every entry. Waiters on an in-flight call are not affected.
    pub fn invalidate_all(&self) {
        let mut entries = self.write_entries();
        let dropped = entries.len();
        entries.clear();
        info!(dropped, "token info cache invalidated");
    }

    /// Drop a single token; returns whether it was cached.
    pub fn invalidate(&self, token: &str) -> bool {
        self.write_entries().pop(token).is_some()
    }

    /// Remove entries that are too old or expired, returning how many went.
    pub fn purge_expired(&self) -> usize {
        let mut entries = self.write_entries();
        let stale: Vec<Arc<str>> = entries
            .iter()
            .filter(|(_, entry)| self.is_stale(entry))
            .map(|(token, _)| Arc::clone(token))
            .collect();
        for token in &stale {
            entries.pop(token);
        }
        self.evictions
            .fetch_add(stale.len() as u64, Ordering::Relaxed);
        if !stale.is_empty() {
            debug!(purged = stale.len(), "purged stale token info entries");
        }
        stale.len()
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let size = self
            .entries
            .read()
            .map(|entries| entries.len())
            .unwrap_or_default();
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            size,
            capacity: self.settings.max_size.max(1),
        }
    }

    fn write_entries(&self) -> RwLockWriteGuard<'_, LruCache<Arc<str>, CacheEntry>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_in_flight(&self) -> MutexGuard<'_, HashMap<Arc<str>, Arc<InFlight>>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_stale(&self, entry: &CacheEntry) -> bool {
        entry.written.elapsed() >= self.settings.max_age || (self.is_expired)(&entry.info)
    }

    fn lookup(&self, token: &str) -> Lookup {
        let mut entries = self.write_entries();
        let outcome = match entries.get(token) {
            None => return Lookup::Miss,
            Some(entry) if entry.written.elapsed() >= self.settings.max_age => Lookup::Miss,
            Some(entry) if (self.is_expired)(&entry.info) => Lookup::Expired,
            Some(entry) => return Lookup::Hit(entry.info.clone()),
        };
        entries.pop(token);
        self.evictions.fetch_add(1, Ordering::Relaxed);
        outcome
    }

    /// Answer from the cache, `None` on a miss.
    fn cached(&self, token: &str) -> Option<LookupResult> {
        let answer = match self.lookup(token) {
            Lookup::Miss => return None,
            Lookup::Hit(info) => Some(info),
            Lookup::Expired => {
                debug!(token = %fingerprint(token), "cached token info expired");
                None
            }
        };
        self.hits.fetch_add(1, Ordering::Relaxed);
        Some(Ok(answer))
    }

    fn store(&self, token: &Arc<str>, info: TokenInfo) {
        let entry = CacheEntry {
            written: Instant::now(),
            info,
        };
        let mut entries = self.write_entries();
        if let Some((evicted, _)) = entries.push(Arc::clone(token), entry) {
            if evicted != *token {
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

/// Completes the in-flight call even if the delegate panics, so that
/// waiters are never left blocked.
struct Leader<'a> {
    cache: &'a CachingTokenVerifier,
    token: Arc<str>,
    flight: Arc<InFlight>,
}

impl Leader<'_> {
    fn finish(&self, result: &LookupResult) {
        if let Ok(Some(info)) = result {
            self.cache.store(&self.token, info.clone());
        }
        // Stored before the in-flight entry goes: a caller that misses the
        // in-flight map from here on finds the cached value instead.
        self.release();
        self.flight.complete(result.clone());
    }

    // Only our own entry: a later leader for the same token may own the slot.
    fn release(&self) {
        let mut in_flight = self.cache.lock_in_flight();
        if in_flight
            .get(&self.token)
            .is_some_and(|current| Arc::ptr_eq(current, &self.flight))
        {
            in_flight.remove(&self.token);
        }
    }
}

impl Drop for Leader<'_> {
    fn drop(&mut self) {
        // No-op after finish(): complete() keeps the first result.
        self.release();
        self.flight.complete(Err(AuthError::transport(
            "token verification was interrupted",
        )));
    }
}

impl TokenVerifier for CachingTokenVerifier {
    fn token_info(&self, token: &str) -> Result<Option<TokenInfo>, AuthError> {
        if let Some(answer) = self.cached(token) {
            return answer;
        }

        let leader = {
            let mut in_flight = self.lock_in_flight();
            if let Some(flight) = in_flight.get(token) {
                let flight = Arc::clone(flight);
                drop(in_flight);
                self.coalesced.fetch_add(1, Ordering::Relaxed);
                debug!(token = %fingerprint(token), "waiting for in-flight token verification");
                return flight.wait();
            }
            // A leader may have finished between our cache miss and taking the lock.
            if let Some(answer) = self.cached(token) {
                return answer;
            }
            let token: Arc<str> = Arc::from(token);
            let flight = Arc::new(InFlight::default());
            in_flight.insert(Arc::clone(&token), Arc::clone(&flight));
            Leader {
                cache: self,
                token,
                flight,
            }
        };

        self.misses.fetch_add(1, Ordering::Relaxed);
        let result = match self.delegate.token_info(token) {
            Ok(Some(info)) if (self.is_expired)(&info) => {
                debug!(token = %fingerprint(token), "identity provider returned expired token info");
                Ok(None)
            }
            other => other,
        };
        match &result {
            Ok(Some(_)) => {}
            Ok(None) => debug!(token = %fingerprint(token), "token unknown, not cached"),
            Err(e) => warn!(
                token = %fingerprint(token),
                kind = e.kind(),
                error = %e,
                "token verification failed, not cached"
            ),
        }
        leader.finish(&result);
        result
    }
}
