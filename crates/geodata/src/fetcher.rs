use std::collections::BTreeMap;

use futures_util::StreamExt;
use futures_util::stream::FuturesUnordered;
use runtime::{Debouncer, Generation, Metrics, Request};
use tokio::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::backend::BoxFuture;
use crate::cache::BoundedCache;
use crate::error::BackendError;
use crate::key::CacheKey;

pub const CACHE_HIT: &str = "cache_hit";
pub const CACHE_MISS: &str = "cache_miss";
pub const NETWORK_CALL: &str = "network_call";
pub const COALESCED: &str = "coalesced";
pub const STALE_DISCARDED: &str = "stale_discarded";
pub const FETCH_FAILED: &str = "fetch_failed";
pub const CACHE_ENTRIES: &str = "cache_entries";

/// One kind of data a `ViewportFetcher` can serve.
pub trait FetchKind {
    type Query: Send + 'static;
    type Output: Clone + Send + 'static;

    /// Used in logs.
    const NAME: &'static str;

    /// Cache key for `query`, or `None` when the query is empty for this
    /// kind and must not reach the network.
    fn cache_key(&self, query: &Self::Query) -> Option<CacheKey>;

    fn fetch(&self, query: Self::Query) -> BoxFuture<'static, Result<Self::Output, BackendError>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Cache,
    Network,
}

/// What a fetcher hands back to its caller.
///
/// Superseded responses never become a `Delivery`.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery<T> {
    Ready { value: T, origin: Origin },
    /// The query was empty; nothing was fetched.
    Empty,
    Failed(BackendError),
}

impl<T> Delivery<T> {
    pub fn value(&self) -> Option<&T> {
        match self {
            Delivery::Ready { value, .. } => Some(value),
            _ => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Delivery::Failed(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRequest {
    pub key: CacheKey,
    pub generation: u64,
}

type InFlight<T> = BoxFuture<'static, (Request, Result<T, BackendError>)>;

/// Cache, debounce and generation bookkeeping for one data kind.
///
/// Cache hits and empty queries are answered synchronously by `request`.
/// Misses are debounced; `next_delivery` drives the debounce timer and the
/// in-flight reads and returns the next result that is still current.
pub struct ViewportFetcher<K: FetchKind> {
    kind: K,
    cache: BoundedCache<CacheKey, K::Output>,
    debouncer: Debouncer<(CacheKey, K::Query)>,
    generation: Generation,
    outstanding: BTreeMap<Request, PendingRequest>,
    in_flight: FuturesUnordered<InFlight<K::Output>>,
    metrics: Metrics,
}

impl<K: FetchKind> ViewportFetcher<K> {
    pub fn new(kind: K, quiet_period: Duration, max_entries: usize) -> Self {
        Self {
            kind,
            cache: BoundedCache::new(max_entries),
            debouncer: Debouncer::new(quiet_period),
            generation: Generation::new(),
            outstanding: BTreeMap::new(),
            in_flight: FuturesUnordered::new(),
            metrics: Metrics::new(),
        }
    }

    /// Handles a new query.
    ///
    /// Returns a delivery immediately for cache hits and empty queries.
    /// Returns `None` when the query was handed to the debouncer; its result
    /// arrives through `next_delivery`.
    pub fn request(&mut self, query: K::Query) -> Option<Delivery<K::Output>> {
        let Some(key) = self.kind.cache_key(&query) else {
            self.supersede();
            debug!(kind = K::NAME, "empty query");
            return Some(Delivery::Empty);
        };

        if let Some(value) = self.cache.get(&key) {
            let value = value.clone();
            self.supersede();
            self.metrics.inc(CACHE_HIT);
            debug!(kind = K::NAME, key = %key, "cache hit");
            return Some(Delivery::Ready {
                value,
                origin: Origin::Cache,
            });
        }

        self.metrics.inc(CACHE_MISS);
        self.debouncer.trigger((key, query), Instant::now());
        None
    }

    /// Drops any pending debounce and invalidates outstanding reads.
    ///
    /// Returns `true` if a debounce was pending. Safe to call repeatedly.
    pub fn cancel(&mut self) -> bool {
        let was_pending = self.debouncer.cancel();
        self.generation.advance();
        was_pending
    }

    fn supersede(&mut self) {
        self.debouncer.cancel();
        self.generation.advance();
    }

    /// Starts the network read for a debounced query.
    ///
    /// A read already outstanding for the same key is adopted by the new
    /// generation instead of issuing a second one.
    pub fn fire(&mut self, key: CacheKey, query: K::Query) -> Request {
        let generation = self.generation.advance();

        if let Some((req, pending)) = self.outstanding.iter_mut().find(|(_, p)| p.key == key) {
            pending.generation = generation;
            self.metrics.inc(COALESCED);
            debug!(kind = K::NAME, key = %key, generation, "coalesced with outstanding read");
            return *req;
        }

        let req = self.generation.next_request();
        debug!(kind = K::NAME, key = %key, generation, "debounce fired");
        self.outstanding.insert(req, PendingRequest { key, generation });
        self.metrics.inc(NETWORK_CALL);

        let read = self.kind.fetch(query);
        self.in_flight.push(Box::pin(async move { (req, read.await) }));
        req
    }

    /// Applies the result of a finished read.
    ///
    /// Returns `None` for unknown requests and for results whose generation
    /// has been superseded; those are neither cached nor delivered.
    pub fn complete(
        &mut self,
        req: Request,
        result: Result<K::Output, BackendError>,
    ) -> Option<Delivery<K::Output>> {
        let pending = self.outstanding.remove(&req)?;
        if !self.generation.is_current(pending.generation) {
            self.metrics.inc(STALE_DISCARDED);
            debug!(
                kind = K::NAME,
                key = %pending.key,
                generation = pending.generation,
                current = self.generation.current(),
                "discarding stale result"
            );
            return None;
        }

        match result {
            Ok(value) => {
                let evicted = self.cache.put(pending.key, value.clone());
                if !evicted.is_empty() {
                    debug!(kind = K::NAME, evicted = evicted.len(), "cache eviction");
                }
                self.metrics
                    .set_gauge(CACHE_ENTRIES, self.cache.len() as i64);
                Some(Delivery::Ready {
                    value,
                    origin: Origin::Network,
                })
            }
            Err(err) => {
                self.metrics.inc(FETCH_FAILED);
                warn!(kind = K::NAME, key = %pending.key, error = %err, "fetch failed");
                Some(Delivery::Failed(err))
            }
        }
    }

    /// Waits for the next current result.
    ///
    /// Drives the debounce timer and every in-flight read. Cancel-safe.
    /// Pends forever while nothing is pending or in flight.
    pub async fn next_delivery(&mut self) -> Delivery<K::Output> {
        loop {
            tokio::select! {
                (key, query) = self.debouncer.fired() => {
                    self.fire(key, query);
                }
                Some((req, result)) = self.in_flight.next(), if !self.in_flight.is_empty() => {
                    if let Some(delivery) = self.complete(req, result) {
                        return delivery;
                    }
                }
            }
        }
    }

    /// True while a debounce is pending or the current generation awaits a read.
    pub fn is_loading(&self) -> bool {
        self.debouncer.is_pending()
            || self
                .outstanding
                .values()
                .any(|p| self.generation.is_current(p.generation))
    }

    pub fn cache(&self) -> &BoundedCache<CacheKey, K::Output> {
        &self.cache
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn kind(&self) -> &K {
        &self.kind
    }
}
