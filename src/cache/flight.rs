//! Stampede guard.
//!
//! Collapses concurrent misses for one key into a single fetch. The first
//! caller registers a shared future; later callers for the same key await that
//! future instead of starting their own. The registry only holds a weak
//! handle, so a fetch whose callers have all gone away is dropped and its
//! registration released.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared, WeakShared};
use metrics::{counter, gauge};
use serde_json::Value;
use tracing::debug;

use super::error::CacheError;
use super::keys::CacheKey;

pub(crate) const METRIC_FETCH_COALESCED: &str = "stockpile_cache_fetch_coalesced_total";
pub(crate) const METRIC_IN_FLIGHT: &str = "stockpile_cache_in_flight";

pub type FlightResult = Result<Value, CacheError>;

type SharedFlight = Shared<BoxFuture<'static, FlightResult>>;

struct Registration {
    id: u64,
    flight: Option<WeakShared<BoxFuture<'static, FlightResult>>>,
}

type Registry = DashMap<CacheKey, Registration>;

/// Process-wide registry of in-flight fetches, keyed by cache key.
#[derive(Clone, Default)]
pub struct InFlightFetches {
    flights: Arc<Registry>,
    next_id: Arc<AtomicU64>,
}

impl InFlightFetches {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `work` for `key` unless a fetch for the same key is already
    /// outstanding, in which case wait for that one. Every caller observes
    /// the same outcome, failures included.
    pub async fn run_exclusive<W>(&self, key: CacheKey, work: W) -> FlightResult
    where
        W: Future<Output = FlightResult> + Send + 'static,
    {
        use dashmap::mapref::entry::Entry;

        let flight = match self.flights.entry(key.clone()) {
            Entry::Occupied(mut occupied) => {
                let running = occupied
                    .get()
                    .flight
                    .as_ref()
                    .and_then(WeakShared::upgrade);
                match running {
                    Some(flight) => {
                        counter!(METRIC_FETCH_COALESCED).increment(1);
                        debug!(%key, "joining in-flight fetch");
                        flight
                    }
                    None => {
                        let (registration, flight) = self.start(key, work);
                        occupied.insert(registration);
                        flight
                    }
                }
            }
            Entry::Vacant(vacant) => {
                let (registration, flight) = self.start(key, work);
                vacant.insert(registration);
                flight
            }
        };

        flight.await
    }

    fn start<W>(&self, key: CacheKey, work: W) -> (Registration, SharedFlight)
    where
        W: Future<Output = FlightResult> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        gauge!(METRIC_IN_FLIGHT).increment(1.0);
        let guard = FlightGuard {
            id,
            key,
            flights: Arc::clone(&self.flights),
        };
        let flight = async move {
            let _guard = guard;
            work.await
        }
        .boxed()
        .shared();
        let registration = Registration {
            id,
            flight: flight.downgrade(),
        };
        (registration, flight)
    }

    /// Number of keys with an outstanding fetch.
    pub fn in_flight(&self) -> usize {
        self.flights.len()
    }
}

/// Removes the registration when the shared future finishes or is dropped.
/// A newer registration for the same key is left alone.
struct FlightGuard {
    id: u64,
    key: CacheKey,
    flights: Arc<Registry>,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        gauge!(METRIC_IN_FLIGHT).decrement(1.0);
        self.flights
            .remove_if(&self.key, |_, registration| registration.id == self.id);
    }
}
