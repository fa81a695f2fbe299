use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::Instant;
use tracing::trace;

use crate::quantize::{quantize, QuantizedKey};
use crate::records::PlaceComponents;
use crate::resolver::{ResolveReport, RetryingResolver};

/// Where a lookup's place came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupSource {
    Cache,
    Resolver,
}

/// Result of one cache lookup. `report` is empty on a hit; on a miss it is
/// whatever the retry wrapper produced.
#[derive(Debug)]
pub struct CacheLookup {
    pub place: Option<PlaceComponents>,
    pub source: LookupSource,
    pub report: ResolveReport,
}

enum Slot {
    Unresolved,
    Resolved(Option<PlaceComponents>),
}

/// Run-scoped memo of quantized coordinate → place. At most one resolver
/// call is ever issued per distinct key, including when lookups for the
/// same key run concurrently: each key owns an async mutex, so the second
/// waiter blocks until the first call finishes and then reads its result.
///
/// A failed resolution is cached as "no place" and is not retried within
/// the run; this bounds resolver call volume at one call per cell.
pub struct GeocodeCache {
    precision: u8,
    slots: Mutex<HashMap<QuantizedKey, Arc<AsyncMutex<Slot>>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl GeocodeCache {
    pub fn new(precision: u8) -> Self {
        Self {
            precision,
            slots: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub async fn get_or_resolve(
        &self,
        lat: f64,
        lon: f64,
        resolver: &RetryingResolver,
        deadline: Option<Instant>,
    ) -> CacheLookup {
        let key = quantize(lat, lon, self.precision);
        let slot = {
            let mut slots = self.slots.lock();
            Arc::clone(
                slots
                    .entry(key)
                    .or_insert_with(|| Arc::new(AsyncMutex::new(Slot::Unresolved))),
            )
        };

        let mut guard = slot.lock().await;
        if let Slot::Resolved(place) = &*guard {
            self.hits.fetch_add(1, Ordering::SeqCst);
            trace!(?key, "geocode cache hit");
            return CacheLookup {
                place: place.clone(),
                source: LookupSource::Cache,
                report: ResolveReport::default(),
            };
        }

        self.misses.fetch_add(1, Ordering::SeqCst);
        let report = resolver.resolve(lat, lon, deadline).await;
        *guard = Slot::Resolved(report.place.clone());
        CacheLookup {
            place: report.place.clone(),
            source: LookupSource::Resolver,
            report,
        }
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::SeqCst)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }
}
