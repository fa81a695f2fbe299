use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::aggregate::FolderAggregator;
use crate::cache::{GeocodeCache, LookupSource};
use crate::config::EngineConfig;
use crate::errors::AppResult;
use crate::nominatim::NominatimClient;
use crate::records::{ImageRecord, VisitEntry};
use crate::resolver::{RetryPolicy, RetryingResolver, ReverseGeocode};
use crate::summary::{summarize, CountryStats};

/// Run-scoped counters plus the accumulated failure messages. Failures
/// never abort the run; they end up here instead.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunStats {
    pub total_records: usize,
    pub without_gps: usize,
    pub resolved: usize,
    pub unresolved: usize,
    pub cache_hits: usize,
    pub resolver_calls: usize,
    pub retry_errors: usize,
    pub errors: Vec<String>,
}

/// Everything a run produces: the detailed per-folder itineraries, the
/// country/city digest, and the run statistics.
#[derive(Debug, Serialize)]
pub struct RunReport {
    pub folders: BTreeMap<String, Vec<VisitEntry>>,
    pub summary: Vec<CountryStats>,
    pub stats: RunStats,
}

#[derive(Debug, Clone, Copy)]
pub struct Progress {
    pub total: usize,
    pub processed: usize,
    pub resolved: usize,
}

pub type ProgressObserver = Arc<dyn Fn(Progress) + Send + Sync>;

/// The location-resolution and aggregation engine. Records flow strictly
/// forward: quantize → cache → resolver → folder aggregation → summary.
pub struct Engine {
    cache: GeocodeCache,
    resolver: RetryingResolver,
    config: EngineConfig,
}

impl Engine {
    /// Builds an engine over an injected resolver. Tests substitute fakes
    /// here and inspect call counts through them.
    pub fn new(config: EngineConfig, resolver: Arc<dyn ReverseGeocode>) -> Self {
        let policy = RetryPolicy::from_config(&config);
        Self {
            cache: GeocodeCache::new(config.precision),
            resolver: RetryingResolver::new(resolver, policy, config.rate_limit_qps),
            config,
        }
    }

    /// Builds an engine backed by the configured Nominatim host. This is
    /// the fail-fast point for resolver misconfiguration: it errors before
    /// any record is processed.
    pub fn from_config(config: EngineConfig) -> AppResult<Self> {
        let client = Arc::new(NominatimClient::new(&config)?);
        Ok(Self::new(config, client))
    }

    /// Processes records in discovery order and produces the run report.
    /// `observer` receives progress after every record; setting `cancel`
    /// stops after the current record and counts the rest as unresolved.
    pub async fn process(
        &self,
        records: Vec<ImageRecord>,
        observer: Option<ProgressObserver>,
        cancel: Option<Arc<AtomicBool>>,
    ) -> RunReport {
        let deadline = self.config.run_timeout.map(|limit| Instant::now() + limit);
        let total = records.len();
        let mut stats = RunStats {
            total_records: total,
            ..RunStats::default()
        };
        let mut aggregator = FolderAggregator::new();
        let mut processed = 0;

        for record in records {
            if let Some(flag) = &cancel {
                if flag.load(Ordering::SeqCst) {
                    debug!(processed, total, "run cancelled");
                    break;
                }
            }
            processed += 1;

            let Some((lat, lon)) = record.coordinates else {
                stats.without_gps += 1;
                self.notify(&observer, total, processed, stats.resolved);
                continue;
            };

            let lookup = self
                .cache
                .get_or_resolve(lat, lon, &self.resolver, deadline)
                .await;
            match lookup.source {
                LookupSource::Cache => stats.cache_hits += 1,
                LookupSource::Resolver => stats.resolver_calls += 1,
            }
            stats.retry_errors += lookup.report.errors.len();
            stats.errors.extend(lookup.report.errors);

            match &lookup.place {
                Some(place) if !place.is_empty() => {
                    aggregator.add(
                        &record.folder,
                        &record.file_id,
                        record.timestamp,
                        place,
                        record.coordinates,
                    );
                    stats.resolved += 1;
                }
                _ => {
                    warn!(file_id = %record.file_id, "record left unresolved");
                    stats.unresolved += 1;
                }
            }
            self.notify(&observer, total, processed, stats.resolved);
        }

        if processed < total {
            stats.unresolved += total - processed;
        }

        let folders = aggregator.finalize();
        let summary = summarize(&folders);
        RunReport {
            folders,
            summary,
            stats,
        }
    }

    fn notify(&self, observer: &Option<ProgressObserver>, total: usize, processed: usize, resolved: usize) {
        if let Some(callback) = observer {
            callback(Progress {
                total,
                processed,
                resolved,
            });
        }
    }

    pub fn cache(&self) -> &GeocodeCache {
        &self.cache
    }
}
