pub mod aggregate;
pub mod cache;
pub mod config;
pub mod engine;
pub mod errors;
pub mod nominatim;
pub mod quantize;
pub mod records;
pub mod resolver;
pub mod summary;

use once_cell::sync::OnceCell;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub use aggregate::FolderAggregator;
pub use cache::{CacheLookup, GeocodeCache, LookupSource};
pub use config::EngineConfig;
pub use engine::{Engine, Progress, ProgressObserver, RunReport, RunStats};
pub use errors::{AppError, AppResult};
pub use nominatim::NominatimClient;
pub use quantize::{quantize, QuantizedKey, MAX_PRECISION, MIN_PRECISION};
pub use records::{ImageRecord, PlaceComponents, VisitEntry, UNKNOWN_LABEL};
pub use resolver::{
    Backoff, RateLimiter, ResolveError, ResolveReport, RetryClassifier, RetryPolicy,
    RetryingResolver, ReverseGeocode,
};
pub use summary::{summarize, CityStats, CountryStats};

pub fn init_tracing() {
    static INIT: OnceCell<()> = OnceCell::new();
    let _ = INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info,travelogue=debug"));
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    });
}
