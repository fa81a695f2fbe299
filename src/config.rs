use std::time::Duration;
use std::{env, io};

use secrecy::SecretString;
use tracing::debug;

use crate::errors::{AppError, AppResult};
use crate::quantize::{MAX_PRECISION, MIN_PRECISION};
use crate::resolver::{Backoff, RetryClassifier};

const DEFAULT_GEOCODER_ENDPOINT: &str = "https://nominatim.openstreetmap.org";
const DEFAULT_PRECISION: u8 = 1;
const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_RETRY_DELAY_MS: u64 = 2_000;
const DEFAULT_RATE_LIMIT_QPS: u32 = 1;

/// Engine configuration, loaded from the environment.
///
/// Each precision step changes the quantization cell size by roughly an
/// order of magnitude of ground distance: 0 ≈ 111 km, 1 ≈ 11 km,
/// 2 ≈ 1.1 km, and so on down to 7 ≈ 1.1 cm.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub precision: u8,
    pub max_attempts: u32,
    pub backoff: Backoff,
    pub retry_classifier: RetryClassifier,
    pub retry_jitter: Duration,
    pub rate_limit_qps: u32,
    pub run_timeout: Option<Duration>,
    pub geocoder_endpoint: String,
    pub geocoder_user_agent: Option<String>,
    pub geocoder_api_key: Option<SecretString>,
}

impl EngineConfig {
    pub fn from_env() -> AppResult<Self> {
        load_dotenv_if_applicable();
        let precision = parse_u8("GEOCODE_PRECISION", DEFAULT_PRECISION);
        if !(MIN_PRECISION..=MAX_PRECISION).contains(&precision) {
            return Err(AppError::Config(format!(
                "GEOCODE_PRECISION must be between {MIN_PRECISION} and {MAX_PRECISION}, got {precision}"
            )));
        }

        let delay = Duration::from_millis(parse_u64("GEOCODER_RETRY_DELAY_MS", DEFAULT_RETRY_DELAY_MS));
        let backoff = match env::var("GEOCODER_BACKOFF").as_deref() {
            Ok("linear") => Backoff::Linear(delay),
            Ok("exponential") => Backoff::Exponential {
                base: delay,
                cap: delay * 16,
            },
            Ok("fixed") | Err(_) => Backoff::Fixed(delay),
            Ok(other) => {
                return Err(AppError::Config(format!(
                    "invalid GEOCODER_BACKOFF: {other} (expected fixed, linear or exponential)"
                )))
            }
        };

        let retry_classifier = match env::var("GEOCODER_RETRY_CLASSIFIER").as_deref() {
            Ok("transient-only") => RetryClassifier::TransientOnly,
            Ok("all") | Err(_) => RetryClassifier::RetryAll,
            Ok(other) => {
                return Err(AppError::Config(format!(
                    "invalid GEOCODER_RETRY_CLASSIFIER: {other} (expected all or transient-only)"
                )))
            }
        };

        Ok(Self {
            precision,
            max_attempts: parse_u32("GEOCODER_MAX_ATTEMPTS", DEFAULT_MAX_ATTEMPTS).max(1),
            backoff,
            retry_classifier,
            retry_jitter: Duration::from_millis(parse_u64("GEOCODER_RETRY_JITTER_MS", 0)),
            rate_limit_qps: parse_u32("GEOCODER_RATE_LIMIT_QPS", DEFAULT_RATE_LIMIT_QPS).max(1),
            run_timeout: env::var("RUN_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs),
            geocoder_endpoint: env::var("GEOCODER_ENDPOINT")
                .unwrap_or_else(|_| DEFAULT_GEOCODER_ENDPOINT.to_string()),
            geocoder_user_agent: env::var("GEOCODER_USER_AGENT")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            geocoder_api_key: env::var("GEOCODER_API_KEY")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(SecretString::from),
        })
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            precision: DEFAULT_PRECISION,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: Backoff::Fixed(Duration::from_millis(DEFAULT_RETRY_DELAY_MS)),
            retry_classifier: RetryClassifier::RetryAll,
            retry_jitter: Duration::ZERO,
            rate_limit_qps: DEFAULT_RATE_LIMIT_QPS,
            run_timeout: None,
            geocoder_endpoint: DEFAULT_GEOCODER_ENDPOINT.to_string(),
            geocoder_user_agent: None,
            geocoder_api_key: None,
        }
    }
}

fn load_dotenv_if_applicable() {
    if !should_load_dotenv() {
        debug!("skipping .env load outside dev mode");
        return;
    }

    if let Err(err) = dotenvy::dotenv() {
        match &err {
            dotenvy::Error::Io(io_err) if io_err.kind() == io::ErrorKind::NotFound => {}
            _ => debug!(?err, "unable to load .env file"),
        }
    }
}

fn should_load_dotenv() -> bool {
    cfg!(debug_assertions) || parse_bool("ALLOW_DOTENV", false)
}

fn parse_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|v| matches!(v.trim(), "1" | "true" | "TRUE" | "True"))
        .unwrap_or(default)
}

fn parse_u8(key: &str, default: u8) -> u8 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<u8>().ok())
        .unwrap_or(default)
}

fn parse_u32(key: &str, default: u32) -> u32 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(default)
}

fn parse_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    // Both tests mutate process-wide environment variables.
    static ENV_LOCK: parking_lot::Mutex<()> = parking_lot::Mutex::new(());

    #[test]
    fn loads_defaults_and_overrides() {
        let _guard = ENV_LOCK.lock();
        env::remove_var("GEOCODER_BACKOFF");
        env::remove_var("GEOCODER_RETRY_CLASSIFIER");
        env::set_var("GEOCODE_PRECISION", "2");
        env::set_var("GEOCODER_MAX_ATTEMPTS", "5");
        env::set_var("GEOCODER_USER_AGENT", "travelogue tests");
        env::set_var("GEOCODER_API_KEY", "secret");

        let config = EngineConfig::from_env().unwrap();

        assert_eq!(config.precision, 2);
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.rate_limit_qps, DEFAULT_RATE_LIMIT_QPS);
        assert_eq!(config.geocoder_endpoint, DEFAULT_GEOCODER_ENDPOINT);
        assert_eq!(config.geocoder_user_agent.as_deref(), Some("travelogue tests"));
        assert!(config.geocoder_api_key.is_some());
        assert!(matches!(
            config.backoff,
            Backoff::Fixed(delay) if delay == Duration::from_millis(DEFAULT_RETRY_DELAY_MS)
        ));

        env::remove_var("GEOCODE_PRECISION");
        env::remove_var("GEOCODER_MAX_ATTEMPTS");
        env::remove_var("GEOCODER_USER_AGENT");
        env::remove_var("GEOCODER_API_KEY");
    }

    #[test]
    fn rejects_out_of_range_precision() {
        let _guard = ENV_LOCK.lock();
        env::set_var("GEOCODE_PRECISION", "9");

        let err = EngineConfig::from_env().unwrap_err();
        assert!(matches!(err, AppError::Config(_)));

        env::remove_var("GEOCODE_PRECISION");
    }
}
