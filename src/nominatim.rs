use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use tracing::trace;

use crate::config::EngineConfig;
use crate::errors::{AppError, AppResult};
use crate::records::PlaceComponents;
use crate::resolver::{ResolveError, ReverseGeocode};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Reverse-geocoding client for Nominatim and Nominatim-compatible hosts.
#[derive(Debug)]
pub struct NominatimClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: Option<SecretString>,
}

impl NominatimClient {
    /// Builds the client, or fails when no user agent is configured.
    /// Nominatim's usage policy requires an identifying user agent, so a
    /// missing one is resolver misconfiguration and fails the run before
    /// any processing starts.
    pub fn new(config: &EngineConfig) -> AppResult<Self> {
        let user_agent = config.geocoder_user_agent.as_deref().ok_or_else(|| {
            AppError::Config(
                "GEOCODER_USER_AGENT is required by the Nominatim usage policy".into(),
            )
        })?;

        let http = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            http,
            endpoint: config.geocoder_endpoint.trim_end_matches('/').to_string(),
            api_key: config.geocoder_api_key.clone(),
        })
    }
}

#[async_trait]
impl ReverseGeocode for NominatimClient {
    async fn reverse(&self, lat: f64, lon: f64) -> Result<PlaceComponents, ResolveError> {
        #[derive(serde::Deserialize)]
        struct Response {
            address: Option<Address>,
        }

        #[derive(serde::Deserialize)]
        struct Address {
            city: Option<String>,
            town: Option<String>,
            village: Option<String>,
            country: Option<String>,
        }

        let lat_text = lat.to_string();
        let lon_text = lon.to_string();
        let mut query = vec![
            ("lat", lat_text.as_str()),
            ("lon", lon_text.as_str()),
            ("format", "jsonv2"),
        ];
        let key;
        if let Some(api_key) = &self.api_key {
            key = api_key.expose_secret().to_string();
            query.push(("key", key.as_str()));
        }

        let response = self
            .http
            .get(format!("{}/reverse", self.endpoint))
            .query(&query)
            .send()
            .await
            .map_err(classify_request_error)?;

        let status = response.status();
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(ResolveError::Transient(format!(
                "reverse geocode returned {status}"
            )));
        }
        if !status.is_success() {
            return Err(ResolveError::Permanent(format!(
                "reverse geocode returned {status}"
            )));
        }

        let parsed: Response = response
            .json()
            .await
            .map_err(|err| ResolveError::Permanent(format!("undecodable response: {err}")))?;

        let place = match parsed.address {
            Some(address) => PlaceComponents {
                city: address.city.or(address.town).or(address.village),
                country: address.country,
            },
            None => PlaceComponents::default(),
        };
        trace!(lat, lon, ?place, "reverse geocode response");
        Ok(place)
    }
}

fn classify_request_error(err: reqwest::Error) -> ResolveError {
    if err.is_timeout() || err.is_connect() {
        ResolveError::Transient(err.to_string())
    } else {
        ResolveError::Permanent(err.to_string())
    }
}
