use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize, Serializer};

/// Label emitted at the output boundary for any absent date, time, city or
/// country. Internally absence is an `Option`; the literal only appears in
/// serialized output and in the sort labels derived from it.
pub const UNKNOWN_LABEL: &str = "Unknown";

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%H:%M:%S";

/// Raw per-file facts produced by the external metadata reader.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageRecord {
    pub file_id: String,
    pub folder: String,
    pub timestamp: Option<NaiveDateTime>,
    pub coordinates: Option<(f64, f64)>,
}

/// Place names returned by a reverse-geocoding resolver. A value with
/// neither component is treated as unresolved and dropped from aggregation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceComponents {
    pub city: Option<String>,
    pub country: Option<String>,
}

impl PlaceComponents {
    pub fn new(city: impl Into<String>, country: impl Into<String>) -> Self {
        Self {
            city: Some(city.into()),
            country: Some(country.into()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.city.is_none() && self.country.is_none()
    }
}

/// One deduplicated observation: a (date, city) pair within a folder,
/// carrying the earliest-timestamped image that produced it.
#[derive(Debug, Clone, Serialize)]
pub struct VisitEntry {
    pub file_id: String,
    #[serde(serialize_with = "serialize_date")]
    pub date: Option<NaiveDate>,
    #[serde(serialize_with = "serialize_time")]
    pub time: Option<NaiveTime>,
    #[serde(serialize_with = "serialize_label")]
    pub city: Option<String>,
    #[serde(serialize_with = "serialize_label")]
    pub country: Option<String>,
    pub coordinates: Option<(f64, f64)>,
}

impl VisitEntry {
    pub fn date_label(&self) -> String {
        self.date
            .map(|d| d.format(DATE_FORMAT).to_string())
            .unwrap_or_else(|| UNKNOWN_LABEL.to_string())
    }

    pub fn time_label(&self) -> String {
        self.time
            .map(|t| t.format(TIME_FORMAT).to_string())
            .unwrap_or_else(|| UNKNOWN_LABEL.to_string())
    }

    pub fn city_label(&self) -> &str {
        self.city.as_deref().unwrap_or(UNKNOWN_LABEL)
    }

    pub fn country_label(&self) -> &str {
        self.country.as_deref().unwrap_or(UNKNOWN_LABEL)
    }
}

fn serialize_date<S: Serializer>(value: &Option<NaiveDate>, serializer: S) -> Result<S::Ok, S::Error> {
    match value {
        Some(date) => serializer.serialize_str(&date.format(DATE_FORMAT).to_string()),
        None => serializer.serialize_str(UNKNOWN_LABEL),
    }
}

fn serialize_time<S: Serializer>(value: &Option<NaiveTime>, serializer: S) -> Result<S::Ok, S::Error> {
    match value {
        Some(time) => serializer.serialize_str(&time.format(TIME_FORMAT).to_string()),
        None => serializer.serialize_str(UNKNOWN_LABEL),
    }
}

fn serialize_label<S: Serializer>(value: &Option<String>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(value.as_deref().unwrap_or(UNKNOWN_LABEL))
}
