use std::collections::{BTreeMap, HashMap};

use chrono::{NaiveDate, NaiveDateTime};
use tracing::trace;

use crate::records::{PlaceComponents, VisitEntry};

/// Dedup key within one folder: calendar date plus city. A missing city
/// collapses like the "Unknown" label, so two unresolved-city entries on
/// the same date still merge.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct VisitKey {
    date: Option<NaiveDate>,
    city: Option<String>,
}

/// Collects resolvable image records folder by folder, keeping at most one
/// entry per (date, city) pair and preferring the earliest observation.
#[derive(Debug, Default)]
pub struct FolderAggregator {
    folders: BTreeMap<String, HashMap<VisitKey, VisitEntry>>,
}

impl FolderAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one resolved image. Call order follows file discovery, not
    /// capture time; the replace rule makes the outcome order-independent
    /// per key. A place with neither city nor country carries no grouping
    /// value and is dropped.
    pub fn add(
        &mut self,
        folder: &str,
        file_id: &str,
        timestamp: Option<NaiveDateTime>,
        place: &PlaceComponents,
        coordinates: Option<(f64, f64)>,
    ) {
        if place.is_empty() {
            trace!(file_id, "dropping record with no place components");
            return;
        }

        let key = VisitKey {
            date: timestamp.map(|t| t.date()),
            city: place.city.clone(),
        };
        let candidate = VisitEntry {
            file_id: file_id.to_string(),
            date: timestamp.map(|t| t.date()),
            time: timestamp.map(|t| t.time()),
            city: place.city.clone(),
            country: place.country.clone(),
            coordinates,
        };

        let entries = self.folders.entry(folder.to_string()).or_default();
        match entries.get_mut(&key) {
            None => {
                entries.insert(key, candidate);
            }
            Some(existing) => {
                if replaces(existing, &candidate) {
                    trace!(
                        folder,
                        file_id,
                        previous = %existing.file_id,
                        "earlier observation replaces existing entry"
                    );
                    *existing = candidate;
                }
            }
        }
    }

    /// Sorts each folder's entries by (date, time) ascending, lexicographic
    /// on the serialized forms, so unknown dates land after all real ones.
    pub fn finalize(self) -> BTreeMap<String, Vec<VisitEntry>> {
        self.folders
            .into_iter()
            .map(|(folder, entries)| {
                let mut list: Vec<VisitEntry> = entries.into_values().collect();
                list.sort_by_key(|entry| (entry.date_label(), entry.time_label()));
                (folder, list)
            })
            .collect()
    }
}

/// The earliest-wins merge rule: the candidate replaces the existing entry
/// only when both carry a known timestamp and the candidate's is strictly
/// earlier. An undated entry never replaces a dated one and is never
/// replaced by one.
fn replaces(existing: &VisitEntry, candidate: &VisitEntry) -> bool {
    match (existing.time, candidate.time) {
        (Some(current), Some(new)) => new < current,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    fn ts(date: &str, time: &str) -> Option<NaiveDateTime> {
        let date = NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap();
        let time = chrono::NaiveTime::parse_from_str(time, "%H:%M:%S").unwrap();
        Some(date.and_time(time))
    }

    fn doha() -> PlaceComponents {
        PlaceComponents::new("Doha", "Qatar")
    }

    #[test]
    fn keeps_one_entry_per_date_and_city() {
        let mut aggregator = FolderAggregator::new();
        aggregator.add("trip", "a.jpg", ts("2024-01-01", "09:00:00"), &doha(), None);
        aggregator.add("trip", "b.jpg", ts("2024-01-01", "12:00:00"), &doha(), None);
        aggregator.add("trip", "c.jpg", ts("2024-01-02", "08:00:00"), &doha(), None);

        let folders = aggregator.finalize();
        assert_eq!(folders["trip"].len(), 2);
    }

    #[test]
    fn earliest_observation_wins() {
        let mut aggregator = FolderAggregator::new();
        aggregator.add("trip", "late.jpg", ts("2024-01-01", "14:00:00"), &doha(), None);
        aggregator.add("trip", "early.jpg", ts("2024-01-01", "08:00:00"), &doha(), None);

        let folders = aggregator.finalize();
        let entry = &folders["trip"][0];
        assert_eq!(entry.file_id, "early.jpg");
        assert_eq!(entry.time_label(), "08:00:00");
    }

    #[test]
    fn later_observation_does_not_replace() {
        let mut aggregator = FolderAggregator::new();
        aggregator.add("trip", "early.jpg", ts("2024-01-01", "08:00:00"), &doha(), None);
        aggregator.add("trip", "late.jpg", ts("2024-01-01", "14:00:00"), &doha(), None);

        let folders = aggregator.finalize();
        assert_eq!(folders["trip"][0].file_id, "early.jpg");
    }

    #[test]
    fn undated_records_never_swap_with_dated_ones() {
        // An undated record lands under its own key and a dated one never
        // merges into it; Option-equality is exactly the label-equality
        // rule of the dedup key.
        let mut aggregator = FolderAggregator::new();
        aggregator.add("trip", "dated.jpg", ts("2024-01-01", "08:00:00"), &doha(), None);
        aggregator.add("trip", "undated.jpg", None, &doha(), None);
        aggregator.add("trip", "undated2.jpg", None, &doha(), None);

        let folders = aggregator.finalize();
        assert_eq!(folders["trip"].len(), 2);
        // First undated observation survives; the second never replaces it.
        let undated: Vec<_> = folders["trip"]
            .iter()
            .filter(|e| e.date.is_none())
            .collect();
        assert_eq!(undated.len(), 1);
        assert_eq!(undated[0].file_id, "undated.jpg");
    }

    #[test]
    fn empty_place_is_dropped() {
        let mut aggregator = FolderAggregator::new();
        aggregator.add(
            "trip",
            "nowhere.jpg",
            ts("2024-01-01", "08:00:00"),
            &PlaceComponents::default(),
            None,
        );

        assert!(aggregator.finalize().is_empty());
    }

    #[test]
    fn missing_city_entries_collapse_together() {
        let mut aggregator = FolderAggregator::new();
        let country_only = PlaceComponents {
            city: None,
            country: Some("Qatar".into()),
        };
        aggregator.add("trip", "a.jpg", ts("2024-01-01", "10:00:00"), &country_only, None);
        aggregator.add("trip", "b.jpg", ts("2024-01-01", "09:00:00"), &country_only, None);

        let folders = aggregator.finalize();
        assert_eq!(folders["trip"].len(), 1);
        assert_eq!(folders["trip"][0].file_id, "b.jpg");
        assert_eq!(folders["trip"][0].city_label(), "Unknown");
    }

    #[test]
    fn finalize_sorts_by_date_then_time_with_unknown_last() {
        let mut aggregator = FolderAggregator::new();
        aggregator.add("trip", "undated.jpg", None, &doha(), None);
        aggregator.add(
            "trip",
            "second.jpg",
            ts("2024-01-02", "07:00:00"),
            &PlaceComponents::new("Al Khor", "Qatar"),
            None,
        );
        aggregator.add("trip", "first.jpg", ts("2024-01-01", "09:00:00"), &doha(), None);

        let folders = aggregator.finalize();
        let ids: Vec<_> = folders["trip"].iter().map(|e| e.file_id.as_str()).collect();
        assert_eq!(ids, vec!["first.jpg", "second.jpg", "undated.jpg"]);
    }

    #[test]
    fn folders_are_independent() {
        let mut aggregator = FolderAggregator::new();
        aggregator.add("doha", "a.jpg", ts("2024-01-01", "09:00:00"), &doha(), None);
        aggregator.add("paris", "b.jpg", ts("2024-01-01", "09:00:00"), &PlaceComponents::new("Paris", "France"), None);

        let folders = aggregator.finalize();
        assert_eq!(folders.len(), 2);
        assert_eq!(folders["doha"].len(), 1);
        assert_eq!(folders["paris"].len(), 1);
    }
}
