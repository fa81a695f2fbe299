use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use serde::Serialize;

use crate::records::VisitEntry;

#[derive(Debug, Clone, Serialize)]
pub struct CityStats {
    pub name: String,
    /// Count of distinct calendar dates this city appears on, across all
    /// folders of its country.
    pub visits: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct CountryStats {
    pub country: String,
    pub first_visit_date: NaiveDate,
    pub cities: Vec<CityStats>,
}

/// Rolls all finalized folders into per-country, per-city visitation
/// statistics. Pure function of its input; the result does not depend on
/// folder order.
///
/// Entries with an unknown city, country or date carry no summary value
/// and are filtered, so the output never contains an "Unknown" row.
/// Cities are ordered most-visited first with alphabetical tie-breaks;
/// countries by first visit date, then name.
pub fn summarize(folders: &BTreeMap<String, Vec<VisitEntry>>) -> Vec<CountryStats> {
    let mut visits: BTreeMap<String, BTreeMap<String, BTreeSet<NaiveDate>>> = BTreeMap::new();

    for entry in folders.values().flatten() {
        let (Some(city), Some(country), Some(date)) = (&entry.city, &entry.country, entry.date)
        else {
            continue;
        };
        visits
            .entry(country.clone())
            .or_default()
            .entry(city.clone())
            .or_default()
            .insert(date);
    }

    let mut countries: Vec<CountryStats> = visits
        .into_iter()
        .map(|(country, cities)| {
            let first_visit_date = cities
                .values()
                .flatten()
                .min()
                .copied()
                .expect("country retained only with at least one visit date");
            let mut cities: Vec<CityStats> = cities
                .into_iter()
                .map(|(name, dates)| CityStats {
                    visits: dates.len(),
                    name,
                })
                .collect();
            cities.sort_by(|a, b| {
                Reverse(a.visits)
                    .cmp(&Reverse(b.visits))
                    .then_with(|| a.name.cmp(&b.name))
            });
            CountryStats {
                country,
                first_visit_date,
                cities,
            }
        })
        .collect();

    countries.sort_by(|a, b| {
        a.first_visit_date
            .cmp(&b.first_visit_date)
            .then_with(|| a.country.cmp(&b.country))
    });
    countries
}
