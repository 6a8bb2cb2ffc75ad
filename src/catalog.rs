use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::places::PlaceObservation;

fn not_available() -> String {
    "NA".to_string()
}

/// Persisted form of a place. Field names match the stored JSON layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    #[serde(rename = "displayName", default = "not_available")]
    pub display_name: String,
    #[serde(rename = "shortFormattedAddress", default = "not_available")]
    pub short_formatted_address: String,
    #[serde(default)]
    pub rating: f64,
    #[serde(rename = "priceLevel", default = "not_available")]
    pub price_level: String,
    #[serde(default = "not_available")]
    pub primary_type: String,
    #[serde(default)]
    pub user_rating_count: u64,
    #[serde(default)]
    pub types: BTreeSet<String>,
    pub first_seen: NaiveDate,
    pub last_seen: NaiveDate,
}

impl CatalogEntry {
    pub fn first_observed(observation: &PlaceObservation, today: NaiveDate) -> Self {
        Self {
            display_name: observation.display_name.clone(),
            short_formatted_address: observation.short_formatted_address.clone(),
            rating: observation.rating,
            price_level: observation.price_level.clone(),
            primary_type: observation.primary_type.clone(),
            user_rating_count: observation.user_rating_count,
            types: observation.types.clone(),
            first_seen: today,
            last_seen: today,
        }
    }

    /// Overwrites the mutable fields. The display name and `first_seen` stay
    /// as first recorded.
    pub fn observe(&mut self, observation: &PlaceObservation, today: NaiveDate) {
        self.rating = observation.rating;
        self.short_formatted_address = observation.short_formatted_address.clone();
        self.price_level = observation.price_level.clone();
        self.primary_type = observation.primary_type.clone();
        self.user_rating_count = observation.user_rating_count;
        self.types = observation.types.clone();
        if today < self.first_seen {
            warn!(
                %today,
                first_seen = %self.first_seen,
                "observation predates first_seen; clamping last_seen"
            );
        }
        self.last_seen = today.max(self.first_seen);
    }
}

/// All known places keyed by place id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Catalog {
    entries: BTreeMap<String, CatalogEntry>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&CatalogEntry> {
        self.entries.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn insert(&mut self, id: impl Into<String>, entry: CatalogEntry) -> Option<CatalogEntry> {
        self.entries.insert(id.into(), entry)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &CatalogEntry)> {
        self.entries.iter()
    }

    pub fn ids(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }
}

impl FromIterator<(String, CatalogEntry)> for Catalog {
    fn from_iter<I: IntoIterator<Item = (String, CatalogEntry)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome {
    pub catalog: Catalog,
    pub new_entries: Catalog,
}

/// Folds a run's observations into the previous catalog.
///
/// Unknown ids become new entries (`first_seen == last_seen == today`) and are
/// also returned in `new_entries`. Known ids get their mutable fields and
/// `last_seen` refreshed. Entries not observed this run are kept as they were.
pub fn merge(
    observations: &HashMap<String, PlaceObservation>,
    old_catalog: Catalog,
    today: NaiveDate,
) -> MergeOutcome {
    let mut catalog = old_catalog;
    let mut new_entries = Catalog::new();
    let mut refreshed = 0usize;

    for (id, observation) in observations {
        match catalog.entries.get_mut(id) {
            Some(entry) => {
                entry.observe(observation, today);
                refreshed += 1;
            }
            None => {
                let entry = CatalogEntry::first_observed(observation, today);
                new_entries.insert(id.clone(), entry.clone());
                catalog.insert(id.clone(), entry);
            }
        }
    }

    info!(
        observed = observations.len(),
        new = new_entries.len(),
        refreshed,
        total = catalog.len(),
        "merged observations into catalog"
    );
    MergeOutcome {
        catalog,
        new_entries,
    }
}

/// Drops entries last seen before `cutoff`. Returns how many were removed.
pub fn prune_before(catalog: &mut Catalog, cutoff: NaiveDate) -> usize {
    let before = catalog.len();
    catalog.entries.retain(|_, entry| entry.last_seen >= cutoff);
    let removed = before - catalog.len();
    info!(%cutoff, removed, kept = catalog.len(), "pruned stale catalog entries");
    removed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(raw: &str) -> NaiveDate {
        NaiveDate::parse_from_str(raw, "%Y-%m-%d").unwrap()
    }

    fn observation(id: &str, rating: f64) -> PlaceObservation {
        PlaceObservation {
            id: id.to_string(),
            display_name: format!("Cafe {id}"),
            short_formatted_address: "2 Market Rd".to_string(),
            rating,
            price_level: "PRICE_LEVEL_INEXPENSIVE".to_string(),
            primary_type: "cafe".to_string(),
            user_rating_count: 42,
            types: BTreeSet::from(["cafe".to_string(), "food".to_string()]),
        }
    }

    fn observations(items: &[(&str, f64)]) -> HashMap<String, PlaceObservation> {
        items
            .iter()
            .map(|(id, rating)| (id.to_string(), observation(id, *rating)))
            .collect()
    }

    #[test]
    fn first_run_creates_everything_as_new() {
        let today = date("2025-01-01");
        let outcome = merge(
            &observations(&[("X1", 4.0), ("X2", 3.5), ("X3", 0.0)]),
            Catalog::new(),
            today,
        );

        assert_eq!(outcome.catalog.len(), 3);
        assert_eq!(outcome.new_entries, outcome.catalog);
        let x1 = outcome.catalog.get("X1").unwrap();
        assert_eq!(x1.first_seen, today);
        assert_eq!(x1.last_seen, today);
        assert_eq!(x1.display_name, "Cafe X1");
    }

    #[test]
    fn known_entry_keeps_first_seen_and_takes_new_values() {
        let mut old = Catalog::new();
        let mut existing = CatalogEntry::first_observed(&observation("X1", 3.0), date("2024-01-01"));
        existing.display_name = "Old Name".to_string();
        old.insert("X1", existing);

        let mut update = observation("X1", 4.5);
        update.user_rating_count = 99;
        update.types = BTreeSet::from(["bakery".to_string()]);
        let new = HashMap::from([("X1".to_string(), update)]);

        let outcome = merge(&new, old, date("2025-01-01"));
        let x1 = outcome.catalog.get("X1").unwrap();

        assert!(outcome.new_entries.is_empty());
        assert_eq!(x1.rating, 4.5);
        assert_eq!(x1.user_rating_count, 99);
        assert_eq!(x1.types, BTreeSet::from(["bakery".to_string()]));
        assert_eq!(x1.first_seen, date("2024-01-01"));
        assert_eq!(x1.last_seen, date("2025-01-01"));
        assert_eq!(x1.display_name, "Old Name");
    }

    #[test]
    fn unseen_entries_are_retained() {
        let mut old = Catalog::new();
        let stale = CatalogEntry::first_observed(&observation("OLD", 2.0), date("2023-06-01"));
        old.insert("OLD", stale.clone());

        let outcome = merge(&observations(&[("NEW", 4.0)]), old, date("2025-01-01"));

        assert_eq!(outcome.catalog.get("OLD"), Some(&stale));
        assert!(outcome.catalog.contains("NEW"));
        assert_eq!(outcome.new_entries.ids().collect::<Vec<_>>(), vec!["NEW"]);
    }

    #[test]
    fn merging_twice_is_idempotent() {
        let today = date("2025-03-03");
        let batch = observations(&[("A", 4.0), ("B", 4.1)]);
        let once = merge(&batch, Catalog::new(), today);
        let twice = merge(&batch, once.catalog.clone(), today);

        assert_eq!(twice.catalog, once.catalog);
        assert!(twice.new_entries.is_empty());

        let later = merge(&batch, twice.catalog, date("2025-04-04"));
        let a = later.catalog.get("A").unwrap();
        assert_eq!(a.first_seen, today);
        assert_eq!(a.last_seen, date("2025-04-04"));
    }

    #[test]
    fn last_seen_never_precedes_first_seen() {
        let mut old = Catalog::new();
        old.insert(
            "X1",
            CatalogEntry::first_observed(&observation("X1", 3.0), date("2025-02-01")),
        );
        let outcome = merge(&observations(&[("X1", 3.2)]), old, date("2025-01-01"));
        let x1 = outcome.catalog.get("X1").unwrap();
        assert!(x1.first_seen <= x1.last_seen);
    }

    #[test]
    fn prunes_entries_older_than_cutoff() {
        let mut catalog: Catalog = [
            ("keep", "2025-01-10"),
            ("edge", "2025-01-01"),
            ("drop", "2024-12-31"),
        ]
        .into_iter()
        .map(|(id, seen)| {
            (
                id.to_string(),
                CatalogEntry::first_observed(&observation(id, 4.0), date(seen)),
            )
        })
        .collect();

        let removed = prune_before(&mut catalog, date("2025-01-01"));

        assert_eq!(removed, 1);
        assert!(catalog.contains("keep"));
        assert!(catalog.contains("edge"));
        assert!(!catalog.contains("drop"));
    }

    #[test]
    fn serializes_with_stored_field_names() {
        let mut catalog = Catalog::new();
        catalog.insert(
            "X1",
            CatalogEntry::first_observed(&observation("X1", 4.5), date("2024-01-01")),
        );
        let value = serde_json::to_value(&catalog).unwrap();
        let entry = &value["X1"];

        assert_eq!(entry["displayName"], "Cafe X1");
        assert_eq!(entry["shortFormattedAddress"], "2 Market Rd");
        assert_eq!(entry["priceLevel"], "PRICE_LEVEL_INEXPENSIVE");
        assert_eq!(entry["primary_type"], "cafe");
        assert_eq!(entry["user_rating_count"], 42);
        assert_eq!(entry["first_seen"], "2024-01-01");
        assert_eq!(entry["types"], serde_json::json!(["cafe", "food"]));

        let sparse = r#"{"Y": {"displayName": "Y", "first_seen": "2024-01-01", "last_seen": "2024-02-01"}}"#;
        let parsed: Catalog = serde_json::from_str(sparse).unwrap();
        let y = parsed.get("Y").unwrap();
        assert_eq!(y.price_level, "NA");
        assert_eq!(y.rating, 0.0);
        assert!(y.types.is_empty());
    }
}
