//! PolicyStore - wind direction to registered routes.
//!
//! The index is rebuilt wholesale from a bulk fetch of zones and routes and
//! swapped in atomically. A failed load leaves the previous index in place.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::RwLock;
use windroute_types::{RouteDto, ZoneDto};

use super::names::{canonical_label, zone_name_matches};
use super::RoutePolicyEntry;
use crate::client::ControlBackend;
use crate::error::{Result, RouteError};

/// Zone offered for selection
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ZoneOption {
    pub zone_id: i64,
    pub zone_name: String,
    /// Operator-facing id, see `names::canonical_label`
    pub label: String,
}

/// Immutable snapshot of the route registry, keyed by wind direction.
///
/// Entry order within a wind follows backend response order, which decides
/// "first match" during resolution.
#[derive(Debug, Clone, Default)]
pub struct PolicyIndex {
    by_wind: HashMap<String, Vec<RoutePolicyEntry>>,
    available_zones: Vec<ZoneOption>,
    available_winds: Vec<String>,
}

impl PolicyIndex {
    /// Group every route by wind and resolve zone names from `zones`.
    ///
    /// Routes pointing at an unknown zone get a synthesized `"Zone {id}"`.
    pub fn build(zones: &[ZoneDto], routes: &[RouteDto]) -> Self {
        let names: HashMap<i64, &str> = zones.iter().map(|z| (z.id, z.name.as_str())).collect();

        let mut by_wind: HashMap<String, Vec<RoutePolicyEntry>> = HashMap::new();
        for route in routes {
            let zone_name = names
                .get(&route.zone_id)
                .map(|n| n.to_string())
                .unwrap_or_else(|| format!("Zone {}", route.zone_id));
            by_wind
                .entry(route.wind_direction.clone())
                .or_default()
                .push(RoutePolicyEntry {
                    route_id: route.id,
                    zone_id: route.zone_id,
                    zone_name,
                    wind_direction: route.wind_direction.clone(),
                });
        }

        let mut zone_set: BTreeMap<i64, String> = BTreeMap::new();
        let mut wind_set: BTreeSet<String> = BTreeSet::new();
        for entry in by_wind.values().flatten() {
            zone_set
                .entry(entry.zone_id)
                .or_insert_with(|| entry.zone_name.clone());
            wind_set.insert(entry.wind_direction.clone());
        }

        Self {
            by_wind,
            available_zones: zone_set
                .into_iter()
                .map(|(zone_id, zone_name)| ZoneOption {
                    label: canonical_label(zone_id, &zone_name),
                    zone_id,
                    zone_name,
                })
                .collect(),
            available_winds: wind_set.into_iter().collect(),
        }
    }

    /// Entries registered for `wind`; empty when the wind is unknown.
    pub fn entries(&self, wind: &str) -> &[RoutePolicyEntry] {
        self.by_wind.get(wind).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The indexed zone an operator-facing id refers to.
    ///
    /// An exact label wins over a tolerant name match, which wins over a bare
    /// backend id. A label is what the operator was shown, so it is never
    /// shadowed by another zone's numeric id.
    pub fn lookup_zone(&self, zone: &str) -> Option<&ZoneOption> {
        let zone = zone.trim();
        if zone.is_empty() {
            return None;
        }
        self.available_zones
            .iter()
            .find(|z| z.label == zone)
            .or_else(|| {
                self.available_zones
                    .iter()
                    .find(|z| zone_name_matches(zone, &z.zone_name))
            })
            .or_else(|| {
                let id = zone.parse::<i64>().ok()?;
                self.available_zones.iter().find(|z| z.zone_id == id)
            })
    }

    pub fn available_zones(&self) -> &[ZoneOption] {
        &self.available_zones
    }

    pub fn available_winds(&self) -> &[String] {
        &self.available_winds
    }

    pub fn route_count(&self) -> usize {
        self.by_wind.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_wind.is_empty()
    }
}

pub struct PolicyStore {
    backend: Arc<dyn ControlBackend>,
    index: RwLock<Arc<PolicyIndex>>,
}

impl PolicyStore {
    pub fn new(backend: Arc<dyn ControlBackend>) -> Self {
        Self {
            backend,
            index: RwLock::new(Arc::new(PolicyIndex::default())),
        }
    }

    /// Seed the store without touching the backend.
    pub fn with_index(backend: Arc<dyn ControlBackend>, index: PolicyIndex) -> Self {
        Self {
            backend,
            index: RwLock::new(Arc::new(index)),
        }
    }

    /// Refetch zones and routes and replace the index.
    ///
    /// Any failure of either call is reported as `BackendUnreachable` and
    /// leaves the current index untouched.
    pub async fn load(&self) -> Result<Arc<PolicyIndex>> {
        let (zones, routes) =
            tokio::try_join!(self.backend.list_zones(), self.backend.list_routes()).map_err(
                |e| match e {
                    RouteError::BackendUnreachable(reason) => {
                        RouteError::BackendUnreachable(reason)
                    }
                    other => RouteError::BackendUnreachable(other.to_string()),
                },
            )?;

        let index = Arc::new(PolicyIndex::build(&zones, &routes));
        tracing::info!(
            routes = index.route_count(),
            zones = index.available_zones().len(),
            winds = index.available_winds().len(),
            "Policy index reloaded"
        );
        *self.index.write().await = Arc::clone(&index);
        Ok(index)
    }

    pub async fn snapshot(&self) -> Arc<PolicyIndex> {
        Arc::clone(&*self.index.read().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::memory::BackendOp;
    use crate::client::InMemoryBackend;

    fn zone(id: i64, name: &str) -> ZoneDto {
        ZoneDto {
            id,
            name: name.into(),
            is_active: false,
            active_wind_direction: None,
        }
    }

    fn route(id: i64, zone_id: i64, wind: &str) -> RouteDto {
        RouteDto {
            id,
            zone_id,
            wind_direction: wind.into(),
        }
    }

    #[test]
    fn build_groups_by_wind_in_response_order() {
        let zones = vec![zone(1, "Zone A"), zone(2, "Zone B")];
        let routes = vec![
            route(10, 2, "north"),
            route(11, 1, "north"),
            route(12, 1, "south"),
        ];
        let index = PolicyIndex::build(&zones, &routes);

        let north: Vec<i64> = index.entries("north").iter().map(|e| e.route_id).collect();
        assert_eq!(north, vec![10, 11]);
        assert_eq!(index.entries("south")[0].zone_name, "Zone A");
        assert!(index.entries("west").is_empty());
        assert_eq!(index.route_count(), 3);
    }

    #[test]
    fn unknown_zone_gets_synthesized_name() {
        let index = PolicyIndex::build(&[], &[route(1, 42, "east")]);
        assert_eq!(index.entries("east")[0].zone_name, "Zone 42");
    }

    #[test]
    fn derived_sets_are_distinct_and_sorted() {
        let zones = vec![zone(2, "Zone B"), zone(1, "Zone A"), zone(3, "Zone C")];
        let routes = vec![
            route(1, 2, "west"),
            route(2, 1, "east"),
            route(3, 2, "east"),
        ];
        let index = PolicyIndex::build(&zones, &routes);

        let zone_ids: Vec<i64> = index.available_zones().iter().map(|z| z.zone_id).collect();
        // Zone 3 has no route, so it is not selectable
        assert_eq!(zone_ids, vec![1, 2]);
        assert_eq!(index.available_zones()[1].label, "B");
        assert_eq!(index.available_winds(), &["east".to_string(), "west".to_string()]);
    }

    #[test]
    fn label_wins_over_another_zones_numeric_id() {
        let zones = vec![zone(1, "Zone A"), zone(2, "Zone 1")];
        let routes = vec![route(10, 1, "north"), route(20, 2, "north")];
        let index = PolicyIndex::build(&zones, &routes);

        assert_eq!(index.lookup_zone("1").map(|z| z.zone_id), Some(2));
        assert_eq!(index.lookup_zone("A").map(|z| z.zone_id), Some(1));
        assert_eq!(index.lookup_zone("a").map(|z| z.zone_id), Some(1));
        assert!(index.lookup_zone("7").is_none());
        assert!(index.lookup_zone("  ").is_none());
    }

    #[test]
    fn bare_backend_id_is_the_last_resort() {
        let index = PolicyIndex::build(&[zone(4, "North Lot"), zone(9, "Zone Q")], &[
            route(1, 4, "west"),
            route(2, 9, "west"),
        ]);
        // "North Lot" is labelled by its id; "Zone Q" only by its letter
        assert_eq!(index.lookup_zone("4").map(|z| z.zone_id), Some(4));
        assert_eq!(index.lookup_zone("9").map(|z| z.zone_id), Some(9));
        assert_eq!(index.lookup_zone("q").map(|z| z.label.as_str()), Some("Q"));
    }

    #[tokio::test]
    async fn failed_load_keeps_previous_index() {
        let backend = Arc::new(InMemoryBackend::demo());
        let store = PolicyStore::new(backend.clone());
        let first = store.load().await.unwrap();
        assert!(!first.is_empty());

        backend
            .inject(
                BackendOp::ListRoutes,
                RouteError::BackendRejected {
                    status: 500,
                    body: String::new(),
                },
            )
            .await;
        let err = store.load().await.unwrap_err();
        assert!(matches!(err, RouteError::BackendUnreachable(_)));

        let current = store.snapshot().await;
        assert!(Arc::ptr_eq(&first, &current));
    }
}
