//! PolicyResolver - (zone, wind) selection to route and device policy.

use std::sync::Arc;

use super::{DeviceStep, PolicyStore, RoutePolicyEntry};
use crate::client::ControlBackend;
use crate::error::{Result, RouteError};

pub struct PolicyResolver {
    store: Arc<PolicyStore>,
    backend: Arc<dyn ControlBackend>,
}

impl PolicyResolver {
    pub fn new(store: Arc<PolicyStore>, backend: Arc<dyn ControlBackend>) -> Self {
        Self { store, backend }
    }

    pub fn store(&self) -> &Arc<PolicyStore> {
        &self.store
    }

    /// Route under `wind` for the zone an operator-facing id refers to.
    ///
    /// The id is mapped to a backend zone through the index first (see
    /// `PolicyIndex::lookup_zone`), so the returned entry always belongs to
    /// the zone the operator was shown. An unknown wind is simply an empty
    /// candidate list. Never mutates the index.
    pub async fn resolve(&self, zone_id: &str, wind: &str) -> Result<RoutePolicyEntry> {
        let index = self.store.snapshot().await;
        let not_found = || RouteError::NotFound {
            zone: zone_id.to_string(),
            wind: wind.to_string(),
        };
        let zone = index.lookup_zone(zone_id).ok_or_else(not_found)?;
        index
            .entries(wind)
            .iter()
            .find(|entry| entry.zone_id == zone.zone_id)
            .cloned()
            .ok_or_else(not_found)
    }

    /// `resolve`, reloading the index once when it does not know the pair.
    pub async fn resolve_fresh(&self, zone_id: &str, wind: &str) -> Result<RoutePolicyEntry> {
        match self.resolve(zone_id, wind).await {
            Err(RouteError::NotFound { .. }) => {
                tracing::debug!(zone = zone_id, wind, "Route not indexed; reloading policy index");
                self.store.load().await?;
                self.resolve(zone_id, wind).await
            }
            other => other,
        }
    }

    /// First route under `wind` registered for backend zone `zone_id`.
    pub async fn resolve_by_zone_id(&self, zone_id: i64, wind: &str) -> Result<RoutePolicyEntry> {
        let index = self.store.snapshot().await;
        index
            .entries(wind)
            .iter()
            .find(|entry| entry.zone_id == zone_id)
            .cloned()
            .ok_or_else(|| RouteError::NotFound {
                zone: zone_id.to_string(),
                wind: wind.to_string(),
            })
    }

    /// Ordered device sequence for a resolved route.
    ///
    /// An empty sequence is `PolicyUnavailable`: a route with no signals to
    /// flip is treated as no route.
    pub async fn fetch_policy(&self, route_id: i64) -> Result<Vec<DeviceStep>> {
        let steps = self
            .backend
            .route_policy(route_id)
            .await
            .map_err(|e| match e {
                RouteError::BackendRejected { status, body } => RouteError::PolicyUnavailable {
                    route_id,
                    reason: if body.is_empty() {
                        format!("HTTP {status}")
                    } else {
                        format!("HTTP {status}: {body}")
                    },
                },
                other => other,
            })?;

        if steps.is_empty() {
            return Err(RouteError::PolicyUnavailable {
                route_id,
                reason: "empty device sequence".into(),
            });
        }
        tracing::debug!(route_id, steps = steps.len(), "Fetched route policy");
        Ok(steps.into_iter().map(DeviceStep::from).collect())
    }

    /// `resolve` followed by `fetch_policy`.
    pub async fn resolve_with_policy(
        &self,
        zone_id: &str,
        wind: &str,
    ) -> Result<(RoutePolicyEntry, Vec<DeviceStep>)> {
        let entry = self.resolve(zone_id, wind).await?;
        let policy = self.fetch_policy(entry.route_id).await?;
        Ok((entry, policy))
    }
}
