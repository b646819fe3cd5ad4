//! ActivationController - operator intents against the backend.
//!
//! Activation only becomes visible locally after the backend confirms it.
//! Deactivation and clear always reset local state, whatever the backend
//! answered: showing no route is the safe failure mode, showing a stale one
//! is not.

use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, info, warn};
use windroute_types::{ActivateResponse, ActiveRouteDto, ZoneRef};

use super::state::{ActiveRoute, ControllerPhase, SelectionState};
use crate::client::ControlBackend;
use crate::error::{Result, RouteError};
use crate::path::{PathBuilder, RenderedPath};
use crate::policy::names::canonical_label;
use crate::policy::{DeviceStep, PolicyResolver, RoutePolicyEntry};

/// Where an activated route's detail came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteSource {
    /// Backend echoed route id and policy
    Backend,
    /// Backend echoed the route id; policy fetched separately
    BackendId,
    /// Backend gave no detail; resolved from the local index
    LocalIndex,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActivationOutcome {
    pub route_id: i64,
    pub source: RouteSource,
    pub path: RenderedPath,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeactivationOutcome {
    pub zone: String,
    /// Set when the backend call failed; local state was cleared anyway
    pub backend_error: Option<RouteError>,
}

impl DeactivationOutcome {
    pub fn status_line(&self) -> String {
        match &self.backend_error {
            None => format!("Zone {} deactivated", self.zone),
            Some(e) => format!(
                "Zone {} cleared locally; backend did not confirm: {e}",
                self.zone
            ),
        }
    }
}

/// Per-zone results of a clear
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClearReport {
    pub deactivated: Vec<i64>,
    pub failed: Vec<(i64, RouteError)>,
    /// The active-zone listing itself failed; nothing was deactivated upstream
    pub listing_error: Option<RouteError>,
}

impl ClearReport {
    pub fn status_line(&self) -> String {
        if let Some(e) = &self.listing_error {
            return format!("Cleared locally; could not list active zones: {e}");
        }
        if self.failed.is_empty() {
            return format!("Cleared {} active zone(s)", self.deactivated.len());
        }
        let failed: Vec<String> = self.failed.iter().map(|(id, _)| id.to_string()).collect();
        format!(
            "Cleared {} active zone(s); failed to deactivate zone(s) {}",
            self.deactivated.len(),
            failed.join(", ")
        )
    }
}

pub struct ActivationController {
    backend: Arc<dyn ControlBackend>,
    resolver: Arc<PolicyResolver>,
    paths: Arc<PathBuilder>,
    phase: ControllerPhase,
    backend_reachable: bool,
}

impl ActivationController {
    pub fn new(
        backend: Arc<dyn ControlBackend>,
        resolver: Arc<PolicyResolver>,
        paths: Arc<PathBuilder>,
    ) -> Self {
        Self {
            backend,
            resolver,
            paths,
            phase: ControllerPhase::Idle,
            backend_reachable: true,
        }
    }

    pub fn phase(&self) -> ControllerPhase {
        self.phase
    }

    /// Latest reachability seen by a load or reconciliation tick.
    pub fn set_backend_reachable(&mut self, reachable: bool) {
        self.backend_reachable = reachable;
    }

    /// Re-derive the phase after someone else wrote the state.
    pub fn settle(&mut self, state: &SelectionState) {
        self.phase = ControllerPhase::settled(state);
    }

    /// Activate `zone` for `wind`.
    ///
    /// On any failure the state is left exactly as it was.
    pub async fn activate(
        &mut self,
        state: &mut SelectionState,
        zone: Option<&str>,
        wind: Option<&str>,
    ) -> Result<ActivationOutcome> {
        let (zone, wind) = match (non_blank(zone), non_blank(wind)) {
            (Some(zone), Some(wind)) => (zone, wind),
            _ => {
                return Err(RouteError::InvalidState(
                    "select a zone and a wind direction first".into(),
                ))
            }
        };
        if !self.backend_reachable {
            return Err(RouteError::BackendUnreachable(
                "backend not reachable; refresh before activating".into(),
            ));
        }

        self.phase = ControllerPhase::Activating;
        debug!(zone, wind, "Activating");

        match self.try_activate(zone, wind).await {
            Ok((route, outcome)) => {
                info!(
                    zone,
                    wind,
                    route_id = route.route_id,
                    source = ?outcome.source,
                    "Route activated"
                );
                state.adopt(route, outcome.path.clone());
                self.phase = ControllerPhase::Active;
                Ok(outcome)
            }
            Err(e) => {
                warn!(zone, wind, error = %e, "Activation failed");
                self.settle(state);
                Err(e)
            }
        }
    }

    async fn try_activate(&self, zone: &str, wind: &str) -> Result<(ActiveRoute, ActivationOutcome)> {
        // Operator ids are labels, not backend ids: "1" may name zone 2.
        // Pin the backend zone before anything is sent.
        let entry = self.resolver.resolve_fresh(zone, wind).await?;
        let label = canonical_label(entry.zone_id, &entry.zone_name);
        let zone_ref = ZoneRef::Numeric(entry.zone_id);

        let response = self.backend.activate(&zone_ref, wind).await?;
        let (route_id, policy, source) = self.route_detail(&entry, response).await?;

        let path = self.paths.render_route(&label, &policy);

        // Informational only.
        match self.backend.zone_status(&zone_ref).await {
            Ok(status) => debug!(zone, %status, "Zone status after activation"),
            Err(e) => debug!(zone, error = %e, "Zone status unavailable"),
        }

        let route = ActiveRoute {
            route_id,
            zone_id: label,
            backend_zone_id: entry.zone_id,
            wind_direction: wind.to_string(),
            policy,
        };
        Ok((
            route,
            ActivationOutcome {
                route_id,
                source,
                path,
            },
        ))
    }

    /// Prefer what the backend reported; fall back to the indexed route.
    async fn route_detail(
        &self,
        entry: &RoutePolicyEntry,
        response: ActivateResponse,
    ) -> Result<(i64, Vec<DeviceStep>, RouteSource)> {
        match response.active_route {
            Some(ActiveRouteDto {
                id,
                policy: Some(steps),
            }) if !steps.is_empty() => Ok((
                id,
                steps.into_iter().map(DeviceStep::from).collect(),
                RouteSource::Backend,
            )),
            Some(ActiveRouteDto { id, .. }) => {
                let policy = self.resolver.fetch_policy(id).await?;
                Ok((id, policy, RouteSource::BackendId))
            }
            None => {
                let policy = self.resolver.fetch_policy(entry.route_id).await?;
                Ok((entry.route_id, policy, RouteSource::LocalIndex))
            }
        }
    }

    /// Deactivate the active route for `zone`.
    ///
    /// Local state is cleared even if the backend call fails.
    pub async fn deactivate(
        &mut self,
        state: &mut SelectionState,
        zone: &str,
    ) -> Result<DeactivationOutcome> {
        let index = self.resolver.store().snapshot().await;
        let target = index.lookup_zone(zone).map(|z| z.zone_id);
        let active = state
            .active_route
            .as_ref()
            .filter(|route| route.zone_id == zone.trim() || target == Some(route.backend_zone_id))
            .map(|route| (route.zone_id.clone(), route.backend_zone_id));
        let Some((label, backend_zone_id)) = active else {
            return Err(RouteError::InvalidState(format!(
                "zone {zone} has no active route"
            )));
        };

        self.phase = ControllerPhase::Deactivating;
        let result = self
            .backend
            .deactivate(&ZoneRef::Numeric(backend_zone_id))
            .await;
        state.clear();
        self.phase = ControllerPhase::Idle;

        let backend_error = match result {
            Ok(()) => {
                info!(zone = %label, backend_zone_id, "Route deactivated");
                None
            }
            Err(e) => {
                warn!(zone = %label, error = %e, "Deactivation not confirmed; cleared locally");
                Some(e)
            }
        };
        Ok(DeactivationOutcome {
            zone: label,
            backend_error,
        })
    }

    /// Deactivate every zone the backend reports active, then reset local
    /// state unconditionally.
    pub async fn clear(&mut self, state: &mut SelectionState) -> ClearReport {
        self.phase = ControllerPhase::Deactivating;
        let mut report = ClearReport::default();

        match self.backend.list_zones().await {
            Ok(zones) => {
                let active: Vec<i64> = zones.iter().filter(|z| z.is_active).map(|z| z.id).collect();
                let backend = &self.backend;
                let results = join_all(active.iter().map(|&id| async move {
                    (id, backend.deactivate(&ZoneRef::Numeric(id)).await)
                }))
                .await;
                for (id, result) in results {
                    match result {
                        Ok(()) => report.deactivated.push(id),
                        Err(e) => {
                            warn!(zone_id = id, error = %e, "Clear: deactivation failed");
                            report.failed.push((id, e));
                        }
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "Clear: could not list active zones");
                report.listing_error = Some(e);
            }
        }

        state.clear();
        self.phase = ControllerPhase::Idle;
        info!(
            deactivated = report.deactivated.len(),
            failed = report.failed.len(),
            "Cleared all routes"
        );
        report
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
