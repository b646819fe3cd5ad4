//! ReconciliationLoop - periodic overwrite of local selection with backend
//! activation state.
//!
//! Backend state is authoritative. Each tick reads the zone list, finds the
//! (at most one) active zone, and makes local state agree with it. Transport
//! failures leave state alone so the display does not flicker; the next tick
//! retries.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};
use windroute_types::ZoneDto;

use super::state::{ActiveRoute, SelectionState};
use crate::client::ControlBackend;
use crate::config::ReconcileAuthority;
use crate::error::{Result, RouteError};
use crate::path::PathBuilder;
use crate::policy::names::canonical_label;
use crate::policy::{DeviceStep, PolicyResolver, RoutePolicyEntry};

/// What a tick did to local state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Local state already agreed with the backend
    InSync,
    /// Adopted the backend's active zone and its route
    Adopted {
        zone: String,
        wind: String,
        route_id: i64,
    },
    /// Adopted the backend's active zone but no route could be resolved
    AdoptedWithoutRoute {
        zone: String,
        wind: String,
        reason: String,
    },
    /// Backend has no active zone; local route cleared
    Cleared,
    /// Divergence seen but held off inside the local grace window
    Deferred,
}

impl TickOutcome {
    pub fn changed_state(&self) -> bool {
        matches!(
            self,
            Self::Adopted { .. } | Self::AdoptedWithoutRoute { .. } | Self::Cleared
        )
    }

    pub fn status_line(&self) -> Option<String> {
        match self {
            Self::Adopted {
                zone,
                wind,
                route_id,
            } => Some(format!(
                "Synced from backend: route {route_id} active for zone {zone} ({wind})"
            )),
            Self::AdoptedWithoutRoute { zone, wind, reason } => Some(format!(
                "Zone {zone} ({wind}) is active upstream but no route can be shown: {reason}"
            )),
            Self::Cleared => Some("Backend reports no active zone; route cleared".to_string()),
            Self::InSync | Self::Deferred => None,
        }
    }
}

/// Backend-active pair that had no displayable route last time
#[derive(Debug, Clone, PartialEq, Eq)]
struct UnresolvedPair {
    zone_id: i64,
    wind: String,
    reason: String,
}

pub struct ReconciliationLoop {
    backend: Arc<dyn ControlBackend>,
    resolver: Arc<PolicyResolver>,
    paths: Arc<PathBuilder>,
    interval: Duration,
    authority: ReconcileAuthority,
    unresolved: Option<UnresolvedPair>,
}

impl ReconciliationLoop {
    pub fn new(
        backend: Arc<dyn ControlBackend>,
        resolver: Arc<PolicyResolver>,
        paths: Arc<PathBuilder>,
        interval: Duration,
        authority: ReconcileAuthority,
    ) -> Self {
        Self {
            backend,
            resolver,
            paths,
            interval,
            authority,
            unresolved: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    fn in_grace(&self, last_intent: Option<Instant>) -> bool {
        match (self.authority, last_intent) {
            (ReconcileAuthority::LocalGrace(grace), Some(at)) => at.elapsed() < grace,
            _ => false,
        }
    }

    /// One reconciliation pass.
    ///
    /// `Err` means nothing was written; only transport failures surface here.
    pub async fn tick(
        &mut self,
        state: &mut SelectionState,
        last_intent: Option<Instant>,
    ) -> Result<TickOutcome> {
        let zones = self.backend.list_zones().await?;

        if self.resolver.store().snapshot().await.is_empty() {
            // Startup load failed earlier; try again now that we can reach it.
            if let Err(e) = self.resolver.store().load().await {
                debug!(error = %e, "Policy index still unavailable");
            }
        }

        let active = zones.iter().find(|z| z.is_active);
        let Some(zone) = active else {
            self.unresolved = None;
            if state.active_route.is_none() {
                return Ok(TickOutcome::InSync);
            }
            if self.in_grace(last_intent) {
                return Ok(TickOutcome::Deferred);
            }
            info!("Backend reports no active zone; clearing local route");
            state.clear();
            return Ok(TickOutcome::Cleared);
        };

        let Some(wind) = zone.active_wind_direction.clone() else {
            warn!(zone_id = zone.id, "Active zone has no wind direction; skipping");
            return Ok(TickOutcome::InSync);
        };

        if agrees(state, zone, &wind) {
            self.unresolved = None;
            return Ok(TickOutcome::InSync);
        }

        let label = canonical_label(zone.id, &zone.name);
        let known_miss = self
            .unresolved
            .as_ref()
            .filter(|miss| miss.zone_id == zone.id && miss.wind == wind)
            .cloned();
        if self.in_grace(last_intent) {
            debug!(zone_id = zone.id, wind = %wind, "Divergence inside grace window");
            return Ok(TickOutcome::Deferred);
        }

        // A pair that already missed is retried against the current index
        // only; an explicit refresh reloads it.
        match self.resolve_active(zone.id, &wind, known_miss.is_none()).await {
            Ok((entry, policy)) => {
                self.unresolved = None;
                let path = self.paths.render_route(&label, &policy);
                info!(
                    zone = %label,
                    wind = %wind,
                    route_id = entry.route_id,
                    "Adopting backend activation"
                );
                state.adopt(
                    ActiveRoute {
                        route_id: entry.route_id,
                        zone_id: label.clone(),
                        backend_zone_id: zone.id,
                        wind_direction: wind.clone(),
                        policy,
                    },
                    path,
                );
                Ok(TickOutcome::Adopted {
                    zone: label,
                    wind,
                    route_id: entry.route_id,
                })
            }
            Err(e) if e.is_transport() => Err(e),
            Err(e) => {
                let reason = e.to_string();
                if known_miss.is_none() {
                    warn!(zone = %label, wind = %wind, error = %e, "Active zone has no displayable route");
                }
                self.unresolved = Some(UnresolvedPair {
                    zone_id: zone.id,
                    wind: wind.clone(),
                    reason: reason.clone(),
                });
                if shows_without_route(state, &label, &wind) {
                    return Ok(TickOutcome::InSync);
                }
                state.select_without_route(label.clone(), wind.clone());
                Ok(TickOutcome::AdoptedWithoutRoute {
                    zone: label,
                    wind,
                    reason,
                })
            }
        }
    }

    /// Resolve by backend zone id, optionally reloading a stale index once
    /// on a miss.
    async fn resolve_active(
        &self,
        zone_id: i64,
        wind: &str,
        allow_reload: bool,
    ) -> Result<(RoutePolicyEntry, Vec<DeviceStep>)> {
        let entry = match self.resolver.resolve_by_zone_id(zone_id, wind).await {
            Ok(entry) => entry,
            Err(RouteError::NotFound { .. }) if allow_reload => {
                debug!(zone_id, wind, "Route not indexed; reloading policy index");
                self.resolver.store().load().await?;
                self.resolver.resolve_by_zone_id(zone_id, wind).await?
            }
            Err(e) => return Err(e),
        };
        let policy = self.resolver.fetch_policy(entry.route_id).await?;
        Ok((entry, policy))
    }
}

/// Local state already shows the backend's zone and wind with its route.
///
/// Routes are compared by backend zone id; an operator label may look like
/// another zone's id.
fn agrees(state: &SelectionState, zone: &ZoneDto, wind: &str) -> bool {
    let Some(route) = &state.active_route else {
        return false;
    };
    route.backend_zone_id == zone.id
        && route.wind_direction == wind
        && state.selected_zone.as_deref() == Some(route.zone_id.as_str())
        && state.selected_wind.as_deref() == Some(wind)
}

fn shows_without_route(state: &SelectionState, label: &str, wind: &str) -> bool {
    state.active_route.is_none()
        && state.selected_zone.as_deref() == Some(label)
        && state.selected_wind.as_deref() == Some(wind)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::memory::BackendOp;
    use crate::client::InMemoryBackend;
    use crate::engine::controller::ActivationController;
    use crate::layout::{Layout, Waypoint};
    use crate::policy::PolicyStore;
    use windroute_types::{PolicyStepDto, SignalDirection};

    struct Rig {
        backend: Arc<InMemoryBackend>,
        reconciler: ReconciliationLoop,
        controller: ActivationController,
    }

    async fn rig(authority: ReconcileAuthority) -> Rig {
        let backend = Arc::new(InMemoryBackend::demo());
        let store = Arc::new(PolicyStore::new(backend.clone()));
        store.load().await.unwrap();
        let resolver = Arc::new(PolicyResolver::new(store, backend.clone()));
        let layout = Layout::default()
            .with_entry(Waypoint::new(0.0, 0.0))
            .with_device(3, Waypoint::new(5.0, 5.0))
            .with_zone("3", Waypoint::new(9.0, 9.0));
        let paths = Arc::new(PathBuilder::new(Arc::new(layout)));
        Rig {
            reconciler: ReconciliationLoop::new(
                backend.clone(),
                resolver.clone(),
                paths.clone(),
                Duration::from_secs(2),
                authority,
            ),
            controller: ActivationController::new(backend.clone(), resolver, paths),
            backend,
        }
    }

    #[tokio::test]
    async fn adopts_activation_from_another_session() {
        let mut rig = rig(ReconcileAuthority::Backend).await;
        let mut state = SelectionState::default();
        rig.backend.force_active(3, "northwest").await;

        let outcome = rig.reconciler.tick(&mut state, None).await.unwrap();
        assert_eq!(
            outcome,
            TickOutcome::Adopted {
                zone: "3".into(),
                wind: "northwest".into(),
                route_id: 13
            }
        );
        assert_eq!(state.selected_zone.as_deref(), Some("3"));
        assert_eq!(state.selected_wind.as_deref(), Some("northwest"));
        assert_eq!(state.path_description(), "M 0 0 L 5 5 L 9 9");
        assert!(state.is_consistent());

        // Second tick: nothing to do
        let again = rig.reconciler.tick(&mut state, None).await.unwrap();
        assert_eq!(again, TickOutcome::InSync);
    }

    #[tokio::test]
    async fn letter_zones_keep_operator_label() {
        let mut rig = rig(ReconcileAuthority::Backend).await;
        let mut state = SelectionState::default();
        rig.backend.force_active(1, "southeast").await;

        rig.reconciler.tick(&mut state, None).await.unwrap();
        assert_eq!(state.selected_zone.as_deref(), Some("A"));
        assert_eq!(state.active_route.as_ref().unwrap().route_id, 11);
    }

    #[tokio::test]
    async fn overrides_diverging_local_route() {
        let mut rig = rig(ReconcileAuthority::Backend).await;
        let mut state = SelectionState::default();
        rig.controller
            .activate(&mut state, Some("A"), Some("north"))
            .await
            .unwrap();
        rig.backend.force_active(2, "north").await;

        let outcome = rig.reconciler.tick(&mut state, None).await.unwrap();
        assert!(outcome.changed_state());
        assert_eq!(state.selected_zone.as_deref(), Some("B"));
        assert_eq!(state.active_route.as_ref().unwrap().route_id, 12);
    }

    #[tokio::test]
    async fn clears_when_backend_has_no_active_zone() {
        let mut rig = rig(ReconcileAuthority::Backend).await;
        let mut state = SelectionState::default();
        rig.controller
            .activate(&mut state, Some("A"), Some("north"))
            .await
            .unwrap();
        rig.backend.force_clear().await;

        let outcome = rig.reconciler.tick(&mut state, None).await.unwrap();
        assert_eq!(outcome, TickOutcome::Cleared);
        assert_eq!(state, SelectionState::default());
    }

    #[tokio::test]
    async fn bare_selection_survives_idle_backend() {
        let mut rig = rig(ReconcileAuthority::Backend).await;
        let mut state = SelectionState {
            selected_zone: Some("A".into()),
            selected_wind: Some("north".into()),
            ..Default::default()
        };
        let before = state.clone();
        let outcome = rig.reconciler.tick(&mut state, None).await.unwrap();
        assert_eq!(outcome, TickOutcome::InSync);
        assert_eq!(state, before);
    }

    #[tokio::test]
    async fn transport_failure_leaves_state_alone() {
        let mut rig = rig(ReconcileAuthority::Backend).await;
        let mut state = SelectionState::default();
        rig.controller
            .activate(&mut state, Some("A"), Some("north"))
            .await
            .unwrap();
        let before = state.clone();

        rig.backend.set_offline(true).await;
        assert!(rig.reconciler.tick(&mut state, None).await.is_err());
        assert_eq!(state, before);

        // Policy fetch failing mid-adoption is also a no-op
        rig.backend.set_offline(false).await;
        rig.backend.force_active(2, "north").await;
        rig.backend
            .inject(
                BackendOp::RoutePolicy,
                RouteError::BackendUnreachable("reset".into()),
            )
            .await;
        assert!(rig.reconciler.tick(&mut state, None).await.is_err());
        assert_eq!(state, before);
    }

    #[tokio::test]
    async fn stale_index_is_reloaded_once() {
        let mut rig = rig(ReconcileAuthority::Backend).await;
        let mut state = SelectionState::default();
        rig.backend
            .add_route(
                30,
                2,
                "east",
                vec![PolicyStepDto {
                    device_id: 3,
                    direction: SignalDirection::Right,
                }],
            )
            .await;
        rig.backend.force_active(2, "east").await;
        let loads_before = rig.backend.calls(BackendOp::ListRoutes).await;

        let outcome = rig.reconciler.tick(&mut state, None).await.unwrap();
        assert_eq!(
            outcome,
            TickOutcome::Adopted {
                zone: "B".into(),
                wind: "east".into(),
                route_id: 30
            }
        );
        assert_eq!(rig.backend.calls(BackendOp::ListRoutes).await, loads_before + 1);
    }

    #[tokio::test]
    async fn unresolvable_active_zone_blanks_the_route() {
        let mut rig = rig(ReconcileAuthority::Backend).await;
        let mut state = SelectionState::default();
        rig.controller
            .activate(&mut state, Some("A"), Some("north"))
            .await
            .unwrap();
        // Zone B has no "southeast" route anywhere
        rig.backend.force_active(2, "southeast").await;

        let outcome = rig.reconciler.tick(&mut state, None).await.unwrap();
        assert!(matches!(outcome, TickOutcome::AdoptedWithoutRoute { .. }));
        assert_eq!(state.selected_zone.as_deref(), Some("B"));
        assert!(state.active_route.is_none());
        assert_eq!(state.path_description(), "");
    }

    #[tokio::test(start_paused = true)]
    async fn grace_window_defers_then_yields() {
        let mut rig = rig(ReconcileAuthority::LocalGrace(Duration::from_secs(3))).await;
        let mut state = SelectionState::default();
        rig.controller
            .activate(&mut state, Some("A"), Some("north"))
            .await
            .unwrap();
        let intent_at = Instant::now();
        rig.backend.force_clear().await;

        let outcome = rig.reconciler.tick(&mut state, Some(intent_at)).await.unwrap();
        assert_eq!(outcome, TickOutcome::Deferred);
        assert!(state.active_route.is_some());

        tokio::time::advance(Duration::from_secs(4)).await;
        let outcome = rig.reconciler.tick(&mut state, Some(intent_at)).await.unwrap();
        assert_eq!(outcome, TickOutcome::Cleared);
    }

    #[tokio::test]
    async fn unresolved_pair_reloads_index_only_once() {
        let mut rig = rig(ReconcileAuthority::Backend).await;
        let mut state = SelectionState::default();
        rig.backend.force_active(2, "southeast").await;
        let loads = rig.backend.calls(BackendOp::ListRoutes).await;

        let first = rig.reconciler.tick(&mut state, None).await.unwrap();
        assert!(matches!(first, TickOutcome::AdoptedWithoutRoute { .. }));
        assert_eq!(rig.backend.calls(BackendOp::ListRoutes).await, loads + 1);

        for _ in 0..3 {
            let again = rig.reconciler.tick(&mut state, None).await.unwrap();
            assert_eq!(again, TickOutcome::InSync);
        }
        assert_eq!(rig.backend.calls(BackendOp::ListRoutes).await, loads + 1);
        assert_eq!(state.selected_zone.as_deref(), Some("B"));

        // Once the route exists and the index is refreshed, the next tick adopts it
        rig.backend
            .add_route(
                31,
                2,
                "southeast",
                vec![PolicyStepDto {
                    device_id: 3,
                    direction: SignalDirection::Straight,
                }],
            )
            .await;
        rig.reconciler.resolver.store().load().await.unwrap();
        let adopted = rig.reconciler.tick(&mut state, None).await.unwrap();
        assert_eq!(
            adopted,
            TickOutcome::Adopted {
                zone: "B".into(),
                wind: "southeast".into(),
                route_id: 31
            }
        );
    }

    #[tokio::test]
    async fn routes_are_compared_by_backend_zone_id() {
        // Zone 2 is labelled "1", which is also zone 1's backend id
        let backend = Arc::new(
            InMemoryBackend::new()
                .with_zone(1, "Zone A")
                .with_zone(2, "Zone 1")
                .with_route(10, 1, "north", &[(1, SignalDirection::Straight)])
                .with_route(20, 2, "north", &[(2, SignalDirection::Left)])
                .with_echo(crate::client::memory::ActivationEcho::Nothing),
        );
        let store = Arc::new(PolicyStore::new(backend.clone()));
        store.load().await.unwrap();
        let resolver = Arc::new(PolicyResolver::new(store, backend.clone()));
        let paths = Arc::new(PathBuilder::new(Arc::new(Layout::default())));
        let mut controller =
            ActivationController::new(backend.clone(), resolver.clone(), paths.clone());
        let mut reconciler = ReconciliationLoop::new(
            backend.clone(),
            resolver,
            paths,
            Duration::from_secs(2),
            ReconcileAuthority::Backend,
        );
        let mut state = SelectionState::default();

        controller
            .activate(&mut state, Some("1"), Some("north"))
            .await
            .unwrap();
        assert_eq!(state.active_route.as_ref().unwrap().route_id, 20);
        assert_eq!(
            reconciler.tick(&mut state, None).await.unwrap(),
            TickOutcome::InSync
        );

        // Backend moves to zone 1: the local "1" label must not pass as zone 1
        backend.force_active(1, "north").await;
        let outcome = reconciler.tick(&mut state, None).await.unwrap();
        assert_eq!(
            outcome,
            TickOutcome::Adopted {
                zone: "A".into(),
                wind: "north".into(),
                route_id: 10
            }
        );
        assert_eq!(state.active_route.as_ref().unwrap().backend_zone_id, 1);
    }
}
