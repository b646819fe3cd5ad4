//! InMemoryBackend - in-process implementation of `ControlBackend`.
//!
//! Holds zones, routes and device policies in memory and enforces the
//! backend's single-active-zone invariant. Supports failure injection and
//! call counting so tests and the CLI demo can drive the engine without a
//! server.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use windroute_types::{
    ActivateResponse, ActiveRouteDto, PolicyStepDto, RouteDto, SignalDirection, ZoneDto, ZoneRef,
};

use super::ControlBackend;
use crate::error::{Result, RouteError};
use crate::policy::names;

/// Backend operations, for failure injection and call counting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendOp {
    ListZones,
    ListRoutes,
    RoutePolicy,
    Activate,
    Deactivate,
    ZoneStatus,
}

/// How much route detail `activate` echoes back
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ActivationEcho {
    /// Route id and policy
    #[default]
    Full,
    /// Route id only; caller must fetch the policy
    IdOnly,
    /// Empty body
    Nothing,
}

#[derive(Debug, Default)]
struct Inner {
    zones: Vec<ZoneDto>,
    routes: Vec<RouteDto>,
    policies: HashMap<i64, Vec<PolicyStepDto>>,
    echo: ActivationEcho,
    offline: bool,
    injected: HashMap<BackendOp, Vec<RouteError>>,
    calls: HashMap<BackendOp, usize>,
}

impl Inner {
    /// Record the call and pop any injected failure for it.
    fn enter(&mut self, op: BackendOp) -> Result<()> {
        *self.calls.entry(op).or_default() += 1;
        if self.offline {
            return Err(RouteError::BackendUnreachable("connection refused".into()));
        }
        if let Some(queue) = self.injected.get_mut(&op) {
            if !queue.is_empty() {
                return Err(queue.remove(0));
            }
        }
        Ok(())
    }

    fn zone_index(&self, zone: &ZoneRef) -> Option<usize> {
        self.zones.iter().position(|z| match zone {
            ZoneRef::Numeric(id) => z.id == *id,
            ZoneRef::Label(label) => names::zone_name_matches(label, &z.name),
        })
    }

    fn set_active(&mut self, idx: usize, wind: &str) {
        for zone in &mut self.zones {
            zone.is_active = false;
            zone.active_wind_direction = None;
        }
        self.zones[idx].is_active = true;
        self.zones[idx].active_wind_direction = Some(wind.to_string());
    }
}

#[derive(Debug, Default)]
pub struct InMemoryBackend {
    inner: Mutex<Inner>,
}

fn not_found(what: String) -> RouteError {
    RouteError::BackendRejected {
        status: 404,
        body: what,
    }
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_zone(mut self, id: i64, name: &str) -> Self {
        self.inner.get_mut().zones.push(ZoneDto {
            id,
            name: name.to_string(),
            is_active: false,
            active_wind_direction: None,
        });
        self
    }

    pub fn with_route(
        mut self,
        id: i64,
        zone_id: i64,
        wind: &str,
        steps: &[(i64, SignalDirection)],
    ) -> Self {
        let inner = self.inner.get_mut();
        inner.routes.push(RouteDto {
            id,
            zone_id,
            wind_direction: wind.to_string(),
        });
        inner.policies.insert(
            id,
            steps
                .iter()
                .map(|&(device_id, direction)| PolicyStepDto {
                    device_id,
                    direction,
                })
                .collect(),
        );
        self
    }

    pub fn with_echo(mut self, echo: ActivationEcho) -> Self {
        self.inner.get_mut().echo = echo;
        self
    }

    /// Small facility used by the CLI demo and documentation.
    pub fn demo() -> Self {
        use SignalDirection::*;
        Self::new()
            .with_zone(1, "Zone A")
            .with_zone(2, "Zone B")
            .with_zone(3, "Zone 3")
            .with_route(10, 1, "north", &[(1, Straight), (2, Left)])
            .with_route(11, 1, "southeast", &[(1, Right), (3, Straight)])
            .with_route(12, 2, "north", &[(1, Straight), (2, Right), (4, Straight)])
            .with_route(13, 3, "northwest", &[(3, Left), (4, Left)])
    }

    pub async fn set_offline(&self, offline: bool) {
        self.inner.lock().await.offline = offline;
    }

    pub async fn set_echo(&self, echo: ActivationEcho) {
        self.inner.lock().await.echo = echo;
    }

    /// Queue a failure for the next call of `op`.
    pub async fn inject(&self, op: BackendOp, error: RouteError) {
        self.inner
            .lock()
            .await
            .injected
            .entry(op)
            .or_default()
            .push(error);
    }

    pub async fn calls(&self, op: BackendOp) -> usize {
        self.inner.lock().await.calls.get(&op).copied().unwrap_or(0)
    }

    /// Activate a zone out-of-band, as another operator's session would.
    pub async fn force_active(&self, zone_id: i64, wind: &str) {
        let mut inner = self.inner.lock().await;
        if let Some(idx) = inner.zone_index(&ZoneRef::Numeric(zone_id)) {
            inner.set_active(idx, wind);
        }
    }

    /// Deactivate everything out-of-band.
    pub async fn force_clear(&self) {
        let mut inner = self.inner.lock().await;
        for zone in &mut inner.zones {
            zone.is_active = false;
            zone.active_wind_direction = None;
        }
    }

    pub async fn add_route(&self, id: i64, zone_id: i64, wind: &str, steps: Vec<PolicyStepDto>) {
        let mut inner = self.inner.lock().await;
        inner.routes.push(RouteDto {
            id,
            zone_id,
            wind_direction: wind.to_string(),
        });
        inner.policies.insert(id, steps);
    }

    pub async fn active_zone(&self) -> Option<(i64, Option<String>)> {
        let inner = self.inner.lock().await;
        inner
            .zones
            .iter()
            .find(|z| z.is_active)
            .map(|z| (z.id, z.active_wind_direction.clone()))
    }
}

#[async_trait]
impl ControlBackend for InMemoryBackend {
    async fn list_zones(&self) -> Result<Vec<ZoneDto>> {
        let mut inner = self.inner.lock().await;
        inner.enter(BackendOp::ListZones)?;
        Ok(inner.zones.clone())
    }

    async fn list_routes(&self) -> Result<Vec<RouteDto>> {
        let mut inner = self.inner.lock().await;
        inner.enter(BackendOp::ListRoutes)?;
        Ok(inner.routes.clone())
    }

    async fn route_policy(&self, route_id: i64) -> Result<Vec<PolicyStepDto>> {
        let mut inner = self.inner.lock().await;
        inner.enter(BackendOp::RoutePolicy)?;
        inner
            .policies
            .get(&route_id)
            .cloned()
            .ok_or_else(|| not_found(format!("route {route_id}")))
    }

    async fn activate(&self, zone: &ZoneRef, wind: &str) -> Result<ActivateResponse> {
        let mut inner = self.inner.lock().await;
        inner.enter(BackendOp::Activate)?;
        let idx = inner
            .zone_index(zone)
            .ok_or_else(|| not_found(format!("zone {zone}")))?;
        let zone_id = inner.zones[idx].id;
        let route = inner
            .routes
            .iter()
            .find(|r| r.zone_id == zone_id && r.wind_direction == wind)
            .cloned()
            .ok_or_else(|| not_found(format!("route for zone {zone} wind {wind}")))?;
        inner.set_active(idx, wind);

        let active_route = match inner.echo {
            ActivationEcho::Full => Some(ActiveRouteDto {
                id: route.id,
                policy: inner.policies.get(&route.id).cloned(),
            }),
            ActivationEcho::IdOnly => Some(ActiveRouteDto {
                id: route.id,
                policy: None,
            }),
            ActivationEcho::Nothing => None,
        };
        Ok(ActivateResponse { active_route })
    }

    async fn deactivate(&self, zone: &ZoneRef) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.enter(BackendOp::Deactivate)?;
        let idx = inner
            .zone_index(zone)
            .ok_or_else(|| not_found(format!("zone {zone}")))?;
        inner.zones[idx].is_active = false;
        inner.zones[idx].active_wind_direction = None;
        Ok(())
    }

    async fn zone_status(&self, zone: &ZoneRef) -> Result<Value> {
        let mut inner = self.inner.lock().await;
        inner.enter(BackendOp::ZoneStatus)?;
        let idx = inner
            .zone_index(zone)
            .ok_or_else(|| not_found(format!("zone {zone}")))?;
        let z = &inner.zones[idx];
        Ok(json!({
            "zone_id": z.id,
            "is_active": z.is_active,
            "wind_direction": z.active_wind_direction,
        }))
    }
}
