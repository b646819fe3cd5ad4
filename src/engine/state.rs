//! Selection state owned by the engine.
//!
//! This is the only mutable state the engine holds. Server data (zones,
//! routes, policies) is never cached here beyond the active route.

use serde::Serialize;

use crate::path::RenderedPath;
use crate::policy::DeviceStep;

/// Route currently shown as active
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActiveRoute {
    pub route_id: i64,
    /// Operator-facing zone id the route leads to
    pub zone_id: String,
    /// Backend zone id behind `zone_id`; the identity reconciliation compares
    pub backend_zone_id: i64,
    pub wind_direction: String,
    pub policy: Vec<DeviceStep>,
}

/// Controller lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ControllerPhase {
    #[default]
    Idle,
    Activating,
    Active,
    Deactivating,
}

impl ControllerPhase {
    /// Resting phase implied by a state.
    pub fn settled(state: &SelectionState) -> Self {
        if state.active_route.is_some() {
            Self::Active
        } else {
            Self::Idle
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SelectionState {
    pub selected_zone: Option<String>,
    pub selected_wind: Option<String>,
    pub active_route: Option<ActiveRoute>,
    pub rendered_path: RenderedPath,
}

impl SelectionState {
    /// Path description for the rendering layer; "" means no visible route.
    pub fn path_description(&self) -> &str {
        &self.rendered_path.description
    }

    /// Replace everything with an active route and its path.
    pub fn adopt(&mut self, route: ActiveRoute, path: RenderedPath) {
        self.selected_zone = Some(route.zone_id.clone());
        self.selected_wind = Some(route.wind_direction.clone());
        self.active_route = Some(route);
        self.rendered_path = path;
    }

    /// Select a zone and wind with no route shown.
    pub fn select_without_route(&mut self, zone: String, wind: String) {
        self.selected_zone = Some(zone);
        self.selected_wind = Some(wind);
        self.active_route = None;
        self.rendered_path = RenderedPath::default();
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// An active route implies both selections are set and the path belongs
    /// to that route.
    pub fn is_consistent(&self) -> bool {
        match &self.active_route {
            None => self.rendered_path.is_blank(),
            Some(route) => {
                self.selected_zone.as_deref() == Some(route.zone_id.as_str())
                    && self.selected_wind.as_deref() == Some(route.wind_direction.as_str())
            }
        }
    }
}
