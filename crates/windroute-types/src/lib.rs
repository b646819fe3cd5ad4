//! Wire Types for the windroute console
//!
//! This crate is the SINGLE SOURCE OF TRUTH for every JSON body exchanged with
//! the routing backend.
//!
//! ## Endpoints
//!
//! ```text
//! GET  /api/zones/              -> Vec<ZoneDto>
//! GET  /api/routes/             -> Vec<RouteDto>
//! GET  /api/routes/{id}/policy  -> PolicyResponse
//! POST /api/activate/           ActivateRequest   -> ActivateResponse
//! POST /api/deactivate/         DeactivateRequest -> (status only)
//! GET  /api/zones/{id}/status   -> serde_json::Value (informational)
//! ```
//!
//! ## Rules
//!
//! 1. Backend-optional fields carry `#[serde(default)]` so older backends
//!    that omit them still decode.
//! 2. Zone references go out as integers whenever the operator-facing id is
//!    numeric (`ZoneRef`).

use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// ZONES
// ============================================================================

/// One row of `GET /api/zones/`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneDto {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub is_active: bool,
    /// Set only while `is_active` is true
    #[serde(default)]
    pub active_wind_direction: Option<String>,
}

/// Zone reference as sent in request bodies.
///
/// Numeric ids serialize as JSON numbers, letter labels as JSON strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ZoneRef {
    Numeric(i64),
    Label(String),
}

impl ZoneRef {
    /// Parse an operator-facing zone id, preferring the numeric form.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        match trimmed.parse::<i64>() {
            Ok(n) => ZoneRef::Numeric(n),
            Err(_) => ZoneRef::Label(trimmed.to_string()),
        }
    }

    /// Path segment form used in `/api/zones/{id}/status`.
    pub fn as_path_segment(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ZoneRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ZoneRef::Numeric(n) => write!(f, "{n}"),
            ZoneRef::Label(s) => f.write_str(s),
        }
    }
}

impl From<i64> for ZoneRef {
    fn from(id: i64) -> Self {
        ZoneRef::Numeric(id)
    }
}

// ============================================================================
// ROUTES & POLICIES
// ============================================================================

/// One row of `GET /api/routes/`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteDto {
    pub id: i64,
    pub zone_id: i64,
    pub wind_direction: String,
}

/// Indication a signaling device shows while its route is active
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalDirection {
    Left,
    Straight,
    Right,
}

impl fmt::Display for SignalDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SignalDirection::Left => "left",
            SignalDirection::Straight => "straight",
            SignalDirection::Right => "right",
        };
        f.write_str(s)
    }
}

/// One step of a route's device policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyStepDto {
    pub device_id: i64,
    pub direction: SignalDirection,
}

/// Body of `GET /api/routes/{id}/policy`
///
/// Some backend builds return the bare list, others wrap it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PolicyResponse {
    Steps(Vec<PolicyStepDto>),
    Wrapped { policy: Vec<PolicyStepDto> },
}

impl PolicyResponse {
    pub fn into_steps(self) -> Vec<PolicyStepDto> {
        match self {
            PolicyResponse::Steps(steps) => steps,
            PolicyResponse::Wrapped { policy } => policy,
        }
    }
}

// ============================================================================
// ACTIVATION
// ============================================================================

/// Body of `POST /api/activate/`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivateRequest {
    pub zone_id: ZoneRef,
    pub wind_direction: String,
}

/// Response of `POST /api/activate/`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivateResponse {
    #[serde(default)]
    pub active_route: Option<ActiveRouteDto>,
}

/// Route detail the backend may echo back on activation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveRouteDto {
    pub id: i64,
    #[serde(default)]
    pub policy: Option<Vec<PolicyStepDto>>,
}

/// Body of `POST /api/deactivate/`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeactivateRequest {
    pub zone_id: ZoneRef,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn zone_ref_prefers_numeric() {
        assert_eq!(ZoneRef::parse("5"), ZoneRef::Numeric(5));
        assert_eq!(ZoneRef::parse(" 12 "), ZoneRef::Numeric(12));
        assert_eq!(ZoneRef::parse("B"), ZoneRef::Label("B".into()));
    }

    #[test]
    fn activate_request_serializes_zone_shape() {
        let numeric = ActivateRequest {
            zone_id: ZoneRef::parse("7"),
            wind_direction: "northwest".into(),
        };
        assert_eq!(
            serde_json::to_value(&numeric).unwrap(),
            json!({"zone_id": 7, "wind_direction": "northwest"})
        );

        let label = DeactivateRequest {
            zone_id: ZoneRef::parse("C"),
        };
        assert_eq!(serde_json::to_value(&label).unwrap(), json!({"zone_id": "C"}));
    }

    #[test]
    fn zone_defaults_when_flags_missing() {
        let zone: ZoneDto = serde_json::from_value(json!({"id": 3, "name": "Zone 3"})).unwrap();
        assert!(!zone.is_active);
        assert_eq!(zone.active_wind_direction, None);
    }

    #[test]
    fn policy_response_accepts_both_shapes() {
        let bare: PolicyResponse =
            serde_json::from_value(json!([{"device_id": 1, "direction": "left"}])).unwrap();
        let wrapped: PolicyResponse = serde_json::from_value(
            json!({"policy": [{"device_id": 1, "direction": "left"}]}),
        )
        .unwrap();
        assert_eq!(bare.into_steps(), wrapped.into_steps());
    }

    #[test]
    fn activate_response_tolerates_missing_detail() {
        let empty: ActivateResponse = serde_json::from_value(json!({})).unwrap();
        assert!(empty.active_route.is_none());

        let no_policy: ActivateResponse =
            serde_json::from_value(json!({"active_route": {"id": 4}})).unwrap();
        let route = no_policy.active_route.unwrap();
        assert_eq!(route.id, 4);
        assert!(route.policy.is_none());
    }

    #[test]
    fn unknown_direction_is_rejected() {
        let err = serde_json::from_value::<PolicyStepDto>(
            json!({"device_id": 1, "direction": "diagonal"}),
        );
        assert!(err.is_err());
    }
}
