//! Route policy lookup.
//!
//! `PolicyStore` caches which routes exist per wind direction;
//! `PolicyResolver` turns a (zone, wind) selection into a route and its
//! ordered device sequence.

pub mod names;
pub mod resolver;
pub mod store;

pub use resolver::PolicyResolver;
pub use store::{PolicyIndex, PolicyStore, ZoneOption};

use serde::{Deserialize, Serialize};
use windroute_types::{PolicyStepDto, SignalDirection};

/// One registered route, as indexed under its wind direction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutePolicyEntry {
    pub route_id: i64,
    pub zone_id: i64,
    pub zone_name: String,
    pub wind_direction: String,
}

/// One signal along an activated route
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceStep {
    pub device_id: i64,
    pub direction: SignalDirection,
}

impl From<PolicyStepDto> for DeviceStep {
    fn from(dto: PolicyStepDto) -> Self {
        Self {
            device_id: dto.device_id,
            direction: dto.direction,
        }
    }
}
