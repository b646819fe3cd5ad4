//! ControlBackend trait - the sole API boundary between the engine and the
//! routing backend. The engine depends on this trait, never on reqwest.

pub mod http;
pub mod memory;

pub use http::HttpBackend;
pub use memory::InMemoryBackend;

use async_trait::async_trait;
use serde_json::Value;
use windroute_types::{ActivateResponse, PolicyStepDto, RouteDto, ZoneDto, ZoneRef};

use crate::error::Result;

#[async_trait]
pub trait ControlBackend: Send + Sync {
    /// Full zone list, including activation flags.
    async fn list_zones(&self) -> Result<Vec<ZoneDto>>;

    /// Every registered (zone, wind) route.
    async fn list_routes(&self) -> Result<Vec<RouteDto>>;

    /// Ordered device sequence for one route. May be empty.
    async fn route_policy(&self, route_id: i64) -> Result<Vec<PolicyStepDto>>;

    async fn activate(&self, zone: &ZoneRef, wind: &str) -> Result<ActivateResponse>;

    /// Success/failure only.
    async fn deactivate(&self, zone: &ZoneRef) -> Result<()>;

    /// Informational; callers must not depend on the result.
    async fn zone_status(&self, zone: &ZoneRef) -> Result<Value>;
}
