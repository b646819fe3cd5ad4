//! windroute - route activation synchronization and path computation.
//!
//! Operators pick a destination zone and a wind direction; the engine asks
//! the backend to activate the matching route, fetches its ordered device
//! policy, and renders the path on the facility map. A reconciliation loop
//! keeps the local view converged with the backend when activations happen
//! elsewhere.
//!
//! ## Modules
//!
//! - `client` - `ControlBackend` seam with HTTP and in-memory backends
//! - `policy` - zone/wind index, tolerant zone naming, policy resolution
//! - `path` - device sequence to waypoints and path description
//! - `engine` - activation controller, reconciliation, state-owning actor
//! - `layout` - static device and zone coordinates
//! - `config` - environment-driven console configuration

pub mod client;
pub mod config;
pub mod engine;
pub mod error;
pub mod layout;
pub mod path;
pub mod policy;

pub use client::{ControlBackend, HttpBackend, InMemoryBackend};
pub use config::{ConsoleConfig, ReconcileAuthority};
pub use engine::{EngineHandle, EngineSnapshot, RouteEngine};
pub use error::{Result, RouteError};
pub use layout::{Layout, Waypoint};
pub use path::{PathBuilder, RenderedPath};
pub use policy::{PolicyResolver, PolicyStore};
