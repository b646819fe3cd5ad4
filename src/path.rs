//! PathBuilder - device policy to a renderable polyline.

use std::fmt::Write as _;
use std::sync::Arc;

use serde::Serialize;

use crate::layout::{Layout, Waypoint};
use crate::policy::DeviceStep;

/// Waypoints plus their SVG-style path description
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RenderedPath {
    pub waypoints: Vec<Waypoint>,
    pub description: String,
}

impl RenderedPath {
    /// True when the rendering layer should show no route.
    pub fn is_blank(&self) -> bool {
        self.description.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct PathBuilder {
    layout: Arc<Layout>,
}

impl PathBuilder {
    pub fn new(layout: Arc<Layout>) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Entry, then each step's device, then destination.
    ///
    /// Steps whose device has no known waypoint are skipped. Without an
    /// entry there is no path at all.
    pub fn build(
        &self,
        entry: Option<Waypoint>,
        steps: &[DeviceStep],
        destination: Option<Waypoint>,
    ) -> Vec<Waypoint> {
        let Some(entry) = entry else {
            return Vec::new();
        };

        let mut waypoints = Vec::with_capacity(steps.len() + 2);
        waypoints.push(entry);
        for step in steps {
            match self.layout.device(step.device_id) {
                Some(at) => waypoints.push(at),
                None => tracing::debug!(device_id = step.device_id, "No waypoint for device"),
            }
        }
        waypoints.extend(destination);
        waypoints
    }

    /// `M x y L x y ...`; fewer than two points renders as "".
    pub fn to_path_description(waypoints: &[Waypoint]) -> String {
        if waypoints.len() < 2 {
            return String::new();
        }
        let mut out = String::new();
        for (i, at) in waypoints.iter().enumerate() {
            let cmd = if i == 0 { "M" } else { " L" };
            // Writing to a String cannot fail.
            let _ = write!(out, "{cmd} {} {}", at.x, at.y);
        }
        out
    }

    /// Full path for a route into `zone_id`, using the layout's entry point
    /// and the zone's centroid.
    pub fn render_route(&self, zone_id: &str, steps: &[DeviceStep]) -> RenderedPath {
        let waypoints = self.build(
            self.layout.entry,
            steps,
            self.layout.zone_centroid(zone_id),
        );
        let description = Self::to_path_description(&waypoints);
        RenderedPath {
            waypoints,
            description,
        }
    }
}
