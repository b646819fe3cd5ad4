//! Static facility layout: where each signaling device and zone sits on the
//! operator map. Read-only after load.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::policy::names::zone_name_matches;

/// 2-D map coordinate
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Waypoint {
    pub x: f64,
    pub y: f64,
}

impl Waypoint {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Layout {
    /// Where every route starts (the facility gate)
    #[serde(default)]
    pub entry: Option<Waypoint>,
    #[serde(default)]
    pub devices: HashMap<i64, Waypoint>,
    /// Zone centroids keyed by operator-facing zone id
    #[serde(default)]
    pub zones: BTreeMap<String, Waypoint>,
}

impl Layout {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).context("Failed to parse layout YAML")
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read layout file {}", path.display()))?;
        Self::from_yaml_str(&text).with_context(|| format!("Invalid layout in {}", path.display()))
    }

    pub fn with_entry(mut self, at: Waypoint) -> Self {
        self.entry = Some(at);
        self
    }

    pub fn with_device(mut self, device_id: i64, at: Waypoint) -> Self {
        self.devices.insert(device_id, at);
        self
    }

    pub fn with_zone(mut self, zone_id: &str, at: Waypoint) -> Self {
        self.zones.insert(zone_id.to_string(), at);
        self
    }

    pub fn device(&self, device_id: i64) -> Option<Waypoint> {
        self.devices.get(&device_id).copied()
    }

    /// Zone centroid by exact key, then by tolerant zone-name match.
    pub fn zone_centroid(&self, zone_id: &str) -> Option<Waypoint> {
        if let Some(at) = self.zones.get(zone_id) {
            return Some(*at);
        }
        self.zones
            .iter()
            .find(|(key, _)| zone_name_matches(zone_id, key))
            .map(|(_, at)| *at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
entry: { x: 0, y: 0 }
devices:
  1: { x: 10, y: 0 }
  2: { x: 10, y: 15.5 }
zones:
  "A": { x: 40, y: 40 }
  "5": { x: 20, y: 20 }
"#;

    #[test]
    fn parses_sample_layout() {
        let layout = Layout::from_yaml_str(SAMPLE).unwrap();
        assert_eq!(layout.entry, Some(Waypoint::new(0.0, 0.0)));
        assert_eq!(layout.device(2), Some(Waypoint::new(10.0, 15.5)));
        assert_eq!(layout.device(3), None);
    }

    #[test]
    fn zone_lookup_is_tolerant() {
        let layout = Layout::from_yaml_str(SAMPLE).unwrap();
        assert_eq!(layout.zone_centroid("A"), Some(Waypoint::new(40.0, 40.0)));
        assert_eq!(layout.zone_centroid("a"), Some(Waypoint::new(40.0, 40.0)));
        assert_eq!(layout.zone_centroid("05"), Some(Waypoint::new(20.0, 20.0)));
        assert_eq!(layout.zone_centroid("Q"), None);
    }

    #[test]
    fn missing_sections_default_to_empty() {
        let layout = Layout::from_yaml_str("entry: { x: 1, y: 2 }\n").unwrap();
        assert!(layout.devices.is_empty());
        assert!(layout.zones.is_empty());
    }

    #[test]
    fn load_reports_path_on_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "devices: [not, a, map]").unwrap();
        let err = Layout::load(file.path()).unwrap_err();
        assert!(format!("{err:#}").contains("Invalid layout"));
    }
}
