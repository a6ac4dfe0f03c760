//! ConfigStore - processing configuration
//!
//! ## Responsibilities
//!
//! - Load and validate the processor configuration file
//! - Hand out source and area descriptors to the orchestrator and workers
//!
//! The configuration API that edits this file is a separate service; the
//! control plane only ever reads it.

mod types;

pub use types::*;

use std::collections::HashSet;
use std::path::Path;

use crate::error::{Error, Result};

/// ConfigStore instance
#[derive(Debug, Clone)]
pub struct ConfigStore {
    config: ProcessorConfig,
}

impl ConfigStore {
    /// Load and validate a processor configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config: ProcessorConfig = serde_json::from_str(&raw)
            .map_err(|e| Error::Config(format!("cannot parse {}: {}", path.display(), e)))?;
        Self::from_config(config)
    }

    /// Validate an already-parsed configuration.
    pub fn from_config(config: ProcessorConfig) -> Result<Self> {
        let mut seen = HashSet::new();
        for source in &config.sources {
            if !seen.insert(source.id.as_str()) {
                return Err(Error::Validation(format!(
                    "duplicate source id: {}",
                    source.id
                )));
            }
        }
        for area in &config.areas {
            area.validate_rules()?;
            for camera_id in &area.cameras {
                if !seen.contains(camera_id.as_str()) {
                    tracing::warn!(
                        area_id = %area.id,
                        camera_id = %camera_id,
                        "Area references unknown camera"
                    );
                }
            }
        }
        Ok(Self { config })
    }

    pub fn app(&self) -> &AppSettings {
        &self.config.app
    }

    pub fn video_sources(&self) -> &[SourceConfig] {
        &self.config.sources
    }

    pub fn areas(&self) -> &[AreaConfig] {
        &self.config.areas
    }

    /// Member cameras of an area, in source order.
    pub fn cameras_for_area(&self, area: &AreaConfig) -> Vec<SourceConfig> {
        self.config
            .sources
            .iter()
            .filter(|s| area.cameras.iter().any(|id| id == &s.id))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(id: &str) -> SourceConfig {
        SourceConfig {
            id: id.to_string(),
            name: format!("Camera {id}"),
            url: format!("rtsp://cam/{id}"),
            tags: vec![],
            notify: NotifyPolicy::default(),
        }
    }

    #[test]
    fn test_duplicate_source_ids_rejected() {
        let config = ProcessorConfig {
            app: AppSettings::default(),
            sources: vec![source("cam0"), source("cam0")],
            areas: vec![],
        };
        assert!(ConfigStore::from_config(config).is_err());
    }

    #[test]
    fn test_cameras_for_area_preserves_source_order() {
        let config = ProcessorConfig {
            app: AppSettings::default(),
            sources: vec![source("cam0"), source("cam1"), source("cam2")],
            areas: vec![AreaConfig {
                id: "area0".to_string(),
                name: "Lobby".to_string(),
                cameras: vec!["cam2".to_string(), "cam0".to_string()],
                occupancy_threshold: 10,
                occupancy_rules: vec![],
                notify: NotifyPolicy::default(),
            }],
        };
        let store = ConfigStore::from_config(config).unwrap();
        let areas = store.areas().to_vec();
        let members = store.cameras_for_area(&areas[0]);
        let ids: Vec<&str> = members.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["cam0", "cam2"]);
    }
}
