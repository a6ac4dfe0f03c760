//! Area logger collaborators
//!
//! ## Responsibilities
//!
//! - Persist per-area occupancy snapshots produced by the aggregation loop
//!
//! Loggers are append-only consumers of aggregation output; they never feed
//! back into the loop. Dispatch is by configured logger kind, mirroring how
//! per-camera log writers are selected elsewhere in the platform.

use chrono::Local;
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;

use crate::camera_log::TIMESTAMP_FORMAT;
use crate::error::Result;

/// Identity of a camera that contributed to an aggregation cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraRef {
    pub id: String,
    pub name: String,
}

/// Aggregated data pushed to loggers each cycle
#[derive(Debug, Clone, Copy)]
pub struct AreaOccupancy {
    pub occupancy: u32,
}

/// Area logger dispatch
pub enum Logger {
    FileSystem(FileSystemLogger),
}

impl Logger {
    pub async fn update(&self, cameras: &[CameraRef], data: &AreaOccupancy) -> Result<()> {
        match self {
            Logger::FileSystem(logger) => logger.update(cameras, data).await,
        }
    }
}

/// Appends one CSV row per aggregation cycle under
/// `<log_dir>/<area_id>/occupancy_log/<date>.csv`.
pub struct FileSystemLogger {
    occupancy_log_dir: PathBuf,
}

impl FileSystemLogger {
    pub async fn new(log_dir: &Path, area_id: &str) -> Result<Self> {
        let occupancy_log_dir = log_dir.join(area_id).join("occupancy_log");
        tokio::fs::create_dir_all(&occupancy_log_dir).await?;
        Ok(Self { occupancy_log_dir })
    }

    pub async fn update(&self, cameras: &[CameraRef], data: &AreaOccupancy) -> Result<()> {
        let now = Local::now();
        let path = self
            .occupancy_log_dir
            .join(format!("{}.csv", now.format("%Y-%m-%d")));
        let new_file = !tokio::fs::try_exists(&path).await.unwrap_or(false);

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        if new_file {
            file.write_all(b"Timestamp,Cameras,Occupancy\n").await?;
        }
        // Camera ids are ';'-joined to keep the row a plain CSV record.
        let ids: Vec<&str> = cameras.iter().map(|c| c.id.as_str()).collect();
        let row = format!(
            "{},{},{}\n",
            now.format(TIMESTAMP_FORMAT),
            ids.join(";"),
            data.occupancy
        );
        file.write_all(row.as_bytes()).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_update_appends_rows_with_single_header() {
        let dir = TempDir::new().unwrap();
        let logger = FileSystemLogger::new(dir.path(), "area0").await.unwrap();
        let cameras = vec![
            CameraRef {
                id: "cam0".to_string(),
                name: "Entrance".to_string(),
            },
            CameraRef {
                id: "cam1".to_string(),
                name: "Lobby".to_string(),
            },
        ];
        logger
            .update(&cameras, &AreaOccupancy { occupancy: 4 })
            .await
            .unwrap();
        logger
            .update(&cameras, &AreaOccupancy { occupancy: 6 })
            .await
            .unwrap();

        let day_file = std::fs::read_dir(dir.path().join("area0").join("occupancy_log"))
            .unwrap()
            .next()
            .unwrap()
            .unwrap()
            .path();
        let contents = std::fs::read_to_string(day_file).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "Timestamp,Cameras,Occupancy");
        assert!(lines[1].ends_with(",cam0;cam1,4"));
        assert!(lines[2].ends_with(",cam0;cam1,6"));
    }
}
