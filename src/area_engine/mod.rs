//! Area aggregation loop
//!
//! ## Responsibilities
//!
//! - Poll member cameras' daily logs and aggregate area occupancy
//! - Push each cycle's result to the configured area loggers
//! - Fire occupancy alerts, subject to per-area cooldown
//!
//! One engine instance runs per area inside the area worker. The loop is
//! a small state machine: warm up while camera workers start emitting
//! logs, wait until every member camera has a log file for today, then
//! aggregate on a fixed cadence until the cancellation token flips.

use chrono::{Local, NaiveDateTime};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::camera_log::{CameraLogReader, ObjectsLogRow};
use crate::config::{AppSettings, AreaConfig, SourceConfig};
use crate::error::Result;
use crate::loggers::{AreaOccupancy, CameraRef, FileSystemLogger, Logger};
use crate::notifications::{ChatService, EntityRef, MailService};

/// Fixed startup delay letting camera workers begin emitting logs
const WARMUP_DELAY: Duration = Duration::from_secs(15);
/// Retry interval while a member camera's daily log is still absent
const LOG_RETRY_INTERVAL: Duration = Duration::from_secs(5);
/// Maximum age of a camera's last row still considered live
const STALENESS_WINDOW: Duration = Duration::from_secs(30);

/// Loop timing knobs, derived from settings but overridable in tests
#[derive(Debug, Clone)]
pub struct AreaTimings {
    pub warmup: Duration,
    pub log_retry: Duration,
    pub staleness: Duration,
    pub idle: Duration,
}

impl AreaTimings {
    pub fn from_settings(app: &AppSettings) -> Self {
        Self {
            warmup: WARMUP_DELAY,
            log_retry: LOG_RETRY_INTERVAL,
            staleness: STALENESS_WINDOW,
            // Slightly longer than the log cadence so every cycle sees a
            // fresh row from a healthy camera.
            idle: Duration::from_millis(app.log_interval_secs * 1000 + 100),
        }
    }
}

/// Minimum elapsed time between two alert dispatches
#[derive(Debug)]
pub struct AlertCooldown {
    min_interval: Duration,
    last_fired: Option<Instant>,
}

impl AlertCooldown {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_fired: None,
        }
    }

    /// Whether an alert may fire at `now`; firing is recorded.
    pub fn check_at(&mut self, now: Instant) -> bool {
        match self.last_fired {
            Some(prev) if now.duration_since(prev) < self.min_interval => false,
            _ => {
                self.last_fired = Some(now);
                true
            }
        }
    }

    pub fn check(&mut self) -> bool {
        self.check_at(Instant::now())
    }
}

/// One camera's contribution to an aggregation cycle
#[derive(Debug, Clone)]
pub struct CameraReading {
    pub camera: CameraRef,
    pub row: Option<ObjectsLogRow>,
}

/// Result of one aggregation cycle
#[derive(Debug, Default)]
pub struct AggregateOutcome {
    /// Cameras whose last row was fresh
    pub active: Vec<CameraRef>,
    /// Sum of fresh cameras' detected-object counts
    pub occupancy: u32,
    /// Cameras excluded because their last row fell outside the window
    pub stale: Vec<String>,
    /// Cameras whose log held no complete row yet
    pub silent: Vec<String>,
}

/// Fold per-camera readings into an occupancy total, excluding stale rows.
pub fn aggregate(
    readings: &[CameraReading],
    now: NaiveDateTime,
    staleness: Duration,
) -> AggregateOutcome {
    let mut outcome = AggregateOutcome::default();
    for reading in readings {
        match &reading.row {
            Some(row)
                if now.signed_duration_since(row.timestamp).num_seconds()
                    <= staleness.as_secs() as i64 =>
            {
                outcome.occupancy += row.detected_objects;
                outcome.active.push(reading.camera.clone());
            }
            Some(_) => outcome.stale.push(reading.camera.id.clone()),
            None => outcome.silent.push(reading.camera.id.clone()),
        }
    }
    outcome
}

/// Per-area aggregation engine
pub struct AreaEngine {
    area: AreaConfig,
    members: Vec<CameraRef>,
    readers: Vec<CameraLogReader>,
    loggers: Vec<Logger>,
    mail: Option<MailService>,
    chat: Option<ChatService>,
    timings: AreaTimings,
    cooldown: AlertCooldown,
}

impl AreaEngine {
    /// Assemble an engine for one area: log readers for every member
    /// camera, the area's occupancy logger, and its enabled notifiers.
    pub async fn build(
        area: AreaConfig,
        members: &[SourceConfig],
        app: &AppSettings,
        timings: AreaTimings,
        mail: Option<MailService>,
        chat: Option<ChatService>,
    ) -> Result<Self> {
        let readers = members
            .iter()
            .map(|m| CameraLogReader::new(&app.log_directory, &m.id))
            .collect();
        let member_refs = members
            .iter()
            .map(|m| CameraRef {
                id: m.id.clone(),
                name: m.name.clone(),
            })
            .collect();
        let loggers = vec![Logger::FileSystem(
            FileSystemLogger::new(&app.log_directory, &area.id).await?,
        )];
        let cooldown = AlertCooldown::new(Duration::from_secs(app.occupancy_cooldown_secs));
        Ok(Self {
            area,
            members: member_refs,
            readers,
            loggers,
            mail,
            chat,
            timings,
            cooldown,
        })
    }

    /// Run the aggregation loop until cancelled. Errors escape to the
    /// supervising task, which restarts the loop.
    pub async fn run(&mut self, cancel: &CancellationToken) -> Result<()> {
        tracing::info!(
            area_id = %self.area.id,
            cameras = self.members.len(),
            "Area aggregation warming up"
        );
        if sleep_cancelled(cancel, self.timings.warmup).await {
            return Ok(());
        }

        while !cancel.is_cancelled() {
            let today = Local::now().date_naive();

            // Waiting for logs: every member camera must have today's file.
            let mut missing = Vec::new();
            for reader in &self.readers {
                if !reader.day_log_exists(today).await {
                    missing.push(reader.camera_id().to_string());
                }
            }
            if !missing.is_empty() {
                tracing::debug!(
                    area_id = %self.area.id,
                    missing = ?missing,
                    "Waiting for camera logs"
                );
                if sleep_cancelled(cancel, self.timings.log_retry).await {
                    return Ok(());
                }
                continue;
            }

            self.aggregate_cycle().await?;

            if sleep_cancelled(cancel, self.timings.idle).await {
                return Ok(());
            }
        }
        Ok(())
    }

    async fn aggregate_cycle(&mut self) -> Result<()> {
        let today = Local::now().date_naive();
        let mut readings = Vec::with_capacity(self.members.len());
        for (camera, reader) in self.members.iter().zip(&self.readers) {
            let row = reader.latest_row(today).await?;
            readings.push(CameraReading {
                camera: camera.clone(),
                row,
            });
        }

        let now = Local::now().naive_local();
        let outcome = aggregate(&readings, now, self.timings.staleness);
        for camera_id in &outcome.stale {
            tracing::warn!(
                area_id = %self.area.id,
                camera_id = %camera_id,
                "Camera log row is stale, excluded from occupancy"
            );
        }
        for camera_id in &outcome.silent {
            tracing::debug!(
                area_id = %self.area.id,
                camera_id = %camera_id,
                "Camera log holds no complete row yet"
            );
        }

        for logger in &self.loggers {
            if let Err(e) = logger
                .update(
                    &outcome.active,
                    &AreaOccupancy {
                        occupancy: outcome.occupancy,
                    },
                )
                .await
            {
                tracing::error!(
                    area_id = %self.area.id,
                    error = %e,
                    "Area logger update failed"
                );
            }
        }

        let threshold = self.area.threshold_at(now);
        if outcome.occupancy > threshold
            && (self.mail.is_some() || self.chat.is_some())
            && self.cooldown.check()
        {
            self.dispatch_alerts(outcome.occupancy, threshold);
        }
        Ok(())
    }

    /// Fire mail/chat notifiers without waiting on delivery.
    fn dispatch_alerts(&self, occupancy: u32, threshold: u32) {
        tracing::info!(
            area_id = %self.area.id,
            occupancy = occupancy,
            threshold = threshold,
            "Occupancy threshold exceeded, dispatching alerts"
        );
        let entity = EntityRef::from(&self.area);
        if let Some(mail) = self.mail.clone() {
            let entity = entity.clone();
            tokio::spawn(async move {
                mail.send_occupancy_alert(&entity, occupancy, threshold).await;
            });
        }
        if let Some(chat) = self.chat.clone() {
            tokio::spawn(async move {
                chat.occupancy_alert(&entity, occupancy, threshold).await;
            });
        }
    }
}

/// Sleep for `duration`, returning true if cancelled first.
async fn sleep_cancelled(cancel: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => true,
        _ = tokio::time::sleep(duration) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NotifyPolicy;
    use chrono::NaiveDate;
    use std::io::Write;
    use tempfile::TempDir;

    fn camera(id: &str) -> CameraRef {
        CameraRef {
            id: id.to_string(),
            name: format!("Camera {id}"),
        }
    }

    fn row(at: NaiveDateTime, detected: u32) -> ObjectsLogRow {
        ObjectsLogRow {
            timestamp: at,
            detected_objects: detected,
            violating_objects: 0,
        }
    }

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 8, 3)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_stale_camera_excluded_from_occupancy() {
        let now = now();
        let readings = vec![
            CameraReading {
                camera: camera("cam0"),
                row: Some(row(now - chrono::Duration::seconds(10), 2)),
            },
            CameraReading {
                camera: camera("cam1"),
                row: Some(row(now - chrono::Duration::seconds(10), 3)),
            },
            CameraReading {
                camera: camera("cam2"),
                row: Some(row(now - chrono::Duration::seconds(40), 5)),
            },
        ];
        let outcome = aggregate(&readings, now, Duration::from_secs(30));
        assert_eq!(outcome.occupancy, 5);
        assert_eq!(outcome.active.len(), 2);
        assert_eq!(outcome.stale, vec!["cam2".to_string()]);
        assert!(outcome.silent.is_empty());
    }

    #[test]
    fn test_row_exactly_at_window_edge_is_fresh() {
        let now = now();
        let readings = vec![CameraReading {
            camera: camera("cam0"),
            row: Some(row(now - chrono::Duration::seconds(30), 4)),
        }];
        let outcome = aggregate(&readings, now, Duration::from_secs(30));
        assert_eq!(outcome.occupancy, 4);
    }

    #[test]
    fn test_missing_row_counts_as_silent() {
        let outcome = aggregate(
            &[CameraReading {
                camera: camera("cam0"),
                row: None,
            }],
            now(),
            Duration::from_secs(30),
        );
        assert_eq!(outcome.occupancy, 0);
        assert_eq!(outcome.silent, vec!["cam0".to_string()]);
    }

    #[test]
    fn test_cooldown_suppresses_second_alert() {
        let mut cooldown = AlertCooldown::new(Duration::from_secs(60));
        let t0 = Instant::now();
        assert!(cooldown.check_at(t0));
        assert!(!cooldown.check_at(t0 + Duration::from_secs(5)));
        assert!(cooldown.check_at(t0 + Duration::from_secs(61)));
    }

    fn write_camera_log(dir: &std::path::Path, camera_id: &str, rows: &[(NaiveDateTime, u32)]) {
        let log_dir = dir.join(camera_id).join("objects_log");
        std::fs::create_dir_all(&log_dir).unwrap();
        let day = rows[0].0.format("%Y-%m-%d");
        let mut f = std::fs::File::create(log_dir.join(format!("{day}.csv"))).unwrap();
        f.write_all(b"Timestamp,DetectedObjects,ViolatingObjects\n")
            .unwrap();
        for (at, detected) in rows {
            writeln!(f, "{},{},0", at.format("%Y-%m-%d %H:%M:%S"), detected).unwrap();
        }
    }

    #[tokio::test]
    async fn test_run_writes_occupancy_log_and_stops_on_cancel() {
        let dir = TempDir::new().unwrap();
        let now = Local::now().naive_local();
        write_camera_log(dir.path(), "cam0", &[(now, 3)]);

        let area = AreaConfig {
            id: "area0".to_string(),
            name: "Lobby".to_string(),
            cameras: vec!["cam0".to_string()],
            occupancy_threshold: 10,
            occupancy_rules: vec![],
            notify: NotifyPolicy::default(),
        };
        let members = vec![SourceConfig {
            id: "cam0".to_string(),
            name: "Entrance".to_string(),
            url: "rtsp://cam/0".to_string(),
            tags: vec![],
            notify: NotifyPolicy::default(),
        }];
        let app = AppSettings {
            log_directory: dir.path().to_path_buf(),
            ..AppSettings::default()
        };
        let timings = AreaTimings {
            warmup: Duration::ZERO,
            log_retry: Duration::from_millis(10),
            staleness: Duration::from_secs(30),
            idle: Duration::from_millis(10),
        };
        let mut engine = AreaEngine::build(area, &members, &app, timings, None, None)
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        let stopper = cancel.clone();
        let run = tokio::spawn(async move { engine.run(&cancel).await });
        tokio::time::sleep(Duration::from_millis(100)).await;
        stopper.cancel();
        tokio::time::timeout(Duration::from_secs(1), run)
            .await
            .expect("loop must exit promptly on cancel")
            .unwrap()
            .unwrap();

        let occupancy_dir = dir.path().join("area0").join("occupancy_log");
        let day_file = std::fs::read_dir(occupancy_dir)
            .unwrap()
            .next()
            .unwrap()
            .unwrap()
            .path();
        let contents = std::fs::read_to_string(day_file).unwrap();
        assert!(contents.lines().count() >= 2);
        assert!(contents.lines().nth(1).unwrap().ends_with(",cam0,3"));
    }
}
