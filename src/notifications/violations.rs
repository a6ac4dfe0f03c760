//! Scheduled violation checks and daily reports
//!
//! These run as detached tasks spawned by the scheduler: they read the
//! relevant camera logs, sum violation counts, and hand results to the
//! notification services. Log-read failures degrade to a warning; a check
//! never takes the scheduler or the orchestrator down with it.

use chrono::{Duration as ChronoDuration, Local, NaiveDate, NaiveDateTime, Timelike};
use std::path::Path;

use super::{ChatService, EntityRef, MailService};
use crate::camera_log::CameraLogReader;

/// Sum of `ViolatingObjects` over the given cameras' rows at or after
/// `cutoff` on `day`.
pub async fn count_violations(
    log_dir: &Path,
    camera_ids: &[String],
    day: NaiveDate,
    cutoff: NaiveDateTime,
) -> u32 {
    let mut violations = 0u32;
    for camera_id in camera_ids {
        let reader = CameraLogReader::new(log_dir, camera_id);
        match reader.rows_since(day, cutoff).await {
            Ok(rows) => {
                violations += rows.iter().map(|r| r.violating_objects).sum::<u32>();
            }
            Err(e) => {
                tracing::warn!(
                    camera_id = %camera_id,
                    error = %e,
                    "Skipping camera in violation check"
                );
            }
        }
    }
    violations
}

/// Per-hour histogram of `ViolatingObjects` for one day.
pub async fn hourly_violations(
    log_dir: &Path,
    camera_ids: &[String],
    day: NaiveDate,
) -> [u32; 24] {
    let mut per_hour = [0u32; 24];
    for camera_id in camera_ids {
        let reader = CameraLogReader::new(log_dir, camera_id);
        match reader.rows_for_day(day).await {
            Ok(rows) => {
                for row in rows {
                    per_hour[row.timestamp.hour() as usize] += row.violating_objects;
                }
            }
            Err(e) => {
                tracing::warn!(
                    camera_id = %camera_id,
                    error = %e,
                    "Skipping camera in daily report"
                );
            }
        }
    }
    per_hour
}

/// Scheduled check: sum violations over the notify interval and fire the
/// configured notifiers when the threshold is exceeded.
pub async fn check_violations(
    log_dir: &Path,
    camera_ids: &[String],
    entity: EntityRef,
    threshold: u32,
    interval_minutes: u32,
    mail: Option<MailService>,
    chat: Option<ChatService>,
) {
    let now = Local::now().naive_local();
    let cutoff = now - ChronoDuration::minutes(interval_minutes as i64);
    let violations = count_violations(log_dir, camera_ids, now.date(), cutoff).await;

    if violations > threshold {
        tracing::info!(
            entity_id = %entity.id,
            violations = violations,
            threshold = threshold,
            "Violation threshold exceeded, dispatching notifications"
        );
        if let Some(mail) = mail {
            mail.send_violation_alert(&entity, violations).await;
        }
        if let Some(chat) = chat {
            chat.violation_report(&entity, violations).await;
        }
    } else {
        tracing::debug!(
            entity_id = %entity.id,
            violations = violations,
            "Violation check below threshold"
        );
    }
}

/// Scheduled daily report over the previous day's logs.
pub async fn daily_report(
    log_dir: &Path,
    camera_ids: &[String],
    entity: EntityRef,
    mail: Option<MailService>,
) {
    let Some(day) = Local::now().date_naive().pred_opt() else {
        return;
    };
    let per_hour = hourly_violations(log_dir, camera_ids, day).await;
    let total: u32 = per_hour.iter().sum();
    tracing::info!(
        entity_id = %entity.id,
        day = %day,
        total = total,
        "Daily report generated"
    );
    if let Some(mail) = mail {
        mail.send_daily_report(&entity, total, &per_hour).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    const HEADER: &str = "Timestamp,DetectedObjects,ViolatingObjects\n";

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 8, 3).unwrap()
    }

    fn write_log(dir: &TempDir, camera_id: &str, contents: &str) {
        let log_dir = dir.path().join(camera_id).join("objects_log");
        std::fs::create_dir_all(&log_dir).unwrap();
        let mut f = std::fs::File::create(log_dir.join("2026-08-03.csv")).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
    }

    #[tokio::test]
    async fn test_count_violations_only_inside_window() {
        let dir = TempDir::new().unwrap();
        write_log(
            &dir,
            "cam0",
            &format!(
                "{HEADER}2026-08-03 09:30:00,1,9\n2026-08-03 10:10:00,1,2\n2026-08-03 10:20:00,1,3\n"
            ),
        );
        let cutoff = day().and_hms_opt(10, 0, 0).unwrap();
        let total =
            count_violations(dir.path(), &["cam0".to_string()], day(), cutoff).await;
        assert_eq!(total, 5);
    }

    #[tokio::test]
    async fn test_count_violations_sums_across_cameras() {
        let dir = TempDir::new().unwrap();
        write_log(&dir, "cam0", &format!("{HEADER}2026-08-03 10:10:00,1,2\n"));
        write_log(&dir, "cam1", &format!("{HEADER}2026-08-03 10:15:00,1,4\n"));
        let cutoff = day().and_hms_opt(10, 0, 0).unwrap();
        let cameras = vec!["cam0".to_string(), "cam1".to_string()];
        assert_eq!(count_violations(dir.path(), &cameras, day(), cutoff).await, 6);
    }

    #[tokio::test]
    async fn test_missing_log_counts_as_zero() {
        let dir = TempDir::new().unwrap();
        let cutoff = day().and_hms_opt(10, 0, 0).unwrap();
        assert_eq!(
            count_violations(dir.path(), &["cam9".to_string()], day(), cutoff).await,
            0
        );
    }

    #[tokio::test]
    async fn test_hourly_histogram_buckets_by_hour() {
        let dir = TempDir::new().unwrap();
        write_log(
            &dir,
            "cam0",
            &format!(
                "{HEADER}2026-08-03 09:30:00,1,2\n2026-08-03 09:45:00,1,1\n2026-08-03 17:05:00,1,4\n"
            ),
        );
        let per_hour = hourly_violations(dir.path(), &["cam0".to_string()], day()).await;
        assert_eq!(per_hour[9], 3);
        assert_eq!(per_hour[17], 4);
        assert_eq!(per_hour.iter().sum::<u32>(), 7);
    }
}
