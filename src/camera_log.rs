//! Per-camera object log access
//!
//! Video workers append one CSV file per camera per calendar day under
//! `<log_dir>/<camera_id>/objects_log/`. The control plane only ever reads
//! these files, so no locking is needed; a row being appended concurrently
//! is simply not yet complete and is skipped.

use chrono::{NaiveDate, NaiveDateTime};
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncSeekExt, BufReader};

use crate::error::{Error, Result};

/// Timestamp format used in log rows
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// How many bytes from the end of the file the tail read inspects
const TAIL_CHUNK: u64 = 4096;

/// One row of a camera's daily object log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectsLogRow {
    pub timestamp: NaiveDateTime,
    pub detected_objects: u32,
    pub violating_objects: u32,
}

/// Column positions resolved from a log file's header row
#[derive(Debug, Clone, Copy)]
struct Columns {
    timestamp: usize,
    detected_objects: usize,
    violating_objects: Option<usize>,
}

impl Columns {
    fn parse(header: &str) -> Result<Self> {
        let names: Vec<&str> = header.trim_end().split(',').collect();
        let find = |name: &str| names.iter().position(|n| *n == name);
        Ok(Self {
            timestamp: find("Timestamp")
                .ok_or_else(|| Error::Parse("log header missing Timestamp".to_string()))?,
            detected_objects: find("DetectedObjects")
                .ok_or_else(|| Error::Parse("log header missing DetectedObjects".to_string()))?,
            violating_objects: find("ViolatingObjects"),
        })
    }

    fn row(&self, line: &str) -> Option<ObjectsLogRow> {
        let fields: Vec<&str> = line.trim_end().split(',').collect();
        let timestamp =
            NaiveDateTime::parse_from_str(fields.get(self.timestamp)?, TIMESTAMP_FORMAT).ok()?;
        let detected_objects = fields.get(self.detected_objects)?.parse().ok()?;
        let violating_objects = match self.violating_objects {
            Some(idx) => fields.get(idx)?.parse().ok()?,
            None => 0,
        };
        Some(ObjectsLogRow {
            timestamp,
            detected_objects,
            violating_objects,
        })
    }
}

/// Read access to one camera's daily object logs
#[derive(Debug, Clone)]
pub struct CameraLogReader {
    log_dir: PathBuf,
    camera_id: String,
}

impl CameraLogReader {
    pub fn new(log_dir: &Path, camera_id: &str) -> Self {
        Self {
            log_dir: log_dir.to_path_buf(),
            camera_id: camera_id.to_string(),
        }
    }

    pub fn camera_id(&self) -> &str {
        &self.camera_id
    }

    /// Path of the log file for the given day.
    pub fn day_path(&self, day: NaiveDate) -> PathBuf {
        self.log_dir
            .join(&self.camera_id)
            .join("objects_log")
            .join(format!("{}.csv", day.format("%Y-%m-%d")))
    }

    /// Whether the log file for the given day exists yet.
    pub async fn day_log_exists(&self, day: NaiveDate) -> bool {
        tokio::fs::try_exists(self.day_path(day)).await.unwrap_or(false)
    }

    /// Read the most recent complete row of the given day's log without
    /// scanning the whole file. Returns `None` when the file is missing or
    /// holds no complete data row yet.
    pub async fn latest_row(&self, day: NaiveDate) -> Result<Option<ObjectsLogRow>> {
        let path = self.day_path(day);
        let mut file = match File::open(&path).await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let len = file.metadata().await?.len();
        if len == 0 {
            return Ok(None);
        }

        // Header lives in the first line; data of interest in the tail.
        let mut head = vec![0u8; len.min(1024) as usize];
        file.read_exact(&mut head).await?;
        let head_text = String::from_utf8_lossy(&head);
        let header = match head_text.lines().next() {
            Some(h) => h.to_string(),
            None => return Ok(None),
        };
        let columns = Columns::parse(&header)?;

        let tail_start = len.saturating_sub(TAIL_CHUNK);
        file.seek(SeekFrom::Start(tail_start)).await?;
        let mut tail = Vec::with_capacity((len - tail_start) as usize);
        file.read_to_end(&mut tail).await?;
        let text = String::from_utf8_lossy(&tail);

        let mut lines: Vec<&str> = text.lines().collect();
        if !text.ends_with('\n') {
            // A writer may be mid-append; the final fragment is not a row.
            lines.pop();
        }
        if tail_start > 0 && !lines.is_empty() {
            // The first tail line may start mid-row.
            lines.remove(0);
        }
        Ok(lines.iter().rev().find_map(|line| columns.row(line)))
    }

    /// All complete rows of the given day with `timestamp >= cutoff`.
    pub async fn rows_since(
        &self,
        day: NaiveDate,
        cutoff: NaiveDateTime,
    ) -> Result<Vec<ObjectsLogRow>> {
        let path = self.day_path(day);
        let file = match File::open(&path).await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut lines = BufReader::new(file).lines();
        let header = match lines.next_line().await? {
            Some(h) => h,
            None => return Ok(Vec::new()),
        };
        let columns = Columns::parse(&header)?;

        let mut rows = Vec::new();
        while let Some(line) = lines.next_line().await? {
            if let Some(row) = columns.row(&line) {
                if row.timestamp >= cutoff {
                    rows.push(row);
                }
            }
        }
        Ok(rows)
    }

    /// All complete rows of the given day.
    pub async fn rows_for_day(&self, day: NaiveDate) -> Result<Vec<ObjectsLogRow>> {
        self.rows_since(day, day.and_time(chrono::NaiveTime::MIN)).await
    }
}
