//! Processor configuration data types
//!
//! Serde structures for the processor config file: video sources, areas,
//! occupancy rules and notification policies. Read-only for the control
//! plane; editing them is the configuration API's business.

use chrono::{Datelike, NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{Error, Result};

/// Top-level processor configuration file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessorConfig {
    #[serde(default)]
    pub app: AppSettings,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
    #[serde(default)]
    pub areas: Vec<AreaConfig>,
}

/// Application-wide processing settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSettings {
    /// Root directory for per-camera and per-area log trees
    #[serde(default = "default_log_directory")]
    pub log_directory: PathBuf,
    /// Upper bound on video worker processes per session
    #[serde(default = "default_max_processes")]
    pub max_processes: usize,
    /// Cadence of per-camera log rows, drives the aggregation idle interval
    #[serde(default = "default_log_interval_secs")]
    pub log_interval_secs: u64,
    /// Minimum seconds between two occupancy alerts for the same area
    #[serde(default = "default_occupancy_cooldown_secs")]
    pub occupancy_cooldown_secs: u64,
    /// Chat channel for alert delivery
    #[serde(default)]
    pub chat_channel: Option<String>,
    /// Master switch for chat notifications
    #[serde(default)]
    pub enable_chat_notifications: bool,
    /// Dashboard URL embedded in notification bodies
    #[serde(default)]
    pub dashboard_url: Option<String>,
}

fn default_log_directory() -> PathBuf {
    PathBuf::from("/var/lib/vigil/logs")
}

fn default_max_processes() -> usize {
    4
}

fn default_log_interval_secs() -> u64 {
    10
}

fn default_occupancy_cooldown_secs() -> u64 {
    180
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            log_directory: default_log_directory(),
            max_processes: default_max_processes(),
            log_interval_secs: default_log_interval_secs(),
            occupancy_cooldown_secs: default_occupancy_cooldown_secs(),
            chat_channel: None,
            enable_chat_notifications: false,
            dashboard_url: None,
        }
    }
}

/// Notification policy shared by sources and areas
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyPolicy {
    /// Violation-check cadence in minutes; 0 disables the check
    #[serde(default)]
    pub notify_every_minutes: u32,
    /// Violation count above which a notification fires
    #[serde(default)]
    pub violation_threshold: u32,
    /// Recipients for mail notifications
    #[serde(default)]
    pub emails: Vec<String>,
    /// Whether a daily report is generated for this entity
    #[serde(default)]
    pub daily_report: bool,
    /// Local time of day the daily report runs at
    #[serde(default = "default_daily_report_time", with = "hhmm")]
    pub daily_report_time: NaiveTime,
}

fn default_daily_report_time() -> NaiveTime {
    NaiveTime::from_hms_opt(6, 0, 0).expect("valid constant time")
}

impl Default for NotifyPolicy {
    fn default() -> Self {
        Self {
            notify_every_minutes: 0,
            violation_threshold: 0,
            emails: Vec::new(),
            daily_report: false,
            daily_report_time: default_daily_report_time(),
        }
    }
}

/// A video source (camera) known to the platform
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub id: String,
    pub name: String,
    /// Stream URL handed to the video worker
    pub url: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub notify: NotifyPolicy,
}

impl SourceConfig {
    /// Violation notifications are configured at all
    pub fn notifications_enabled(&self) -> bool {
        self.notify.notify_every_minutes > 0 && self.notify.violation_threshold > 0
    }

    pub fn should_send_email(&self) -> bool {
        self.notifications_enabled() && !self.notify.emails.is_empty()
    }

    pub fn should_send_chat(&self, app: &AppSettings) -> bool {
        self.notifications_enabled()
            && app.enable_chat_notifications
            && app.chat_channel.is_some()
    }
}

/// A monitored area: a named set of cameras with occupancy thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AreaConfig {
    pub id: String,
    pub name: String,
    /// Member camera ids
    #[serde(default)]
    pub cameras: Vec<String>,
    /// Default occupancy threshold, used when no rule matches
    #[serde(default)]
    pub occupancy_threshold: u32,
    /// Time-of-day scoped threshold overrides
    #[serde(default)]
    pub occupancy_rules: Vec<OccupancyRule>,
    #[serde(default)]
    pub notify: NotifyPolicy,
}

impl AreaConfig {
    /// Occupancy alerting or violation notifications are configured at all
    pub fn notifications_enabled(&self) -> bool {
        (self.notify.notify_every_minutes > 0 && self.notify.violation_threshold > 0)
            || self.occupancy_threshold > 0
    }

    pub fn should_send_email(&self) -> bool {
        self.notifications_enabled() && !self.notify.emails.is_empty()
    }

    pub fn should_send_chat(&self, app: &AppSettings) -> bool {
        self.notifications_enabled()
            && app.enable_chat_notifications
            && app.chat_channel.is_some()
    }

    /// Resolve the occupancy threshold applicable at `at`.
    ///
    /// The first matching rule wins; with no match the area default applies.
    pub fn threshold_at(&self, at: NaiveDateTime) -> u32 {
        self.occupancy_rules
            .iter()
            .find(|rule| rule.applies_at(at))
            .map(|rule| rule.max_occupancy)
            .unwrap_or(self.occupancy_threshold)
    }

    /// Validate this area's rule list: 7-day bitsets, finish after start,
    /// no overlapping (day, interval) pairs.
    pub fn validate_rules(&self) -> Result<()> {
        for rule in &self.occupancy_rules {
            rule.validate()
                .map_err(|e| Error::Validation(format!("area {}: {}", self.id, e)))?;
        }
        for (i, a) in self.occupancy_rules.iter().enumerate() {
            for b in &self.occupancy_rules[i + 1..] {
                if a.overlaps(b) {
                    return Err(Error::Validation(format!(
                        "area {}: occupancy rules must not overlap",
                        self.id
                    )));
                }
            }
        }
        Ok(())
    }
}

/// A day-of-week and time-of-day scoped occupancy threshold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OccupancyRule {
    /// Seven booleans, Monday first
    pub days: Vec<bool>,
    #[serde(with = "hhmm")]
    pub start_hour: NaiveTime,
    /// Finish time; `00:00` means end of day
    #[serde(with = "hhmm")]
    pub finish_hour: NaiveTime,
    pub max_occupancy: u32,
}

impl OccupancyRule {
    /// Whether `at` falls inside this rule's (day, interval) window.
    pub fn applies_at(&self, at: NaiveDateTime) -> bool {
        let day = at.weekday().num_days_from_monday() as usize;
        if !self.days.get(day).copied().unwrap_or(false) {
            return false;
        }
        let t = at.time();
        // Midnight only belongs to rules that start at midnight.
        if t.hour() == 0 && t.minute() == 0 && t < self.start_hour {
            return false;
        }
        time_le(self.start_hour, t) && time_lt(t, self.finish_hour)
    }

    /// Whether two rules share at least one (day, time-interval) pair.
    pub fn overlaps(&self, other: &OccupancyRule) -> bool {
        for day in 0..7 {
            let both = self.days.get(day).copied().unwrap_or(false)
                && other.days.get(day).copied().unwrap_or(false);
            if both
                && time_lt(other.start_hour, self.finish_hour)
                && time_lt(self.start_hour, other.finish_hour)
            {
                return true;
            }
        }
        false
    }

    fn validate(&self) -> std::result::Result<(), String> {
        if self.days.len() != 7 {
            return Err("'days' must contain 7 values".to_string());
        }
        if !time_lt(self.start_hour, self.finish_hour) {
            return Err("'finish_hour' must be later than 'start_hour'".to_string());
        }
        Ok(())
    }
}

fn is_midnight(t: NaiveTime) -> bool {
    t.hour() == 0 && t.minute() == 0
}

/// `start <= end`, treating an end of `00:00` as end of day.
fn time_le(start: NaiveTime, end: NaiveTime) -> bool {
    start <= end || is_midnight(end)
}

/// `start < end`, treating an end of `00:00` as end of day.
fn time_lt(start: NaiveTime, end: NaiveTime) -> bool {
    start < end || is_midnight(end)
}

/// Serde adapter for `HH:MM` times
mod hhmm {
    use chrono::NaiveTime;
    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(t: &NaiveTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&t.format("%H:%M").to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(d)?;
        NaiveTime::parse_from_str(&raw, "%H:%M")
            .map_err(|_| serde::de::Error::custom(format!("invalid HH:MM time: {raw}")))
    }
}
