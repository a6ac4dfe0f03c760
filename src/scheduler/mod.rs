//! Cooperative scheduler
//!
//! ## Responsibilities
//!
//! - Hold recurring jobs (violation checks, daily reports) for the active
//!   processing session
//! - Spawn due jobs as detached tasks when the orchestrator's serving loop
//!   is idle
//!
//! `run_pending` is only ever called from the orchestrator's single loop,
//! so the job list needs no locking. Due jobs run detached: a slow check
//! never delays the next tick.

use chrono::{Local, NaiveTime};
use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Tag for per-entity violation-check jobs, cleared in bulk on stop
pub const NOTIFICATIONS_TAG: &str = "notifications";
/// Tag for daily-report jobs, cleared in bulk on stop
pub const DAILY_REPORTS_TAG: &str = "daily-reports";

type JobFn = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

struct ScheduledJob {
    label: String,
    tag: &'static str,
    interval: Duration,
    next_run: Instant,
    run: JobFn,
}

/// Cooperative job scheduler
#[derive(Default)]
pub struct Scheduler {
    jobs: Vec<ScheduledJob>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a recurring job; the first run is one interval from now.
    pub fn every<F, Fut>(&mut self, interval: Duration, tag: &'static str, label: &str, job: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        tracing::debug!(label = %label, interval_secs = interval.as_secs(), "Job registered");
        self.jobs.push(ScheduledJob {
            label: label.to_string(),
            tag,
            interval,
            next_run: Instant::now() + interval,
            run: Arc::new(move || Box::pin(job())),
        });
    }

    /// Register a job recurring daily at the given local time of day.
    pub fn daily_at<F, Fut>(&mut self, at: NaiveTime, tag: &'static str, label: &str, job: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        self.jobs.push(ScheduledJob {
            label: label.to_string(),
            tag,
            interval: Duration::from_secs(24 * 60 * 60),
            next_run: Instant::now() + until_next(at),
            run: Arc::new(move || Box::pin(job())),
        });
    }

    /// Spawn every due job as a detached task. Returns how many were
    /// dispatched.
    pub fn run_pending(&mut self) -> usize {
        let now = Instant::now();
        let mut dispatched = 0;
        for job in &mut self.jobs {
            if now >= job.next_run {
                tracing::debug!(label = %job.label, "Dispatching scheduled job");
                tokio::spawn((job.run)());
                job.next_run = now + job.interval;
                dispatched += 1;
            }
        }
        dispatched
    }

    /// Remove all jobs under a tag. Returns how many were cancelled.
    pub fn clear(&mut self, tag: &str) -> usize {
        let before = self.jobs.len();
        self.jobs.retain(|job| job.tag != tag);
        before - self.jobs.len()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

/// Time from now until the next local occurrence of `at`.
fn until_next(at: NaiveTime) -> Duration {
    let now = Local::now().naive_local();
    let today_at = now.date().and_time(at);
    let delta = if today_at > now {
        today_at - now
    } else {
        today_at + chrono::Duration::days(1) - now
    };
    delta.to_std().unwrap_or(Duration::ZERO)
}
