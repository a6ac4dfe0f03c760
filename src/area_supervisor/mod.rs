//! Area supervision
//!
//! ## Responsibilities
//!
//! - Run one supervising task per area, each owning an aggregation loop
//! - Restart a loop that fails or panics after a fixed backoff
//! - Join every task on shutdown via per-area cancellation tokens
//!
//! Supervision is an arena of independent tasks indexed by area id; areas
//! share no mutable state. Each loop attempt runs in its own spawned task
//! so a panic is contained and observed as a restartable failure.

use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::AreaConfig;
use crate::error::Result;

/// Backoff between restart attempts of a failed aggregation loop
const RESTART_BACKOFF: Duration = Duration::from_secs(5);

/// Restart behavior of a supervising task
#[derive(Debug, Clone)]
pub struct RestartPolicy {
    pub backoff: Duration,
    /// Failed attempts after which the task gives up; `None` restarts
    /// forever
    pub max_attempts: Option<u32>,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            backoff: RESTART_BACKOFF,
            max_attempts: None,
        }
    }
}

/// Builds one run of an area's aggregation loop. Called again for every
/// restart so each attempt starts from a fresh engine.
pub type AreaLoopFactory =
    Arc<dyn Fn(&AreaConfig, CancellationToken) -> BoxFuture<'static, Result<()>> + Send + Sync>;

struct AreaTask {
    area_id: String,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Supervisor over all areas of one processing session
pub struct AreaSupervisor {
    tasks: Vec<AreaTask>,
}

impl AreaSupervisor {
    /// Spawn one supervising task per area.
    pub fn start(areas: &[AreaConfig], policy: RestartPolicy, factory: AreaLoopFactory) -> Self {
        let tasks = areas
            .iter()
            .map(|area| {
                let cancel = CancellationToken::new();
                let handle = tokio::spawn(supervise(
                    area.clone(),
                    cancel.clone(),
                    policy.clone(),
                    factory.clone(),
                ));
                AreaTask {
                    area_id: area.id.clone(),
                    cancel,
                    handle,
                }
            })
            .collect();
        Self { tasks }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Cancel every area and join the supervising tasks.
    pub async fn shutdown(self) {
        for task in &self.tasks {
            task.cancel.cancel();
        }
        for task in self.tasks {
            if let Err(e) = task.handle.await {
                tracing::error!(
                    area_id = %task.area_id,
                    error = %e,
                    "Area supervising task panicked"
                );
            }
        }
        tracing::info!("Area supervision stopped");
    }
}

async fn supervise(
    area: AreaConfig,
    cancel: CancellationToken,
    policy: RestartPolicy,
    factory: AreaLoopFactory,
) {
    let mut failures = 0u32;
    loop {
        if cancel.is_cancelled() {
            break;
        }
        let attempt = tokio::spawn(factory(&area, cancel.clone()));
        match attempt.await {
            Ok(Ok(())) => {
                tracing::info!(area_id = %area.id, "Area aggregation loop exited");
                break;
            }
            Ok(Err(e)) => {
                tracing::error!(
                    area_id = %area.id,
                    error = %e,
                    "Area aggregation loop failed"
                );
            }
            Err(e) => {
                tracing::error!(
                    area_id = %area.id,
                    error = %e,
                    "Area aggregation loop panicked"
                );
            }
        }

        failures += 1;
        if let Some(cap) = policy.max_attempts {
            if failures >= cap {
                // Alerting hook: a permanently failing area is surfaced
                // instead of masked by an endless restart storm.
                tracing::error!(
                    area_id = %area.id,
                    failures = failures,
                    "Area aggregation loop giving up after repeated failures"
                );
                break;
            }
        }
        tracing::info!(
            area_id = %area.id,
            backoff_secs = policy.backoff.as_secs(),
            "Restarting area aggregation loop"
        );
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(policy.backoff) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NotifyPolicy;
    use crate::error::Error;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn area(id: &str) -> AreaConfig {
        AreaConfig {
            id: id.to_string(),
            name: format!("Area {id}"),
            cameras: vec![],
            occupancy_threshold: 0,
            occupancy_rules: vec![],
            notify: NotifyPolicy::default(),
        }
    }

    fn fast_policy(max_attempts: Option<u32>) -> RestartPolicy {
        RestartPolicy {
            backoff: Duration::from_millis(5),
            max_attempts,
        }
    }

    #[tokio::test]
    async fn test_failing_loop_is_restarted() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();
        let factory: AreaLoopFactory =
            Arc::new(move |_: &AreaConfig, cancel: CancellationToken| {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                Box::pin(async move {
                    if n < 2 {
                        Err(Error::Internal("boom".to_string()))
                    } else {
                        cancel.cancelled().await;
                        Ok(())
                    }
                })
            });

        let supervisor = AreaSupervisor::start(&[area("area0")], fast_policy(None), factory);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn test_panicking_loop_is_restarted() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();
        let factory: AreaLoopFactory =
            Arc::new(move |_: &AreaConfig, cancel: CancellationToken| {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                Box::pin(async move {
                    if n == 0 {
                        panic!("loop crashed");
                    }
                    cancel.cancelled().await;
                    Ok(())
                })
            });

        let supervisor = AreaSupervisor::start(&[area("area0")], fast_policy(None), factory);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn test_attempt_cap_stops_restarting() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();
        let factory: AreaLoopFactory =
            Arc::new(move |_: &AreaConfig, _: CancellationToken| {
                counter.fetch_add(1, Ordering::SeqCst);
                Box::pin(async { Err(Error::Internal("boom".to_string())) })
            });

        let supervisor = AreaSupervisor::start(&[area("area0")], fast_policy(Some(3)), factory);
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn test_one_task_per_area_and_clean_shutdown() {
        let factory: AreaLoopFactory = Arc::new(|_: &AreaConfig, cancel: CancellationToken| {
            Box::pin(async move {
                cancel.cancelled().await;
                Ok(())
            })
        });
        let areas = vec![area("area0"), area("area1"), area("area2")];
        let supervisor = AreaSupervisor::start(&areas, fast_policy(None), factory);
        assert_eq!(supervisor.len(), 3);
        tokio::time::timeout(Duration::from_secs(1), supervisor.shutdown())
            .await
            .expect("shutdown must join promptly");
    }
}
