//! Worker process entry points
//!
//! A worker reads its job payload as the first line on stdin, runs until
//! the next stdin line (or EOF) arrives, and exits. Video workers host the
//! decode/inference pipelines launched by the engine runtime; the area
//! worker hosts the area supervision arena.

use futures::FutureExt;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};

use tokio_util::sync::CancellationToken;

use super::WorkerJob;
use crate::area_engine::{AreaEngine, AreaTimings};
use crate::area_supervisor::{AreaLoopFactory, AreaSupervisor, RestartPolicy};
use crate::config::{AppSettings, AreaConfig, SourceConfig};
use crate::error::{Error, Result};
use crate::notifications::{ChatService, MailService};
use crate::state::AppConfig;

/// Entry point of the `worker` subcommand.
pub async fn run_worker() -> Result<()> {
    let stdin = tokio::io::stdin();
    let mut lines = BufReader::new(stdin).lines();
    let payload = lines
        .next_line()
        .await?
        .ok_or_else(|| Error::Worker("no job payload on stdin".to_string()))?;
    let job: WorkerJob = serde_json::from_str(&payload)
        .map_err(|e| Error::Worker(format!("malformed job payload: {e}")))?;

    match job {
        WorkerJob::Video {
            shard_index,
            sources,
            app,
        } => run_video_worker(shard_index, sources, app, &mut lines).await,
        WorkerJob::Area {
            areas,
            sources,
            app,
        } => run_area_worker(areas, sources, app, &mut lines).await,
    }
}

/// Hold one shard of video sources until the stop signal arrives.
///
/// The decode/inference pipelines themselves are owned by the engine
/// runtime; this process owns their lifecycle and the per-shard logs.
async fn run_video_worker(
    shard_index: usize,
    sources: Vec<SourceConfig>,
    app: AppSettings,
    lines: &mut Lines<BufReader<Stdin>>,
) -> Result<()> {
    tracing::info!(
        shard_index = shard_index,
        cameras = sources.len(),
        "Video worker taking on cameras"
    );
    for source in &sources {
        tokio::fs::create_dir_all(app.log_directory.join(&source.id).join("objects_log")).await?;
        tracing::debug!(camera_id = %source.id, url = %source.url, "Camera assigned");
    }

    wait_for_stop(lines).await;
    tracing::info!(shard_index = shard_index, "Video worker stopping cameras");
    Ok(())
}

/// Run the area supervision arena until the stop signal arrives.
async fn run_area_worker(
    areas: Vec<AreaConfig>,
    sources: Vec<SourceConfig>,
    app: AppSettings,
    lines: &mut Lines<BufReader<Stdin>>,
) -> Result<()> {
    tracing::info!(areas = areas.len(), "Area worker taking on areas");

    let deploy = AppConfig::default();
    let mail = MailService::new(deploy.mail_relay_url.clone(), app.dashboard_url.clone());
    let chat = ChatService::new(deploy.chat_webhook_url.clone(), app.chat_channel.clone());

    let factory = area_loop_factory(sources, app, mail, chat);
    let supervisor = AreaSupervisor::start(&areas, RestartPolicy::default(), factory);

    wait_for_stop(lines).await;
    tracing::info!("Area worker stopping area loops");
    supervisor.shutdown().await;
    Ok(())
}

/// Factory building a fresh aggregation loop per (re)start of an area.
fn area_loop_factory(
    sources: Vec<SourceConfig>,
    app: AppSettings,
    mail: MailService,
    chat: ChatService,
) -> AreaLoopFactory {
    let sources = Arc::new(sources);
    let app = Arc::new(app);
    Arc::new(move |area: &AreaConfig, cancel: CancellationToken| {
        let area = area.clone();
        let sources = sources.clone();
        let app = app.clone();
        let mail = area.should_send_email().then(|| mail.clone());
        let chat = area.should_send_chat(&app).then(|| chat.clone());
        async move {
            let members: Vec<SourceConfig> = sources
                .iter()
                .filter(|s| area.cameras.iter().any(|id| id == &s.id))
                .cloned()
                .collect();
            let timings = AreaTimings::from_settings(&app);
            let mut engine =
                AreaEngine::build(area, &members, &app, timings, mail, chat).await?;
            engine.run(&cancel).await
        }
        .boxed()
    })
}

/// Block until the parent writes the stop line or closes the pipe.
async fn wait_for_stop(lines: &mut Lines<BufReader<Stdin>>) {
    match lines.next_line().await {
        Ok(Some(_)) => tracing::info!("Stop signal received"),
        Ok(None) => tracing::info!("Control link closed, stopping"),
        Err(e) => tracing::warn!(error = %e, "Control link failed, stopping"),
    }
}
