//! Orchestrator - command-driven processing control plane
//!
//! ## Responsibilities
//!
//! - Serve start/stop commands from the control channel, strictly in
//!   arrival order
//! - Shard video sources across worker processes and spawn one area worker
//! - Tear a session down with bounded joins and forced termination
//! - Advance the cooperative scheduler from idle cycles
//!
//! All mutable state (the active session, the job list) is touched only by
//! the single serving loop, so no locking is needed.

use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::config::ConfigStore;
use crate::control_channel::{Command, CommandOutcome, CoreEndpoint};
use crate::distributor::distribute;
use crate::engine::{EngineHandle, WorkerCommand, WorkerJob, STOP_TIMEOUT};
use crate::error::Result;
use crate::notifications::{
    check_violations, daily_report, ChatService, EntityRef, MailService,
};
use crate::scheduler::{Scheduler, DAILY_REPORTS_TAG, NOTIFICATIONS_TAG};
use crate::state::AppConfig;

/// Scheduler advance cadence while the command queue is idle. Deliberately
/// its own knob, not the control-channel timeout.
const SCHEDULER_TICK: Duration = Duration::from_secs(5);

/// One START..STOP processing session
struct Session {
    engines: Vec<EngineHandle>,
}

/// Orchestrator instance
pub struct Orchestrator {
    deploy: AppConfig,
    store: ConfigStore,
    endpoint: CoreEndpoint,
    scheduler: Scheduler,
    session: Option<Session>,
    mail: MailService,
    chat: ChatService,
}

impl Orchestrator {
    pub fn new(deploy: AppConfig, store: ConfigStore, endpoint: CoreEndpoint) -> Self {
        let mail = MailService::new(
            deploy.mail_relay_url.clone(),
            store.app().dashboard_url.clone(),
        );
        let chat = ChatService::new(
            deploy.chat_webhook_url.clone(),
            store.app().chat_channel.clone(),
        );
        Self {
            deploy,
            store,
            endpoint,
            scheduler: Scheduler::new(),
            session: None,
            mail,
            chat,
        }
    }

    pub fn is_processing(&self) -> bool {
        self.session.is_some()
    }

    pub fn engine_count(&self) -> usize {
        self.session.as_ref().map(|s| s.engines.len()).unwrap_or(0)
    }

    pub fn scheduled_job_count(&self) -> usize {
        self.scheduler.len()
    }

    /// Serve commands until the shutdown token flips. Commands are handled
    /// one at a time with exactly one result each; scheduler ticks fill the
    /// idle cycles.
    pub async fn serve(mut self, shutdown: CancellationToken) {
        tracing::info!("Orchestrator serving");
        let mut ticker = tokio::time::interval(SCHEDULER_TICK);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Orchestrator shutting down");
                    break;
                }
                received = self.endpoint.commands.recv() => match received {
                    Some(command) => {
                        tracing::info!(command = %command.token(), "Command received");
                        let outcome = self.handle(command).await;
                        if self.endpoint.results.send(outcome).await.is_err() {
                            tracing::warn!("Control channel gone, shutting down");
                            break;
                        }
                    }
                    None => {
                        tracing::info!("Control channel closed, shutting down");
                        break;
                    }
                },
                _ = ticker.tick() => {
                    self.scheduler.run_pending();
                }
            }
        }

        if self.session.is_some() {
            self.stop_processing().await;
        }
        tracing::info!("Orchestrator terminated");
    }

    /// State machine transition for one command.
    pub async fn handle(&mut self, command: Command) -> CommandOutcome {
        match command {
            Command::StartProcessing => {
                if self.session.is_some() {
                    tracing::warn!("Processing already started");
                    return CommandOutcome::Rejected;
                }
                match self.start_processing().await {
                    Ok(()) => CommandOutcome::Accepted,
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to start processing");
                        CommandOutcome::Rejected
                    }
                }
            }
            Command::StopProcessing => {
                if self.session.is_none() {
                    tracing::warn!("Processing not started");
                    return CommandOutcome::Rejected;
                }
                self.stop_processing().await;
                CommandOutcome::Accepted
            }
            Command::Unknown(token) => {
                tracing::warn!(command = %token, "Invalid core command");
                CommandOutcome::Invalid
            }
        }
    }

    async fn start_processing(&mut self) -> Result<()> {
        let app = self.store.app().clone();
        let sources = self.store.video_sources().to_vec();
        let areas = self.store.areas().to_vec();
        let command = self.worker_command()?;

        let shards = distribute(&sources, app.max_processes);
        tracing::info!(
            sources = sources.len(),
            shards = shards.len(),
            areas = areas.len(),
            "Starting processing session"
        );

        let mut engines = Vec::with_capacity(shards.len() + 1);
        for shard in shards {
            let job = WorkerJob::Video {
                shard_index: shard.index,
                sources: shard.sources,
                app: app.clone(),
            };
            let name = format!("video-{}", shard.index);
            match EngineHandle::spawn(&name, &command, &job).await {
                Ok(handle) => engines.push(handle),
                Err(e) => {
                    self.abort_spawn(engines).await;
                    return Err(e);
                }
            }
        }

        if !areas.is_empty() {
            let job = WorkerJob::Area {
                areas,
                sources,
                app: app.clone(),
            };
            match EngineHandle::spawn("areas", &command, &job).await {
                Ok(handle) => engines.push(handle),
                Err(e) => {
                    self.abort_spawn(engines).await;
                    return Err(e);
                }
            }
        }

        tracing::info!(engines = engines.len(), "Processing session started");
        self.session = Some(Session { engines });
        self.register_jobs();
        Ok(())
    }

    /// Undo a partially spawned session.
    async fn abort_spawn(&self, engines: Vec<EngineHandle>) {
        for engine in engines {
            engine.stop(STOP_TIMEOUT).await;
        }
    }

    async fn stop_processing(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        for engine in session.engines {
            // Partial failures are logged by the handle; the stop sequence
            // always proceeds to the next engine.
            engine.stop(STOP_TIMEOUT).await;
        }
        let cleared =
            self.scheduler.clear(NOTIFICATIONS_TAG) + self.scheduler.clear(DAILY_REPORTS_TAG);
        tracing::info!(cleared_jobs = cleared, "Processing session stopped");
    }

    fn worker_command(&self) -> Result<WorkerCommand> {
        match &self.deploy.worker_program {
            Some(program) => Ok(WorkerCommand {
                program: program.clone(),
                args: self.deploy.worker_args.clone(),
            }),
            None => WorkerCommand::current_exe(),
        }
    }

    /// Register this session's violation checks and daily reports.
    fn register_jobs(&mut self) {
        let app = self.store.app().clone();
        let sources = self.store.video_sources().to_vec();
        let areas = self.store.areas().to_vec();

        for source in &sources {
            let chat_enabled = source.should_send_chat(&app);
            if source.notifications_enabled() && (source.should_send_email() || chat_enabled) {
                self.register_violation_check(
                    EntityRef::from(source),
                    vec![source.id.clone()],
                    source.notify.notify_every_minutes,
                    source.notify.violation_threshold,
                    source.should_send_email(),
                    chat_enabled,
                );
            }
            if source.notify.daily_report && !source.notify.emails.is_empty() {
                self.register_daily_report(
                    EntityRef::from(source),
                    vec![source.id.clone()],
                    source.notify.daily_report_time,
                );
            }
        }

        for area in &areas {
            let violations_configured =
                area.notify.notify_every_minutes > 0 && area.notify.violation_threshold > 0;
            let chat_enabled = area.should_send_chat(&app);
            if violations_configured && (area.should_send_email() || chat_enabled) {
                self.register_violation_check(
                    EntityRef::from(area),
                    area.cameras.clone(),
                    area.notify.notify_every_minutes,
                    area.notify.violation_threshold,
                    area.should_send_email(),
                    chat_enabled,
                );
            }
            if area.notify.daily_report && !area.notify.emails.is_empty() {
                self.register_daily_report(
                    EntityRef::from(area),
                    area.cameras.clone(),
                    area.notify.daily_report_time,
                );
            }
        }

        tracing::info!(jobs = self.scheduler.len(), "Scheduled jobs registered");
    }

    fn register_violation_check(
        &mut self,
        entity: EntityRef,
        cameras: Vec<String>,
        interval_minutes: u32,
        threshold: u32,
        email: bool,
        chat: bool,
    ) {
        let log_dir = self.store.app().log_directory.clone();
        let mail = email.then(|| self.mail.clone());
        let chat = chat.then(|| self.chat.clone());
        let label = format!("violations:{}", entity.id);
        self.scheduler.every(
            Duration::from_secs(interval_minutes as u64 * 60),
            NOTIFICATIONS_TAG,
            &label,
            move || {
                let log_dir = log_dir.clone();
                let cameras = cameras.clone();
                let entity = entity.clone();
                let mail = mail.clone();
                let chat = chat.clone();
                async move {
                    check_violations(
                        &log_dir,
                        &cameras,
                        entity,
                        threshold,
                        interval_minutes,
                        mail,
                        chat,
                    )
                    .await;
                }
            },
        );
    }

    fn register_daily_report(
        &mut self,
        entity: EntityRef,
        cameras: Vec<String>,
        at: chrono::NaiveTime,
    ) {
        let log_dir = self.store.app().log_directory.clone();
        let mail = self.mail.clone();
        let label = format!("daily-report:{}", entity.id);
        self.scheduler.daily_at(at, DAILY_REPORTS_TAG, &label, move || {
            let log_dir = log_dir.clone();
            let cameras = cameras.clone();
            let entity = entity.clone();
            let mail = mail.clone();
            async move {
                daily_report(&log_dir, &cameras, entity, Some(mail)).await;
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        AppSettings, AreaConfig, NotifyPolicy, ProcessorConfig, SourceConfig,
    };
    use crate::control_channel::CommandOutcome;
    use std::path::PathBuf;
    use tokio::sync::mpsc;

    fn endpoint() -> CoreEndpoint {
        let (_cmd_tx, commands) = mpsc::channel(1);
        let (results, _result_rx) = mpsc::channel(1);
        CoreEndpoint { commands, results }
    }

    fn deploy_with_sh_workers() -> AppConfig {
        AppConfig {
            host: "127.0.0.1".to_string(),
            queue_port: 0,
            queue_auth_key: "secret".to_string(),
            config_path: PathBuf::from("unused.json"),
            worker_program: Some(PathBuf::from("sh")),
            worker_args: vec!["-c".to_string(), "read -r _; read -r _".to_string()],
            mail_relay_url: None,
            chat_webhook_url: None,
        }
    }

    fn source(id: &str, notify: NotifyPolicy) -> SourceConfig {
        SourceConfig {
            id: id.to_string(),
            name: format!("Camera {id}"),
            url: format!("rtsp://cam/{id}"),
            tags: vec![],
            notify,
        }
    }

    fn store(sources: Vec<SourceConfig>, areas: Vec<AreaConfig>) -> ConfigStore {
        ConfigStore::from_config(ProcessorConfig {
            app: AppSettings {
                max_processes: 2,
                ..AppSettings::default()
            },
            sources,
            areas,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_start_with_no_sources_succeeds_with_empty_engine_set() {
        let mut core = Orchestrator::new(deploy_with_sh_workers(), store(vec![], vec![]), endpoint());
        let outcome = core.handle(Command::StartProcessing).await;
        assert_eq!(outcome, CommandOutcome::Accepted);
        assert!(core.is_processing());
        assert_eq!(core.engine_count(), 0);
        core.handle(Command::StopProcessing).await;
    }

    #[tokio::test]
    async fn test_double_start_is_rejected_without_duplicate_workers() {
        let sources = vec![
            source("cam0", NotifyPolicy::default()),
            source("cam1", NotifyPolicy::default()),
            source("cam2", NotifyPolicy::default()),
        ];
        let mut core = Orchestrator::new(deploy_with_sh_workers(), store(sources, vec![]), endpoint());

        assert_eq!(
            core.handle(Command::StartProcessing).await,
            CommandOutcome::Accepted
        );
        assert_eq!(core.engine_count(), 2);

        assert_eq!(
            core.handle(Command::StartProcessing).await,
            CommandOutcome::Rejected
        );
        assert_eq!(core.engine_count(), 2);

        assert_eq!(
            core.handle(Command::StopProcessing).await,
            CommandOutcome::Accepted
        );
        assert!(!core.is_processing());
    }

    #[tokio::test]
    async fn test_stop_without_start_is_rejected() {
        let mut core = Orchestrator::new(deploy_with_sh_workers(), store(vec![], vec![]), endpoint());
        assert_eq!(
            core.handle(Command::StopProcessing).await,
            CommandOutcome::Rejected
        );
        assert!(!core.is_processing());
    }

    #[tokio::test]
    async fn test_unknown_command_is_invalid_and_state_unchanged() {
        let mut core = Orchestrator::new(deploy_with_sh_workers(), store(vec![], vec![]), endpoint());
        let outcome = core
            .handle(Command::Unknown("restart_flux_capacitor".to_string()))
            .await;
        assert_eq!(outcome, CommandOutcome::Invalid);
        assert!(!core.is_processing());
    }

    #[tokio::test]
    async fn test_area_worker_spawned_alongside_shards() {
        let sources = vec![source("cam0", NotifyPolicy::default())];
        let areas = vec![AreaConfig {
            id: "area0".to_string(),
            name: "Lobby".to_string(),
            cameras: vec!["cam0".to_string()],
            occupancy_threshold: 5,
            occupancy_rules: vec![],
            notify: NotifyPolicy::default(),
        }];
        let mut core = Orchestrator::new(deploy_with_sh_workers(), store(sources, areas), endpoint());

        core.handle(Command::StartProcessing).await;
        // one video shard + the area worker
        assert_eq!(core.engine_count(), 2);
        core.handle(Command::StopProcessing).await;
    }

    #[tokio::test]
    async fn test_notification_jobs_registered_and_cleared_with_session() {
        let notify = NotifyPolicy {
            notify_every_minutes: 15,
            violation_threshold: 3,
            emails: vec!["ops@example.com".to_string()],
            daily_report: true,
            ..NotifyPolicy::default()
        };
        let sources = vec![source("cam0", notify)];
        let mut core = Orchestrator::new(deploy_with_sh_workers(), store(sources, vec![]), endpoint());

        core.handle(Command::StartProcessing).await;
        // violation check + daily report
        assert_eq!(core.scheduled_job_count(), 2);

        core.handle(Command::StopProcessing).await;
        assert_eq!(core.scheduled_job_count(), 0);
    }
}
