//! End-to-end session lifecycle over the control channel
//!
//! Drives a real orchestrator through start/stop/invalid commands via the
//! TCP control channel, with shell stand-ins for worker processes.

use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use vigil_core::config::{
    AppSettings, ConfigStore, NotifyPolicy, ProcessorConfig, SourceConfig,
};
use vigil_core::control_channel::{ControlChannel, ControlClient, START_TOKEN, STOP_TOKEN};
use vigil_core::orchestrator::Orchestrator;
use vigil_core::state::AppConfig;

const AUTH_KEY: &str = "integration-secret";

fn deploy() -> AppConfig {
    AppConfig {
        host: "127.0.0.1".to_string(),
        queue_port: 0,
        queue_auth_key: AUTH_KEY.to_string(),
        config_path: PathBuf::from("unused.json"),
        worker_program: Some(PathBuf::from("sh")),
        worker_args: vec!["-c".to_string(), "read -r _; read -r _".to_string()],
        mail_relay_url: None,
        chat_webhook_url: None,
    }
}

fn store() -> ConfigStore {
    let sources = (0..3)
        .map(|i| SourceConfig {
            id: format!("cam{i}"),
            name: format!("Camera {i}"),
            url: format!("rtsp://cam/{i}"),
            tags: vec![],
            notify: NotifyPolicy::default(),
        })
        .collect();
    ConfigStore::from_config(ProcessorConfig {
        app: AppSettings {
            max_processes: 2,
            ..AppSettings::default()
        },
        sources,
        areas: vec![],
    })
    .unwrap()
}

#[tokio::test]
async fn test_full_session_lifecycle_over_the_wire() {
    let (channel, endpoint) = ControlChannel::bind("127.0.0.1", 0, AUTH_KEY)
        .await
        .unwrap();
    let addr = channel.local_addr().unwrap();
    tokio::spawn(channel.serve());

    let orchestrator = Orchestrator::new(deploy(), store(), endpoint);
    let shutdown = CancellationToken::new();
    let serve = tokio::spawn(orchestrator.serve(shutdown.clone()));

    let mut client = ControlClient::connect(addr, AUTH_KEY).await.unwrap();

    let started = client.send(START_TOKEN).await.unwrap();
    assert!(started.success);

    let second_start = client.send(START_TOKEN).await.unwrap();
    assert!(!second_start.success);
    assert!(second_start.error.is_none());

    let bogus = client.send("restart_flux_capacitor").await.unwrap();
    assert!(!bogus.success);
    assert_eq!(bogus.error.as_deref(), Some("invalid_cmd"));

    let stopped = client.send(STOP_TOKEN).await.unwrap();
    assert!(stopped.success);

    let second_stop = client.send(STOP_TOKEN).await.unwrap();
    assert!(!second_stop.success);

    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(5), serve)
        .await
        .expect("orchestrator must shut down promptly")
        .unwrap();
}

#[tokio::test]
async fn test_unauthenticated_client_cannot_issue_commands() {
    let (channel, _endpoint) = ControlChannel::bind("127.0.0.1", 0, AUTH_KEY)
        .await
        .unwrap();
    let addr = channel.local_addr().unwrap();
    tokio::spawn(channel.serve());

    assert!(ControlClient::connect(addr, "wrong-secret").await.is_err());
}
