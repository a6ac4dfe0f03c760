//! Process-level configuration
//!
//! Deployment settings read from the environment at startup. Processing
//! configuration (sources, areas, thresholds) lives in the processor
//! config file loaded by [`crate::config::ConfigStore`].

use std::path::PathBuf;

/// Deployment configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Bind host for the control channel
    pub host: String,
    /// Bind port for the control channel queue endpoint
    pub queue_port: u16,
    /// Shared secret for the control channel handshake
    pub queue_auth_key: String,
    /// Path to the processor configuration file
    pub config_path: PathBuf,
    /// Worker program override (defaults to the current executable)
    pub worker_program: Option<PathBuf>,
    /// Worker argument override (used verbatim when `worker_program` is set)
    pub worker_args: Vec<String>,
    /// Mail relay endpoint for notification delivery
    pub mail_relay_url: Option<String>,
    /// Chat webhook endpoint for notification delivery
    pub chat_webhook_url: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: std::env::var("VIGIL_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            queue_port: std::env::var("VIGIL_QUEUE_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8855),
            queue_auth_key: std::env::var("VIGIL_QUEUE_AUTH_KEY")
                .unwrap_or_else(|_| "shibboleth".to_string()),
            config_path: std::env::var("VIGIL_CONFIG")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("/etc/vigil/processor.json")),
            worker_program: std::env::var("VIGIL_WORKER_PROGRAM").ok().map(PathBuf::from),
            worker_args: std::env::var("VIGIL_WORKER_ARGS")
                .map(|v| v.split_whitespace().map(str::to_string).collect())
                .unwrap_or_default(),
            mail_relay_url: std::env::var("VIGIL_MAIL_RELAY_URL").ok(),
            chat_webhook_url: std::env::var("VIGIL_CHAT_WEBHOOK_URL").ok(),
        }
    }
}
