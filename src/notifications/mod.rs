//! Notification collaborators
//!
//! ## Responsibilities
//!
//! - Mail notifications via the deployment's mail relay endpoint
//! - Chat notifications via the deployment's webhook endpoint
//!
//! Both services are fire-and-forget from the caller's perspective:
//! delivery failures are logged here and never propagated into the
//! aggregation loop or the scheduler.

mod violations;

pub use violations::{check_violations, count_violations, daily_report, hourly_violations};

use serde_json::json;
use std::fmt;
use std::time::Duration;

use crate::config::{AreaConfig, SourceConfig};

/// What kind of entity a notification concerns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Camera,
    Area,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Camera => write!(f, "Camera"),
            EntityKind::Area => write!(f, "Area"),
        }
    }
}

/// Notification target identity, detached from the full config structs
#[derive(Debug, Clone)]
pub struct EntityRef {
    pub kind: EntityKind,
    pub id: String,
    pub name: String,
    pub emails: Vec<String>,
}

impl From<&SourceConfig> for EntityRef {
    fn from(source: &SourceConfig) -> Self {
        Self {
            kind: EntityKind::Camera,
            id: source.id.clone(),
            name: source.name.clone(),
            emails: source.notify.emails.clone(),
        }
    }
}

impl From<&AreaConfig> for EntityRef {
    fn from(area: &AreaConfig) -> Self {
        Self {
            kind: EntityKind::Area,
            id: area.id.clone(),
            name: area.name.clone(),
            emails: area.notify.emails.clone(),
        }
    }
}

/// Mail notification service, delivering through an HTTP mail relay
#[derive(Clone)]
pub struct MailService {
    client: reqwest::Client,
    relay_url: Option<String>,
    dashboard_url: Option<String>,
}

impl MailService {
    pub fn new(relay_url: Option<String>, dashboard_url: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("Failed to create HTTP client");
        Self {
            client,
            relay_url,
            dashboard_url,
        }
    }

    pub async fn send_occupancy_alert(&self, entity: &EntityRef, occupancy: u32, threshold: u32) {
        let subject = format!(
            "[Vigil] Occupancy Alert on {} ({})",
            entity.name, entity.kind
        );
        let body = format!(
            "Occupancy in {} reached {} (limit {}).{}",
            entity.name,
            occupancy,
            threshold,
            self.dashboard_suffix()
        );
        self.deliver(entity, subject, body).await;
    }

    pub async fn send_violation_alert(&self, entity: &EntityRef, violations: u32) {
        let subject = format!(
            "[Vigil] Violation Report on {} ({})",
            entity.name, entity.kind
        );
        let body = format!(
            "{} violations were detected in {}.{}",
            violations,
            entity.name,
            self.dashboard_suffix()
        );
        self.deliver(entity, subject, body).await;
    }

    pub async fn send_daily_report(&self, entity: &EntityRef, total: u32, per_hour: &[u32; 24]) {
        let subject = format!(
            "[Vigil] Daily Report on {}: {}",
            entity.kind, entity.name
        );
        let mut body = format!("{} violations in the last day.\n", total);
        for (hour, count) in per_hour.iter().enumerate() {
            body.push_str(&format!("{hour:02}:00  {count}\n"));
        }
        body.push_str(&self.dashboard_suffix());
        self.deliver(entity, subject, body).await;
    }

    fn dashboard_suffix(&self) -> String {
        self.dashboard_url
            .as_deref()
            .map(|url| format!(" See {url}/dashboard for details."))
            .unwrap_or_default()
    }

    async fn deliver(&self, entity: &EntityRef, subject: String, body: String) {
        if entity.emails.is_empty() {
            tracing::info!(
                entity_id = %entity.id,
                "No notification was mailed because the entity has no recipients"
            );
            return;
        }
        let Some(relay_url) = self.relay_url.as_deref() else {
            tracing::info!(
                entity_id = %entity.id,
                "No notification was mailed because no mail relay is configured"
            );
            return;
        };
        let payload = json!({
            "to": entity.emails,
            "subject": subject,
            "body": body,
        });
        match self.client.post(relay_url).json(&payload).send().await {
            Ok(resp) if resp.status().is_success() => {
                tracing::info!(
                    entity_id = %entity.id,
                    recipients = entity.emails.len(),
                    "Sent notification mail"
                );
            }
            Ok(resp) => {
                tracing::error!(
                    entity_id = %entity.id,
                    status = %resp.status(),
                    "Mail relay rejected notification"
                );
            }
            Err(e) => {
                tracing::error!(
                    entity_id = %entity.id,
                    error = %e,
                    "Failed to reach mail relay"
                );
            }
        }
    }
}

/// Chat notification service, posting to a webhook channel
#[derive(Clone)]
pub struct ChatService {
    client: reqwest::Client,
    webhook_url: Option<String>,
    channel: Option<String>,
}

impl ChatService {
    pub fn new(webhook_url: Option<String>, channel: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("Failed to create HTTP client");
        Self {
            client,
            webhook_url,
            channel,
        }
    }

    pub async fn occupancy_alert(&self, entity: &EntityRef, occupancy: u32, threshold: u32) {
        let msg = format!(
            "Occupancy in {} {}: {} reached {} (limit {})",
            entity.kind, entity.id, entity.name, occupancy, threshold
        );
        self.post_message(&msg).await;
    }

    pub async fn violation_report(&self, entity: &EntityRef, violations: u32) {
        let msg = format!(
            "We found {} violations in {}: {} {}",
            violations, entity.id, entity.name, entity.kind
        );
        self.post_message(&msg).await;
    }

    async fn post_message(&self, msg: &str) {
        let Some(webhook_url) = self.webhook_url.as_deref() else {
            tracing::info!("No chat notification was sent because no webhook is configured");
            return;
        };
        let payload = json!({
            "channel": self.channel,
            "text": msg,
        });
        match self.client.post(webhook_url).json(&payload).send().await {
            Ok(resp) if resp.status().is_success() => {
                tracing::info!("Posted chat notification");
            }
            Ok(resp) => {
                tracing::error!(status = %resp.status(), "Chat webhook rejected notification");
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to reach chat webhook");
            }
        }
    }
}
