//! Incident delivery - every incident is logged, and optionally forwarded to
//! a webhook (Slack, Discord, etc.) from a background task.

use std::sync::Arc;

use serde::Serialize;
use stepwise_core::ports::{Incident, IncidentReporter, LogIncidents};
use tokio::sync::mpsc;

/// Pending webhook deliveries kept before new incidents are dropped.
const BUFFER_SIZE: usize = 100;

/// Incident as posted to the webhook.
#[derive(Debug, Clone, Serialize)]
pub struct IncidentMessage {
    pub kind: &'static str,
    pub text: String,
    pub service: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl IncidentMessage {
    fn new(service: &str, incident: &Incident) -> Self {
        let text = match incident {
            Incident::StorageUnavailable { key, error } => {
                format!("Window store unavailable for `{key}`, admitting requests: {error}")
            }
            Incident::UpstreamStream {
                action,
                caller_id,
                error,
                partial_len,
            } => format!(
                "Upstream stream for `{action}` ({caller_id}) aborted after {partial_len} bytes: {error}"
            ),
            Incident::PersistenceFailed {
                action,
                caller_id,
                error,
            } => format!("Could not persist `{action}` result for {caller_id}: {error}"),
            Incident::MalformedOutput {
                action,
                caller_id,
                error,
            } => format!("Unusable `{action}` output for {caller_id}: {error}"),
        };

        Self {
            kind: incident.kind(),
            text,
            service: service.to_string(),
            timestamp: chrono::Utc::now(),
        }
    }
}

/// Logs every incident and queues it for webhook delivery.
///
/// `report` never waits on the network: when the queue is full the incident
/// is only logged.
pub struct WebhookIncidentReporter {
    service: String,
    sender: mpsc::Sender<IncidentMessage>,
}

impl WebhookIncidentReporter {
    /// Start the delivery task. Must be called inside a Tokio runtime.
    pub fn new(url: String, service: String) -> Self {
        let (tx, mut rx) = mpsc::channel::<IncidentMessage>(BUFFER_SIZE);
        let client = reqwest::Client::new();

        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                let result = client
                    .post(&url)
                    .json(&message)
                    .send()
                    .await
                    .and_then(|res| res.error_for_status());

                if let Err(e) = result {
                    tracing::warn!(kind = message.kind, error = %e, "Failed to deliver incident webhook");
                }
            }
        });

        Self { service, sender: tx }
    }
}

impl IncidentReporter for WebhookIncidentReporter {
    fn report(&self, incident: Incident) {
        let message = IncidentMessage::new(&self.service, &incident);
        LogIncidents.report(incident);

        if self.sender.try_send(message).is_err() {
            tracing::warn!("Incident webhook queue full, dropping delivery");
        }
    }
}

/// Webhook reporter when a URL is configured, plain logging otherwise.
pub fn reporter(webhook_url: Option<&str>, service: &str) -> Arc<dyn IncidentReporter> {
    match webhook_url {
        Some(url) => {
            tracing::info!("Incident webhook configured");
            Arc::new(WebhookIncidentReporter::new(url.to_string(), service.to_string()))
        }
        None => Arc::new(LogIncidents),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_describes_the_incident() {
        let message = IncidentMessage::new(
            "stepwise-api",
            &Incident::UpstreamStream {
                action: "chat".into(),
                caller_id: "u1".into(),
                error: "connection reset".into(),
                partial_len: 42,
            },
        );

        assert_eq!(message.kind, "upstream_stream");
        assert!(message.text.contains("after 42 bytes"));
        assert!(message.text.contains("connection reset"));
    }

    #[tokio::test]
    async fn report_does_not_block_when_delivery_is_stuck() {
        // Unroutable address; deliveries pile up behind the first.
        let reporter = WebhookIncidentReporter::new("http://10.255.255.1:9/".into(), "test".into());

        for _ in 0..(BUFFER_SIZE * 2) {
            reporter.report(Incident::StorageUnavailable {
                key: "chat:u1".into(),
                error: "timeout".into(),
            });
        }
    }
}
