use super::build_http_client;

pub const TOPIC_ANALYSIS_COMPLETE: &str = "ha-ai/analysis/complete";
pub const TOPIC_SUGGESTIONS_NEW: &str = "ha-ai/suggestions/new";

/// Emits "analysis complete" and "new suggestions" notices.
///
/// The message bus itself is an external collaborator; this publisher hands
/// `{topic, qos, payload}` envelopes to the configured bridge endpoint and
/// logs failures without propagating them. Unconfigured means disabled.
pub struct NotificationPublisher {
    endpoint: Option<String>,
    http: reqwest::Client,
}

impl NotificationPublisher {
    pub fn new(endpoint: Option<String>) -> Self {
        Self {
            endpoint,
            http: build_http_client(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.endpoint.is_some()
    }

    /// Fire-and-log publish. Never fails the caller.
    pub async fn publish(&self, topic: &str, payload: serde_json::Value) {
        let Some(endpoint) = &self.endpoint else {
            tracing::debug!("notifier disabled, dropping {topic} notice");
            return;
        };
        let envelope = serde_json::json!({
            "topic": topic,
            "qos": 1,
            "payload": payload,
        });
        match self.http.post(endpoint).json(&envelope).send().await {
            Ok(resp) if resp.status().is_success() => {
                tracing::info!("published notice to {topic}");
            }
            Ok(resp) => {
                tracing::warn!("notifier returned {} for {topic}", resp.status());
            }
            Err(e) => {
                tracing::warn!("notifier publish to {topic} failed: {e}");
            }
        }
    }
}
