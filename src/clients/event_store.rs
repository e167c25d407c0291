use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::{build_http_client, status_error, transport_error, with_retry, HealthStatus, RetryPolicy};
use crate::error::ClientError;
use crate::models::event::{Event, EventFilter};

/// Typed fetcher for historical event rows from the external time-series
/// store. Read-only; retried calls are therefore always safe.
pub struct EventStoreClient {
    base_url: String,
    http: reqwest::Client,
    policy: RetryPolicy,
}

#[derive(Debug, Deserialize)]
struct EventsResponse {
    #[serde(default)]
    events: Vec<Event>,
}

impl EventStoreClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            http: build_http_client(),
            policy: RetryPolicy::default(),
        }
    }

    #[cfg(test)]
    pub fn with_policy(base_url: impl Into<String>, policy: RetryPolicy) -> Self {
        Self {
            base_url: base_url.into(),
            http: build_http_client(),
            policy,
        }
    }

    /// Fetch events in `(from, to]`, ordered by timestamp ascending. `limit`
    /// is an upper bound; fewer rows come back when fewer exist.
    pub async fn fetch_events(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        filter: &EventFilter,
        limit: usize,
    ) -> Result<Vec<Event>, ClientError> {
        let url = format!("{}/api/v1/events", self.base_url);
        let mut events = with_retry("event store fetch", self.policy, || {
            let mut req = self
                .http
                .get(&url)
                .query(&[("from", from.to_rfc3339()), ("to", to.to_rfc3339())])
                .query(&[("limit", limit.to_string())]);
            if let Some(entity_id) = &filter.entity_id {
                req = req.query(&[("entity_id", entity_id)]);
            }
            if let Some(device_id) = &filter.device_id {
                req = req.query(&[("device_id", device_id)]);
            }
            if let Some(domain) = &filter.domain {
                req = req.query(&[("domain", domain)]);
            }
            async move {
                let resp = req
                    .send()
                    .await
                    .map_err(|e| transport_error(e, "event store"))?;
                if !resp.status().is_success() {
                    return Err(status_error(resp.status(), "event store"));
                }
                let body: EventsResponse = resp
                    .json()
                    .await
                    .map_err(|e| ClientError::Parse(format!("event store events: {e}")))?;
                Ok(body.events)
            }
        })
        .await?;

        events.sort_by_key(|e| e.timestamp);
        events.truncate(limit);
        Ok(events)
    }

    pub async fn health(&self) -> HealthStatus {
        let url = format!("{}/api/v1/health", self.base_url);
        match self.http.get(&url).send().await {
            Ok(resp) if resp.status().is_success() => HealthStatus::Ok,
            Ok(_) => HealthStatus::Degraded,
            Err(_) => HealthStatus::Down,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn event_json(ts: &str, entity: &str) -> serde_json::Value {
        serde_json::json!({
            "timestamp": ts,
            "entity_id": entity,
            "device_id": "dev-1",
            "state": "on",
            "attributes": {}
        })
    }

    #[tokio::test]
    async fn fetch_returns_events_sorted_ascending() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/events"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "events": [
                    event_json("2025-11-02T08:00:00Z", "light.b"),
                    event_json("2025-11-02T07:00:00Z", "light.a"),
                ]
            })))
            .mount(&server)
            .await;

        let client = EventStoreClient::with_policy(server.uri(), RetryPolicy::immediate(0));
        let events = client
            .fetch_events(
                Utc::now() - chrono::Duration::days(1),
                Utc::now(),
                &EventFilter::default(),
                100,
            )
            .await
            .unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].entity_id, "light.a");
        assert_eq!(events[1].entity_id, "light.b");
    }

    #[tokio::test]
    async fn transient_failures_are_retried_then_succeed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/events"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/events"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "events": [] })),
            )
            .mount(&server)
            .await;

        let client = EventStoreClient::with_policy(server.uri(), RetryPolicy::immediate(3));
        let events = client
            .fetch_events(
                Utc::now() - chrono::Duration::days(1),
                Utc::now(),
                &EventFilter::default(),
                10,
            )
            .await
            .unwrap();
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/events"))
            .respond_with(ResponseTemplate::new(400))
            .expect(1)
            .mount(&server)
            .await;

        let client = EventStoreClient::with_policy(server.uri(), RetryPolicy::immediate(3));
        let err = client
            .fetch_events(
                Utc::now() - chrono::Duration::days(1),
                Utc::now(),
                &EventFilter::default(),
                10,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::PermanentRemote(_)));
    }

    #[tokio::test]
    async fn health_maps_status_codes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/health"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        let client = EventStoreClient::new(server.uri());
        assert_eq!(client.health().await, HealthStatus::Ok);

        let unreachable = EventStoreClient::new("http://127.0.0.1:1");
        assert_eq!(unreachable.health().await, HealthStatus::Down);
    }
}
