use serde::Deserialize;

use super::{build_http_client, status_error, transport_error, with_retry, HealthStatus, RetryPolicy};
use crate::error::ClientError;
use crate::models::device::{Area, DeviceRecord};

/// Typed fetcher for devices, entities and areas from the device registry.
pub struct DeviceRegistryClient {
    base_url: String,
    http: reqwest::Client,
    policy: RetryPolicy,
}

#[derive(Debug, Deserialize)]
struct DevicesResponse {
    #[serde(default)]
    devices: Vec<DeviceRecord>,
}

#[derive(Debug, Deserialize)]
struct AreasResponse {
    #[serde(default)]
    areas: Vec<Area>,
}

/// Vendor-neutral capability declarations for one device, as served by the
/// registry's recommendation endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct ExposesPayload {
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub manufacturer: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub exposes: Vec<serde_json::Value>,
}

impl DeviceRegistryClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            http: build_http_client(),
            policy: RetryPolicy::default(),
        }
    }

    pub async fn get_devices(&self) -> Result<Vec<DeviceRecord>, ClientError> {
        let url = format!("{}/api/discovery/devices", self.base_url);
        with_retry("registry devices", self.policy, || async {
            let resp = self
                .http
                .get(&url)
                .send()
                .await
                .map_err(|e| transport_error(e, "device registry"))?;
            if !resp.status().is_success() {
                return Err(status_error(resp.status(), "device registry"));
            }
            let body: DevicesResponse = resp
                .json()
                .await
                .map_err(|e| ClientError::Parse(format!("registry devices: {e}")))?;
            Ok(body.devices)
        })
        .await
    }

    pub async fn get_device(&self, device_id: &str) -> Result<DeviceRecord, ClientError> {
        let url = format!("{}/api/discovery/devices/{device_id}", self.base_url);
        with_retry("registry device", self.policy, || async {
            let resp = self
                .http
                .get(&url)
                .send()
                .await
                .map_err(|e| transport_error(e, "device registry"))?;
            if resp.status() == reqwest::StatusCode::NOT_FOUND {
                return Err(ClientError::NotFound(format!("device {device_id}")));
            }
            if !resp.status().is_success() {
                return Err(status_error(resp.status(), "device registry"));
            }
            resp.json()
                .await
                .map_err(|e| ClientError::Parse(format!("registry device: {e}")))
        })
        .await
    }

    pub async fn get_areas(&self) -> Result<Vec<Area>, ClientError> {
        let url = format!("{}/api/discovery/areas", self.base_url);
        with_retry("registry areas", self.policy, || async {
            let resp = self
                .http
                .get(&url)
                .send()
                .await
                .map_err(|e| transport_error(e, "device registry"))?;
            if !resp.status().is_success() {
                return Err(status_error(resp.status(), "device registry"));
            }
            let body: AreasResponse = resp
                .json()
                .await
                .map_err(|e| ClientError::Parse(format!("registry areas: {e}")))?;
            Ok(body.areas)
        })
        .await
    }

    /// Capability declarations for one device. `None` when the registry has
    /// no recommendation data for it, which is common for generic devices.
    pub async fn get_exposes(&self, device_id: &str) -> Result<Option<ExposesPayload>, ClientError> {
        let url = format!("{}/api/recommendations/{device_id}", self.base_url);
        with_retry("registry exposes", self.policy, || async {
            let resp = self
                .http
                .get(&url)
                .send()
                .await
                .map_err(|e| transport_error(e, "device registry"))?;
            if resp.status() == reqwest::StatusCode::NOT_FOUND {
                return Ok(None);
            }
            if !resp.status().is_success() {
                return Err(status_error(resp.status(), "device registry"));
            }
            let payload: ExposesPayload = resp
                .json()
                .await
                .map_err(|e| ClientError::Parse(format!("registry exposes: {e}")))?;
            Ok(Some(payload))
        })
        .await
    }

    pub async fn health(&self) -> HealthStatus {
        let url = format!("{}/api/discovery/devices", self.base_url);
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

    #[tokio::test]
    async fn unknown_device_is_not_found_and_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/discovery/devices/nope"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let mut client = DeviceRegistryClient::new(server.uri());
        client.policy = RetryPolicy::immediate(3);
        let err = client.get_device("nope").await.unwrap_err();
        assert!(matches!(err, ClientError::NotFound(_)));
    }

    #[tokio::test]
    async fn missing_exposes_is_none_not_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/recommendations/dev-1"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = DeviceRegistryClient::new(server.uri());
        assert!(client.get_exposes("dev-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn devices_deserialize_from_envelope() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/discovery/devices"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "devices": [{
                    "device_id": "dev-1",
                    "name": "Kitchen Switch",
                    "manufacturer": "Inovelli",
                    "model": "VZM31-SN",
                    "area_id": "kitchen",
                    "integration": "zigbee2mqtt",
                    "health_score": 92.0,
                    "entities": [{"entity_id": "light.kitchen_switch"}]
                }]
            })))
            .mount(&server)
            .await;

        let client = DeviceRegistryClient::new(server.uri());
        let devices = client.get_devices().await.unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].model, "VZM31-SN");
        assert!(devices[0].is_healthy());
    }
}
