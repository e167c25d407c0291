use serde_json::Value;

use super::{build_http_client, status_error, transport_error, with_retry, HealthStatus, RetryPolicy};
use crate::error::ClientError;
use crate::models::automation::AutomationRule;

/// Client for the home orchestrator's REST surface: reading the automation
/// list and entity states, and pushing approved automations.
pub struct OrchestratorClient {
    base_url: String,
    token: String,
    http: reqwest::Client,
    policy: RetryPolicy,
}

impl OrchestratorClient {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            token: token.into(),
            http: build_http_client(),
            policy: RetryPolicy::default(),
        }
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.http
            .get(format!("{}{path}", self.base_url))
            .bearer_auth(&self.token)
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        self.http
            .post(format!("{}{path}", self.base_url))
            .bearer_auth(&self.token)
    }

    /// Read-only listing of every automation the orchestrator currently owns.
    pub async fn list_automations(&self) -> Result<Vec<AutomationRule>, ClientError> {
        let configs: Vec<Value> = with_retry("orchestrator automations", self.policy, || async {
            let resp = self
                .get("/api/config/automation/config")
                .send()
                .await
                .map_err(|e| transport_error(e, "orchestrator"))?;
            if !resp.status().is_success() {
                return Err(status_error(resp.status(), "orchestrator"));
            }
            resp.json()
                .await
                .map_err(|e| ClientError::Parse(format!("automation list: {e}")))
        })
        .await?;
        Ok(configs.iter().map(AutomationRule::from_config).collect())
    }

    /// `None` when the entity does not exist on the orchestrator.
    pub async fn get_entity_state(&self, entity_id: &str) -> Result<Option<Value>, ClientError> {
        let path = format!("/api/states/{entity_id}");
        with_retry("orchestrator state", self.policy, || async {
            let resp = self
                .get(&path)
                .send()
                .await
                .map_err(|e| transport_error(e, "orchestrator"))?;
            if resp.status() == reqwest::StatusCode::NOT_FOUND {
                return Ok(None);
            }
            if !resp.status().is_success() {
                return Err(status_error(resp.status(), "orchestrator"));
            }
            let state: Value = resp
                .json()
                .await
                .map_err(|e| ClientError::Parse(format!("entity state: {e}")))?;
            Ok(Some(state))
        })
        .await
    }

    /// Push an automation configuration and reload. The automation text is YAML;
    /// the orchestrator config endpoint wants the equivalent JSON document.
    /// Writes are not retried.
    pub async fn deploy_automation(
        &self,
        automation_id: &str,
        spec_yaml: &str,
    ) -> Result<(), ClientError> {
        let parsed: serde_yaml::Value = serde_yaml::from_str(spec_yaml)
            .map_err(|e| ClientError::Parse(format!("automation spec: {e}")))?;
        let body = serde_json::to_value(&parsed)
            .map_err(|e| ClientError::Parse(format!("automation spec: {e}")))?;

        let resp = self
            .post(&format!("/api/config/automation/config/{automation_id}"))
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(e, "orchestrator"))?;
        if !resp.status().is_success() {
            return Err(status_error(resp.status(), "orchestrator deploy"));
        }

        self.reload_automations().await?;
        self.enable_automation(automation_id).await
    }

    async fn reload_automations(&self) -> Result<(), ClientError> {
        let resp = self
            .post("/api/services/automation/reload")
            .send()
            .await
            .map_err(|e| transport_error(e, "orchestrator"))?;
        if !resp.status().is_success() {
            return Err(status_error(resp.status(), "orchestrator reload"));
        }
        Ok(())
    }

    async fn enable_automation(&self, automation_id: &str) -> Result<(), ClientError> {
        let resp = self
            .post("/api/services/automation/turn_on")
            .json(&serde_json::json!({ "entity_id": format!("automation.{automation_id}") }))
            .send()
            .await
            .map_err(|e| transport_error(e, "orchestrator"))?;
        if !resp.status().is_success() {
            return Err(status_error(resp.status(), "orchestrator enable"));
        }
        Ok(())
    }

    pub async fn health(&self) -> HealthStatus {
        match self.get("/api/config/automation/config").send().await {
            Ok(resp) if resp.status().is_success() => HealthStatus::Ok,
            Ok(_) => HealthStatus::Degraded,
            Err(_) => HealthStatus::Down,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn lists_automations_with_extracted_entities() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/config/automation/config"))
            .and(header("authorization", "Bearer secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([{
                "id": "a1",
                "alias": "Hall motion light",
                "trigger": [{"entity_id": "binary_sensor.hall_motion"}],
                "action": [{"service": "light.turn_on", "target": {"entity_id": "light.hall"}}]
            }])))
            .mount(&server)
            .await;

        let client = OrchestratorClient::new(server.uri(), "secret");
        let rules = client.list_automations().await.unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].trigger_entities, vec!["binary_sensor.hall_motion"]);
        assert_eq!(rules[0].action_entities, vec!["light.hall"]);
    }

    #[tokio::test]
    async fn missing_entity_state_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/states/light.ghost"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = OrchestratorClient::new(server.uri(), "secret");
        assert!(client
            .get_entity_state("light.ghost")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn deploy_pushes_config_then_reloads_and_enables() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/config/automation/config/sugg_1"))
            .and(body_partial_json(serde_json::json!({"alias": "Test"})))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/services/automation/reload"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/services/automation/turn_on"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let client = OrchestratorClient::new(server.uri(), "secret");
        client
            .deploy_automation("sugg_1", "alias: Test\ntrigger: []\naction: []\n")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn deploy_rejects_invalid_yaml() {
        let client = OrchestratorClient::new("http://127.0.0.1:1", "secret");
        let err = client
            .deploy_automation("x", ": not yaml :::")
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Parse(_)));
    }
}
