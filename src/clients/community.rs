use serde::Deserialize;

use super::{build_http_client, status_error, transport_error};
use crate::error::ClientError;

/// A community-contributed automation returned by the corpus search.
#[derive(Debug, Clone, Deserialize)]
pub struct CommunityAutomation {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub quality: f64,
    #[serde(default)]
    pub devices: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<CommunityAutomation>,
}

/// Optional collaborator: searches a community automation corpus for
/// patterns similar to what the detectors found. Everything here degrades
/// gracefully; the pipeline never depends on it.
pub struct CommunityClient {
    base_url: String,
    http: reqwest::Client,
}

impl CommunityClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            http: build_http_client(),
        }
    }

    /// Search high-quality community automations mentioning `device`.
    /// No retries: this is best-effort enrichment.
    pub async fn search(
        &self,
        device: &str,
        min_quality: f64,
        limit: usize,
    ) -> Result<Vec<CommunityAutomation>, ClientError> {
        let url = format!("{}/api/corpus/search", self.base_url);
        let resp = self
            .http
            .get(&url)
            .query(&[
                ("device", device),
                ("min_quality", &min_quality.to_string()),
                ("limit", &limit.to_string()),
            ])
            .send()
            .await
            .map_err(|e| transport_error(e, "community corpus"))?;
        if !resp.status().is_success() {
            return Err(status_error(resp.status(), "community corpus"));
        }
        let body: SearchResponse = resp
            .json()
            .await
            .map_err(|e| ClientError::Parse(format!("community search: {e}")))?;
        Ok(body.results)
    }
}
