// HTTP client for an external reasoning service

use crate::config::ReasoningConfig;
use crate::errors::ReasoningError;
use crate::reasoning::{extract_placements, OccupiedSlot, PendingSection, RawPlacement, ReasoningService};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::instrument;

#[derive(Debug, Serialize)]
struct ProposeRequest<'a> {
    model: &'a str,
    brief: &'a str,
    occupied: &'a [OccupiedSlot],
    pending: &'a [PendingSection],
}

/// Posts the requirement brief to a configured endpoint
pub struct HttpReasoningClient {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
    timeout_seconds: u64,
}

impl HttpReasoningClient {
    pub fn new(endpoint: impl Into<String>, config: &ReasoningConfig) -> Result<Self, ReasoningError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| {
                ReasoningError::Transport(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            timeout_seconds: config.timeout_seconds,
        })
    }
}

#[async_trait]
impl ReasoningService for HttpReasoningClient {
    #[instrument(skip_all, fields(endpoint = %self.endpoint, pending = pending.len()))]
    async fn propose(
        &self,
        brief: &str,
        occupied: &[OccupiedSlot],
        pending: &[PendingSection],
    ) -> Result<Vec<RawPlacement>, ReasoningError> {
        let mut request = self.client.post(&self.endpoint).json(&ProposeRequest {
            model: &self.model,
            brief,
            occupied,
            pending,
        });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ReasoningError::Timeout(self.timeout_seconds)
            } else {
                ReasoningError::Transport(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ReasoningError::Status(status.as_u16()));
        }

        let body = response
            .text()
            .await
            .map_err(|e| ReasoningError::Transport(e.to_string()))?;

        let placements = extract_placements(&body)?;
        tracing::debug!(count = placements.len(), "Reasoning service proposed placements");
        Ok(placements)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config() -> ReasoningConfig {
        ReasoningConfig {
            endpoint: None,
            api_key: Some("secret".to_string()),
            model: "timetable-planner".to_string(),
            timeout_seconds: 5,
        }
    }

    #[tokio::test]
    async fn test_posts_brief_and_parses_placements() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/propose"))
            .and(header("authorization", "Bearer secret"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"placements":[{"section_id":"s1","day":"Sunday","start":"08:00","end":"08:50"}]}"#,
            ))
            .expect(1)
            .mount(&server)
            .await;

        let client =
            HttpReasoningClient::new(format!("{}/propose", server.uri()), &config()).unwrap();
        let placements = client.propose("brief", &[], &[]).await.unwrap();

        assert_eq!(placements.len(), 1);
        assert_eq!(placements[0].section_id.as_deref(), Some("s1"));
    }

    #[tokio::test]
    async fn test_error_status_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = HttpReasoningClient::new(server.uri(), &config()).unwrap();
        let err = client.propose("brief", &[], &[]).await.unwrap_err();
        assert_eq!(err, ReasoningError::Status(503));
    }

    #[tokio::test]
    async fn test_prose_without_array_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("I cannot help with that."))
            .mount(&server)
            .await;

        let client = HttpReasoningClient::new(server.uri(), &config()).unwrap();
        let err = client.propose("brief", &[], &[]).await.unwrap_err();
        assert!(matches!(err, ReasoningError::Malformed(_)));
    }
}
