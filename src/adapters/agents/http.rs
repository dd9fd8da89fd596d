//! Secondary escalation agent reached over HTTP.
//!
//! The agent receives `POST {endpoint}` with the negotiation context and
//! answers `{"proposals": [...]}`. Rate limits, server errors and connection
//! failures are retried with exponential backoff.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use backoff::future::retry;
use backoff::{Error as BackoffError, ExponentialBackoff};
use reqwest::{Client as ReqwestClient, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::domain::models::{AgentEndpointConfig, AgentRole, FixProposal};
use crate::domain::ports::{EscalationAgent, NegotiationContext};

#[derive(Serialize)]
struct ProposalRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
    temperature: f64,
    context: &'a NegotiationContext,
}

#[derive(Deserialize)]
struct ProposalResponse {
    #[serde(default)]
    proposals: Vec<FixProposal>,
}

fn is_transient_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

pub struct HttpEscalationAgent {
    http_client: ReqwestClient,
    endpoint: String,
    model: Option<String>,
    api_key: Option<String>,
    name: String,
    max_retries: u32,
    initial_backoff: Duration,
}

impl HttpEscalationAgent {
    /// Build an agent from configuration, reading the API key from the
    /// configured environment variable.
    pub fn from_config(config: &AgentEndpointConfig, request_timeout: Duration) -> Result<Self> {
        let api_key = match &config.api_key_env {
            Some(var) => match std::env::var(var) {
                Ok(key) => Some(key),
                Err(_) => {
                    warn!(env = %var, "Agent API key variable is not set; sending unauthenticated requests");
                    None
                }
            },
            None => None,
        };

        let http_client = ReqwestClient::builder()
            .timeout(request_timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            http_client,
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            api_key,
            name: config.model.clone().unwrap_or_else(|| "http-agent".to_string()),
            max_retries: config.max_retries,
            initial_backoff: Duration::from_millis(500),
        })
    }

    /// Override the first retry delay.
    pub fn with_initial_backoff(mut self, delay: Duration) -> Self {
        self.initial_backoff = delay;
        self
    }

    async fn send_once(&self, body: &ProposalRequest<'_>) -> Result<Vec<FixProposal>, BackoffError<anyhow::Error>> {
        let mut request = self.http_client.post(&self.endpoint).json(body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            let transient = e.is_timeout() || e.is_connect();
            let err = anyhow!(e).context("Agent request failed");
            if transient {
                BackoffError::transient(err)
            } else {
                BackoffError::permanent(err)
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let err = anyhow!("agent returned {status}: {text}");
            return Err(if is_transient_status(status) {
                BackoffError::transient(err)
            } else {
                BackoffError::permanent(err)
            });
        }

        let parsed: ProposalResponse = response
            .json()
            .await
            .map_err(|e| BackoffError::permanent(anyhow!(e).context("Malformed agent response")))?;
        Ok(parsed.proposals)
    }
}

#[async_trait]
impl EscalationAgent for HttpEscalationAgent {
    fn role(&self) -> AgentRole {
        AgentRole::Secondary
    }

    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(skip(self, ctx), fields(project = %ctx.project, round = ctx.round))]
    async fn propose_fixes(&self, ctx: &NegotiationContext, temperature: f64) -> Result<Vec<FixProposal>> {
        let body = ProposalRequest {
            model: self.model.as_deref(),
            temperature,
            context: ctx,
        };
        let body = &body;
        let policy = ExponentialBackoff {
            initial_interval: self.initial_backoff,
            max_interval: self.initial_backoff * 8,
            max_elapsed_time: None,
            ..Default::default()
        };
        let max_retries = self.max_retries;
        let mut attempts = 0u32;

        let proposals = retry(policy, || {
            attempts += 1;
            let attempt = attempts;
            async move {
                self.send_once(body).await.map_err(|e| match e {
                    BackoffError::Transient { err, .. } if attempt > max_retries => {
                        BackoffError::permanent(err)
                    }
                    BackoffError::Transient { err, retry_after } => {
                        warn!(attempt, error = %err, "Agent request failed; retrying");
                        BackoffError::Transient { err, retry_after }
                    }
                    other => other,
                })
            }
        })
        .await?;

        debug!(proposals = proposals.len(), temperature, "Agent answered");
        Ok(proposals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{IssueCategory, ProposedEdit};
    use mockito::{Matcher, Server};

    fn context() -> NegotiationContext {
        NegotiationContext {
            project: "core".into(),
            round: 1,
            unresolved: Vec::new(),
            attempted: Vec::new(),
            tests: Vec::new(),
            confidence_trend: vec![40],
        }
    }

    fn agent(url: String, max_retries: u32) -> HttpEscalationAgent {
        let config = AgentEndpointConfig {
            endpoint: format!("{url}/propose"),
            model: Some("reviewer".into()),
            api_key_env: None,
            max_retries,
        };
        HttpEscalationAgent::from_config(&config, Duration::from_secs(5))
            .unwrap()
            .with_initial_backoff(Duration::from_millis(10))
    }

    #[tokio::test]
    async fn test_proposals_are_parsed() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/propose")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "model": "reviewer",
                "context": {"project": "core", "round": 1}
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"proposals": [{"addresses": "mock_usage", "description": "real server",
                    "edits": [{"op": "write", "path": "tests/test_api.py", "content": "x"}]}]}"#,
            )
            .create_async()
            .await;

        let proposals = agent(server.url(), 0)
            .propose_fixes(&context(), 0.3)
            .await
            .unwrap();

        assert_eq!(proposals.len(), 1);
        assert_eq!(proposals[0].addresses, IssueCategory::MockUsage);
        assert!(matches!(proposals[0].edits[0], ProposedEdit::Write { .. }));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_server_errors_are_retried() {
        let mut server = Server::new_async().await;
        let failing = server
            .mock("POST", "/propose")
            .with_status(503)
            .expect(3)
            .create_async()
            .await;

        let result = agent(server.url(), 2).propose_fixes(&context(), 0.5).await;

        assert!(result.is_err());
        failing.assert_async().await;
    }

    #[tokio::test]
    async fn test_client_errors_are_not_retried() {
        let mut server = Server::new_async().await;
        let rejected = server
            .mock("POST", "/propose")
            .with_status(400)
            .expect(1)
            .create_async()
            .await;

        let result = agent(server.url(), 3).propose_fixes(&context(), 0.5).await;

        assert!(result.is_err());
        rejected.assert_async().await;
    }

    #[test]
    fn test_transient_statuses() {
        assert!(is_transient_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_transient_status(StatusCode::BAD_GATEWAY));
        assert!(!is_transient_status(StatusCode::UNAUTHORIZED));
    }
}
