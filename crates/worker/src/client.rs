//! HTTP client for the relay server's agent protocol.

use std::collections::BTreeMap;

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use tracing::debug;

use jobrelay_agents::AgentStatus;
use jobrelay_browser::portals::{FieldMapper, FieldMapping, FieldMappings, FormField, VerificationCodeSource};
use jobrelay_core::TaskId;
use jobrelay_retry::AutomationError;
use jobrelay_tasks::{Task, TaskReport};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server answered {status}: {body}")]
    Status { status: u16, body: String },

    #[error("bad url: {0}")]
    Url(String),
}

impl ClientError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, ClientError::Status { status: 429, .. })
    }
}

impl ClientError {
    /// The server understood the request and refused it; sending it again
    /// cannot succeed.
    pub fn is_rejected(&self) -> bool {
        matches!(self, ClientError::Status { status, .. } if (400..500).contains(status) && *status != 429)
    }
}

impl From<ClientError> for AutomationError {
    fn from(value: ClientError) -> Self {
        if value.is_rejected() {
            AutomationError::NonRetryable(value.to_string())
        } else {
            AutomationError::Network(value.to_string())
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Heartbeat<'a> {
    pub agent_id: &'a str,
    pub status: AgentStatus,
    pub active_tasks: u32,
}

/// The server calls an agent makes.
#[async_trait]
pub trait AgentApi: Send + Sync {
    async fn register(&self, name: Option<&str>, metadata: JsonValue) -> Result<(), ClientError>;

    async fn heartbeat(&self, status: AgentStatus, active_tasks: u32) -> Result<(), ClientError>;

    /// `None` when nothing is queued for this agent's owner.
    async fn claim(&self) -> Result<Option<Task>, ClientError>;

    async fn report(&self, report: &TaskReport) -> Result<(), ClientError>;

    async fn verification_code(&self, task_id: TaskId) -> Result<Option<String>, ClientError>;
}

#[derive(Debug, Clone)]
pub struct ServerClient {
    http: reqwest::Client,
    base: Url,
    api_key: String,
    agent_id: String,
}

#[derive(Debug, Deserialize)]
struct CodeBody {
    code: String,
}

impl ServerClient {
    pub fn new(base: Url, api_key: impl Into<String>, agent_id: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base,
            api_key: api_key.into(),
            agent_id: agent_id.into(),
        }
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    fn url(&self, path: &str) -> Result<Url, ClientError> {
        self.base
            .join(path.trim_start_matches('/'))
            .map_err(|e| ClientError::Url(e.to_string()))
    }

    /// POST `body` and return the response, or `None` on 204.
    async fn post<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<Option<reqwest::Response>, ClientError> {
        let res = self
            .http
            .post(self.url(path)?)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await?;
        Self::check(res).await
    }

    async fn get(&self, path: &str) -> Result<Option<reqwest::Response>, ClientError> {
        let res = self
            .http
            .get(self.url(path)?)
            .bearer_auth(&self.api_key)
            .send()
            .await?;
        Self::check(res).await
    }

    async fn check(res: reqwest::Response) -> Result<Option<reqwest::Response>, ClientError> {
        let status = res.status();
        if status == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(ClientError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(Some(res))
    }

    async fn decode<T: DeserializeOwned>(res: Option<reqwest::Response>) -> Result<Option<T>, ClientError> {
        match res {
            None => Ok(None),
            Some(r) => Ok(Some(r.json::<T>().await?)),
        }
    }
}

#[async_trait]
impl AgentApi for ServerClient {
    async fn register(&self, name: Option<&str>, metadata: JsonValue) -> Result<(), ClientError> {
        self.post(
            "/agents/register",
            &json!({"agent_id": self.agent_id, "name": name, "metadata": metadata}),
        )
        .await?;
        Ok(())
    }

    async fn heartbeat(&self, status: AgentStatus, active_tasks: u32) -> Result<(), ClientError> {
        let body = Heartbeat {
            agent_id: &self.agent_id,
            status,
            active_tasks,
        };
        self.post("/agents/heartbeat", &body).await?;
        Ok(())
    }

    async fn claim(&self) -> Result<Option<Task>, ClientError> {
        let res = self
            .post("/agents/tasks/claim", &json!({"agent_id": self.agent_id}))
            .await?;
        Self::decode(res).await
    }

    async fn report(&self, report: &TaskReport) -> Result<(), ClientError> {
        self.post("/agents/tasks/result", report).await?;
        Ok(())
    }

    async fn verification_code(&self, task_id: TaskId) -> Result<Option<String>, ClientError> {
        let res = self
            .get(&format!("/agents/tasks/{task_id}/verification-code"))
            .await?;
        Ok(Self::decode::<CodeBody>(res).await?.map(|b| b.code))
    }
}

/// Lets portal strategies poll the server for relayed codes.
pub struct ServerCodeSource<A: ?Sized>(pub std::sync::Arc<A>);

#[async_trait]
impl<A: AgentApi + ?Sized> VerificationCodeSource for ServerCodeSource<A> {
    async fn fetch_code(&self, task_id: TaskId) -> Result<Option<String>, AutomationError> {
        Ok(self.0.verification_code(task_id).await?)
    }
}

/// Remote AI field mapper: posts the discovered fields and the flattened
/// profile, expects `{mappings: [...]}` back.
#[derive(Debug, Clone)]
pub struct HttpFieldMapper {
    http: reqwest::Client,
    url: Url,
}

impl HttpFieldMapper {
    pub fn new(url: Url) -> Self {
        Self {
            http: reqwest::Client::new(),
            url,
        }
    }
}

#[async_trait]
impl FieldMapper for HttpFieldMapper {
    async fn map_fields(
        &self,
        fields: &[FormField],
        profile: &BTreeMap<String, String>,
    ) -> Result<Vec<FieldMapping>, AutomationError> {
        let res = self
            .http
            .post(self.url.clone())
            .json(&json!({"fields": fields, "profile": profile}))
            .send()
            .await
            .map_err(|e| AutomationError::Network(e.to_string()))?;
        if !res.status().is_success() {
            return Err(AutomationError::Network(format!(
                "field mapper answered {}",
                res.status()
            )));
        }
        let body: FieldMappings = res
            .json()
            .await
            .map_err(|e| AutomationError::Form(format!("field mapper response: {e}")))?;
        debug!(mappings = body.mappings.len(), "field mapper answered");
        Ok(body.mappings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeApi;
    use std::sync::Arc;

    #[tokio::test]
    async fn code_source_relays_server_codes() {
        let api = FakeApi::arc();
        let task_id = TaskId::new();
        let source = ServerCodeSource(api.clone());
        assert_eq!(source.fetch_code(task_id).await.unwrap(), None);

        api.set_code(task_id, "913370");
        assert_eq!(source.fetch_code(task_id).await.unwrap().as_deref(), Some("913370"));
        assert_eq!(source.fetch_code(TaskId::new()).await.unwrap(), None);
    }

    #[test]
    fn only_429_counts_as_rate_limited() {
        let limited = ClientError::Status { status: 429, body: String::new() };
        let other = ClientError::Status { status: 500, body: String::new() };
        assert!(limited.is_rate_limited());
        assert!(!other.is_rate_limited());
        assert!(matches!(AutomationError::from(other), AutomationError::Network(_)));
    }

    #[test]
    fn client_errors_other_than_429_are_not_retried() {
        for status in [400, 401, 404, 409, 422] {
            let err = AutomationError::from(ClientError::Status { status, body: String::new() });
            assert!(err.is_non_retryable(), "{status}");
        }
        let limited = AutomationError::from(ClientError::Status { status: 429, body: String::new() });
        assert!(!limited.is_non_retryable());
        let url = AutomationError::from(ClientError::Url("nope".into()));
        assert!(matches!(url, AutomationError::Network(_)));
    }

    #[test]
    fn base_url_paths_are_joined() {
        let client = ServerClient::new(Url::parse("http://relay.local:8080/api/").unwrap(), "k", "a");
        assert_eq!(
            client.url("/agents/tasks/claim").unwrap().as_str(),
            "http://relay.local:8080/api/agents/tasks/claim"
        );
    }
}
