//! Remote collaborators reached over HTTP.
//!
//! One base URL serves all three seams:
//! `POST {base}/agents/{role}/invoke`, `POST {base}/evaluate` and
//! `POST {base}/execute`. Request and response bodies are the JSON forms of
//! the contract types in [`super`].

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::{AgentInput, AgentInvoker, AgentReply, Evaluation, Evaluator, ExecutionOutcome, Executor};
use crate::run::{AgentRole, AgentState};

#[derive(Clone)]
pub struct HttpCollaborator {
    base_url: String,
    client: reqwest::Client,
}

impl HttpCollaborator {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("foreman/1.0")
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post<B: Serialize + ?Sized, R: DeserializeOwned>(&self, path: &str, body: &B) -> Result<R> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .with_context(|| format!("Request to {} failed", url))?
            .error_for_status()
            .with_context(|| format!("{} returned an error status", url))?;

        response
            .json::<R>()
            .await
            .with_context(|| format!("Failed to parse response from {}", url))
    }
}

#[async_trait]
impl AgentInvoker for HttpCollaborator {
    async fn invoke(&self, role: AgentRole, input: &AgentInput) -> Result<AgentReply> {
        self.post(&format!("/agents/{}/invoke", role), input).await
    }
}

#[async_trait]
impl Evaluator for HttpCollaborator {
    async fn score(&self, snapshot: &AgentState) -> Result<Evaluation> {
        self.post("/evaluate", snapshot).await
    }
}

#[async_trait]
impl Executor for HttpCollaborator {
    async fn execute(&self, snapshot: &AgentState) -> Result<ExecutionOutcome> {
        self.post("/execute", snapshot).await
    }
}
