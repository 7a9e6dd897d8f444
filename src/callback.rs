//! Docker Hub webhook callback: reports the reconciliation result back to `callback_url`,
//! which marks the webhook delivery as succeeded or failed in the registry's UI.

use crate::reconciler::{ReconcileError, ReconcileOutcome};
use anyhow::{Context, Result, bail};
use reqwest::{Client, Url};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info};

const CALLBACK_CONTEXT: &str = "hub-autorestart";
const CALLBACK_TIMEOUT: Duration = Duration::from_secs(10);
const CALLBACK_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CallbackState {
    Success,
    Failure,
    Error,
}

#[derive(Debug, PartialEq, Eq, Serialize)]
pub struct CallbackPayload {
    pub state: CallbackState,
    pub description: String,
    pub context: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_url: Option<String>,
}

impl CallbackPayload {
    pub fn from_result(result: &Result<ReconcileOutcome, ReconcileError>) -> Self {
        let (state, description) = match result {
            Ok(outcome) if outcome.is_noop() => (
                CallbackState::Success,
                format!("No running containers use {}", outcome.image_reference),
            ),
            Ok(outcome) if outcome.is_success() => (
                CallbackState::Success,
                format!(
                    "Restarted {} containers on {}",
                    outcome.restarted_ids.len(),
                    outcome.image_reference
                ),
            ),
            Ok(outcome) => (
                CallbackState::Failure,
                format!(
                    "Restarted {} of {} containers on {}{}",
                    outcome.restarted_ids.len(),
                    outcome.matched_count,
                    outcome.image_reference,
                    match outcome.pull_error {
                        Some(_) => ", image pull failed",
                        None => "",
                    }
                ),
            ),
            Err(e) => (CallbackState::Error, e.to_string()),
        };

        CallbackPayload {
            state,
            description,
            context: CALLBACK_CONTEXT.to_string(),
            target_url: None,
        }
    }
}

/// Posts reconciliation results to the `callback_url` of a webhook.
///
/// The URL comes from an unauthenticated request body, so only `https` URLs on the
/// configured hosts are contacted, and every request is bounded by a timeout.
#[derive(Clone)]
pub struct CallbackClient {
    http: Client,
    allowed_hosts: Vec<String>,
}

impl CallbackClient {
    pub fn new(allowed_hosts: Vec<String>) -> Result<Self> {
        Self::with_timeouts(allowed_hosts, CALLBACK_TIMEOUT, CALLBACK_CONNECT_TIMEOUT)
    }

    fn with_timeouts(
        allowed_hosts: Vec<String>,
        timeout: Duration,
        connect_timeout: Duration,
    ) -> Result<Self> {
        info!(
            "Initializing registry callback HTTP client for hosts {}",
            allowed_hosts.join(", ")
        );
        let http = Client::builder()
            .timeout(timeout)
            .connect_timeout(connect_timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            http,
            allowed_hosts,
        })
    }

    pub fn validate_url(&self, callback_url: &str) -> Result<Url> {
        let url = Url::parse(callback_url)
            .with_context(|| format!("Invalid callback URL {}", callback_url))?;
        if url.scheme() != "https" {
            bail!("Refusing callback URL {} without https scheme", callback_url);
        }
        match url.host_str() {
            Some(host) if self.allowed_hosts.iter().any(|allowed| allowed == host) => Ok(url),
            _ => bail!(
                "Refusing callback URL {}, host is not in the allowed callback hosts",
                callback_url
            ),
        }
    }

    pub async fn report(&self, callback_url: &str, payload: &CallbackPayload) -> Result<()> {
        let url = self.validate_url(callback_url)?;
        self.send(url, payload).await
    }

    async fn send(&self, url: Url, payload: &CallbackPayload) -> Result<()> {
        debug!("Sending callback {:?} to {}", payload, url);
        let response = self
            .http
            .post(url.clone())
            .json(payload)
            .send()
            .await
            .context("Failed to send registry callback")?;

        if !response.status().is_success() {
            bail!(
                "Registry callback {} returned error status {}",
                url,
                response.status()
            );
        }
        Ok(())
    }
}
