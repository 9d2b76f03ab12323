use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use shared::{
    domain::{TeamId, User},
    error::ErrorBody,
    protocol::{Ack, ApiEnvelope, SubscribeRequest, TeamsResponse},
};
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

mod subscription_flow;
pub use subscription_flow::{
    CancelHandle, FlowError, FlowEvent, FlowState, FlowStep, SubscriptionFlow,
    SAVE_TEAMS_FALLBACK, SUBSCRIBE_FALLBACK, TEAMS_LOAD_FAILED,
};

#[derive(Debug, Error)]
pub enum ApiCallError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("server responded with status {status}")]
    Status {
        status: u16,
        body: Option<ErrorBody>,
    },
    #[error("malformed response body: {0}")]
    Decode(String),
    #[error("invalid request url: {0}")]
    InvalidUrl(String),
}

impl ApiCallError {
    /// Human-readable reason carried by the response body, if the server sent one.
    pub fn detail(&self) -> Option<&str> {
        match self {
            Self::Status {
                body: Some(body), ..
            } => body.detail(),
            _ => None,
        }
    }
}

/// The newsletter backend as seen by the subscription flow.
#[async_trait]
pub trait NewsletterApi: Send + Sync {
    async fn subscribe(&self, email: &str) -> Result<Ack, ApiCallError>;
    async fn get_user(&self, email: &str) -> Result<ApiEnvelope<User>, ApiCallError>;
    async fn list_teams(&self) -> Result<TeamsResponse, ApiCallError>;
    /// Replaces the subscriber's whole team set with `team_ids`.
    async fn update_teams(&self, email: &str, team_ids: &[TeamId]) -> Result<Ack, ApiCallError>;
}

pub struct HttpNewsletterApi {
    http: Client,
    base_url: Url,
}

impl HttpNewsletterApi {
    pub fn new(base_url: &str) -> Result<Self, ApiCallError> {
        Self::with_timeout(base_url, None)
    }

    pub fn with_timeout(base_url: &str, timeout: Option<Duration>) -> Result<Self, ApiCallError> {
        let parsed = Url::parse(base_url)
            .map_err(|err| ApiCallError::InvalidUrl(format!("{base_url}: {err}")))?;
        if parsed.cannot_be_a_base() {
            return Err(ApiCallError::InvalidUrl(format!(
                "{base_url}: not usable as a base url"
            )));
        }

        let mut builder = Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }

        Ok(Self {
            http: builder.build()?,
            base_url: parsed,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Appends `segments` to the base path, percent-encoding each one.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, ApiCallError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ApiCallError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, ApiCallError> {
    let status = response.status();
    let bytes = response.bytes().await?;

    if !status.is_success() {
        let body = serde_json::from_slice::<ErrorBody>(&bytes).ok();
        warn!("api: request failed status={}", status.as_u16());
        return Err(ApiCallError::Status {
            status: status.as_u16(),
            body,
        });
    }

    serde_json::from_slice(&bytes).map_err(|err| ApiCallError::Decode(err.to_string()))
}

#[async_trait]
impl NewsletterApi for HttpNewsletterApi {
    async fn subscribe(&self, email: &str) -> Result<Ack, ApiCallError> {
        let url = self.endpoint(&["api", "users", "subscribe"])?;
        debug!(method = "POST", path = url.path(), "api request");
        let response = self
            .http
            .post(url)
            .json(&SubscribeRequest {
                email: email.to_string(),
            })
            .send()
            .await?;
        read_json(response).await
    }

    async fn get_user(&self, email: &str) -> Result<ApiEnvelope<User>, ApiCallError> {
        let url = self.endpoint(&["api", "users", "subscribe", email])?;
        debug!(method = "GET", path = url.path(), "api request");
        let response = self.http.get(url).send().await?;
        read_json(response).await
    }

    async fn list_teams(&self) -> Result<TeamsResponse, ApiCallError> {
        let url = self.endpoint(&["api", "teams"])?;
        debug!(method = "GET", path = url.path(), "api request");
        let response = self.http.get(url).send().await?;
        read_json(response).await
    }

    async fn update_teams(&self, email: &str, team_ids: &[TeamId]) -> Result<Ack, ApiCallError> {
        let url = self.endpoint(&["api", "users", email, "teams"])?;
        debug!(
            method = "PATCH",
            path = url.path(),
            teams = team_ids.len(),
            "api request"
        );
        let response = self.http.patch(url).json(team_ids).send().await?;
        read_json(response).await
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
