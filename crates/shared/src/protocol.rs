use serde::{Deserialize, Serialize};

use crate::{
    domain::{Team, TeamId},
    error::ErrorBody,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscribeRequest {
    pub email: String,
}

/// Standard response wrapper used by the user endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiEnvelope<T> {
    #[serde(default)]
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default = "Option::default", skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiEnvelope<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            message: None,
            data: Some(data),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            message: None,
            data: None,
            error: Some(error.into()),
        }
    }

    pub fn error_body(&self) -> ErrorBody {
        ErrorBody::new(self.error.clone(), self.message.clone())
    }

    pub fn failure_message(&self, fallback: &str) -> String {
        self.error_body().detail_or(fallback)
    }
}

/// Acknowledgement envelope for calls whose payload is irrelevant.
pub type Ack = ApiEnvelope<serde_json::Value>;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TeamsResponse {
    #[serde(default)]
    pub data: Option<Vec<Team>>,
}

/// Body of the team update call: the complete desired set, not a delta.
pub type UpdateTeamsRequest = Vec<TeamId>;
