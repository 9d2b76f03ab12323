use serde::{Deserialize, Serialize};

/// The human-readable parts of a failed response body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ErrorBody {
    pub fn new(error: Option<String>, message: Option<String>) -> Self {
        Self { error, message }
    }

    /// `error` if present, otherwise `message`. Blank strings count as absent.
    pub fn detail(&self) -> Option<&str> {
        non_blank(self.error.as_deref()).or_else(|| non_blank(self.message.as_deref()))
    }

    pub fn detail_or(&self, fallback: &str) -> String {
        self.detail().unwrap_or(fallback).to_string()
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}
