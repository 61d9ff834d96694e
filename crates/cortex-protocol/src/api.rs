//! Request and response bodies for the relay's HTTP API.

use serde::{Deserialize, Serialize};

/// Body of `POST /api/chat` and `POST /api/chat/stream`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    #[serde(default)]
    pub thread_id: String,
    #[serde(default)]
    pub message: String,
}

/// Body of `POST /api/chat/regenerate` and its streaming variant.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegenerateRequest {
    #[serde(default)]
    pub thread_id: String,
}

/// Body of `PATCH /api/thread/{id}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RenameRequest {
    #[serde(default)]
    pub title: String,
}

/// Result of a non-streaming turn or regeneration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyResponse {
    pub reply: String,
}

/// Result of `DELETE /api/thread/{id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteResponse {
    pub success: String,
}

/// Error payload returned with every non-2xx status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

/// Result of `GET /api/health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}
