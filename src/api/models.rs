use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct RespondRequest {
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RespondResponse {
    pub response: String,
}

/// Body of every failed request.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    /// `invalid_input`, `inference_failure` or `overloaded`.
    pub kind: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub model: String,
    pub device: String,
}
