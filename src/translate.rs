//! DELETE response translation
//!
//! Kubernetes clients expect a `Status` object back from a DELETE, while the
//! Cloud Run API answers with either the deleted resource or its own error
//! envelope. Responses are rewritten into the `Status` shape here; the status
//! code and headers are left to the forwarder.

use bytes::Bytes;
use hyper::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Prefix used when the backend error body could not be understood
pub const RAW_MESSAGE_PREFIX: &str = "original response from Cloud Run API: ";

/// Kubernetes `Status` object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusEnvelope {
    pub api_version: String,
    pub kind: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Error envelope returned by the backend, `{"error":{"message":..,"status":..}}`
///
/// Missing, `null` and empty fields all count as absent.
#[derive(Debug, Default, Deserialize)]
struct BackendError {
    #[serde(default)]
    error: Option<BackendErrorDetail>,
}

#[derive(Debug, Default, Deserialize)]
struct BackendErrorDetail {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

impl StatusEnvelope {
    pub fn success() -> Self {
        Self {
            api_version: "v1".to_string(),
            kind: "Status".to_string(),
            status: "Success".to_string(),
            code: None,
            message: None,
            reason: None,
        }
    }

    pub fn failure(code: u16, message: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            api_version: "v1".to_string(),
            kind: "Status".to_string(),
            status: "Failure".to_string(),
            code: Some(code),
            message: Some(message.into()),
            reason: Some(reason.into()),
        }
    }

    /// Build the failure envelope for a non-200 backend response
    pub fn from_backend_error(status: StatusCode, body: &[u8]) -> Self {
        let detail = serde_json::from_slice::<BackendError>(body)
            .ok()
            .and_then(|parsed| parsed.error)
            .unwrap_or_default();
        let non_empty = |field: Option<String>| field.filter(|s| !s.is_empty());

        let message = non_empty(detail.message).unwrap_or_else(|| {
            format!("{}{}", RAW_MESSAGE_PREFIX, String::from_utf8_lossy(body))
        });

        let reason = match non_empty(detail.status) {
            Some(backend_status) => backend_status,
            None if status == StatusCode::NOT_FOUND => "NotFound".to_string(),
            None => "Unknown".to_string(),
        };

        Self::failure(status.as_u16(), message, reason)
    }

    /// Serialize for the wire; failure envelopes end with a newline
    pub fn to_body(&self) -> serde_json::Result<Bytes> {
        let mut body = serde_json::to_vec(self)?;
        if self.status == "Failure" {
            body.push(b'\n');
        }
        Ok(Bytes::from(body))
    }
}

/// Produce the body a DELETE caller sees in place of the backend's
///
/// A 200 yields the success envelope without touching the backend body. Any
/// other status buffers the backend body and converts it. `None` means the
/// backend body could not be read and nothing should be sent.
pub async fn translate_delete(response: reqwest::Response) -> Option<Bytes> {
    let status = response.status();

    let envelope = if status == StatusCode::OK {
        StatusEnvelope::success()
    } else {
        let body = match response.bytes().await {
            Ok(body) => body,
            Err(e) => {
                warn!("Failed to read backend response body: {}", e);
                return None;
            }
        };
        debug!("Backend error body: {}", String::from_utf8_lossy(&body));
        StatusEnvelope::from_backend_error(status, &body)
    };

    match envelope.to_body() {
        Ok(body) => {
            debug!("Translated DELETE response: {}", String::from_utf8_lossy(&body));
            Some(body)
        }
        Err(e) => {
            warn!("Failed to encode status envelope: {}", e);
            None
        }
    }
}
