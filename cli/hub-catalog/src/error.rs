//! Error handling for hub API operations.

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Body of a non-success response, when the API sends one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiErrorResponse {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

/// Common error type for hub API operations.
#[derive(Debug, Error)]
pub enum HubClientError {
    /// The client could not be built from its configuration.
    #[error("invalid hub client configuration: {0}")]
    Configuration(String),

    /// An argument was rejected before any request was sent.
    #[error("{0}")]
    Validation(String),

    /// The request never produced a response (DNS, connect, timeout, or a
    /// success body that could not be read).
    #[error("failed to reach the hub API")]
    Request(#[source] reqwest::Error),

    /// The API answered with a non-success status.
    ///
    /// `status_text` is the canonical reason phrase of `status`. A custom
    /// phrase sent by the server is not preserved.
    #[error("{}", fmt_response_error(*.status, .status_text, .payload.as_ref()))]
    Response {
        status: StatusCode,
        status_text: String,
        payload: Option<ApiErrorResponse>,
    },

    /// A body announced as JSON did not match the expected shape.
    ///
    /// The transport absorbs this into an empty success body.
    #[error("could not decode response body from '{path}'")]
    Decode {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Discriminant of [HubClientError], for consumers that only branch on the class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Configuration,
    Validation,
    Request,
    Response,
    Decode,
}

impl HubClientError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            HubClientError::Configuration(_) => ErrorKind::Configuration,
            HubClientError::Validation(_) => ErrorKind::Validation,
            HubClientError::Request(_) => ErrorKind::Request,
            HubClientError::Response { .. } => ErrorKind::Response,
            HubClientError::Decode { .. } => ErrorKind::Decode,
        }
    }

    /// Whether trying the same call again could succeed.
    ///
    /// Configuration and validation errors are caller bugs and never retryable.
    pub fn is_retryable(&self) -> bool {
        !matches!(self.kind(), ErrorKind::Configuration | ErrorKind::Validation)
    }

    /// A 404 response, which consumers render as "not found".
    pub fn is_not_found(&self) -> bool {
        self.status() == Some(StatusCode::NOT_FOUND)
    }

    /// Transport-level failures are the only ones retried automatically.
    pub(crate) fn is_transport(&self) -> bool {
        matches!(self, HubClientError::Request(_))
    }

    pub fn status(&self) -> Option<StatusCode> {
        match self {
            HubClientError::Response { status, .. } => Some(*status),
            HubClientError::Request(err) => err.status(),
            _ => None,
        }
    }

    pub fn payload(&self) -> Option<&ApiErrorResponse> {
        match self {
            HubClientError::Response { payload, .. } => payload.as_ref(),
            _ => None,
        }
    }
}

fn fmt_response_error(
    status: StatusCode,
    status_text: &str,
    payload: Option<&ApiErrorResponse>,
) -> String {
    let code = status.as_u16();
    match payload {
        Some(ApiErrorResponse {
            error,
            detail: Some(detail),
            ..
        }) => format!("{code}: {error} ({detail})"),
        Some(ApiErrorResponse { error, .. }) => format!("{code}: {error}"),
        None if !status_text.is_empty() => format!("{code}: {status_text}"),
        None => format!("request failed with status {code}"),
    }
}
