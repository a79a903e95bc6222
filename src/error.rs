// Centralized error handling using thiserror, merging what used to be two
// taxonomies (core app errors and plugin-transport errors) into one stable
// set of kinds shared by every subsystem, with a single HTTP mapping.

use axum::extract::{FromRequest, Request};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HostError {
    /// Malformed JSON or version string. Local-only validation failure.
    #[error("parse error: {0}")]
    ParseError(String),

    /// Agent, plugin, or backup absent.
    #[error("not found: {0}")]
    NotFound(String),

    /// Duplicate create, or an enable request that conflicts with existing state.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Version/API compatibility check failed at bind time. The bind is
    /// refused; any existing binding is left untouched.
    #[error("incompatible plugin: {0}")]
    IncompatiblePlugin(String),

    /// Spawn, handshake, or initial RPC call failed. The subprocess, if any,
    /// is killed.
    #[error("plugin startup failed: {0}")]
    PluginStartupFailed(String),

    /// A single tool call timed out. Recovered locally — the engine appends
    /// this as the tool result and continues the loop.
    #[error("tool call timed out: {0}")]
    ToolCallTimeout(String),

    /// Transport-level failure talking to a plugin subprocess for one call.
    #[error("tool call transport error: {0}")]
    ToolCallTransport(String),

    /// The plugin ran the call and reported failure.
    #[error("tool call failed: {0}")]
    ToolCallFailed(String),

    /// The tool-calling loop hit its iteration limit before the model
    /// produced a final answer.
    #[error("tool loop exhausted after {0} iterations")]
    ToolLoopExhausted(usize),

    /// The LLM provider returned an error, or the outgoing request was
    /// malformed.
    #[error("provider error: {0}")]
    ProviderError(String),

    /// Artifact cache checksum mismatch. Never mutates an existing working
    /// binding.
    #[error("checksum mismatch for {0}")]
    ChecksumMismatch(String),

    /// Artifact download failed.
    #[error("download failed: {0}")]
    DownloadFailed(String),

    /// Caller aborted the operation.
    #[error("cancelled")]
    Cancelled,

    /// Filesystem or other IO failure not covered by a more specific kind.
    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON serialization/deserialization failure.
    #[error("json error: {0}")]
    SerdeError(#[from] serde_json::Error),

    /// HTTP client failure talking to an external LLM provider or a plugin
    /// download URL.
    #[error("http request error: {0}")]
    ReqwestError(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, HostError>;

impl From<anyhow::Error> for HostError {
    fn from(err: anyhow::Error) -> Self {
        HostError::ProviderError(err.to_string())
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    message: String,
}

impl HostError {
    /// Stable machine-readable tag, independent of the Display message.
    pub fn kind(&self) -> &'static str {
        match self {
            HostError::ParseError(_) => "ParseError",
            HostError::NotFound(_) => "NotFound",
            HostError::Conflict(_) => "Conflict",
            HostError::IncompatiblePlugin(_) => "IncompatiblePlugin",
            HostError::PluginStartupFailed(_) => "PluginStartupFailed",
            HostError::ToolCallTimeout(_) => "ToolCallTimeout",
            HostError::ToolCallTransport(_) => "ToolCallTransport",
            HostError::ToolCallFailed(_) => "ToolCallFailed",
            HostError::ToolLoopExhausted(_) => "ToolLoopExhausted",
            HostError::ProviderError(_) => "ProviderError",
            HostError::ChecksumMismatch(_) => "ChecksumMismatch",
            HostError::DownloadFailed(_) => "DownloadFailed",
            HostError::Cancelled => "Cancelled",
            HostError::IoError(_) => "IOError",
            HostError::SerdeError(_) => "ParseError",
            HostError::ReqwestError(_) => "ProviderError",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            HostError::ParseError(_) => StatusCode::BAD_REQUEST,
            HostError::NotFound(_) => StatusCode::NOT_FOUND,
            HostError::Conflict(_) => StatusCode::CONFLICT,
            HostError::IncompatiblePlugin(_) => StatusCode::BAD_REQUEST,
            HostError::PluginStartupFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
            HostError::ToolCallTimeout(_)
            | HostError::ToolCallTransport(_)
            | HostError::ToolCallFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
            HostError::ToolLoopExhausted(_) => StatusCode::OK,
            HostError::ProviderError(_) => StatusCode::BAD_GATEWAY,
            HostError::ChecksumMismatch(_) | HostError::DownloadFailed(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            // 499 is nonstandard; axum's StatusCode doesn't expose it, so we
            // use the closest formally defined status for a client-aborted op.
            HostError::Cancelled => StatusCode::from_u16(499).unwrap_or(StatusCode::BAD_REQUEST),
            HostError::IoError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            HostError::SerdeError(_) => StatusCode::BAD_REQUEST,
            HostError::ReqwestError(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for HostError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ErrorBody {
            error: self.kind().to_string(),
            message: self.to_string(),
        };
        (status, axum::Json(body)).into_response()
    }
}

/// Drop-in replacement for `axum::Json` as a request extractor. Axum's own
/// `Json` rejects malformed or `deny_unknown_fields`-violating bodies with
/// 422, but spec §7 documents 400 for every client-input error; this remaps
/// the rejection through `HostError::ParseError` so request bodies get the
/// same status malformed query params and path segments already get.
pub struct ApiJson<T>(pub T);

impl<T, S> FromRequest<S> for ApiJson<T>
where
    T: serde::de::DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = HostError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match axum::Json::<T>::from_request(req, state).await {
            Ok(axum::Json(value)) => Ok(ApiJson(value)),
            Err(rejection) => Err(HostError::ParseError(rejection.body_text())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = HostError::NotFound("agent researcher".to_string());
        assert_eq!(err.to_string(), "not found: agent researcher");
    }

    #[test]
    fn io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let host_err: HostError = io_err.into();
        assert_eq!(host_err.kind(), "IOError");
    }

    #[test]
    fn status_mapping() {
        assert_eq!(HostError::NotFound("x".into()).status(), StatusCode::NOT_FOUND);
        assert_eq!(HostError::Conflict("x".into()).status(), StatusCode::CONFLICT);
        assert_eq!(HostError::ToolLoopExhausted(8).status(), StatusCode::OK);
        assert_eq!(HostError::ProviderError("x".into()).status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn kind_is_stable_regardless_of_message() {
        let a = HostError::ToolCallFailed("boom".into());
        let b = HostError::ToolCallFailed("different message".into());
        assert_eq!(a.kind(), b.kind());
    }
}
