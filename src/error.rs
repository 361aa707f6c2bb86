use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;

/// Error kinds the core raises; `RequestPipeline` maps each to a status code
/// and a `{message}` JSON body. No retries happen inside the core — the
/// store is in-memory and deterministic, so a failed write always leaves it
/// unchanged.
#[derive(Debug, thiserror::Error)]
pub enum DssError {
    #[error("{0}")]
    Unauthenticated(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    VersionConflict(String),

    #[error("{0}")]
    InvalidRequest(String),

    #[error("{0}")]
    ServerMisconfigured(String),
}

impl DssError {
    fn status(&self) -> StatusCode {
        match self {
            DssError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            DssError::Forbidden(_) => StatusCode::FORBIDDEN,
            DssError::NotFound(_) => StatusCode::NOT_FOUND,
            // Treated as 409 per the redesign direction: the original source
            // raised this as a plain ValueError and returned 400, but a
            // stale `old_version` is a conflict, not a malformed request.
            DssError::VersionConflict(_) => StatusCode::CONFLICT,
            DssError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            DssError::ServerMisconfigured(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
}

impl IntoResponse for DssError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "internal_error");
        } else {
            tracing::warn!(error = %self, status = status.as_u16(), "request_rejected");
        }
        (status, Json(ErrorBody { message: self.to_string() })).into_response()
    }
}

pub type DssResult<T> = Result<T, DssError>;
