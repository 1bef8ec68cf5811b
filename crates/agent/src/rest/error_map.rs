//! Shared agent error → HTTP status mapping.
//!
//! Single source of truth for converting [`AgentError`] into REST
//! responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::error::AgentError;

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

/// Wrapper giving `AgentError` an `IntoResponse` impl.
pub struct ApiError(pub AgentError);

impl From<AgentError> for ApiError {
    fn from(err: AgentError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            AgentError::Validation(_) => StatusCode::BAD_REQUEST,
            AgentError::NotFound(_) | AgentError::NotFoundStored(_) => StatusCode::NOT_FOUND,
            AgentError::Conflict(_) => StatusCode::CONFLICT,
            AgentError::Permission => StatusCode::FORBIDDEN,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(ErrorBody {
            error: self.0.to_string(),
        });
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_of(err: AgentError) -> StatusCode {
        ApiError(err).into_response().status()
    }

    #[test]
    fn kinds_map_to_expected_codes() {
        assert_eq!(
            status_of(AgentError::Validation("x".to_string())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(AgentError::NotFound("x".to_string())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(AgentError::NotFoundStored("x".to_string())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(AgentError::Conflict("x".to_string())),
            StatusCode::CONFLICT
        );
        assert_eq!(status_of(AgentError::Permission), StatusCode::FORBIDDEN);
        assert_eq!(
            status_of(AgentError::Transient("x".to_string())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
