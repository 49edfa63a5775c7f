//! Error taxonomy and HTTP mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Errors a request handler can surface to the client.
///
/// Dispatch misses and delete-by-id misses are deliberately not errors:
/// the first is a plain 404 response, the second reports success.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Missing or mismatched bearer token; terminal for the request.
    #[error("Unauthorized")]
    Unauthorized,

    /// Storage I/O failure. The underlying message is surfaced verbatim.
    #[error("{0}")]
    Storage(#[from] anyhow::Error),
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        match self {
            ServerError::Unauthorized => {
                (StatusCode::UNAUTHORIZED, "Unauthorized").into_response()
            }
            ServerError::Storage(err) => {
                tracing::error!(error = %err, "Storage operation failed");
                (StatusCode::INTERNAL_SERVER_ERROR, format!("{err:#}")).into_response()
            }
        }
    }
}
