use service_core::axum::http::StatusCode;
use service_core::error::AppError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Authentication required")]
    AuthenticationRequired,

    /// The CMS refused a bearer or refresh token (401/403).
    #[error("Token rejected by CMS")]
    TokenRejected,

    #[error("Session not found")]
    SessionNotFound,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Validation error: {0}")]
    Validation(String),

    /// Transport failure, timeout or unreadable payload talking to the CMS.
    #[error("CMS unavailable: {0}")]
    CmsUnavailable(String),

    /// Unexpected non-success status from the CMS.
    #[error("CMS returned {status}: {message}")]
    CmsStatus { status: u16, message: String },

    #[error("Session store error: {0}")]
    Store(anyhow::Error),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<GatewayError> for AppError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::InvalidCredentials => {
                AppError::Unauthorized(anyhow::anyhow!("Invalid email or password"))
            }
            GatewayError::AuthenticationRequired | GatewayError::TokenRejected => {
                AppError::Unauthorized(anyhow::anyhow!("Authentication required"))
            }
            GatewayError::SessionNotFound => {
                AppError::NotFound(anyhow::anyhow!("Session not found"))
            }
            GatewayError::Forbidden(msg) => AppError::Forbidden(anyhow::anyhow!(msg)),
            GatewayError::Validation(msg) => AppError::BadRequest(anyhow::anyhow!(msg)),
            GatewayError::CmsUnavailable(msg) => AppError::BadGateway(msg),
            GatewayError::CmsStatus { status, message } => match StatusCode::from_u16(status) {
                Ok(code) if code.is_client_error() || code == StatusCode::INTERNAL_SERVER_ERROR => {
                    AppError::Upstream {
                        status: code,
                        message,
                    }
                }
                _ => AppError::BadGateway(format!("CMS returned {}: {}", status, message)),
            },
            GatewayError::Store(e) => AppError::InternalError(e),
            GatewayError::Internal(e) => AppError::InternalError(e),
        }
    }
}
