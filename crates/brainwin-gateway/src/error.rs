use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use brainwin::BrainwinError;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("validation failed: {0}")]
    Validation(String),

    /// Uniqueness violation (email, national id, plan)
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Webhook signature verification failed
    #[error("invalid webhook signature: {0}")]
    Signature(String),

    /// External collaborator failed or timed out
    #[error("upstream failure: {0}")]
    Upstream(String),

    #[error("database error: {0}")]
    Database(rusqlite::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<rusqlite::Error> for GatewayError {
    fn from(e: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(ref err, ref msg) = e {
            // SQLITE_CONSTRAINT_UNIQUE
            if err.extended_code == 2067 {
                let msg = msg.as_deref().unwrap_or_default();
                let what = if msg.contains("national_id") {
                    "national id already registered"
                } else if msg.contains("email") {
                    "email already registered"
                } else {
                    "record already exists"
                };
                return GatewayError::Conflict(what.to_string());
            }
        }
        GatewayError::Database(e)
    }
}

impl From<BrainwinError> for GatewayError {
    fn from(e: BrainwinError) -> Self {
        match e {
            BrainwinError::Validation(m) => GatewayError::Validation(m),
            BrainwinError::Conflict(m) | BrainwinError::AlreadyApplied(m) => {
                GatewayError::Conflict(m)
            }
            BrainwinError::InvalidToken => {
                GatewayError::Unauthorized("invalid or expired token".to_string())
            }
            BrainwinError::Signature(m) => GatewayError::Signature(m),
            BrainwinError::NotFound(m) => GatewayError::NotFound(m),
            BrainwinError::Upstream(m) => GatewayError::Upstream(m),
            BrainwinError::Config(m) | BrainwinError::Storage(m) => GatewayError::Internal(m),
        }
    }
}

impl GatewayError {
    fn code(&self) -> &'static str {
        match self {
            GatewayError::Validation(_) => "validation_error",
            GatewayError::Conflict(_) => "conflict",
            GatewayError::Unauthorized(_) => "unauthorized",
            GatewayError::Forbidden(_) => "forbidden",
            GatewayError::NotFound(_) => "not_found",
            GatewayError::Signature(_) => "invalid_signature",
            GatewayError::Upstream(_) => "upstream_error",
            GatewayError::Database(_) | GatewayError::Internal(_) => "internal_error",
        }
    }
}

impl ResponseError for GatewayError {
    fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::Validation(_) | GatewayError::Signature(_) => StatusCode::BAD_REQUEST,
            GatewayError::Conflict(_) => StatusCode::CONFLICT,
            GatewayError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            GatewayError::Forbidden(_) => StatusCode::FORBIDDEN,
            GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::Upstream(_) => StatusCode::BAD_GATEWAY,
            GatewayError::Database(_) | GatewayError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        let message = match self {
            GatewayError::Validation(m)
            | GatewayError::Conflict(m)
            | GatewayError::Unauthorized(m)
            | GatewayError::Forbidden(m)
            | GatewayError::NotFound(m) => m.clone(),
            GatewayError::Signature(m) => {
                tracing::warn!("Webhook signature rejected: {}", m);
                "Invalid signature".to_string()
            }
            GatewayError::Upstream(m) => {
                tracing::error!("Upstream error: {}", m);
                "Failed to reach upstream service".to_string()
            }
            GatewayError::Database(e) => {
                tracing::error!("Database error: {}", e);
                "An internal error occurred".to_string()
            }
            GatewayError::Internal(m) => {
                tracing::error!("Internal error: {}", m);
                "An internal error occurred".to_string()
            }
        };
        HttpResponse::build(self.status_code()).json(serde_json::json!({
            "error": self.code(),
            "message": message,
        }))
    }
}
