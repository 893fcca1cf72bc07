use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use utoipa::ToSchema;

use domain::alert::error::AlertError;
use domain::engine::error::EngineError;
use domain::rule::error::RuleError;

#[derive(Serialize, ToSchema)]
pub struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize, ToSchema)]
pub struct ErrorDetail {
    /// Machine-readable error code (e.g. `RULE_NOT_FOUND`).
    #[schema(value_type = String)]
    code: &'static str,
    /// Human-readable description of the error.
    message: String,
}

/// Standard API error type.
///
/// All variants produce a JSON response of the shape
/// `{"error":{"code":"SCREAMING_SNAKE","message":"human-readable"}}`.
#[derive(Debug)]
pub enum ApiError {
    BadRequest { code: &'static str, message: String },
    NotFound { code: &'static str, message: String },
    Conflict { code: &'static str, message: String },
    Internal { message: String },
    ServiceUnavailable { message: String },
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            Self::BadRequest { code, message } => (StatusCode::BAD_REQUEST, code, message),
            Self::NotFound { code, message } => (StatusCode::NOT_FOUND, code, message),
            Self::Conflict { code, message } => (StatusCode::CONFLICT, code, message),
            Self::Internal { message } => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", message)
            }
            Self::ServiceUnavailable { message } => (
                StatusCode::SERVICE_UNAVAILABLE,
                "SERVICE_UNAVAILABLE",
                message,
            ),
        };

        (
            status,
            Json(ErrorBody {
                error: ErrorDetail { code, message },
            }),
        )
            .into_response()
    }
}

fn from_engine(err: EngineError) -> ApiError {
    match err {
        EngineError::NotFound(_) => ApiError::NotFound {
            code: "NOT_FOUND",
            message: err.to_string(),
        },
        EngineError::AlreadyExists(_) => ApiError::Conflict {
            code: "ALREADY_EXISTS",
            message: err.to_string(),
        },
        EngineError::Transient(_)
        | EngineError::BadSql(_)
        | EngineError::Unavailable(_)
        | EngineError::Cancelled => ApiError::Internal {
            message: err.to_string(),
        },
    }
}

impl From<RuleError> for ApiError {
    fn from(err: RuleError) -> Self {
        match err {
            RuleError::NotFound(_) => Self::NotFound {
                code: "RULE_NOT_FOUND",
                message: err.to_string(),
            },
            RuleError::InvalidRule(_) => Self::BadRequest {
                code: "INVALID_RULE",
                message: err.to_string(),
            },
            RuleError::InvalidState { .. } => Self::BadRequest {
                code: "INVALID_RULE_STATE",
                message: err.to_string(),
            },
            RuleError::Compile(_) | RuleError::Catalog(_) => Self::Internal {
                message: err.to_string(),
            },
            RuleError::Engine(e) => from_engine(e),
        }
    }
}

impl From<AlertError> for ApiError {
    fn from(err: AlertError) -> Self {
        match err {
            AlertError::NotFound(_) => Self::NotFound {
                code: "ALERT_NOT_FOUND",
                message: err.to_string(),
            },
            AlertError::InvalidId(_) => Self::BadRequest {
                code: "INVALID_ALERT_ID",
                message: err.to_string(),
            },
            AlertError::NoActiveAlert { .. } => Self::NotFound {
                code: "NO_ACTIVE_ALERT",
                message: err.to_string(),
            },
            AlertError::Engine(e) => from_engine(e),
        }
    }
}
