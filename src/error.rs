use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use std::fmt;
use thiserror::Error;

/// Failures raised by an inventory store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("timed out waiting for an inventory lock")]
    LockTimeout,

    #[error("audit trail rejected the write: {0}")]
    Audit(String),
}

impl StoreError {
    /// Maps postgres `lock_not_available` onto [`StoreError::LockTimeout`].
    pub fn from_sqlx(err: sqlx::Error) -> Self {
        let lock_not_available = err
            .as_database_error()
            .and_then(|db| db.code())
            .map_or(false, |code| code == "55P03");
        if lock_not_available {
            StoreError::LockTimeout
        } else {
            StoreError::Database(err)
        }
    }
}

/// Failures loading the JSON inventory seed.
#[derive(Debug, Error)]
pub enum SeedError {
    #[error("cannot read seed file: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid seed file: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Vehicle,
    FuelCard,
    Password,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Resource::Vehicle => "vehicle",
            Resource::FuelCard => "fuel_card",
            Resource::Password => "password",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("no resource selected")]
    NoResourceSelected,

    #[error("balance required")]
    BalanceRequired,

    #[error("invalid balance")]
    InvalidBalance,

    #[error("paired return required")]
    PairedReturnRequired,

    #[error("password required")]
    PasswordRequired,
}

/// Outcome categories of a checkout or return.
#[derive(Debug, Error)]
pub enum LockError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("{0} not found")]
    NotFound(Resource),

    #[error("internal error: {0}")]
    Internal(#[from] StoreError),
}

/// Errors surfaced at the HTTP boundary.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Lock(#[from] LockError),

    #[error("authentication required")]
    Unauthorized,

    #[error("{0}")]
    Forbidden(&'static str),

    /// Body or query string that could not be decoded.
    #[error("malformed request: {0}")]
    Malformed(String),
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError::Lock(LockError::Internal(err))
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        ApiError::Lock(LockError::Validation(err))
    }
}

impl ApiError {
    fn category(&self) -> &'static str {
        match self {
            ApiError::Lock(LockError::Validation(_)) => "validation_error",
            ApiError::Lock(LockError::NotFound(_)) => "not_found",
            ApiError::Lock(LockError::Internal(_)) => "internal_error",
            ApiError::Unauthorized => "unauthorized",
            ApiError::Forbidden(_) => "forbidden",
            ApiError::Malformed(_) => "validation_error",
        }
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Lock(LockError::Validation(_)) => StatusCode::BAD_REQUEST,
            ApiError::Lock(LockError::NotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Lock(LockError::Internal(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::Malformed(_) => StatusCode::BAD_REQUEST,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let message = match self {
            ApiError::Lock(LockError::Internal(err)) => {
                log::error!("🔥 Request failed: {}", err);
                "Internal Server Error".to_string()
            }
            other => other.to_string(),
        };
        HttpResponse::build(self.status_code()).json(serde_json::json!({
            "error": self.category(),
            "message": message,
        }))
    }
}
