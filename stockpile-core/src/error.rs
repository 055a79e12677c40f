use thiserror::Error;

pub type Result<T> = std::result::Result<T, CoreError>;

/// Error surface of the core crate. Variants map one-to-one onto the HTTP
/// statuses the server layer emits.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    /// Upstream failure on a proxy path (anything but a clean 404).
    #[error("upstream error: {0}")]
    BadGateway(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("{0}")]
    PayloadTooLarge(String),

    #[error("{0}")]
    RangeNotSatisfiable(String),

    #[error("insufficient storage: {0}")]
    InsufficientStorage(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Internal(String),
}

impl CoreError {
    pub fn internal(message: impl Into<String>) -> Self {
        CoreError::Internal(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        CoreError::NotFound(message.into())
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        CoreError::BadRequest(message.into())
    }

    pub fn bad_gateway(message: impl Into<String>) -> Self {
        CoreError::BadGateway(message.into())
    }

    /// Whether this error came out of a filesystem-full condition.
    pub fn is_storage_full(&self) -> bool {
        matches!(self, CoreError::Io(err) if err.raw_os_error() == Some(libc_enospc()))
            || matches!(self, CoreError::InsufficientStorage(_))
    }
}

impl From<stockpile_model::error::ParseEnumError> for CoreError {
    fn from(err: stockpile_model::error::ParseEnumError) -> Self {
        CoreError::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::Internal(format!("json error: {err}"))
    }
}

const fn libc_enospc() -> i32 {
    // ENOSPC is 28 on every platform this server targets.
    28
}
