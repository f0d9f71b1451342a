use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthErrorKind {
    InvalidInput,
    InvalidCredentials,
    AlreadyRegistered,
    EmailNotConfirmed,
    Network,
    Other,
}

/// Auth failure with a message fit to show the user as-is.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct AuthError {
    pub kind: AuthErrorKind,
    pub message: String,
}

impl AuthError {
    pub fn new(kind: AuthErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }

    pub fn invalid_credentials() -> Self {
        Self::new(AuthErrorKind::InvalidCredentials, "Invalid login credentials")
    }

    pub fn already_registered() -> Self {
        Self::new(AuthErrorKind::AlreadyRegistered, "User already registered")
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(AuthErrorKind::Network, message)
    }
}

impl From<reqwest::Error> for AuthError {
    fn from(err: reqwest::Error) -> Self {
        AuthError::network(format!("Auth request failed: {}", err))
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum UploadError {
    #[error("Object already exists: {0}")]
    AlreadyExists(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl From<reqwest::Error> for UploadError {
    fn from(err: reqwest::Error) -> Self {
        UploadError::Storage(format!("Upload request failed: {}", err))
    }
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Data access error: {0}")]
    DataAccess(String),

    #[error(transparent)]
    Upload(#[from] UploadError),
}

impl From<sqlx::Error> for ClientError {
    fn from(err: sqlx::Error) -> Self {
        ClientError::DataAccess(err.to_string())
    }
}

impl From<crate::database::DatabaseError> for ClientError {
    fn from(err: crate::database::DatabaseError) -> Self {
        match err {
            crate::database::DatabaseError::NotFound(msg) => ClientError::NotFound(msg),
            other => ClientError::DataAccess(other.to_string()),
        }
    }
}
