use thiserror::Error;

/// Setup-time failures while assembling policies and profiles.
///
/// These are never produced while a request is being served.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("unknown cache profile `{name}`")]
    UnknownProfile { name: String },
    #[error("cache profile `{name}` is registered more than once")]
    DuplicateProfile { name: String },
    #[error("invalid cache policy: {message}")]
    InvalidPolicy { message: String },
}

impl CacheError {
    pub fn unknown_profile(name: impl Into<String>) -> Self {
        Self::UnknownProfile { name: name.into() }
    }

    pub fn invalid_policy(message: impl Into<String>) -> Self {
        Self::InvalidPolicy {
            message: message.into(),
        }
    }
}

/// Failure while deriving a cache key for one request.
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("vary-by-value `{name}` failed: {message}")]
    VaryByValue { name: String, message: String },
}

/// Failure reported by a [`CacheStore`](super::CacheStore) implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cache store unavailable: {0}")]
    Unavailable(String),
    #[error("cache store `{op}` failed: {message}")]
    Operation { op: &'static str, message: String },
}

impl StoreError {
    pub fn operation(op: &'static str, message: impl Into<String>) -> Self {
        Self::Operation {
            op,
            message: message.into(),
        }
    }
}
