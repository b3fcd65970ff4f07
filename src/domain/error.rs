use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("domain validation failed: {message}")]
    Validation { message: String },
    #[error("route `{pattern}` is declared by both `{first}` and `{second}`")]
    RouteCollision {
        pattern: String,
        first: String,
        second: String,
    },
}

impl DomainError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn collision(
        pattern: impl Into<String>,
        first: impl Into<String>,
        second: impl Into<String>,
    ) -> Self {
        Self::RouteCollision {
            pattern: pattern.into(),
            first: first.into(),
            second: second.into(),
        }
    }
}
