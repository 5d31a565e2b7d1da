use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    Unauthorized,
    Forbidden,
    NotFound,
    Validation,
    /// The request never got an HTTP answer.
    Transport,
    Internal,
}

impl ErrorCode {
    /// Maps an HTTP status returned by the review backend. Failure bodies are
    /// plain text, so the status is all there is to go on.
    pub fn from_status(status: u16) -> Self {
        match status {
            401 => Self::Unauthorized,
            403 => Self::Forbidden,
            404 => Self::NotFound,
            400 | 409 | 422 => Self::Validation,
            _ => Self::Internal,
        }
    }
}

#[derive(Debug, Error)]
#[error("{code:?}: {message}")]
pub struct ApiException {
    pub code: ErrorCode,
    pub message: String,
}

impl ApiException {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn from_status(status: u16, body: impl Into<String>) -> Self {
        let body = body.into();
        let message = if body.trim().is_empty() {
            format!("backend returned HTTP {status}")
        } else {
            format!("backend returned HTTP {status}: {}", body.trim())
        };
        Self::new(ErrorCode::from_status(status), message)
    }

    pub fn transport(err: impl std::fmt::Display) -> Self {
        Self::new(ErrorCode::Transport, format!("request failed: {err}"))
    }
}
