use std::{error::Error as StdError, fmt};

use backtrace::Backtrace;
use http::StatusCode;
use thiserror::Error;

pub trait ErrorCode: StdError + 'static {
    fn code(&self) -> (StatusCode, &'static str);
}

#[derive(Error, Debug)]
pub enum Code {
    #[error(transparent)]
    Any(#[from] anyhow::Error),
    #[error("Not found. {0}")]
    NotFound(String),
    /// Key material could not be produced, or the configuration is unusable.
    #[error("Configuration error. {0}")]
    Configuration(String),
    /// The current-key lookup found nothing. Unreachable after a successful
    /// init, so this always points at a defect.
    #[error("No active signing key")]
    NoActiveSigningKey,
    #[error("Malformed token. {0}")]
    MalformedToken(String),
    #[error("Signing key not found or expired")]
    UnknownOrExpiredKey,
    #[error("Invalid token signature")]
    InvalidSignature,
    #[error("Token has expired")]
    TokenExpired,
    /// The payload cannot be signed: not a JSON object, or it carries a
    /// claim the store sets itself.
    #[error("Invalid token payload. {0}")]
    InvalidPayload(String),
}

impl ErrorCode for Code {
    fn code(&self) -> (StatusCode, &'static str) {
        match self {
            Self::Any(_) => (StatusCode::INTERNAL_SERVER_ERROR, "1010001"),
            Self::NotFound(_) => (StatusCode::NOT_FOUND, "1010002"),
            Self::Configuration(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "1010003")
            }
            Self::NoActiveSigningKey => {
                (StatusCode::SERVICE_UNAVAILABLE, "1010004")
            }
            Self::MalformedToken(_) => (StatusCode::UNAUTHORIZED, "1010005"),
            Self::UnknownOrExpiredKey => (StatusCode::UNAUTHORIZED, "1010006"),
            Self::InvalidSignature => (StatusCode::UNAUTHORIZED, "1010007"),
            Self::TokenExpired => (StatusCode::UNAUTHORIZED, "1010008"),
            Self::InvalidPayload(_) => (StatusCode::BAD_REQUEST, "1010009"),
        }
    }
}

pub struct WithBacktrace {
    source: Code,
    backtrace: Backtrace,
}

impl WithBacktrace {
    pub fn kind(&self) -> &Code {
        &self.source
    }
}

impl fmt::Debug for WithBacktrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WithBacktrace")
            .field("source", &self.source)
            .field("backtrace", &self.backtrace)
            .finish()
    }
}

impl fmt::Display for WithBacktrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source)
    }
}

impl StdError for WithBacktrace {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(&self.source)
    }
}

impl From<Code> for WithBacktrace {
    fn from(code: Code) -> Self {
        WithBacktrace {
            source: code,
            backtrace: Backtrace::new(),
        }
    }
}

impl From<WithBacktrace> for Code {
    fn from(value: WithBacktrace) -> Self {
        value.source
    }
}

impl PartialEq for WithBacktrace {
    fn eq(&self, other: &Self) -> bool {
        let (_, src_code) = self.source.code();
        let (_, dst_code) = other.source.code();
        src_code == dst_code
    }
}

#[inline]
pub fn any<E: StdError>(err: E) -> WithBacktrace {
    Code::Any(anyhow::anyhow!("{}", err.to_string())).into()
}

#[inline]
pub fn anyhow(err: anyhow::Error) -> WithBacktrace {
    Code::Any(err).into()
}

#[inline]
pub fn not_found<S: ToString + ?Sized>(err: &S) -> WithBacktrace {
    Code::NotFound(err.to_string()).into()
}

#[inline]
pub fn configuration<S: ToString + ?Sized>(err: &S) -> WithBacktrace {
    Code::Configuration(err.to_string()).into()
}

#[inline]
pub fn no_active_signing_key() -> WithBacktrace {
    Code::NoActiveSigningKey.into()
}

#[inline]
pub fn malformed_token<S: ToString + ?Sized>(err: &S) -> WithBacktrace {
    Code::MalformedToken(err.to_string()).into()
}

#[inline]
pub fn unknown_or_expired_key() -> WithBacktrace {
    Code::UnknownOrExpiredKey.into()
}

#[inline]
pub fn invalid_signature() -> WithBacktrace {
    Code::InvalidSignature.into()
}

#[inline]
pub fn token_expired() -> WithBacktrace {
    Code::TokenExpired.into()
}

#[inline]
pub fn invalid_payload<S: ToString + ?Sized>(err: &S) -> WithBacktrace {
    Code::InvalidPayload(err.to_string()).into()
}

#[cfg(feature = "axum-resp")]
mod axum {
    use axum::response::IntoResponse;
    use serde_json::json;

    use super::ErrorCode;

    impl IntoResponse for super::WithBacktrace {
        fn into_response(self) -> axum::response::Response {
            tracing::error!("{:?}", self);

            let (status_code, code) = self.source.code();

            let payload = json!({
                "code": code,
                "message": self.to_string(),
            });

            (status_code, axum::Json(payload)).into_response()
        }
    }
}
