use std::io;

use thiserror::Error;

/// Failure of a single LDP request.
///
/// Every variant carries the human readable message that ends up in the
/// response body.
#[derive(Debug, Error)]
pub enum LdpError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Unauthenticated(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    MethodNotAllowed(String),
    #[error("{0}")]
    NotAcceptable(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    UnsupportedMediaType(String),
    #[error("{0}")]
    Internal(String),
    #[error("{0}")]
    Locked(String),
}

impl LdpError {
    pub fn status(&self) -> u16 {
        match self {
            LdpError::BadRequest(_) => 400,
            LdpError::Unauthenticated(_) => 401,
            LdpError::Forbidden(_) => 403,
            LdpError::NotFound(_) => 404,
            LdpError::MethodNotAllowed(_) => 405,
            LdpError::NotAcceptable(_) => 406,
            LdpError::Conflict(_) => 409,
            LdpError::UnsupportedMediaType(_) => 415,
            LdpError::Internal(_) => 500,
            LdpError::Locked(_) => 503,
        }
    }

    pub fn internal(context: &str, e: impl std::fmt::Display) -> LdpError {
        LdpError::Internal(format!("{}: {}", context, e))
    }
}

impl From<io::Error> for LdpError {
    fn from(e: io::Error) -> LdpError {
        match e.kind() {
            io::ErrorKind::NotFound => LdpError::NotFound(format!("resource not found: {}", e)),
            _ => LdpError::Internal(format!("storage error: {}", e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use super::LdpError;

    #[test]
    fn test_status_codes() {
        assert_eq!(LdpError::Conflict(String::new()).status(), 409);
        assert_eq!(LdpError::UnsupportedMediaType(String::new()).status(), 415);
        assert_eq!(LdpError::Locked(String::new()).status(), 503);
    }

    #[test]
    fn test_from_io() {
        let e: LdpError = io::Error::new(io::ErrorKind::NotFound, "gone").into();
        assert_eq!(e.status(), 404);
        let e: LdpError = io::Error::new(io::ErrorKind::PermissionDenied, "no").into();
        assert_eq!(e.status(), 500);
    }
}
