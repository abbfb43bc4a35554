//! Credential boundary: turns an `Authorization` header into a WebID.
//!
//! Each enabled [Authenticator] handles one scheme. Requests without an
//! `Authorization` header are anonymous; a header nobody can verify is
//! rejected.
use std::error::Error;
use std::fmt;
use std::str::FromStr;

use log::debug;

use crate::error::LdpError;

/// Testing scheme, `Authorization: Mock <webid>`.
pub mod mock;

/// Parsed `Authorization` header.
pub struct AuthSpec {
    pub method: String,
    pub credentials: String,
}

#[derive(Debug)]
pub struct AuthSpecError;

impl Error for AuthSpecError {
    fn description(&self) -> &str {
        "auth string malformed"
    }
}

impl fmt::Display for AuthSpecError {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.write_str("auth string malformed")
    }
}

#[derive(Debug)]
pub struct AuthError;

impl Error for AuthError {
    fn description(&self) -> &str {
        "auth failed"
    }
}

impl fmt::Display for AuthError {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.write_str("auth failed")
    }
}

/// Outcome of a successful verification.
pub struct AuthResult {
    pub identity: String,
}

impl FromStr for AuthSpec {
    type Err = AuthSpecError;

    fn from_str(s: &str) -> Result<AuthSpec, AuthSpecError> {
        let mut auth_fields = s.trim().splitn(2, ' ');
        let method = match auth_fields.next() {
            Some(v) if !v.is_empty() => v.to_lowercase(),
            _ => {
                return Err(AuthSpecError {});
            },
        };
        let credentials = match auth_fields.next() {
            Some(v) if !v.trim().is_empty() => v.trim().to_string(),
            _ => {
                return Err(AuthSpecError {});
            },
        };
        Ok(AuthSpec {
            method,
            credentials,
        })
    }
}

impl fmt::Debug for AuthSpec {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "{} credentials ({} bytes)", self.method, self.credentials.len())
    }
}

pub trait Authenticator: Send + Sync {
    /// Lowercase scheme name this authenticator handles.
    fn scheme(&self) -> &str;

    fn verify(&self, auth: &AuthSpec) -> Result<AuthResult, AuthError>;
}

/// Resolves the agent of a request.
///
/// `force_user` overrides any credentials. Returns `None` for anonymous requests.
pub fn authenticate(authenticators: &[Box<dyn Authenticator>], header: Option<&str>, force_user: Option<&str>) -> Result<Option<String>, LdpError> {
    if let Some(v) = force_user {
        return Ok(Some(v.to_string()));
    }
    let header = match header {
        Some(v) => v,
        None => {
            return Ok(None);
        },
    };
    let spec = match AuthSpec::from_str(header) {
        Ok(v) => v,
        Err(e) => {
            return Err(LdpError::Unauthenticated(format!("{}", e)));
        },
    };
    let authenticator = match authenticators.iter().find(|a| a.scheme() == spec.method) {
        Some(v) => v,
        None => {
            return Err(LdpError::Unauthenticated(format!("unsupported auth scheme {}", spec.method)));
        },
    };
    match authenticator.verify(&spec) {
        Ok(v) => {
            debug!("authenticated {} with {:?}", v.identity, spec);
            Ok(Some(v.identity))
        },
        Err(e) => Err(LdpError::Unauthenticated(format!("{}", e))),
    }
}
