//! The `mock` auth module is provided to facilitate testing.
//!
//! If active, it will be executed for the `mock` authentication scheme.
//!
//! Under the `mock` scheme, the credentials are the WebID itself.
use url::Url;

use crate::auth::{
    AuthError,
    AuthResult,
    AuthSpec,
    Authenticator,
};

pub struct MockAuthenticator {}

impl Authenticator for MockAuthenticator {
    fn scheme(&self) -> &str {
        "mock"
    }

    /// Accepts any absolute http(s) URL as identity.
    fn verify(&self, auth: &AuthSpec) -> Result<AuthResult, AuthError> {
        if auth.method != "mock" {
            return Err(AuthError {});
        }
        let webid = match Url::parse(&auth.credentials) {
            Ok(v) => v,
            Err(_) => {
                return Err(AuthError {});
            },
        };
        if webid.scheme() != "https" && webid.scheme() != "http" {
            return Err(AuthError {});
        }
        Ok(AuthResult {
            identity: webid.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::MockAuthenticator;
    use crate::auth::{
        AuthSpec,
        Authenticator,
    };

    #[test]
    fn test_mock_auth_check() {
        let a = MockAuthenticator {};
        let auth_spec = AuthSpec::from_str("Mock foo").unwrap();
        match a.verify(&auth_spec) {
            Ok(_) => {
                panic!("expected invalid auth");
            },
            Err(_) => {},
        }

        let auth_spec = AuthSpec::from_str("Basic https://alice.example/profile#me").unwrap();
        assert!(a.verify(&auth_spec).is_err());

        let auth_spec = AuthSpec::from_str("mock https://alice.example/profile#me").unwrap();
        match a.verify(&auth_spec) {
            Ok(v) => {
                assert_eq!(v.identity, "https://alice.example/profile#me");
            },
            Err(e) => {
                panic!("{}", e);
            },
        }
    }
}
