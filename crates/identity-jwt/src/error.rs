use courier_identity::IdentityResolverError;
use thiserror::Error;

/// Errors that can occur in this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// The configured secret is not valid base64.
    #[error("invalid secret: {0}")]
    InvalidSecret(#[from] base64::DecodeError),

    /// The token failed signature, expiry or format checks.
    #[error("invalid token: {0}")]
    InvalidToken(#[source] jsonwebtoken::errors::Error),

    /// The token verified but its `jti` claim is not a decimal `u32`.
    /// Negative and out-of-range values land here too.
    #[error("malformed identity claim: {0}")]
    MalformedIdentity(String),

    /// A token could not be signed.
    #[error("failed to sign token: {0}")]
    Sign(#[source] jsonwebtoken::errors::Error),
}

impl IdentityResolverError for Error {}
