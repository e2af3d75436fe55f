//! HS256 JSON Web Token implementation of identity resolution.
//!
//! Tokens carry the numeric identity in their `jti` claim and are signed with
//! a shared secret. The same type both issues and verifies tokens, so it can
//! stand in for the external user manager in tests and local setups.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;

pub use error::Error;

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use courier_identity::{Identity, IdentityResolver};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::{Rng, thread_rng};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Options for creating a new `JwtIdentityResolver`.
#[derive(Clone, Debug)]
pub struct JwtIdentityResolverOptions {
    /// Base64-encoded signing secret.
    pub secret: String,

    /// Lifetime of issued tokens. Tokens never expire when `None`.
    pub token_ttl: Option<Duration>,

    /// Clock skew tolerated when checking expiry, in seconds.
    pub leeway: u64,
}

impl JwtIdentityResolverOptions {
    /// Creates options with non-expiring tokens and no leeway.
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            token_ttl: None,
            leeway: 0,
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
struct Claims {
    jti: String,
    iat: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    exp: Option<u64>,
}

/// Resolves identities from HS256-signed tokens.
#[derive(Clone)]
pub struct JwtIdentityResolver {
    decoding_key: DecodingKey,
    encoding_key: EncodingKey,
    token_ttl: Option<Duration>,
    validation: Validation,
}

impl JwtIdentityResolver {
    /// Creates a new resolver from the given options.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSecret`] if the secret is not valid base64.
    pub fn new(
        JwtIdentityResolverOptions {
            secret,
            token_ttl,
            leeway,
        }: JwtIdentityResolverOptions,
    ) -> Result<Self, Error> {
        let secret = STANDARD.decode(secret)?;

        let mut validation = Validation::new(Algorithm::HS256);
        validation.required_spec_claims.clear();
        validation.validate_aud = false;
        validation.leeway = leeway;

        Ok(Self {
            decoding_key: DecodingKey::from_secret(&secret),
            encoding_key: EncodingKey::from_secret(&secret),
            token_ttl,
            validation,
        })
    }

    /// Generates a random secret of `length` bytes, base64-encoded.
    #[must_use]
    pub fn generate_secret(length: usize) -> String {
        let mut bytes = vec![0u8; length];
        thread_rng().fill(&mut bytes[..]);
        STANDARD.encode(bytes)
    }

    /// Issues a signed token for `identity`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Sign`] if the token cannot be encoded.
    pub fn issue(&self, identity: Identity) -> Result<String, Error> {
        let iat = jsonwebtoken::get_current_timestamp();
        let claims = Claims {
            jti: identity.to_string(),
            iat,
            exp: self.token_ttl.map(|ttl| iat + ttl.as_secs()),
        };

        jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(Error::Sign)
    }

    // Identities are unsigned; negative or oversized `jti` values are
    // rejected rather than wrapped.
    fn decode(&self, token: &str) -> Result<Identity, Error> {
        let data = jsonwebtoken::decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map_err(Error::InvalidToken)?;

        data.claims
            .jti
            .parse::<u32>()
            .map(Identity::from)
            .map_err(|_| Error::MalformedIdentity(data.claims.jti))
    }
}

impl std::fmt::Debug for JwtIdentityResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtIdentityResolver")
            .field("token_ttl", &self.token_ttl)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl IdentityResolver for JwtIdentityResolver {
    type Error = Error;

    async fn resolve(&self, credential: &str) -> Result<Identity, Self::Error> {
        let identity = self.decode(credential)?;
        debug!(%identity, "resolved credential");
        Ok(identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use assert_matches::assert_matches;

    fn resolver() -> JwtIdentityResolver {
        JwtIdentityResolver::new(JwtIdentityResolverOptions::new(
            JwtIdentityResolver::generate_secret(64),
        ))
        .unwrap()
    }

    #[tokio::test]
    async fn test_issue_and_resolve() {
        let resolver = resolver();
        let token = resolver.issue(Identity::new(101)).unwrap();

        assert_eq!(resolver.resolve(&token).await.unwrap(), Identity::new(101));
    }

    #[tokio::test]
    async fn test_resolution_is_deterministic() {
        let resolver = resolver();
        let first = resolver.issue(Identity::new(7)).unwrap();
        let second = resolver.issue(Identity::new(7)).unwrap();

        assert_eq!(
            resolver.resolve(&first).await.unwrap(),
            resolver.resolve(&second).await.unwrap()
        );
    }

    #[tokio::test]
    async fn test_rejects_garbage() {
        let resolver = resolver();

        assert_matches!(
            resolver.resolve("not-a-token").await,
            Err(Error::InvalidToken(_))
        );
    }

    #[tokio::test]
    async fn test_rejects_foreign_signature() {
        let issuer = resolver();
        let verifier = resolver();
        let token = issuer.issue(Identity::new(5)).unwrap();

        assert_matches!(verifier.resolve(&token).await, Err(Error::InvalidToken(_)));
    }

    fn signed_with_jti(resolver: &JwtIdentityResolver, jti: &str) -> String {
        let claims = Claims {
            jti: jti.to_string(),
            iat: jsonwebtoken::get_current_timestamp(),
            exp: None,
        };
        jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &resolver.encoding_key,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_rejects_non_numeric_identity() {
        let resolver = resolver();
        let token = signed_with_jti(&resolver, "alice");

        assert_matches!(
            resolver.resolve(&token).await,
            Err(Error::MalformedIdentity(jti)) if jti == "alice"
        );
    }

    #[tokio::test]
    async fn test_rejects_identity_outside_u32() {
        let resolver = resolver();

        for jti in ["-5", "4294967296"] {
            let token = signed_with_jti(&resolver, jti);
            assert_matches!(
                resolver.resolve(&token).await,
                Err(Error::MalformedIdentity(rejected)) if rejected == jti
            );
        }

        let token = signed_with_jti(&resolver, "4294967295");
        assert_eq!(
            resolver.resolve(&token).await.unwrap(),
            Identity::new(u32::MAX)
        );
    }

    #[tokio::test]
    async fn test_rejects_expired_token() {
        let resolver = resolver();
        let now = jsonwebtoken::get_current_timestamp();
        let claims = Claims {
            jti: "9".to_string(),
            iat: now - 3600,
            exp: Some(now - 1800),
        };
        let token = jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &resolver.encoding_key,
        )
        .unwrap();

        assert_matches!(resolver.resolve(&token).await, Err(Error::InvalidToken(_)));
    }

    #[tokio::test]
    async fn test_ttl_tokens_resolve_while_fresh() {
        let mut options = JwtIdentityResolverOptions::new(JwtIdentityResolver::generate_secret(32));
        options.token_ttl = Some(Duration::from_secs(60));
        let resolver = JwtIdentityResolver::new(options).unwrap();

        let token = resolver.issue(Identity::new(3)).unwrap();

        assert_eq!(resolver.resolve(&token).await.unwrap(), Identity::new(3));
    }

    #[test]
    fn test_invalid_secret() {
        assert_matches!(
            JwtIdentityResolver::new(JwtIdentityResolverOptions::new("%%% not base64 %%%")),
            Err(Error::InvalidSecret(_))
        );
    }
}
