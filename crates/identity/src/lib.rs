//! Abstract interface for mapping opaque credentials to stable identities.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod identity;

pub use identity::Identity;

use std::error::Error;
use std::fmt::Debug;

use async_trait::async_trait;

/// Marker trait for `IdentityResolver` errors
pub trait IdentityResolverError: Debug + Error + Send + Sync + 'static {}

/// A trait representing a verifier that turns a credential into an identity.
///
/// Resolution must be deterministic: the same valid credential always maps to
/// the same identity.
#[async_trait]
pub trait IdentityResolver: Clone + Send + Sync + 'static {
    /// The error type for resolution failures.
    type Error: IdentityResolverError;

    /// Verifies `credential` and returns the identity it encodes.
    ///
    /// # Arguments
    /// * `credential`: An opaque credential, typically a signed token.
    async fn resolve(&self, credential: &str) -> Result<Identity, Self::Error>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_and_conversions() {
        let identity = Identity::from(101u32);

        assert_eq!(identity.to_string(), "101");
        assert_eq!(u32::from(identity), 101);
        assert_eq!(identity, Identity::new(101));
        assert!(Identity::new(1) < Identity::new(2));
    }
}
