use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

/// Stable numeric handle for a sender or a receiver.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct Identity(u32);

impl Identity {
    /// Creates an identity from its numeric value.
    #[must_use]
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    /// Returns the numeric value.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl Display for Identity {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for Identity {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<Identity> for u32 {
    fn from(identity: Identity) -> Self {
        identity.0
    }
}
