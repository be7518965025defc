//! Type-safe identifiers for spaces, items, cursors and subscribers.
//!
//! Server-minted identifiers ([`SpaceId`], [`SubscriberId`]) wrap UUID v7
//! values: two mints never collide and a later mint sorts after an earlier
//! one. Client-facing keys ([`SpaceSlug`], [`ItemId`], [`ClientId`]) are
//! validated strings. They can only be built through [`str::parse`],
//! [`TryFrom<String>`] or deserialization, and all three reject malformed
//! input, so a store never sees an invalid key.

use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

/// Generates a newtype wrapper around [`Uuid`] with standard derives.
macro_rules! define_id {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
        #[ts(export, export_to = "bindings/")]
        pub struct $name(pub Uuid);

        impl $name {
            /// Create a new identifier using UUID v7 (time-ordered).
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            /// Return the inner [`Uuid`] value.
            pub const fn into_inner(self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

define_id! {
    /// Identity of a space record. Stable for the life of the process,
    /// across any number of `getOrCreate` calls and resets.
    SpaceId
}

define_id! {
    /// Identifies one open event stream. Sent to the client in the
    /// `connected` handshake and echoed back as the origin of its intents.
    SubscriberId
}

/// Reasons a string was rejected as a key.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdError {
    /// The key is too short or too long.
    #[error("{kind} must be {min}-{max} characters long, got {len}")]
    Length {
        /// Which key type was being parsed.
        kind: &'static str,
        /// Minimum accepted length.
        min: usize,
        /// Maximum accepted length.
        max: usize,
        /// Length of the rejected input.
        len: usize,
    },

    /// The key contains a character outside its alphabet.
    #[error("{kind} contains invalid character {found:?}")]
    InvalidChar {
        /// Which key type was being parsed.
        kind: &'static str,
        /// The first offending character.
        found: char,
    },
}

const SLUG_MIN: usize = 3;
const SLUG_MAX: usize = 50;
const TOKEN_MAX: usize = 128;

fn check_length(kind: &'static str, value: &str, min: usize, max: usize) -> Result<(), IdError> {
    let len = value.chars().count();
    if len < min || len > max {
        return Err(IdError::Length {
            kind,
            min,
            max,
            len,
        });
    }
    Ok(())
}

/// Slugs: `[a-z0-9-]{3,50}`.
fn check_slug(kind: &'static str, value: &str) -> Result<(), IdError> {
    check_length(kind, value, SLUG_MIN, SLUG_MAX)?;
    match value
        .chars()
        .find(|c| !(c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-'))
    {
        Some(found) => Err(IdError::InvalidChar { kind, found }),
        None => Ok(()),
    }
}

/// Opaque client-chosen tokens: 1-128 printable characters.
fn check_token(kind: &'static str, value: &str) -> Result<(), IdError> {
    check_length(kind, value, 1, TOKEN_MAX)?;
    match value.chars().find(|c| c.is_control()) {
        Some(found) => Err(IdError::InvalidChar { kind, found }),
        None => Ok(()),
    }
}

/// Generates a validated string key with serde and `TypeScript` support.
macro_rules! define_key {
    (
        $(#[$meta:meta])*
        $name:ident, $kind:literal, $check:path
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
        #[serde(try_from = "String")]
        #[serde(into = "String")]
        #[ts(export, export_to = "bindings/")]
        pub struct $name(String);

        impl $name {
            /// Borrow the key as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<String> for $name {
            type Error = IdError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                $check($kind, &value)?;
                Ok(Self(value))
            }
        }

        impl core::str::FromStr for $name {
            type Err = IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::try_from(s.to_owned())
            }
        }

        impl From<$name> for String {
            fn from(key: $name) -> Self {
                key.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

define_key! {
    /// URL-safe name of a space, e.g. `team-retro-42`.
    SpaceSlug, "space slug", check_slug
}

define_key! {
    /// Identifier of a canvas item, unique within its space for the
    /// item's entire lifetime. Clients may choose it; otherwise the
    /// server mints one with [`ItemId::generate`].
    ItemId, "item id", check_token
}

define_key! {
    /// Identifier of a browser tab or session owning a cursor.
    ClientId, "client id", check_token
}

impl ItemId {
    /// Mint a fresh item id (UUID v7 text, never previously issued).
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }
}

impl ClientId {
    /// Mint a fresh client id for a new tab or session.
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }
}
