use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// Length of every hex token carried on the wire.
pub const TOKEN_LEN: usize = 32;

/// Whether `s` is exactly [`TOKEN_LEN`] ASCII hex digits.
pub fn is_hex_token(s: &str) -> bool {
    s.len() == TOKEN_LEN && s.bytes().all(|b| b.is_ascii_hexdigit())
}

macro_rules! hex_token {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Fresh random token (128 bits, 32 lowercase hex characters).
            pub fn new() -> Self {
                Self(Uuid::new_v4().simple().to_string())
            }

            /// Wrap a client-supplied value without validating it.
            pub fn from_raw(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            /// Accept `s` only if it is a well-formed 32-hex token.
            pub fn parse(s: &str) -> Option<Self> {
                is_hex_token(s).then(|| Self(s.to_owned()))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = std::convert::Infallible;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.to_owned()))
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

hex_token!(
    /// Globally unique session identifier.
    SessionId
);
hex_token!(
    /// Per-message token pairing a request with its (possibly asynchronous) reply.
    CorrelationId
);

/// Process-local identifier of one live transport connection.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, PartialOrd, Ord)]
pub struct ConnectionId(u64);

static NEXT_CONNECTION: AtomicU64 = AtomicU64::new(1);

impl ConnectionId {
    /// Allocate the next id. Ids are never reused within a process.
    pub fn next() -> Self {
        Self(NEXT_CONNECTION.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}
