//! Strongly-typed identifiers for pipeline entities
//!
//! Every identifier is a UUID newtype. The display form carries a short
//! prefix (`SUB-...`, `JOB-...`) so ids stay recognisable in logs; parsing
//! accepts both the prefixed and the bare UUID form.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Creates a new random identifier
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Creates a new time-ordered identifier (v7)
            pub fn new_v7() -> Self {
                Self(Uuid::now_v7())
            }

            /// Returns the underlying UUID
            pub fn as_uuid(&self) -> Uuid {
                self.0
            }

            pub const fn prefix() -> &'static str {
                $prefix
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}-{}", $prefix, self.0)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let raw = s.strip_prefix(concat!($prefix, "-")).unwrap_or(s);
                Uuid::parse_str(raw).map(Self)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Uuid {
                id.0
            }
        }
    };
}

define_id!(
    /// One claim submission
    SubmissionId,
    "SUB"
);
define_id!(
    /// One logical unit of queued work; stable across that unit's retries
    JobId,
    "JOB"
);
define_id!(
    /// A group of ancillary jobs joined for completion signaling
    BatchId,
    "BAT"
);
define_id!(
    /// The user that owns a submission
    UserId,
    "USR"
);
define_id!(
    /// The saved claim record a submission was created from
    SavedClaimId,
    "SCL"
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_submission_id_display() {
        let id = SubmissionId::new();
        assert!(id.to_string().starts_with("SUB-"));
    }

    #[test]
    fn test_id_parsing_accepts_prefixed_and_bare_forms() {
        let original = JobId::new();
        let prefixed: JobId = original.to_string().parse().unwrap();
        let bare: JobId = original.as_uuid().to_string().parse().unwrap();
        assert_eq!(original, prefixed);
        assert_eq!(original, bare);
    }

    #[test]
    fn test_uuid_conversion() {
        let uuid = Uuid::new_v4();
        let batch_id = BatchId::from(uuid);
        let back: Uuid = batch_id.into();
        assert_eq!(uuid, back);
    }
}
