//! Value objects: identifiers, confirmation sides and lease kinds.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! record_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Creates a fresh random identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn as_uuid(&self) -> &Uuid {
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
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }
    };
}

record_id!(
    /// Identifier of a savings group
    GroupId
);
record_id!(
    /// Identifier of a group member
    MemberId
);
record_id!(
    /// Identifier of a funds-transfer record
    TransactionId
);

/// Which party of a transfer is confirming.
///
/// Closed set: routing a confirmation is an exhaustive match, never a string
/// comparison.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationSide {
    Sender,
    Recipient,
}

impl ConfirmationSide {
    pub fn other(&self) -> Self {
        match self {
            ConfirmationSide::Sender => ConfirmationSide::Recipient,
            ConfirmationSide::Recipient => ConfirmationSide::Sender,
        }
    }
}

impl fmt::Display for ConfirmationSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfirmationSide::Sender => write!(f, "sender"),
            ConfirmationSide::Recipient => write!(f, "recipient"),
        }
    }
}

/// Kind of lease. Leases of different kinds on the same resource do not
/// exclude each other.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockType {
    RotationAdvance,
    DefaultHandling,
    MemberJoin,
}

impl LockType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LockType::RotationAdvance => "rotation_advance",
            LockType::DefaultHandling => "default_handling",
            LockType::MemberJoin => "member_join",
        }
    }
}

impl fmt::Display for LockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
