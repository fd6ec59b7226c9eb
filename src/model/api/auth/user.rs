use std::fmt::Display;

use serde_repr::{Deserialize_repr, Serialize_repr};

/// A kind of account, having defined rights. Accounts themselves live with
/// the identity service; tokens only carry their ID and rights.
pub trait User {
    /// The rights of this user type.
    const RIGHTS: Rights;
}

/// Different privilege levels.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum Rights {
    Voter = 0,
    Admin = 1,
    Auditor = 2,
}

impl Display for Rights {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            formatter,
            "{}",
            match self {
                Self::Voter => "voter",
                Self::Admin => "admin",
                Self::Auditor => "auditor",
            }
        )
    }
}

/// Someone who may cast a vote.
#[derive(Debug)]
pub struct Voter;

impl User for Voter {
    const RIGHTS: Rights = Rights::Voter;
}

/// An election official managing the voter registry and candidate directory.
#[derive(Debug)]
pub struct Admin;

impl User for Admin {
    const RIGHTS: Rights = Rights::Admin;
}

/// An independent observer with read-only access to the ledger.
#[derive(Debug)]
pub struct Auditor;

impl User for Auditor {
    const RIGHTS: Rights = Rights::Auditor;
}
