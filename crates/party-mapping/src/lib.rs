//! Party-to-company mapping resolution.
//!
//! Given a contact (party) record belonging to one tenant, determine which
//! remote tenant to open a chat with. Party data in the wild is messy — the
//! link can live in any of several direct fields, in transaction history, in
//! metadata, or only implicitly via a name match — so resolution walks an
//! ordered list of extraction strategies and the first candidate that parses
//! as a tenant id and is not the caller wins.
//!
//! Resolution is pure and deterministic for a given party snapshot, and is
//! re-run on every chat-open because party data can change between attempts.

mod party;
mod resolver;

pub use party::{CompanyRef, IdRef, Party, PartyMetadata, TransactionRef};
pub use resolver::{
    resolve, validate_chat_link, CompanyMapping, ResolverOptions, Strategy,
};

use thiserror::Error;

/// Why a party could not be mapped to a remote tenant.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MappingError {
    /// No candidate tenant id anywhere on the party.
    #[error("party {party_id} is not linked to any chat company")]
    NotLinked { party_id: String },

    /// Every candidate was the caller's own tenant.
    #[error("party {party_id} only references your own company")]
    SelfReference { party_id: String },

    /// The only candidates found were malformed ids.
    #[error("party {party_id} has a malformed company reference: {raw:?}")]
    InvalidFormat { party_id: String, raw: String },
}

/// Result type for mapping operations.
pub type MappingResult<T> = Result<T, MappingError>;
