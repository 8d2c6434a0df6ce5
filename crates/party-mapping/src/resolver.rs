//! The ordered strategy chain.

use crate::{CompanyRef, IdRef, MappingError, MappingResult, Party};
use chat_types::TenantId;
use serde::Serialize;
use tracing::{debug, warn};

/// Which strategy produced the mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// An explicit link field on the party record.
    DirectField,
    /// The dedicated validation routine.
    ValidatedLink,
    /// A tenant referenced in the party's transaction history.
    TransactionHistory,
    /// A metadata reference (associated/parent/related/business-partner).
    Metadata,
    /// Name-similarity match against the cached company list.
    NameSimilarity,
    /// Ambiguous last resort: any other available company.
    AnyOtherCompany,
}

/// Resolver behavior switches.
#[derive(Debug, Clone, Copy)]
pub struct ResolverOptions {
    /// Whether the ambiguous "any other company" last resort is allowed.
    ///
    /// This mirrors the source system's behavior and is on by default; hosts
    /// that prefer a hard failure disable it and get `NotLinked` instead.
    pub allow_ambiguous_fallback: bool,
}

impl Default for ResolverOptions {
    fn default() -> Self {
        Self {
            allow_ambiguous_fallback: true,
        }
    }
}

/// A resolved `(my, target)` tenant pair for one party.
#[derive(Debug, Clone, PartialEq)]
pub struct CompanyMapping {
    pub my_company_id: TenantId,
    pub target_company_id: TenantId,
    pub party_id: String,
    pub party_name: String,
    /// Recorded for observability; `AnyOtherCompany` means the match was
    /// ambiguous.
    pub strategy: Strategy,
}

/// Tracks why candidates were discarded so the final error is precise.
#[derive(Default)]
struct Scan {
    saw_self: bool,
    malformed: Option<String>,
}

impl Scan {
    /// Accept the candidate if it parses and is not the caller's own tenant.
    fn consider(&mut self, raw: &str, my: &TenantId) -> Option<TenantId> {
        match TenantId::new(raw) {
            Ok(id) if &id == my => {
                self.saw_self = true;
                None
            }
            Ok(id) => Some(id),
            Err(_) => {
                if self.malformed.is_none() {
                    self.malformed = Some(raw.to_string());
                }
                None
            }
        }
    }

    fn into_error(self, party_id: &str) -> MappingError {
        if self.saw_self {
            MappingError::SelfReference {
                party_id: party_id.to_string(),
            }
        } else if let Some(raw) = self.malformed {
            MappingError::InvalidFormat {
                party_id: party_id.to_string(),
                raw,
            }
        } else {
            MappingError::NotLinked {
                party_id: party_id.to_string(),
            }
        }
    }
}

/// Resolve the remote tenant to chat with for `party`.
///
/// `available` is the locally cached company list used by the heuristic
/// strategies; it may be empty.
pub fn resolve(
    party: &Party,
    my: &TenantId,
    available: &[CompanyRef],
    options: &ResolverOptions,
) -> MappingResult<CompanyMapping> {
    let mut scan = Scan::default();

    let found = direct_fields(party, my, &mut scan)
        .or_else(|| validated_link(party, my, &mut scan))
        .or_else(|| transaction_history(party, my, &mut scan))
        .or_else(|| metadata_fields(party, my, &mut scan))
        .or_else(|| name_similarity(party, my, available, &mut scan))
        .or_else(|| any_other_company(party, my, available, options, &mut scan));

    match found {
        Some((target, strategy)) => {
            debug!(
                party_id = %party.id,
                target = %target,
                strategy = ?strategy,
                "resolved chat company"
            );
            Ok(CompanyMapping {
                my_company_id: my.clone(),
                target_company_id: target,
                party_id: party.id.clone(),
                party_name: party.name.clone(),
                strategy,
            })
        }
        None => Err(scan.into_error(&party.id)),
    }
}

/// Strategy 1: explicit direct fields, `{_id}` unwrapped.
fn direct_fields(party: &Party, my: &TenantId, scan: &mut Scan) -> Option<(TenantId, Strategy)> {
    party
        .direct_fields()
        .find_map(|r| scan.consider(r.raw(), my))
        .map(|id| (id, Strategy::DirectField))
}

/// Strategy 2: the dedicated validation routine.
fn validated_link(party: &Party, my: &TenantId, scan: &mut Scan) -> Option<(TenantId, Strategy)> {
    match validate_chat_link(party, my) {
        Ok(id) => Some((id, Strategy::ValidatedLink)),
        Err(e) => {
            debug!(party_id = %party.id, error = %e, "validated-link strategy declined");
            if matches!(e, MappingError::SelfReference { .. }) {
                scan.saw_self = true;
            }
            None
        }
    }
}

/// Strategy 3: any tenant referenced in transaction history.
fn transaction_history(
    party: &Party,
    my: &TenantId,
    scan: &mut Scan,
) -> Option<(TenantId, Strategy)> {
    party
        .transactions
        .iter()
        .flat_map(|t| [t.company_id.as_ref(), t.user_id.as_ref()])
        .flatten()
        .find_map(|r| scan.consider(r.raw(), my))
        .map(|id| (id, Strategy::TransactionHistory))
}

/// Strategy 4: metadata reference fields.
fn metadata_fields(party: &Party, my: &TenantId, scan: &mut Scan) -> Option<(TenantId, Strategy)> {
    party
        .metadata_fields()
        .find_map(|r| scan.consider(r.raw(), my))
        .map(|id| (id, Strategy::Metadata))
}

/// Strategy 5: best name-similarity match (substring either direction).
fn name_similarity(
    party: &Party,
    my: &TenantId,
    available: &[CompanyRef],
    scan: &mut Scan,
) -> Option<(TenantId, Strategy)> {
    let party_name = party.name.trim().to_lowercase();
    if party_name.is_empty() {
        return None;
    }

    available
        .iter()
        .filter(|c| {
            let company_name = c.name.trim().to_lowercase();
            !company_name.is_empty()
                && (company_name.contains(&party_name) || party_name.contains(&company_name))
        })
        .find_map(|c| scan.consider(&c.id, my))
        .map(|id| (id, Strategy::NameSimilarity))
}

/// Strategy 6: ambiguous last resort — pick any other company.
fn any_other_company(
    party: &Party,
    my: &TenantId,
    available: &[CompanyRef],
    options: &ResolverOptions,
    scan: &mut Scan,
) -> Option<(TenantId, Strategy)> {
    if !options.allow_ambiguous_fallback {
        return None;
    }

    let id = available
        .iter()
        .find_map(|c| scan.consider(&c.id, my))?;
    warn!(
        party_id = %party.id,
        target = %id,
        "falling back to an arbitrary company; party has no usable link"
    );
    Some((id, Strategy::AnyOtherCompany))
}

/// Structural validation of a party's chat link.
///
/// Performs the same extraction as the direct-field strategy with stricter
/// checks, and reports a descriptive error instead of silently declining.
pub fn validate_chat_link(party: &Party, my: &TenantId) -> MappingResult<TenantId> {
    let mut scan = Scan::default();

    for field in party.direct_fields() {
        let raw = field.raw().trim();
        if raw.is_empty() {
            // An expanded document with an empty `_id` is a data bug.
            if matches!(field, IdRef::Object { .. }) {
                return Err(MappingError::InvalidFormat {
                    party_id: party.id.clone(),
                    raw: raw.to_string(),
                });
            }
            continue;
        }
        if let Some(id) = scan.consider(raw, my) {
            return Ok(id);
        }
    }

    Err(scan.into_error(&party.id))
}
