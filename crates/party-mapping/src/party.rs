//! Party (contact) records as delivered by the backend.

use serde::Deserialize;

/// A company id reference, either a plain string or a nested `{_id}` object.
///
/// The backend is inconsistent about whether references are populated
/// (expanded documents) or bare ids; both shapes occur in the same fields.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum IdRef {
    Plain(String),
    Object {
        #[serde(rename = "_id")]
        id: String,
    },
}

impl IdRef {
    /// The raw referenced id.
    pub fn raw(&self) -> &str {
        match self {
            IdRef::Plain(s) => s,
            IdRef::Object { id } => id,
        }
    }
}

/// A transaction row associated with a party, reduced to the tenant it names.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TransactionRef {
    #[serde(default, alias = "companyId")]
    pub company_id: Option<IdRef>,
    #[serde(default, alias = "userId")]
    pub user_id: Option<IdRef>,
}

/// Loosely structured metadata carried on a party record.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PartyMetadata {
    #[serde(default, alias = "associatedCompanyId")]
    pub associated_company_id: Option<IdRef>,
    #[serde(default, alias = "parentCompanyId")]
    pub parent_company_id: Option<IdRef>,
    #[serde(default, alias = "relatedBusinessId")]
    pub related_business_id: Option<IdRef>,
    #[serde(default, alias = "businessPartnerId")]
    pub business_partner_id: Option<IdRef>,
}

/// A customer or supplier record, optionally linked to another tenant.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Party {
    #[serde(default, alias = "_id")]
    pub id: String,
    #[serde(default)]
    pub name: String,

    // Direct link fields, in resolution priority order.
    #[serde(default, alias = "linkedCompanyId")]
    pub linked_company_id: Option<IdRef>,
    #[serde(default, alias = "targetCompanyId")]
    pub target_company_id: Option<IdRef>,
    #[serde(default, alias = "chatCompanyId")]
    pub chat_company_id: Option<IdRef>,
    #[serde(default, alias = "externalCompanyId")]
    pub external_company_id: Option<IdRef>,

    #[serde(default)]
    pub transactions: Vec<TransactionRef>,

    #[serde(default)]
    pub metadata: PartyMetadata,
}

impl Party {
    /// Direct link fields in priority order.
    pub(crate) fn direct_fields(&self) -> impl Iterator<Item = &IdRef> {
        [
            self.linked_company_id.as_ref(),
            self.target_company_id.as_ref(),
            self.chat_company_id.as_ref(),
            self.external_company_id.as_ref(),
        ]
        .into_iter()
        .flatten()
    }

    /// Metadata reference fields in priority order.
    pub(crate) fn metadata_fields(&self) -> impl Iterator<Item = &IdRef> {
        [
            self.metadata.associated_company_id.as_ref(),
            self.metadata.parent_company_id.as_ref(),
            self.metadata.related_business_id.as_ref(),
            self.metadata.business_partner_id.as_ref(),
        ]
        .into_iter()
        .flatten()
    }
}

/// An entry in the locally cached "available companies" list.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CompanyRef {
    #[serde(alias = "_id")]
    pub id: String,
    pub name: String,
}
