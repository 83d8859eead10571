//! # Data Model
//!
//! Identifiers, entity kinds and the kind-tagged upload record handed to the
//! scheduler. Each entity kind carries its own declaration of which fields
//! are cross-references, how its external key is formed and which audit
//! fields the target store may refuse on update.

use crate::placeholder::Placeholder;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Opaque identifier of a record in the source system.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceRef(pub String);

impl SourceRef {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for SourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SourceRef {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Stable business identifier used to deduplicate a record in the target
/// store. Distinct from the id the target store generates.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExternalKey(pub String);

impl ExternalKey {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ExternalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ExternalKey {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

// Source refs double as external keys: the migration stamps every target
// record with the ref it came from.
impl From<&SourceRef> for ExternalKey {
    fn from(value: &SourceRef) -> Self {
        Self(value.0.clone())
    }
}

/// Identifier assigned by the target store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TargetId(pub String);

impl TargetId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TargetId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Mapping from external key to the id the target store assigned.
pub type IdMap = BTreeMap<ExternalKey, TargetId>;

/// Audit fields the target store accepts on create but may refuse on update.
pub const DEFAULT_AUDIT_FIELDS: &[&str] = &[
    "CreatedDate",
    "CreatedById",
    "LastModifiedDate",
    "LastModifiedById",
    "CompletedDateTime",
];

/// Fields whose rejection is harmless when the store still returned an id.
pub const IGNORABLE_REJECTED_FIELDS: &[&str] = &["PathOnClient"];

/// How the external key of a record is formed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyRule {
    /// The value of a single text field.
    Field(&'static str),
    /// The concatenation of several (resolved) field values.
    Concat(&'static [&'static str]),
}

/// Target entity kinds, declared in upload order.
///
/// The derived `Ord` is the stage order: a kind may only hold placeholders
/// for kinds that sort before it.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Campaign,
    Fund,
    Account,
    Contact,
    Relationship,
    Affiliation,
    RecurringDonation,
    Opportunity,
    Payment,
    Allocation,
    PartialSoftCredit,
    AccountSoftCredit,
    Note,
    Task,
    ContentVersion,
    ContentDocumentLink,
}

impl EntityKind {
    pub const STAGE_ORDER: [EntityKind; 16] = [
        EntityKind::Campaign,
        EntityKind::Fund,
        EntityKind::Account,
        EntityKind::Contact,
        EntityKind::Relationship,
        EntityKind::Affiliation,
        EntityKind::RecurringDonation,
        EntityKind::Opportunity,
        EntityKind::Payment,
        EntityKind::Allocation,
        EntityKind::PartialSoftCredit,
        EntityKind::AccountSoftCredit,
        EntityKind::Note,
        EntityKind::Task,
        EntityKind::ContentVersion,
        EntityKind::ContentDocumentLink,
    ];

    pub fn name(self) -> &'static str {
        match self {
            EntityKind::Campaign => "campaign",
            EntityKind::Fund => "fund",
            EntityKind::Account => "account",
            EntityKind::Contact => "contact",
            EntityKind::Relationship => "relationship",
            EntityKind::Affiliation => "affiliation",
            EntityKind::RecurringDonation => "recurring_donation",
            EntityKind::Opportunity => "opportunity",
            EntityKind::Payment => "payment",
            EntityKind::Allocation => "allocation",
            EntityKind::PartialSoftCredit => "partial_soft_credit",
            EntityKind::AccountSoftCredit => "account_soft_credit",
            EntityKind::Note => "note",
            EntityKind::Task => "task",
            EntityKind::ContentVersion => "content_version",
            EntityKind::ContentDocumentLink => "content_document_link",
        }
    }

    /// Fields holding cross-references to records of earlier kinds.
    pub fn reference_fields(self) -> &'static [&'static str] {
        match self {
            EntityKind::Campaign
            | EntityKind::Fund
            | EntityKind::Account
            | EntityKind::Note
            | EntityKind::ContentVersion => &[],
            EntityKind::Contact => &["AccountId"],
            EntityKind::Relationship => &["Contact", "RelatedContact"],
            EntityKind::Affiliation => &["Contact", "Organization"],
            EntityKind::RecurringDonation => &["Organization", "Contact", "Campaign"],
            EntityKind::Opportunity => {
                &["AccountId", "ContactId", "CampaignId", "RecurringDonation"]
            }
            EntityKind::Payment => &["Opportunity"],
            EntityKind::Allocation => &["Campaign", "Opportunity", "RecurringDonation", "Fund"],
            EntityKind::PartialSoftCredit => &["Opportunity", "Contact"],
            EntityKind::AccountSoftCredit => &["Opportunity", "Account"],
            EntityKind::Task => &["WhoId", "WhatId", "AccountId", "AdditionalContext"],
            EntityKind::ContentDocumentLink => &["ContentDocumentId", "LinkedEntityId"],
        }
    }

    /// Reference fields the store refuses to change once a record exists.
    /// Dropped, with the audit fields, when an update is forced after a
    /// field rejection.
    pub fn not_updatable_fields(self) -> &'static [&'static str] {
        match self {
            EntityKind::Relationship => &["Contact", "RelatedContact"],
            EntityKind::Affiliation => &["Contact", "Organization"],
            EntityKind::Opportunity => &["ContactId"],
            _ => &[],
        }
    }

    pub fn key_rule(self) -> KeyRule {
        match self {
            EntityKind::Fund => KeyRule::Field("FundRef"),
            EntityKind::Contact => KeyRule::Field("AccountRef"),
            EntityKind::Relationship | EntityKind::Affiliation => {
                KeyRule::Field("RelationshipRef")
            }
            EntityKind::RecurringDonation => KeyRule::Field("ScheduleRef"),
            EntityKind::Payment => KeyRule::Field("PaymentRef"),
            EntityKind::PartialSoftCredit | EntityKind::AccountSoftCredit => {
                KeyRule::Field("SoftCreditRef")
            }
            EntityKind::Note => KeyRule::Field("Name"),
            EntityKind::ContentDocumentLink => {
                KeyRule::Concat(&["ContentDocumentId", "LinkedEntityId"])
            }
            EntityKind::Campaign
            | EntityKind::Account
            | EntityKind::Opportunity
            | EntityKind::Allocation
            | EntityKind::Task
            | EntityKind::ContentVersion => KeyRule::Field("SourceRef"),
        }
    }

    /// Field whose id is only assignable after the target store has post-processed
    /// an upload; it must be looked up again on every run.
    pub fn related_lookup_field(self) -> Option<&'static str> {
        match self {
            EntityKind::ContentDocumentLink => Some("ContentDocumentId"),
            _ => None,
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single field of an upload record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldValue {
    Text(String),
    Number(f64),
    Bool(bool),
    Reference(Placeholder),
}

impl FieldValue {
    /// Textual value usable in keys. Unresolved references yield `None`.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(value) => Some(value),
            FieldValue::Reference(Placeholder::Concrete(id)) => Some(id.as_str()),
            _ => None,
        }
    }
}

/// An entity-kind-tagged bundle of fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadRecord {
    pub kind: EntityKind,
    #[serde(default)]
    pub fields: BTreeMap<String, FieldValue>,
}

impl UploadRecord {
    pub fn new(kind: EntityKind) -> Self {
        Self {
            kind,
            fields: BTreeMap::new(),
        }
    }

    pub fn with_text(mut self, field: &str, value: impl Into<String>) -> Self {
        self.fields
            .insert(field.to_string(), FieldValue::Text(value.into()));
        self
    }

    pub fn with_reference(mut self, field: &str, placeholder: Placeholder) -> Self {
        self.fields
            .insert(field.to_string(), FieldValue::Reference(placeholder));
        self
    }

    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(FieldValue::as_text)
    }

    pub fn reference(&self, name: &str) -> Option<&Placeholder> {
        match self.fields.get(name) {
            Some(FieldValue::Reference(placeholder)) => Some(placeholder),
            _ => None,
        }
    }

    pub fn set_reference(&mut self, name: &str, placeholder: Placeholder) {
        self.fields
            .insert(name.to_string(), FieldValue::Reference(placeholder));
    }

    /// External key of this record, or `None` if the key fields are missing,
    /// empty, or still unresolved.
    pub fn external_key(&self) -> Option<ExternalKey> {
        let key = match self.kind.key_rule() {
            KeyRule::Field(field) => self.text(field)?.to_string(),
            KeyRule::Concat(fields) => {
                let mut key = String::new();
                for field in fields {
                    key.push_str(self.text(field)?);
                }
                key
            }
        };
        if key.is_empty() {
            None
        } else {
            Some(ExternalKey(key))
        }
    }

    /// Copy of this record with the named fields removed.
    pub fn without_fields(&self, names: &[&str]) -> Self {
        let mut copy = self.clone();
        for name in names {
            copy.fields.remove(*name);
        }
        copy
    }

    /// Every placeholder carried by this record, in field order.
    pub fn placeholders(&self) -> impl Iterator<Item = (&str, &Placeholder)> {
        self.fields.iter().filter_map(|(name, value)| match value {
            FieldValue::Reference(placeholder) => Some((name.as_str(), placeholder)),
            _ => None,
        })
    }
}
