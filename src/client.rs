//! Boundary to the target record store.
//!
//! The network client lives outside this crate; the scheduler only needs
//! upsert-by-external-key, delete-by-id and the related-id lookup, plus a way
//! to tell duplicate-key and rejected-field failures apart from everything
//! else.

use crate::model::{EntityKind, ExternalKey, TargetId, UploadRecord};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;

/// Status code the target store uses for duplicate external ids.
pub const DUPLICATE_EXTERNAL_ID: &str = "DUPLICATE_EXTERNAL_ID";
/// Status code the target store uses when a field is refused for the operation.
pub const INVALID_FIELD_FOR_INSERT_UPDATE: &str = "INVALID_FIELD_FOR_INSERT_UPDATE";
/// Status code for a delete of an id that is already gone.
pub const ENTITY_IS_DELETED: &str = "ENTITY_IS_DELETED";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UpsertError {
    /// The external key collides with existing target records not linked to it.
    #[error("duplicate external id {key}: existing records {existing:?}")]
    DuplicateExternalId {
        key: ExternalKey,
        existing: Vec<TargetId>,
    },
    /// The store refused specific fields for this operation.
    #[error("fields {fields:?} rejected: {message}")]
    FieldRejected {
        fields: Vec<String>,
        message: String,
        /// Id the store reported despite the rejection, if any.
        returned_id: Option<TargetId>,
    },
    /// Failure that no retry can fix (credentials, schema). Stops the stage.
    #[error("non-recoverable: {0}")]
    Fatal(String),
    #[error("{0}")]
    Other(String),
}

impl UpsertError {
    /// Classify a status code and message as reported by the target store.
    ///
    /// Duplicate messages list the colliding ids in brackets
    /// (`"... [001A, 001B]"`); rejected-field messages name the fields after
    /// `fields:` (`"Unable to create/update fields: CreatedDate, OwnerId. ..."`).
    pub fn classify(key: &ExternalKey, status_code: &str, message: &str) -> Self {
        match status_code {
            DUPLICATE_EXTERNAL_ID => {
                let existing = bracketed_list(message)
                    .into_iter()
                    .map(TargetId::new)
                    .collect();
                UpsertError::DuplicateExternalId {
                    key: key.clone(),
                    existing,
                }
            }
            INVALID_FIELD_FOR_INSERT_UPDATE => UpsertError::FieldRejected {
                fields: rejected_fields(message),
                message: message.to_string(),
                returned_id: None,
            },
            _ => UpsertError::Other(format!("{status_code}: {message}")),
        }
    }

    pub fn is_recoverable(&self) -> bool {
        !matches!(self, UpsertError::Fatal(_))
    }
}

fn bracketed_list(message: &str) -> Vec<String> {
    let (Some(start), Some(end)) = (message.find('['), message.rfind(']')) else {
        return Vec::new();
    };
    if end <= start {
        return Vec::new();
    }
    message[start + 1..end]
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn rejected_fields(message: &str) -> Vec<String> {
    let Some(index) = message.find("fields:") else {
        return Vec::new();
    };
    let rest = &message[index + "fields:".len()..];
    let list = rest.split('.').next().unwrap_or_default();
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Result of an upsert that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpsertOutcome {
    Uploaded(TargetId),
    /// Deliberately not uploaded; neither a success nor a failure.
    Skipped(String),
}

/// How the upsert should be attempted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpsertMode {
    Normal,
    /// Forced retry after a field rejection. Carries the fields the store
    /// rejected; callers also leave out audit fields and whatever their kind
    /// cannot change on update.
    OmitFields(Vec<String>),
}

impl UpsertMode {
    /// Fields to strip from the record for this attempt, given the fields the
    /// record kind always drops on a forced retry.
    pub fn omitted_fields<'a>(&'a self, always: &[&'a str]) -> Vec<&'a str> {
        match self {
            UpsertMode::Normal => Vec::new(),
            UpsertMode::OmitFields(rejected) => {
                let mut fields: Vec<&str> = always.to_vec();
                for field in rejected {
                    if !fields.contains(&field.as_str()) {
                        fields.push(field.as_str());
                    }
                }
                fields
            }
        }
    }
}

/// Per-id result of a delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteResult {
    pub id: TargetId,
    pub status_code: Option<String>,
    pub message: Option<String>,
}

impl DeleteResult {
    pub fn ok(id: TargetId) -> Self {
        Self {
            id,
            status_code: None,
            message: None,
        }
    }

    pub fn failed(id: TargetId, status_code: &str, message: &str) -> Self {
        Self {
            id,
            status_code: Some(status_code.to_string()),
            message: Some(message.to_string()),
        }
    }

    /// Success, or the id was already gone.
    pub fn is_ok(&self) -> bool {
        match (&self.status_code, &self.message) {
            (None, _) => true,
            (Some(code), message) => {
                code == ENTITY_IS_DELETED
                    || message
                        .as_deref()
                        .is_some_and(|m| m.contains("entity is deleted"))
            }
        }
    }
}

/// Target record store as seen by the scheduler.
pub trait TargetStore: Send + Sync {
    /// Create or update `record` keyed by its external key.
    fn upsert(&self, record: &UploadRecord) -> Result<TargetId, UpsertError>;

    /// Delete records by id. One result per id.
    fn delete(&self, ids: &[TargetId]) -> Result<Vec<DeleteResult>, UpsertError>;

    /// Id of the record the store derived from `id` during its own
    /// post-processing (e.g. the document behind an uploaded version).
    fn lookup_related_id(&self, id: &TargetId) -> Result<TargetId, UpsertError>;
}

/// In-memory target store for local validation runs. Mints sequential ids of
/// the form `<kind>-<n>` and remembers the last id given to each key.
#[derive(Debug, Default)]
pub struct MemoryTargetStore {
    next_id: AtomicUsize,
    records: Mutex<BTreeMap<(EntityKind, ExternalKey), TargetId>>,
}

impl MemoryTargetStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    pub fn get(&self, kind: EntityKind, key: &ExternalKey) -> Option<TargetId> {
        self.records.lock().get(&(kind, key.clone())).cloned()
    }
}

impl TargetStore for MemoryTargetStore {
    fn upsert(&self, record: &UploadRecord) -> Result<TargetId, UpsertError> {
        let key = record
            .external_key()
            .ok_or_else(|| UpsertError::Other(format!("{} record has no external key", record.kind)))?;
        let mut records = self.records.lock();
        if let Some(existing) = records.get(&(record.kind, key.clone())) {
            return Ok(existing.clone());
        }
        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let id = TargetId::new(format!("{}-{n}", record.kind));
        records.insert((record.kind, key), id.clone());
        Ok(id)
    }

    fn delete(&self, ids: &[TargetId]) -> Result<Vec<DeleteResult>, UpsertError> {
        let mut records = self.records.lock();
        let results = ids
            .iter()
            .map(|id| {
                let before = records.len();
                records.retain(|_, existing| *existing != *id);
                if records.len() < before {
                    DeleteResult::ok(id.clone())
                } else {
                    DeleteResult::failed(id.clone(), ENTITY_IS_DELETED, "entity is deleted")
                }
            })
            .collect();
        Ok(results)
    }

    fn lookup_related_id(&self, id: &TargetId) -> Result<TargetId, UpsertError> {
        Ok(TargetId::new(format!("doc-{id}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_duplicate_external_id() {
        let key = ExternalKey::from("k1");
        let err = UpsertError::classify(
            &key,
            DUPLICATE_EXTERNAL_ID,
            "Duplicate external id specified: k1 [001A, 001B ]",
        );
        assert_eq!(
            err,
            UpsertError::DuplicateExternalId {
                key,
                existing: vec![TargetId::from("001A"), TargetId::from("001B")],
            }
        );
    }

    #[test]
    fn classifies_rejected_fields() {
        let err = UpsertError::classify(
            &ExternalKey::from("k1"),
            INVALID_FIELD_FOR_INSERT_UPDATE,
            "Unable to create/update fields: CreatedDate, LastModifiedDate. Please check the security settings",
        );
        match err {
            UpsertError::FieldRejected { fields, .. } => {
                assert_eq!(fields, vec!["CreatedDate", "LastModifiedDate"]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn forced_retry_omits_rejected_and_declared_fields() {
        assert!(UpsertMode::Normal.omitted_fields(&["CreatedDate"]).is_empty());
        let mode = UpsertMode::OmitFields(vec!["Contact".to_string(), "CreatedDate".to_string()]);
        assert_eq!(
            mode.omitted_fields(&["CreatedDate", "RelatedContact"]),
            vec!["CreatedDate", "RelatedContact", "Contact"]
        );
    }

    #[test]
    fn unknown_codes_are_generic() {
        let err = UpsertError::classify(&ExternalKey::from("k"), "UNABLE_TO_LOCK_ROW", "busy");
        assert_eq!(err, UpsertError::Other("UNABLE_TO_LOCK_ROW: busy".to_string()));
        assert!(err.is_recoverable());
        assert!(!UpsertError::Fatal("auth".to_string()).is_recoverable());
    }

    #[test]
    fn already_deleted_counts_as_ok() {
        assert!(DeleteResult::ok(TargetId::from("1")).is_ok());
        assert!(DeleteResult::failed(TargetId::from("1"), ENTITY_IS_DELETED, "gone").is_ok());
        assert!(!DeleteResult::failed(TargetId::from("1"), "INSUFFICIENT_ACCESS", "no").is_ok());
    }

    #[test]
    fn memory_store_is_idempotent_per_key() {
        let store = MemoryTargetStore::new();
        let record = UploadRecord::new(EntityKind::Campaign).with_text("SourceRef", "c1");
        let first = store.upsert(&record).unwrap();
        let second = store.upsert(&record).unwrap();
        assert_eq!(first, second);
        assert_eq!(first, TargetId::from("campaign-1"));
        assert_eq!(store.len(), 1);

        let results = store.delete(&[first.clone()]).unwrap();
        assert!(results[0].is_ok());
        assert!(store.is_empty());
    }
}
