//! Bulk placeholder resolution.
//!
//! Which fields of a record are cross-references is declared once per entity
//! kind (see [`EntityKind::reference_fields`]); the sweep here is generic over
//! that declaration and never fails fast, so one pass surfaces every
//! unresolved reference in a batch.

use crate::model::{EntityKind, FieldValue, IdMap, UploadRecord};
use crate::placeholder::{Placeholder, ResolveError};
use std::fmt;

/// A placeholder that could not be resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolveFailure {
    pub kind: EntityKind,
    /// External key of the record if it is already known, else its position.
    pub record: String,
    pub field: String,
    pub value: String,
    pub error: ResolveError,
}

impl fmt::Display for ResolveFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "getting replacement for {} {}'s {} ({}): {}",
            self.kind, self.record, self.field, self.value, self.error
        )
    }
}

impl std::error::Error for ResolveFailure {}

/// Resolve every placeholder in the fields chosen by `selector`, in place.
///
/// Missing and null fields are skipped. Returns every failure; a non-empty
/// result means the stage holding these records cannot proceed.
pub fn resolve_all<F>(records: &mut [UploadRecord], id_map: &IdMap, selector: F) -> Vec<ResolveFailure>
where
    F: Fn(&UploadRecord) -> &'static [&'static str],
{
    let mut failures = Vec::new();
    for (index, record) in records.iter_mut().enumerate() {
        let fields = selector(record);
        for field in fields {
            let Some(FieldValue::Reference(placeholder)) = record.fields.get(*field) else {
                continue;
            };
            match placeholder.resolve(id_map) {
                Ok(id) => {
                    record.set_reference(field, Placeholder::Concrete(id));
                }
                Err(error) => {
                    let value = placeholder.to_wire();
                    let label = record
                        .external_key()
                        .map(|key| key.0)
                        .unwrap_or_else(|| format!("#{index}"));
                    failures.push(ResolveFailure {
                        kind: record.kind,
                        record: label,
                        field: field.to_string(),
                        value,
                        error,
                    });
                }
            }
        }
    }
    failures
}

/// Resolve using each record's own kind declaration.
pub fn resolve_declared(records: &mut [UploadRecord], id_map: &IdMap) -> Vec<ResolveFailure> {
    resolve_all(records, id_map, |record| record.kind.reference_fields())
}
