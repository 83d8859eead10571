//! Scripted target store and record builders shared by the integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rustc_hash::FxHashMap;

use stagelift_rs::client::{DeleteResult, MemoryTargetStore, TargetStore, UpsertError};
use stagelift_rs::{EntityKind, ExternalKey, Placeholder, Plan, SourceRef, Stage, TargetId, UploadRecord};

/// Target store whose failures are scripted per external key. Successful
/// calls fall through to a [`MemoryTargetStore`].
#[derive(Debug, Default)]
pub struct ScriptedStore {
    inner: MemoryTargetStore,
    next_failures: Mutex<FxHashMap<ExternalKey, VecDeque<UpsertError>>>,
    permanent_failures: Mutex<FxHashMap<ExternalKey, UpsertError>>,
    rejected_fields: Mutex<Vec<String>>,
    calls: Mutex<FxHashMap<ExternalKey, usize>>,
    submitted: Mutex<Vec<UploadRecord>>,
    deleted: Mutex<Vec<TargetId>>,
    lookups: Mutex<Vec<TargetId>>,
}

impl ScriptedStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next upsert of `key` with `error`. Queues when called again.
    pub fn fail_next(&self, key: &str, error: UpsertError) {
        self.next_failures
            .lock()
            .entry(ExternalKey::from(key))
            .or_default()
            .push_back(error);
    }

    /// Fail every upsert of `key` with `error`.
    pub fn fail_always(&self, key: &str, error: UpsertError) {
        self.permanent_failures
            .lock()
            .insert(ExternalKey::from(key), error);
    }

    /// Reject every upsert that carries `field`, the way the store answers a
    /// reference it will not change on an existing record.
    pub fn reject_field(&self, field: &str) {
        self.rejected_fields.lock().push(field.to_string());
    }

    /// Upsert attempts for `key`, failed ones included.
    pub fn calls_for(&self, key: &str) -> usize {
        self.calls
            .lock()
            .get(&ExternalKey::from(key))
            .copied()
            .unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().values().sum()
    }

    /// Records that were accepted, in submission order.
    pub fn submitted(&self) -> Vec<UploadRecord> {
        self.submitted.lock().clone()
    }

    pub fn deleted(&self) -> Vec<TargetId> {
        self.deleted.lock().clone()
    }

    pub fn lookups(&self) -> Vec<TargetId> {
        self.lookups.lock().clone()
    }

    pub fn get(&self, kind: EntityKind, key: &str) -> Option<TargetId> {
        self.inner.get(kind, &ExternalKey::from(key))
    }
}

impl TargetStore for ScriptedStore {
    fn upsert(&self, record: &UploadRecord) -> Result<TargetId, UpsertError> {
        let key = record
            .external_key()
            .ok_or_else(|| UpsertError::Other(format!("{} record has no external key", record.kind)))?;
        *self.calls.lock().entry(key.clone()).or_default() += 1;

        if let Some(error) = self.permanent_failures.lock().get(&key) {
            return Err(error.clone());
        }
        if let Some(error) = self
            .next_failures
            .lock()
            .get_mut(&key)
            .and_then(VecDeque::pop_front)
        {
            return Err(error);
        }
        let rejected: Vec<String> = self
            .rejected_fields
            .lock()
            .iter()
            .filter(|field| record.field(field).is_some())
            .cloned()
            .collect();
        if !rejected.is_empty() {
            return Err(UpsertError::FieldRejected {
                message: format!("Unable to create/update fields: {}.", rejected.join(", ")),
                fields: rejected,
                returned_id: None,
            });
        }
        let id = self.inner.upsert(record)?;
        self.submitted.lock().push(record.clone());
        Ok(id)
    }

    fn delete(&self, ids: &[TargetId]) -> Result<Vec<DeleteResult>, UpsertError> {
        self.deleted.lock().extend(ids.iter().cloned());
        self.inner.delete(ids)
    }

    fn lookup_related_id(&self, id: &TargetId) -> Result<TargetId, UpsertError> {
        self.lookups.lock().push(id.clone());
        self.inner.lookup_related_id(id)
    }
}

pub fn account(reference: &str) -> UploadRecord {
    UploadRecord::new(EntityKind::Account)
        .with_text("SourceRef", reference)
        .with_text("Name", format!("Household {reference}"))
}

pub fn contact(reference: &str, account_ref: &str) -> UploadRecord {
    UploadRecord::new(EntityKind::Contact)
        .with_text("AccountRef", reference)
        .with_text("LastName", format!("Donor {reference}"))
        .with_reference(
            "AccountId",
            Placeholder::NeedsReplacement(SourceRef::from(account_ref)),
        )
}

pub fn opportunity(reference: &str, account_ref: &str, contact_ref: &str) -> UploadRecord {
    UploadRecord::new(EntityKind::Opportunity)
        .with_text("SourceRef", reference)
        .with_text("CreatedDate", "2019-04-01T00:00:00Z")
        .with_reference(
            "AccountId",
            Placeholder::NeedsReplacement(SourceRef::from(account_ref)),
        )
        .with_reference(
            "ContactId",
            Placeholder::NeedsReplacement(SourceRef::from(contact_ref)),
        )
}

/// A seeded plan of accounts, their contacts, and gifts from those contacts.
pub fn generate_plan(accounts: usize, contacts_per_account: usize, seed: u64) -> Plan {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut account_records = Vec::with_capacity(accounts);
    let mut contact_records = Vec::new();
    let mut gifts = Vec::new();

    for a in 1..=accounts {
        let account_ref = format!("acct-{a:05}");
        account_records.push(account(&account_ref));
        for c in 1..=contacts_per_account {
            let contact_ref = format!("con-{a:05}-{c}");
            contact_records.push(contact(&contact_ref, &account_ref));
            for g in 0..rng.random_range(0..3) {
                let gift_ref = format!("gift-{a:05}-{c}-{g}");
                gifts.push(opportunity(&gift_ref, &account_ref, &contact_ref));
            }
        }
    }

    Plan::new(vec![
        Stage::new(EntityKind::Account, account_records),
        Stage::new(EntityKind::Contact, contact_records),
        Stage::new(EntityKind::Opportunity, gifts),
    ])
}
