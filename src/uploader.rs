//! # Upload Scheduler
//!
//! Drives one stage of records to the target store with a pool of workers.
//! Each stage runs in bounded rounds: a full pass over every record that has
//! not yet succeeded, then a single-worker pass over only the records that
//! just failed. Rounds repeat until a pass comes back clean or the configured
//! number of full passes is spent. The last full pass runs on one worker
//! without an error budget, so a failing stage reports every record that is
//! still failing and never one that later recovered.
//!
//! Progress is tracked in [`UploadState`] and checkpointed to disk every
//! `checkpoint_every` successes, so an interrupted run resumes where it left
//! off without submitting anything twice.

use crate::client::{TargetStore, UpsertError, UpsertMode, UpsertOutcome};
use crate::config::{ConfigError, UploadConfig, ERROR_DUMP_PREFIX};
use crate::dump::dump_location;
use crate::model::{
    EntityKind, ExternalKey, IdMap, TargetId, UploadRecord, DEFAULT_AUDIT_FIELDS,
    IGNORABLE_REJECTED_FIELDS,
};
use crate::placeholder::Placeholder;
use crate::plan::{Plan, Stage};
use crate::resolver::resolve_declared;
use crate::state::{StateStore, UploadState};
use anyhow::Result;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

/// Whether a stage skips records that already succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Skip succeeded records and refuse to resubmit a mapped key.
    Resume,
    /// Re-run every record on every pass.
    Hard,
}

/// One record's failure in a pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordFailure {
    pub key: ExternalKey,
    pub error: String,
}

impl fmt::Display for RecordFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.key, self.error)
    }
}

/// What a completed stage did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageReport {
    pub stage: String,
    /// Records handed to the stage.
    pub records: usize,
    /// Successful upserts across all passes.
    pub uploaded: usize,
    pub skipped: usize,
    /// Failures that a later pass recovered from.
    pub recovered: usize,
    /// Full passes needed.
    pub passes: usize,
}

impl StageReport {
    fn new(stage: &str, records: usize) -> Self {
        Self {
            stage: stage.to_string(),
            records,
            ..Self::default()
        }
    }
}

#[derive(Debug, Error)]
pub enum StageError {
    #[error("stage {stage} yielded {count} errors:\n\tall errors: {dump}\n\tfirst error: {first}")]
    Failed {
        stage: String,
        count: usize,
        dump: String,
        first: String,
    },
    #[error("replacing ids for stage {stage} yielded {count} errors:\n\tall errors: {dump}\n\tfirst error: {first}")]
    Unresolved {
        stage: String,
        count: usize,
        dump: String,
        first: String,
    },
    #[error("stage {stage}: {count} records have no external key (first at position {first_position})")]
    MissingKeys {
        stage: String,
        count: usize,
        first_position: usize,
    },
    #[error("stage {kind} cannot run after {previous}")]
    OutOfOrder {
        kind: EntityKind,
        previous: EntityKind,
    },
    #[error("stage {stage} stopped on {key}: {error}")]
    Fatal {
        stage: String,
        key: ExternalKey,
        error: UpsertError,
    },
    #[error(transparent)]
    Config(#[from] ConfigError),
}

type Cleanup = Box<dyn FnOnce() -> Result<()> + Send>;

/// Shared bookkeeping, guarded by one lock.
struct Ledger {
    state: UploadState,
    stage: String,
    remaining: usize,
    uploaded: usize,
    skipped: usize,
    /// Bumped for every snapshot taken; orders writes to the state file.
    snapshots: u64,
}

impl Ledger {
    fn snapshot(&mut self) -> (u64, UploadState) {
        self.snapshots += 1;
        (self.snapshots, self.state.clone())
    }
}

struct PassOutcome {
    errors: Vec<RecordFailure>,
    /// Keys that were uploaded or skipped.
    settled: BTreeSet<ExternalKey>,
    /// A worker exhausted its budget and stopped the pass.
    stopped: bool,
}

#[derive(Default)]
struct WorkerOutcome {
    errors: Vec<RecordFailure>,
    settled: Vec<ExternalKey>,
    fatal: Option<(ExternalKey, UpsertError)>,
}

/// Concurrent, resumable uploader.
pub struct Uploader {
    config: UploadConfig,
    target: Arc<dyn TargetStore>,
    store: StateStore,
    ledger: Mutex<Ledger>,
    /// Sequence number of the newest snapshot on disk.
    persisted: Mutex<u64>,
    stop: AtomicBool,
    /// Serializes duplicate recovery across workers.
    duplicates: Mutex<()>,
    cleanups: Mutex<Vec<Cleanup>>,
}

impl Uploader {
    /// Uploader starting from `state`, persisting to `config.state_path`.
    pub fn new(
        config: UploadConfig,
        target: Arc<dyn TargetStore>,
        state: UploadState,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let store = StateStore::new(config.state_path.clone());
        Ok(Self {
            config,
            target,
            store,
            ledger: Mutex::new(Ledger {
                state,
                stage: String::new(),
                remaining: 0,
                uploaded: 0,
                skipped: 0,
                snapshots: 0,
            }),
            persisted: Mutex::new(0),
            stop: AtomicBool::new(false),
            duplicates: Mutex::new(()),
            cleanups: Mutex::new(Vec::new()),
        })
    }

    /// Uploader resuming from the state saved at `config.state_path`.
    pub fn open(config: UploadConfig, target: Arc<dyn TargetStore>) -> Result<Self> {
        config.validate()?;
        let state = StateStore::new(config.state_path.clone()).load(&config)?;
        info!(
            path = %config.state_path.display(),
            succeeded = state.succeeded.len(),
            failed = state.failed.len(),
            "loaded upload state"
        );
        Ok(Self::new(config, target, state)?)
    }

    pub fn config(&self) -> &UploadConfig {
        &self.config
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> UploadState {
        self.ledger.lock().state.clone()
    }

    pub fn id_map(&self) -> IdMap {
        self.ledger.lock().state.id_map.clone()
    }

    pub fn target_id(&self, key: &ExternalKey) -> Option<TargetId> {
        self.ledger.lock().state.target_id(key).cloned()
    }

    /// Register work to run once after the upload finishes, successful or not.
    pub fn add_cleanup<F>(&self, cleanup: F)
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        self.cleanups.lock().push(Box::new(cleanup));
    }

    pub fn save(&self) -> Result<()> {
        let (seq, snapshot) = self.ledger.lock().snapshot();
        self.persist(seq, &snapshot)
    }

    /// Write snapshot `seq` unless a newer one already reached disk.
    fn persist(&self, seq: u64, snapshot: &UploadState) -> Result<()> {
        let mut persisted = self.persisted.lock();
        if seq <= *persisted {
            debug!(seq, newest = *persisted, "skipping stale state snapshot");
            return Ok(());
        }
        self.store.save(snapshot)?;
        *persisted = seq;
        Ok(())
    }

    fn save_logged(&self) {
        if let Err(err) = self.save() {
            error!(error = %err, "failed to save upload state");
        }
    }

    fn run_cleanups(&self) {
        let cleanups: Vec<Cleanup> = std::mem::take(&mut *self.cleanups.lock());
        for cleanup in cleanups {
            if let Err(err) = cleanup() {
                error!(error = %err, "cleanup failed");
            }
        }
    }

    /// Run every stage of `plan` in order, then save and run the cleanups.
    #[instrument(skip_all, fields(stages = plan.stages.len()))]
    pub fn upload(&self, plan: &mut Plan) -> Result<Vec<StageReport>, StageError> {
        let result = self.run_all_stages(&mut plan.stages);
        self.save_logged();
        self.run_cleanups();
        match &result {
            Ok(_) => info!("upload has completed successfully"),
            Err(err) => error!(error = %err, "upload failed"),
        }
        result
    }

    /// Resolve and upload each stage in turn. Stages must be in stage order.
    pub fn run_all_stages(&self, stages: &mut [Stage]) -> Result<Vec<StageReport>, StageError> {
        for pair in stages.windows(2) {
            if pair[1].kind <= pair[0].kind {
                return Err(StageError::OutOfOrder {
                    kind: pair[1].kind,
                    previous: pair[0].kind,
                });
            }
        }

        let mut reports = Vec::new();
        for stage in stages.iter_mut() {
            if stage.is_empty() {
                debug!(stage = stage.kind.name(), "nothing to upload");
                continue;
            }
            reports.extend(self.run_entity_stage(stage)?);
            self.save_logged();
        }
        Ok(reports)
    }

    fn run_entity_stage(&self, stage: &mut Stage) -> Result<Vec<StageReport>, StageError> {
        let name = stage.kind.name();
        let mut reports = Vec::new();

        let failures = resolve_declared(&mut stage.records, &self.id_map());
        if let Some(first) = failures.first() {
            let dump = dump_location(
                self.config.dump_dir.as_deref(),
                &format!("{ERROR_DUMP_PREFIX}-replace-{name}"),
                &failures,
            );
            return Err(StageError::Unresolved {
                stage: name.to_string(),
                count: failures.len(),
                dump,
                first: first.to_string(),
            });
        }

        if let Some(field) = stage.kind.related_lookup_field() {
            reports.push(self.lookup_related_ids(stage, field)?);
        }

        let missing: Vec<usize> = stage
            .records
            .iter()
            .enumerate()
            .filter(|(_, record)| record.external_key().is_none())
            .map(|(position, _)| position)
            .collect();
        if let Some(&first_position) = missing.first() {
            return Err(StageError::MissingKeys {
                stage: name.to_string(),
                count: missing.len(),
                first_position,
            });
        }

        let mode = if stage.hard { RunMode::Hard } else { RunMode::Resume };
        let target = &self.target;
        let mut always_omitted: Vec<&str> = DEFAULT_AUDIT_FIELDS.to_vec();
        always_omitted.extend(stage.kind.not_updatable_fields());
        let always_omitted = &always_omitted;
        reports.push(self.run_stage(
            name,
            &mut stage.records,
            record_key,
            |record, upsert_mode| {
                let omitted = upsert_mode.omitted_fields(always_omitted);
                let outgoing = if omitted.is_empty() {
                    Cow::Borrowed(&*record)
                } else {
                    Cow::Owned(record.without_fields(&omitted))
                };
                target.upsert(&outgoing).map(UpsertOutcome::Uploaded)
            },
            mode,
        )?);
        Ok(reports)
    }

    /// Replace `field` on every record with the id the store derived from it.
    ///
    /// Runs as its own hard stage keyed `<id>-CDL`; the rewrite happens only
    /// after every lookup succeeded so retries always see the original ids.
    fn lookup_related_ids(&self, stage: &mut Stage, field: &str) -> Result<StageReport, StageError> {
        let name = format!("{}-lookup", stage.kind.name());
        let lookup_key = |record: &UploadRecord| {
            ExternalKey::new(format!("{}-CDL", record.text(field).unwrap_or_default()))
        };
        let target = &self.target;
        let report = self.run_stage(
            &name,
            &mut stage.records,
            lookup_key,
            |record, _| {
                let id = match record.reference(field) {
                    Some(placeholder) => placeholder
                        .concrete()
                        .map_err(|err| UpsertError::Other(err.to_string()))?
                        .clone(),
                    None => return Err(UpsertError::Other(format!("{field} is missing"))),
                };
                target.lookup_related_id(&id).map(UpsertOutcome::Uploaded)
            },
            RunMode::Hard,
        )?;

        let id_map = self.id_map();
        for record in &mut stage.records {
            let key = lookup_key(record);
            if let Some(related) = id_map.get(&key) {
                record.set_reference(field, Placeholder::Concrete(related.clone()));
            }
        }
        Ok(report)
    }

    /// Upload `records` as the stage `name`.
    ///
    /// `key_of` names each record's external key; `upsert` submits one record
    /// and may mutate it. Returns once every record has succeeded (or been
    /// skipped), or fails with the errors of the last round dumped to disk.
    #[instrument(skip_all, fields(stage = name, records = records.len()))]
    pub fn run_stage<T, K, U>(
        &self,
        name: &str,
        records: &mut [T],
        key_of: K,
        upsert: U,
        mode: RunMode,
    ) -> Result<StageReport, StageError>
    where
        T: Send,
        K: Fn(&T) -> ExternalKey + Sync,
        U: Fn(&mut T, UpsertMode) -> std::result::Result<UpsertOutcome, UpsertError> + Sync,
    {
        let mut report = StageReport::new(name, records.len());
        {
            let mut ledger = self.ledger.lock();
            ledger.stage = name.to_string();
            ledger.uploaded = 0;
            ledger.skipped = 0;
        }
        info!(threads = self.config.threads, ?mode, "starting stage");

        let mut outstanding: Vec<RecordFailure> = Vec::new();
        let mut clean = false;

        for pass in 1..=self.config.max_full_passes {
            report.passes = pass;
            // The last full pass runs on one worker and tries every record.
            let last = pass == self.config.max_full_passes;
            let (workers, budget) = if last {
                (1, None)
            } else {
                let threads = self.config.threads;
                (threads, Some(self.config.errors_per_worker(threads)))
            };

            let pending: Vec<&mut T> = match mode {
                RunMode::Hard => records.iter_mut().collect(),
                RunMode::Resume => {
                    let ledger = self.ledger.lock();
                    records
                        .iter_mut()
                        .filter(|record| !ledger.state.is_succeeded(&key_of(record)))
                        .collect()
                }
            };
            if pending.is_empty() {
                clean = true;
                break;
            }

            let full = self.run_pass(name, pending, &key_of, &upsert, mode, workers, budget, pass)?;
            if full.errors.is_empty() && !full.stopped {
                clean = true;
                break;
            }
            warn!(
                pass,
                errors = full.errors.len(),
                stopped_early = full.stopped,
                "pass had errors; retrying the failed records"
            );

            let failed_keys: BTreeSet<ExternalKey> =
                full.errors.iter().map(|failure| failure.key.clone()).collect();
            let failed: Vec<&mut T> = records
                .iter_mut()
                .filter(|record| failed_keys.contains(&key_of(record)))
                .collect();
            let retry = self.run_pass(
                name,
                failed,
                &key_of,
                &upsert,
                mode,
                1,
                Some(self.config.errors_per_worker(1)),
                pass,
            )?;
            report.recovered += failed_keys
                .iter()
                .filter(|key| retry.settled.contains(*key))
                .count();

            // Latest error of every record that has not recovered. Records the
            // errors-only pass never reached keep their full-pass error.
            let mut latest: BTreeMap<ExternalKey, RecordFailure> = full
                .errors
                .into_iter()
                .filter(|failure| !retry.settled.contains(&failure.key))
                .map(|failure| (failure.key.clone(), failure))
                .collect();
            for failure in retry.errors {
                latest.insert(failure.key.clone(), failure);
            }
            outstanding = latest.into_values().collect();

            // A budget stop left records untried; the next pass picks them up.
            if outstanding.is_empty() && !full.stopped {
                clean = true;
                break;
            }
        }

        {
            let ledger = self.ledger.lock();
            report.uploaded = ledger.uploaded;
            report.skipped = ledger.skipped;
        }
        self.save_logged();

        if clean {
            info!(
                uploaded = report.uploaded,
                skipped = report.skipped,
                recovered = report.recovered,
                passes = report.passes,
                "stage done"
            );
            return Ok(report);
        }

        let dump = dump_location(
            self.config.dump_dir.as_deref(),
            &format!("{ERROR_DUMP_PREFIX}-{name}"),
            &outstanding,
        );
        Err(StageError::Failed {
            stage: name.to_string(),
            count: outstanding.len(),
            dump,
            first: outstanding
                .first()
                .map(ToString::to_string)
                .unwrap_or_default(),
        })
    }

    /// One pass over `pending` with `workers` workers, each stopping after
    /// `budget` failures (`None` for no limit). Collects every recoverable
    /// failure; a non-recoverable one aborts the stage.
    #[allow(clippy::too_many_arguments)]
    fn run_pass<T, K, U>(
        &self,
        name: &str,
        mut pending: Vec<&mut T>,
        key_of: &K,
        upsert: &U,
        mode: RunMode,
        workers: usize,
        budget: Option<usize>,
        pass: usize,
    ) -> Result<PassOutcome, StageError>
    where
        T: Send,
        K: Fn(&T) -> ExternalKey + Sync,
        U: Fn(&mut T, UpsertMode) -> std::result::Result<UpsertOutcome, UpsertError> + Sync,
    {
        self.stop.store(false, Ordering::SeqCst);
        self.ledger.lock().remaining = pending.len();
        self.shuffle(&mut pending, pass);

        debug!(pass, workers, ?budget, "starting pass");
        let workers = workers.max(1);
        let budget = budget.map_or(usize::MAX, |budget| budget.max(1));
        let previously_failed = self.ledger.lock().state.failed.clone();

        let mut partitions: Vec<Vec<&mut T>> = (0..workers).map(|_| Vec::new()).collect();
        for (position, record) in pending.into_iter().enumerate() {
            partitions[position % workers].push(record);
        }
        for partition in &mut partitions {
            partition.sort_by_key(|record| !previously_failed.contains(&key_of(record)));
        }

        let outcomes: Vec<WorkerOutcome> = std::thread::scope(|scope| {
            let handles: Vec<_> = partitions
                .into_iter()
                .map(|partition| {
                    scope.spawn(move || self.run_worker(partition, key_of, upsert, mode, budget))
                })
                .collect();
            let mut outcomes = Vec::with_capacity(handles.len());
            for handle in handles {
                match handle.join() {
                    Ok(outcome) => outcomes.push(outcome),
                    Err(panic) => {
                        self.save_logged();
                        std::panic::resume_unwind(panic);
                    }
                }
            }
            outcomes
        });

        let mut errors = Vec::new();
        let mut settled = BTreeSet::new();
        for outcome in outcomes {
            if let Some((key, error)) = outcome.fatal {
                self.save_logged();
                return Err(StageError::Fatal {
                    stage: name.to_string(),
                    key,
                    error,
                });
            }
            errors.extend(outcome.errors);
            settled.extend(outcome.settled);
        }
        Ok(PassOutcome {
            errors,
            settled,
            stopped: self.stop.load(Ordering::SeqCst),
        })
    }

    fn shuffle<T>(&self, items: &mut [T], pass: usize) {
        if !self.config.shuffle {
            return;
        }
        let mut rng = match self.config.shuffle_seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(pass as u64)),
            None => StdRng::from_os_rng(),
        };
        items.shuffle(&mut rng);
    }

    fn run_worker<T, K, U>(
        &self,
        partition: Vec<&mut T>,
        key_of: &K,
        upsert: &U,
        mode: RunMode,
        budget: usize,
    ) -> WorkerOutcome
    where
        K: Fn(&T) -> ExternalKey,
        U: Fn(&mut T, UpsertMode) -> std::result::Result<UpsertOutcome, UpsertError>,
    {
        let mut outcome = WorkerOutcome::default();
        for record in partition {
            if outcome.errors.len() >= budget {
                self.stop.store(true, Ordering::SeqCst);
                break;
            }
            if self.stop.load(Ordering::SeqCst) {
                break;
            }

            let key = key_of(record);
            if mode == RunMode::Resume {
                if let Some(existing) = self.target_id(&key) {
                    self.record_failure(&key);
                    outcome.errors.push(RecordFailure {
                        error: format!("duplicate ref {key}: already uploaded as {existing}"),
                        key,
                    });
                    continue;
                }
            }

            match self.upsert_with_recovery(record, &key, upsert) {
                Ok(UpsertOutcome::Uploaded(id)) => {
                    self.record_success(key.clone(), id);
                    outcome.settled.push(key);
                }
                Ok(UpsertOutcome::Skipped(reason)) => {
                    self.record_skip(&key, &reason);
                    outcome.settled.push(key);
                }
                Err(err) if !err.is_recoverable() => {
                    self.record_failure(&key);
                    self.stop.store(true, Ordering::SeqCst);
                    outcome.fatal = Some((key, err));
                    break;
                }
                Err(err) => {
                    self.record_failure(&key);
                    outcome.errors.push(RecordFailure {
                        key,
                        error: err.to_string(),
                    });
                }
            }
        }
        outcome
    }

    /// Upsert with the two in-place recoveries: delete colliding records and
    /// retry once, or retry once without the rejected fields. The stage's
    /// `upsert` decides what else a forced retry leaves out.
    fn upsert_with_recovery<T, U>(
        &self,
        record: &mut T,
        key: &ExternalKey,
        upsert: &U,
    ) -> std::result::Result<UpsertOutcome, UpsertError>
    where
        U: Fn(&mut T, UpsertMode) -> std::result::Result<UpsertOutcome, UpsertError>,
    {
        match upsert(record, UpsertMode::Normal) {
            Err(UpsertError::DuplicateExternalId { existing, .. }) => {
                let _serial = self.duplicates.lock();
                self.delete_duplicates(key, &existing)?;
                match upsert(record, UpsertMode::Normal) {
                    Err(UpsertError::DuplicateExternalId { existing, .. }) => {
                        Err(UpsertError::Other(format!(
                            "duplicate external id {key} persists after deleting duplicates (now {existing:?})"
                        )))
                    }
                    other => other,
                }
            }
            Err(UpsertError::FieldRejected {
                fields,
                returned_id: Some(id),
                ..
            }) if !fields.is_empty()
                && fields
                    .iter()
                    .all(|field| IGNORABLE_REJECTED_FIELDS.contains(&field.as_str())) =>
            {
                debug!(%key, ?fields, "ignoring rejected fields");
                Ok(UpsertOutcome::Uploaded(id))
            }
            Err(UpsertError::FieldRejected { fields, .. }) => {
                debug!(%key, ?fields, "retrying without rejected and audit fields");
                upsert(record, UpsertMode::OmitFields(fields))
            }
            other => other,
        }
    }

    fn delete_duplicates(
        &self,
        key: &ExternalKey,
        existing: &[TargetId],
    ) -> std::result::Result<(), UpsertError> {
        if existing.is_empty() {
            return Err(UpsertError::Other(format!(
                "duplicate external id {key} reported without conflicting ids"
            )));
        }
        let results = self.target.delete(existing)?;
        for result in &results {
            if !result.is_ok() {
                return Err(UpsertError::Other(format!(
                    "error deleting duplicate {} of {key}: {}",
                    result.id,
                    result.message.as_deref().unwrap_or_default()
                )));
            }
        }
        info!(%key, deleted = existing.len(), "deleted duplicate records");
        Ok(())
    }

    fn record_success(&self, key: ExternalKey, id: TargetId) {
        let snapshot = {
            let mut ledger = self.ledger.lock();
            ledger.state.mark_succeeded(key, id);
            ledger.remaining = ledger.remaining.saturating_sub(1);
            ledger.uploaded += 1;
            self.report_progress(&ledger);
            let succeeded = ledger.state.succeeded.len();
            (succeeded % self.config.checkpoint_every == 0).then(|| ledger.snapshot())
        };
        if let Some((seq, snapshot)) = snapshot {
            if let Err(err) = self.persist(seq, &snapshot) {
                error!(error = %err, "failed to checkpoint upload state");
            }
        }
    }

    fn record_failure(&self, key: &ExternalKey) {
        let mut ledger = self.ledger.lock();
        ledger.state.mark_failed(key.clone());
        ledger.remaining = ledger.remaining.saturating_sub(1);
        self.report_progress(&ledger);
    }

    fn record_skip(&self, key: &ExternalKey, reason: &str) {
        let mut ledger = self.ledger.lock();
        ledger.remaining = ledger.remaining.saturating_sub(1);
        ledger.skipped += 1;
        debug!(%key, reason, "skipped record");
    }

    fn report_progress(&self, ledger: &Ledger) {
        if !self.config.wet_run {
            return;
        }
        info!(
            stage = %ledger.stage,
            succeeded = ledger.state.succeeded.len(),
            failed = ledger.state.failed.len(),
            remaining = ledger.remaining,
            "progress"
        );
    }
}

fn record_key(record: &UploadRecord) -> ExternalKey {
    record.external_key().unwrap_or_else(|| ExternalKey::new(""))
}
