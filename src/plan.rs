//! Upload plans: the records of every stage, in dependency order.

use crate::model::{EntityKind, ExternalKey, UploadRecord};
use crate::placeholder::Placeholder;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;

/// One entity kind's records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stage {
    pub kind: EntityKind,
    #[serde(default)]
    pub records: Vec<UploadRecord>,
    /// Re-run every record even if it already succeeded.
    #[serde(default)]
    pub hard: bool,
}

impl Stage {
    pub fn new(kind: EntityKind, records: Vec<UploadRecord>) -> Self {
        Self {
            kind,
            records,
            hard: false,
        }
    }

    pub fn hard(mut self) -> Self {
        self.hard = true;
        self
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Every stage of a migration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub stages: Vec<Stage>,
}

impl Plan {
    /// Build a plan, ordering stages by kind. Stages of the same kind are
    /// concatenated.
    pub fn new(stages: Vec<Stage>) -> Self {
        let mut merged: Vec<Stage> = Vec::new();
        let mut stages = stages;
        stages.sort_by_key(|stage| stage.kind);
        for stage in stages {
            match merged.last_mut() {
                Some(last) if last.kind == stage.kind => {
                    last.hard |= stage.hard;
                    last.records.extend(stage.records);
                }
                _ => merged.push(stage),
            }
        }
        Self { stages: merged }
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading plan from {}", path.display()))?;
        let plan: Plan = serde_json::from_str(&raw)
            .with_context(|| format!("parsing plan from {}", path.display()))?;
        Ok(Plan::new(plan.stages))
    }

    pub fn record_count(&self) -> usize {
        self.stages.iter().map(Stage::len).sum()
    }

    /// Reduce the plan to a sample for a partial run: the first `per_stage`
    /// records of each stage, plus every record (transitively) referenced by
    /// a kept record so the sample still resolves.
    pub fn sample(&self, per_stage: usize) -> Plan {
        let mut keep: Vec<Vec<bool>> = self
            .stages
            .iter()
            .map(|stage| {
                (0..stage.records.len())
                    .map(|index| index < per_stage)
                    .collect()
            })
            .collect();

        let mut required: BTreeSet<ExternalKey> = BTreeSet::new();
        loop {
            let before = required.len();
            for (stage, kept) in self.stages.iter().zip(&keep) {
                for (record, _) in stage.records.iter().zip(kept).filter(|(_, k)| **k) {
                    for (_, placeholder) in record.placeholders() {
                        if let Placeholder::NeedsReplacement(source_ref) = placeholder {
                            required.insert(ExternalKey::from(source_ref));
                        }
                    }
                }
            }
            let mut added = false;
            for (stage, kept) in self.stages.iter().zip(keep.iter_mut()) {
                for (record, flag) in stage.records.iter().zip(kept.iter_mut()) {
                    if *flag {
                        continue;
                    }
                    if record
                        .external_key()
                        .is_some_and(|key| required.contains(&key))
                    {
                        *flag = true;
                        added = true;
                    }
                }
            }
            if !added && required.len() == before {
                break;
            }
        }

        let stages = self
            .stages
            .iter()
            .zip(&keep)
            .map(|(stage, kept)| Stage {
                kind: stage.kind,
                hard: stage.hard,
                records: stage
                    .records
                    .iter()
                    .zip(kept)
                    .filter(|(_, k)| **k)
                    .map(|(record, _)| record.clone())
                    .collect(),
            })
            .collect();
        Plan { stages }
    }
}
