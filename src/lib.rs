//! # Stagelift
//!
//! Staged, resumable migration of records into a remote record store.
//!
//! Records reference each other by source-system refs. Because the store
//! assigns its own ids on upload, those references are carried as
//! [`Placeholder`]s and resolved stage by stage, in dependency order, against
//! the ids collected by earlier stages. The [`Uploader`] drives each stage
//! with a worker pool, tolerates a bounded number of failures, retries the
//! failures on their own, and persists its progress so an interrupted run can
//! resume without submitting anything twice.
//!
//! Contacts are grouped into households beforehand with a union-find over
//! relationship edges ([`household`]).

pub mod client;
pub mod config;
pub mod dump;
pub mod household;
pub mod model;
pub mod placeholder;
pub mod plan;
pub mod resolver;
pub mod state;
pub mod uploader;

// Re-export main types for convenience
pub use client::{MemoryTargetStore, TargetStore, UpsertError, UpsertMode, UpsertOutcome};
pub use config::{ConfigError, ConfigOverrides, UploadConfig};
pub use household::{cluster_households, ClusterError, HouseholdCluster, Households, RelationshipEdge};
pub use model::{EntityKind, ExternalKey, FieldValue, IdMap, SourceRef, TargetId, UploadRecord};
pub use placeholder::{Placeholder, ResolveError};
pub use plan::{Plan, Stage};
pub use resolver::{resolve_all, resolve_declared, ResolveFailure};
pub use state::{StateStore, UploadState};
pub use uploader::{RecordFailure, RunMode, StageError, StageReport, Uploader};
