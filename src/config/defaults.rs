//! Default constants for stagelift configuration.
//!
//! All magic numbers are centralized here with documentation.

// =============================================================================
// Worker Pool Defaults
// =============================================================================

/// Default number of upload workers per stage.
/// Keep low: the target store serializes writes that touch related rows.
pub const DEFAULT_THREADS: usize = 1;

/// Default error budget per stage pass, shared evenly between workers.
pub const DEFAULT_MAX_ERRORS: usize = 1;

// =============================================================================
// Resume / Checkpoint Defaults
// =============================================================================

/// Save state every this many cumulative successes.
pub const DEFAULT_CHECKPOINT_EVERY: usize = 25;

/// Hard cap on full passes over a failing stage before giving up.
pub const DEFAULT_MAX_FULL_PASSES: usize = 5;

/// Default location of the persisted upload state.
pub const DEFAULT_STATE_PATH: &str = "data/uploader.json";

/// File name prefix for error dumps.
pub const ERROR_DUMP_PREFIX: &str = "upload-errors";

// =============================================================================
// Partial Run Defaults
// =============================================================================

/// Records kept per stage in a partial (sample) run.
pub const DEFAULT_PARTIAL_SAMPLE: usize = 100;
