//! Default constants for reconcile configuration.
//!
//! All magic numbers are centralized here with documentation.

// =============================================================================
// Merge Defaults
// =============================================================================

/// Suffix appended to a retired source slug before uniqueness numbering.
pub const DEFAULT_RETIRED_SLUG_SUFFIX: &str = "-old";

/// Retries per document when an optimistic list rewrite loses a race.
pub const DEFAULT_MAX_VERSION_RETRIES: u32 = 3;

// =============================================================================
// Storage Defaults (RocksDB)
// =============================================================================

/// Documents kept in the persistent store's read cache.
pub const DEFAULT_CACHE_CAPACITY: usize = 10_000;

/// Prefix for environment variable overrides, e.g. `RECONCILE_MERGE__HALT_ON_STEP_FAILURE`.
pub const ENV_PREFIX: &str = "RECONCILE_";

/// Separator between nested keys in environment variable names.
pub const ENV_SEPARATOR: &str = "__";
