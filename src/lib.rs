//! Crate root: public surface, core aliases, and engine-wide invariants
//!
//! This module is the **single canonical entry-point** for downstream users of
//! the library. It centralizes the millimeter length alias, the shared
//! tolerance constant, and re-exports the main submodules that implement the
//! cutting planner and its task-addressed service surface.
//!
//! ## Invariants (engine-wide)
//!
//! - **Lengths.** All lengths are millimeters, carried as integer-valued
//!   `f64`. Comparisons against thresholds use a fixed ±1 mm tolerance
//!   ([`LENGTH_TOLERANCE_MM`]) to absorb arithmetic noise. We **forbid
//!   unsafe** throughout the crate.
//!
//! - **Group isolation.** Demand is partitioned by
//!   `(specification, round(crossSection))`. A remainder never crosses its
//!   group boundary; planners only ever touch their own remainder pool and
//!   module pool. Cross-group state exists only after the single-threaded
//!   merge that precedes finalization.
//!
//! - **Remainder life cycle.** An offcut is classified exactly once at
//!   creation (waste below the threshold, pending otherwise), may be consumed
//!   while planning is live (pending → pseudo), and is promoted to real only
//!   by the one-shot finalization sweep after every group has completed.
//!   Illegal transitions (e.g. real → pending) are not expressible.
//!
//! - **Material conservation.** For every group,
//!   `totalMaterial = designLength + waste + realRemainder` within the length
//!   tolerance. The statistics reducer re-derives every aggregate from the
//!   plans and surfaces any divergence as a consistency report instead of
//!   silently trusting per-phase counters.
//!
//! These invariants are enforced across the submodules; violations surface as
//! **precise errors** or consistency reports, never as corrupted results.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]

/// Environment-driven configuration (`HGJ_` prefix) and engine defaults.
pub mod config;
/// Parallel driver: group fan-out, merge, finalization, result assembly.
pub mod driver;
/// Group keys and the display-id assignment scheme.
pub mod group;
/// Core value objects: bars, constraints, remainders, plans, solutions.
pub mod model;
/// Per-group module (stock) pool and the procurement roll-up.
pub mod module_pool;
/// Per-group cutting planner (demand loop over remainders and modules).
pub mod planner;
/// MW-CD post-pass: swap a large retained remainder for a welded plan.
pub mod postpass;
/// Per-group remainder pool, id allocation, and the combination search.
pub mod remainder;
/// Statistics reducer and the material-conservation verifier.
pub mod stats;
/// Async task supervisor: create / run / progress / cancel / expire.
pub mod task;
/// Pre-flight constraint validator.
pub mod validate;

// ============================================================================
// Canonical aliases and root-level re-exports
// ============================================================================

/// Length in millimeters (integer-valued by convention).
pub type Mm = f64;

/// Fixed tolerance for length comparisons, in millimeters.
///
/// All threshold and conservation checks in the crate compare through this
/// constant rather than testing floats for exact equality.
pub const LENGTH_TOLERANCE_MM: Mm = 1.0;

pub use crate::driver::{optimize, CancelFlag, EngineError, ProgressSink};
pub use crate::model::{
    Constraints, Cut, CuttingPlan, DesignBar, ModuleStock, OptimizationResult, OptimizeInput,
    PlanSource, Remainder, RemainderState, Solution,
};
pub use crate::task::{Task, TaskStatus, TaskStore, TaskSupervisor};
pub use crate::validate::{validate_input, ValidationReport};
