//! Core value objects for the cutting planner.
//!
//! Everything on the wire is camelCase JSON; everything internal is plain
//! owned data. Ownership follows the planning hierarchy: a
//! [`Solution`] owns its [`CuttingPlan`]s, each plan owns its [`Cut`]s and the
//! remainder records it produced or consumed. Remainders that are still
//! consumable live in the per-group pool of the remainder manager; once a plan
//! consumes them, the pseudo copies recorded on the plan are the only trace.
//!
//! The remainder life cycle is a small state machine:
//!
//! ```text
//!   (created) --length < threshold--> Waste      (terminal)
//!          \--length ≥ threshold--> Pending --finalize--> Real (terminal)
//!                                         \--consumed--> Pseudo (terminal)
//! ```
//!
//! Transitions happen only through the methods on [`Remainder`]; there is no
//! way to move a terminal state back to `Pending`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::module_pool::UsageRollup;
use crate::stats::{ConsistencyReport, GroupStats, LossRateValidation, RequirementsValidation};
use crate::validate::ValidationReport;
use crate::{Mm, LENGTH_TOLERANCE_MM};

// ============================================================================
// Demand and supply
// ============================================================================

/// One line of demand: a finished piece to produce `quantity` times.
///
/// Immutable after admission; the engine only ever reads these.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DesignBar {
    pub id: String,
    /// Length in millimeters.
    pub length: Mm,
    /// Required count.
    pub quantity: u32,
    pub cross_section: f64,
    #[serde(default)]
    pub specification: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub part_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_id: Option<String>,
}

/// One element of the stock catalog: a purchasable module length.
///
/// The catalog is shared across groups; an acquired bar is stamped with the
/// acquiring group's specification and cross-section (see
/// [`crate::module_pool::ModulePool`]).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ModuleStock {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub length: Mm,
}

/// A module bar acquired from the pool for one group.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ModuleBar {
    pub id: String,
    pub specification: String,
    pub cross_section: f64,
    pub length: Mm,
    pub used_at: DateTime<Utc>,
}

// ============================================================================
// Constraints
// ============================================================================

/// Per-job tunables.
///
/// `target_loss_rate` is advisory only; the planner never terminates early on
/// reaching it. The post-pass tunables carry serde defaults so the four-field
/// wire body deserializes unchanged.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Constraints {
    /// Offcuts shorter than this are waste; longer ones become remainders. mm.
    pub waste_threshold: Mm,
    /// Advisory loss-rate goal, percent.
    pub target_loss_rate: f64,
    /// Wall-clock budget for the engine, milliseconds.
    pub time_limit: u64,
    /// Maximum number of pieces welded end-to-end; 1 forbids welding.
    pub max_welding_segments: u32,
    /// Iteration cap per demand; defaults to `100 × demand count` when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_iterations_per_demand: Option<u32>,
    /// Equivalent-material cost charged per weld eliminated by the post-pass.
    #[serde(default = "default_weld_cost")]
    pub weld_cost_mm: Mm,
    /// Minimum benefit a post-pass swap must clear to execute.
    #[serde(default = "default_benefit_floor")]
    pub swap_benefit_floor_mm: Mm,
}

fn default_weld_cost() -> Mm {
    50.0
}

fn default_benefit_floor() -> Mm {
    50.0
}

/// Constraint construction failures. These fail closed: a job with an invalid
/// constraint set never reaches the planner.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConstraintError {
    #[error("waste threshold must be positive (got {0} mm)")]
    NonPositiveThreshold(String),
    #[error("max welding segments must be at least 1 (got {0})")]
    SegmentsBelowOne(u32),
    #[error("time limit must be positive (got {0} ms)")]
    NonPositiveTimeLimit(u64),
}

impl Constraints {
    /// Build a validated constraint set.
    pub fn new(
        waste_threshold: Mm,
        target_loss_rate: f64,
        time_limit: u64,
        max_welding_segments: u32,
    ) -> Result<Self, ConstraintError> {
        let c = Self {
            waste_threshold,
            target_loss_rate,
            time_limit,
            max_welding_segments,
            max_iterations_per_demand: None,
            weld_cost_mm: default_weld_cost(),
            swap_benefit_floor_mm: default_benefit_floor(),
        };
        c.validate()?;
        Ok(c)
    }

    /// Re-check the fail-closed rules (used after deserialization, where the
    /// constructor is bypassed).
    pub fn validate(&self) -> Result<(), ConstraintError> {
        if !(self.waste_threshold > 0.0) {
            return Err(ConstraintError::NonPositiveThreshold(format!(
                "{}",
                self.waste_threshold
            )));
        }
        if self.max_welding_segments < 1 {
            return Err(ConstraintError::SegmentsBelowOne(self.max_welding_segments));
        }
        if self.time_limit == 0 {
            return Err(ConstraintError::NonPositiveTimeLimit(self.time_limit));
        }
        Ok(())
    }
}

// ============================================================================
// Remainders
// ============================================================================

/// Life-cycle state of a retained offcut.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RemainderState {
    /// In the pool, still consumable by later demand within its group.
    Pending,
    /// Survived planning unconsumed; charged to loss. Terminal.
    Real,
    /// Audit copy of a consumed remainder; not charged to loss. Terminal.
    Pseudo,
    /// Below the waste threshold; never pooled. Terminal.
    Waste,
}

impl RemainderState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, RemainderState::Pending)
    }
}

/// An offcut retained in a per-group pool.
///
/// `length` never changes after creation; consuming a remainder produces a
/// fresh child for the offcut rather than mutating the parent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Remainder {
    /// Namespaced by group key: `<groupKey>_<letter><number>`.
    pub id: String,
    pub length: Mm,
    pub group_key: String,
    /// Ids of the source pieces this offcut came from, joined by `+` on the
    /// wire for combination children.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    /// Full provenance chain, oldest first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub source_chain: Vec<String>,
    pub created_at: DateTime<Utc>,
    #[serde(rename = "type")]
    pub state: RemainderState,
    pub consumed: bool,
}

impl Remainder {
    /// Promote a pool survivor to its terminal retained state. A no-op on
    /// anything already terminal, so finalization stays idempotent.
    pub fn promote_to_real(&mut self) {
        if self.state == RemainderState::Pending {
            self.state = RemainderState::Real;
        }
    }

    /// Mark as consumed. Only a pending remainder can be consumed.
    pub fn mark_pseudo(&mut self) {
        if self.state == RemainderState::Pending {
            self.state = RemainderState::Pseudo;
            self.consumed = true;
        }
    }

    /// Whether this offcut is retained (pool or finalized), as opposed to
    /// waste or an audit copy.
    pub fn is_retained(&self) -> bool {
        matches!(self.state, RemainderState::Pending | RemainderState::Real)
    }
}

// ============================================================================
// Plans and solutions
// ============================================================================

/// Number of design pieces of one length produced from a single source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Cut {
    pub design_id: String,
    pub length: Mm,
    pub count: u32,
}

/// What a cutting plan consumed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "sourceType", rename_all = "lowercase")]
pub enum PlanSource {
    #[serde(rename_all = "camelCase")]
    Module { id: String, length: Mm },
    #[serde(rename_all = "camelCase")]
    Remainder { ids: Vec<String>, total_length: Mm },
}

impl PlanSource {
    /// Display id: the module id, or the combination's ids joined by `+`.
    pub fn source_id(&self) -> String {
        match self {
            PlanSource::Module { id, .. } => id.clone(),
            PlanSource::Remainder { ids, .. } => ids.join("+"),
        }
    }

    pub fn source_length(&self) -> Mm {
        match self {
            PlanSource::Module { length, .. } => *length,
            PlanSource::Remainder { total_length, .. } => *total_length,
        }
    }

    pub fn is_module(&self) -> bool {
        matches!(self, PlanSource::Module { .. })
    }
}

/// One consumption event: a source, the cuts taken from it, and where the
/// offcut went.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CuttingPlan {
    pub source: PlanSource,
    pub cuts: Vec<Cut>,
    /// Pseudo copies of the remainders this plan consumed (non-empty only for
    /// remainder-sourced plans).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub consumed_remainders: Vec<Remainder>,
    /// Retained child remainder(s) produced by this plan.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub new_remainders: Vec<Remainder>,
    /// Waste charged to this plan, mm.
    pub waste: Mm,
    /// Source pieces welded end-to-end: 1 for a single module, N for an N-way
    /// remainder combination.
    pub welding_count: u32,
}

impl CuttingPlan {
    /// Total design length produced by this plan.
    pub fn design_length(&self) -> Mm {
        self.cuts
            .iter()
            .map(|c| c.length * f64::from(c.count))
            .sum()
    }

    /// Total length of retained children.
    pub fn children_length(&self) -> Mm {
        self.new_remainders.iter().map(|r| r.length).sum()
    }

    /// Exclusivity rule: a plan charges waste **xor** retains a child.
    pub fn exclusivity_conflict(&self) -> bool {
        self.waste > LENGTH_TOLERANCE_MM && self.children_length() > LENGTH_TOLERANCE_MM
    }

    /// Repair an exclusivity conflict by keeping whichever term is larger.
    /// Returns the ids of child remainders that were dropped (the caller must
    /// evict them from the pool as well).
    pub fn reconcile_exclusivity(&mut self) -> Vec<String> {
        if !self.exclusivity_conflict() {
            return Vec::new();
        }
        let children = self.children_length();
        if self.waste >= children {
            let dropped = self.new_remainders.drain(..).map(|r| r.id).collect();
            dropped
        } else {
            self.waste = 0.0;
            Vec::new()
        }
    }
}

/// One group's ordered plans plus the reducer's sums for that group.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Solution {
    pub group_key: String,
    pub plans: Vec<CuttingPlan>,
    pub stats: GroupStats,
}

// ============================================================================
// Job input and result
// ============================================================================

/// Complete job input snapshot, owned by the task that runs it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OptimizeInput {
    pub design_steels: Vec<DesignBar>,
    pub module_steels: Vec<ModuleStock>,
    pub constraints: Constraints,
}

/// Stamp indicating the result has passed finalization and is safe to
/// present.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingStatus {
    pub is_completed: bool,
    pub remainders_finalized: bool,
    pub ready_for_rendering: bool,
}

/// Map from group key to solution plus the global reductions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OptimizationResult {
    pub solutions: std::collections::BTreeMap<String, Solution>,
    pub total_loss_rate: f64,
    pub total_module_used: u64,
    pub total_material: Mm,
    pub total_waste: Mm,
    pub total_real_remainder: Mm,
    pub total_pseudo_remainder: Mm,
    /// Engine wall time, milliseconds.
    pub execution_time: u64,
    pub constraint_validation: ValidationReport,
    pub loss_rate_validation: LossRateValidation,
    pub requirements_validation: RequirementsValidation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consistency_report: Option<ConsistencyReport>,
    pub module_steel_usage: UsageRollup,
    pub processing_status: ProcessingStatus,
}

// ============================================================================
// Tests
// ============================================================================
