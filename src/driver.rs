//! Parallel driver.
//!
//! Demand is grouped by `(specification, round(crossSection))` and every group
//! runs as an independent unit of work with its own remainder manager and
//! module pool. The fan-out runs on the rayon pool. Everything after the
//! barrier is single-threaded: merging the private managers, the one-shot
//! finalization sweep, the plan-level status rewrite, and the statistics
//! reduction.
//!
//! A group that panics yields an empty solution and a recorded error; its
//! peers are unaffected. Time-budget expiry is a soft stop: partial plans
//! still flow through finalization and statistics, with the shortfall visible
//! in the requirements validation.

use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rayon::prelude::*;
use tracing::{error, info, warn};

use crate::group::{assign_display_ids, catalog_lengths, key_of};
use crate::model::{
    DesignBar, OptimizationResult, OptimizeInput, ProcessingStatus, Solution,
};
use crate::module_pool::UsageRollup;
use crate::planner::{GroupPlan, GroupPlanner};
use crate::postpass::improve_group;
use crate::remainder::RemainderManager;
use crate::stats::{
    reduce_global, reduce_group, validate_loss_rate, validate_requirements, ConsistencyIssue,
    ConsistencyReport, ConsistencySeverity,
};
use crate::validate::{validate_input, ValidationReport};

// ============================================================================
// Cancellation and progress
// ============================================================================

/// Shared cancellation flag, observed by the planners' inner loops.
#[derive(Clone, Debug, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Advisory progress receiver. Reports may arrive from worker threads; the
/// supervisor enforces monotonicity, so sinks can stay dumb.
pub trait ProgressSink: Send + Sync {
    fn report(&self, percent: u8, message: &str);
}

/// Sink for callers that do not care about progress.
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&self, _percent: u8, _message: &str) {}
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Pre-flight validation failed; the report is returned verbatim and no
    /// planning work was started.
    #[error("constraint validation failed")]
    InvalidConstraints(ValidationReport),
    /// The job was cancelled while planning.
    #[error("job cancelled")]
    Cancelled,
}

// ============================================================================
// The engine entry point
// ============================================================================

struct GroupOutcome {
    key: String,
    plan: GroupPlan,
    error: Option<String>,
}

/// Run one full optimization job.
pub fn optimize(
    input: &OptimizeInput,
    progress: &dyn ProgressSink,
    cancel: &CancelFlag,
) -> Result<OptimizationResult, EngineError> {
    let started = Instant::now();

    let validation = validate_input(&input.design_steels, &input.module_steels, &input.constraints);
    if !validation.is_valid {
        return Err(EngineError::InvalidConstraints(validation));
    }
    progress.report(10, "validation passed");

    let mut designs = input.design_steels.clone();
    assign_display_ids(&mut designs);

    // Group demand; BTreeMap keeps group order deterministic.
    let mut groups: BTreeMap<String, Vec<DesignBar>> = BTreeMap::new();
    for bar in &designs {
        groups.entry(key_of(bar)).or_default().push(bar.clone());
    }
    let catalog = catalog_lengths(input.module_steels.iter().map(|m| m.length));
    let deadline = started + Duration::from_millis(input.constraints.time_limit);

    info!(
        groups = groups.len(),
        designs = designs.len(),
        catalog = catalog.len(),
        "optimization started"
    );

    let total_groups = groups.len().max(1);
    let completed = AtomicUsize::new(0);
    let constraints = &input.constraints;

    let mut outcomes: Vec<GroupOutcome> = groups
        .into_par_iter()
        .map(|(key, members)| {
            let spec = members
                .first()
                .map(|d| d.specification.clone())
                .unwrap_or_default();
            let cross_section = members.first().map(|d| d.cross_section).unwrap_or(0.0);
            let run = catch_unwind(AssertUnwindSafe(|| {
                let mut plan = GroupPlanner::new(
                    key.clone(),
                    spec.clone(),
                    cross_section,
                    catalog.clone(),
                    constraints,
                    Some(deadline),
                    cancel.clone(),
                )
                .run(&members);
                improve_group(&mut plan, constraints);
                plan
            }));

            let outcome = match run {
                Ok(plan) => GroupOutcome {
                    key: key.clone(),
                    plan,
                    error: None,
                },
                Err(panic) => {
                    let message = panic
                        .downcast_ref::<&str>()
                        .map(|s| (*s).to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".into());
                    error!(group = %key, error = %message, "group planner failed");
                    GroupOutcome {
                        key: key.clone(),
                        plan: empty_group(&key, constraints),
                        error: Some(message),
                    }
                }
            };

            let done = completed.fetch_add(1, Ordering::Relaxed) + 1;
            let pct = 10 + (75 * done / total_groups) as u8;
            progress.report(pct, &format!("group {} planned", outcome.key));
            outcome
        })
        .collect();

    if cancel.is_cancelled() {
        return Err(EngineError::Cancelled);
    }

    if outcomes.iter().any(|o| o.plan.timed_out) {
        warn!("time budget expired before all demand was satisfied");
    }

    // Barrier passed: merge the private managers into the shared view and run
    // the one-shot finalization sweep.
    outcomes.sort_by(|a, b| a.key.cmp(&b.key));
    let mut shared = RemainderManager::new(input.constraints.waste_threshold);
    for outcome in &mut outcomes {
        let private = std::mem::replace(
            &mut outcome.plan.manager,
            RemainderManager::new(input.constraints.waste_threshold),
        );
        shared.merge(private);
    }
    let sweep = shared.finalize();
    progress.report(90, "remainders finalized");
    info!(
        promoted = sweep.promoted,
        real_total = sweep.real_total,
        "finalization sweep complete"
    );

    // Plan-level status rewrite: the finalized type wins everywhere a plan
    // carries a remainder record.
    for outcome in &mut outcomes {
        for plan in &mut outcome.plan.plans {
            for child in &mut plan.new_remainders {
                if let Some(state) = shared.state_of(&outcome.key, &child.id) {
                    child.state = state;
                }
            }
        }
    }

    // Reduce.
    let mut solutions: BTreeMap<String, Solution> = BTreeMap::new();
    let mut issues: Vec<ConsistencyIssue> = Vec::new();
    let mut usage_groups = Vec::new();
    for outcome in outcomes {
        if let Some(message) = outcome.error {
            issues.push(ConsistencyIssue {
                group_key: outcome.key.clone(),
                severity: ConsistencySeverity::Error,
                message: format!("group planner failed: {message}"),
                expected: 0.0,
                actual: 0.0,
                delta: 0.0,
            });
        }
        let real = shared.retained_total(&outcome.key);
        let (stats, group_issues) = reduce_group(&outcome.key, &outcome.plan.plans, real);
        issues.extend(group_issues);
        usage_groups.push((outcome.key.clone(), outcome.plan.module_pool.usage()));
        solutions.insert(
            outcome.key.clone(),
            Solution {
                group_key: outcome.key,
                plans: outcome.plan.plans,
                stats,
            },
        );
    }

    let totals = reduce_global(&solutions);
    let loss_rate_validation = validate_loss_rate(&solutions, totals.loss_rate);
    let requirements_validation = validate_requirements(&designs, &solutions);
    progress.report(95, "statistics reduced");

    let consistency_report = if issues.is_empty() && loss_rate_validation.is_consistent {
        None
    } else {
        Some(ConsistencyReport {
            is_consistent: issues.is_empty(),
            issues,
        })
    };

    let execution_time = started.elapsed().as_millis() as u64;
    info!(
        execution_time,
        loss_rate = totals.loss_rate,
        modules = totals.module_used,
        "optimization finished"
    );

    Ok(OptimizationResult {
        solutions,
        total_loss_rate: totals.loss_rate,
        total_module_used: totals.module_used,
        total_material: totals.material,
        total_waste: totals.waste,
        total_real_remainder: totals.real_remainder,
        total_pseudo_remainder: totals.pseudo_remainder,
        execution_time,
        constraint_validation: validation,
        loss_rate_validation,
        requirements_validation,
        consistency_report,
        module_steel_usage: UsageRollup::from_groups(usage_groups),
        processing_status: ProcessingStatus {
            is_completed: true,
            remainders_finalized: true,
            ready_for_rendering: true,
        },
    })
}

fn empty_group(key: &str, constraints: &crate::model::Constraints) -> GroupPlan {
    GroupPlan {
        group_key: key.to_string(),
        plans: Vec::new(),
        manager: RemainderManager::new(constraints.waste_threshold),
        module_pool: crate::module_pool::ModulePool::new(key, "", 0.0, Vec::new()),
        unmet: Vec::new(),
        weld_operations: 0,
        timed_out: false,
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Constraints, ModuleStock, RemainderState};

    fn design(id: &str, len: f64, qty: u32, spec: &str, cs: f64) -> DesignBar {
        DesignBar {
            id: id.into(),
            length: len,
            quantity: qty,
            cross_section: cs,
            specification: spec.into(),
            component_number: None,
            part_number: None,
            display_id: None,
        }
    }

    fn stock(id: &str, len: f64) -> ModuleStock {
        ModuleStock {
            id: id.into(),
            name: String::new(),
            length: len,
        }
    }

    fn job(designs: Vec<DesignBar>, modules: Vec<ModuleStock>, c: Constraints) -> OptimizeInput {
        OptimizeInput {
            design_steels: designs,
            module_steels: modules,
            constraints: c,
        }
    }

    fn run(input: &OptimizeInput) -> OptimizationResult {
        optimize(input, &NoProgress, &CancelFlag::new()).expect("engine run")
    }

    #[test]
    fn single_module_single_cut() {
        // One 12000 module covers both 6000 cuts with nothing left over.
        let input = job(
            vec![design("d1", 6000.0, 2, "HRB400", 314.0)],
            vec![stock("m1", 12000.0)],
            Constraints::new(100.0, 5.0, 30_000, 1).unwrap(),
        );
        let result = run(&input);
        assert_eq!(result.total_module_used, 1);
        assert_eq!(result.total_waste, 0.0);
        assert_eq!(result.total_real_remainder, 0.0);
        assert_eq!(result.total_loss_rate, 0.0);
        assert!(result.requirements_validation.all_satisfied);
        assert!(result.consistency_report.is_none());
        let solution = &result.solutions["HRB400_314"];
        assert_eq!(solution.stats.utilization, 100.0);
    }

    #[test]
    fn trailing_remainder_finalizes_to_real() {
        // Half the module survives the single cut and finalizes to real.
        let input = job(
            vec![design("d1", 6000.0, 1, "HRB400", 314.0)],
            vec![stock("m1", 12000.0)],
            Constraints::new(100.0, 5.0, 30_000, 1).unwrap(),
        );
        let result = run(&input);
        assert_eq!(result.total_waste, 0.0);
        assert_eq!(result.total_real_remainder, 6000.0);
        assert_eq!(result.total_loss_rate, 50.0);

        // The plan record carries the finalized state.
        let solution = &result.solutions["HRB400_314"];
        let child = &solution.plans[0].new_remainders[0];
        assert_eq!(child.state, RemainderState::Real);
        assert!(result.processing_status.remainders_finalized);
    }

    #[test]
    fn welded_demand_is_satisfied() {
        // A 15000 piece outruns every catalog length and needs two welded
        // sources.
        let input = job(
            vec![design("d1", 15000.0, 1, "HRB400", 314.0)],
            vec![stock("m1", 6000.0), stock("m2", 9000.0), stock("m3", 12000.0)],
            Constraints::new(500.0, 5.0, 30_000, 2).unwrap(),
        );
        let result = run(&input);
        assert!(result.requirements_validation.all_satisfied);
        let solution = &result.solutions["HRB400_314"];
        let welded = solution
            .plans
            .iter()
            .find(|p| p.welding_count == 2)
            .expect("welded plan");
        assert_eq!(welded.cuts[0].length, 15000.0);
        assert!(result.consistency_report.is_none());
    }

    #[test]
    fn invalid_welding_constraints_short_circuit() {
        // Welding forbidden with an oversized demand: no planning work
        // starts and the validation report is returned verbatim.
        let input = job(
            vec![design("d1", 15000.0, 1, "HRB400", 314.0)],
            vec![stock("m1", 6000.0), stock("m2", 9000.0), stock("m3", 12000.0)],
            Constraints::new(500.0, 5.0, 30_000, 1).unwrap(),
        );
        let err = optimize(&input, &NoProgress, &CancelFlag::new()).unwrap_err();
        match err {
            EngineError::InvalidConstraints(report) => {
                assert!(!report.is_valid);
                assert_eq!(report.suggestions.len(), 2);
            }
            other => panic!("expected InvalidConstraints, got {other:?}"),
        }
    }

    #[test]
    fn groups_stay_independent() {
        // Two specifications plan independently; namespaces stay disjoint
        // and the totals add up.
        let input = job(
            vec![
                design("d1", 6000.0, 1, "HRB400", 314.0),
                design("d2", 4000.0, 1, "HRB400", 314.0),
                design("d3", 5000.0, 1, "HRB500", 490.0),
                design("d4", 7000.0, 1, "HRB500", 490.0),
            ],
            vec![stock("m1", 12000.0)],
            Constraints::new(100.0, 5.0, 30_000, 2).unwrap(),
        );
        let result = run(&input);
        assert_eq!(result.solutions.len(), 2);
        assert!(result.solutions.contains_key("HRB400_314"));
        assert!(result.solutions.contains_key("HRB500_490"));

        // No remainder ever crosses group pools.
        for (key, solution) in &result.solutions {
            for plan in &solution.plans {
                for r in plan
                    .new_remainders
                    .iter()
                    .chain(plan.consumed_remainders.iter())
                {
                    assert_eq!(&r.group_key, key);
                }
            }
        }

        let sum_material: f64 = result
            .solutions
            .values()
            .map(|s| s.stats.total_material)
            .sum();
        assert_eq!(sum_material, result.total_material);
        assert!(result.requirements_validation.all_satisfied);
    }

    #[test]
    fn aggregate_stats_are_order_independent() {
        let designs = vec![
            design("d1", 6000.0, 2, "HRB400", 314.0),
            design("d2", 4000.0, 3, "HRB400", 314.0),
            design("d3", 5000.0, 1, "HRB500", 490.0),
        ];
        let modules = vec![stock("m1", 12000.0), stock("m2", 9000.0)];
        let c = Constraints::new(100.0, 5.0, 30_000, 2).unwrap();

        let forward = run(&job(designs.clone(), modules.clone(), c.clone()));
        let mut reversed = designs;
        reversed.reverse();
        let backward = run(&job(reversed, modules, c));

        assert_eq!(forward.total_material, backward.total_material);
        assert_eq!(forward.total_waste, backward.total_waste);
        assert_eq!(forward.total_real_remainder, backward.total_real_remainder);
        assert_eq!(forward.total_loss_rate, backward.total_loss_rate);
        assert_eq!(forward.total_module_used, backward.total_module_used);
    }

    #[test]
    fn no_pending_remainders_survive_finalization() {
        let input = job(
            vec![
                design("d1", 7000.0, 3, "HRB400", 314.0),
                design("d2", 2000.0, 5, "HRB400", 314.0),
            ],
            vec![stock("m1", 12000.0)],
            Constraints::new(100.0, 5.0, 30_000, 3).unwrap(),
        );
        let result = run(&input);
        for solution in result.solutions.values() {
            for plan in &solution.plans {
                for r in &plan.new_remainders {
                    assert_ne!(r.state, RemainderState::Pending);
                }
            }
        }
    }

    #[test]
    fn cancelled_job_returns_cancelled() {
        let cancel = CancelFlag::new();
        cancel.cancel();
        let input = job(
            vec![design("d1", 6000.0, 2, "HRB400", 314.0)],
            vec![stock("m1", 12000.0)],
            Constraints::new(100.0, 5.0, 30_000, 1).unwrap(),
        );
        let err = optimize(&input, &NoProgress, &cancel).unwrap_err();
        assert!(matches!(err, EngineError::Cancelled));
    }

    #[test]
    fn conservation_holds_across_scenarios() {
        let input = job(
            vec![
                design("d1", 6000.0, 4, "HRB400", 314.0),
                design("d2", 3500.0, 7, "HRB400", 314.0),
                design("d3", 9000.0, 2, "HRB500", 490.0),
            ],
            vec![stock("m1", 12000.0), stock("m2", 9000.0), stock("m3", 6000.0)],
            Constraints::new(200.0, 5.0, 30_000, 3).unwrap(),
        );
        let result = run(&input);
        for solution in result.solutions.values() {
            let s = &solution.stats;
            let conserved = s.total_material - s.design_length - s.waste;
            assert!(
                (conserved - s.real_remainder).abs() <= crate::LENGTH_TOLERANCE_MM,
                "conservation violated for {}: {} vs {}",
                solution.group_key,
                conserved,
                s.real_remainder
            );
        }
        assert!(result.consistency_report.is_none());
    }
}
