//! End-to-end invariants over whole optimization runs.
//!
//! These tests drive the engine through the public surface only and check the
//! properties that must hold for any accepted input: demand coverage,
//! material conservation, loss-rate consistency, exclusivity, welding
//! discipline, remainder terminality, threshold policy, and id uniqueness.

use std::collections::HashSet;
use std::sync::Arc;

use steelcut::driver::{optimize, CancelFlag, NoProgress};
use steelcut::model::{
    Constraints, CuttingPlan, DesignBar, ModuleStock, OptimizationResult, OptimizeInput,
    PlanSource, RemainderState,
};
use steelcut::task::{MemoryTaskStore, TaskStatus, TaskSupervisor};
use steelcut::LENGTH_TOLERANCE_MM;

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

/// A mixed job: two specification groups, short and long pieces, welding
/// allowed, a threshold that forces both waste and retained remainders.
fn mixed_job() -> OptimizeInput {
    OptimizeInput {
        design_steels: vec![
            design("d1", 8200.0, 3, "HRB400", 314.0),
            design("d2", 3650.0, 9, "HRB400", 314.0),
            design("d3", 1200.0, 14, "HRB400", 314.0),
            design("d4", 13500.0, 2, "HRB500", 490.0),
            design("d5", 5100.0, 6, "HRB500", 490.0),
        ],
        module_steels: vec![
            stock("m1", 6000.0),
            stock("m2", 9000.0),
            stock("m3", 12000.0),
        ],
        constraints: Constraints::new(300.0, 5.0, 60_000, 3).unwrap(),
    }
}

fn run(input: &OptimizeInput) -> OptimizationResult {
    optimize(input, &NoProgress, &CancelFlag::new()).expect("engine run")
}

fn plans_of(result: &OptimizationResult) -> impl Iterator<Item = (&String, &CuttingPlan)> {
    result
        .solutions
        .iter()
        .flat_map(|(key, s)| s.plans.iter().map(move |p| (key, p)))
}

#[test]
fn demand_coverage_is_exact() {
    let input = mixed_job();
    let result = run(&input);
    assert!(
        result.requirements_validation.all_satisfied,
        "unmet: {:?}",
        result.requirements_validation.items
    );

    for bar in &input.design_steels {
        let produced: u32 = plans_of(&result)
            .flat_map(|(_, p)| &p.cuts)
            .filter(|c| c.design_id == bar.id)
            .map(|c| c.count)
            .sum();
        assert_eq!(produced, bar.quantity, "coverage for {}", bar.id);
    }
}

#[test]
fn material_is_conserved_per_group() {
    let result = run(&mixed_job());
    for (key, solution) in &result.solutions {
        let s = &solution.stats;
        let conserved = s.total_material - s.design_length - s.waste;
        assert!(
            (conserved - s.real_remainder).abs() <= LENGTH_TOLERANCE_MM,
            "group {key}: {conserved} vs pool {}",
            s.real_remainder
        );
    }
    assert!(result.consistency_report.is_none());
}

#[test]
fn loss_rate_matches_weighted_average() {
    let result = run(&mixed_job());
    let check = &result.loss_rate_validation;
    assert!(
        check.is_consistent,
        "global {} vs weighted {}",
        check.global_loss_rate, check.weighted_average
    );
    assert!((check.global_loss_rate - result.total_loss_rate).abs() < 1e-9);
}

#[test]
fn waste_and_children_are_exclusive() {
    let result = run(&mixed_job());
    for (key, plan) in plans_of(&result) {
        let children: f64 = plan.new_remainders.iter().map(|r| r.length).sum();
        assert!(
            !(plan.waste > LENGTH_TOLERANCE_MM && children > LENGTH_TOLERANCE_MM),
            "group {key}: plan charges waste {} and retains {}",
            plan.waste,
            children
        );
    }
}

#[test]
fn welding_discipline_holds() {
    let input = mixed_job();
    let result = run(&input);
    let limit = input.constraints.max_welding_segments as usize;
    for (_, plan) in plans_of(&result) {
        if let PlanSource::Remainder { ids, .. } = &plan.source {
            assert!(ids.len() <= limit);
            assert_eq!(plan.welding_count as usize, plan.consumed_remainders.len().max(1));
        }
    }
}

#[test]
fn no_remainder_is_pending_after_finalization() {
    let result = run(&mixed_job());
    assert!(result.processing_status.remainders_finalized);
    for (_, plan) in plans_of(&result) {
        for r in plan.new_remainders.iter().chain(plan.consumed_remainders.iter()) {
            assert_ne!(r.state, RemainderState::Pending, "remainder {}", r.id);
        }
    }
}

#[test]
fn threshold_policy_filters_retained_children() {
    let input = mixed_job();
    let result = run(&input);
    let threshold = input.constraints.waste_threshold;
    for (_, plan) in plans_of(&result) {
        for r in &plan.new_remainders {
            assert!(
                r.length + LENGTH_TOLERANCE_MM >= threshold,
                "retained child {} is below the waste threshold",
                r.id
            );
        }
    }
}

#[test]
fn ids_are_unique_within_the_run() {
    let result = run(&mixed_job());

    let mut module_ids = HashSet::new();
    let mut remainder_ids = HashSet::new();
    for (_, plan) in plans_of(&result) {
        if let PlanSource::Module { id, .. } = &plan.source {
            assert!(module_ids.insert(id.clone()), "module id {id} reused");
        }
        for r in &plan.new_remainders {
            assert!(remainder_ids.insert(r.id.clone()), "remainder id {} reused", r.id);
        }
    }
    assert!(!module_ids.is_empty());
}

#[test]
fn totals_equal_sum_of_groups() {
    let result = run(&mixed_job());
    let material: f64 = result.solutions.values().map(|s| s.stats.total_material).sum();
    let waste: f64 = result.solutions.values().map(|s| s.stats.waste).sum();
    let real: f64 = result.solutions.values().map(|s| s.stats.real_remainder).sum();
    assert!((material - result.total_material).abs() <= LENGTH_TOLERANCE_MM);
    assert!((waste - result.total_waste).abs() <= LENGTH_TOLERANCE_MM);
    assert!((real - result.total_real_remainder).abs() <= LENGTH_TOLERANCE_MM);

    // The procurement roll-up agrees with the material totals.
    assert_eq!(result.module_steel_usage.total_count, result.total_module_used);
    assert!(
        (result.module_steel_usage.total_length - result.total_material).abs()
            <= LENGTH_TOLERANCE_MM
    );
}

#[test]
fn permuting_input_preserves_aggregates() {
    let base = mixed_job();
    let forward = run(&base);

    let mut shuffled = base.clone();
    shuffled.design_steels.reverse();
    shuffled.design_steels.rotate_left(2);
    let permuted = run(&shuffled);

    assert_eq!(forward.total_material, permuted.total_material);
    assert_eq!(forward.total_waste, permuted.total_waste);
    assert_eq!(forward.total_real_remainder, permuted.total_real_remainder);
    assert_eq!(forward.total_loss_rate, permuted.total_loss_rate);
    assert_eq!(forward.total_module_used, permuted.total_module_used);
}

#[tokio::test]
async fn supervised_task_carries_the_result() {
    let supervisor = TaskSupervisor::new(Arc::new(MemoryTaskStore::new()));
    let id = supervisor.create_pending(mixed_job()).unwrap();
    supervisor.run_task(id.clone()).await;

    let task = supervisor.get_task(&id).unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.progress, 100);
    let result = task.results.expect("completed task carries results");
    assert!(result.processing_status.ready_for_rendering);
    assert!(result.requirements_validation.all_satisfied);
    assert_eq!(result.solutions.len(), 2);
}
