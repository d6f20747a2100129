//! MW-CD post-pass.
//!
//! After a group's demand is satisfied, a retained large remainder (the MW
//! candidate) can sometimes replace a multi-segment welded plan (the CD
//! candidate) outright: the piece is cut from one source instead of several,
//! saving welds at the cost of a short offcut. The benefit model prices each
//! eliminated weld at a fixed millimeter surrogate and subtracts the length
//! mismatch; only swaps clearing the configured floor execute.

use tracing::debug;

use crate::model::{Constraints, CuttingPlan, PlanSource, Remainder};
use crate::planner::GroupPlan;
use crate::{Mm, LENGTH_TOLERANCE_MM};

/// Maximum improvement iterations per group.
const MAX_ITERATIONS: u32 = 10;

#[derive(Debug, Clone)]
struct SwapCandidate {
    mw_id: String,
    mw_length: Mm,
    plan_index: usize,
    benefit: Mm,
}

/// Run the improvement loop on one group. Returns the number of swaps
/// executed.
pub fn improve_group(group: &mut GroupPlan, constraints: &Constraints) -> u32 {
    let mut swaps = 0;
    for _ in 0..MAX_ITERATIONS {
        let Some(candidate) = best_swap(group, constraints) else {
            break;
        };
        if !execute_swap(group, &candidate) {
            break;
        }
        swaps += 1;
        debug!(
            group = %group.group_key,
            mw = %candidate.mw_id,
            benefit = candidate.benefit,
            "post-pass swap executed"
        );
    }
    swaps
}

/// Scan every (MW, CD) pair and return the highest-benefit feasible swap that
/// clears the benefit floor. State changes after each executed swap, so the
/// caller re-scans rather than caching this ranking.
fn best_swap(group: &GroupPlan, constraints: &Constraints) -> Option<SwapCandidate> {
    let mut feasible: Vec<SwapCandidate> = Vec::new();

    for (plan_index, plan) in group.plans.iter().enumerate() {
        let PlanSource::Remainder { total_length, .. } = &plan.source else {
            continue;
        };
        let segments = plan.consumed_remainders.len() as u32;
        if segments <= 1 {
            continue;
        }
        let Some(target) = plan.cuts.first().map(|c| c.length) else {
            continue;
        };

        for mw in group.manager.pool(&group.group_key) {
            if mw.length + LENGTH_TOLERANCE_MM < target {
                continue;
            }
            let new_waste = mw.length - target;
            if new_waste + LENGTH_TOLERANCE_MM >= constraints.waste_threshold {
                continue;
            }
            let benefit = f64::from(segments - 1) * constraints.weld_cost_mm
                - (mw.length - total_length).abs();
            if benefit <= 0.0 {
                continue;
            }
            feasible.push(SwapCandidate {
                mw_id: mw.id.clone(),
                mw_length: mw.length,
                plan_index,
                benefit,
            });
        }
    }

    feasible.sort_by(|a, b| {
        b.benefit
            .partial_cmp(&a.benefit)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    feasible
        .into_iter()
        .find(|c| c.benefit > constraints.swap_benefit_floor_mm)
}

/// Replace the CD plan with a single-source plan cut from the MW remainder.
/// The CD plan's consumed remainders return to the pool as pending.
fn execute_swap(group: &mut GroupPlan, candidate: &SwapCandidate) -> bool {
    let Some(mw) = group.manager.take_by_id(&group.group_key, &candidate.mw_id) else {
        return false;
    };

    let old_plan = group.plans.remove(candidate.plan_index);
    let target = old_plan.cuts.first().map(|c| c.length).unwrap_or(0.0);

    let restored: Vec<Remainder> = old_plan.consumed_remainders.clone();
    group
        .manager
        .restore_pending(&group.group_key, restored);

    let offcut = candidate.mw_length - target;
    let new_plan = CuttingPlan {
        source: PlanSource::Remainder {
            ids: vec![mw.id.clone()],
            total_length: mw.length,
        },
        cuts: old_plan.cuts,
        consumed_remainders: vec![mw],
        new_remainders: Vec::new(),
        waste: if offcut > LENGTH_TOLERANCE_MM {
            offcut
        } else {
            0.0
        },
        welding_count: 1,
    };
    group.plans.push(new_plan);
    group.weld_operations = group.weld_operations.saturating_sub(1);
    true
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Constraints, Cut, RemainderState};
    use crate::module_pool::ModulePool;
    use crate::remainder::RemainderManager;

    const G: &str = "HRB400_314";

    /// Group with one welded plan: `segment_lengths` combined into a single
    /// `target` piece.
    fn welded_group(c: &Constraints, segment_lengths: &[Mm], target: Mm) -> GroupPlan {
        let mut manager = RemainderManager::new(c.waste_threshold);
        for &len in segment_lengths {
            manager.evaluate_and_process(len, G, None, vec![]);
        }
        let combo = manager
            .find_best_combination(target, G, segment_lengths.len() as u32)
            .expect("seeded combination");
        let segments = combo.segment_count();
        let out = manager.use_remainder(&combo, target, "d1", G);
        let plan = CuttingPlan {
            source: PlanSource::Remainder {
                ids: combo.ids(),
                total_length: combo.total_length,
            },
            cuts: vec![Cut {
                design_id: "d1".into(),
                length: target,
                count: 1,
            }],
            consumed_remainders: out.pseudo_copies,
            new_remainders: out.new_children,
            waste: out.waste,
            welding_count: segments,
        };
        GroupPlan {
            group_key: G.into(),
            plans: vec![plan],
            manager,
            module_pool: ModulePool::new(G, "HRB400", 314.0, vec![12000.0]),
            unmet: vec![],
            weld_operations: 1,
            timed_out: false,
        }
    }

    #[test]
    fn swap_replaces_welded_plan_with_large_remainder() {
        let c = Constraints::new(500.0, 5.0, 30_000, 3).unwrap();
        // CD: 5000+5000+5100 welded into 15000 (offcut 100 charged as waste).
        let mut group = welded_group(&c, &[5000.0, 5000.0, 5100.0], 15000.0);
        assert_eq!(group.plans[0].consumed_remainders.len(), 3);
        assert_eq!(group.plans[0].waste, 100.0);

        // MW: 15080 covers the piece alone; benefit 2×50 − |15080−15100| = 80.
        group.manager.evaluate_and_process(15080.0, G, None, vec![]);

        let swaps = improve_group(&mut group, &c);
        assert_eq!(swaps, 1);

        // The welded plan is gone; its replacement cuts from one source.
        assert_eq!(group.plans.len(), 1);
        let replacement = &group.plans[0];
        assert_eq!(replacement.consumed_remainders.len(), 1);
        assert_eq!(replacement.welding_count, 1);
        assert_eq!(replacement.waste, 80.0);
        assert_eq!(replacement.cuts[0].length, 15000.0);
        assert_eq!(group.weld_operations, 0);

        // The old combination's pieces are back in the pool, pending and
        // sorted ascending.
        let pool = group.manager.pool(G);
        assert_eq!(pool.len(), 3);
        assert!(pool.iter().all(|r| r.state == RemainderState::Pending));
        assert!(pool.windows(2).all(|w| w[0].length <= w[1].length));
    }

    #[test]
    fn no_swap_when_offcut_would_be_wasteful() {
        let c = Constraints::new(500.0, 5.0, 30_000, 3).unwrap();
        let mut group = welded_group(&c, &[5000.0, 5000.0, 5100.0], 15000.0);

        // 15800 would strand an 800 mm offcut ≥ threshold: rejected.
        group.manager.evaluate_and_process(15800.0, G, None, vec![]);
        assert_eq!(improve_group(&mut group, &c), 0);
        assert_eq!(group.plans[0].consumed_remainders.len(), 3);
    }

    #[test]
    fn two_segment_weld_never_clears_the_default_floor() {
        let c = Constraints::new(500.0, 5.0, 30_000, 2).unwrap();
        // Benefit tops out at 1 × 50 = 50, which does not exceed the floor.
        let mut group = welded_group(&c, &[7500.0, 7600.0], 15000.0);
        group.manager.evaluate_and_process(15080.0, G, None, vec![]);
        assert_eq!(improve_group(&mut group, &c), 0);
    }

    #[test]
    fn mismatched_candidate_is_rejected_on_benefit() {
        let c = Constraints::new(500.0, 5.0, 30_000, 3).unwrap();
        let mut group = welded_group(&c, &[5000.0, 5000.0, 5100.0], 15000.0);

        // Benefit = 2×50 − |15250−15100| = −50: mismatch kills the swap.
        group.manager.evaluate_and_process(15250.0, G, None, vec![]);
        assert_eq!(improve_group(&mut group, &c), 0);
    }

    #[test]
    fn nothing_to_do_without_welded_plans() {
        let c = Constraints::new(500.0, 5.0, 30_000, 1).unwrap();
        let mut group = welded_group(&c, &[15100.0], 15000.0);
        assert_eq!(group.plans[0].consumed_remainders.len(), 1);
        group.manager.evaluate_and_process(15080.0, G, None, vec![]);
        assert_eq!(improve_group(&mut group, &c), 0);
    }
}
