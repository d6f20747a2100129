//! Per-group cutting planner.
//!
//! One planner satisfies one `(specification, round(crossSection))` group's
//! demand, long pieces first. Each iteration tries the remainder pool before
//! buying a module; a module shorter than the demand is cut zero times and its
//! full length staged into the pool, which is how multi-segment welded plans
//! come together under the segment limit. The only pool mutation during
//! planning goes through the remainder manager, so progress without mutation
//! cannot loop.

use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::driver::CancelFlag;
use crate::model::{Constraints, Cut, CuttingPlan, DesignBar, PlanSource};
use crate::module_pool::ModulePool;
use crate::remainder::RemainderManager;
use crate::{Mm, LENGTH_TOLERANCE_MM};

/// Iteration cap multiplier when the job does not set one.
const DEFAULT_ITERATIONS_PER_PIECE: u32 = 100;

/// One demand line as the planner tracks it.
#[derive(Debug, Clone)]
struct Demand {
    id: String,
    length: Mm,
    required: u32,
    remaining: u32,
}

/// A demand the planner could not fully satisfy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UnmetDemand {
    pub design_id: String,
    pub length: Mm,
    pub required: u32,
    pub produced: u32,
}

/// Everything one group's planning run produced.
#[derive(Debug)]
pub struct GroupPlan {
    pub group_key: String,
    pub plans: Vec<CuttingPlan>,
    pub manager: RemainderManager,
    pub module_pool: ModulePool,
    pub unmet: Vec<UnmetDemand>,
    /// Weld operations performed (plans that joined ≥ 2 pieces).
    pub weld_operations: u32,
    pub timed_out: bool,
}

/// Planner for a single group. Owns its private remainder manager and module
/// pool; never touches another group's state.
pub struct GroupPlanner<'a> {
    group_key: String,
    constraints: &'a Constraints,
    manager: RemainderManager,
    module_pool: ModulePool,
    plans: Vec<CuttingPlan>,
    weld_operations: u32,
    timed_out: bool,
    deadline: Option<Instant>,
    cancel: CancelFlag,
}

impl<'a> GroupPlanner<'a> {
    pub fn new(
        group_key: impl Into<String>,
        specification: impl Into<String>,
        cross_section: f64,
        catalog: Vec<Mm>,
        constraints: &'a Constraints,
        deadline: Option<Instant>,
        cancel: CancelFlag,
    ) -> Self {
        let group_key = group_key.into();
        Self {
            module_pool: ModulePool::new(
                group_key.clone(),
                specification,
                cross_section,
                catalog,
            ),
            group_key,
            constraints,
            manager: RemainderManager::new(constraints.waste_threshold),
            plans: Vec::new(),
            weld_operations: 0,
            timed_out: false,
            deadline,
            cancel,
        }
    }

    /// Satisfy the group's demand and hand back the full outcome.
    pub fn run(mut self, designs: &[DesignBar]) -> GroupPlan {
        let mut demands: Vec<Demand> = designs
            .iter()
            .map(|d| Demand {
                id: d.id.clone(),
                length: d.length,
                required: d.quantity,
                remaining: d.quantity,
            })
            .collect();
        // Long pieces first.
        demands.sort_by(|a, b| {
            b.length
                .partial_cmp(&a.length)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });

        let mut unmet = Vec::new();
        'demands: for demand in &mut demands {
            if self.infeasible(demand) {
                warn!(
                    group = %self.group_key,
                    design = %demand.id,
                    length = demand.length,
                    "demand exceeds what the segment limit can cover; leaving unmet"
                );
                continue;
            }

            let cap = self
                .constraints
                .max_iterations_per_demand
                .unwrap_or(DEFAULT_ITERATIONS_PER_PIECE.saturating_mul(demand.required.max(1)));
            let mut iterations = 0u32;

            while demand.remaining > 0 {
                if self.cancel.is_cancelled() {
                    break 'demands;
                }
                if let Some(deadline) = self.deadline {
                    if Instant::now() >= deadline {
                        self.timed_out = true;
                        debug!(group = %self.group_key, "time budget exhausted mid-group");
                        break 'demands;
                    }
                }
                iterations += 1;
                if iterations > cap {
                    warn!(
                        group = %self.group_key,
                        design = %demand.id,
                        cap,
                        "iteration cap reached; leaving demand unmet"
                    );
                    break;
                }

                if self.try_remainder(demand) {
                    continue;
                }
                if self.try_module(demand) {
                    continue;
                }
                // Neither the pool nor fresh stock can advance this demand:
                // the bar on offer is shorter than the piece and below the
                // waste threshold, so it can never be cut or staged.
                warn!(
                    group = %self.group_key,
                    design = %demand.id,
                    "no module stock can advance this demand; leaving unmet"
                );
                break;
            }
        }

        for demand in &demands {
            if demand.remaining > 0 {
                unmet.push(UnmetDemand {
                    design_id: demand.id.clone(),
                    length: demand.length,
                    required: demand.required,
                    produced: demand.required - demand.remaining,
                });
            }
        }

        GroupPlan {
            group_key: self.group_key,
            plans: self.plans,
            manager: self.manager,
            module_pool: self.module_pool,
            unmet,
            weld_operations: self.weld_operations,
            timed_out: self.timed_out,
        }
    }

    /// A piece longer than `maxWeldingSegments` longest modules can never be
    /// produced; skip it instead of buying stock that cannot combine.
    fn infeasible(&self, demand: &Demand) -> bool {
        let longest = self.module_pool.longest_available();
        let reach = longest * f64::from(self.constraints.max_welding_segments);
        longest > 0.0 && demand.length > reach + LENGTH_TOLERANCE_MM
    }

    /// Step 1: cover one piece from the remainder pool.
    fn try_remainder(&mut self, demand: &mut Demand) -> bool {
        let Some(combination) = self.manager.find_best_combination(
            demand.length,
            &self.group_key,
            self.constraints.max_welding_segments,
        ) else {
            return false;
        };

        let segments = combination.segment_count();
        let outcome =
            self.manager
                .use_remainder(&combination, demand.length, &demand.id, &self.group_key);

        let mut plan = CuttingPlan {
            source: PlanSource::Remainder {
                ids: combination.ids(),
                total_length: combination.total_length,
            },
            cuts: vec![Cut {
                design_id: demand.id.clone(),
                length: demand.length,
                count: 1,
            }],
            consumed_remainders: outcome.pseudo_copies,
            new_remainders: outcome.new_children,
            waste: outcome.waste,
            welding_count: segments,
        };
        self.reconcile(&mut plan);
        self.plans.push(plan);

        demand.remaining -= 1;
        if segments >= 2 {
            self.weld_operations += 1;
        }
        true
    }

    /// Step 2: buy a module and cut as many pieces as it allows. A module
    /// shorter than the demand produces zero cuts and stages its full length
    /// into the pool for a later welded combination. The bar on offer is
    /// previewed first: when it could neither be cut nor staged (shorter than
    /// the piece and below the waste threshold), nothing is acquired and no
    /// usage is recorded.
    fn try_module(&mut self, demand: &mut Demand) -> bool {
        let Some(on_offer) = self.module_pool.peek(demand.length) else {
            return false;
        };
        let fit = ((on_offer + LENGTH_TOLERANCE_MM) / demand.length).floor() as u32;
        let stageable = on_offer + LENGTH_TOLERANCE_MM >= self.constraints.waste_threshold;
        if fit == 0 && !stageable {
            return false;
        }

        let Some(bar) = self.module_pool.acquire(demand.length) else {
            return false;
        };
        let count = fit.min(demand.remaining);
        let produced = demand.length * f64::from(count);
        let offcut = bar.length - produced;

        let mut new_remainders = Vec::new();
        let mut waste = 0.0;
        if offcut > LENGTH_TOLERANCE_MM {
            let child = self.manager.evaluate_and_process(
                offcut,
                &self.group_key,
                Some(bar.id.clone()),
                vec![bar.id.clone()],
            );
            if child.state == crate::model::RemainderState::Waste {
                waste = child.length;
            } else {
                new_remainders.push(child);
            }
        }

        let staged = count == 0 && !new_remainders.is_empty();

        let mut plan = CuttingPlan {
            source: PlanSource::Module {
                id: bar.id,
                length: bar.length,
            },
            cuts: if count > 0 {
                vec![Cut {
                    design_id: demand.id.clone(),
                    length: demand.length,
                    count,
                }]
            } else {
                Vec::new()
            },
            consumed_remainders: Vec::new(),
            new_remainders,
            waste,
            welding_count: 1,
        };
        self.reconcile(&mut plan);
        self.plans.push(plan);

        demand.remaining -= count;
        if staged {
            debug!(
                group = %self.group_key,
                design = %demand.id,
                "module staged into remainder pool for welding"
            );
        }
        true
    }

    /// Exclusivity corrector: a plan may charge waste or retain a child, not
    /// both. Children dropped by the repair are evicted from the pool too, so
    /// the plan record and the manager cannot disagree.
    fn reconcile(&mut self, plan: &mut CuttingPlan) {
        for dropped in plan.reconcile_exclusivity() {
            self.manager.evict(&self.group_key, &dropped);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
