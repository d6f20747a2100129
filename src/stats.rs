//! Statistics reducer: the single source of truth for every aggregate.
//!
//! All sums are re-derived from the finished plans rather than accumulated
//! during planning, so a bookkeeping slip in the hot loop cannot silently
//! skew the report. The reducer also cross-checks material conservation per
//! group and the global loss rate against its material-weighted average,
//! surfacing any divergence as a consistency report.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::model::{CuttingPlan, DesignBar, Solution};
use crate::{Mm, LENGTH_TOLERANCE_MM};

/// Loss rates agree when within this many percentage points.
const LOSS_RATE_TOLERANCE_PP: f64 = 0.01;

/// Round to 4 decimal places (loss rates are reported at this precision).
pub fn round4(x: f64) -> f64 {
    (x * 10_000.0).round() / 10_000.0
}

// ============================================================================
// Per-group stats
// ============================================================================

/// Group-level sums, recomputed from the plans.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GroupStats {
    /// Distinct module bars consumed.
    pub module_count: u64,
    /// Material introduced: each module id contributes its length once.
    pub total_material: Mm,
    /// Total design length produced.
    pub design_length: Mm,
    pub waste: Mm,
    /// Pool-derived retained length after finalization.
    pub real_remainder: Mm,
    /// Material re-used through remainder-sourced plans (informational).
    pub pseudo_remainder: Mm,
    /// `(waste + realRemainder) / totalMaterial × 100`, 4 decimals.
    pub loss_rate: f64,
    /// `designLength / totalMaterial × 100`.
    pub utilization: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ConsistencySeverity {
    /// Conservation off by more than the tolerance.
    Error,
    /// Conservation negative beyond the tolerance: material appeared from
    /// nowhere.
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConsistencyIssue {
    pub group_key: String,
    pub severity: ConsistencySeverity,
    pub message: String,
    pub expected: Mm,
    pub actual: Mm,
    pub delta: Mm,
}

/// The material-conservation report for a whole result.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConsistencyReport {
    pub is_consistent: bool,
    pub issues: Vec<ConsistencyIssue>,
}

/// Reduce one group's plans into its stats, cross-checking conservation
/// against the pool-derived real remainder.
pub fn reduce_group(
    group_key: &str,
    plans: &[CuttingPlan],
    real_remainder: Mm,
) -> (GroupStats, Vec<ConsistencyIssue>) {
    let mut seen_modules: HashSet<&str> = HashSet::new();
    let mut total_material = 0.0;
    let mut pseudo_remainder = 0.0;

    for plan in plans {
        match &plan.source {
            crate::model::PlanSource::Module { id, length } => {
                if seen_modules.insert(id.as_str()) {
                    total_material += length;
                }
            }
            crate::model::PlanSource::Remainder { total_length, .. } => {
                pseudo_remainder += total_length;
            }
        }
    }

    let design_length: Mm = plans.iter().map(CuttingPlan::design_length).sum();
    let waste: Mm = plans.iter().map(|p| p.waste).sum();

    let mut issues = Vec::new();
    let conserved = total_material - design_length - waste;
    let delta = conserved - real_remainder;
    if delta.abs() > LENGTH_TOLERANCE_MM {
        let severity = if conserved < -LENGTH_TOLERANCE_MM {
            ConsistencySeverity::Critical
        } else {
            ConsistencySeverity::Error
        };
        warn!(
            group = group_key,
            expected = conserved,
            actual = real_remainder,
            "material conservation check failed"
        );
        issues.push(ConsistencyIssue {
            group_key: group_key.to_string(),
            severity,
            message: format!(
                "totalMaterial − designLength − waste = {:.1} mm, but the pool holds {:.1} mm",
                conserved, real_remainder
            ),
            expected: conserved,
            actual: real_remainder,
            delta,
        });
    }

    let (loss_rate, utilization) = if total_material > 0.0 {
        (
            round4((waste + real_remainder) / total_material * 100.0),
            round4(design_length / total_material * 100.0),
        )
    } else {
        (0.0, 0.0)
    };

    let stats = GroupStats {
        module_count: seen_modules.len() as u64,
        total_material,
        design_length,
        waste,
        real_remainder,
        pseudo_remainder,
        loss_rate,
        utilization,
    };
    (stats, issues)
}

// ============================================================================
// Global reductions
// ============================================================================

/// Sums across all groups; the loss rate is computed on the summed numerator
/// and denominator, never as an average of per-group rates.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GlobalTotals {
    pub loss_rate: f64,
    pub module_used: u64,
    pub material: Mm,
    pub waste: Mm,
    pub real_remainder: Mm,
    pub pseudo_remainder: Mm,
    pub design_length: Mm,
    pub utilization: f64,
}

pub fn reduce_global(solutions: &BTreeMap<String, Solution>) -> GlobalTotals {
    let mut t = GlobalTotals::default();
    for s in solutions.values() {
        t.module_used += s.stats.module_count;
        t.material += s.stats.total_material;
        t.waste += s.stats.waste;
        t.real_remainder += s.stats.real_remainder;
        t.pseudo_remainder += s.stats.pseudo_remainder;
        t.design_length += s.stats.design_length;
    }
    if t.material > 0.0 {
        t.loss_rate = round4((t.waste + t.real_remainder) / t.material * 100.0);
        t.utilization = round4(t.design_length / t.material * 100.0);
    }
    t
}

/// Cross-check: the global rate must match the material-weighted average of
/// per-group rates within 0.01 percentage points.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LossRateValidation {
    pub global_loss_rate: f64,
    pub weighted_average: f64,
    pub difference: f64,
    pub is_consistent: bool,
}

pub fn validate_loss_rate(
    solutions: &BTreeMap<String, Solution>,
    global_loss_rate: f64,
) -> LossRateValidation {
    let total_material: Mm = solutions.values().map(|s| s.stats.total_material).sum();
    let weighted_average = if total_material > 0.0 {
        round4(
            solutions
                .values()
                .map(|s| s.stats.loss_rate * s.stats.total_material)
                .sum::<f64>()
                / total_material,
        )
    } else {
        0.0
    };
    let difference = (global_loss_rate - weighted_average).abs();
    let is_consistent = difference <= LOSS_RATE_TOLERANCE_PP;
    if !is_consistent {
        warn!(
            global = global_loss_rate,
            weighted = weighted_average,
            "loss rate cross-check failed"
        );
    }
    LossRateValidation {
        global_loss_rate,
        weighted_average,
        difference: round4(difference),
        is_consistent,
    }
}

// ============================================================================
// Requirements validation
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RequirementItem {
    pub design_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_id: Option<String>,
    pub length: Mm,
    pub required: u32,
    pub produced: u32,
    pub satisfied: bool,
}

/// Per-design coverage: produced counts summed over every plan's cuts.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RequirementsValidation {
    pub items: Vec<RequirementItem>,
    pub all_satisfied: bool,
}

pub fn validate_requirements(
    designs: &[DesignBar],
    solutions: &BTreeMap<String, Solution>,
) -> RequirementsValidation {
    let mut produced: HashMap<&str, u32> = HashMap::new();
    for solution in solutions.values() {
        for plan in &solution.plans {
            for cut in &plan.cuts {
                *produced.entry(cut.design_id.as_str()).or_default() += cut.count;
            }
        }
    }

    let items: Vec<RequirementItem> = designs
        .iter()
        .map(|d| {
            let got = produced.get(d.id.as_str()).copied().unwrap_or(0);
            RequirementItem {
                design_id: d.id.clone(),
                display_id: d.display_id.clone(),
                length: d.length,
                required: d.quantity,
                produced: got,
                satisfied: got >= d.quantity,
            }
        })
        .collect();
    let all_satisfied = items.iter().all(|i| i.satisfied);
    RequirementsValidation {
        items,
        all_satisfied,
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Cut, CuttingPlan, PlanSource};

    fn module_plan(id: &str, length: Mm, cut_len: Mm, count: u32, waste: Mm) -> CuttingPlan {
        CuttingPlan {
            source: PlanSource::Module {
                id: id.into(),
                length,
            },
            cuts: vec![Cut {
                design_id: "d1".into(),
                length: cut_len,
                count,
            }],
            consumed_remainders: vec![],
            new_remainders: vec![],
            waste,
            welding_count: 1,
        }
    }

    fn solution(group: &str, plans: Vec<CuttingPlan>, real: Mm) -> Solution {
        let (stats, _) = reduce_group(group, &plans, real);
        Solution {
            group_key: group.into(),
            plans,
            stats,
        }
    }

    #[test]
    fn perfect_cut_has_zero_loss() {
        // Two 6000 cuts from one 12000 module, nothing left over.
        let (stats, issues) = reduce_group(
            "HRB400_314",
            &[module_plan("g_M1", 12000.0, 6000.0, 2, 0.0)],
            0.0,
        );
        assert!(issues.is_empty());
        assert_eq!(stats.module_count, 1);
        assert_eq!(stats.total_material, 12000.0);
        assert_eq!(stats.design_length, 12000.0);
        assert_eq!(stats.loss_rate, 0.0);
        assert_eq!(stats.utilization, 100.0);
    }

    #[test]
    fn retained_half_is_fifty_percent_loss() {
        // One 6000 cut; the other half is retained as a real remainder.
        let (stats, issues) = reduce_group(
            "HRB400_314",
            &[module_plan("g_M1", 12000.0, 6000.0, 1, 0.0)],
            6000.0,
        );
        assert!(issues.is_empty());
        assert_eq!(stats.loss_rate, 50.0);
        assert_eq!(stats.real_remainder, 6000.0);
    }

    #[test]
    fn duplicate_module_id_counts_once() {
        let plans = vec![
            module_plan("g_M1", 12000.0, 5000.0, 1, 0.0),
            module_plan("g_M1", 12000.0, 5000.0, 1, 0.0),
        ];
        let (stats, _) = reduce_group("g", &plans, 2000.0);
        assert_eq!(stats.module_count, 1);
        assert_eq!(stats.total_material, 12000.0);
    }

    #[test]
    fn conservation_violation_is_reported() {
        // 12000 in, 6000 out, 0 waste, but the pool claims 4000.
        let (_, issues) = reduce_group(
            "g",
            &[module_plan("g_M1", 12000.0, 6000.0, 1, 0.0)],
            4000.0,
        );
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].severity, ConsistencySeverity::Error);
        assert_eq!(issues[0].expected, 6000.0);
        assert_eq!(issues[0].actual, 4000.0);
    }

    #[test]
    fn negative_conservation_is_critical() {
        // More design length out than material in.
        let (_, issues) = reduce_group(
            "g",
            &[module_plan("g_M1", 10000.0, 6000.0, 2, 0.0)],
            0.0,
        );
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].severity, ConsistencySeverity::Critical);
    }

    #[test]
    fn global_rate_is_sum_based_not_average() {
        let mut solutions = BTreeMap::new();
        // Group A: 12000 material, 6000 lost → 50%.
        solutions.insert(
            "A_1".to_string(),
            solution("A_1", vec![module_plan("A_M1", 12000.0, 6000.0, 1, 0.0)], 6000.0),
        );
        // Group B: 36000 material, 0 lost → 0%.
        solutions.insert(
            "B_1".to_string(),
            solution("B_1", vec![module_plan("B_M1", 36000.0, 12000.0, 3, 0.0)], 0.0),
        );
        let totals = reduce_global(&solutions);
        // (6000 + 0) / 48000 = 12.5%, not the plain average 25%.
        assert_eq!(totals.loss_rate, 12.5);

        let check = validate_loss_rate(&solutions, totals.loss_rate);
        assert!(check.is_consistent);
        assert_eq!(check.weighted_average, 12.5);
    }

    #[test]
    fn requirements_cover_produced_counts() {
        let designs = vec![
            crate::model::DesignBar {
                id: "d1".into(),
                length: 6000.0,
                quantity: 2,
                cross_section: 314.0,
                specification: "HRB400".into(),
                component_number: None,
                part_number: None,
                display_id: Some("A1".into()),
            },
            crate::model::DesignBar {
                id: "d2".into(),
                length: 9000.0,
                quantity: 1,
                cross_section: 314.0,
                specification: "HRB400".into(),
                component_number: None,
                part_number: None,
                display_id: None,
            },
        ];
        let mut solutions = BTreeMap::new();
        solutions.insert(
            "HRB400_314".to_string(),
            solution(
                "HRB400_314",
                vec![module_plan("g_M1", 12000.0, 6000.0, 2, 0.0)],
                0.0,
            ),
        );
        let report = validate_requirements(&designs, &solutions);
        assert!(!report.all_satisfied);
        assert!(report.items[0].satisfied);
        assert!(!report.items[1].satisfied);
        assert_eq!(report.items[1].produced, 0);
    }
}
