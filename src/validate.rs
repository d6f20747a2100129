//! Pre-flight feasibility check.
//!
//! The validator never plans anything; it inspects the demand, the stock
//! catalog, and the constraint set, and reports structural violations,
//! welding-feasibility conflicts with concrete resolution suggestions, and
//! advisory warnings. An invalid report short-circuits the driver: no
//! planning work starts.

use serde::{Deserialize, Serialize};

use crate::model::{Constraints, DesignBar, ModuleStock};
use crate::{Mm, LENGTH_TOLERANCE_MM};

/// Catalog lengths offered when suggesting an additional module size.
pub const STANDARD_MODULE_LENGTHS: [Mm; 5] = [6000.0, 9000.0, 12000.0, 15000.0, 18000.0];

/// Demand size above which the time-limit advisory can fire.
const TIME_WARNING_DEMAND_FLOOR: u64 = 1000;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ViolationKind {
    Structural,
    WeldingConstraintViolation,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Violation {
    pub kind: ViolationKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conflict_design_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conflict_lengths: Vec<Mm>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum SuggestionKind {
    AddModuleLength,
    RaiseWeldingSegments,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Suggestion {
    pub kind: SuggestionKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recommended_lengths: Vec<Mm>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommended_segments: Option<u32>,
}

/// Validator output, returned verbatim to the caller when invalid.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub is_valid: bool,
    pub violations: Vec<Violation>,
    pub suggestions: Vec<Suggestion>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    /// A clean report for inputs that passed every check.
    pub fn valid() -> Self {
        Self {
            is_valid: true,
            violations: Vec::new(),
            suggestions: Vec::new(),
            warnings: Vec::new(),
        }
    }
}

fn structural(message: String) -> Violation {
    Violation {
        kind: ViolationKind::Structural,
        message,
        conflict_design_ids: Vec::new(),
        conflict_lengths: Vec::new(),
    }
}

/// Run every check in order and collect the full report.
pub fn validate_input(
    designs: &[DesignBar],
    modules: &[ModuleStock],
    constraints: &Constraints,
) -> ValidationReport {
    let mut violations = Vec::new();
    let mut suggestions = Vec::new();
    let mut warnings = Vec::new();

    // 1. Structural checks.
    if designs.is_empty() {
        violations.push(structural("at least one design bar is required".into()));
    }
    if modules.is_empty() {
        violations.push(structural("at least one module bar is required".into()));
    }
    for d in designs {
        if !(d.length > 0.0) {
            violations.push(structural(format!(
                "design bar {} has non-positive length {}",
                d.id, d.length
            )));
        }
        if d.quantity == 0 {
            violations.push(structural(format!(
                "design bar {} has zero required count",
                d.id
            )));
        }
        if !(d.cross_section > 0.0) {
            violations.push(structural(format!(
                "design bar {} has non-positive cross-section {}",
                d.id, d.cross_section
            )));
        }
    }
    for m in modules {
        if !(m.length > 0.0) {
            violations.push(structural(format!(
                "module bar {} has non-positive length {}",
                m.id, m.length
            )));
        }
    }
    if let Err(e) = constraints.validate() {
        violations.push(structural(e.to_string()));
    }

    // 2. Welding feasibility against the longest module.
    let longest_module = modules.iter().map(|m| m.length).fold(0.0_f64, Mm::max);
    if longest_module > 0.0 && constraints.max_welding_segments == 1 {
        let conflicts: Vec<&DesignBar> = designs
            .iter()
            .filter(|d| d.length > longest_module + LENGTH_TOLERANCE_MM)
            .collect();
        if !conflicts.is_empty() {
            let max_conflict = conflicts.iter().map(|d| d.length).fold(0.0_f64, Mm::max);
            violations.push(Violation {
                kind: ViolationKind::WeldingConstraintViolation,
                message: format!(
                    "{} design bar(s) exceed the longest module ({} mm) and welding is forbidden",
                    conflicts.len(),
                    longest_module
                ),
                conflict_design_ids: conflicts.iter().map(|d| d.id.clone()).collect(),
                conflict_lengths: conflicts.iter().map(|d| d.length).collect(),
            });

            let recommended: Vec<Mm> = STANDARD_MODULE_LENGTHS
                .iter()
                .copied()
                .filter(|&l| l + LENGTH_TOLERANCE_MM >= max_conflict)
                .take(3)
                .collect();
            suggestions.push(Suggestion {
                kind: SuggestionKind::AddModuleLength,
                message: format!("add a module of length >= {} mm", max_conflict),
                recommended_lengths: recommended,
                recommended_segments: None,
            });

            let needed = (max_conflict / longest_module).ceil() as u32;
            suggestions.push(Suggestion {
                kind: SuggestionKind::RaiseWeldingSegments,
                message: format!("raise maxWeldingSegments to {}", needed),
                recommended_lengths: Vec::new(),
                recommended_segments: Some(needed),
            });
        }
    }

    // 3. Advisory warnings; these never block.
    if !designs.is_empty() && !modules.is_empty() {
        let avg_design = designs.iter().map(|d| d.length).sum::<Mm>() / designs.len() as f64;
        let avg_module = modules.iter().map(|m| m.length).sum::<Mm>() / modules.len() as f64;
        if avg_module > 0.0 && avg_design < 0.3 * avg_module {
            warnings.push(format!(
                "average design length {:.0} mm is below 30% of average module length {:.0} mm; expect a high loss rate from short offcuts",
                avg_design, avg_module
            ));
        }
    }
    if constraints.max_welding_segments == 1 {
        let distinct = crate::group::catalog_lengths(modules.iter().map(|m| m.length));
        if distinct.len() > 1 {
            warnings.push(
                "welding is forbidden but multiple module sizes are available; single-module cutting may leave long unusable offcuts".into(),
            );
        }
    }
    let demand_count: u64 = designs.iter().map(|d| u64::from(d.quantity)).sum();
    let limit_secs = constraints.time_limit / 1000;
    if demand_count > TIME_WARNING_DEMAND_FLOOR && demand_count > limit_secs {
        warnings.push(format!(
            "total demand count {} exceeds the time limit of {} s; the plan may be cut short by the time budget",
            demand_count, limit_secs
        ));
    }

    ValidationReport {
        is_valid: violations.is_empty(),
        violations,
        suggestions,
        warnings,
    }
}

// ============================================================================
// Tests
// ============================================================================
