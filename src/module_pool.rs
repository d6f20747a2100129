//! Per-group module (stock) supply.
//!
//! The pool holds the catalog of *available* module lengths (the distinct
//! lengths in the job's stock list, ascending) and mints a fresh
//! [`ModuleBar`] on every acquisition. Acquisitions are recorded for the
//! procurement roll-up; nothing is ever returned to the pool.

use std::collections::BTreeMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::model::ModuleBar;
use crate::{Mm, LENGTH_TOLERANCE_MM};

/// On-demand supplier of module bars for one group.
#[derive(Debug, Clone)]
pub struct ModulePool {
    group_key: String,
    specification: String,
    cross_section: f64,
    /// Distinct catalog lengths, ascending.
    catalog: Vec<Mm>,
    counter: u32,
    acquisitions: Vec<ModuleBar>,
}

impl ModulePool {
    /// `catalog` must already be distinct and ascending
    /// (see [`crate::group::catalog_lengths`]).
    pub fn new(
        group_key: impl Into<String>,
        specification: impl Into<String>,
        cross_section: f64,
        catalog: Vec<Mm>,
    ) -> Self {
        Self {
            group_key: group_key.into(),
            specification: specification.into(),
            cross_section,
            catalog,
            counter: 0,
            acquisitions: Vec::new(),
        }
    }

    /// Length [`Self::acquire`] would hand out for `required`, without
    /// minting a bar or recording anything.
    pub fn peek(&self, required: Mm) -> Option<Mm> {
        self.catalog
            .iter()
            .copied()
            .find(|&l| l + LENGTH_TOLERANCE_MM >= required)
            .or_else(|| self.catalog.last().copied())
    }

    /// Acquire a fresh module: the shortest catalog length that covers
    /// `required`, or the longest available when nothing does (the caller may
    /// still welding-combine it). `None` only when the catalog is empty.
    pub fn acquire(&mut self, required: Mm) -> Option<ModuleBar> {
        let length = self.peek(required)?;

        self.counter += 1;
        let bar = ModuleBar {
            id: format!("{}_M{}", self.group_key, self.counter),
            specification: self.specification.clone(),
            cross_section: self.cross_section,
            length,
            used_at: Utc::now(),
        };
        self.acquisitions.push(bar.clone());
        Some(bar)
    }

    /// Longest length on offer; 0 for an empty catalog.
    pub fn longest_available(&self) -> Mm {
        self.catalog.last().copied().unwrap_or(0.0)
    }

    pub fn acquisitions(&self) -> &[ModuleBar] {
        &self.acquisitions
    }

    pub fn group_key(&self) -> &str {
        &self.group_key
    }

    /// Aggregate this pool's acquisitions by length.
    pub fn usage(&self) -> GroupUsage {
        let mut by_length: BTreeMap<i64, UsageEntry> = BTreeMap::new();
        for bar in &self.acquisitions {
            let entry = by_length
                .entry(bar.length.round() as i64)
                .or_insert(UsageEntry {
                    length: bar.length,
                    count: 0,
                    total_length: 0.0,
                });
            entry.count += 1;
            entry.total_length += bar.length;
        }
        let entries: Vec<UsageEntry> = by_length.into_values().collect();
        let count = entries.iter().map(|e| e.count).sum();
        let total_length = entries.iter().map(|e| e.total_length).sum();
        GroupUsage {
            entries,
            count,
            total_length,
        }
    }
}

// ============================================================================
// Procurement roll-up
// ============================================================================

/// Usage of one module length within a group.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UsageEntry {
    pub length: Mm,
    pub count: u64,
    pub total_length: Mm,
}

/// Per-group module usage, ordered by length.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GroupUsage {
    pub entries: Vec<UsageEntry>,
    pub count: u64,
    pub total_length: Mm,
}

/// The procurement list: per group, per length, plus global sums.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UsageRollup {
    pub groups: BTreeMap<String, GroupUsage>,
    pub total_count: u64,
    pub total_length: Mm,
}

impl UsageRollup {
    pub fn from_groups(groups: impl IntoIterator<Item = (String, GroupUsage)>) -> Self {
        let groups: BTreeMap<String, GroupUsage> = groups.into_iter().collect();
        let total_count = groups.values().map(|g| g.count).sum();
        let total_length = groups.values().map(|g| g.total_length).sum();
        Self {
            groups,
            total_count,
            total_length,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
