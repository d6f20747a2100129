//! Group keys and display ids.
//!
//! A group is the unit of independent planning: all design bars sharing
//! `(specification, round(crossSection))`. The canonical key is
//! `"<specification>_<round(crossSection)>"`; because a specification may
//! itself contain `_`, only the **last** segment of a key parses back as the
//! cross-section.

use std::collections::BTreeMap;

use crate::model::DesignBar;
use crate::Mm;

/// Canonical group key for a specification / cross-section pair.
pub fn group_key(specification: &str, cross_section: f64) -> String {
    format!("{}_{}", specification, cross_section.round() as i64)
}

/// Key for a design bar.
pub fn key_of(bar: &DesignBar) -> String {
    group_key(&bar.specification, bar.cross_section)
}

/// Split a key back into `(specification, round(crossSection))`.
///
/// Returns `None` when the trailing segment is not numeric.
pub fn parse_group_key(key: &str) -> Option<(&str, i64)> {
    let (spec, cs) = key.rsplit_once('_')?;
    let cs = cs.parse::<i64>().ok()?;
    Some((spec, cs))
}

/// Spreadsheet-style letter code: 0 → `A`, 25 → `Z`, 26 → `AA`, …
pub fn letter_code(mut index: usize) -> String {
    let mut out = Vec::new();
    loop {
        out.push(b'A' + (index % 26) as u8);
        index /= 26;
        if index == 0 {
            break;
        }
        index -= 1;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

/// Assign display ids to bars that carry none.
///
/// Groups are sorted lexicographically by key and lettered `A, B, …, AA, …`;
/// within a group, bars sort by length ascending and number from 1. The
/// assignment is stable for identical inputs. Bars that already carry a
/// display id keep it.
pub fn assign_display_ids(bars: &mut [DesignBar]) {
    let mut by_group: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for (i, bar) in bars.iter().enumerate() {
        by_group.entry(key_of(bar)).or_default().push(i);
    }
    for (letter_idx, (_key, mut indices)) in by_group.into_iter().enumerate() {
        indices.sort_by(|&a, &b| {
            bars[a]
                .length
                .partial_cmp(&bars[b].length)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| bars[a].id.cmp(&bars[b].id))
        });
        let letter = letter_code(letter_idx);
        for (n, &i) in indices.iter().enumerate() {
            if bars[i].display_id.is_none() {
                bars[i].display_id = Some(format!("{}{}", letter, n + 1));
            }
        }
    }
}

/// Distinct lengths in a stock catalog, ascending, deduplicated within the
/// length tolerance.
pub fn catalog_lengths(lengths: impl IntoIterator<Item = Mm>) -> Vec<Mm> {
    let mut out: Vec<Mm> = lengths.into_iter().collect();
    out.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    out.dedup_by(|a, b| (*a - *b).abs() <= crate::LENGTH_TOLERANCE_MM);
    out
}
