//! The merge audit document.

use std::collections::BTreeMap;

use serde::Serialize;

use super::plan::{Decision, DecisionStatus};
use crate::model::registry::{Counts, Registry};
use crate::model::types::Category;

/// Before/after counts for one category.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryDelta {
    /// Manufacturer count before the merge.
    pub initial: usize,
    /// Manufacturer count after the merge.
    #[serde(rename = "final")]
    pub final_count: usize,
    pub added: usize,
    pub models_initial: usize,
    pub models_final: usize,
    pub models_added: usize,
}

impl CategoryDelta {
    fn new(before: Counts, after: Counts) -> Self {
        Self {
            initial: before.manufacturers,
            final_count: after.manufacturers,
            added: after.manufacturers.saturating_sub(before.manufacturers),
            models_initial: before.models,
            models_final: after.models,
            models_added: after.models.saturating_sub(before.models),
        }
    }
}

/// Grand totals.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Totals {
    pub initial: usize,
    #[serde(rename = "final")]
    pub final_count: usize,
    pub added: usize,
}

impl Totals {
    const fn new(initial: usize, final_count: usize) -> Self {
        Self {
            initial,
            final_count,
            added: final_count.saturating_sub(initial),
        }
    }
}

/// Decision tallies by status.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionCounts {
    pub accepted: usize,
    pub rejected: usize,
    pub unclassified: usize,
    pub missing_category: usize,
    pub blocked: usize,
    /// Fingerprint pairs the pass adds to the registry.
    pub new_pairs: usize,
}

/// Per-category and total coverage deltas plus every decision.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeReport {
    pub categories: BTreeMap<Category, CategoryDelta>,
    /// Manufacturer totals.
    pub totals: Totals,
    pub model_totals: Totals,
    /// Signed change in the manufacturer total.
    pub delta: i64,
    pub regressed: bool,
    /// Set once the proposed registry has been persisted.
    pub committed: bool,
    pub digest_before: String,
    pub digest_after: String,
    pub decision_counts: DecisionCounts,
    pub decisions: Vec<Decision>,
}

impl MergeReport {
    /// Compare two registries. Categories present on either side are listed;
    /// a category missing from `after` counts as zero.
    #[must_use]
    pub fn compare(before: &Registry, after: &Registry, decisions: Vec<Decision>) -> Self {
        let before_counts = before.counts();
        let after_counts = after.counts();
        let categories: BTreeMap<Category, CategoryDelta> = before_counts
            .keys()
            .chain(after_counts.keys())
            .map(|c| {
                let b = before_counts.get(c).copied().unwrap_or_default();
                let a = after_counts.get(c).copied().unwrap_or_default();
                (c.clone(), CategoryDelta::new(b, a))
            })
            .collect();

        let (b, a) = (before.total(), after.total());
        let mut decision_counts = DecisionCounts::default();
        for d in &decisions {
            let slot = match d.status {
                DecisionStatus::Accepted => &mut decision_counts.accepted,
                DecisionStatus::Rejected => &mut decision_counts.rejected,
                DecisionStatus::Unclassified => &mut decision_counts.unclassified,
                DecisionStatus::MissingCategory => &mut decision_counts.missing_category,
                DecisionStatus::Blocked => &mut decision_counts.blocked,
            };
            *slot += 1;
            decision_counts.new_pairs += d.new_pairs.len();
        }
        Self {
            categories,
            totals: Totals::new(b.manufacturers, a.manufacturers),
            model_totals: Totals::new(b.models, a.models),
            delta: signed_delta(b.manufacturers, a.manufacturers),
            regressed: false,
            committed: false,
            digest_before: before.digest(),
            digest_after: after.digest(),
            decision_counts,
            decisions,
        }
    }

    /// Sum of `added` over categories.
    #[must_use]
    pub fn added(&self) -> usize {
        self.categories.values().map(|d| d.added).sum()
    }
}

fn signed_delta(initial: usize, final_count: usize) -> i64 {
    let to_i64 = |n: usize| i64::try_from(n).unwrap_or(i64::MAX);
    to_i64(final_count) - to_i64(initial)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::registry::CategoryEntry;

    fn cat(s: &str) -> Category {
        Category::new(s).unwrap()
    }

    #[test]
    fn compare_counts_and_serializes_final() {
        let before: Registry = [(
            cat("plug_smart"),
            CategoryEntry::from_strings(["a"], ["TS011F"]),
        )]
        .into_iter()
        .collect();
        let mut after = before.clone();
        after
            .entry_mut(&cat("plug_smart"))
            .manufacturers
            .extend(CategoryEntry::from_strings(["b", "c"], Vec::<&str>::new()).manufacturers.iter().cloned());

        let report = MergeReport::compare(&before, &after, Vec::new());
        let delta = &report.categories[&cat("plug_smart")];
        assert_eq!((delta.initial, delta.final_count, delta.added), (1, 3, 2));
        assert_eq!(report.delta, 2);
        assert_eq!(report.added(), 2);
        assert_ne!(report.digest_before, report.digest_after);

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["categories"]["plug_smart"]["final"], 3);
        assert_eq!(json["totals"]["final"], 3);
    }

    #[test]
    fn missing_category_counts_as_zero() {
        let before: Registry = [(cat("siren"), CategoryEntry::from_strings(["a"], ["b"]))]
            .into_iter()
            .collect();
        let report = MergeReport::compare(&before, &Registry::new(), Vec::new());
        assert_eq!(report.categories[&cat("siren")].final_count, 0);
        assert_eq!(report.delta, -1);
    }
}
