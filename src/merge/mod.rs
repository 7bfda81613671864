//! Non-regression merge engine.
//!
//! Pipeline:
//!
//! - **plan**: classify each accepted finding, filter its identities through
//!   the collision checker and overlays ([`plan`] module).
//! - **apply**: union accepted identities into a proposed registry. Nothing
//!   is ever removed; `replaceExisting` is reported as a regression risk by
//!   the validator and otherwise treated like any other finding.
//! - **check**: every category, and the grand total, must be non-decreasing
//!   for both manufacturers and models, and every identity a category held
//!   before must still be there. Any violation aborts the whole pass.
//!
//! The engine is pure: it returns a proposed registry and a report. Writing
//! the result is the caller's job, through a [`crate::store::RegistryStore`].
//!
//! # Determinism guarantee
//!
//! The same registry, rules and findings always produce the same proposed
//! registry and report:
//!
//! - Categories and identities are kept in sorted (case-folded) order.
//! - Batch-internal claims are settled in input order.
//! - No timestamps or randomness enter the report.

pub mod plan;
pub mod report;

#[cfg(test)]
mod determinism_tests;

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use thiserror::Error;
use tracing::{info, instrument};

use crate::model::registry::{CategoryEntry, Registry};
use crate::model::types::{Category, Identity};

pub use plan::{Decision, DecisionStatus, plan};
pub use report::{CategoryDelta, MergeReport, Totals};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Which count regressed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CountSide {
    Manufacturers,
    Models,
}

impl fmt::Display for CountSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Manufacturers => "manufacturers",
            Self::Models => "models",
        })
    }
}

/// A broken non-regression invariant.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum RegressionViolation {
    #[error("coverage decreased in category {category}: {side} {initial} -> {final_count}")]
    Category {
        category: Category,
        side: CountSide,
        initial: usize,
        final_count: usize,
    },
    #[error("total coverage decreased: {side} {initial} -> {final_count}")]
    Total {
        side: CountSide,
        initial: usize,
        final_count: usize,
    },
    #[error("coverage decreased in category {category}: {side} identity {identity} would be dropped")]
    Dropped {
        category: Category,
        side: CountSide,
        identity: Identity,
    },
}

/// Fatal merge errors. Nothing is written when one is returned.
#[derive(Debug, Error)]
pub enum MergeError {
    /// The proposed registry would shrink somewhere.
    #[error("{violation}; merge aborted, registry untouched")]
    Regression {
        violation: RegressionViolation,
        /// The report for the aborted pass, with `regressed` set.
        report: Box<MergeReport>,
    },
}

impl MergeError {
    /// The report describing the aborted pass.
    #[must_use]
    pub fn report(&self) -> &MergeReport {
        match self {
            Self::Regression { report, .. } => report,
        }
    }
}

// ---------------------------------------------------------------------------
// Apply + check
// ---------------------------------------------------------------------------

/// A successful merge computation.
#[derive(Clone, Debug)]
pub struct MergeOutcome {
    pub proposed: Registry,
    pub report: MergeReport,
    /// Entries for the categories that changed.
    pub updates: BTreeMap<Category, CategoryEntry>,
}

/// Apply `decisions` to `registry` and check the non-regression invariant.
///
/// # Errors
/// Returns [`MergeError::Regression`] naming the first offending category
/// (in sorted order) if any count would decrease or any identity would be
/// dropped.
#[instrument(skip_all, fields(decisions = decisions.len(), categories = registry.len()))]
pub fn merge(registry: &Registry, decisions: Vec<Decision>) -> Result<MergeOutcome, MergeError> {
    let proposed = apply(registry, &decisions);
    let mut report = MergeReport::compare(registry, &proposed, decisions);

    if let Err(violation) = check_non_regression(registry, &proposed) {
        report.regressed = true;
        return Err(MergeError::Regression {
            violation,
            report: Box::new(report),
        });
    }

    let updates: BTreeMap<Category, CategoryEntry> = proposed
        .iter()
        .filter(|(c, e)| registry.get(c) != Some(*e))
        .map(|(c, e)| (c.clone(), e.clone()))
        .collect();
    info!(
        added = report.added(),
        total = report.totals.final_count,
        changed = updates.len(),
        "merge computed"
    );
    Ok(MergeOutcome {
        proposed,
        report,
        updates,
    })
}

/// Build the proposed registry: accepted decisions are unioned into their
/// category.
#[must_use]
pub fn apply(registry: &Registry, decisions: &[Decision]) -> Registry {
    let mut proposed = registry.clone();
    for decision in decisions.iter().filter(|d| d.is_accepted()) {
        let Some(category) = &decision.category else {
            continue;
        };
        let entry = proposed.entry_mut(category);
        entry.manufacturers.extend(decision.manufacturers.iter().cloned());
        entry.models.extend(decision.models.iter().cloned());
    }
    proposed
}

/// Every category of `before` must have at least as many manufacturers and
/// models in `after`, and so must the totals. Counts alone are not enough:
/// every identity of `before` must also be in the same category of `after`.
///
/// # Errors
/// Returns the first violation, categories in sorted order. Count checks
/// come before identity checks within a category.
pub fn check_non_regression(before: &Registry, after: &Registry) -> Result<(), RegressionViolation> {
    let empty = CategoryEntry::default();
    for (category, entry) in before.iter() {
        let kept = after.get(category).unwrap_or(&empty);
        let (b, a) = (entry.counts(), kept.counts());
        for (side, initial, final_count) in [
            (CountSide::Manufacturers, b.manufacturers, a.manufacturers),
            (CountSide::Models, b.models, a.models),
        ] {
            if final_count < initial {
                return Err(RegressionViolation::Category {
                    category: category.clone(),
                    side,
                    initial,
                    final_count,
                });
            }
        }
        for (side, was, now) in [
            (CountSide::Manufacturers, &entry.manufacturers, &kept.manufacturers),
            (CountSide::Models, &entry.models, &kept.models),
        ] {
            if let Some(identity) = was.iter().find(|id| !now.contains(id)) {
                return Err(RegressionViolation::Dropped {
                    category: category.clone(),
                    side,
                    identity: identity.clone(),
                });
            }
        }
    }
    let (b, a) = (before.total(), after.total());
    for (side, initial, final_count) in [
        (CountSide::Manufacturers, b.manufacturers, a.manufacturers),
        (CountSide::Models, b.models, a.models),
    ] {
        if final_count < initial {
            return Err(RegressionViolation::Total {
                side,
                initial,
                final_count,
            });
        }
    }
    Ok(())
}
