//! Anti-collision checker.
//!
//! Flags, never resolves, a manufacturer identity that already lives in a
//! different category. The first assignment wins: a conflicting identity is
//! left out of the merge delta unless a correction overlay entry forces it
//! into the chosen category.

use serde::Serialize;
use tracing::warn;

use crate::model::finding::Finding;
use crate::model::issue::{Issue, IssueCode};
use crate::model::registry::Registry;
use crate::model::types::{Category, Identity};
use crate::rules::RuleSet;

/// What the registry says about one identity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CollisionStatus {
    /// Not in any category.
    Clear,
    /// Already in the chosen category.
    SameCategory,
    /// In another category; excluded from the delta.
    Conflict,
    /// In another category, but a correction entry forces it into the chosen one.
    CorrectionOverride,
}

impl CollisionStatus {
    /// `true` if the identity may be written to the chosen category.
    #[must_use]
    pub const fn admits(self) -> bool {
        !matches!(self, Self::Conflict)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityCollision {
    pub identity: Identity,
    pub status: CollisionStatus,
    /// First other category holding the identity, in sorted order.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub existing_category: Option<Category>,
}

/// Collision findings for one finding against one chosen category.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollisionReport {
    pub identities: Vec<IdentityCollision>,
    pub warnings: Vec<Issue>,
    pub risks: Vec<Issue>,
}

impl CollisionReport {
    /// `true` if any identity conflicts.
    #[must_use]
    pub fn conflict(&self) -> bool {
        self.identities
            .iter()
            .any(|c| c.status == CollisionStatus::Conflict)
    }

    /// Category of the first conflicting identity.
    #[must_use]
    pub fn existing_category(&self) -> Option<&Category> {
        self.identities
            .iter()
            .find(|c| c.status == CollisionStatus::Conflict)
            .and_then(|c| c.existing_category.as_ref())
    }

    /// Identities that may be written to the chosen category.
    pub fn admitted(&self) -> impl Iterator<Item = &Identity> {
        self.identities
            .iter()
            .filter(|c| c.status.admits())
            .map(|c| &c.identity)
    }
}

/// Check every manufacturer identity of `finding` against `registry`.
#[must_use]
pub fn check_collision(
    finding: &Finding,
    chosen: &Category,
    registry: &Registry,
    rules: &RuleSet,
) -> CollisionReport {
    let mut report = CollisionReport::default();
    for id in finding.manufacturers.iter().flatten() {
        let homes = registry.locate_manufacturer(id);
        let other = homes.iter().copied().find(|c| *c != chosen).cloned();
        let (status, existing_category) = if homes.contains(&chosen) {
            (CollisionStatus::SameCategory, None)
        } else if let Some(other) = other {
            if rules.correction_for(id) == Some(chosen) {
                (CollisionStatus::CorrectionOverride, Some(other))
            } else {
                (CollisionStatus::Conflict, Some(other))
            }
        } else {
            (CollisionStatus::Clear, None)
        };

        match (status, &existing_category) {
            (CollisionStatus::SameCategory, _) => report.warnings.push(Issue::new(
                IssueCode::SameCategoryReadd,
                format!("{id} is already in {chosen}"),
            )),
            (CollisionStatus::CorrectionOverride, Some(other)) => report.warnings.push(Issue::new(
                IssueCode::CorrectionOverride,
                format!("{id} is in {other}; correction overlay moves it to {chosen}"),
            )),
            (CollisionStatus::Conflict, Some(other)) => {
                warn!(identity = %id, existing = %other, chosen = %chosen, "cross-category collision");
                report.risks.push(Issue::new(
                    IssueCode::CrossCategoryCollision,
                    format!("{id} already belongs to {other}; not added to {chosen}"),
                ));
            }
            _ => {}
        }
        report.identities.push(IdentityCollision {
            identity: id.clone(),
            status,
            existing_category,
        });
    }
    report
}
