//! Category classifier.
//!
//! Precedence, first match wins:
//!
//! 1. correction overlay (any manufacturer identity, in finding order)
//! 2. exclusion overlay: collects categories the heuristics below may not pick
//! 3. exact model table (wildcard tokens skipped)
//! 4. manufacturer prefix / regex table
//! 5. description keywords
//! 6. broad prefix fallbacks
//! 7. `unknown`
//!
//! Heuristic rules (3-6) only yield a category the registry already holds.

use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;
use tracing::debug;

use crate::model::finding::Finding;
use crate::model::issue::{Issue, IssueCode};
use crate::model::registry::Registry;
use crate::model::types::Category;
use crate::rules::RuleSet;

/// Label used for findings no rule could place.
pub const UNKNOWN: &str = "unknown";

/// Which rule produced a classification.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationRule {
    Correction,
    ModelTable,
    ManufacturerTable,
    Keyword,
    Fallback,
    Unknown,
}

impl fmt::Display for ClassificationRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Correction => "correction",
            Self::ModelTable => "model_table",
            Self::ManufacturerTable => "manufacturer_table",
            Self::Keyword => "keyword",
            Self::Fallback => "fallback",
            Self::Unknown => "unknown",
        })
    }
}

/// Result of classifying one finding.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Classification {
    /// Chosen category; `None` means unknown.
    pub category: Option<Category>,
    pub rule: ClassificationRule,
    /// The identity or keyword that fired.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched: Option<String>,
    /// Categories ruled out by the exclusion overlay.
    #[serde(skip_serializing_if = "BTreeSet::is_empty")]
    pub excluded: BTreeSet<Category>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<Issue>,
}

impl Classification {
    fn hit(category: &Category, rule: ClassificationRule, matched: &str) -> Self {
        Self {
            category: Some(category.clone()),
            rule,
            matched: Some(matched.to_owned()),
            excluded: BTreeSet::new(),
            warnings: Vec::new(),
        }
    }

    #[must_use]
    pub const fn is_unknown(&self) -> bool {
        self.category.is_none()
    }

    /// The category name, or `unknown`.
    #[must_use]
    pub fn label(&self) -> &str {
        self.category.as_ref().map_or(UNKNOWN, Category::as_str)
    }
}

/// Classify `finding` against `registry` using `rules`.
#[must_use]
pub fn classify(finding: &Finding, registry: &Registry, rules: &RuleSet) -> Classification {
    let result = classify_inner(finding, registry, rules);
    debug!(
        finding = %finding.label(),
        category = result.label(),
        rule = %result.rule,
        "classified"
    );
    result
}

fn classify_inner(finding: &Finding, registry: &Registry, rules: &RuleSet) -> Classification {
    let mfrs: Vec<_> = finding.manufacturers.iter().flatten().collect();
    let models: Vec<_> = finding
        .models
        .iter()
        .flatten()
        .filter(|m| !rules.is_wildcard(m))
        .collect();

    for id in &mfrs {
        if let Some(category) = rules.correction_for(id) {
            return Classification::hit(category, ClassificationRule::Correction, id.as_str());
        }
    }

    let excluded: BTreeSet<Category> = mfrs
        .iter()
        .filter_map(|id| rules.exclusions_for(id))
        .flatten()
        .cloned()
        .collect();
    let eligible = |c: &Category| registry.contains_category(c) && !excluded.contains(c);

    let found = rules
        .catalog()
        .iter()
        .filter(|r| eligible(&r.category))
        .find_map(|rule| {
            models
                .iter()
                .find(|m| rule.models.contains(m))
                .map(|m| Classification::hit(&rule.category, ClassificationRule::ModelTable, m.as_str()))
        })
        .or_else(|| {
            rules
                .catalog()
                .iter()
                .filter(|r| eligible(&r.category))
                .find_map(|rule| {
                    mfrs.iter().find(|id| rule.matches_manufacturer(id)).map(|id| {
                        Classification::hit(
                            &rule.category,
                            ClassificationRule::ManufacturerTable,
                            id.as_str(),
                        )
                    })
                })
        })
        .or_else(|| {
            let text = finding.text();
            if text.is_empty() {
                return None;
            }
            rules
                .catalog()
                .iter()
                .filter(|r| eligible(&r.category))
                .find_map(|rule| {
                    rule.matching_keyword(&text).map(|k| {
                        Classification::hit(&rule.category, ClassificationRule::Keyword, k.as_str())
                    })
                })
        })
        .or_else(|| {
            rules
                .fallbacks()
                .iter()
                .filter(|f| eligible(&f.category))
                .find_map(|fallback| {
                    mfrs.iter().find(|id| fallback.matches(id)).map(|id| {
                        Classification::hit(
                            &fallback.category,
                            ClassificationRule::Fallback,
                            id.as_str(),
                        )
                    })
                })
        });

    let mut result = found.unwrap_or_else(|| Classification {
        category: None,
        rule: ClassificationRule::Unknown,
        matched: None,
        excluded: BTreeSet::new(),
        warnings: vec![Issue::new(
            IssueCode::UnknownCategory,
            format!("no rule places {}", finding.label()),
        )],
    });
    if !excluded.is_empty() {
        result.warnings.push(Issue::new(
            IssueCode::ExcludedFromCategory,
            format!(
                "excluded from {}",
                excluded
                    .iter()
                    .map(Category::as_str)
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        ));
    }
    result.excluded = excluded;
    result
}
