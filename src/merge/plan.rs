//! PLAN step: turn validated findings into per-finding merge decisions.
//!
//! Each accepted finding is classified against the registry snapshot, then
//! its manufacturer identities are filtered three ways:
//!
//! - registry collisions (first assignment wins, see [`crate::collision`]),
//! - the exclusion overlay for the chosen category,
//! - earlier claims within the same batch, in input order.
//!
//! Only identities that survive all three are written. The finding's model
//! identities ride along only when at least one manufacturer survives, so a
//! model (wildcard or not) is never written without its manufacturer.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::debug;

use crate::classify::{ClassificationRule, classify};
use crate::collision::check_collision;
use crate::model::finding::Finding;
use crate::model::issue::{Issue, IssueCode};
use crate::model::registry::Registry;
use crate::model::types::{Category, FingerprintPair, Identity};
use crate::rules::RuleSet;
use crate::validate::ValidationResult;

/// What happens to one finding.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionStatus {
    /// Some identities will be written.
    Accepted,
    /// Failed validation; never classified.
    Rejected,
    /// No rule placed it.
    Unclassified,
    /// Classified into a category the registry does not hold.
    MissingCategory,
    /// Every manufacturer identity was filtered out.
    Blocked,
}

/// The merge decision for one finding.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Decision {
    pub index: usize,
    pub finding: String,
    pub status: DecisionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule: Option<ClassificationRule>,
    /// Manufacturer identities to write.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub manufacturers: Vec<Identity>,
    /// Model identities to write alongside them.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub models: Vec<Identity>,
    /// Pairs this decision writes that no category covered before.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub new_pairs: Vec<FingerprintPair>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub replace_existing: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<Issue>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub regression_risks: Vec<Issue>,
}

impl Decision {
    fn new(index: usize, finding: &Finding, status: DecisionStatus) -> Self {
        Self {
            index,
            finding: finding.label(),
            status,
            category: None,
            rule: None,
            manufacturers: Vec::new(),
            models: Vec::new(),
            new_pairs: Vec::new(),
            replace_existing: finding.replace_existing,
            warnings: Vec::new(),
            regression_risks: Vec::new(),
        }
    }

    #[must_use]
    pub fn is_accepted(&self) -> bool {
        self.status == DecisionStatus::Accepted
    }
}

/// Decide what to do with every finding. `validations` pairs with `findings`
/// by position.
#[must_use]
pub fn plan(
    findings: &[Finding],
    validations: &[ValidationResult],
    registry: &Registry,
    rules: &RuleSet,
) -> Vec<Decision> {
    let mut claims: BTreeMap<Identity, Category> = BTreeMap::new();
    findings
        .iter()
        .zip(validations)
        .enumerate()
        .map(|(index, (finding, validation))| {
            let decision = decide(index, finding, validation, registry, rules, &mut claims);
            debug!(
                index,
                finding = %decision.finding,
                status = ?decision.status,
                category = ?decision.category.as_ref().map(Category::as_str),
                new_pairs = decision.new_pairs.len(),
                "planned"
            );
            decision
        })
        .collect()
}

fn decide(
    index: usize,
    finding: &Finding,
    validation: &ValidationResult,
    registry: &Registry,
    rules: &RuleSet,
    claims: &mut BTreeMap<Identity, Category>,
) -> Decision {
    if !validation.is_valid {
        return Decision::new(index, finding, DecisionStatus::Rejected);
    }

    let classification = classify(finding, registry, rules);
    let mut decision = Decision::new(index, finding, DecisionStatus::Accepted);
    decision
        .regression_risks
        .extend(validation.regression_risks.iter().cloned());
    decision.rule = Some(classification.rule);
    decision.warnings.extend(classification.warnings);

    let Some(chosen) = classification.category else {
        decision.status = DecisionStatus::Unclassified;
        return decision;
    };
    decision.category = Some(chosen.clone());
    if !registry.contains_category(&chosen) {
        decision.status = DecisionStatus::MissingCategory;
        decision.warnings.push(Issue::new(
            IssueCode::UnknownCategory,
            format!("category {chosen} is not in the registry"),
        ));
        return decision;
    }

    let collisions = check_collision(finding, &chosen, registry, rules);
    decision.warnings.extend(collisions.warnings.iter().cloned());
    decision.regression_risks.extend(collisions.risks.iter().cloned());

    for id in collisions.admitted() {
        if rules
            .exclusions_for(id)
            .is_some_and(|forbidden| forbidden.contains(&chosen))
        {
            decision.warnings.push(Issue::new(
                IssueCode::ExcludedFromCategory,
                format!("{id} may not be written to {chosen}"),
            ));
            continue;
        }
        if let Some(owner) = claims.get(id)
            && owner != &chosen
            && rules.correction_for(id) != Some(&chosen)
        {
            decision.regression_risks.push(Issue::new(
                IssueCode::CrossCategoryCollision,
                format!("{id} was claimed earlier in this batch by {owner}; not added to {chosen}"),
            ));
            continue;
        }
        decision.manufacturers.push(id.clone());
    }

    if decision.manufacturers.is_empty() {
        decision.status = DecisionStatus::Blocked;
        return decision;
    }
    for id in &decision.manufacturers {
        claims.entry(id.clone()).or_insert_with(|| chosen.clone());
    }
    decision.models = finding.models.iter().flatten().cloned().collect();
    decision.new_pairs = finding
        .pairs()
        .into_iter()
        .filter(|pair| decision.manufacturers.contains(&pair.manufacturer))
        .filter(|pair| !registry.contains_pair(pair))
        .collect();
    decision
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ValidationConfig;
    use crate::model::registry::CategoryEntry;
    use crate::validate::Validator;

    fn cat(s: &str) -> Category {
        Category::new(s).unwrap()
    }

    fn registry() -> Registry {
        [
            (
                cat("climate_sensor"),
                CategoryEntry::from_strings(["_TZE200_existing"], ["TS0601"]),
            ),
            (cat("plug_smart"), CategoryEntry::default()),
            (cat("radiator_valve"), CategoryEntry::default()),
            (cat("button_wireless_4"), CategoryEntry::default()),
        ]
        .into_iter()
        .collect()
    }

    fn run(findings: &[Finding], registry: &Registry) -> Vec<Decision> {
        let rules = RuleSet::builtin().unwrap();
        let validator = Validator::new(&ValidationConfig::default(), &rules).unwrap();
        let validations = validator.validate_batch(findings);
        plan(findings, &validations, registry, &rules)
    }

    #[test]
    fn invalid_findings_are_rejected_unclassified() {
        let d = run(&[Finding::default()], &registry());
        assert_eq!(d[0].status, DecisionStatus::Rejected);
        assert_eq!(d[0].rule, None);
    }

    #[test]
    fn accepted_decision_carries_models() {
        let d = run(&[Finding::with_pair("_TZE204_qyr2m29i", "TS0601")], &registry());
        assert_eq!(d[0].status, DecisionStatus::Accepted);
        assert_eq!(d[0].category, Some(cat("radiator_valve")));
        assert_eq!(d[0].rule, Some(ClassificationRule::Correction));
        assert_eq!(d[0].models.len(), 1);
    }

    #[test]
    fn missing_category_is_not_written() {
        // correction target absent from the registry
        let d = run(&[Finding::with_pair("_TZE200_9xfjixap", "TS0601")], &registry());
        assert_eq!(d[0].status, DecisionStatus::MissingCategory);
        assert!(d[0].manufacturers.is_empty());
    }

    #[test]
    fn registry_collision_blocks_finding() {
        // _TZE200_existing lives in climate_sensor; TS0044 points at buttons
        let d = run(&[Finding::with_pair("_TZE200_existing", "TS0044")], &registry());
        assert_eq!(d[0].status, DecisionStatus::Blocked);
        assert!(d[0].models.is_empty());
        assert_eq!(d[0].regression_risks[0].code, IssueCode::CrossCategoryCollision);
    }

    #[test]
    fn first_claim_in_batch_wins() {
        let findings = vec![
            Finding::with_pair("_TZ3000_abcdefgh", "TS011F"),
            Finding::with_pair("_TZ3000_abcdefgh", "TS0044"),
        ];
        let d = run(&findings, &registry());
        assert_eq!(d[0].category, Some(cat("plug_smart")));
        assert_eq!(d[0].status, DecisionStatus::Accepted);
        assert_eq!(d[1].category, Some(cat("button_wireless_4")));
        assert_eq!(d[1].status, DecisionStatus::Blocked);
    }

    #[test]
    fn new_pairs_skip_covered_fingerprints() {
        let finding: Finding = serde_json::from_str(
            r#"{"manufacturerIdentity": ["_TZE200_existing", "_TZE200_newone12"],
                "modelIdentity": "TS0601"}"#,
        )
        .unwrap();
        let d = run(&[finding], &registry());
        assert_eq!(d[0].category, Some(cat("climate_sensor")));
        assert_eq!(d[0].manufacturers.len(), 2);
        let fresh: Vec<String> = d[0].new_pairs.iter().map(ToString::to_string).collect();
        assert_eq!(fresh, vec!["_TZE200_newone12/TS0601"]);
    }

    #[test]
    fn validation_risks_travel_with_the_decision() {
        let mut finding = Finding::with_pair("_TZ3000_abcdefgh", "TS011F");
        finding.replace_existing = true;
        let d = run(&[finding], &registry());
        assert_eq!(d[0].status, DecisionStatus::Accepted);
        assert_eq!(d[0].regression_risks[0].code, IssueCode::ReplaceExisting);
    }

    #[test]
    fn unclassified_finding() {
        let registry: Registry = [(cat("siren"), CategoryEntry::default())]
            .into_iter()
            .collect();
        let d = run(&[Finding::with_pair("_TZ3000_abcdefgh", "TS011F")], &registry);
        assert_eq!(d[0].status, DecisionStatus::Unclassified);
        assert_eq!(d[0].rule, Some(ClassificationRule::Unknown));
    }
}
