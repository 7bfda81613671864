//! Record validator: identification, pattern and known-mistake rules.
//!
//! [`Validator::validate`] is pure: it looks at one finding and the rule
//! set's wildcard tokens, never at the registry. Rules run in a fixed order
//! and some short-circuit; see the numbered comments in `validate`.
//! Invalid findings are reported, never raised as errors.

use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, instrument};

use crate::config::{CompiledPatterns, ConfigError, ValidationConfig, Weights};
use crate::model::finding::Finding;
use crate::model::issue::{Issue, IssueCode};
use crate::model::types::IdentityList;
use crate::rules::RuleSet;

/// Upper bound for confidence scores.
pub const MAX_CONFIDENCE: u32 = 100;

// ---------------------------------------------------------------------------
// ValidationResult
// ---------------------------------------------------------------------------

/// Verdict for one finding.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub is_valid: bool,
    /// Score in `0..=100`.
    pub confidence: u32,
    pub critical_errors: Vec<Issue>,
    pub warnings: Vec<Issue>,
    pub regression_risks: Vec<Issue>,
}

impl ValidationResult {
    /// `true` if any recorded issue carries `code`.
    #[must_use]
    pub fn has(&self, code: IssueCode) -> bool {
        self.critical_errors
            .iter()
            .chain(&self.warnings)
            .chain(&self.regression_risks)
            .any(|i| i.code == code)
    }

    /// Every issue code, in severity order (critical, warning, risk).
    #[must_use]
    pub fn codes(&self) -> Vec<IssueCode> {
        self.critical_errors
            .iter()
            .chain(&self.warnings)
            .chain(&self.regression_risks)
            .map(|i| i.code)
            .collect()
    }

    fn critical(&mut self, code: IssueCode, message: impl Into<String>) {
        self.critical_errors.push(Issue::new(code, message));
    }

    fn warn(&mut self, code: IssueCode, message: impl Into<String>) {
        self.warnings.push(Issue::new(code, message));
    }

    fn risk(&mut self, code: IssueCode, message: impl Into<String>) {
        self.regression_risks.push(Issue::new(code, message));
    }
}

// ---------------------------------------------------------------------------
// Validator
// ---------------------------------------------------------------------------

/// Which side of the pair a pattern check looks at.
#[derive(Clone, Copy)]
enum Side {
    Manufacturer,
    Model,
}

/// Outcome of a pattern check over one identity list.
enum PatternFit {
    Vendor,
    Generic,
    Invalid(String),
}

/// Stateless validator bound to a configuration and rule set.
#[derive(Debug)]
pub struct Validator<'r> {
    threshold: u32,
    weights: Weights,
    patterns: CompiledPatterns,
    rules: &'r RuleSet,
}

impl<'r> Validator<'r> {
    /// Build a validator.
    ///
    /// # Errors
    /// Returns a [`ConfigError`] if a configured pattern does not compile.
    pub fn new(config: &ValidationConfig, rules: &'r RuleSet) -> Result<Self, ConfigError> {
        Ok(Self {
            threshold: config.threshold,
            weights: config.weights.clone(),
            patterns: config.patterns.compile()?,
            rules,
        })
    }

    /// Acceptance threshold.
    #[must_use]
    pub const fn threshold(&self) -> u32 {
        self.threshold
    }

    /// Validate one finding.
    #[must_use]
    pub fn validate(&self, finding: &Finding) -> ValidationResult {
        let mut result = ValidationResult::default();
        if let Some(problem) = &finding.malformed {
            result.critical(IssueCode::MalformedFinding, problem.clone());
            return result;
        }
        let mfrs = finding.manufacturers.as_ref();
        let models = finding.models.as_ref();
        let has_wildcard = models.is_some_and(|m| m.iter().any(|id| self.rules.is_wildcard(id)));

        // 1. nothing to identify
        let (Some(mfrs), Some(models)) = (mfrs, models) else {
            if mfrs.is_none() && models.is_none() {
                result.critical(
                    IssueCode::MissingIdentities,
                    "neither manufacturer nor model identity present",
                );
            // 2. wildcard trap, reported distinctly from a plain missing pair
            } else if has_wildcard && mfrs.is_none() {
                result.critical(
                    IssueCode::WildcardWithoutManufacturer,
                    "wildcard model token without a manufacturer identity",
                );
            // 3. half a pair
            } else if mfrs.is_none() {
                result.critical(IssueCode::MissingPair, "manufacturer identity absent");
            } else {
                result.critical(IssueCode::MissingPair, "model identity absent");
            }
            return result;
        };

        let mut score = self.weights.pair_present;
        if has_wildcard {
            score += self.weights.wildcard_paired;
        }

        // 4-5. identity shapes; an invalid side short-circuits
        for (side, list) in [(Side::Manufacturer, mfrs), (Side::Model, models)] {
            match self.fit(side, list) {
                PatternFit::Vendor => score += self.weights.vendor_match,
                PatternFit::Generic => {
                    score += self.weights.generic_match;
                    let (code, what) = match side {
                        Side::Manufacturer => {
                            (IssueCode::GenericManufacturerPattern, "manufacturer")
                        }
                        Side::Model => (IssueCode::GenericModelPattern, "model"),
                    };
                    result.warn(
                        code,
                        format!("{what} identity does not match the vendor pattern but is a valid generic identity"),
                    );
                }
                PatternFit::Invalid(value) => {
                    let (code, what) = match side {
                        Side::Manufacturer => {
                            (IssueCode::InvalidManufacturerPattern, "manufacturer")
                        }
                        Side::Model => (IssueCode::InvalidModelPattern, "model"),
                    };
                    result.critical(code, format!("invalid {what} identity {value:?}"));
                    result.confidence = score.min(MAX_CONFIDENCE);
                    return result;
                }
            }
        }
        result.confidence = score.min(MAX_CONFIDENCE);

        // 6. known mistakes
        self.known_mistakes(mfrs, models, &mut result);

        // 7. non-regression intent
        if finding.is_removal() {
            result.critical(
                IssueCode::RemovalOperation,
                format!(
                    "operation {:?} would remove identities",
                    finding.operation.as_deref().unwrap_or_default()
                ),
            );
        }
        if finding.replace_existing {
            result.risk(
                IssueCode::ReplaceExisting,
                "replaceExisting asks to rebuild existing entries; they are kept and the finding is only added",
            );
        }
        if finding.preserve_legacy == Some(false) {
            result.risk(
                IssueCode::LegacyNotPreserved,
                "preserveLegacy is false; legacy entries may be dropped",
            );
        }

        // 8. verdict
        result.is_valid =
            result.critical_errors.is_empty() && result.confidence >= self.threshold;
        if result.critical_errors.is_empty() && !result.is_valid {
            result.warn(
                IssueCode::BelowThreshold,
                format!(
                    "confidence {} is below the threshold {}",
                    result.confidence, self.threshold
                ),
            );
        }
        result
    }

    /// Validate a batch in parallel. Results are in input order.
    #[instrument(skip_all, fields(findings = findings.len()))]
    pub fn validate_batch(&self, findings: &[Finding]) -> Vec<ValidationResult> {
        let results: Vec<ValidationResult> =
            findings.par_iter().map(|f| self.validate(f)).collect();
        for (index, (finding, result)) in findings.iter().zip(&results).enumerate() {
            if !result.is_valid {
                debug!(
                    index,
                    finding = %finding.label(),
                    codes = ?result.codes(),
                    "finding rejected"
                );
            }
        }
        results
    }

    fn fit(&self, side: Side, list: &IdentityList) -> PatternFit {
        let (vendor, generic) = match side {
            Side::Manufacturer => (
                &self.patterns.manufacturer_vendor,
                &self.patterns.manufacturer_generic,
            ),
            Side::Model => (&self.patterns.model_vendor, &self.patterns.model_generic),
        };
        if let Some(bad) = list.iter().find(|id| !generic.is_match(id.as_str())) {
            return PatternFit::Invalid(bad.to_string());
        }
        if list.iter().all(|id| vendor.is_match(id.as_str())) {
            PatternFit::Vendor
        } else {
            PatternFit::Generic
        }
    }

    fn known_mistakes(
        &self,
        mfrs: &IdentityList,
        models: &IdentityList,
        result: &mut ValidationResult,
    ) {
        if models.declared_as_list() && models.iter().all(|id| self.rules.is_wildcard(id)) {
            result.critical(
                IssueCode::WildcardOnlyModelList,
                format!(
                    "model list {:?} holds only the wildcard token",
                    models.to_strings()
                ),
            );
            return;
        }
        // Per list: a wildcard model list beside a vendor manufacturer list
        // is an ordinary fingerprint.
        for list in [models, mfrs] {
            let wildcard = list.iter().any(|id| self.rules.is_wildcard(id));
            let vendor_mfr = list
                .iter()
                .any(|id| self.patterns.manufacturer_vendor.is_match(id.as_str()));
            if wildcard && vendor_mfr {
                result.critical(
                    IssueCode::MixedIdentityList,
                    format!(
                        "list {:?} mixes the wildcard token with manufacturer identities",
                        list.to_strings()
                    ),
                );
                return;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// ValidationReport
// ---------------------------------------------------------------------------

/// Batch totals.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationSummary {
    pub total: usize,
    pub valid: usize,
    pub invalid: usize,
    pub warnings: usize,
    pub critical_errors: usize,
    pub regression_risks: usize,
}

/// Per-finding issue counts.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorCounts {
    pub critical_errors: usize,
    pub warnings: usize,
    pub regression_risks: usize,
}

/// One finding's row in the report.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationDetail {
    pub index: usize,
    pub manufacturer_identity: Vec<String>,
    pub model_identity: Vec<String>,
    pub is_valid: bool,
    pub confidence: u32,
    pub error_counts: ErrorCounts,
    pub codes: Vec<IssueCode>,
}

/// The validation audit document.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub strict: bool,
    pub threshold: u32,
    pub summary: ValidationSummary,
    pub details: Vec<ValidationDetail>,
}

impl ValidationReport {
    /// Build a report from findings and their results (same order).
    #[must_use]
    pub fn build(
        findings: &[Finding],
        results: &[ValidationResult],
        strict: bool,
        threshold: u32,
    ) -> Self {
        let mut summary = ValidationSummary::default();
        let mut details = Vec::with_capacity(results.len());
        for (index, (finding, result)) in findings.iter().zip(results).enumerate() {
            summary.total += 1;
            if result.is_valid {
                summary.valid += 1;
            } else {
                summary.invalid += 1;
            }
            summary.warnings += result.warnings.len();
            summary.critical_errors += result.critical_errors.len();
            summary.regression_risks += result.regression_risks.len();
            details.push(ValidationDetail {
                index,
                manufacturer_identity: strings(finding.manufacturers.as_ref()),
                model_identity: strings(finding.models.as_ref()),
                is_valid: result.is_valid,
                confidence: result.confidence,
                error_counts: ErrorCounts {
                    critical_errors: result.critical_errors.len(),
                    warnings: result.warnings.len(),
                    regression_risks: result.regression_risks.len(),
                },
                codes: result.codes(),
            });
        }
        Self {
            strict,
            threshold,
            summary,
            details,
        }
    }

    /// `false` only in strict mode with at least one critical error.
    #[must_use]
    pub const fn passes(&self) -> bool {
        !self.strict || self.summary.critical_errors == 0
    }
}

fn strings(list: Option<&IdentityList>) -> Vec<String> {
    list.map(IdentityList::to_strings).unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::finding::parse_findings;

    fn rules() -> RuleSet {
        RuleSet::builtin().unwrap()
    }

    fn run(json: &str) -> ValidationResult {
        let rules = rules();
        let validator = Validator::new(&ValidationConfig::default(), &rules).unwrap();
        let finding: Finding = serde_json::from_str(json).unwrap();
        validator.validate(&finding)
    }

    #[test]
    fn vendor_pair_with_wildcard_scores_full() {
        let r = run(r#"{"manufacturerIdentity": "_TZE204_qyr2m29i", "modelIdentity": "TS0601"}"#);
        assert!(r.is_valid);
        assert_eq!(r.confidence, 100);
        assert!(r.warnings.is_empty());
    }

    #[test]
    fn vendor_pair_without_wildcard() {
        let r = run(r#"{"manufacturerIdentity": "_TZ3000_mcxw5ehu", "modelIdentity": "TS0202"}"#);
        assert!(r.is_valid);
        assert_eq!(r.confidence, 80);
    }

    #[test]
    fn missing_both_sides() {
        let r = run("{}");
        assert!(!r.is_valid);
        assert_eq!(r.confidence, 0);
        assert_eq!(r.codes(), vec![IssueCode::MissingIdentities]);
    }

    #[test]
    fn missing_model_is_missing_pair() {
        let r = run(r#"{"manufacturerIdentity": "_TZ3000_mcxw5ehu"}"#);
        assert!(!r.is_valid);
        assert_eq!(r.codes(), vec![IssueCode::MissingPair]);
    }

    #[test]
    fn wildcard_without_manufacturer_is_distinct() {
        let r = run(r#"{"manufacturerIdentity": null, "modelIdentity": "TS0601"}"#);
        assert!(!r.is_valid);
        assert_eq!(r.codes(), vec![IssueCode::WildcardWithoutManufacturer]);
        assert!(!r.has(IssueCode::MissingPair));
    }

    #[test]
    fn non_wildcard_model_alone_is_missing_pair() {
        let r = run(r#"{"modelIdentity": "TS0202"}"#);
        assert_eq!(r.codes(), vec![IssueCode::MissingPair]);
    }

    #[test]
    fn generic_manufacturer_warns_but_may_pass() {
        // 30 + 20 + 10 + 25 = 85
        let r = run(r#"{"manufacturerIdentity": "HOBEIAN", "modelIdentity": "TS0601"}"#);
        assert!(r.is_valid);
        assert_eq!(r.confidence, 85);
        assert!(r.has(IssueCode::GenericManufacturerPattern));
    }

    #[test]
    fn generic_both_sides_below_threshold() {
        // 30 + 10 + 10 = 50
        let r = run(r#"{"manufacturerIdentity": "HOBEIAN", "modelIdentity": "ZG-204ZL"}"#);
        assert!(!r.is_valid);
        assert_eq!(r.confidence, 50);
        assert!(r.critical_errors.is_empty());
        assert!(r.has(IssueCode::BelowThreshold));
        assert!(r.has(IssueCode::GenericModelPattern));
    }

    #[test]
    fn invalid_manufacturer_short_circuits() {
        let r = run(r#"{"manufacturerIdentity": "bad name!", "modelIdentity": "TS0601"}"#);
        assert!(!r.is_valid);
        assert_eq!(r.codes(), vec![IssueCode::InvalidManufacturerPattern]);
    }

    #[test]
    fn invalid_model_reported() {
        let r = run(r#"{"manufacturerIdentity": "_TZ3000_mcxw5ehu", "modelIdentity": "TS 0202"}"#);
        assert!(r.has(IssueCode::InvalidModelPattern));
        assert!(!r.has(IssueCode::GenericManufacturerPattern));
    }

    #[test]
    fn wildcard_only_model_list_rejected() {
        let r = run(r#"{"manufacturerIdentity": "_TZE200_a8sdabtg", "modelIdentity": ["TS0601"]}"#);
        assert!(!r.is_valid);
        assert!(r.has(IssueCode::WildcardOnlyModelList));
    }

    #[test]
    fn scalar_wildcard_is_not_a_list_mistake() {
        let r = run(r#"{"manufacturerIdentity": "_TZE200_a8sdabtg", "modelIdentity": "TS0601"}"#);
        assert!(r.is_valid);
        assert!(!r.has(IssueCode::WildcardOnlyModelList));
    }

    #[test]
    fn mixed_list_rejected() {
        let r = run(
            r#"{"manufacturerIdentity": "_TZE200_a8sdabtg", "modelIdentity": ["TS0601", "_TZE200_dwcarsat"]}"#,
        );
        assert!(!r.is_valid);
        assert!(r.has(IssueCode::MixedIdentityList));
    }

    #[test]
    fn wildcard_beside_a_manufacturer_list_is_not_mixed() {
        let r = run(
            r#"{"manufacturerIdentity": ["_TZE200_a8sdabtg"], "modelIdentity": ["TS0601", "TS0002"]}"#,
        );
        assert!(r.is_valid);
        assert!(!r.has(IssueCode::MixedIdentityList));
    }

    #[test]
    fn malformed_record_is_critical_and_alone() {
        let rules = rules();
        let validator = Validator::new(&ValidationConfig::default(), &rules).unwrap();
        let findings = parse_findings(
            r#"[{"manufacturerIdentity": 42, "modelIdentity": "TS0601"},
                {"manufacturerIdentity": "_TZ3000_mcxw5ehu", "modelIdentity": "TS0202"}]"#,
        )
        .unwrap();
        let results = validator.validate_batch(&findings);
        assert!(!results[0].is_valid);
        assert_eq!(results[0].codes(), vec![IssueCode::MalformedFinding]);
        assert_eq!(results[0].confidence, 0);
        assert!(results[1].is_valid);

        let report = ValidationReport::build(&findings, &results, false, 60);
        assert_eq!(report.summary.invalid, 1);
        assert_eq!(report.summary.valid, 1);
    }

    #[test]
    fn removal_is_critical() {
        let r = run(
            r#"{"manufacturerIdentity": "_TZ3000_mcxw5ehu", "modelIdentity": "TS0202", "operation": "remove"}"#,
        );
        assert!(!r.is_valid);
        assert!(r.has(IssueCode::RemovalOperation));
    }

    #[test]
    fn replace_and_legacy_are_risks_only() {
        let r = run(
            r#"{"manufacturerIdentity": "_TZ3000_mcxw5ehu", "modelIdentity": "TS0202",
                "replaceExisting": true, "preserveLegacy": false}"#,
        );
        assert!(r.is_valid);
        assert_eq!(r.regression_risks.len(), 2);
        assert!(r.has(IssueCode::ReplaceExisting));
        assert!(r.has(IssueCode::LegacyNotPreserved));
    }

    #[test]
    fn custom_weights_and_threshold() {
        let rules = rules();
        let mut cfg = ValidationConfig::default();
        cfg.threshold = 90;
        let validator = Validator::new(&cfg, &rules).unwrap();
        let r = validator.validate(&Finding::with_pair("_TZ3000_mcxw5ehu", "TS0202"));
        assert!(!r.is_valid);
        assert!(r.has(IssueCode::BelowThreshold));

        cfg.weights.pair_present = 90;
        let validator = Validator::new(&cfg, &rules).unwrap();
        let r = validator.validate(&Finding::with_pair("_TZE204_qyr2m29i", "TS0601"));
        assert_eq!(r.confidence, MAX_CONFIDENCE);
    }

    #[test]
    fn batch_preserves_order() {
        let rules = rules();
        let validator = Validator::new(&ValidationConfig::default(), &rules).unwrap();
        let findings: Vec<Finding> = (0..64)
            .map(|i| {
                if i % 3 == 0 {
                    Finding::default()
                } else {
                    Finding::with_pair(&format!("_TZ3000_{i:08}"), "TS011F")
                }
            })
            .collect();
        let results = validator.validate_batch(&findings);
        for (i, r) in results.iter().enumerate() {
            assert_eq!(r.is_valid, i % 3 != 0, "index {i}");
        }
    }

    #[test]
    fn report_counts_and_strict_gate() {
        let rules = rules();
        let validator = Validator::new(&ValidationConfig::default(), &rules).unwrap();
        let findings = vec![
            Finding::with_pair("_TZ3000_mcxw5ehu", "TS0202"),
            Finding::default(),
        ];
        let results = validator.validate_batch(&findings);

        let lax = ValidationReport::build(&findings, &results, false, 60);
        assert_eq!(lax.summary.total, 2);
        assert_eq!(lax.summary.valid, 1);
        assert_eq!(lax.summary.invalid, 1);
        assert_eq!(lax.summary.critical_errors, 1);
        assert_eq!(lax.details[1].codes, vec![IssueCode::MissingIdentities]);
        assert!(lax.passes());

        let strict = ValidationReport::build(&findings, &results, true, 60);
        assert!(!strict.passes());
    }

    #[test]
    fn report_json_shape() {
        let findings = vec![Finding::with_pair("_TZ3000_mcxw5ehu", "TS0202")];
        let results = vec![ValidationResult {
            is_valid: true,
            confidence: 80,
            ..ValidationResult::default()
        }];
        let json = serde_json::to_value(ValidationReport::build(&findings, &results, false, 60))
            .unwrap();
        assert_eq!(json["summary"]["criticalErrors"], 0);
        assert_eq!(json["details"][0]["manufacturerIdentity"][0], "_TZ3000_mcxw5ehu");
        assert_eq!(json["details"][0]["errorCounts"]["warnings"], 0);
    }
}
