//! One batch pass: load, validate, plan, merge, commit.
//!
//! These are the entry points the binary drives. Each one returns a report
//! value; rendering and exit codes belong to the caller.

use serde::Serialize;
use thiserror::Error;
use tracing::{info, instrument};

use crate::classify::{Classification, classify};
use crate::config::{ConfigError, ValidationConfig};
use crate::merge::{MergeError, MergeOutcome, MergeReport, merge, plan};
use crate::model::finding::Finding;
use crate::model::registry::Registry;
use crate::rules::RuleSet;
use crate::store::{RegistryStore, StoreError};
use crate::validate::{ValidationReport, ValidationResult, Validator};

/// Errors that end a pass.
#[derive(Debug, Error)]
pub enum PassError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Another writer holds the registry.
    #[error("could not lock registry: {0}")]
    Lock(#[source] StoreError),

    /// The registry could not be loaded.
    #[error("could not load registry: {0}")]
    Load(#[source] StoreError),

    /// The non-regression check failed; nothing was written.
    #[error(transparent)]
    Merge(#[from] MergeError),

    /// The merge was sound but writing it failed. Committed state is as
    /// before the pass.
    #[error("could not commit registry: {source}")]
    Commit {
        #[source]
        source: StoreError,
        report: Box<MergeReport>,
    },
}

impl PassError {
    /// The merge report, when the pass got far enough to compute one.
    #[must_use]
    pub fn report(&self) -> Option<&MergeReport> {
        match self {
            Self::Merge(e) => Some(e.report()),
            Self::Commit { report, .. } => Some(report),
            Self::Config(_) | Self::Lock(_) | Self::Load(_) => None,
        }
    }
}

// ---------------------------------------------------------------------------
// validate
// ---------------------------------------------------------------------------

/// Validation results for a batch.
#[derive(Clone, Debug)]
pub struct ValidationPass {
    pub report: ValidationReport,
    pub results: Vec<ValidationResult>,
}

impl ValidationPass {
    /// The findings that passed, in input order.
    #[must_use]
    pub fn accepted<'f>(&self, findings: &'f [Finding]) -> Vec<&'f Finding> {
        findings
            .iter()
            .zip(&self.results)
            .filter(|(_, r)| r.is_valid)
            .map(|(f, _)| f)
            .collect()
    }
}

/// Validate every finding and build the report.
///
/// # Errors
/// Returns [`ConfigError`] if a configured pattern does not compile.
#[instrument(skip_all, fields(findings = findings.len(), strict))]
pub fn validate_findings(
    findings: &[Finding],
    config: &ValidationConfig,
    rules: &RuleSet,
    strict: bool,
) -> Result<ValidationPass, ConfigError> {
    let validator = Validator::new(config, rules)?;
    let results = validator.validate_batch(findings);
    let report = ValidationReport::build(findings, &results, strict, validator.threshold());
    info!(
        valid = report.summary.valid,
        invalid = report.summary.invalid,
        "validation done"
    );
    Ok(ValidationPass { report, results })
}

// ---------------------------------------------------------------------------
// classify preview
// ---------------------------------------------------------------------------

/// One row of a classification preview.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewRow {
    pub index: usize,
    pub finding: String,
    pub is_valid: bool,
    /// Absent for invalid findings, which are never classified.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classification: Option<Classification>,
}

/// Classify every valid finding against `registry` without merging.
///
/// # Errors
/// Returns [`ConfigError`] if a configured pattern does not compile.
#[instrument(skip_all, fields(findings = findings.len(), categories = registry.len()))]
pub fn preview(
    findings: &[Finding],
    registry: &Registry,
    config: &ValidationConfig,
    rules: &RuleSet,
) -> Result<Vec<PreviewRow>, ConfigError> {
    let validator = Validator::new(config, rules)?;
    let results = validator.validate_batch(findings);
    Ok(findings
        .iter()
        .zip(&results)
        .enumerate()
        .map(|(index, (finding, result))| PreviewRow {
            index,
            finding: finding.label(),
            is_valid: result.is_valid,
            classification: result
                .is_valid
                .then(|| classify(finding, registry, rules)),
        })
        .collect())
}

// ---------------------------------------------------------------------------
// merge pass
// ---------------------------------------------------------------------------

/// Run a full merge pass against `store`.
///
/// A writing pass holds the store lock from the registry load through the
/// commit, so a second pass cannot plan against a registry that changes
/// underneath it. With `dry_run` the report is computed but nothing is
/// written, no lock is taken and `committed` stays `false`.
///
/// # Errors
/// - [`PassError::Lock`] if another writer holds the registry.
/// - [`PassError::Load`] if the registry cannot be read.
/// - [`PassError::Merge`] if any identity would be dropped. Nothing is written.
/// - [`PassError::Commit`] if the store fails to write. The store restores
///   its previous state before returning.
#[instrument(skip_all, fields(findings = findings.len(), dry_run))]
pub fn run_pass<S: RegistryStore>(
    store: &mut S,
    findings: &[Finding],
    config: &ValidationConfig,
    rules: &RuleSet,
    dry_run: bool,
) -> Result<MergeReport, PassError> {
    if dry_run {
        let report = plan_pass(store, findings, config, rules)?.report;
        info!(added = report.added(), "dry run, registry not written");
        return Ok(report);
    }

    store.lock().map_err(PassError::Lock)?;
    let result = commit_pass(store, findings, config, rules);
    store.unlock();
    result
}

fn plan_pass<S: RegistryStore>(
    store: &S,
    findings: &[Finding],
    config: &ValidationConfig,
    rules: &RuleSet,
) -> Result<MergeOutcome, PassError> {
    let registry = store.load_registry().map_err(PassError::Load)?;
    let validator = Validator::new(config, rules)?;
    let validations = validator.validate_batch(findings);
    let decisions = plan(findings, &validations, &registry, rules);
    Ok(merge(&registry, decisions)?)
}

fn commit_pass<S: RegistryStore>(
    store: &mut S,
    findings: &[Finding],
    config: &ValidationConfig,
    rules: &RuleSet,
) -> Result<MergeReport, PassError> {
    let outcome = plan_pass(store, findings, config, rules)?;
    let mut report = outcome.report;
    if let Err(source) = store.save_all(&outcome.updates) {
        return Err(PassError::Commit {
            source,
            report: Box::new(report),
        });
    }
    report.committed = true;
    info!(
        added = report.added(),
        categories = outcome.updates.len(),
        "pass committed"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merge::DecisionStatus;
    use crate::model::registry::CategoryEntry;
    use crate::model::types::Category;
    use crate::store::MemoryStore;

    fn cat(s: &str) -> Category {
        Category::new(s).unwrap()
    }

    fn store() -> MemoryStore {
        MemoryStore::new(
            [
                (
                    cat("climate_sensor"),
                    CategoryEntry::from_strings(["_tze200_abc"], ["TS0601"]),
                ),
                (cat("radiator_valve"), CategoryEntry::default()),
            ]
            .into_iter()
            .collect(),
        )
    }

    fn rules() -> RuleSet {
        RuleSet::builtin().unwrap()
    }

    #[test]
    fn pass_commits_and_sets_flag() {
        let mut store = store();
        let findings = vec![Finding::with_pair("_TZE204_qyr2m29i", "TS0601").described("Moes TRV")];
        let report =
            run_pass(&mut store, &findings, &ValidationConfig::default(), &rules(), false).unwrap();
        assert!(report.committed);
        assert_eq!(report.categories[&cat("radiator_valve")].added, 1);
        assert_eq!(store.saves(), 1);
        assert!(
            store
                .registry()
                .get(&cat("radiator_valve"))
                .unwrap()
                .manufacturers
                .contains(&"_TZE204_qyr2m29i".parse().unwrap())
        );
    }

    #[test]
    fn dry_run_writes_nothing() {
        let mut store = store();
        let findings = vec![Finding::with_pair("_TZE204_qyr2m29i", "TS0601")];
        let report =
            run_pass(&mut store, &findings, &ValidationConfig::default(), &rules(), true).unwrap();
        assert!(!report.committed);
        assert_eq!(report.added(), 1);
        assert_eq!(store.saves(), 0);
    }

    #[test]
    fn commit_failure_keeps_report() {
        let mut store = store();
        store.fail_next_save();
        let findings = vec![Finding::with_pair("_TZE204_qyr2m29i", "TS0601")];
        let err = run_pass(&mut store, &findings, &ValidationConfig::default(), &rules(), false)
            .unwrap_err();
        assert!(matches!(err, PassError::Commit { .. }));
        let report = err.report().unwrap();
        assert!(!report.committed);
        assert_eq!(report.added(), 1);
        assert!(
            store
                .registry()
                .get(&cat("radiator_valve"))
                .unwrap()
                .manufacturers
                .is_empty()
        );
    }

    #[test]
    fn preview_skips_invalid_findings() {
        let findings = vec![
            Finding::with_pair("_TZE204_qyr2m29i", "TS0601"),
            Finding::default(),
        ];
        let rows = preview(
            &findings,
            &store().registry().clone(),
            &ValidationConfig::default(),
            &rules(),
        )
        .unwrap();
        assert_eq!(rows[0].classification.as_ref().unwrap().label(), "radiator_valve");
        assert!(!rows[1].is_valid);
        assert!(rows[1].classification.is_none());
    }

    #[test]
    fn validation_pass_lists_accepted() {
        let findings = vec![
            Finding::with_pair("_TZE204_qyr2m29i", "TS0601"),
            Finding::default(),
        ];
        let pass =
            validate_findings(&findings, &ValidationConfig::default(), &rules(), true).unwrap();
        assert_eq!(pass.accepted(&findings).len(), 1);
        assert!(!pass.report.passes());
        assert_eq!(pass.report.summary.invalid, 1);
    }

    #[test]
    fn rejected_findings_show_in_decision_counts() {
        let mut store = store();
        let findings = vec![Finding::default()];
        let report =
            run_pass(&mut store, &findings, &ValidationConfig::default(), &rules(), false).unwrap();
        assert_eq!(report.decision_counts.rejected, 1);
        assert_eq!(report.decisions[0].status, DecisionStatus::Rejected);
    }
}
