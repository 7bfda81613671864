//! Report rendering for the CLI.

use std::fmt::Write as _;
use std::str::FromStr;

use anyhow::{Result, bail};
use serde::Serialize;

use crate::merge::MergeReport;
use crate::pipeline::PreviewRow;
use crate::rules::{RuleProblem, RuleSummary};
use crate::validate::ValidationReport;

/// Output format for reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// Pretty JSON, the same document `--report` writes.
    #[default]
    Json,
    /// Short human summary.
    Text,
}

impl FromStr for OutputFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "text" => Ok(Self::Text),
            _ => bail!("Invalid format '{s}'. Use: json or text"),
        }
    }
}

/// Pretty JSON with a trailing newline.
///
/// # Errors
/// Fails only if `data` cannot be serialized.
pub fn to_json<T: Serialize + ?Sized>(data: &T) -> Result<String> {
    let mut out = serde_json::to_string_pretty(data)
        .map_err(|e| anyhow::anyhow!("JSON serialization failed: {e}"))?;
    out.push('\n');
    Ok(out)
}

/// Something the CLI can print in either format.
pub trait Render: Serialize {
    fn text(&self) -> String;

    /// Render in `format`.
    ///
    /// # Errors
    /// Fails only if JSON serialization fails.
    fn render(&self, format: OutputFormat) -> Result<String> {
        match format {
            OutputFormat::Json => to_json(self),
            OutputFormat::Text => Ok(self.text()),
        }
    }
}

impl Render for ValidationReport {
    fn text(&self) -> String {
        let s = &self.summary;
        let mut out = format!(
            "validated {} finding(s): {} valid, {} invalid (threshold {}{})\n",
            s.total,
            s.valid,
            s.invalid,
            self.threshold,
            if self.strict { ", strict" } else { "" }
        );
        let _ = writeln!(
            out,
            "issues: {} critical, {} warning(s), {} regression risk(s)",
            s.critical_errors, s.warnings, s.regression_risks
        );
        for d in self.details.iter().filter(|d| !d.is_valid) {
            let codes: Vec<&str> = d.codes.iter().map(|c| c.as_str()).collect();
            let _ = writeln!(
                out,
                "  #{} {}/{} confidence {}: {}",
                d.index,
                list_or_none(&d.manufacturer_identity),
                list_or_none(&d.model_identity),
                d.confidence,
                codes.join(", ")
            );
        }
        out
    }
}

impl Render for MergeReport {
    fn text(&self) -> String {
        let mut out = String::new();
        for (category, delta) in &self.categories {
            if delta.added == 0 && delta.models_added == 0 && delta.final_count >= delta.initial {
                continue;
            }
            let _ = writeln!(
                out,
                "  {category}: {} -> {} (+{}), models {} -> {}",
                delta.initial,
                delta.final_count,
                delta.added,
                delta.models_initial,
                delta.models_final
            );
        }
        let c = &self.decision_counts;
        let state = if self.regressed {
            "ABORTED (coverage decreased)"
        } else if self.committed {
            "committed"
        } else {
            "not written"
        };
        format!(
            "merge {state}: manufacturers {} -> {} (delta {:+})\n\
             decisions: {} accepted, {} rejected, {} unclassified, {} missing category, {} blocked; {} new pairs\n{out}",
            self.totals.initial,
            self.totals.final_count,
            self.delta,
            c.accepted,
            c.rejected,
            c.unclassified,
            c.missing_category,
            c.blocked,
            c.new_pairs,
        )
    }
}

/// `classify` output.
#[derive(Debug, Serialize)]
#[serde(transparent)]
pub struct Preview(pub Vec<PreviewRow>);

impl Render for Preview {
    fn text(&self) -> String {
        let mut out = String::new();
        for row in &self.0 {
            let verdict = row.classification.as_ref().map_or_else(
                || "invalid, not classified".to_owned(),
                |c| match &c.matched {
                    Some(m) => format!("{} ({} on {m})", c.label(), c.rule),
                    None => format!("{} ({})", c.label(), c.rule),
                },
            );
            let _ = writeln!(out, "#{} {}: {verdict}", row.index, row.finding);
        }
        out
    }
}

/// `rules check` output.
#[derive(Debug, Serialize)]
pub struct RuleCheck {
    pub summary: RuleSummary,
    pub problems: Vec<RuleProblem>,
}

impl Render for RuleCheck {
    fn text(&self) -> String {
        let s = &self.summary;
        let mut out = format!(
            "rules {}: {} categories, {} corrections, {} exclusions, {} fallbacks, wildcard {}\n",
            s.version,
            s.categories,
            s.corrections,
            s.exclusions,
            s.fallbacks,
            list_or_none(&s.wildcard_models)
        );
        if self.problems.is_empty() {
            out.push_str("no problems found\n");
        }
        for p in &self.problems {
            let _ = writeln!(out, "  warning: {p}");
        }
        out
    }
}

fn list_or_none(values: &[String]) -> String {
    if values.is_empty() {
        "<none>".to_owned()
    } else {
        values.join(",")
    }
}
