//! Classification rule sets: the category catalog and the overlay tables.
//!
//! A [`RuleSet`] is loaded once from TOML and passed by reference to the
//! validator and the classifier. It holds:
//!
//! - the wildcard model tokens,
//! - the ordered category catalog (model table, manufacturer prefixes and
//!   regexes, description keywords),
//! - the correction overlay (identity forced into a category),
//! - the exclusion overlay (identity forbidden from categories),
//! - the broad prefix fallbacks.
//!
//! Load-time errors ([`RulesError`]) cover anything that would make
//! classification ambiguous. [`RuleSet::check`] reports softer problems that
//! do not prevent use.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::registry::IdentitySet;
use crate::model::types::{Category, Identity, InvalidValue};

/// The rule set shipped with the binary.
pub const BUILTIN_RULES: &str = include_str!("../../rules/default.toml");

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors loading a rule set.
#[derive(Debug, Error)]
pub enum RulesError {
    /// The rules file could not be read.
    #[error("could not read rules file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML is malformed or has unknown fields.
    #[error("{}{message}", path.as_ref().map(|p| format!("{}: ", p.display())).unwrap_or_default())]
    Parse {
        path: Option<PathBuf>,
        message: String,
    },

    /// A category name or identity in the file is invalid.
    #[error("{context}: {source}")]
    InvalidValue {
        context: String,
        #[source]
        source: InvalidValue,
    },

    /// A manufacturer regex does not compile.
    #[error("category `{category}`: manufacturer_regex {pattern:?} does not compile: {message}")]
    InvalidRegex {
        category: String,
        pattern: String,
        message: String,
    },

    /// The same category appears twice in the catalog.
    #[error("category `{category}` is defined more than once")]
    DuplicateCategory { category: String },

    /// One identity is forced into two different categories.
    #[error("identity `{identity}` is corrected to both `{first}` and `{second}`")]
    ConflictingCorrection {
        identity: String,
        first: String,
        second: String,
    },

    /// An identity is forced into a category it is also excluded from.
    #[error("identity `{identity}` is both corrected to and excluded from `{category}`")]
    CorrectionExcluded { identity: String, category: String },
}

// ---------------------------------------------------------------------------
// File shape
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RuleFile {
    version: String,
    #[serde(default)]
    wildcard_models: Vec<String>,
    #[serde(default, rename = "category")]
    categories: Vec<CategoryRuleFile>,
    #[serde(default)]
    corrections: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    exclusions: BTreeMap<String, Vec<String>>,
    #[serde(default, rename = "fallback")]
    fallbacks: Vec<FallbackFile>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CategoryRuleFile {
    name: String,
    #[serde(default)]
    models: Vec<String>,
    #[serde(default)]
    manufacturer_prefixes: Vec<String>,
    #[serde(default)]
    manufacturer_regex: Vec<String>,
    #[serde(default)]
    keywords: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct FallbackFile {
    prefixes: Vec<String>,
    category: String,
}

// ---------------------------------------------------------------------------
// Compiled rules
// ---------------------------------------------------------------------------

/// Heuristic rules for one catalog category.
#[derive(Clone, Debug)]
pub struct CategoryRule {
    pub category: Category,
    /// Exact model tokens routed to this category.
    pub models: IdentitySet,
    /// Lowercased manufacturer prefixes.
    pub manufacturer_prefixes: Vec<String>,
    /// Case-insensitive manufacturer regexes.
    pub manufacturer_regex: Vec<Regex>,
    pub keywords: Vec<Keyword>,
}

impl CategoryRule {
    /// `true` if `id` matches one of this category's manufacturer rules.
    #[must_use]
    pub fn matches_manufacturer(&self, id: &Identity) -> bool {
        self.manufacturer_prefixes
            .iter()
            .any(|p| id.starts_with_folded(p))
            || self.manufacturer_regex.iter().any(|re| re.is_match(id.as_str()))
    }

    /// The first keyword found in `text`, if any.
    #[must_use]
    pub fn matching_keyword(&self, text: &str) -> Option<&Keyword> {
        self.keywords.iter().find(|k| k.is_match(text))
    }
}

/// A whole-word, case-insensitive description keyword.
#[derive(Clone, Debug)]
pub struct Keyword {
    text: String,
    matcher: Regex,
}

impl Keyword {
    fn new(text: &str) -> Result<Self, regex::Error> {
        let text = text.trim().to_lowercase();
        let matcher = RegexBuilder::new(&format!(r"\b{}\b", regex::escape(&text)))
            .case_insensitive(true)
            .build()?;
        Ok(Self { text, matcher })
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.text
    }

    #[must_use]
    pub fn is_match(&self, text: &str) -> bool {
        self.matcher.is_match(text)
    }
}

/// A broad prefix fallback: any manufacturer starting with one of
/// `prefixes` goes to `category`.
#[derive(Clone, Debug)]
pub struct FallbackRule {
    pub prefixes: Vec<String>,
    pub category: Category,
}

impl FallbackRule {
    #[must_use]
    pub fn matches(&self, id: &Identity) -> bool {
        self.prefixes.iter().any(|p| id.starts_with_folded(p))
    }
}

/// A loaded, validated rule set.
#[derive(Clone, Debug)]
pub struct RuleSet {
    version: String,
    wildcard_models: IdentitySet,
    catalog: Vec<CategoryRule>,
    corrections: BTreeMap<Identity, Category>,
    exclusions: BTreeMap<Identity, BTreeSet<Category>>,
    fallbacks: Vec<FallbackRule>,
}

impl RuleSet {
    /// The embedded default rule set.
    ///
    /// # Errors
    /// Only if the embedded file is broken.
    pub fn builtin() -> Result<Self, RulesError> {
        Self::parse(BUILTIN_RULES)
    }

    /// Load a rule set from `path`.
    ///
    /// # Errors
    /// Returns [`RulesError`] on I/O failure, malformed TOML, or any rule
    /// that would make classification ambiguous.
    pub fn load(path: &Path) -> Result<Self, RulesError> {
        let text = std::fs::read_to_string(path).map_err(|source| RulesError::Io {
            path: path.to_owned(),
            source,
        })?;
        Self::parse(&text).map_err(|e| match e {
            RulesError::Parse { path: None, message } => RulesError::Parse {
                path: Some(path.to_owned()),
                message,
            },
            other => other,
        })
    }

    /// Load from `path`, or the built-in rule set when `path` is `None`.
    ///
    /// # Errors
    /// See [`RuleSet::load`].
    pub fn load_or_builtin(path: Option<&Path>) -> Result<Self, RulesError> {
        path.map_or_else(Self::builtin, Self::load)
    }

    /// Parse and compile a rule set from TOML text.
    ///
    /// # Errors
    /// See [`RuleSet::load`].
    pub fn parse(toml_str: &str) -> Result<Self, RulesError> {
        let file: RuleFile = toml::from_str(toml_str).map_err(|e| {
            let mut message = e.message().to_owned();
            if let Some(span) = e.span() {
                let line = toml_str[..span.start]
                    .chars()
                    .filter(|&c| c == '\n')
                    .count()
                    + 1;
                message = format!("line {line}: {message}");
            }
            RulesError::Parse {
                path: None,
                message,
            }
        })?;
        Self::compile(file)
    }

    fn compile(file: RuleFile) -> Result<Self, RulesError> {
        let wildcard_models = file
            .wildcard_models
            .iter()
            .map(|s| identity(s, "wildcard_models"))
            .collect::<Result<IdentitySet, _>>()?;

        let mut seen = BTreeSet::new();
        let mut catalog = Vec::with_capacity(file.categories.len());
        for raw in file.categories {
            let category = category(&raw.name, "category.name")?;
            if !seen.insert(category.clone()) {
                return Err(RulesError::DuplicateCategory {
                    category: raw.name,
                });
            }
            let ctx = format!("category `{category}`");
            let models = raw
                .models
                .iter()
                .map(|s| identity(s, &ctx))
                .collect::<Result<IdentitySet, _>>()?;
            let manufacturer_regex = raw
                .manufacturer_regex
                .iter()
                .map(|pattern| {
                    RegexBuilder::new(pattern)
                        .case_insensitive(true)
                        .build()
                        .map_err(|e| RulesError::InvalidRegex {
                            category: category.to_string(),
                            pattern: pattern.clone(),
                            message: e.to_string(),
                        })
                })
                .collect::<Result<Vec<_>, _>>()?;
            let keywords = raw
                .keywords
                .iter()
                .filter(|k| !k.trim().is_empty())
                .map(|k| {
                    Keyword::new(k).map_err(|e| RulesError::InvalidRegex {
                        category: category.to_string(),
                        pattern: k.clone(),
                        message: e.to_string(),
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            catalog.push(CategoryRule {
                category,
                models,
                manufacturer_prefixes: lowered(&raw.manufacturer_prefixes),
                manufacturer_regex,
                keywords,
            });
        }

        let mut corrections: BTreeMap<Identity, Category> = BTreeMap::new();
        for (name, ids) in &file.corrections {
            let target = category(name, "corrections")?;
            for raw in ids {
                let id = identity(raw, &format!("corrections.{name}"))?;
                if let Some(existing) = corrections.get(&id)
                    && existing != &target
                {
                    return Err(RulesError::ConflictingCorrection {
                        identity: id.to_string(),
                        first: existing.to_string(),
                        second: target.to_string(),
                    });
                }
                corrections.insert(id, target.clone());
            }
        }

        let mut exclusions: BTreeMap<Identity, BTreeSet<Category>> = BTreeMap::new();
        for (name, ids) in &file.exclusions {
            let forbidden = category(name, "exclusions")?;
            for raw in ids {
                let id = identity(raw, &format!("exclusions.{name}"))?;
                if corrections.get(&id) == Some(&forbidden) {
                    return Err(RulesError::CorrectionExcluded {
                        identity: id.to_string(),
                        category: forbidden.to_string(),
                    });
                }
                exclusions.entry(id).or_default().insert(forbidden.clone());
            }
        }

        let fallbacks = file
            .fallbacks
            .iter()
            .map(|f| {
                Ok(FallbackRule {
                    prefixes: lowered(&f.prefixes),
                    category: category(&f.category, "fallback.category")?,
                })
            })
            .collect::<Result<Vec<_>, RulesError>>()?;

        Ok(Self {
            version: file.version,
            wildcard_models,
            catalog,
            corrections,
            exclusions,
            fallbacks,
        })
    }

    // -- accessors --

    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    #[must_use]
    pub fn is_wildcard(&self, model: &Identity) -> bool {
        self.wildcard_models.contains(model)
    }

    #[must_use]
    pub const fn wildcard_models(&self) -> &IdentitySet {
        &self.wildcard_models
    }

    /// Catalog entries in precedence order.
    #[must_use]
    pub fn catalog(&self) -> &[CategoryRule] {
        &self.catalog
    }

    #[must_use]
    pub fn in_catalog(&self, category: &Category) -> bool {
        self.catalog.iter().any(|r| &r.category == category)
    }

    /// The category a correction entry forces `id` into.
    #[must_use]
    pub fn correction_for(&self, id: &Identity) -> Option<&Category> {
        self.corrections.get(id)
    }

    /// Categories `id` must never be routed to.
    #[must_use]
    pub fn exclusions_for(&self, id: &Identity) -> Option<&BTreeSet<Category>> {
        self.exclusions.get(id)
    }

    #[must_use]
    pub fn fallbacks(&self) -> &[FallbackRule] {
        &self.fallbacks
    }

    #[must_use]
    pub fn summary(&self) -> RuleSummary {
        RuleSummary {
            version: self.version.clone(),
            categories: self.catalog.len(),
            corrections: self.corrections.len(),
            exclusions: self.exclusions.values().map(BTreeSet::len).sum(),
            fallbacks: self.fallbacks.len(),
            wildcard_models: self.wildcard_models.to_strings(),
        }
    }

    /// Report problems that do not prevent loading.
    #[must_use]
    pub fn check(&self) -> Vec<RuleProblem> {
        let mut problems = Vec::new();

        let mut model_owner: BTreeMap<&Identity, &Category> = BTreeMap::new();
        for rule in &self.catalog {
            for model in rule.models.iter() {
                if self.is_wildcard(model) {
                    problems.push(RuleProblem::WildcardInModelTable {
                        category: rule.category.clone(),
                        model: model.to_string(),
                    });
                    continue;
                }
                if let Some(first) = model_owner.get(model) {
                    problems.push(RuleProblem::DuplicateModel {
                        model: model.to_string(),
                        first: (*first).clone(),
                        shadowed: rule.category.clone(),
                    });
                } else {
                    model_owner.insert(model, &rule.category);
                }
            }
        }

        let correction_targets: BTreeSet<&Category> = self.corrections.values().collect();
        for category in correction_targets {
            if !self.in_catalog(category) {
                problems.push(RuleProblem::UnknownCategory {
                    table: "corrections",
                    category: category.clone(),
                });
            }
        }
        let excluded: BTreeSet<&Category> = self.exclusions.values().flatten().collect();
        for category in excluded {
            if !self.in_catalog(category) {
                problems.push(RuleProblem::UnknownCategory {
                    table: "exclusions",
                    category: category.clone(),
                });
            }
        }
        for fallback in &self.fallbacks {
            if !self.in_catalog(&fallback.category) {
                problems.push(RuleProblem::UnknownCategory {
                    table: "fallback",
                    category: fallback.category.clone(),
                });
            }
        }

        problems
    }
}

fn category(raw: &str, context: &str) -> Result<Category, RulesError> {
    Category::new(raw).map_err(|source| RulesError::InvalidValue {
        context: context.to_owned(),
        source,
    })
}

fn identity(raw: &str, context: &str) -> Result<Identity, RulesError> {
    Identity::new(raw).map_err(|source| RulesError::InvalidValue {
        context: context.to_owned(),
        source,
    })
}

fn lowered(values: &[String]) -> Vec<String> {
    values
        .iter()
        .map(|s| s.trim().to_ascii_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

// ---------------------------------------------------------------------------
// Check output
// ---------------------------------------------------------------------------

/// Headline numbers for a loaded rule set.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RuleSummary {
    pub version: String,
    pub categories: usize,
    pub corrections: usize,
    pub exclusions: usize,
    pub fallbacks: usize,
    pub wildcard_models: Vec<String>,
}

/// A non-fatal rule set problem.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleProblem {
    /// An overlay or fallback names a category missing from the catalog.
    UnknownCategory {
        table: &'static str,
        category: Category,
    },
    /// A model token is listed by two categories; the first wins.
    DuplicateModel {
        model: String,
        first: Category,
        shadowed: Category,
    },
    /// A wildcard token is listed in a model table, where it is ignored.
    WildcardInModelTable { category: Category, model: String },
}

impl fmt::Display for RuleProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownCategory { table, category } => {
                write!(f, "{table}: category `{category}` is not in the catalog")
            }
            Self::DuplicateModel {
                model,
                first,
                shadowed,
            } => write!(
                f,
                "model `{model}` is listed by `{first}` and `{shadowed}`; `{shadowed}` never sees it"
            ),
            Self::WildcardInModelTable { category, model } => write!(
                f,
                "category `{category}`: wildcard model `{model}` in the model table is ignored"
            ),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
