//! Engine configuration (`fpmerge.toml`).
//!
//! Defines the typed configuration for the validator (threshold, score
//! weights, identity patterns), registry defaults, and the rule set location.
//! Every field has a default; a missing file means all defaults.

use std::fmt;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::Deserialize;

/// Default configuration file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "fpmerge.toml";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level engine configuration.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    /// Record validator settings.
    #[serde(default)]
    pub validation: ValidationConfig,

    /// Registry location and document naming.
    #[serde(default)]
    pub registry: RegistryConfig,

    /// Rule set location.
    #[serde(default)]
    pub rules: RulesConfig,
}

// ---------------------------------------------------------------------------
// ValidationConfig
// ---------------------------------------------------------------------------

/// Scoring and pattern settings for the record validator.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ValidationConfig {
    /// Minimum confidence (0-100) for a finding to be accepted.
    #[serde(default = "default_threshold")]
    pub threshold: u32,

    /// Score contributions.
    #[serde(default)]
    pub weights: Weights,

    /// Identity patterns.
    #[serde(default)]
    pub patterns: Patterns,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            weights: Weights::default(),
            patterns: Patterns::default(),
        }
    }
}

const fn default_threshold() -> u32 {
    60
}

/// Confidence contributions, summed and clamped to 100.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Weights {
    /// Both sides of the fingerprint pair present.
    #[serde(default = "default_pair_present")]
    pub pair_present: u32,
    /// Wildcard model token accompanied by its manufacturer.
    #[serde(default = "default_wildcard_paired")]
    pub wildcard_paired: u32,
    /// Identity matches the vendor pattern (applied per side).
    #[serde(default = "default_vendor_match")]
    pub vendor_match: u32,
    /// Identity matches the generic charset only (applied per side).
    #[serde(default = "default_generic_match")]
    pub generic_match: u32,
}

impl Default for Weights {
    fn default() -> Self {
        Self {
            pair_present: default_pair_present(),
            wildcard_paired: default_wildcard_paired(),
            vendor_match: default_vendor_match(),
            generic_match: default_generic_match(),
        }
    }
}

const fn default_pair_present() -> u32 {
    30
}

const fn default_wildcard_paired() -> u32 {
    20
}

const fn default_vendor_match() -> u32 {
    25
}

const fn default_generic_match() -> u32 {
    10
}

/// Regular expressions for identity shapes.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Patterns {
    #[serde(default = "default_manufacturer_vendor")]
    pub manufacturer_vendor: String,
    #[serde(default = "default_generic")]
    pub manufacturer_generic: String,
    #[serde(default = "default_model_vendor")]
    pub model_vendor: String,
    #[serde(default = "default_generic")]
    pub model_generic: String,
}

impl Default for Patterns {
    fn default() -> Self {
        Self {
            manufacturer_vendor: default_manufacturer_vendor(),
            manufacturer_generic: default_generic(),
            model_vendor: default_model_vendor(),
            model_generic: default_generic(),
        }
    }
}

fn default_manufacturer_vendor() -> String {
    "^_TZ[A-Z0-9]{4}_[a-z0-9]{8,12}$".to_owned()
}

fn default_model_vendor() -> String {
    "^TS[0-9]{4}[A-Z]?$".to_owned()
}

fn default_generic() -> String {
    "^[A-Za-z0-9_.-]+$".to_owned()
}

/// [`Patterns`] compiled to regexes.
#[derive(Clone, Debug)]
pub struct CompiledPatterns {
    pub manufacturer_vendor: Regex,
    pub manufacturer_generic: Regex,
    pub model_vendor: Regex,
    pub model_generic: Regex,
}

impl Patterns {
    /// Compile every pattern.
    ///
    /// # Errors
    /// Returns a [`ConfigError`] naming the first pattern that fails to compile.
    pub fn compile(&self) -> Result<CompiledPatterns, ConfigError> {
        let compile = |name: &str, src: &str| {
            Regex::new(src).map_err(|e| ConfigError {
                path: None,
                message: format!("validation.patterns.{name}: {e}"),
            })
        };
        Ok(CompiledPatterns {
            manufacturer_vendor: compile("manufacturer_vendor", &self.manufacturer_vendor)?,
            manufacturer_generic: compile("manufacturer_generic", &self.manufacturer_generic)?,
            model_vendor: compile("model_vendor", &self.model_vendor)?,
            model_generic: compile("model_generic", &self.model_generic)?,
        })
    }
}

// ---------------------------------------------------------------------------
// RegistryConfig / RulesConfig
// ---------------------------------------------------------------------------

/// Where the registry lives and what its documents are called.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegistryConfig {
    /// Default registry directory when `--registry-dir` is not given.
    #[serde(default)]
    pub dir: Option<PathBuf>,

    /// Per-category document file name.
    #[serde(default = "default_document")]
    pub document: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            dir: None,
            document: default_document(),
        }
    }
}

fn default_document() -> String {
    "driver.compose.json".to_owned()
}

/// Rule set location; `None` means the built-in rule set.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct RulesConfig {
    #[serde(default)]
    pub path: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Error + loading
// ---------------------------------------------------------------------------

/// Error loading or validating configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError {
    /// The path that was being loaded (if available).
    pub path: Option<PathBuf>,
    /// Human-readable message with line-level detail when possible.
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(p) = &self.path {
            write!(f, "{}: {}", p.display(), self.message)
        } else {
            write!(f, "config error: {}", self.message)
        }
    }
}

impl std::error::Error for ConfigError {}

impl EngineConfig {
    /// Load configuration from a TOML file.
    ///
    /// - If the file does not exist, returns all defaults (not an error).
    /// - If the file exists but contains invalid TOML, unknown fields, or
    ///   out-of-range values, returns a [`ConfigError`].
    ///
    /// # Errors
    /// Returns `ConfigError` on I/O errors (other than not-found) or parse errors.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(ConfigError {
                    path: Some(path.to_owned()),
                    message: format!("could not read file: {e}"),
                });
            }
        };
        Self::parse(&contents).map_err(|mut e| {
            e.path = Some(path.to_owned());
            e
        })
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    /// Returns `ConfigError` on invalid TOML, unknown fields, a threshold
    /// above 100, or a pattern that does not compile.
    pub fn parse(toml_str: &str) -> Result<Self, ConfigError> {
        let cfg: Self = toml::from_str(toml_str).map_err(|e| {
            let mut message = e.message().to_owned();
            if let Some(span) = e.span() {
                let line = toml_str[..span.start]
                    .chars()
                    .filter(|&c| c == '\n')
                    .count()
                    + 1;
                message = format!("line {line}: {message}");
            }
            ConfigError {
                path: None,
                message,
            }
        })?;
        cfg.check()?;
        Ok(cfg)
    }

    fn check(&self) -> Result<(), ConfigError> {
        if self.validation.threshold > 100 {
            return Err(ConfigError {
                path: None,
                message: format!(
                    "validation.threshold must be between 0 and 100, got {}",
                    self.validation.threshold
                ),
            });
        }
        if self.registry.document.is_empty()
            || self.registry.document.contains(['/', '\\'])
        {
            return Err(ConfigError {
                path: None,
                message: format!(
                    "registry.document must be a plain file name, got {:?}",
                    self.registry.document
                ),
            });
        }
        self.validation.patterns.compile().map(|_| ())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
