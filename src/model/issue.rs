//! Structured diagnostics attached to a finding.
//!
//! Every decision the engine makes about a finding is recorded as an
//! [`Issue`]: a stable machine-readable [`IssueCode`] plus a human message.
//! Issues are grouped by severity on the result that carries them
//! (critical errors, warnings, regression risks); the code alone does not
//! imply a severity.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable diagnostic codes. Serialized as `snake_case` strings.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueCode {
    // -- critical --
    /// Neither manufacturer nor model identity present.
    MissingIdentities,
    /// Only one side of the fingerprint pair present.
    MissingPair,
    /// Wildcard model token without a manufacturer identity.
    WildcardWithoutManufacturer,
    /// Manufacturer identity fails even the generic charset.
    InvalidManufacturerPattern,
    /// Model identity fails even the generic charset.
    InvalidModelPattern,
    /// A model list holding nothing but the wildcard token.
    WildcardOnlyModelList,
    /// One list mixing the wildcard token with vendor manufacturer identities.
    MixedIdentityList,
    /// The finding asks for identities to be removed.
    RemovalOperation,
    /// The record does not have the finding shape.
    MalformedFinding,

    // -- warnings --
    /// Manufacturer accepted by the generic charset only.
    GenericManufacturerPattern,
    /// Model accepted by the generic charset only.
    GenericModelPattern,
    /// Confidence below the acceptance threshold.
    BelowThreshold,
    /// No classification rule matched.
    UnknownCategory,
    /// Identity already present in the chosen category.
    SameCategoryReadd,
    /// Cross-category move allowed by a correction overlay entry.
    CorrectionOverride,
    /// Identity listed in the exclusion overlay for the chosen category.
    ExcludedFromCategory,

    // -- regression risks --
    /// Identity already assigned to a different category.
    CrossCategoryCollision,
    /// The finding requests replacement of existing entries.
    ReplaceExisting,
    /// The finding opts out of legacy entry preservation.
    LegacyNotPreserved,
}

impl IssueCode {
    /// The serialized form of the code.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MissingIdentities => "missing_identities",
            Self::MissingPair => "missing_pair",
            Self::WildcardWithoutManufacturer => "wildcard_without_manufacturer",
            Self::InvalidManufacturerPattern => "invalid_manufacturer_pattern",
            Self::InvalidModelPattern => "invalid_model_pattern",
            Self::WildcardOnlyModelList => "wildcard_only_model_list",
            Self::MixedIdentityList => "mixed_identity_list",
            Self::RemovalOperation => "removal_operation",
            Self::MalformedFinding => "malformed_finding",
            Self::GenericManufacturerPattern => "generic_manufacturer_pattern",
            Self::GenericModelPattern => "generic_model_pattern",
            Self::BelowThreshold => "below_threshold",
            Self::UnknownCategory => "unknown_category",
            Self::SameCategoryReadd => "same_category_readd",
            Self::CorrectionOverride => "correction_override",
            Self::ExcludedFromCategory => "excluded_from_category",
            Self::CrossCategoryCollision => "cross_category_collision",
            Self::ReplaceExisting => "replace_existing",
            Self::LegacyNotPreserved => "legacy_not_preserved",
        }
    }
}

impl fmt::Display for IssueCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One diagnostic: code plus message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub code: IssueCode,
    pub message: String,
}

impl Issue {
    pub fn new(code: IssueCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}
