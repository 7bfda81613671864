//! Core identity types for the fingerprint registry.
//!
//! Foundation types used throughout the engine: vendor identities
//! (manufacturer names and model tokens), category identifiers, fingerprint
//! pairs, and the normalized identity lists findings carry.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// A vendor-assigned identity string (manufacturer name or model token).
///
/// Identities compare, order and hash case-insensitively: `_TZE200_abc` and
/// `_tze200_ABC` are the same identity. The original spelling is kept for
/// display and persistence; the first spelling seen wins when two collapse.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identity {
    raw: String,
    key: String,
}

impl Identity {
    /// Create a new `Identity`, trimming surrounding whitespace.
    ///
    /// # Errors
    /// Returns an error if the trimmed string is empty.
    pub fn new(s: &str) -> Result<Self, InvalidValue> {
        let raw = s.trim();
        if raw.is_empty() {
            return Err(InvalidValue {
                kind: ValueKind::Identity,
                value: s.to_owned(),
                reason: "identity must not be empty".to_owned(),
            });
        }
        Ok(Self {
            raw: raw.to_owned(),
            key: raw.to_ascii_lowercase(),
        })
    }

    /// The identity as originally spelled.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// The case-folded comparison key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Case-insensitive prefix test.
    #[must_use]
    pub fn starts_with_folded(&self, prefix: &str) -> bool {
        self.key.starts_with(&prefix.to_ascii_lowercase())
    }
}

impl PartialEq for Identity {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for Identity {}

impl Hash for Identity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl PartialOrd for Identity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Identity {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key.cmp(&other.key)
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for Identity {
    type Err = InvalidValue;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for Identity {
    type Error = InvalidValue;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(&s)
    }
}

impl From<Identity> for String {
    fn from(id: Identity) -> Self {
        id.raw
    }
}

// ---------------------------------------------------------------------------
// Category
// ---------------------------------------------------------------------------

/// A validated category identifier, one per downstream driver.
///
/// Category names are lowercase alphanumeric with underscores or hyphens,
/// 1–64 characters, starting with a letter or digit.
/// Examples: `climate_sensor`, `switch_2gang`, `radiator-valve`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Category(String);

impl Category {
    /// The maximum length of a category name.
    pub const MAX_LEN: usize = 64;

    /// Create a new `Category` from a string, validating format.
    ///
    /// # Errors
    /// Returns an error if the name is empty, too long, or contains invalid characters.
    pub fn new(s: &str) -> Result<Self, InvalidValue> {
        Self::validate(s)?;
        Ok(Self(s.to_owned()))
    }

    /// Return the category name as a string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate(s: &str) -> Result<(), InvalidValue> {
        let invalid = |reason: String| InvalidValue {
            kind: ValueKind::Category,
            value: s.to_owned(),
            reason,
        };
        if s.is_empty() {
            return Err(invalid("category name must not be empty".to_owned()));
        }
        if s.len() > Self::MAX_LEN {
            return Err(invalid(format!(
                "category name must be at most {} characters, got {}",
                Self::MAX_LEN,
                s.len()
            )));
        }
        if !s
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
        {
            return Err(invalid(
                "category name must contain only lowercase letters (a-z), digits (0-9), underscores and hyphens"
                    .to_owned(),
            ));
        }
        if s.starts_with(['_', '-']) {
            return Err(invalid(
                "category name must start with a letter or digit".to_owned(),
            ));
        }
        Ok(())
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Category {
    type Err = InvalidValue;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for Category {
    type Error = InvalidValue;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::validate(&s)?;
        Ok(Self(s))
    }
}

impl From<Category> for String {
    fn from(c: Category) -> Self {
        c.0
    }
}

// ---------------------------------------------------------------------------
// FingerprintPair
// ---------------------------------------------------------------------------

/// The atomic unit of device identification: `(manufacturer, model)`.
///
/// Both sides are always present; there is no constructor for a half pair.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FingerprintPair {
    pub manufacturer: Identity,
    pub model: Identity,
}

impl FingerprintPair {
    #[must_use]
    pub const fn new(manufacturer: Identity, model: Identity) -> Self {
        Self {
            manufacturer,
            model,
        }
    }
}

impl fmt::Display for FingerprintPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.manufacturer, self.model)
    }
}

// ---------------------------------------------------------------------------
// IdentityList
// ---------------------------------------------------------------------------

/// A non-empty, ordered, case-insensitively de-duplicated list of identities.
///
/// `declared_as_list` records whether the source document used an array for
/// this field. It is provenance only; the known-mistake rules of the
/// validator are its sole reader.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IdentityList {
    items: Vec<Identity>,
    declared_as_list: bool,
}

impl IdentityList {
    /// Build a list from raw strings, dropping blanks and duplicates.
    ///
    /// Returns `None` when nothing usable remains.
    pub fn from_strings<I, S>(values: I, declared_as_list: bool) -> Option<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut items: Vec<Identity> = Vec::new();
        for value in values {
            if let Ok(id) = Identity::new(value.as_ref())
                && !items.contains(&id)
            {
                items.push(id);
            }
        }
        if items.is_empty() {
            None
        } else {
            Some(Self {
                items,
                declared_as_list,
            })
        }
    }

    /// A single-identity list, as produced from a scalar field.
    #[must_use]
    pub fn single(id: Identity) -> Self {
        Self {
            items: vec![id],
            declared_as_list: false,
        }
    }

    #[must_use]
    pub fn as_slice(&self) -> &[Identity] {
        &self.items
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Identity> {
        self.items.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Always `false`; kept for clippy's `len_without_is_empty`.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    #[must_use]
    pub const fn declared_as_list(&self) -> bool {
        self.declared_as_list
    }

    /// `true` if any identity equals `id` (case-insensitive).
    #[must_use]
    pub fn contains(&self, id: &Identity) -> bool {
        self.items.contains(id)
    }

    /// Raw spellings, for reports.
    #[must_use]
    pub fn to_strings(&self) -> Vec<String> {
        self.items.iter().map(|i| i.as_str().to_owned()).collect()
    }
}

impl<'a> IntoIterator for &'a IdentityList {
    type Item = &'a Identity;
    type IntoIter = std::slice::Iter<'a, Identity>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

// ---------------------------------------------------------------------------
// InvalidValue
// ---------------------------------------------------------------------------

/// What kind of value failed validation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValueKind {
    /// An [`Identity`] validation error.
    Identity,
    /// A [`Category`] validation error.
    Category,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Identity => write!(f, "identity"),
            Self::Category => write!(f, "category"),
        }
    }
}

/// A validation error for core identity types.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InvalidValue {
    /// What kind of value was being validated.
    pub kind: ValueKind,
    /// The invalid value.
    pub value: String,
    /// Human-readable explanation.
    pub reason: String,
}

impl fmt::Display for InvalidValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid {}: {:?}: {}", self.kind, self.value, self.reason)
    }
}

impl std::error::Error for InvalidValue {}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    // -- Identity --

    #[test]
    fn identity_trims_and_keeps_spelling() {
        let id = Identity::new("  _TZE200_Abc ").unwrap();
        assert_eq!(id.as_str(), "_TZE200_Abc");
        assert_eq!(id.key(), "_tze200_abc");
    }

    #[test]
    fn identity_rejects_blank() {
        assert!(Identity::new("").is_err());
        assert!(Identity::new("   ").is_err());
    }

    #[test]
    fn identity_equality_is_case_insensitive() {
        let a = Identity::new("_TZE200_ABC").unwrap();
        let b = Identity::new("_tze200_abc").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.cmp(&b), Ordering::Equal);
    }

    #[test]
    fn identity_prefix_folded() {
        let id = Identity::new("_TZ3000_mcxw5ehu").unwrap();
        assert!(id.starts_with_folded("_tz3000_"));
        assert!(!id.starts_with_folded("_TZE200_"));
    }

    #[test]
    fn identity_serde_roundtrip_keeps_raw() {
        let id = Identity::new("HOBEIAN").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"HOBEIAN\"");
        let back: Identity = serde_json::from_str(&json).unwrap();
        assert_eq!(back.as_str(), "HOBEIAN");
    }

    // -- Category --

    #[test]
    fn category_valid_names() {
        for name in ["climate_sensor", "switch_2gang", "radiator-valve", "ir_blaster"] {
            assert!(Category::new(name).is_ok(), "{name} should be valid");
        }
    }

    #[test]
    fn category_invalid_names() {
        assert!(Category::new("").is_err());
        assert!(Category::new("Climate").is_err());
        assert!(Category::new("_hidden").is_err());
        assert!(Category::new("has space").is_err());
        assert!(Category::new(&"a".repeat(65)).is_err());
    }

    #[test]
    fn category_error_message_names_kind() {
        let err = Category::new("Bad").unwrap_err();
        assert_eq!(err.kind, ValueKind::Category);
        assert!(err.to_string().contains("invalid category"));
    }

    // -- IdentityList --

    #[test]
    fn identity_list_drops_blanks_and_duplicates() {
        let list = IdentityList::from_strings(["TS0601", "", "ts0601", "TS0201"], true).unwrap();
        assert_eq!(list.to_strings(), vec!["TS0601", "TS0201"]);
        assert!(list.declared_as_list());
    }

    #[test]
    fn identity_list_all_blank_is_none() {
        assert!(IdentityList::from_strings(["", "  "], true).is_none());
        assert!(IdentityList::from_strings(Vec::<String>::new(), true).is_none());
    }

    #[test]
    fn identity_list_single_is_scalar() {
        let list = IdentityList::single(Identity::new("TS0601").unwrap());
        assert_eq!(list.len(), 1);
        assert!(!list.declared_as_list());
    }

    // -- FingerprintPair --

    #[test]
    fn pair_display() {
        let pair = FingerprintPair::new(
            Identity::new("_TZE204_qyr2m29i").unwrap(),
            Identity::new("TS0601").unwrap(),
        );
        assert_eq!(pair.to_string(), "_TZE204_qyr2m29i/TS0601");
    }
}
