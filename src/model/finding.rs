//! Candidate identification records ("findings").
//!
//! Findings arrive as JSON from external collectors. Their identity fields
//! may be a string, an array of strings, `null`, or missing, and older
//! collectors use Homey's field names (`manufacturerName`, `productId`).
//! [`RawFinding`] mirrors that wire shape; [`Finding`] is the normalized form
//! every other module works with. A record that does not fit the wire shape
//! is kept as a malformed placeholder so the rest of the batch still runs.

use serde::de::Error as _;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::types::{FingerprintPair, IdentityList};

// ---------------------------------------------------------------------------
// Wire shape
// ---------------------------------------------------------------------------

/// A string-or-list identity field as found on the wire.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IdentityField {
    One(String),
    Many(Vec<Option<String>>),
}

impl IdentityField {
    fn normalize(self) -> Option<IdentityList> {
        match self {
            Self::One(s) => IdentityList::from_strings([s], false),
            Self::Many(values) => IdentityList::from_strings(values.into_iter().flatten(), true),
        }
    }

    fn from_list(list: &IdentityList) -> Self {
        if list.declared_as_list() {
            Self::Many(list.to_strings().into_iter().map(Some).collect())
        } else {
            Self::One(list.to_strings().join(","))
        }
    }
}

/// A finding exactly as collectors emit it.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawFinding {
    #[serde(default, alias = "manufacturerName", skip_serializing_if = "Option::is_none")]
    pub manufacturer_identity: Option<IdentityField>,
    #[serde(default, alias = "productId", skip_serializing_if = "Option::is_none")]
    pub model_identity: Option<IdentityField>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_name: Option<String>,
    #[serde(default, alias = "sourceFile", skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, alias = "action", skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replace_existing: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preserve_legacy: Option<bool>,
}

// ---------------------------------------------------------------------------
// Finding
// ---------------------------------------------------------------------------

/// A normalized finding.
///
/// Identity fields are either absent or a non-empty [`IdentityList`]; blank
/// strings, empty arrays and `null` all mean "absent".
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawFinding", into = "RawFinding")]
pub struct Finding {
    pub manufacturers: Option<IdentityList>,
    pub models: Option<IdentityList>,
    pub description: Option<String>,
    pub title: Option<String>,
    pub device_name: Option<String>,
    pub source: Option<String>,
    pub operation: Option<String>,
    pub replace_existing: bool,
    pub preserve_legacy: Option<bool>,
    /// Why the record could not be read, if it could not.
    pub malformed: Option<String>,
}

impl From<RawFinding> for Finding {
    fn from(raw: RawFinding) -> Self {
        Self {
            manufacturers: raw.manufacturer_identity.and_then(IdentityField::normalize),
            models: raw.model_identity.and_then(IdentityField::normalize),
            description: non_blank(raw.description),
            title: non_blank(raw.title),
            device_name: non_blank(raw.device_name),
            source: non_blank(raw.source),
            operation: non_blank(raw.operation),
            replace_existing: raw.replace_existing.unwrap_or(false),
            preserve_legacy: raw.preserve_legacy,
            malformed: None,
        }
    }
}

impl From<Finding> for RawFinding {
    fn from(f: Finding) -> Self {
        Self {
            manufacturer_identity: f.manufacturers.as_ref().map(IdentityField::from_list),
            model_identity: f.models.as_ref().map(IdentityField::from_list),
            description: f.description,
            title: f.title,
            device_name: f.device_name,
            source: f.source,
            operation: f.operation,
            replace_existing: f.replace_existing.then_some(true),
            preserve_legacy: f.preserve_legacy,
        }
    }
}

fn non_blank(s: Option<String>) -> Option<String> {
    s.map(|s| s.trim().to_owned()).filter(|s| !s.is_empty())
}

impl Finding {
    /// A scalar manufacturer/model finding.
    #[must_use]
    pub fn with_pair(manufacturer: &str, model: &str) -> Self {
        Self {
            manufacturers: IdentityList::from_strings([manufacturer], false),
            models: IdentityList::from_strings([model], false),
            ..Self::default()
        }
    }

    /// Attach a free-text description.
    #[must_use]
    pub fn described(mut self, description: &str) -> Self {
        self.description = non_blank(Some(description.to_owned()));
        self
    }

    /// A placeholder for a record that could not be read.
    #[must_use]
    pub fn malformed(problem: impl Into<String>) -> Self {
        Self {
            malformed: Some(problem.into()),
            ..Self::default()
        }
    }

    /// Read one JSON record.
    ///
    /// Never fails: a record with the wrong shape becomes a
    /// [`Finding::malformed`] placeholder carrying the reason.
    #[must_use]
    pub fn from_record(record: Value) -> Self {
        if let Some(problem) = shape_problem(&record) {
            return Self::malformed(problem);
        }
        serde_json::from_value(record).unwrap_or_else(|e| Self::malformed(e.to_string()))
    }

    /// Every `(manufacturer, model)` pair this finding advertises.
    ///
    /// Empty unless both sides are present.
    #[must_use]
    pub fn pairs(&self) -> Vec<FingerprintPair> {
        let (Some(mfrs), Some(models)) = (&self.manufacturers, &self.models) else {
            return Vec::new();
        };
        mfrs.iter()
            .flat_map(|m| {
                models
                    .iter()
                    .map(move |p| FingerprintPair::new(m.clone(), p.clone()))
            })
            .collect()
    }

    /// Lowercased free text used by keyword classification.
    #[must_use]
    pub fn text(&self) -> String {
        [&self.device_name, &self.description, &self.title]
            .into_iter()
            .flatten()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase()
    }

    /// `true` if the finding asks for identities to be removed.
    #[must_use]
    pub fn is_removal(&self) -> bool {
        self.operation
            .as_deref()
            .is_some_and(|op| op.eq_ignore_ascii_case("remove") || op.eq_ignore_ascii_case("delete"))
    }

    /// Short label for logs and reports.
    #[must_use]
    pub fn label(&self) -> String {
        let side = |l: &Option<IdentityList>| {
            l.as_ref()
                .map_or_else(|| "<none>".to_owned(), |l| l.to_strings().join(","))
        };
        format!("{}/{}", side(&self.manufacturers), side(&self.models))
    }
}

// ---------------------------------------------------------------------------
// Documents
// ---------------------------------------------------------------------------

const IDENTITY_KEYS: &[&str] = &[
    "manufacturerIdentity",
    "manufacturerName",
    "modelIdentity",
    "productId",
];

/// Why `record` cannot carry identity fields, if it cannot.
fn shape_problem(record: &Value) -> Option<String> {
    let Value::Object(map) = record else {
        return Some(format!("record is {}, not an object", kind(record)));
    };
    IDENTITY_KEYS.iter().find_map(|&key| {
        let bad = match map.get(key)? {
            Value::Null | Value::String(_) => None,
            Value::Array(items) => items
                .iter()
                .find(|v| !matches!(v, Value::Null | Value::String(_)))
                .map(|v| format!("an array holding {}", kind(v))),
            other => Some(kind(other).to_owned()),
        }?;
        Some(format!("`{key}` must be a string or an array of strings, found {bad}"))
    })
}

const fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Parse a findings document: a bare array, or an object with a `findings`
/// array.
///
/// Records are read one by one (see [`Finding::from_record`]), so one bad
/// record does not lose the batch.
///
/// # Errors
/// Returns the JSON error if the text is not JSON or the document has
/// neither shape.
pub fn parse_findings(json: &str) -> Result<Vec<Finding>, serde_json::Error> {
    let records = match serde_json::from_str::<Value>(json)? {
        Value::Array(records) => records,
        Value::Object(mut doc) => match doc.remove("findings") {
            Some(Value::Array(records)) => records,
            _ => return Err(serde_json::Error::custom("object has no `findings` array")),
        },
        other => {
            return Err(serde_json::Error::custom(format!(
                "findings document is {}, expected an array or an object",
                kind(&other)
            )));
        }
    };
    Ok(records.into_iter().map(Finding::from_record).collect())
}
