//! The in-memory registry: per-category identity sets.
//!
//! A [`Registry`] is a value. Stores load one, the merge engine computes a
//! proposed one from it, and stores persist the difference. Iteration order
//! is always sorted, so anything derived from a registry is deterministic.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::types::{Category, FingerprintPair, Identity};

// ---------------------------------------------------------------------------
// IdentitySet
// ---------------------------------------------------------------------------

/// An ordered, case-insensitive set of identities.
///
/// Inserting an identity that is already present (in any casing) keeps the
/// existing spelling.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentitySet(BTreeSet<Identity>);

impl IdentitySet {
    #[must_use]
    pub const fn new() -> Self {
        Self(BTreeSet::new())
    }

    /// Insert `id`; returns `true` if it was not already present.
    pub fn insert(&mut self, id: Identity) -> bool {
        self.0.insert(id)
    }

    #[must_use]
    pub fn contains(&self, id: &Identity) -> bool {
        self.0.contains(id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Identity> {
        self.0.iter()
    }

    /// Stored spellings in sorted order.
    #[must_use]
    pub fn to_strings(&self) -> Vec<String> {
        self.0.iter().map(|id| id.as_str().to_owned()).collect()
    }
}

impl FromIterator<Identity> for IdentitySet {
    fn from_iter<I: IntoIterator<Item = Identity>>(iter: I) -> Self {
        let mut set = Self::new();
        for id in iter {
            set.insert(id);
        }
        set
    }
}

impl Extend<Identity> for IdentitySet {
    fn extend<I: IntoIterator<Item = Identity>>(&mut self, iter: I) {
        for id in iter {
            self.insert(id);
        }
    }
}

// ---------------------------------------------------------------------------
// CategoryEntry
// ---------------------------------------------------------------------------

/// Manufacturer and model identities routed to one category.
///
/// The category's fingerprint pairs are `manufacturers x models`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryEntry {
    pub manufacturers: IdentitySet,
    pub models: IdentitySet,
}

impl CategoryEntry {
    /// Build an entry from raw strings, dropping blanks.
    pub fn from_strings<M, P>(manufacturers: M, models: P) -> Self
    where
        M: IntoIterator,
        M::Item: AsRef<str>,
        P: IntoIterator,
        P::Item: AsRef<str>,
    {
        Self {
            manufacturers: manufacturers
                .into_iter()
                .filter_map(|s| Identity::new(s.as_ref()).ok())
                .collect(),
            models: models
                .into_iter()
                .filter_map(|s| Identity::new(s.as_ref()).ok())
                .collect(),
        }
    }

    #[must_use]
    pub fn counts(&self) -> Counts {
        Counts {
            manufacturers: self.manufacturers.len(),
            models: self.models.len(),
        }
    }

    #[must_use]
    pub fn contains_pair(&self, pair: &FingerprintPair) -> bool {
        self.manufacturers.contains(&pair.manufacturer) && self.models.contains(&pair.model)
    }
}

/// Identity counts for a category or a whole registry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counts {
    pub manufacturers: usize,
    pub models: usize,
}

impl std::ops::Add for Counts {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            manufacturers: self.manufacturers + rhs.manufacturers,
            models: self.models + rhs.models,
        }
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// The system of record: `Category -> CategoryEntry`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Registry {
    categories: BTreeMap<Category, CategoryEntry>,
}

impl Registry {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            categories: BTreeMap::new(),
        }
    }

    /// Insert or replace a category's entry.
    pub fn insert(&mut self, category: Category, entry: CategoryEntry) -> Option<CategoryEntry> {
        self.categories.insert(category, entry)
    }

    /// Mutable entry for `category`, created empty if missing.
    pub fn entry_mut(&mut self, category: &Category) -> &mut CategoryEntry {
        self.categories.entry(category.clone()).or_default()
    }

    #[must_use]
    pub fn get(&self, category: &Category) -> Option<&CategoryEntry> {
        self.categories.get(category)
    }

    #[must_use]
    pub fn contains_category(&self, category: &Category) -> bool {
        self.categories.contains_key(category)
    }

    /// Categories in sorted order.
    pub fn categories(&self) -> impl Iterator<Item = &Category> {
        self.categories.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Category, &CategoryEntry)> {
        self.categories.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.categories.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }

    /// Every category holding manufacturer `id`, in sorted order.
    #[must_use]
    pub fn locate_manufacturer(&self, id: &Identity) -> Vec<&Category> {
        self.categories
            .iter()
            .filter(|(_, entry)| entry.manufacturers.contains(id))
            .map(|(category, _)| category)
            .collect()
    }

    /// `true` if some category holds both sides of `pair`.
    #[must_use]
    pub fn contains_pair(&self, pair: &FingerprintPair) -> bool {
        self.categories
            .values()
            .any(|entry| entry.contains_pair(pair))
    }

    /// Per-category counts.
    #[must_use]
    pub fn counts(&self) -> BTreeMap<Category, Counts> {
        self.categories
            .iter()
            .map(|(category, entry)| (category.clone(), entry.counts()))
            .collect()
    }

    /// Grand totals across categories.
    #[must_use]
    pub fn total(&self) -> Counts {
        self.categories
            .values()
            .map(CategoryEntry::counts)
            .fold(Counts::default(), |acc, c| acc + c)
    }

    /// SHA-256 over the canonical content, as lowercase hex.
    ///
    /// Two registries with the same identities (same spellings) in the same
    /// categories have the same digest.
    #[must_use]
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        for (category, entry) in &self.categories {
            hasher.update(b"category\0");
            hasher.update(category.as_str().as_bytes());
            hasher.update(b"\0");
            for id in entry.manufacturers.iter() {
                hasher.update(b"m\0");
                hasher.update(id.as_str().as_bytes());
                hasher.update(b"\0");
            }
            for id in entry.models.iter() {
                hasher.update(b"p\0");
                hasher.update(id.as_str().as_bytes());
                hasher.update(b"\0");
            }
        }
        format!("{:x}", hasher.finalize())
    }
}

impl FromIterator<(Category, CategoryEntry)> for Registry {
    fn from_iter<I: IntoIterator<Item = (Category, CategoryEntry)>>(iter: I) -> Self {
        Self {
            categories: iter.into_iter().collect(),
        }
    }
}
