//! Registry persistence.
//!
//! [`RegistryStore`] is the only seam between the engine and storage. The
//! merge engine computes updates; a store writes them all or none.
//!
//! - [`memory::MemoryStore`]: in-process, for tests and dry runs.
//! - [`fs::FsStore`]: one Homey driver document per category directory,
//!   committed through a snapshot + journal protocol.

pub mod fs;
pub mod memory;

use std::collections::BTreeMap;
use std::path::PathBuf;

use thiserror::Error;

use crate::model::registry::{CategoryEntry, Registry};
use crate::model::types::{Category, Identity};

pub use fs::{FsStore, Recovery};
pub use memory::MemoryStore;

/// Errors returned by [`RegistryStore`] operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An I/O error at a known path.
    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A registry document exists but cannot be used.
    #[error("malformed registry document {}: {message}", path.display())]
    Malformed { path: PathBuf, message: String },

    /// The requested category does not exist.
    #[error("category `{category}` not found in registry")]
    NotFound { category: Category },

    /// The registry root is not a directory.
    #[error("registry root {} is not a directory", path.display())]
    NotADirectory { path: PathBuf },

    /// Another process holds the registry lock.
    #[error("registry is locked: {} exists; remove it if no other fpmerge process is running", path.display())]
    Locked { path: PathBuf },

    /// Storage changed since the updates were computed; writing them would
    /// drop a committed identity.
    #[error("category `{category}` changed since it was loaded: {identity} would be dropped; re-run the pass")]
    Stale { category: Category, identity: Identity },

    /// A commit failed part-way and the previous documents were restored.
    #[error("commit failed and was rolled back: {message}")]
    RolledBack { message: String },

    /// Injected failpoint fired during commit.
    #[error("failpoint: {0}")]
    Failpoint(String),
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// `update` may replace `current` only if it keeps every identity.
pub(crate) fn ensure_kept(
    category: &Category,
    current: &CategoryEntry,
    update: &CategoryEntry,
) -> Result<(), StoreError> {
    let dropped = current
        .manufacturers
        .iter()
        .find(|id| !update.manufacturers.contains(id))
        .or_else(|| current.models.iter().find(|id| !update.models.contains(id)));
    match dropped {
        Some(identity) => Err(StoreError::Stale {
            category: category.clone(),
            identity: identity.clone(),
        }),
        None => Ok(()),
    }
}

/// Storage for per-category identity sets.
pub trait RegistryStore {
    /// Category names present in storage, sorted.
    ///
    /// # Errors
    /// Returns a [`StoreError`] if storage cannot be listed.
    fn categories(&self) -> Result<Vec<Category>, StoreError>;

    /// Load one category.
    ///
    /// # Errors
    /// [`StoreError::NotFound`] for unknown categories; I/O or parse errors
    /// otherwise.
    fn load(&self, category: &Category) -> Result<CategoryEntry, StoreError>;

    /// Take exclusive write access until [`RegistryStore::unlock`]. A pass
    /// holds it from loading its snapshot through the commit.
    ///
    /// # Errors
    /// [`StoreError::Locked`] if another writer holds it.
    fn lock(&mut self) -> Result<(), StoreError> {
        Ok(())
    }

    fn unlock(&mut self) {}

    /// Persist every update or none of them.
    ///
    /// An update must keep every identity storage currently holds for its
    /// category; otherwise nothing is written and [`StoreError::Stale`] is
    /// returned.
    ///
    /// # Errors
    /// Returns a [`StoreError`]; committed state is unchanged when it does.
    fn save_all(&mut self, updates: &BTreeMap<Category, CategoryEntry>) -> Result<(), StoreError>;

    /// Load every category into a [`Registry`] snapshot.
    ///
    /// # Errors
    /// Fails fast on the first category that cannot be loaded.
    fn load_registry(&self) -> Result<Registry, StoreError> {
        self.categories()?
            .into_iter()
            .map(|category| {
                let entry = self.load(&category)?;
                Ok((category, entry))
            })
            .collect()
    }
}
