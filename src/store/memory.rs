//! In-memory registry store.

use std::collections::BTreeMap;
use std::path::PathBuf;

use super::{RegistryStore, StoreError, ensure_kept};
use crate::model::registry::{CategoryEntry, Registry};
use crate::model::types::Category;

/// A [`RegistryStore`] backed by a [`Registry`] value.
///
/// `fail_next_save` makes the next `save_all` fail without touching state,
/// for exercising the abort path.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    registry: Registry,
    saves: usize,
    fail_next_save: bool,
}

impl MemoryStore {
    #[must_use]
    pub const fn new(registry: Registry) -> Self {
        Self {
            registry,
            saves: 0,
            fail_next_save: false,
        }
    }

    /// Current committed state.
    #[must_use]
    pub const fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Number of successful `save_all` calls.
    #[must_use]
    pub const fn saves(&self) -> usize {
        self.saves
    }

    pub fn fail_next_save(&mut self) {
        self.fail_next_save = true;
    }
}

impl RegistryStore for MemoryStore {
    fn categories(&self) -> Result<Vec<Category>, StoreError> {
        Ok(self.registry.categories().cloned().collect())
    }

    fn load(&self, category: &Category) -> Result<CategoryEntry, StoreError> {
        self.registry
            .get(category)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                category: category.clone(),
            })
    }

    fn save_all(&mut self, updates: &BTreeMap<Category, CategoryEntry>) -> Result<(), StoreError> {
        if std::mem::take(&mut self.fail_next_save) {
            return Err(StoreError::io(
                PathBuf::from("<memory>"),
                std::io::Error::other("injected save failure"),
            ));
        }
        for (category, entry) in updates {
            if let Some(current) = self.registry.get(category) {
                ensure_kept(category, current, entry)?;
            }
        }
        for (category, entry) in updates {
            self.registry.insert(category.clone(), entry.clone());
        }
        self.saves += 1;
        Ok(())
    }

    fn load_registry(&self) -> Result<Registry, StoreError> {
        Ok(self.registry.clone())
    }
}
