//! Filesystem registry store.
//!
//! Layout under the registry root:
//!
//! ```text
//! <root>/<category>/<document>                    Homey driver document
//! <root>/.fpmerge/lock                            held by a pass, or while writing
//! <root>/.fpmerge/journal.json                    only while a commit is in flight
//! <root>/.fpmerge/snapshot/<category>/<document>  pre-commit copies
//! ```
//!
//! Only `zigbee.manufacturerName` and `zigbee.productId` are owned by the
//! engine. Every other key of a driver document is written back untouched,
//! in its original position.
//!
//! Commit protocol for `save_all` (under the lock):
//!
//! 0. Re-read each target and refuse an update that would drop an identity
//!    it holds now ([`StoreError::Stale`]).
//! 1. Stage every new document as a temp file next to its target (fsync).
//! 2. Copy the current documents into the snapshot directory.
//! 3. Write the journal (phase `swap`) atomically.
//! 4. Rename each staged file over its target.
//! 5. Mark the journal `committed`, then remove snapshot and journal.
//!
//! A failure during step 4 restores every target from the snapshot before
//! returning. A crash leaves the journal behind; [`FsStore::open`] then
//! restores (phase `swap`) or just cleans up (phase `committed`).

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tempfile::{Builder, TempPath};
use tracing::{debug, info, instrument, warn};

use super::{RegistryStore, StoreError, ensure_kept};
use crate::model::registry::CategoryEntry;
use crate::model::types::Category;

const STATE_DIR: &str = ".fpmerge";
const JOURNAL_FILE: &str = "journal.json";
const SNAPSHOT_DIR: &str = "snapshot";
const LOCK_FILE: &str = "lock";
const STAGE_PREFIX: &str = ".fpmerge-stage-";

const MANUFACTURER_KEY: &str = "manufacturerName";
const MODEL_KEY: &str = "productId";

// ---------------------------------------------------------------------------
// Journal
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
enum CommitPhase {
    Swap,
    Committed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
struct JournalEntry {
    category: Category,
    /// Whether the target document existed before the commit.
    existed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
struct Journal {
    phase: CommitPhase,
    entries: Vec<JournalEntry>,
}

/// What [`FsStore::open`] found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recovery {
    /// No interrupted commit.
    Clean,
    /// An interrupted commit was undone; these categories were restored.
    RolledBack { categories: Vec<Category> },
    /// A commit had finished its renames; only cleanup was left.
    Finalized { categories: Vec<Category> },
}

// ---------------------------------------------------------------------------
// FsStore
// ---------------------------------------------------------------------------

/// A [`RegistryStore`] over a directory of Homey driver documents.
#[derive(Debug)]
pub struct FsStore {
    root: PathBuf,
    document: String,
    recovery: Recovery,
    /// Held between [`RegistryStore::lock`] and [`RegistryStore::unlock`].
    lock: Option<LockGuard>,
}

struct Staged {
    target: PathBuf,
    file: TempPath,
}

impl FsStore {
    /// Open the registry at `root`, recovering any interrupted commit.
    ///
    /// # Errors
    /// Returns [`StoreError`] if `root` is not a directory, the registry is
    /// locked, or recovery fails.
    #[instrument(skip_all, fields(root = %root.display()))]
    pub fn open(root: &Path, document: &str) -> Result<Self, StoreError> {
        let meta = fs::metadata(root).map_err(|e| StoreError::io(root, e))?;
        if !meta.is_dir() {
            return Err(StoreError::NotADirectory {
                path: root.to_owned(),
            });
        }
        let mut store = Self {
            root: root.to_owned(),
            document: document.to_owned(),
            recovery: Recovery::Clean,
            lock: None,
        };
        if store.journal_path().exists() {
            let _lock = LockGuard::acquire(&store.state_dir())?;
            store.recovery = store.recover()?;
            warn!(recovery = ?store.recovery, "recovered interrupted commit");
        }
        Ok(store)
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Outcome of the recovery performed by [`FsStore::open`].
    #[must_use]
    pub const fn recovery(&self) -> &Recovery {
        &self.recovery
    }

    fn document_path(&self, category: &Category) -> PathBuf {
        self.root.join(category.as_str()).join(&self.document)
    }

    fn state_dir(&self) -> PathBuf {
        self.root.join(STATE_DIR)
    }

    fn journal_path(&self) -> PathBuf {
        self.state_dir().join(JOURNAL_FILE)
    }

    fn snapshot_path(&self, category: &Category) -> PathBuf {
        self.state_dir()
            .join(SNAPSHOT_DIR)
            .join(category.as_str())
            .join(&self.document)
    }

    // -- commit steps --

    fn stage(&self, category: &Category, entry: &CategoryEntry) -> Result<Staged, StoreError> {
        let target = self.document_path(category);
        let mut doc = match fs::metadata(&target) {
            Ok(_) => read_document(&target)?,
            Err(e) if e.kind() == ErrorKind::NotFound => Map::new(),
            Err(e) => return Err(StoreError::io(&target, e)),
        };
        set_identities(&mut doc, entry, &target)?;

        let dir = self.root.join(category.as_str());
        fs::create_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))?;
        let mut tmp = Builder::new()
            .prefix(STAGE_PREFIX)
            .tempfile_in(&dir)
            .map_err(|e| StoreError::io(&dir, e))?;
        tmp.write_all(&render(&doc, &target)?)
            .and_then(|()| tmp.as_file().sync_all())
            .map_err(|e| StoreError::io(tmp.path(), e))?;
        Ok(Staged {
            target,
            file: tmp.into_temp_path(),
        })
    }

    fn snapshot(&self, entries: &[JournalEntry]) -> Result<(), StoreError> {
        let dir = self.state_dir().join(SNAPSHOT_DIR);
        remove_dir_if_exists(&dir)?;
        for entry in entries.iter().filter(|e| e.existed) {
            let source = self.document_path(&entry.category);
            let bytes = fs::read(&source).map_err(|e| StoreError::io(&source, e))?;
            write_atomic(&self.snapshot_path(&entry.category), &bytes)?;
        }
        Ok(())
    }

    fn swap(staged: Vec<Staged>) -> Result<(), StoreError> {
        fp_store("FP_STORE_AFTER_JOURNAL")?;
        for (i, s) in staged.into_iter().enumerate() {
            s.file
                .persist(&s.target)
                .map_err(|e| StoreError::io(&s.target, e.error))?;
            if i == 0 {
                fp_store("FP_STORE_MID_SWAP")?;
            }
        }
        Ok(())
    }

    /// Put every journaled document back the way the snapshot has it.
    fn restore(&self, entries: &[JournalEntry]) -> Result<(), StoreError> {
        for entry in entries {
            let target = self.document_path(&entry.category);
            if entry.existed {
                let snap = self.snapshot_path(&entry.category);
                let bytes = fs::read(&snap).map_err(|e| StoreError::io(&snap, e))?;
                write_atomic(&target, &bytes)?;
            } else {
                match fs::remove_file(&target) {
                    Ok(()) => {}
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => return Err(StoreError::io(&target, e)),
                }
            }
            self.sweep_staged(&entry.category)?;
        }
        Ok(())
    }

    /// Remove staged temp files a crash left in a category directory.
    fn sweep_staged(&self, category: &Category) -> Result<(), StoreError> {
        let dir = self.root.join(category.as_str());
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(StoreError::io(&dir, e)),
        };
        for entry in entries {
            let entry = entry.map_err(|e| StoreError::io(&dir, e))?;
            if entry.file_name().to_string_lossy().starts_with(STAGE_PREFIX) {
                let path = entry.path();
                fs::remove_file(&path).map_err(|e| StoreError::io(&path, e))?;
            }
        }
        Ok(())
    }

    fn cleanup(&self) -> Result<(), StoreError> {
        remove_dir_if_exists(&self.state_dir().join(SNAPSHOT_DIR))?;
        let journal = self.journal_path();
        match fs::remove_file(&journal) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::io(&journal, e)),
        }
    }

    fn recover(&self) -> Result<Recovery, StoreError> {
        let path = self.journal_path();
        let bytes = fs::read(&path).map_err(|e| StoreError::io(&path, e))?;
        let journal: Journal =
            serde_json::from_slice(&bytes).map_err(|e| StoreError::Malformed {
                path: path.clone(),
                message: e.to_string(),
            })?;
        let categories = journal.entries.iter().map(|e| e.category.clone()).collect();
        let recovery = match journal.phase {
            CommitPhase::Swap => {
                self.restore(&journal.entries)?;
                Recovery::RolledBack { categories }
            }
            CommitPhase::Committed => Recovery::Finalized { categories },
        };
        self.cleanup()?;
        Ok(recovery)
    }
}

impl RegistryStore for FsStore {
    fn categories(&self) -> Result<Vec<Category>, StoreError> {
        let entries = fs::read_dir(&self.root).map_err(|e| StoreError::io(&self.root, e))?;
        let mut out = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StoreError::io(&self.root, e))?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if name.starts_with('.') || !entry.path().join(&self.document).is_file() {
                continue;
            }
            match Category::new(name) {
                Ok(category) => out.push(category),
                Err(e) => debug!(dir = name, error = %e, "skipping directory"),
            }
        }
        out.sort();
        Ok(out)
    }

    fn lock(&mut self) -> Result<(), StoreError> {
        if self.lock.is_none() {
            self.lock = Some(LockGuard::acquire(&self.state_dir())?);
            debug!(root = %self.root.display(), "registry locked");
        }
        Ok(())
    }

    fn unlock(&mut self) {
        self.lock = None;
    }

    fn load(&self, category: &Category) -> Result<CategoryEntry, StoreError> {
        let path = self.document_path(category);
        if !path.is_file() {
            return Err(StoreError::NotFound {
                category: category.clone(),
            });
        }
        let doc = read_document(&path)?;
        Ok(CategoryEntry::from_strings(
            identities(&doc, MANUFACTURER_KEY, &path)?,
            identities(&doc, MODEL_KEY, &path)?,
        ))
    }

    #[instrument(skip_all, fields(root = %self.root.display(), categories = updates.len()))]
    fn save_all(&mut self, updates: &BTreeMap<Category, CategoryEntry>) -> Result<(), StoreError> {
        if updates.is_empty() {
            return Ok(());
        }
        let _lock = match self.lock {
            Some(_) => None,
            None => Some(LockGuard::acquire(&self.state_dir())?),
        };
        for (category, entry) in updates {
            match self.load(category) {
                Ok(current) => ensure_kept(category, &current, entry)?,
                Err(StoreError::NotFound { .. }) => {}
                Err(e) => return Err(e),
            }
        }

        let mut journal = Journal {
            phase: CommitPhase::Swap,
            entries: Vec::with_capacity(updates.len()),
        };
        let mut staged = Vec::with_capacity(updates.len());
        for (category, entry) in updates {
            journal.entries.push(JournalEntry {
                category: category.clone(),
                existed: self.document_path(category).is_file(),
            });
            staged.push(self.stage(category, entry)?);
        }
        fp_store("FP_STORE_AFTER_STAGE")?;

        self.snapshot(&journal.entries)?;
        write_journal(&self.journal_path(), &journal)?;

        if let Err(e) = Self::swap(staged) {
            warn!(error = %e, "commit failed, restoring snapshot");
            self.restore(&journal.entries)?;
            self.cleanup()?;
            return Err(StoreError::RolledBack {
                message: e.to_string(),
            });
        }

        journal.phase = CommitPhase::Committed;
        write_journal(&self.journal_path(), &journal)?;
        fp_store("FP_STORE_BEFORE_CLEANUP")?;
        self.cleanup()?;
        info!(categories = journal.entries.len(), "registry committed");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Lock
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct LockGuard {
    path: PathBuf,
}

impl LockGuard {
    fn acquire(state_dir: &Path) -> Result<Self, StoreError> {
        fs::create_dir_all(state_dir).map_err(|e| StoreError::io(state_dir, e))?;
        let path = state_dir.join(LOCK_FILE);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                // Best effort: the pid only helps a human clear a stale lock.
                let _ = writeln!(file, "{}", std::process::id());
                Ok(Self { path })
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Err(StoreError::Locked { path }),
            Err(e) => Err(StoreError::io(&path, e)),
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
        // only succeeds when nothing else is left in the state dir
        if let Some(state_dir) = self.path.parent() {
            let _ = fs::remove_dir(state_dir);
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn read_document(path: &Path) -> Result<Map<String, Value>, StoreError> {
    let bytes = fs::read(path).map_err(|e| StoreError::io(path, e))?;
    match serde_json::from_slice::<Value>(&bytes) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(StoreError::Malformed {
            path: path.to_owned(),
            message: "top level is not a JSON object".to_owned(),
        }),
        Err(e) => Err(StoreError::Malformed {
            path: path.to_owned(),
            message: e.to_string(),
        }),
    }
}

fn identities(doc: &Map<String, Value>, key: &str, path: &Path) -> Result<Vec<String>, StoreError> {
    let malformed = |message: String| StoreError::Malformed {
        path: path.to_owned(),
        message,
    };
    match doc.get("zigbee").and_then(|z| z.get(key)) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::String(s)) => Ok(vec![s.clone()]),
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| {
                v.as_str()
                    .map(str::to_owned)
                    .ok_or_else(|| malformed(format!("zigbee.{key} holds a non-string value {v}")))
            })
            .collect(),
        Some(other) => Err(malformed(format!(
            "zigbee.{key} must be a string array, got {other}"
        ))),
    }
}

fn set_identities(
    doc: &mut Map<String, Value>,
    entry: &CategoryEntry,
    path: &Path,
) -> Result<(), StoreError> {
    let zigbee = doc
        .entry("zigbee")
        .or_insert_with(|| Value::Object(Map::new()));
    let Value::Object(zigbee) = zigbee else {
        return Err(StoreError::Malformed {
            path: path.to_owned(),
            message: "zigbee is not a JSON object".to_owned(),
        });
    };
    let array = |values: Vec<String>| Value::Array(values.into_iter().map(Value::String).collect());
    zigbee.insert(
        MANUFACTURER_KEY.to_owned(),
        array(entry.manufacturers.to_strings()),
    );
    zigbee.insert(MODEL_KEY.to_owned(), array(entry.models.to_strings()));
    Ok(())
}

fn render(doc: &Map<String, Value>, path: &Path) -> Result<Vec<u8>, StoreError> {
    let mut bytes = serde_json::to_vec_pretty(doc).map_err(|e| StoreError::Malformed {
        path: path.to_owned(),
        message: e.to_string(),
    })?;
    bytes.push(b'\n');
    Ok(bytes)
}

fn write_journal(path: &Path, journal: &Journal) -> Result<(), StoreError> {
    let mut data = serde_json::to_vec_pretty(journal).map_err(|e| StoreError::Malformed {
        path: path.to_owned(),
        message: e.to_string(),
    })?;
    data.push(b'\n');
    write_atomic(path, &data)
}

/// Write via a sibling temp file, fsync, rename, fsync the parent.
fn write_atomic(path: &Path, data: &[u8]) -> Result<(), StoreError> {
    let io = |e| StoreError::io(path, e);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io)?;
    }

    let tmp = path.with_extension("tmp");
    let mut file = File::create(&tmp).map_err(io)?;
    file.write_all(data).map_err(io)?;
    file.sync_all().map_err(io)?;
    fs::rename(&tmp, path).map_err(io)?;

    if let Some(parent) = path.parent() {
        // Fsync parent directory so the rename is durable across power loss.
        let dir = File::open(parent).map_err(io)?;
        dir.sync_all().map_err(io)?;
    }
    Ok(())
}

fn remove_dir_if_exists(dir: &Path) -> Result<(), StoreError> {
    match fs::remove_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StoreError::io(dir, e)),
    }
}

/// Invoke a failpoint and convert the result to [`StoreError`].
///
/// Without the `failpoints` feature this is a no-op.
#[allow(clippy::unnecessary_wraps)]
fn fp_store(_name: &str) -> Result<(), StoreError> {
    #[cfg(feature = "failpoints")]
    {
        crate::fp!(_name).map_err(|e| StoreError::Failpoint(e.to_string()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    const DOC: &str = "driver.compose.json";

    fn cat(s: &str) -> Category {
        Category::new(s).unwrap()
    }

    fn write_driver(root: &Path, category: &str, json: &str) {
        let dir = root.join(category);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(DOC), json).unwrap();
    }

    fn setup() -> TempDir {
        let dir = TempDir::new().unwrap();
        write_driver(
            dir.path(),
            "climate_sensor",
            r#"{
  "name": {"en": "Climate Sensor"},
  "class": "sensor",
  "zigbee": {
    "manufacturerName": ["_TZE200_bbbbbbbb", "_tze200_AAAAAAAA"],
    "productId": ["TS0601"],
    "endpoints": {"1": {"clusters": [0, 1026]}}
  },
  "capabilities": ["measure_temperature"]
}"#,
        );
        write_driver(
            dir.path(),
            "plug_smart",
            r#"{"zigbee": {"manufacturerName": "_TZ3000_single01", "productId": ["TS011F"]}}"#,
        );
        fs::create_dir_all(dir.path().join("assets")).unwrap();
        fs::create_dir_all(dir.path().join("Not_A_Category")).unwrap();
        fs::write(dir.path().join("Not_A_Category").join(DOC), "{}").unwrap();
        dir
    }

    #[test]
    fn lists_only_valid_category_dirs_with_documents() {
        let dir = setup();
        let store = FsStore::open(dir.path(), DOC).unwrap();
        assert_eq!(
            store.categories().unwrap(),
            vec![cat("climate_sensor"), cat("plug_smart")]
        );
        assert_eq!(store.recovery(), &Recovery::Clean);
    }

    #[test]
    fn load_accepts_scalar_and_array_fields() {
        let dir = setup();
        let store = FsStore::open(dir.path(), DOC).unwrap();
        let climate = store.load(&cat("climate_sensor")).unwrap();
        assert_eq!(
            climate.manufacturers.to_strings(),
            vec!["_tze200_AAAAAAAA", "_TZE200_bbbbbbbb"]
        );
        let plug = store.load(&cat("plug_smart")).unwrap();
        assert_eq!(plug.manufacturers.to_strings(), vec!["_TZ3000_single01"]);
        assert!(matches!(
            store.load(&cat("siren")),
            Err(StoreError::NotFound { .. })
        ));
    }

    #[test]
    fn load_rejects_non_string_entries() {
        let dir = setup();
        write_driver(dir.path(), "siren", r#"{"zigbee": {"manufacturerName": [1, 2]}}"#);
        let store = FsStore::open(dir.path(), DOC).unwrap();
        let err = store.load(&cat("siren")).unwrap_err();
        assert!(matches!(err, StoreError::Malformed { .. }), "{err}");
    }

    #[test]
    fn save_preserves_unrelated_keys_and_sorts() {
        let dir = setup();
        let mut store = FsStore::open(dir.path(), DOC).unwrap();
        let mut entry = store.load(&cat("climate_sensor")).unwrap();
        entry.manufacturers.extend(
            CategoryEntry::from_strings(["_TZE200_00000000"], Vec::<&str>::new()).manufacturers.iter().cloned(),
        );
        let updates = BTreeMap::from([(cat("climate_sensor"), entry)]);
        store.save_all(&updates).unwrap();

        let text = fs::read_to_string(dir.path().join("climate_sensor").join(DOC)).unwrap();
        let doc: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(doc["name"]["en"], "Climate Sensor");
        assert_eq!(doc["capabilities"][0], "measure_temperature");
        assert_eq!(doc["zigbee"]["endpoints"]["1"]["clusters"][1], 1026);
        assert_eq!(
            doc["zigbee"]["manufacturerName"],
            serde_json::json!(["_TZE200_00000000", "_tze200_AAAAAAAA", "_TZE200_bbbbbbbb"])
        );
        // key order preserved
        let keys: Vec<&str> = doc.as_object().unwrap().keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["name", "class", "zigbee", "capabilities"]);
        assert!(text.ends_with("}\n"));

        // no commit state left behind
        assert!(!dir.path().join(STATE_DIR).join(JOURNAL_FILE).exists());
        assert!(!dir.path().join(STATE_DIR).join(SNAPSHOT_DIR).exists());
        assert!(!dir.path().join(STATE_DIR).join(LOCK_FILE).exists());
    }

    #[test]
    fn save_creates_missing_category_document() {
        let dir = setup();
        let mut store = FsStore::open(dir.path(), DOC).unwrap();
        let updates = BTreeMap::from([(
            cat("siren"),
            CategoryEntry::from_strings(["_TZE204_sirensir"], ["TS0601"]),
        )]);
        store.save_all(&updates).unwrap();
        let entry = store.load(&cat("siren")).unwrap();
        assert_eq!(entry.manufacturers.len(), 1);
    }

    #[test]
    fn save_refuses_when_locked() {
        let dir = setup();
        let mut store = FsStore::open(dir.path(), DOC).unwrap();
        fs::create_dir_all(dir.path().join(STATE_DIR)).unwrap();
        fs::write(dir.path().join(STATE_DIR).join(LOCK_FILE), "999\n").unwrap();
        let updates = BTreeMap::from([(cat("plug_smart"), CategoryEntry::default())]);
        let err = store.save_all(&updates).unwrap_err();
        assert!(matches!(err, StoreError::Locked { .. }), "{err}");
    }

    #[test]
    fn held_lock_spans_saves_until_unlock() {
        let dir = setup();
        let mut store = FsStore::open(dir.path(), DOC).unwrap();
        let lock = dir.path().join(STATE_DIR).join(LOCK_FILE);
        store.lock().unwrap();
        assert!(lock.exists());

        let updates = BTreeMap::from([(
            cat("siren"),
            CategoryEntry::from_strings(["_TZE204_sirensir"], ["TS0601"]),
        )]);
        store.save_all(&updates).unwrap();
        assert!(lock.exists());
        let mut other = FsStore::open(dir.path(), DOC).unwrap();
        assert!(matches!(other.lock(), Err(StoreError::Locked { .. })));

        store.unlock();
        assert!(!lock.exists());
        other.lock().unwrap();
        other.unlock();
    }

    #[test]
    fn open_rolls_back_interrupted_swap() {
        let dir = setup();
        let root = dir.path();
        let original = fs::read(root.join("plug_smart").join(DOC)).unwrap();

        // Simulate a crash mid-swap: snapshot + journal present, target
        // already replaced, a new category half-created, a stray stage file.
        let state = root.join(STATE_DIR);
        fs::create_dir_all(state.join(SNAPSHOT_DIR).join("plug_smart")).unwrap();
        fs::write(state.join(SNAPSHOT_DIR).join("plug_smart").join(DOC), &original).unwrap();
        fs::write(root.join("plug_smart").join(DOC), r#"{"zigbee": {}}"#).unwrap();
        write_driver(root, "siren", r#"{"zigbee": {"manufacturerName": ["x"]}}"#);
        fs::write(root.join("plug_smart").join(".fpmerge-stage-abc"), "junk").unwrap();
        let journal = Journal {
            phase: CommitPhase::Swap,
            entries: vec![
                JournalEntry {
                    category: cat("plug_smart"),
                    existed: true,
                },
                JournalEntry {
                    category: cat("siren"),
                    existed: false,
                },
            ],
        };
        write_journal(&state.join(JOURNAL_FILE), &journal).unwrap();

        let store = FsStore::open(root, DOC).unwrap();
        assert_eq!(
            store.recovery(),
            &Recovery::RolledBack {
                categories: vec![cat("plug_smart"), cat("siren")]
            }
        );
        assert_eq!(fs::read(root.join("plug_smart").join(DOC)).unwrap(), original);
        assert!(!root.join("siren").join(DOC).exists());
        assert!(!root.join("plug_smart").join(".fpmerge-stage-abc").exists());
        assert!(!state.join(JOURNAL_FILE).exists());
        assert!(!state.join(LOCK_FILE).exists());
    }

    #[test]
    fn open_finalizes_committed_journal() {
        let dir = setup();
        let root = dir.path();
        let current = fs::read(root.join("plug_smart").join(DOC)).unwrap();
        let journal = Journal {
            phase: CommitPhase::Committed,
            entries: vec![JournalEntry {
                category: cat("plug_smart"),
                existed: true,
            }],
        };
        write_journal(&root.join(STATE_DIR).join(JOURNAL_FILE), &journal).unwrap();

        let store = FsStore::open(root, DOC).unwrap();
        assert!(matches!(store.recovery(), Recovery::Finalized { .. }));
        assert_eq!(fs::read(root.join("plug_smart").join(DOC)).unwrap(), current);
        assert!(!root.join(STATE_DIR).join(JOURNAL_FILE).exists());
    }

    #[test]
    fn open_rejects_file_root() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("file");
        fs::write(&file, "").unwrap();
        assert!(matches!(
            FsStore::open(&file, DOC),
            Err(StoreError::NotADirectory { .. })
        ));
    }
}
