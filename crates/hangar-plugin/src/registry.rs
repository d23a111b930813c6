//! Registry Store
//!
//! The persistent record of installed plugins and configured repositories,
//! kept in `registry.yaml`. Every write is a full read-modify-write cycle
//! under an advisory file lock, stamped with a revision and published with
//! an atomic rename.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use hangar_common_core::{ErrorCode, Timestamp};
use hangar_common_fs::FileLock;

use crate::repository::Repository;
use crate::{PluginError, Result};

/// Upper bound on registry file size.
const MAX_REGISTRY_BYTES: usize = 16 * 1024 * 1024;

/// Lifecycle state of a plugin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginState {
    /// Known to a catalog but not installed; never stored in the registry.
    Available,
    Installed,
    Enabled,
    Disabled,
    Error,
}

impl PluginState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::Installed => "installed",
            Self::Enabled => "enabled",
            Self::Disabled => "disabled",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for PluginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where an installed plugin's files came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PluginSource {
    /// A named repository snapshot.
    Repository { name: String },
    /// The local catalog directory.
    Catalog,
    /// A git URL cloned directly.
    Git { url: String },
    /// A local plugin directory.
    Path { path: PathBuf },
    /// A packaged archive, local path or URL.
    Archive { location: String },
}

impl fmt::Display for PluginSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Repository { name } => write!(f, "repository {}", name),
            Self::Catalog => write!(f, "local catalog"),
            Self::Git { url } => write!(f, "git {}", url),
            Self::Path { path } => write!(f, "path {}", path.display()),
            Self::Archive { location } => write!(f, "archive {}", location),
        }
    }
}

/// One installed plugin
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryEntry {
    /// Mirrors the mapping key; not stored inside the entry.
    #[serde(skip)]
    pub name: String,
    pub state: PluginState,
    pub version: String,
    pub installed_at: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<PluginSource>,
}

impl RegistryEntry {
    /// A freshly installed entry.
    pub fn installed(name: &str, version: &str, source: PluginSource) -> Self {
        Self {
            name: name.to_string(),
            state: PluginState::Installed,
            version: version.to_string(),
            installed_at: Timestamp::now(),
            updated_at: None,
            source: Some(source),
        }
    }
}

impl fmt::Display for RegistryEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} [{}]", self.name, self.version, self.state)
    }
}

/// The persisted document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryDocument {
    /// Incremented on every committed write.
    #[serde(default)]
    pub revision: u64,
    #[serde(default)]
    pub plugins: BTreeMap<String, RegistryEntry>,
    #[serde(default)]
    pub repositories: BTreeMap<String, Repository>,
}

impl RegistryDocument {
    fn parse(text: &str) -> std::result::Result<Self, serde_yaml::Error> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        let mut doc: Self = serde_yaml::from_str(text)?;
        for (name, entry) in doc.plugins.iter_mut() {
            entry.name = name.clone();
        }
        for (name, repo) in doc.repositories.iter_mut() {
            repo.name = name.clone();
        }
        Ok(doc)
    }

    pub fn get(&self, name: &str) -> Option<&RegistryEntry> {
        self.plugins.get(name)
    }

    pub fn state_of(&self, name: &str) -> Option<PluginState> {
        self.plugins.get(name).map(|e| e.state)
    }

    pub fn set(&mut self, entry: RegistryEntry) {
        self.plugins.insert(entry.name.clone(), entry);
    }

    /// Entries in name order, optionally restricted to one state.
    pub fn list(&self, state: Option<PluginState>) -> Vec<RegistryEntry> {
        self.plugins
            .values()
            .filter(|e| state.map_or(true, |s| e.state == s))
            .cloned()
            .collect()
    }

    /// Repositories, lowest priority value first, then by name.
    pub fn repositories_by_priority(&self) -> Vec<Repository> {
        let mut repos: Vec<Repository> = self.repositories.values().cloned().collect();
        repos.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.name.cmp(&b.name)));
        repos
    }
}

#[derive(Debug, Default)]
struct LockState {
    depth: usize,
    lock: Option<FileLock>,
}

/// Proof that the registry lock is held. Nested acquisitions in the same
/// process share the underlying file lock.
#[derive(Debug)]
pub struct RegistryGuard {
    state: Arc<Mutex<LockState>>,
}

impl Drop for RegistryGuard {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        state.depth = state.depth.saturating_sub(1);
        if state.depth == 0 {
            state.lock = None;
        }
    }
}

/// Registry Store service
#[derive(Debug, Clone)]
pub struct RegistryStore {
    path: PathBuf,
    lock_path: PathBuf,
    lock_timeout: Duration,
    state: Arc<Mutex<LockState>>,
}

impl RegistryStore {
    pub fn new(path: impl Into<PathBuf>, lock_path: impl Into<PathBuf>, lock_timeout: Duration) -> Self {
        Self {
            path: path.into(),
            lock_path: lock_path.into(),
            lock_timeout,
            state: Arc::new(Mutex::new(LockState::default())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether a registry file has ever been written.
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Acquire the cross-process lock, reentrantly.
    ///
    /// Waiting for another holder blocks the calling thread; async callers
    /// use [`RegistryStore::lock_async`].
    pub fn lock(&self) -> Result<RegistryGuard> {
        let mut state = self.state.lock();
        if state.depth == 0 {
            let lock = FileLock::exclusive(&self.lock_path, self.lock_timeout)
                .map_err(|e| self.lock_error(e))?;
            state.lock = Some(lock);
        }
        state.depth += 1;
        Ok(self.guard())
    }

    /// [`RegistryStore::lock`] for async callers. The wait for another
    /// holder runs on the blocking pool.
    pub async fn lock_async(&self) -> Result<RegistryGuard> {
        {
            let mut state = self.state.lock();
            if state.depth > 0 {
                state.depth += 1;
                return Ok(self.guard());
            }
        }

        let path = self.lock_path.clone();
        let timeout = self.lock_timeout;
        let acquired = tokio::task::spawn_blocking(move || FileLock::exclusive(path, timeout))
            .await
            .map_err(|e| PluginError::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))?
            .map_err(|e| self.lock_error(e))?;

        let mut state = self.state.lock();
        if state.lock.is_none() {
            state.lock = Some(acquired);
        }
        state.depth += 1;
        Ok(self.guard())
    }

    fn guard(&self) -> RegistryGuard {
        RegistryGuard {
            state: Arc::clone(&self.state),
        }
    }

    fn lock_error(&self, e: hangar_common_core::Error) -> PluginError {
        if e.code() == ErrorCode::FILE_LOCKED {
            PluginError::RegistryLocked(self.lock_path.display().to_string())
        } else {
            PluginError::Fs(e)
        }
    }

    /// Read the whole document. A missing or unparsable file reads as empty.
    pub fn load(&self) -> Result<RegistryDocument> {
        match self.read_raw()? {
            None => Ok(RegistryDocument::default()),
            Some(text) => match RegistryDocument::parse(&text) {
                Ok(doc) => Ok(doc),
                Err(e) => {
                    warn!(path = %self.path.display(), error = %e, "registry unreadable, treating as empty");
                    Ok(RegistryDocument::default())
                }
            },
        }
    }

    fn read_raw(&self) -> Result<Option<String>> {
        match hangar_common_fs::read_to_string(&self.path, MAX_REGISTRY_BYTES) {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.code() == ErrorCode::FILE_NOT_FOUND => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Read, apply `f`, and commit the result atomically.
    ///
    /// Nothing is written when `f` fails.
    pub fn modify<R>(&self, f: impl FnOnce(&mut RegistryDocument) -> Result<R>) -> Result<R> {
        let _guard = self.lock()?;
        let mut doc = self.load()?;
        let base = doc.revision;
        let result = f(&mut doc)?;
        self.commit(&mut doc, base)?;
        Ok(result)
    }

    fn commit(&self, doc: &mut RegistryDocument, base: u64) -> Result<()> {
        if let Some(text) = self.read_raw()? {
            match RegistryDocument::parse(&text) {
                Ok(current) if current.revision != base => {
                    return Err(PluginError::RegistryConflict {
                        expected: base,
                        found: current.revision,
                    });
                }
                Ok(_) => {}
                Err(_) => {
                    let corrupt = self.path.with_extension("yaml.corrupt");
                    warn!(path = %corrupt.display(), "preserving unreadable registry");
                    std::fs::rename(&self.path, &corrupt)?;
                }
            }
        }

        doc.revision = base + 1;
        let yaml = serde_yaml::to_string(&*doc)?;
        hangar_common_fs::write_string_atomic(&self.path, &yaml)?;
        debug!(revision = doc.revision, "registry committed");
        Ok(())
    }

    /// `Get(name)`
    pub fn get(&self, name: &str) -> Result<Option<RegistryEntry>> {
        Ok(self.load()?.plugins.remove(name))
    }

    /// `Get(name)`, with absence as [`PluginError::NotInstalled`].
    pub fn require(&self, name: &str) -> Result<RegistryEntry> {
        self.get(name)?
            .ok_or_else(|| PluginError::NotInstalled(name.to_string()))
    }

    /// `Set(name, entry)`
    pub fn set(&self, entry: RegistryEntry) -> Result<()> {
        self.modify(|doc| {
            doc.set(entry);
            Ok(())
        })
    }

    /// Change only the state of an existing entry.
    pub fn set_state(&self, name: &str, state: PluginState) -> Result<RegistryEntry> {
        self.modify(|doc| {
            let entry = doc
                .plugins
                .get_mut(name)
                .ok_or_else(|| PluginError::NotInstalled(name.to_string()))?;
            entry.state = state;
            Ok(entry.clone())
        })
    }

    /// `Remove(name)`
    pub fn remove(&self, name: &str) -> Result<Option<RegistryEntry>> {
        self.modify(|doc| Ok(doc.plugins.remove(name)))
    }

    /// `List(stateFilter)`
    pub fn list(&self, state: Option<PluginState>) -> Result<Vec<RegistryEntry>> {
        Ok(self.load()?.list(state))
    }

    /// Configured repositories in search order.
    pub fn repositories(&self) -> Result<Vec<Repository>> {
        Ok(self.load()?.repositories_by_priority())
    }
}
