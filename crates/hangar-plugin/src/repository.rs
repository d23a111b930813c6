//! Repository Cache
//!
//! Keeps a local snapshot of every configured catalog under
//! `cache/repos/<name>`. Git repositories are cloned once and then fetched
//! and fast-forwarded; index repositories are a single YAML document
//! fetched with an ETag-conditional request (or read from `file://`).

use reqwest::header::{ETAG, IF_NONE_MATCH};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn, Instrument};
use url::Url;

use hangar_common_config::{NetworkConfig, RepositoryKind};
use hangar_common_core::Timestamp;
use hangar_common_fs::path::normalize;

use crate::descriptor::{PluginDescriptor, DESCRIPTOR_FILE};
use crate::{PluginError, Result};

/// Snapshot file of an index repository.
const INDEX_FILE: &str = "index.yaml";
/// Cached ETag of an index repository.
const ETAG_FILE: &str = ".etag";
const MAX_INDEX_BYTES: usize = 8 * 1024 * 1024;

/// Label used for the local catalog in search results and errors.
pub const LOCAL_CATALOG: &str = "local";

/// A configured remote catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    /// Mirrors the registry mapping key.
    #[serde(skip)]
    pub name: String,
    pub url: String,
    pub kind: RepositoryKind,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Lower values are searched first.
    #[serde(default)]
    pub priority: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync: Option<Timestamp>,
}

fn default_enabled() -> bool {
    true
}

impl Repository {
    pub fn new(name: &str, url: &str, kind: RepositoryKind) -> Self {
        Self {
            name: name.to_string(),
            url: url.to_string(),
            kind,
            enabled: true,
            priority: 100,
            last_sync: None,
        }
    }
}

impl fmt::Display for Repository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}, {})", self.name, self.kind, self.url)?;
        if !self.enabled {
            write!(f, " [disabled]")?;
        }
        Ok(())
    }
}

/// An index repository document
#[derive(Debug, Clone, Default)]
pub struct IndexDocument {
    pub plugins: Vec<IndexEntry>,
}

/// One plugin listed in an index
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub descriptor: PluginDescriptor,
    /// Archive location, absolute or relative to the index URL.
    pub archive: String,
}

impl IndexDocument {
    /// Parse `plugins: [ { <descriptor fields>, archive: <url> } ]`.
    ///
    /// Each entry is validated like an on-disk descriptor.
    pub fn parse(text: &str) -> Result<Self> {
        let value: Value = serde_yaml::from_str(text)?;
        let plugins = match value {
            Value::Null => return Ok(Self::default()),
            Value::Mapping(mut map) => map.remove("plugins").unwrap_or(Value::Null),
            _ => return Err(PluginError::invalid(INDEX_FILE, "expected a mapping")),
        };
        let items = match plugins {
            Value::Null => Vec::new(),
            Value::Sequence(items) => items,
            _ => return Err(PluginError::invalid("plugins", "expected a list")),
        };

        let mut entries = Vec::with_capacity(items.len());
        for (i, item) in items.into_iter().enumerate() {
            let Value::Mapping(mut map) = item else {
                return Err(PluginError::invalid(format!("plugins[{}]", i), "expected a mapping"));
            };
            let archive = match map.remove("archive") {
                Some(Value::String(s)) if !s.trim().is_empty() => s,
                _ => return Err(PluginError::invalid(format!("plugins[{}].archive", i), "is required")),
            };
            let descriptor = PluginDescriptor::from_value(Value::Mapping(map))?;
            entries.push(IndexEntry { descriptor, archive });
        }
        Ok(Self { plugins: entries })
    }
}

/// How a sync changed the snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncKind {
    /// No snapshot existed; the full catalog was fetched.
    Full,
    /// The snapshot moved forward.
    Incremental,
    /// Already current.
    Unchanged,
}

/// Result of syncing one repository
#[derive(Debug, Clone)]
pub struct SyncOutcome {
    pub repo: String,
    pub kind: SyncKind,
    pub plugins: usize,
}

impl fmt::Display for SyncOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let what = match self.kind {
            SyncKind::Full => "fetched",
            SyncKind::Incremental => "updated",
            SyncKind::Unchanged => "up to date",
        };
        write!(f, "{}: {} ({} plugins)", self.repo, what, self.plugins)
    }
}

/// A plugin found in a repository snapshot or the local catalog
#[derive(Debug, Clone)]
pub struct CatalogEntry {
    pub descriptor: PluginDescriptor,
    /// Repository name, or [`LOCAL_CATALOG`].
    pub origin: String,
}

/// One search result
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub descriptor: PluginDescriptor,
    pub origin: String,
    pub installed: bool,
}

/// Search results with per-repository failures kept apart
#[derive(Debug, Clone, Default)]
pub struct SearchResults {
    pub hits: Vec<SearchHit>,
    /// Repositories that could not be read, with the reason.
    pub unreachable: Vec<(String, String)>,
}

impl fmt::Display for SearchResults {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.hits.is_empty() {
            writeln!(f, "No plugins found")?;
        }
        for hit in &self.hits {
            let marker = if hit.installed { "*" } else { " " };
            writeln!(
                f,
                "{} {:<24} {:<10} {:<12} {}",
                marker, hit.descriptor.name, hit.descriptor.version, hit.origin, hit.descriptor.description
            )?;
        }
        for (repo, reason) in &self.unreachable {
            writeln!(f, "warning: repository {} skipped: {}", repo, reason)?;
        }
        Ok(())
    }
}

/// Local snapshots of remote catalogs
#[derive(Debug, Clone)]
pub struct RepositoryCache {
    root: PathBuf,
    catalog_dir: PathBuf,
    network: NetworkConfig,
    http: reqwest::Client,
}

impl RepositoryCache {
    pub fn new(root: impl Into<PathBuf>, catalog_dir: impl Into<PathBuf>, network: NetworkConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(network.connect_timeout())
            .timeout(network.request_timeout())
            .user_agent(format!("hangar/{}", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            root: root.into(),
            catalog_dir: catalog_dir.into(),
            network,
            http,
        })
    }

    /// Snapshot directory of a repository.
    pub fn snapshot_dir(&self, repo: &str) -> PathBuf {
        self.root.join(repo)
    }

    pub fn catalog_dir(&self) -> &Path {
        &self.catalog_dir
    }

    pub fn has_snapshot(&self, repo: &Repository) -> bool {
        let dir = self.snapshot_dir(&repo.name);
        match repo.kind {
            RepositoryKind::Git => dir.join(".git").is_dir(),
            RepositoryKind::Index => dir.join(INDEX_FILE).is_file(),
        }
    }

    /// `Sync(repoName)`: full fetch without a snapshot, incremental otherwise.
    ///
    /// Every failure is reported as [`PluginError::RepositoryUnreachable`].
    pub async fn sync(&self, repo: &Repository) -> Result<SyncOutcome> {
        let span = hangar_common_log::spans::repo_span(&repo.name);
        async {
            let kind = match repo.kind {
                RepositoryKind::Git => self.sync_git(repo).await,
                RepositoryKind::Index => self.sync_index(repo).await,
            }
            .map_err(|e| unreachable(repo, e))?;

            let plugins = self.list_plugins(repo).map(|p| p.len()).unwrap_or(0);
            info!(kind = ?kind, plugins, "repository synced");
            Ok(SyncOutcome {
                repo: repo.name.clone(),
                kind,
                plugins,
            })
        }
        .instrument(span)
        .await
    }

    async fn sync_git(&self, repo: &Repository) -> Result<SyncKind> {
        let dir = self.snapshot_dir(&repo.name);
        let url = repo.url.clone();
        let root = self.root.clone();

        if dir.join(".git").is_dir() {
            self.run_git(move || fast_forward(&dir)).await
        } else {
            self.run_git(move || clone_snapshot(&url, &root, &dir)).await
        }
    }

    /// Clone `url` into `dest` (a fresh directory).
    pub async fn clone(&self, url: &str, dest: &Path) -> Result<()> {
        let url = url.to_string();
        let dest = dest.to_path_buf();
        self.run_git(move || {
            git2::build::RepoBuilder::new().clone(&url, &dest)?;
            Ok(())
        })
        .await
    }

    // libgit2 is blocking; run it off the runtime and bound it.
    async fn run_git<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        let limit = self.network.connect_timeout() + self.network.request_timeout();
        match tokio::time::timeout(limit, tokio::task::spawn_blocking(f)).await {
            Ok(joined) => joined.map_err(|e| PluginError::Git(git2::Error::from_str(&e.to_string())))?,
            Err(_) => Err(PluginError::Git(git2::Error::from_str(&format!(
                "timed out after {}s",
                limit.as_secs()
            )))),
        }
    }

    async fn sync_index(&self, repo: &Repository) -> Result<SyncKind> {
        let dir = self.snapshot_dir(&repo.name);
        let index_path = dir.join(INDEX_FILE);
        let etag_path = dir.join(ETAG_FILE);
        let existed = index_path.is_file();
        let url = parse_location(&repo.url)?;

        let (text, etag) = if url.scheme() == "file" {
            let path = url
                .to_file_path()
                .map_err(|_| PluginError::Archive(format!("invalid file URL: {}", url)))?;
            (tokio::fs::read_to_string(&path).await?, None)
        } else {
            let mut request = self.http.get(url.clone());
            if existed {
                if let Ok(etag) = std::fs::read_to_string(&etag_path) {
                    request = request.header(IF_NONE_MATCH, etag.trim());
                }
            }
            let response = request.send().await?;
            if response.status() == StatusCode::NOT_MODIFIED {
                debug!("index not modified");
                return Ok(SyncKind::Unchanged);
            }
            let response = response.error_for_status()?;
            let etag = response
                .headers()
                .get(ETAG)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            (response.text().await?, etag)
        };

        // Reject a broken index before it replaces a good snapshot.
        IndexDocument::parse(&text)?;

        if existed {
            let previous = hangar_common_fs::read_to_string(&index_path, MAX_INDEX_BYTES)?;
            if previous == text {
                return Ok(SyncKind::Unchanged);
            }
        }

        hangar_common_fs::write_string_atomic(&index_path, &text)?;
        match etag {
            Some(etag) => hangar_common_fs::write_string_atomic(&etag_path, &etag)?,
            None => {
                let _ = std::fs::remove_file(&etag_path);
            }
        }

        Ok(if existed { SyncKind::Incremental } else { SyncKind::Full })
    }

    /// `ListPlugins(repoName)`: descriptors in the synced snapshot.
    pub fn list_plugins(&self, repo: &Repository) -> Result<Vec<PluginDescriptor>> {
        match repo.kind {
            RepositoryKind::Git => Ok(scan_plugin_dirs(&self.snapshot_dir(&repo.name))?),
            RepositoryKind::Index => Ok(self
                .read_index(repo)?
                .plugins
                .into_iter()
                .map(|e| e.descriptor)
                .collect()),
        }
    }

    /// Plugins in the local catalog directory.
    pub fn list_catalog(&self) -> Result<Vec<PluginDescriptor>> {
        scan_plugin_dirs(&self.catalog_dir)
    }

    /// The index document of a synced index repository.
    pub fn read_index(&self, repo: &Repository) -> Result<IndexDocument> {
        let path = self.snapshot_dir(&repo.name).join(INDEX_FILE);
        let text = hangar_common_fs::read_to_string(&path, MAX_INDEX_BYTES)?;
        IndexDocument::parse(&text)
    }

    /// Every listed plugin across `repos` (in order) and then the local
    /// catalog, collapsing duplicate names so the first source wins.
    ///
    /// Unreadable repositories are reported, not fatal.
    pub fn catalog(&self, repos: &[Repository]) -> (Vec<CatalogEntry>, Vec<(String, String)>) {
        let mut seen = HashSet::new();
        let mut entries = Vec::new();
        let mut unreachable = Vec::new();

        let mut push = |origin: &str, descriptors: Vec<PluginDescriptor>| {
            for descriptor in descriptors {
                if seen.insert(descriptor.name.clone()) {
                    entries.push(CatalogEntry {
                        descriptor,
                        origin: origin.to_string(),
                    });
                }
            }
        };

        for repo in repos.iter().filter(|r| r.enabled) {
            if !self.has_snapshot(repo) {
                unreachable.push((repo.name.clone(), "not synced".to_string()));
                continue;
            }
            match self.list_plugins(repo) {
                Ok(descriptors) => push(&repo.name, descriptors),
                Err(e) => {
                    warn!(repo = %repo.name, error = %e, "skipping unreadable repository");
                    unreachable.push((repo.name.clone(), e.to_string()));
                }
            }
        }

        match self.list_catalog() {
            Ok(descriptors) => push(LOCAL_CATALOG, descriptors),
            Err(e) => unreachable.push((LOCAL_CATALOG.to_string(), e.to_string())),
        }

        (entries, unreachable)
    }

    /// `Search(query)` over every synced repository plus the local catalog.
    pub fn search(&self, repos: &[Repository], query: &str, installed: &HashSet<String>) -> SearchResults {
        let (entries, unreachable) = self.catalog(repos);
        let mut hits: Vec<SearchHit> = entries
            .into_iter()
            .filter(|e| e.descriptor.matches(query))
            .map(|e| SearchHit {
                installed: installed.contains(&e.descriptor.name),
                descriptor: e.descriptor,
                origin: e.origin,
            })
            .collect();
        hits.sort_by(|a, b| a.descriptor.name.cmp(&b.descriptor.name));
        SearchResults { hits, unreachable }
    }

    /// Copy plugin `name` out of a synced repository into `dest`.
    ///
    /// Returns `false` when the repository does not carry the plugin.
    pub async fn fetch_plugin(&self, repo: &Repository, name: &str, dest: &Path) -> Result<bool> {
        match repo.kind {
            RepositoryKind::Git => {
                let Some(src) = find_plugin_dir(&self.snapshot_dir(&repo.name), name)? else {
                    return Ok(false);
                };
                hangar_common_fs::copy_dir_excluding(&src, dest, &[".git"])?;
                Ok(true)
            }
            RepositoryKind::Index => {
                let index = self.read_index(repo)?;
                let Some(entry) = index.plugins.into_iter().find(|e| e.descriptor.name == name) else {
                    return Ok(false);
                };
                let location = parse_location(&repo.url)?
                    .join(&entry.archive)
                    .map_err(|e| PluginError::Archive(format!("bad archive location '{}': {}", entry.archive, e)))?;
                let scratch = dest.with_extension("download");
                let archive = self.download(&location, &scratch).await?;
                let root = crate::archive::extract(&archive, dest)?;
                let _ = std::fs::remove_dir_all(&scratch);
                if root != dest {
                    hoist(&root, dest)?;
                }
                Ok(true)
            }
        }
    }

    /// Download `url` into directory `dir`, keeping the file name so the
    /// archive format can be detected. `file://` URLs are copied.
    pub async fn download(&self, url: &Url, dir: &Path) -> Result<PathBuf> {
        hangar_common_fs::ensure_dir(dir)?;
        let file_name = url
            .path_segments()
            .and_then(|s| s.last())
            .filter(|s| !s.is_empty())
            .unwrap_or("download");
        let target = dir.join(file_name);

        if url.scheme() == "file" {
            let path = url
                .to_file_path()
                .map_err(|_| PluginError::Archive(format!("invalid file URL: {}", url)))?;
            tokio::fs::copy(&path, &target).await?;
        } else {
            let bytes = self.http.get(url.clone()).send().await?.error_for_status()?.bytes().await?;
            tokio::fs::write(&target, &bytes).await?;
        }
        Ok(target)
    }
}

fn unreachable(repo: &Repository, err: PluginError) -> PluginError {
    match err {
        e @ PluginError::RepositoryUnreachable { .. } => e,
        e => PluginError::RepositoryUnreachable {
            repo: repo.name.clone(),
            reason: e.to_string(),
        },
    }
}

/// Parse a URL, accepting bare filesystem paths as `file://`.
pub fn parse_location(location: &str) -> Result<Url> {
    if let Ok(url) = Url::parse(location) {
        if url.scheme().len() > 1 {
            return Ok(url);
        }
    }
    let path = Path::new(location);
    let path = if path.is_absolute() {
        normalize(path)
    } else {
        normalize(std::env::current_dir()?.join(path))
    };
    Url::from_file_path(&path).map_err(|_| PluginError::Archive(format!("invalid location: {}", location)))
}

// Clone into a temporary sibling, then rename, so an interrupted clone never
// looks like a snapshot.
fn clone_snapshot(url: &str, root: &Path, dir: &Path) -> Result<SyncKind> {
    hangar_common_fs::ensure_dir(root)?;
    let scratch = tempfile::Builder::new().prefix(".clone-").tempdir_in(root)?;
    let checkout = scratch.path().join("repo");
    git2::build::RepoBuilder::new().clone(url, &checkout)?;
    hangar_common_fs::remove_dir_if_exists(dir)?;
    std::fs::rename(&checkout, dir)?;
    Ok(SyncKind::Full)
}

fn fast_forward(dir: &Path) -> Result<SyncKind> {
    let repo = git2::Repository::open(dir)?;
    let head = repo.head()?;
    let branch = head
        .shorthand()
        .ok_or_else(|| git2::Error::from_str("snapshot HEAD is not a branch"))?
        .to_string();
    let old = head.peel_to_commit()?.id();

    let mut remote = repo.find_remote("origin")?;
    let refspec = format!("+refs/heads/{0}:refs/remotes/origin/{0}", branch);
    remote.fetch(&[refspec.as_str()], None, None)?;

    let new = repo.refname_to_id(&format!("refs/remotes/origin/{}", branch))?;
    if new == old {
        return Ok(SyncKind::Unchanged);
    }
    if !repo.graph_descendant_of(new, old)? {
        warn!(branch = %branch, "upstream history rewritten, resetting snapshot");
    }

    // The snapshot is a read-only mirror, so a hard reset is a fast-forward.
    let target = repo.find_object(new, None)?;
    repo.reset(&target, git2::ResetType::Hard, None)?;
    Ok(SyncKind::Incremental)
}

/// Child directories of `dir`; nothing when `dir` does not exist yet.
pub(crate) fn child_dirs(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    Ok(hangar_common_fs::list_dirs(dir)?)
}

/// Plugin directories directly under `dir`, skipping broken ones.
fn scan_plugin_dirs(dir: &Path) -> Result<Vec<PluginDescriptor>> {
    let mut descriptors = Vec::new();
    for path in child_dirs(dir)? {
        if !path.join(DESCRIPTOR_FILE).is_file() {
            continue;
        }
        match PluginDescriptor::load(&path) {
            Ok(descriptor) => descriptors.push(descriptor),
            Err(e) => warn!(path = %path.display(), error = %e, "skipping invalid plugin"),
        }
    }
    Ok(descriptors)
}

/// The directory under `root` holding plugin `name`: `root/<name>` when
/// it exists, else any child whose descriptor declares that name.
pub fn find_plugin_dir(root: &Path, name: &str) -> Result<Option<PathBuf>> {
    let direct = root.join(name);
    if direct.join(DESCRIPTOR_FILE).is_file() {
        return Ok(Some(direct));
    }
    let by_name: BTreeMap<String, PathBuf> = child_dirs(root)?
        .into_iter()
        .filter_map(|dir| PluginDescriptor::load(&dir).ok().map(|d| (d.name, dir)))
        .collect();
    Ok(by_name.get(name).cloned())
}

/// Move the contents of `from` up into `to`, where `from` sits inside `to`.
fn hoist(from: &Path, to: &Path) -> Result<()> {
    let scratch = to.with_extension("hoist");
    std::fs::rename(from, &scratch)?;
    hangar_common_fs::remove_dir_if_exists(to)?;
    std::fs::rename(&scratch, to)?;
    Ok(())
}
