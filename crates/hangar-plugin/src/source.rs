//! Source Resolver
//!
//! Decides where a plugin's files come from and materializes them into a
//! private staging directory under `plugins/.staging`. Nothing reaches the
//! final plugin directory until [`StagedPlugin::publish`] renames it there.

use std::fmt;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info, warn};

use hangar_common_fs::path::normalize;

use crate::archive::{self, ArchiveFormat};
use crate::descriptor::DESCRIPTOR_FILE;
use crate::registry::PluginSource;
use crate::repository::{find_plugin_dir, parse_location, Repository, RepositoryCache, LOCAL_CATALOG};
use crate::{PluginError, Result};

/// Where to install a plugin from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallationSource {
    /// A remote location: a git URL or an archive URL.
    ExplicitUrl(String),
    /// A plugin directory on the local filesystem.
    ExplicitPath(PathBuf),
    /// A packaged archive on the local filesystem.
    ExplicitArchive(PathBuf),
    /// Search configured repositories by priority, then the local catalog.
    RepositoryLookup,
    /// Only the local catalog.
    LocalCatalog,
}

impl InstallationSource {
    /// Classify an explicit source by its shape.
    pub fn parse(source: &str) -> Self {
        let source = source.trim();
        if source.contains("://") || source.starts_with("git@") {
            return Self::ExplicitUrl(source.to_string());
        }
        let path = PathBuf::from(source);
        if ArchiveFormat::detect(source).is_some() && !path.is_dir() {
            Self::ExplicitArchive(path)
        } else {
            Self::ExplicitPath(path)
        }
    }

    /// The source to re-resolve from for a recorded origin.
    pub fn from_recorded(source: Option<&PluginSource>) -> Self {
        match source {
            None | Some(PluginSource::Repository { .. }) => Self::RepositoryLookup,
            Some(PluginSource::Catalog) => Self::LocalCatalog,
            Some(PluginSource::Git { url }) => Self::ExplicitUrl(url.clone()),
            Some(PluginSource::Path { path }) => Self::ExplicitPath(path.clone()),
            Some(PluginSource::Archive { location }) => Self::parse(location),
        }
    }
}

impl fmt::Display for InstallationSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ExplicitUrl(url) => write!(f, "{}", url),
            Self::ExplicitPath(path) | Self::ExplicitArchive(path) => write!(f, "{}", path.display()),
            Self::RepositoryLookup => write!(f, "repositories"),
            Self::LocalCatalog => write!(f, "local catalog"),
        }
    }
}

/// A materialized plugin waiting to be validated and published.
///
/// Dropping it removes everything that was staged.
#[derive(Debug)]
pub struct StagedPlugin {
    workspace: TempDir,
    root: PathBuf,
    pub source: PluginSource,
    /// Repositories that failed along the way.
    pub warnings: Vec<String>,
}

impl StagedPlugin {
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Move the staged plugin to `dest`, which must not exist.
    pub fn publish(self, dest: &Path) -> Result<()> {
        if let Some(parent) = dest.parent() {
            hangar_common_fs::ensure_dir(parent)?;
        }
        std::fs::rename(&self.root, dest)?;
        debug!(dest = %dest.display(), "published {}", self.workspace.path().display());
        Ok(())
    }
}

/// Resolves installation sources into staged plugin directories
#[derive(Debug, Clone)]
pub struct SourceResolver {
    staging_dir: PathBuf,
}

impl SourceResolver {
    pub fn new(staging_dir: impl Into<PathBuf>) -> Self {
        Self {
            staging_dir: staging_dir.into(),
        }
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    /// Materialize plugin `name` from `source` into a fresh staging area.
    ///
    /// With `refresh`, repositories are synced before lookup; otherwise
    /// only repositories without a snapshot are.
    pub async fn stage(
        &self,
        cache: &RepositoryCache,
        name: &str,
        source: &InstallationSource,
        repos: &[Repository],
        refresh: bool,
    ) -> Result<StagedPlugin> {
        hangar_common_fs::ensure_dir(&self.staging_dir)?;
        let workspace = tempfile::Builder::new()
            .prefix(&format!("{}-", name))
            .tempdir_in(&self.staging_dir)?;
        let target = workspace.path().join("plugin");
        let unresolvable = |tried: String| PluginError::SourceUnresolvable {
            name: name.to_string(),
            tried: vec![tried],
        };

        let mut warnings = Vec::new();
        let (root, origin) = match source {
            InstallationSource::ExplicitPath(path) => {
                if !path.is_dir() {
                    return Err(unresolvable(format!("{} (no such directory)", path.display())));
                }
                let path = absolute(path)?;
                hangar_common_fs::copy_dir_excluding(&path, &target, &[".git"])?;
                (target, PluginSource::Path { path })
            }
            InstallationSource::ExplicitArchive(path) => {
                if !path.is_file() {
                    return Err(unresolvable(format!("{} (no such file)", path.display())));
                }
                let path = absolute(path)?;
                let root = archive::extract(&path, &target)?;
                let location = path.display().to_string();
                (root, PluginSource::Archive { location })
            }
            InstallationSource::ExplicitUrl(url) => {
                let root = self
                    .fetch_url(cache, name, url, workspace.path())
                    .await
                    .map_err(|e| unresolvable(format!("{} ({})", url, e)))?;
                let origin = if is_archive_url(url) {
                    PluginSource::Archive { location: url.clone() }
                } else {
                    PluginSource::Git { url: url.clone() }
                };
                (root, origin)
            }
            InstallationSource::RepositoryLookup => {
                let mut tried = Vec::new();
                let mut ordered: Vec<&Repository> = repos.iter().filter(|r| r.enabled).collect();
                ordered.sort_by_key(|r| r.priority);

                for repo in ordered {
                    match self
                        .fetch_from_repository(cache, repo, name, &target, refresh)
                        .await
                    {
                        Ok(true) => {
                            info!(plugin = %name, repo = %repo.name, "resolved from repository");
                            return Ok(StagedPlugin {
                                workspace,
                                root: target,
                                source: PluginSource::Repository {
                                    name: repo.name.clone(),
                                },
                                warnings,
                            });
                        }
                        Ok(false) => tried.push(repo.name.clone()),
                        Err(e) => {
                            warn!(repo = %repo.name, error = %e, "repository skipped");
                            warnings.push(e.to_string());
                            tried.push(format!("{} (unreachable)", repo.name));
                            let _ = hangar_common_fs::remove_dir_if_exists(&target);
                        }
                    }
                }

                if !self.fetch_from_catalog(cache, name, &target)? {
                    tried.push(LOCAL_CATALOG.to_string());
                    return Err(PluginError::SourceUnresolvable {
                        name: name.to_string(),
                        tried,
                    });
                }
                (target, PluginSource::Catalog)
            }
            InstallationSource::LocalCatalog => {
                if !self.fetch_from_catalog(cache, name, &target)? {
                    return Err(unresolvable(LOCAL_CATALOG.to_string()));
                }
                (target, PluginSource::Catalog)
            }
        };

        Ok(StagedPlugin {
            workspace,
            root,
            source: origin,
            warnings,
        })
    }

    async fn fetch_from_repository(
        &self,
        cache: &RepositoryCache,
        repo: &Repository,
        name: &str,
        target: &Path,
        refresh: bool,
    ) -> Result<bool> {
        if refresh || !cache.has_snapshot(repo) {
            cache.sync(repo).await?;
        }
        cache
            .fetch_plugin(repo, name, target)
            .await
            .map_err(|e| PluginError::RepositoryUnreachable {
                repo: repo.name.clone(),
                reason: e.to_string(),
            })
    }

    fn fetch_from_catalog(&self, cache: &RepositoryCache, name: &str, target: &Path) -> Result<bool> {
        let catalog = cache.catalog_dir();
        if !catalog.is_dir() {
            return Ok(false);
        }
        match find_plugin_dir(catalog, name)? {
            Some(src) => {
                hangar_common_fs::copy_dir_excluding(&src, target, &[".git"])?;
                info!(plugin = %name, "resolved from local catalog");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn fetch_url(&self, cache: &RepositoryCache, name: &str, url: &str, workspace: &Path) -> Result<PathBuf> {
        if is_archive_url(url) {
            let location = parse_location(url)?;
            let archive = cache.download(&location, &workspace.join("download")).await?;
            return archive::extract(&archive, &workspace.join("plugin"));
        }

        let checkout = workspace.join("plugin");
        cache.clone(url, &checkout).await?;

        // A multi-plugin repository keeps each plugin in its own folder.
        let nested = checkout.join(name);
        if !checkout.join(DESCRIPTOR_FILE).is_file() && nested.join(DESCRIPTOR_FILE).is_file() {
            return Ok(nested);
        }
        hangar_common_fs::remove_dir_if_exists(checkout.join(".git"))?;
        Ok(checkout)
    }
}

fn is_archive_url(url: &str) -> bool {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    ArchiveFormat::detect(path).is_some()
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(normalize(path))
    } else {
        Ok(normalize(std::env::current_dir()?.join(path)))
    }
}
