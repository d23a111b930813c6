//! Templates, integrity checks and repository management.

use std::collections::BTreeSet;
use std::path::Path;
use tracing::{info, warn};

use hangar_common_config::RepositoryKind;
use hangar_common_core::Timestamp;
use hangar_common_fs::path::is_single_component;
use hangar_common_log::spans::plugin_span;

use super::{default_priority, PluginManager};
use crate::descriptor::PluginKind;
use crate::registry::PluginState;
use crate::report::{CleanReport, SyncReport, TemplateReport, VerifyReport};
use crate::repository::{child_dirs, Repository, SyncOutcome};
use crate::template::{ScaffoldContext, TemplateEngine};
use crate::{PluginError, Result};

impl PluginManager {
    /// `CreateTemplate(name, type)` in the local catalog.
    pub fn create_template(&self, name: &str, kind: PluginKind) -> Result<TemplateReport> {
        self.create_template_in(name, kind, &self.layout.catalog_dir)
    }

    /// Scaffold plugin `name` under `parent`.
    pub fn create_template_in(&self, name: &str, kind: PluginKind, parent: &Path) -> Result<TemplateReport> {
        let _span = plugin_span(name, "create-template").entered();
        if !is_single_component(name) {
            return Err(PluginError::invalid("name", format!("'{}' is not a valid plugin name", name)));
        }

        let path = parent.join(name);
        let engine = TemplateEngine::new()?;
        let files = engine.scaffold(&path, &ScaffoldContext::new(name, kind))?;
        self.validator.validate(&path)?;

        info!(path = %path.display(), "template created");
        Ok(TemplateReport {
            name: name.to_string(),
            path,
            files,
        })
    }

    /// Check that every registered plugin has its directory and every
    /// plugin directory is registered. Registered plugins whose directory
    /// is gone are moved to `Error`.
    pub fn verify(&self) -> Result<VerifyReport> {
        let _guard = self.registry.lock()?;
        let mut report = self.scan()?;

        if !report.missing.is_empty() {
            let missing = report.missing.clone();
            self.registry.modify(|doc| {
                for name in &missing {
                    if let Some(entry) = doc.plugins.get_mut(name) {
                        entry.state = PluginState::Error;
                    }
                }
                Ok(())
            })?;
            for name in &report.missing {
                warn!(plugin = %name, "plugin directory missing");
            }
        }

        report.checked = self.registry.load()?.plugins.len();
        Ok(report)
    }

    /// Remove orphaned plugin directories and stale staging leftovers.
    pub fn clean_orphans(&self) -> Result<CleanReport> {
        let _guard = self.registry.lock()?;
        let scan = self.scan()?;

        let mut report = CleanReport::default();
        for path in scan.orphans.into_iter().chain(scan.stale_staging) {
            hangar_common_fs::remove_dir_if_exists(&path)?;
            info!(path = %path.display(), "removed leftover directory");
            report.removed.push(path);
        }
        Ok(report)
    }

    fn scan(&self) -> Result<VerifyReport> {
        let doc = self.registry.load()?;
        let mut report = VerifyReport {
            checked: doc.plugins.len(),
            ..VerifyReport::default()
        };

        for name in doc.plugins.keys() {
            if !self.layout.plugin_dir(name).is_dir() {
                report.missing.push(name.clone());
            }
        }

        let registered: BTreeSet<&str> = doc.plugins.keys().map(String::as_str).collect();
        for dir in child_dirs(&self.layout.plugins_dir)? {
            if dir == self.layout.staging_dir {
                continue;
            }
            let name = dir.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
            if !registered.contains(name.as_str()) {
                report.orphans.push(dir);
            }
        }
        report.stale_staging = child_dirs(&self.layout.staging_dir)?;
        Ok(report)
    }

    /// Configured repositories in search order.
    pub fn list_repositories(&self) -> Result<Vec<Repository>> {
        self.registry.repositories()
    }

    /// Add a repository. Without a priority, `core` and `community` get
    /// their usual slots and others are searched after, in insertion order.
    pub fn add_repository(
        &self,
        name: &str,
        url: &str,
        kind: RepositoryKind,
        priority: Option<u32>,
    ) -> Result<Repository> {
        if !is_single_component(name) {
            return Err(PluginError::invalid(
                "repository",
                format!("'{}' is not a valid repository name", name),
            ));
        }
        self.registry.modify(|doc| {
            if doc.repositories.contains_key(name) {
                return Err(PluginError::RepositoryExists(name.to_string()));
            }
            let mut repo = Repository::new(name, url, kind);
            repo.priority = priority.unwrap_or_else(|| default_priority(name, doc.repositories.len()));
            doc.repositories.insert(name.to_string(), repo.clone());
            Ok(repo)
        })
    }

    /// Remove a repository and its local snapshot.
    pub fn remove_repository(&self, name: &str) -> Result<Repository> {
        let repo = self.registry.modify(|doc| {
            doc.repositories
                .remove(name)
                .ok_or_else(|| PluginError::UnknownRepository(name.to_string()))
        })?;
        hangar_common_fs::remove_dir_if_exists(self.cache.snapshot_dir(name))?;
        Ok(repo)
    }

    pub fn set_repository_enabled(&self, name: &str, enabled: bool) -> Result<Repository> {
        self.registry.modify(|doc| {
            let repo = doc
                .repositories
                .get_mut(name)
                .ok_or_else(|| PluginError::UnknownRepository(name.to_string()))?;
            repo.enabled = enabled;
            Ok(repo.clone())
        })
    }

    /// `Sync(repoName)`, recording the sync time.
    pub async fn sync_repository(&self, name: &str) -> Result<SyncOutcome> {
        let repo = self
            .registry
            .load()?
            .repositories
            .remove(name)
            .ok_or_else(|| PluginError::UnknownRepository(name.to_string()))?;

        let outcome = self.cache.sync(&repo).await?;
        self.registry.modify(|doc| {
            if let Some(repo) = doc.repositories.get_mut(name) {
                repo.last_sync = Some(Timestamp::now());
            }
            Ok(())
        })?;
        Ok(outcome)
    }

    /// Sync every enabled repository; one failure does not stop the rest.
    pub async fn sync_all(&self) -> Result<SyncReport> {
        let mut report = SyncReport::default();
        for repo in self.registry.repositories()?.into_iter().filter(|r| r.enabled) {
            match self.sync_repository(&repo.name).await {
                Ok(outcome) => report.synced.push(outcome),
                Err(e) => {
                    warn!(repo = %repo.name, error = %e, "sync failed");
                    report.failed.push((repo.name.clone(), e.to_string()));
                }
            }
        }
        Ok(report)
    }
}
