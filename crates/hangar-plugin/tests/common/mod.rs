//! Shared setup for the engine's integration tests.
#![allow(dead_code)]

use std::path::{Path, PathBuf};

use hangar_common_config::{HangarConfig, Layout, PathsConfig, RepositoryConfig, RepositoryKind};
use hangar_plugin::{InstallReport, InstallationSource, PluginManager, PluginState};
use hangar_test_utils::{fake_binary, git_init_commit, PluginFixture};
use tempfile::TempDir;

/// An engine over a throwaway home, with its own `bin/` as the search path
/// for system dependencies.
pub struct Harness {
    pub root: TempDir,
    pub bin: PathBuf,
    pub sources: PathBuf,
    pub manager: PluginManager,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_repositories(Vec::new())
    }

    pub fn with_repositories(repositories: Vec<RepositoryConfig>) -> Self {
        let root = tempfile::tempdir().expect("Failed to create temp dir");
        let bin = root.path().join("bin");
        let sources = root.path().join("src");
        std::fs::create_dir_all(&bin).expect("Failed to create bin dir");
        std::fs::create_dir_all(&sources).expect("Failed to create source dir");

        let mut config = HangarConfig::default();
        config.repositories = repositories;
        config.hooks.timeout_secs = 10;
        config.registry.lock_timeout_secs = 2;
        let layout = PathsConfig::default().resolve(root.path().join("home"));

        let manager = PluginManager::new(config, layout)
            .expect("Failed to open engine")
            .with_search_path(bin.clone());

        Self {
            root,
            bin,
            sources,
            manager,
        }
    }

    pub fn layout(&self) -> &Layout {
        self.manager.layout()
    }

    /// Put an executable named `name` on the search path.
    pub fn provide_binary(&self, name: &str) -> PathBuf {
        fake_binary(&self.bin, name)
    }

    /// Write `fixture` under the source area, returning its directory.
    pub fn source(&self, fixture: &PluginFixture) -> PathBuf {
        fixture.write_under(&self.sources)
    }

    /// Install `fixture` from a local directory.
    pub async fn install_fixture(&mut self, fixture: &PluginFixture) -> InstallReport {
        let dir = self.source(fixture);
        self.manager
            .install(fixture.name(), Some(InstallationSource::ExplicitPath(dir)), false)
            .await
            .expect("install failed")
    }

    pub fn state_of(&self, name: &str) -> Option<PluginState> {
        self.manager
            .registry()
            .get(name)
            .expect("registry unreadable")
            .map(|e| e.state)
    }
}

/// A git repository at `dir` carrying `fixtures`, one plugin per directory.
pub fn git_catalog(dir: &Path, fixtures: &[PluginFixture]) -> git2::Repository {
    std::fs::create_dir_all(dir).expect("Failed to create repo dir");
    std::fs::write(dir.join("README.md"), "# plugins\n").expect("Failed to write readme");
    for fixture in fixtures {
        fixture.write_under(dir);
    }
    git_init_commit(dir, "initial catalog")
}

pub fn git_repository(name: &str, dir: &Path, priority: u32) -> RepositoryConfig {
    RepositoryConfig {
        name: name.to_string(),
        url: dir.display().to_string(),
        kind: RepositoryKind::Git,
        enabled: true,
        priority: Some(priority),
    }
}
