//! Lifecycle Manager
//!
//! [`PluginManager`] is the engine's single entry point. It owns every
//! component and orchestrates them per operation:
//!
//! ```text
//! install   -> resolve (stage) -> validate -> system deps -> pre-install
//!              -> install script -> publish -> registry -> post-install
//! enable    -> validate -> system deps -> plugin deps -> commands -> init
//! disable   -> cleanup (best effort) -> registry
//! uninstall -> pre-uninstall -> uninstall script -> unload if enabled
//!              -> registry -> remove dirs -> post-uninstall
//! ```
//!
//! Mutating operations hold the registry lock from start to finish.

mod lifecycle;
mod maintenance;
mod query;

use std::collections::HashMap;
use std::ffi::OsString;
use std::fmt;
use std::path::Path;
use tracing::{debug, warn};

use hangar_common_config::{ConfigLoader, HangarConfig, Layout};

use crate::deps::DependencyChecker;
use crate::descriptor::PluginDescriptor;
use crate::graph::DependencyGraph;
use crate::hooks::HookRunner;
use crate::module::{CommandTable, ModuleTable, PluginModule};
use crate::registry::{PluginState, RegistryDocument, RegistryStore};
use crate::repository::{Repository, RepositoryCache};
use crate::source::SourceResolver;
use crate::validator::StructureValidator;
use crate::Result;

pub use lifecycle::compare_versions;

/// Priority given to the well-known repositories when none is configured.
pub(crate) fn default_priority(name: &str, existing: usize) -> u32 {
    match name {
        "core" => 0,
        "community" => 10,
        _ => 100 + existing as u32,
    }
}

/// The plugin lifecycle and dependency-management engine
pub struct PluginManager {
    layout: Layout,
    config: HangarConfig,
    registry: RegistryStore,
    cache: RepositoryCache,
    resolver: SourceResolver,
    validator: StructureValidator,
    deps: DependencyChecker,
    hooks: HookRunner,
    modules: ModuleTable,
    commands: CommandTable,
    /// Modules initialized by this process, by plugin name.
    loaded: HashMap<String, Box<dyn PluginModule>>,
}

impl PluginManager {
    /// Load configuration through `loader` and open the engine.
    pub fn open(loader: &ConfigLoader) -> Result<Self> {
        let config = loader.load()?;
        let layout = loader.layout(&config);
        Self::new(config, layout)
    }

    /// Open the engine over an explicit layout.
    ///
    /// On first run the configured repositories are written to the registry.
    pub fn new(config: HangarConfig, layout: Layout) -> Result<Self> {
        hangar_common_fs::ensure_dir(&layout.home)?;

        let registry = RegistryStore::new(
            &layout.registry_file,
            &layout.lock_file,
            config.registry.lock_timeout(),
        );
        let cache = RepositoryCache::new(&layout.repo_cache_dir, &layout.catalog_dir, config.network.clone())?;
        let resolver = SourceResolver::new(&layout.staging_dir);
        let hooks = HookRunner::new(config.hooks.timeout());

        let manager = Self {
            layout,
            config,
            registry,
            cache,
            resolver,
            validator: StructureValidator::new(),
            deps: DependencyChecker::new(),
            hooks,
            modules: ModuleTable::new(),
            commands: CommandTable::new(),
            loaded: HashMap::new(),
        };
        manager.seed_repositories()?;
        Ok(manager)
    }

    /// Resolve system dependencies against `path` instead of `$PATH`.
    pub fn with_search_path(mut self, path: impl Into<OsString>) -> Self {
        self.deps = DependencyChecker::with_search_path(path);
        self
    }

    /// Provide a native module for plugin `name`.
    pub fn register_module<F>(&mut self, name: &str, factory: F)
    where
        F: Fn() -> Box<dyn PluginModule> + Send + Sync + 'static,
    {
        self.modules.register(name, factory);
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn config(&self) -> &HangarConfig {
        &self.config
    }

    pub fn registry(&self) -> &RegistryStore {
        &self.registry
    }

    pub fn repository_cache(&self) -> &RepositoryCache {
        &self.cache
    }

    /// Commands of the plugins enabled in this process.
    pub fn commands(&self) -> &CommandTable {
        &self.commands
    }

    /// Whether this process has initialized plugin `name`.
    pub fn is_loaded(&self, name: &str) -> bool {
        self.loaded.contains_key(name)
    }

    fn seed_repositories(&self) -> Result<()> {
        if self.registry.exists() {
            return Ok(());
        }
        let seeds = &self.config.repositories;
        self.registry.modify(|doc| {
            for seed in seeds {
                let mut repo = Repository::new(&seed.name, &seed.url, seed.kind);
                repo.enabled = seed.enabled;
                repo.priority = seed
                    .priority
                    .unwrap_or_else(|| default_priority(&seed.name, doc.repositories.len()));
                doc.repositories.insert(seed.name.clone(), repo);
            }
            Ok(())
        })?;
        debug!(count = seeds.len(), "seeded repositories");
        Ok(())
    }

    /// Descriptors of every installed plugin whose directory parses.
    fn installed_descriptors(&self, doc: &RegistryDocument) -> HashMap<String, PluginDescriptor> {
        doc.plugins
            .keys()
            .filter_map(|name| match PluginDescriptor::load(&self.layout.plugin_dir(name)) {
                Ok(d) => Some((name.clone(), d)),
                Err(e) => {
                    debug!(plugin = %name, error = %e, "descriptor unreadable");
                    None
                }
            })
            .collect()
    }

    fn installed_graph(&self, doc: &RegistryDocument) -> (DependencyGraph, HashMap<String, PluginDescriptor>) {
        let descriptors = self.installed_descriptors(doc);
        let graph = DependencyGraph::from_descriptors(descriptors.values());
        (graph, descriptors)
    }

    /// Enabled plugins that declare `name` as a dependency.
    fn enabled_dependents(&self, name: &str) -> Result<Vec<String>> {
        let doc = self.registry.load()?;
        let (graph, _) = self.installed_graph(&doc);
        Ok(graph
            .dependents_of(name)
            .into_iter()
            .filter(|d| doc.state_of(d) == Some(PluginState::Enabled))
            .collect())
    }

    /// Move `dir` into a fresh trash directory under staging; the trash is
    /// deleted when the returned handle drops.
    fn move_to_trash(&self, dir: &Path, name: &str) -> Result<(tempfile::TempDir, std::path::PathBuf)> {
        hangar_common_fs::ensure_dir(&self.layout.staging_dir)?;
        let trash = tempfile::Builder::new()
            .prefix(&format!(".trash-{}-", name))
            .tempdir_in(&self.layout.staging_dir)?;
        let moved = trash.path().join(name);
        if dir.exists() {
            std::fs::rename(dir, &moved)?;
        }
        Ok((trash, moved))
    }

    fn restore_from_trash(&self, moved: &Path, dir: &Path) {
        if moved.exists() {
            if let Err(e) = std::fs::rename(moved, dir) {
                warn!(dir = %dir.display(), error = %e, "could not restore previous plugin directory");
            }
        }
    }
}

impl fmt::Debug for PluginManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut loaded: Vec<&String> = self.loaded.keys().collect();
        loaded.sort();
        f.debug_struct("PluginManager")
            .field("home", &self.layout.home)
            .field("modules", &self.modules)
            .field("commands", &self.commands.len())
            .field("loaded", &loaded)
            .finish()
    }
}
