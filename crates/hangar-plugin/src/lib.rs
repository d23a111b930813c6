//! Plugin Engine for Hangar
//!
//! This crate installs, validates, enables, disables, updates and removes
//! plugins, tracking each plugin's lifecycle state in a persistent registry:
//! - **Registry**: `registry.yaml`, written atomically under a file lock
//! - **Repositories**: git or YAML-index catalogs synced to a local cache
//! - **Sources**: explicit URL, directory or archive, repository lookup,
//!   or the local catalog, always staged before publishing
//! - **Dependencies**: system binaries, enabled plugin dependencies, and a
//!   dependency graph for multi-plugin operations
//! - **Hooks**: `pre-`/`post-` install and uninstall scripts
//!
//! ## Plugin Layout
//!
//! ```text
//! $HANGAR_HOME/plugins/git-extras/
//! ├── plugin.yaml          # descriptor
//! ├── install              # optional lifecycle scripts
//! ├── bin/git-extras       # command entrypoint
//! ├── init.sh              # optional init/cleanup entrypoints
//! └── hooks/
//!     ├── pre-install
//!     └── post-uninstall
//! ```
//!
//! [`PluginManager`] is the entry point for every operation.

pub mod archive;
pub mod deps;
pub mod descriptor;
pub mod error;
pub mod graph;
pub mod hooks;
pub mod manager;
pub mod module;
pub mod registry;
pub mod report;
pub mod repository;
pub mod source;
pub mod template;
pub mod validator;

pub use deps::DependencyChecker;
pub use descriptor::{CommandSpec, Entrypoints, Platform, PluginDescriptor, PluginKind, DESCRIPTOR_FILE};
pub use error::{PluginError, Result};
pub use graph::DependencyGraph;
pub use hooks::{HookOutcome, HookPhase, HookRunner};
pub use manager::PluginManager;
pub use module::{CommandBinding, CommandTable, ModuleContext, ModuleTable, PluginModule, ScriptModule};
pub use registry::{PluginSource, PluginState, RegistryDocument, RegistryEntry, RegistryStore};
pub use report::{
    CleanReport, InstallReport, ListFilter, ListItem, ListReport, LoadReport, PluginInfo, StateChange,
    SyncReport, TemplateReport, UninstallReport, UpdateOutcome, UpdateReport, VerifyReport,
};
pub use repository::{Repository, RepositoryCache, SearchHit, SearchResults, SyncKind, SyncOutcome};
pub use source::{InstallationSource, SourceResolver, StagedPlugin};
pub use template::{ScaffoldContext, TemplateEngine};
pub use validator::StructureValidator;
