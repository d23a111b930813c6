//! Dependency Checker
//!
//! Both checks look only at the entries declared on one descriptor. Ordering
//! across several plugins is the job of [`crate::graph::DependencyGraph`].

use std::ffi::OsString;
use std::path::PathBuf;
use tracing::debug;

use crate::descriptor::PluginDescriptor;
use crate::registry::{PluginState, RegistryDocument, RegistryStore};
use crate::Result;

/// Resolves system binaries and plugin dependencies
#[derive(Debug, Clone, Default)]
pub struct DependencyChecker {
    /// Overrides `$PATH` when set.
    search_path: Option<OsString>,
}

impl DependencyChecker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve binaries against `path` (a `PATH`-style list) instead of the
    /// process environment.
    pub fn with_search_path(path: impl Into<OsString>) -> Self {
        Self {
            search_path: Some(path.into()),
        }
    }

    /// Whether `binary` resolves to an executable.
    pub fn resolve(&self, binary: &str) -> Option<PathBuf> {
        let found = match &self.search_path {
            Some(path) => {
                let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
                which::which_in(binary, Some(path), cwd)
            }
            None => which::which(binary),
        };
        found.ok()
    }

    /// `CheckSystem(descriptor)`: declared binaries that do not resolve.
    pub fn check_system(&self, descriptor: &PluginDescriptor) -> Vec<String> {
        let missing: Vec<String> = descriptor
            .system_dependencies
            .iter()
            .filter(|binary| self.resolve(binary).is_none())
            .cloned()
            .collect();
        if !missing.is_empty() {
            debug!(plugin = %descriptor.name, ?missing, "system dependencies missing");
        }
        missing
    }

    /// `CheckPluginDeps(descriptor)`: declared plugins not currently enabled.
    pub fn check_plugin_deps(&self, descriptor: &PluginDescriptor, registry: &RegistryStore) -> Result<Vec<String>> {
        Ok(self.check_plugin_deps_in(descriptor, &registry.load()?))
    }

    /// [`Self::check_plugin_deps`] against an already loaded document.
    pub fn check_plugin_deps_in(&self, descriptor: &PluginDescriptor, doc: &RegistryDocument) -> Vec<String> {
        descriptor
            .plugin_dependencies
            .iter()
            .filter(|dep| doc.state_of(dep) != Some(PluginState::Enabled))
            .cloned()
            .collect()
    }
}
