//! Read-only operations: list, search, info.

use std::collections::HashSet;
use tracing::warn;

use hangar_common_fs::path::safe_join;

use super::PluginManager;
use crate::descriptor::PluginDescriptor;
use crate::registry::PluginState;
use crate::report::{ListFilter, ListItem, ListReport, PluginInfo};
use crate::repository::SearchResults;
use crate::{PluginError, Result};

impl PluginManager {
    /// `List(filter)`
    pub fn list(&self, filter: ListFilter) -> Result<ListReport> {
        let doc = self.registry.load()?;
        let mut items = Vec::new();

        let wants_installed = !matches!(filter, ListFilter::Available);
        if wants_installed {
            for entry in doc.list(None) {
                let keep = match filter {
                    ListFilter::All | ListFilter::Installed => true,
                    ListFilter::Enabled => entry.state == PluginState::Enabled,
                    ListFilter::Disabled => entry.state == PluginState::Disabled,
                    ListFilter::Error => entry.state == PluginState::Error,
                    ListFilter::Available => false,
                };
                if !keep {
                    continue;
                }
                let description = PluginDescriptor::load(&self.layout.plugin_dir(&entry.name))
                    .ok()
                    .map(|d| d.description);
                items.push(ListItem {
                    name: entry.name,
                    version: entry.version,
                    state: entry.state,
                    description,
                    origin: None,
                });
            }
        }

        if matches!(filter, ListFilter::All | ListFilter::Available) {
            let (available, unreachable) = self.cache.catalog(&doc.repositories_by_priority());
            for (repo, reason) in unreachable {
                warn!(repo = %repo, %reason, "repository not listed");
            }
            for entry in available {
                if doc.plugins.contains_key(&entry.descriptor.name) {
                    continue;
                }
                items.push(ListItem {
                    name: entry.descriptor.name,
                    version: entry.descriptor.version,
                    state: PluginState::Available,
                    description: Some(entry.descriptor.description),
                    origin: Some(entry.origin),
                });
            }
        }

        items.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(ListReport { filter, items })
    }

    /// `Search(query)` over synced repositories and the local catalog.
    ///
    /// Repositories that cannot be read are reported in the result rather
    /// than failing the search.
    pub fn search(&self, query: &str) -> Result<SearchResults> {
        let doc = self.registry.load()?;
        let installed: HashSet<String> = doc.plugins.keys().cloned().collect();
        let results = self
            .cache
            .search(&doc.repositories_by_priority(), query, &installed);
        for (repo, reason) in &results.unreachable {
            warn!(repo = %repo, %reason, "repository skipped in search");
        }
        Ok(results)
    }

    /// `Info(name)` for an installed or available plugin.
    pub fn info(&self, name: &str) -> Result<PluginInfo> {
        let doc = self.registry.load()?;
        let entry = doc.get(name).cloned();

        let (descriptor, origin, path) = match &entry {
            Some(_) => {
                let dir = self.layout.plugin_dir(name);
                (PluginDescriptor::load(&dir)?, None, Some(dir))
            }
            None => {
                let (available, _) = self.cache.catalog(&doc.repositories_by_priority());
                let found = available
                    .into_iter()
                    .find(|e| e.descriptor.name == name)
                    .ok_or_else(|| PluginError::NotInstalled(name.to_string()))?;
                (found.descriptor, Some(found.origin), None)
            }
        };

        let readme = path.as_ref().and_then(|dir| {
            let declared = descriptor.readme.as_deref().and_then(|r| safe_join(dir, r));
            declared
                .into_iter()
                .chain(["README.md", "README"].into_iter().map(|r| dir.join(r)))
                .find(|p| p.is_file())
        });
        let data_dir = Some(self.layout.plugin_data_dir(name)).filter(|d| d.is_dir());

        let (mut graph, _) = self.installed_graph(&doc);
        if !graph.contains(name) {
            graph.add(name, descriptor.plugin_dependencies.iter().map(String::as_str));
        }
        let transitive_dependencies = graph.transitive_dependencies(name).unwrap_or_else(|e| {
            warn!(plugin = %name, error = %e, "dependency graph unusable");
            Vec::new()
        });

        Ok(PluginInfo {
            missing_system: self.deps.check_system(&descriptor),
            unsatisfied_plugins: self.deps.check_plugin_deps_in(&descriptor, &doc),
            required_by: graph.dependents_of(name),
            transitive_dependencies,
            descriptor,
            entry,
            origin,
            path,
            data_dir,
            readme,
        })
    }
}
