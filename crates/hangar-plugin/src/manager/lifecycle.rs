//! State transitions: install, enable, disable, uninstall, update.

use std::cmp::Ordering;
use tracing::{info, warn, Instrument};

use hangar_common_core::Timestamp;
use hangar_common_fs::path::is_single_component;
use hangar_common_log::spans::plugin_span;

use super::PluginManager;
use crate::descriptor::PluginDescriptor;
use crate::hooks::{HookOutcome, HookPhase, ScriptContext};
use crate::module::{ModuleContext, PluginModule};
use crate::registry::{PluginState, RegistryEntry};
use crate::report::{InstallReport, LoadReport, StateChange, UninstallReport, UpdateOutcome, UpdateReport};
use crate::source::InstallationSource;
use crate::{PluginError, Result};

/// Order two version strings: semver when both parse (a leading `v` is
/// ignored), plain string order otherwise.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let parse = |v: &str| semver::Version::parse(v.trim().trim_start_matches('v')).ok();
    match (parse(a), parse(b)) {
        (Some(a), Some(b)) => a.cmp(&b),
        _ => a.trim().cmp(b.trim()),
    }
}

fn check_name(name: &str) -> Result<()> {
    if is_single_component(name) {
        Ok(())
    } else {
        Err(PluginError::invalid("name", format!("'{}' is not a valid plugin name", name)))
    }
}

fn check_staged(descriptor: &PluginDescriptor, name: &str) -> Result<()> {
    if descriptor.name != name {
        return Err(PluginError::invalid(
            "name",
            format!("descriptor declares '{}', expected '{}'", descriptor.name, name),
        ));
    }
    if !descriptor.supports_host() {
        return Err(PluginError::invalid(
            "platforms",
            format!("not supported on {}", std::env::consts::OS),
        ));
    }
    Ok(())
}

fn as_init_failure(name: &str, err: PluginError) -> PluginError {
    match err {
        e @ PluginError::EntrypointFailed { .. } => e,
        e => PluginError::EntrypointFailed {
            name: name.to_string(),
            entrypoint: "init".to_string(),
            reason: e.to_string(),
        },
    }
}

impl PluginManager {
    /// `Install(name, source?, force?)`
    ///
    /// Without a source the plugin is looked up in the repositories by
    /// priority and then in the local catalog. With `force` an existing
    /// installation is replaced and comes back as `Installed`.
    pub async fn install(
        &mut self,
        name: &str,
        source: Option<InstallationSource>,
        force: bool,
    ) -> Result<InstallReport> {
        let span = plugin_span(name, "install");
        self.install_inner(name, source, force).instrument(span).await
    }

    async fn install_inner(
        &mut self,
        name: &str,
        source: Option<InstallationSource>,
        force: bool,
    ) -> Result<InstallReport> {
        check_name(name)?;
        let _guard = self.registry.lock_async().await?;

        let existing = self.registry.get(name)?;
        if existing.is_some() && !force {
            return Err(PluginError::AlreadyInstalled(name.to_string()));
        }

        let source = source.unwrap_or(InstallationSource::RepositoryLookup);
        let repos = self.registry.repositories()?;
        let staged = self
            .resolver
            .stage(&self.cache, name, &source, &repos, false)
            .await?;

        let descriptor = self.validator.validate(staged.root())?;
        check_staged(&descriptor, name)?;

        let missing = self.deps.check_system(&descriptor);
        if !missing.is_empty() {
            return Err(PluginError::SystemDependencyMissing(missing));
        }

        let data_dir = self.layout.plugin_data_dir(name);
        let created_data = !data_dir.exists();
        let mut warnings = staged.warnings.clone();

        let ctx = ScriptContext {
            plugin: name,
            plugin_dir: staged.root(),
            data_dir: &data_dir,
        };
        self.hooks.run(&ctx, &descriptor, HookPhase::PreInstall).await?;
        hangar_common_fs::ensure_dir(&data_dir)?;
        if let Err(e) = self.hooks.run_lifecycle(&ctx, "install").await {
            if created_data {
                let _ = hangar_common_fs::remove_dir_if_exists(&data_dir);
            }
            return Err(e);
        }

        if let Some(previous) = &existing {
            if previous.state == PluginState::Enabled || self.loaded.contains_key(name) {
                warnings.extend(self.unload(name).await);
            }
        }

        let dest = self.layout.plugin_dir(name);
        if existing.is_none() && dest.exists() {
            warn!(dir = %dest.display(), "replacing unregistered plugin directory");
        }
        let (trash, moved) = self.move_to_trash(&dest, name)?;
        let origin = staged.source.clone();
        if let Err(e) = staged.publish(&dest) {
            self.restore_from_trash(&moved, &dest);
            return Err(e);
        }

        let entry = RegistryEntry::installed(name, &descriptor.version, origin);
        if let Err(e) = self.registry.set(entry.clone()) {
            let _ = hangar_common_fs::remove_dir_if_exists(&dest);
            self.restore_from_trash(&moved, &dest);
            return Err(e);
        }
        drop(trash);

        let ctx = ScriptContext {
            plugin: name,
            plugin_dir: &dest,
            data_dir: &data_dir,
        };
        if let HookOutcome::Warned(reason) = self.hooks.run(&ctx, &descriptor, HookPhase::PostInstall).await? {
            warnings.push(format!("post-install hook failed: {}", reason));
        }

        info!(version = %entry.version, "installed");
        Ok(InstallReport {
            entry,
            descriptor,
            path: dest,
            replaced: existing.is_some(),
            warnings,
        })
    }

    /// `Uninstall(name, removeData?)`
    ///
    /// A failing `pre-uninstall` hook or `uninstall` script aborts before
    /// anything changes. An enabled plugin is then unloaded and removed.
    /// Its data directory is kept unless `remove_data` is set or it is empty.
    pub async fn uninstall(&mut self, name: &str, remove_data: bool) -> Result<UninstallReport> {
        let span = plugin_span(name, "uninstall");
        self.uninstall_inner(name, remove_data).instrument(span).await
    }

    async fn uninstall_inner(&mut self, name: &str, remove_data: bool) -> Result<UninstallReport> {
        let _guard = self.registry.lock_async().await?;
        let entry = self.registry.require(name)?;
        let mut warnings = Vec::new();

        let dir = self.layout.plugin_dir(name);
        let data_dir = self.layout.plugin_data_dir(name);
        // A broken descriptor must not make a plugin impossible to remove.
        let descriptor = match PluginDescriptor::load(&dir) {
            Ok(d) => Some(d),
            Err(e) => {
                warnings.push(format!("hooks skipped: {}", e));
                None
            }
        };

        if let Some(descriptor) = &descriptor {
            let ctx = ScriptContext {
                plugin: name,
                plugin_dir: &dir,
                data_dir: &data_dir,
            };
            self.hooks.run(&ctx, descriptor, HookPhase::PreUninstall).await?;
            self.hooks.run_lifecycle(&ctx, "uninstall").await?;
        }

        let was_enabled = entry.state == PluginState::Enabled;
        if was_enabled || self.loaded.contains_key(name) {
            let dependents = self.enabled_dependents(name)?;
            if !dependents.is_empty() {
                warnings.push(format!("still required by enabled plugins: {}", dependents.join(", ")));
            }
            warnings.extend(self.unload(name).await);
        }

        let (trash, moved) = match self.move_to_trash(&dir, name) {
            Ok(moved) => moved,
            Err(e) => {
                self.reload_after_abort(was_enabled, descriptor.as_ref()).await;
                return Err(e);
            }
        };
        if let Err(e) = self.registry.remove(name) {
            self.restore_from_trash(&moved, &dir);
            self.reload_after_abort(was_enabled, descriptor.as_ref()).await;
            return Err(e);
        }

        let data_result = if remove_data {
            hangar_common_fs::remove_dir_if_exists(&data_dir)
        } else {
            hangar_common_fs::remove_dir_if_empty(&data_dir).map(|_| false)
        };
        let removed_data = match data_result {
            Ok(removed) => removed,
            Err(e) => {
                warn!(dir = %data_dir.display(), error = %e, "data directory not removed");
                warnings.push(format!("data directory not removed: {}", e));
                false
            }
        };

        if let Some(descriptor) = &descriptor {
            let ctx = ScriptContext {
                plugin: name,
                plugin_dir: &moved,
                data_dir: &data_dir,
            };
            if let HookOutcome::Warned(reason) = self.hooks.run(&ctx, descriptor, HookPhase::PostUninstall).await? {
                warnings.push(format!("post-uninstall hook failed: {}", reason));
            }
        }
        drop(trash);

        info!(removed_data, "uninstalled");
        Ok(UninstallReport {
            name: name.to_string(),
            version: entry.version,
            was_enabled,
            removed_data,
            warnings,
        })
    }

    /// Bring back a plugin unloaded by an uninstall that did not complete.
    async fn reload_after_abort(&mut self, was_enabled: bool, descriptor: Option<&PluginDescriptor>) {
        if let (true, Some(descriptor)) = (was_enabled, descriptor) {
            if let Err(e) = self.activate(descriptor).await {
                warn!(error = %e, "could not reload plugin after failed uninstall");
            }
        }
    }

    /// `Enable(name)`: `Installed`, `Disabled` or `Error` to `Enabled`.
    ///
    /// Requires every system dependency to resolve and every plugin
    /// dependency to be enabled. A failing init entrypoint leaves the
    /// plugin in `Error`.
    pub async fn enable(&mut self, name: &str) -> Result<StateChange> {
        let span = plugin_span(name, "enable");
        self.enable_inner(name).instrument(span).await
    }

    async fn enable_inner(&mut self, name: &str) -> Result<StateChange> {
        let _guard = self.registry.lock_async().await?;
        let entry = self.registry.require(name)?;
        match entry.state {
            PluginState::Enabled => {
                return Ok(StateChange {
                    name: name.to_string(),
                    from: PluginState::Enabled,
                    to: PluginState::Enabled,
                    warnings: Vec::new(),
                })
            }
            PluginState::Installed | PluginState::Disabled | PluginState::Error => {}
            PluginState::Available => {
                return Err(PluginError::InvalidTransition {
                    name: name.to_string(),
                    from: entry.state,
                    operation: "enable",
                })
            }
        }

        let dir = self.layout.plugin_dir(name);
        let descriptor = self.validator.validate(&dir)?;

        let missing = self.deps.check_system(&descriptor);
        if !missing.is_empty() {
            return Err(PluginError::SystemDependencyMissing(missing));
        }
        let unsatisfied = self.deps.check_plugin_deps(&descriptor, &self.registry)?;
        if !unsatisfied.is_empty() {
            return Err(PluginError::PluginDependencyMissing(unsatisfied));
        }

        self.activate(&descriptor).await?;
        if let Err(e) = self.registry.set_state(name, PluginState::Enabled) {
            self.commands.unregister(name);
            self.loaded.remove(name);
            return Err(e);
        }

        info!(from = %entry.state, "enabled");
        Ok(StateChange {
            name: name.to_string(),
            from: entry.state,
            to: PluginState::Enabled,
            warnings: Vec::new(),
        })
    }

    /// Register commands and run init. On failure nothing stays registered
    /// and the plugin is marked `Error`.
    async fn activate(&mut self, descriptor: &PluginDescriptor) -> Result<()> {
        let name = descriptor.name.as_str();
        self.commands.register(descriptor)?;

        let dir = self.layout.plugin_dir(name);
        let data_dir = self.layout.plugin_data_dir(name);
        hangar_common_fs::ensure_dir(&data_dir)?;

        let mut module = self.modules.resolve(name);
        let ctx = ModuleContext {
            descriptor,
            plugin_dir: &dir,
            data_dir: &data_dir,
            runner: &self.hooks,
        };
        if let Err(e) = module.init(&ctx).await {
            self.commands.unregister(name);
            self.registry.set_state(name, PluginState::Error)?;
            warn!(error = %e, "init failed");
            return Err(as_init_failure(name, e));
        }

        self.loaded.insert(name.to_string(), module);
        Ok(())
    }

    /// `Disable(name)`: `Enabled` or `Error` to `Disabled`.
    ///
    /// The state is committed even when the cleanup entrypoint fails.
    pub async fn disable(&mut self, name: &str) -> Result<StateChange> {
        let span = plugin_span(name, "disable");
        self.disable_inner(name).instrument(span).await
    }

    async fn disable_inner(&mut self, name: &str) -> Result<StateChange> {
        let _guard = self.registry.lock_async().await?;
        let entry = self.registry.require(name)?;
        match entry.state {
            PluginState::Disabled => {
                return Ok(StateChange {
                    name: name.to_string(),
                    from: PluginState::Disabled,
                    to: PluginState::Disabled,
                    warnings: Vec::new(),
                })
            }
            PluginState::Enabled | PluginState::Error => {}
            PluginState::Installed | PluginState::Available => {
                return Err(PluginError::InvalidTransition {
                    name: name.to_string(),
                    from: entry.state,
                    operation: "disable",
                })
            }
        }

        let mut warnings = Vec::new();
        let dependents = self.enabled_dependents(name)?;
        if !dependents.is_empty() {
            warnings.push(format!("still required by enabled plugins: {}", dependents.join(", ")));
        }
        warnings.extend(self.unload(name).await);
        self.registry.set_state(name, PluginState::Disabled)?;

        info!(from = %entry.state, "disabled");
        Ok(StateChange {
            name: name.to_string(),
            from: entry.state,
            to: PluginState::Disabled,
            warnings,
        })
    }

    /// Unregister commands and run cleanup. Failures become warnings.
    async fn unload(&mut self, name: &str) -> Vec<String> {
        self.commands.unregister(name);
        let mut module: Box<dyn PluginModule> = match self.loaded.remove(name) {
            Some(module) => module,
            None => self.modules.resolve(name),
        };

        let dir = self.layout.plugin_dir(name);
        let data_dir = self.layout.plugin_data_dir(name);
        let descriptor = match PluginDescriptor::load(&dir) {
            Ok(d) => d,
            Err(e) => {
                warn!(error = %e, "cleanup skipped");
                return vec![format!("cleanup skipped: {}", e)];
            }
        };

        let ctx = ModuleContext {
            descriptor: &descriptor,
            plugin_dir: &dir,
            data_dir: &data_dir,
            runner: &self.hooks,
        };
        match module.cleanup(&ctx).await {
            Ok(()) => Vec::new(),
            Err(e) => {
                warn!(error = %e, "cleanup failed, disabling anyway");
                vec![format!("cleanup failed: {}", e)]
            }
        }
    }

    /// Enable every installed plugin that is not enabled yet, dependencies
    /// first. Failures are collected per plugin.
    pub async fn enable_all(&mut self) -> Result<LoadReport> {
        let doc = self.registry.load()?;
        let (graph, _) = self.installed_graph(&doc);
        let mut report = LoadReport::default();

        for name in graph.topological_order()? {
            match doc.state_of(&name) {
                Some(PluginState::Installed) | Some(PluginState::Disabled) => {}
                _ => continue,
            }
            match self.enable(&name).await {
                Ok(_) => report.loaded.push(name),
                Err(e) => report.failed.push((name, e.to_string())),
            }
        }
        Ok(report)
    }

    /// Bring plugins recorded as `Enabled` into this process: register
    /// their commands and run init, dependencies first.
    pub async fn load_enabled(&mut self) -> Result<LoadReport> {
        let doc = self.registry.load()?;
        let (graph, descriptors) = self.installed_graph(&doc);
        let mut report = LoadReport::default();

        for name in graph.topological_order()? {
            if doc.state_of(&name) != Some(PluginState::Enabled) || self.loaded.contains_key(&name) {
                continue;
            }
            let Some(descriptor) = descriptors.get(&name) else {
                continue;
            };
            let span = plugin_span(&name, "load");
            match self.activate(descriptor).instrument(span).await {
                Ok(()) => report.loaded.push(name),
                Err(e) => report.failed.push((name, e.to_string())),
            }
        }
        for name in doc.plugins.keys() {
            if doc.state_of(name) == Some(PluginState::Enabled) && !descriptors.contains_key(name) {
                report.failed.push((name.clone(), "descriptor unreadable".to_string()));
            }
        }
        Ok(report)
    }

    /// Dispatch a command contributed by an enabled plugin.
    pub async fn run_command(&self, command: &str, args: &[String]) -> Result<i32> {
        let binding = self
            .commands
            .lookup(command)
            .cloned()
            .ok_or_else(|| PluginError::UnknownCommand(command.to_string()))?;

        let dir = self.layout.plugin_dir(&binding.plugin);
        let data_dir = self.layout.plugin_data_dir(&binding.plugin);
        let descriptor = PluginDescriptor::load(&dir)?;
        let ctx = ModuleContext {
            descriptor: &descriptor,
            plugin_dir: &dir,
            data_dir: &data_dir,
            runner: &self.hooks,
        };

        match self.loaded.get(&binding.plugin) {
            Some(module) => module.run(&ctx, &binding.entrypoint, args).await,
            None => {
                self.modules
                    .resolve(&binding.plugin)
                    .run(&ctx, &binding.entrypoint, args)
                    .await
            }
        }
    }

    /// `Update(name)`, or every installed plugin for `"all"`.
    pub async fn update(&mut self, name: &str) -> Result<UpdateReport> {
        if name == "all" {
            return self.update_all().await;
        }
        let span = plugin_span(name, "update");
        let outcome = self.update_one(name).instrument(span).await?;
        Ok(UpdateReport {
            outcomes: vec![(name.to_string(), outcome)],
        })
    }

    /// Update every installed plugin, dependencies first. One plugin's
    /// failure does not stop the others.
    pub async fn update_all(&mut self) -> Result<UpdateReport> {
        let doc = self.registry.load()?;
        let (graph, _) = self.installed_graph(&doc);
        let mut order = graph.topological_order()?;
        for name in doc.plugins.keys() {
            if !graph.contains(name) {
                order.push(name.clone());
            }
        }

        let mut report = UpdateReport::default();
        for name in order {
            let span = plugin_span(&name, "update");
            let outcome = match self.update_one(&name).instrument(span).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(plugin = %name, error = %e, "update failed");
                    UpdateOutcome::Failed(e.to_string())
                }
            };
            report.outcomes.push((name, outcome));
        }
        Ok(report)
    }

    async fn update_one(&mut self, name: &str) -> Result<UpdateOutcome> {
        let _guard = self.registry.lock_async().await?;
        let mut entry = self.registry.require(name)?;

        let source = InstallationSource::from_recorded(entry.source.as_ref());
        let repos = self.registry.repositories()?;
        let staged = self
            .resolver
            .stage(&self.cache, name, &source, &repos, true)
            .await?;
        let descriptor = self.validator.validate(staged.root())?;
        check_staged(&descriptor, name)?;

        if compare_versions(&descriptor.version, &entry.version) != Ordering::Greater {
            return Ok(UpdateOutcome::UpToDate {
                version: entry.version,
            });
        }

        let missing = self.deps.check_system(&descriptor);
        if !missing.is_empty() {
            return Err(PluginError::SystemDependencyMissing(missing));
        }

        let data_dir = self.layout.plugin_data_dir(name);
        let ctx = ScriptContext {
            plugin: name,
            plugin_dir: staged.root(),
            data_dir: &data_dir,
        };
        self.hooks.run_lifecycle(&ctx, "update").await?;

        let was_enabled = entry.state == PluginState::Enabled;
        if was_enabled {
            for warning in self.unload(name).await {
                warn!(plugin = %name, "{}", warning);
            }
        }

        let dest = self.layout.plugin_dir(name);
        let (trash, moved) = self.move_to_trash(&dest, name)?;
        let origin = staged.source.clone();
        if let Err(e) = staged.publish(&dest) {
            self.restore_from_trash(&moved, &dest);
            return Err(e);
        }

        let from = std::mem::replace(&mut entry.version, descriptor.version.clone());
        entry.updated_at = Some(Timestamp::now());
        entry.source = Some(origin);
        if let Err(e) = self.registry.set(entry) {
            let _ = hangar_common_fs::remove_dir_if_exists(&dest);
            self.restore_from_trash(&moved, &dest);
            return Err(e);
        }
        drop(trash);

        if was_enabled {
            self.activate(&descriptor).await?;
        }

        info!(from = %from, to = %descriptor.version, "updated");
        Ok(UpdateOutcome::Updated {
            from,
            to: descriptor.version,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compare_versions() {
        assert_eq!(compare_versions("1.10.0", "1.9.0"), Ordering::Greater);
        assert_eq!(compare_versions("v2.0.0", "2.0.0"), Ordering::Equal);
        assert_eq!(compare_versions("1.0.0-beta", "1.0.0"), Ordering::Less);
        assert_eq!(compare_versions("2024.02", "2024.01"), Ordering::Greater);
        assert_eq!(compare_versions("abc", "abd"), Ordering::Less);
    }

    #[test]
    fn test_check_staged_rejects_foreign_name() {
        let d = PluginDescriptor::parse("name: other\nversion: '1'\ndescription: d\n").unwrap();
        match check_staged(&d, "expected").unwrap_err() {
            PluginError::MetadataInvalid { field, .. } => assert_eq!(field, "name"),
            other => panic!("expected MetadataInvalid, got {other:?}"),
        }
    }

    #[test]
    fn test_check_staged_platforms() {
        let other = if cfg!(windows) { "linux" } else { "windows" };
        let d = PluginDescriptor::parse(&format!(
            "name: p\nversion: '1'\ndescription: d\nplatforms: [{other}]\n"
        ))
        .unwrap();
        match check_staged(&d, "p").unwrap_err() {
            PluginError::MetadataInvalid { field, .. } => assert_eq!(field, "platforms"),
            other => panic!("expected MetadataInvalid, got {other:?}"),
        }
    }

    #[test]
    fn test_check_name() {
        assert!(check_name("git-extras").is_ok());
        assert!(check_name("../etc").is_err());
        assert!(check_name(".staging").is_err());
    }
}
