//! Plugin entrypoint contract
//!
//! An enabled plugin is represented in-process by a [`PluginModule`]. Hosts
//! can register native modules by plugin name; every other plugin is driven
//! through [`ScriptModule`], which executes the entrypoint scripts its
//! descriptor declares.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

use hangar_common_fs::path::safe_join;

use crate::descriptor::PluginDescriptor;
use crate::hooks::{HookRunner, ScriptContext};
use crate::{PluginError, Result};

/// What a module sees of its plugin
#[derive(Debug, Clone, Copy)]
pub struct ModuleContext<'a> {
    pub descriptor: &'a PluginDescriptor,
    pub plugin_dir: &'a Path,
    pub data_dir: &'a Path,
    pub runner: &'a HookRunner,
}

impl<'a> ModuleContext<'a> {
    pub fn name(&self) -> &'a str {
        &self.descriptor.name
    }

    fn script_context(&self) -> ScriptContext<'a> {
        ScriptContext {
            plugin: &self.descriptor.name,
            plugin_dir: self.plugin_dir,
            data_dir: self.data_dir,
        }
    }
}

/// Capabilities a loaded plugin exposes to the host
#[async_trait]
pub trait PluginModule: Send + Sync {
    /// Called once when the plugin is enabled or loaded.
    async fn init(&mut self, _ctx: &ModuleContext<'_>) -> Result<()> {
        Ok(())
    }

    /// Called once when the plugin is disabled or unloaded.
    async fn cleanup(&mut self, _ctx: &ModuleContext<'_>) -> Result<()> {
        Ok(())
    }

    /// Run a command entrypoint, returning its exit status.
    async fn run(&self, ctx: &ModuleContext<'_>, entrypoint: &str, args: &[String]) -> Result<i32>;
}

/// Builds a fresh module instance
pub type ModuleFactory = Arc<dyn Fn() -> Box<dyn PluginModule> + Send + Sync>;

/// Native modules by plugin name, with a script fallback
#[derive(Clone, Default)]
pub struct ModuleTable {
    factories: HashMap<String, ModuleFactory>,
}

impl ModuleTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a native module for plugin `name`, replacing any previous one.
    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn() -> Box<dyn PluginModule> + Send + Sync + 'static,
    {
        self.factories.insert(name.to_string(), Arc::new(factory));
    }

    pub fn is_native(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// A new module for plugin `name`.
    pub fn resolve(&self, name: &str) -> Box<dyn PluginModule> {
        match self.factories.get(name) {
            Some(factory) => factory(),
            None => Box::new(ScriptModule),
        }
    }
}

impl fmt::Debug for ModuleTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.factories.keys().collect();
        names.sort();
        f.debug_struct("ModuleTable").field("native", &names).finish()
    }
}

/// Drives a plugin through the scripts its descriptor declares
#[derive(Debug, Clone, Copy, Default)]
pub struct ScriptModule;

impl ScriptModule {
    async fn run_declared(&self, ctx: &ModuleContext<'_>, label: &str, rel: Option<&str>) -> Result<()> {
        let Some(rel) = rel else {
            return Ok(());
        };
        let script = entrypoint_path(ctx, rel)?;
        let output = ctx
            .runner
            .run_script(&ctx.script_context(), label, &script, &[])
            .await
            .map_err(|e| failed(ctx, label, e.to_string()))?;
        if output.success() {
            debug!(plugin = %ctx.name(), "{} entrypoint finished", label);
            Ok(())
        } else {
            Err(failed(ctx, label, output.failure_reason()))
        }
    }
}

#[async_trait]
impl PluginModule for ScriptModule {
    async fn init(&mut self, ctx: &ModuleContext<'_>) -> Result<()> {
        self.run_declared(ctx, "init", ctx.descriptor.entrypoints.init.as_deref())
            .await
    }

    async fn cleanup(&mut self, ctx: &ModuleContext<'_>) -> Result<()> {
        self.run_declared(ctx, "cleanup", ctx.descriptor.entrypoints.cleanup.as_deref())
            .await
    }

    async fn run(&self, ctx: &ModuleContext<'_>, entrypoint: &str, args: &[String]) -> Result<i32> {
        let script = entrypoint_path(ctx, entrypoint)?;
        ctx.runner
            .run_interactive(&ctx.script_context(), entrypoint, &script, args)
            .await
            .map_err(|e| failed(ctx, entrypoint, e.to_string()))
    }
}

fn entrypoint_path(ctx: &ModuleContext<'_>, rel: &str) -> Result<std::path::PathBuf> {
    safe_join(ctx.plugin_dir, rel)
        .filter(|p| p.is_file())
        .ok_or_else(|| failed(ctx, rel, "entrypoint not found".to_string()))
}

fn failed(ctx: &ModuleContext<'_>, entrypoint: &str, reason: String) -> PluginError {
    PluginError::EntrypointFailed {
        name: ctx.name().to_string(),
        entrypoint: entrypoint.to_string(),
        reason,
    }
}

/// Where a command is dispatched to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandBinding {
    pub plugin: String,
    pub entrypoint: String,
    pub description: String,
}

/// Commands contributed by enabled plugins
#[derive(Debug, Clone, Default)]
pub struct CommandTable {
    commands: BTreeMap<String, CommandBinding>,
}

impl CommandTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every command of `descriptor`, or none of them.
    pub fn register(&mut self, descriptor: &PluginDescriptor) -> Result<()> {
        for command in &descriptor.commands {
            if let Some(existing) = self.commands.get(&command.name) {
                if existing.plugin != descriptor.name {
                    return Err(PluginError::CommandConflict {
                        command: command.name.clone(),
                        owner: existing.plugin.clone(),
                    });
                }
            }
        }
        for command in &descriptor.commands {
            self.commands.insert(
                command.name.clone(),
                CommandBinding {
                    plugin: descriptor.name.clone(),
                    entrypoint: command.entrypoint.clone(),
                    description: command.description.clone(),
                },
            );
        }
        Ok(())
    }

    /// Drop every command owned by `plugin`; returns how many were removed.
    pub fn unregister(&mut self, plugin: &str) -> usize {
        let before = self.commands.len();
        self.commands.retain(|_, binding| binding.plugin != plugin);
        before - self.commands.len()
    }

    pub fn lookup(&self, command: &str) -> Option<&CommandBinding> {
        self.commands.get(command)
    }

    /// Command names owned by `plugin`.
    pub fn commands_of(&self, plugin: &str) -> Vec<&str> {
        self.commands
            .iter()
            .filter(|(_, b)| b.plugin == plugin)
            .map(|(name, _)| name.as_str())
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &CommandBinding)> {
        self.commands.iter().map(|(name, b)| (name.as_str(), b))
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hangar_test_utils::PluginFixture;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    fn descriptor(yaml: &str) -> PluginDescriptor {
        PluginDescriptor::parse(yaml).unwrap()
    }

    #[test]
    fn test_command_table_is_all_or_nothing() {
        let mut table = CommandTable::new();
        let a = descriptor(
            "name: a\nversion: '1'\ndescription: d\ncommands:\n  - {name: one, entrypoint: bin/one}\n  - {name: two, entrypoint: bin/two}\n",
        );
        let b = descriptor(
            "name: b\nversion: '1'\ndescription: d\ncommands:\n  - {name: three, entrypoint: bin/three}\n  - {name: two, entrypoint: bin/two}\n",
        );

        table.register(&a).unwrap();
        match table.register(&b).unwrap_err() {
            PluginError::CommandConflict { command, owner } => {
                assert_eq!(command, "two");
                assert_eq!(owner, "a");
            }
            other => panic!("expected CommandConflict, got {other:?}"),
        }
        assert!(table.lookup("three").is_none());
        assert_eq!(table.lookup("two").unwrap().plugin, "a");

        // Re-registering the same plugin is fine.
        table.register(&a).unwrap();
        assert_eq!(table.unregister("a"), 2);
        assert!(table.is_empty());
        table.register(&b).unwrap();
        assert_eq!(table.commands_of("b"), vec!["three", "two"]);
    }

    struct Counting(Arc<AtomicUsize>);

    #[async_trait]
    impl PluginModule for Counting {
        async fn init(&mut self, _ctx: &ModuleContext<'_>) -> Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn run(&self, _ctx: &ModuleContext<'_>, _entrypoint: &str, args: &[String]) -> Result<i32> {
            Ok(args.len() as i32)
        }
    }

    #[tokio::test]
    async fn test_native_module_takes_precedence() {
        let inits = Arc::new(AtomicUsize::new(0));
        let mut table = ModuleTable::new();
        let counter = Arc::clone(&inits);
        table.register("native", move || Box::new(Counting(Arc::clone(&counter))));
        assert!(table.is_native("native"));
        assert!(!table.is_native("other"));

        let tmp = tempdir().unwrap();
        let d = descriptor("name: native\nversion: '1'\ndescription: d\n");
        let runner = HookRunner::default();
        let ctx = ModuleContext {
            descriptor: &d,
            plugin_dir: tmp.path(),
            data_dir: tmp.path(),
            runner: &runner,
        };

        let mut module = table.resolve("native");
        module.init(&ctx).await.unwrap();
        assert_eq!(inits.load(Ordering::SeqCst), 1);
        assert_eq!(module.run(&ctx, "main", &["x".into(), "y".into()]).await.unwrap(), 2);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_script_module_init_failure() {
        let tmp = tempdir().unwrap();
        let dir = PluginFixture::new("scripted")
            .entrypoint("init", "init.sh", "#!/bin/sh\necho 'no config' >&2\nexit 4\n")
            .entrypoint("cleanup", "cleanup.sh", "#!/bin/sh\nexit 0\n")
            .write_under(tmp.path());
        let d = PluginDescriptor::load(&dir).unwrap();
        let runner = HookRunner::default();
        let ctx = ModuleContext {
            descriptor: &d,
            plugin_dir: &dir,
            data_dir: tmp.path(),
            runner: &runner,
        };

        let mut module = ModuleTable::new().resolve("scripted");
        match module.init(&ctx).await.unwrap_err() {
            PluginError::EntrypointFailed { entrypoint, reason, .. } => {
                assert_eq!(entrypoint, "init");
                assert_eq!(reason, "exit status 4: no config");
            }
            other => panic!("expected EntrypointFailed, got {other:?}"),
        }
        module.cleanup(&ctx).await.unwrap();
    }
}
