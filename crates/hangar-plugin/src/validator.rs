//! Structure Validator
//!
//! All-or-nothing acceptance of a candidate plugin directory. The first
//! unmet requirement is returned as a field-specific error.

use std::collections::HashSet;
use std::path::Path;

use hangar_common_fs::{is_executable, path::safe_join};

use crate::descriptor::PluginDescriptor;
use crate::hooks::{lifecycle_script, HookPhase, HOOKS_DIR, LIFECYCLE_SCRIPTS};
use crate::{PluginError, Result};

/// Checks the plugin directory contract
#[derive(Debug, Clone, Copy, Default)]
pub struct StructureValidator;

impl StructureValidator {
    pub fn new() -> Self {
        Self
    }

    /// `Validate(pluginDir)`: the parsed descriptor when every check passes.
    pub fn validate(&self, dir: &Path) -> Result<PluginDescriptor> {
        let descriptor = PluginDescriptor::load(dir)?;

        if !hangar_common_fs::path::is_single_component(&descriptor.name) {
            return Err(PluginError::invalid(
                "name",
                format!("'{}' is not a valid plugin name", descriptor.name),
            ));
        }

        for script in LIFECYCLE_SCRIPTS {
            if let Some(path) = lifecycle_script(dir, script) {
                require_executable(script.to_string(), &path)?;
            }
        }

        self.check_hooks(dir, &descriptor)?;
        self.check_commands(dir, &descriptor)?;

        for (label, rel) in descriptor.entrypoints.declared() {
            require_file(format!("entrypoints.{}", label), dir, rel, true)?;
        }
        if let Some(readme) = &descriptor.readme {
            require_file("readme".to_string(), dir, readme, false)?;
        }

        Ok(descriptor)
    }

    fn check_hooks(&self, dir: &Path, descriptor: &PluginDescriptor) -> Result<()> {
        for (phase, rel) in &descriptor.hooks {
            require_file(format!("hooks.{}", phase), dir, rel, true)?;
        }
        // Conventional hooks/<phase> scripts that are not declared.
        let hooks = dir.join(HOOKS_DIR);
        for phase in HookPhase::ALL {
            if descriptor.hooks.contains_key(&phase) {
                continue;
            }
            if let Some(path) = lifecycle_script(&hooks, phase.as_str()) {
                require_executable(format!("hooks.{}", phase), &path)?;
            }
        }
        Ok(())
    }

    fn check_commands(&self, dir: &Path, descriptor: &PluginDescriptor) -> Result<()> {
        let mut seen = HashSet::new();
        for (i, command) in descriptor.commands.iter().enumerate() {
            if !seen.insert(command.name.as_str()) {
                return Err(PluginError::invalid(
                    format!("commands[{}].name", i),
                    format!("duplicate command '{}'", command.name),
                ));
            }
            require_file(format!("commands[{}].entrypoint", i), dir, &command.entrypoint, true)?;
        }
        Ok(())
    }
}

fn require_file(field: String, dir: &Path, rel: &str, executable: bool) -> Result<()> {
    let path = safe_join(dir, rel)
        .ok_or_else(|| PluginError::invalid(field.clone(), format!("'{}' escapes the plugin directory", rel)))?;
    if !path.is_file() {
        return Err(PluginError::invalid(field, format!("'{}' not found", rel)));
    }
    if executable {
        require_executable(field, &path)?;
    }
    Ok(())
}

fn require_executable(field: String, path: &Path) -> Result<()> {
    if is_executable(path) {
        Ok(())
    } else {
        let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        Err(PluginError::invalid(field, format!("'{}' is not executable", name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hangar_test_utils::{assert_err, PluginFixture};
    use tempfile::tempdir;

    fn field_of(err: PluginError) -> String {
        match err {
            PluginError::MetadataInvalid { field, .. } => field,
            other => panic!("expected MetadataInvalid, got {other:?}"),
        }
    }

    #[test]
    fn test_valid_plugin() {
        let tmp = tempdir().unwrap();
        let dir = PluginFixture::new("good")
            .command("good", "bin/good")
            .hook("pre-install", "#!/bin/sh\nexit 0\n")
            .script("install", "#!/bin/sh\nexit 0\n")
            .entrypoint("init", "init.sh", "#!/bin/sh\nexit 0\n")
            .write_under(tmp.path());

        let descriptor = StructureValidator::new().validate(&dir).unwrap();
        assert_eq!(descriptor.name, "good");
        assert_eq!(descriptor.commands.len(), 1);
    }

    #[test]
    fn test_missing_descriptor() {
        let tmp = tempdir().unwrap();
        let dir = PluginFixture::new("empty").without_descriptor().write_under(tmp.path());
        let err = assert_err!(StructureValidator::new().validate(&dir));
        assert!(matches!(err, PluginError::MetadataMissing(_)));
    }

    #[test]
    fn test_malformed_descriptor_fails_closed() {
        let tmp = tempdir().unwrap();
        let dir = PluginFixture::new("garbled")
            .raw_descriptor("name: garbled\nversion: [1, 2\n")
            .write_under(tmp.path());
        assert_eq!(field_of(StructureValidator::new().validate(&dir).unwrap_err()), "plugin.yaml");
    }

    #[test]
    fn test_required_fields_named() {
        let tmp = tempdir().unwrap();
        let dir = PluginFixture::new("noversion")
            .field("version", "")
            .write_under(tmp.path());
        assert_eq!(field_of(StructureValidator::new().validate(&dir).unwrap_err()), "version");

        let dir = PluginFixture::new("nodesc")
            .without_field("description")
            .write_under(tmp.path());
        assert_eq!(field_of(StructureValidator::new().validate(&dir).unwrap_err()), "description");
    }

    #[test]
    fn test_name_must_be_a_single_component() {
        let tmp = tempdir().unwrap();
        let dir = PluginFixture::new("sneaky")
            .field("name", "../escape")
            .write_under(tmp.path());
        assert_eq!(field_of(StructureValidator::new().validate(&dir).unwrap_err()), "name");
    }

    #[test]
    fn test_missing_command_entrypoint() {
        let tmp = tempdir().unwrap();
        let dir = PluginFixture::new("cmd")
            .field(
                "commands",
                serde_yaml::from_str::<serde_yaml::Value>("[{name: cmd, entrypoint: bin/missing}]").unwrap(),
            )
            .write_under(tmp.path());
        assert_eq!(
            field_of(StructureValidator::new().validate(&dir).unwrap_err()),
            "commands[0].entrypoint"
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_lifecycle_script_must_be_executable() {
        let tmp = tempdir().unwrap();
        let dir = PluginFixture::new("lazy")
            .file("install.sh", "#!/bin/sh\nexit 0\n")
            .write_under(tmp.path());
        assert_eq!(field_of(StructureValidator::new().validate(&dir).unwrap_err()), "install");
    }

    #[cfg(unix)]
    #[test]
    fn test_conventional_hook_must_be_executable() {
        let tmp = tempdir().unwrap();
        let dir = PluginFixture::new("hooked")
            .file("hooks/post-install", "#!/bin/sh\nexit 0\n")
            .write_under(tmp.path());
        assert_eq!(
            field_of(StructureValidator::new().validate(&dir).unwrap_err()),
            "hooks.post-install"
        );
    }

    #[test]
    fn test_declared_readme_must_exist() {
        let tmp = tempdir().unwrap();
        let dir = PluginFixture::new("docs").field("readme", "README.md").write_under(tmp.path());
        assert_eq!(field_of(StructureValidator::new().validate(&dir).unwrap_err()), "readme");
    }
}
