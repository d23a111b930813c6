//! Plugin template scaffolding
//!
//! Uses Handlebars templates for the files of a new plugin directory.

use handlebars::{handlebars_helper, Handlebars};
use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::descriptor::{PluginKind, DESCRIPTOR_FILE};
use crate::hooks::{HookPhase, HOOKS_DIR};
use crate::{PluginError, Result};

const DESCRIPTOR_TEMPLATE: &str = r#"name: {{yaml name}}
version: 0.1.0
description: {{yaml description}}
author: {{yaml author}}
license: MIT
type: {{kind}}
tags:
  - {{kind}}
dependencies: []
plugin_dependencies: []
commands:
  - name: {{yaml name}}
    description: Run {{name}}
    entrypoint: bin/{{name}}
entrypoints:
  init: init.sh
  cleanup: cleanup.sh
readme: README.md
"#;

const README_TEMPLATE: &str = r#"# {{name}}

{{description}}

## Commands

- `{{name}}`: run the plugin's main command

## Lifecycle

- `init.sh` runs when the plugin is enabled
- `cleanup.sh` runs when the plugin is disabled
- `hooks/` holds the install and uninstall hooks
"#;

const COMMAND_TEMPLATE: &str = r#"#!/bin/sh
# {{name}}: main command
set -e

echo "{{name}} $*"
"#;

const ENTRYPOINT_TEMPLATE: &str = r#"#!/bin/sh
# {{name}}: {{stage}} entrypoint
# HANGAR_PLUGIN_DIR and HANGAR_PLUGIN_DATA_DIR are set by the host.
set -e

exit 0
"#;

const HOOK_TEMPLATE: &str = r#"#!/bin/sh
# {{name}}: {{stage}} hook
set -e

exit 0
"#;

// Single-quoted YAML scalar, so names like `2048` or `true` stay strings.
handlebars_helper!(yaml_scalar: |value: str| format!("'{}'", value.replace('\'', "''")));

/// Template engine for rendering plugin files
pub struct TemplateEngine {
    handlebars: Handlebars<'static>,
    loaded_templates: Vec<String>,
}

impl TemplateEngine {
    /// Create an engine with the built-in plugin templates registered
    pub fn new() -> Result<Self> {
        let mut handlebars = Handlebars::new();
        handlebars.set_strict_mode(true);
        handlebars.register_escape_fn(handlebars::no_escape);
        handlebars.register_helper("yaml", Box::new(yaml_scalar));

        let mut engine = Self {
            handlebars,
            loaded_templates: Vec::new(),
        };
        engine.register_template("descriptor", DESCRIPTOR_TEMPLATE)?;
        engine.register_template("readme", README_TEMPLATE)?;
        engine.register_template("command", COMMAND_TEMPLATE)?;
        engine.register_template("entrypoint", ENTRYPOINT_TEMPLATE)?;
        engine.register_template("hook", HOOK_TEMPLATE)?;
        Ok(engine)
    }

    /// Register a template from a string, replacing a built-in one of the
    /// same name
    pub fn register_template(&mut self, name: &str, template: &str) -> Result<()> {
        self.handlebars
            .register_template_string(name, template)
            .map_err(|e| PluginError::Template(e.to_string()))?;
        if !self.loaded_templates.iter().any(|t| t == name) {
            self.loaded_templates.push(name.to_string());
        }
        Ok(())
    }

    /// Render a template with the given data
    pub fn render<T: Serialize>(&self, name: &str, data: &T) -> Result<String> {
        self.handlebars
            .render(name, data)
            .map_err(|e| PluginError::Template(e.to_string()))
    }

    pub fn has_template(&self, name: &str) -> bool {
        self.handlebars.has_template(name)
    }

    pub fn list_templates(&self) -> &[String] {
        &self.loaded_templates
    }

    /// Write a new plugin into `dest`, returning the created files
    /// relative to it.
    ///
    /// `dest` must not exist yet.
    pub fn scaffold(&self, dest: &Path, context: &ScaffoldContext) -> Result<Vec<PathBuf>> {
        if dest.exists() {
            return Err(PluginError::Template(format!(
                "{} already exists",
                dest.display()
            )));
        }

        let mut files = Vec::new();
        let mut emit = |rel: String, template: &str, stage: Option<&str>, executable: bool| -> Result<()> {
            let data = StageContext { plugin: context, stage };
            let path = dest.join(&rel);
            if let Some(parent) = path.parent() {
                hangar_common_fs::ensure_dir(parent)?;
            }
            std::fs::write(&path, self.render(template, &data)?)?;
            if executable {
                hangar_common_fs::make_executable(&path)?;
            }
            files.push(PathBuf::from(rel));
            Ok(())
        };

        emit(DESCRIPTOR_FILE.to_string(), "descriptor", None, false)?;
        emit("README.md".to_string(), "readme", None, false)?;
        emit(format!("bin/{}", context.name), "command", None, true)?;
        emit("init.sh".to_string(), "entrypoint", Some("init"), true)?;
        emit("cleanup.sh".to_string(), "entrypoint", Some("cleanup"), true)?;
        for phase in HookPhase::ALL {
            emit(
                format!("{}/{}", HOOKS_DIR, phase.as_str()),
                "hook",
                Some(phase.as_str()),
                true,
            )?;
        }

        Ok(files)
    }
}

/// Values available to every plugin template
#[derive(Debug, Clone, Serialize)]
pub struct ScaffoldContext {
    pub name: String,
    pub kind: PluginKind,
    pub description: String,
    pub author: String,
}

impl ScaffoldContext {
    pub fn new(name: &str, kind: PluginKind) -> Self {
        let author = std::env::var("USER").unwrap_or_else(|_| "unknown".to_string());
        Self {
            name: name.to_string(),
            kind,
            description: format!("{} {} plugin", name, kind),
            author,
        }
    }
}

#[derive(Serialize)]
struct StageContext<'a> {
    #[serde(flatten)]
    plugin: &'a ScaffoldContext,
    stage: Option<&'a str>,
}
