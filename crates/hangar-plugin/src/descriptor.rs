//! Plugin descriptor types
//!
//! Defines the structure of the `plugin.yaml` file shipped inside every
//! plugin directory. Parsing fails closed: a descriptor with any malformed
//! field is rejected as a whole, naming the first offending field.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;

use crate::hooks::HookPhase;
use crate::{PluginError, Result};

/// Name of the descriptor file inside a plugin directory.
pub const DESCRIPTOR_FILE: &str = "plugin.yaml";

/// Upper bound on descriptor size.
const MAX_DESCRIPTOR_BYTES: usize = 256 * 1024;

/// Type of plugin
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginKind {
    /// General-purpose helper commands
    #[default]
    Utility,
    /// Wraps an external tool or service
    Integration,
    /// Language or framework support
    Language,
    /// Developer workflow tooling
    Development,
    /// Appearance and prompt customization
    Theme,
}

impl PluginKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Utility => "utility",
            Self::Integration => "integration",
            Self::Language => "language",
            Self::Development => "development",
            Self::Theme => "theme",
        }
    }

    /// Parse from a user-supplied string.
    pub fn parse(s: &str) -> Option<Self> {
        serde_yaml::from_value(Value::from(s.trim().to_lowercase())).ok()
    }
}

impl fmt::Display for PluginKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operating systems a plugin can declare support for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Linux,
    #[serde(alias = "darwin", alias = "osx")]
    Macos,
    Windows,
    Unix,
    Any,
}

impl Platform {
    /// Whether the running host matches this platform.
    pub fn matches_host(&self) -> bool {
        match self {
            Self::Any => true,
            Self::Unix => cfg!(unix),
            Self::Linux => cfg!(target_os = "linux"),
            Self::Macos => cfg!(target_os = "macos"),
            Self::Windows => cfg!(windows),
        }
    }
}

/// A command contributed by a plugin
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Path relative to the plugin directory.
    pub entrypoint: String,
}

/// Initialization and teardown entrypoints
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entrypoints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub init: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cleanup: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub main: Option<String>,
}

impl Entrypoints {
    /// Declared entrypoints as `(label, relative path)` pairs.
    pub fn declared(&self) -> impl Iterator<Item = (&'static str, &str)> {
        [
            ("init", self.init.as_deref()),
            ("cleanup", self.cleanup.as_deref()),
            ("main", self.main.as_deref()),
        ]
        .into_iter()
        .filter_map(|(label, path)| path.map(|p| (label, p)))
    }
}

/// Plugin descriptor (plugin.yaml)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginDescriptor {
    /// Plugin name (unique identifier)
    pub name: String,

    /// Plugin version, semver where possible
    pub version: String,

    /// Human-readable description
    pub description: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub homepage: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,

    /// Plugin type
    #[serde(rename = "type", default)]
    pub kind: PluginKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub tags: BTreeSet<String>,

    /// External binaries that must be on the search path
    #[serde(rename = "dependencies", default, skip_serializing_if = "Vec::is_empty")]
    pub system_dependencies: Vec<String>,

    /// Other plugins that must be enabled first
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub plugin_dependencies: Vec<String>,

    /// Empty means every platform
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub platforms: Vec<Platform>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub commands: Vec<CommandSpec>,

    /// Hook phase to script path, relative to the plugin directory
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub hooks: BTreeMap<HookPhase, String>,

    #[serde(default)]
    pub entrypoints: Entrypoints,

    /// Documentation file, relative to the plugin directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readme: Option<String>,
}

impl PluginDescriptor {
    /// Parse a descriptor document.
    pub fn parse(text: &str) -> Result<Self> {
        let value: Value = serde_yaml::from_str(text)
            .map_err(|e| PluginError::invalid(DESCRIPTOR_FILE, e.to_string()))?;
        Self::from_value(value)
    }

    /// Build a descriptor from an already-parsed YAML value.
    pub fn from_value(value: Value) -> Result<Self> {
        let map = match value {
            Value::Mapping(map) => map,
            Value::Null => return Err(PluginError::invalid(DESCRIPTOR_FILE, "document is empty")),
            _ => return Err(PluginError::invalid(DESCRIPTOR_FILE, "expected a mapping")),
        };

        for field in ["name", "version", "description"] {
            match map.get(field) {
                None | Some(Value::Null) => {
                    return Err(PluginError::invalid(field, "is required"));
                }
                Some(Value::String(s)) if s.trim().is_empty() => {
                    return Err(PluginError::invalid(field, "must not be empty"));
                }
                Some(Value::String(_)) => {}
                Some(_) => return Err(PluginError::invalid(field, "must be a string")),
            }
        }

        check_optional_fields(&map)?;

        let descriptor: Self = serde_yaml::from_value(Value::Mapping(map))
            .map_err(|e| PluginError::invalid(DESCRIPTOR_FILE, e.to_string()))?;
        descriptor.check_paths()?;
        Ok(descriptor)
    }

    /// Read and parse `<dir>/plugin.yaml`.
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(DESCRIPTOR_FILE);
        if !path.is_file() {
            return Err(PluginError::MetadataMissing(dir.to_path_buf()));
        }
        let text = hangar_common_fs::read_to_string(&path, MAX_DESCRIPTOR_BYTES)?;
        Self::parse(&text)
    }

    /// Serialize back to YAML.
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Whether the running host is one of the declared platforms.
    pub fn supports_host(&self) -> bool {
        self.platforms.is_empty() || self.platforms.iter().any(Platform::matches_host)
    }

    /// Case-insensitive substring match over name, description and tags.
    pub fn matches(&self, query: &str) -> bool {
        let query = query.trim().to_lowercase();
        if query.is_empty() {
            return true;
        }
        self.name.to_lowercase().contains(&query)
            || self.description.to_lowercase().contains(&query)
            || self.tags.iter().any(|t| t.to_lowercase().contains(&query))
    }

    // Every declared relative path must stay inside the plugin directory.
    fn check_paths(&self) -> Result<()> {
        let relative = |field: String, path: &str| -> Result<()> {
            if path.trim().is_empty() {
                return Err(PluginError::invalid(field, "path must not be empty"));
            }
            if hangar_common_fs::path::safe_join("", path).is_none() {
                return Err(PluginError::invalid(
                    field,
                    format!("'{}' escapes the plugin directory", path),
                ));
            }
            Ok(())
        };

        for (i, command) in self.commands.iter().enumerate() {
            if command.name.trim().is_empty() {
                return Err(PluginError::invalid(
                    format!("commands[{}].name", i),
                    "must not be empty",
                ));
            }
            relative(format!("commands[{}].entrypoint", i), &command.entrypoint)?;
        }
        for (phase, path) in &self.hooks {
            relative(format!("hooks.{}", phase), path)?;
        }
        for (label, path) in self.entrypoints.declared() {
            relative(format!("entrypoints.{}", label), path)?;
        }
        if let Some(readme) = &self.readme {
            relative("readme".to_string(), readme)?;
        }
        Ok(())
    }
}

impl fmt::Display for PluginDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ({})", self.name, self.version, self.kind)?;
        if !self.description.is_empty() {
            write!(f, " - {}", self.description)?;
        }
        Ok(())
    }
}

fn probe<T: DeserializeOwned>(map: &Mapping, field: &str) -> Result<()> {
    match map.get(field) {
        None | Some(Value::Null) => Ok(()),
        Some(value) => serde_yaml::from_value::<T>(value.clone())
            .map(|_| ())
            .map_err(|e| PluginError::invalid(field, e.to_string())),
    }
}

// Deserialize each optional field on its own so a failure names the field.
fn check_optional_fields(map: &Mapping) -> Result<()> {
    for field in ["author", "license", "homepage", "repository", "category", "readme"] {
        probe::<String>(map, field)?;
    }
    probe::<PluginKind>(map, "type")?;
    for field in ["tags", "dependencies", "plugin_dependencies"] {
        probe::<Vec<String>>(map, field)?;
    }
    probe::<Vec<Platform>>(map, "platforms")?;
    probe::<Vec<CommandSpec>>(map, "commands")?;
    probe::<BTreeMap<HookPhase, String>>(map, "hooks")?;
    probe::<Entrypoints>(map, "entrypoints")?;
    Ok(())
}
