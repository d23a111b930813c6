//! Typed results of manager operations. Each `Display` impl is the
//! human-readable summary shown by the command dispatcher.

use std::fmt;
use std::path::PathBuf;

use crate::descriptor::PluginDescriptor;
use crate::registry::{PluginState, RegistryEntry};
use crate::repository::SyncOutcome;

fn write_warnings(f: &mut fmt::Formatter<'_>, warnings: &[String]) -> fmt::Result {
    for warning in warnings {
        write!(f, "\nwarning: {}", warning)?;
    }
    Ok(())
}

/// Result of `install`
#[derive(Debug, Clone)]
pub struct InstallReport {
    pub entry: RegistryEntry,
    pub descriptor: PluginDescriptor,
    pub path: PathBuf,
    /// A previous installation was replaced (`force`).
    pub replaced: bool,
    pub warnings: Vec<String>,
}

impl fmt::Display for InstallReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = if self.replaced { "Reinstalled" } else { "Installed" };
        write!(f, "{} {} {}", verb, self.entry.name, self.entry.version)?;
        if let Some(source) = &self.entry.source {
            write!(f, " from {}", source)?;
        }
        write_warnings(f, &self.warnings)
    }
}

/// Result of `uninstall`
#[derive(Debug, Clone)]
pub struct UninstallReport {
    pub name: String,
    pub version: String,
    pub was_enabled: bool,
    pub removed_data: bool,
    pub warnings: Vec<String>,
}

impl fmt::Display for UninstallReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Uninstalled {} {}", self.name, self.version)?;
        if self.removed_data {
            write!(f, " (data removed)")?;
        }
        write_warnings(f, &self.warnings)
    }
}

/// Result of `enable` / `disable`
#[derive(Debug, Clone)]
pub struct StateChange {
    pub name: String,
    pub from: PluginState,
    pub to: PluginState,
    pub warnings: Vec<String>,
}

impl StateChange {
    pub fn changed(&self) -> bool {
        self.from != self.to
    }
}

impl fmt::Display for StateChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.changed() {
            write!(f, "{}: {} -> {}", self.name, self.from, self.to)?;
        } else {
            write!(f, "{} is already {}", self.name, self.to)?;
        }
        write_warnings(f, &self.warnings)
    }
}

/// Which plugins `list` shows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ListFilter {
    /// Installed plugins plus everything available.
    #[default]
    All,
    /// Every installed plugin regardless of state.
    Installed,
    Enabled,
    Disabled,
    Error,
    /// Catalog plugins that are not installed.
    Available,
}

impl ListFilter {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "all" => Some(Self::All),
            "installed" => Some(Self::Installed),
            "enabled" => Some(Self::Enabled),
            "disabled" => Some(Self::Disabled),
            "error" => Some(Self::Error),
            "available" => Some(Self::Available),
            _ => None,
        }
    }
}

/// One row of `list`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListItem {
    pub name: String,
    pub version: String,
    pub state: PluginState,
    pub description: Option<String>,
    /// Repository name or catalog, for available plugins.
    pub origin: Option<String>,
}

/// Result of `list`
#[derive(Debug, Clone)]
pub struct ListReport {
    pub filter: ListFilter,
    pub items: Vec<ListItem>,
}

impl ListReport {
    pub fn names(&self) -> Vec<&str> {
        self.items.iter().map(|i| i.name.as_str()).collect()
    }
}

impl fmt::Display for ListReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.items.is_empty() {
            return write!(f, "No plugins");
        }
        let mut first = true;
        for item in &self.items {
            if !first {
                writeln!(f)?;
            }
            first = false;
            write!(f, "{:<24} {:<10} {:<10}", item.name, item.version, item.state)?;
            if let Some(origin) = &item.origin {
                write!(f, " [{}]", origin)?;
            }
            if let Some(description) = &item.description {
                write!(f, " {}", description)?;
            }
        }
        Ok(())
    }
}

/// Per-plugin result of `update`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    Updated { from: String, to: String },
    UpToDate { version: String },
    Failed(String),
}

/// Result of `update` / `update_all`
#[derive(Debug, Clone, Default)]
pub struct UpdateReport {
    pub outcomes: Vec<(String, UpdateOutcome)>,
}

impl UpdateReport {
    pub fn outcome(&self, name: &str) -> Option<&UpdateOutcome> {
        self.outcomes.iter().find(|(n, _)| n == name).map(|(_, o)| o)
    }

    pub fn has_failures(&self) -> bool {
        self.outcomes
            .iter()
            .any(|(_, o)| matches!(o, UpdateOutcome::Failed(_)))
    }
}

impl fmt::Display for UpdateReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.outcomes.is_empty() {
            return write!(f, "Nothing to update");
        }
        for (i, (name, outcome)) in self.outcomes.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            match outcome {
                UpdateOutcome::Updated { from, to } => write!(f, "{}: {} -> {}", name, from, to)?,
                UpdateOutcome::UpToDate { version } => write!(f, "{}: up to date ({})", name, version)?,
                UpdateOutcome::Failed(reason) => write!(f, "{}: failed: {}", name, reason)?,
            }
        }
        Ok(())
    }
}

/// Result of `info`
#[derive(Debug, Clone)]
pub struct PluginInfo {
    pub descriptor: PluginDescriptor,
    /// `None` when the plugin is only available.
    pub entry: Option<RegistryEntry>,
    pub origin: Option<String>,
    pub path: Option<PathBuf>,
    pub data_dir: Option<PathBuf>,
    pub readme: Option<PathBuf>,
    pub missing_system: Vec<String>,
    pub unsatisfied_plugins: Vec<String>,
    pub transitive_dependencies: Vec<String>,
    pub required_by: Vec<String>,
}

impl PluginInfo {
    pub fn state(&self) -> PluginState {
        self.entry
            .as_ref()
            .map(|e| e.state)
            .unwrap_or(PluginState::Available)
    }
}

impl fmt::Display for PluginInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let d = &self.descriptor;
        writeln!(f, "{} {}", d.name, d.version)?;
        writeln!(f, "  {}", d.description)?;
        writeln!(f, "  state:        {}", self.state())?;
        writeln!(f, "  type:         {}", d.kind)?;
        if let Some(author) = &d.author {
            writeln!(f, "  author:       {}", author)?;
        }
        if let Some(license) = &d.license {
            writeln!(f, "  license:      {}", license)?;
        }
        if let Some(homepage) = &d.homepage {
            writeln!(f, "  homepage:     {}", homepage)?;
        }
        if !d.tags.is_empty() {
            let tags: Vec<&str> = d.tags.iter().map(String::as_str).collect();
            writeln!(f, "  tags:         {}", tags.join(", "))?;
        }
        if let Some(entry) = &self.entry {
            writeln!(f, "  installed:    {}", entry.installed_at)?;
            if let Some(updated) = &entry.updated_at {
                writeln!(f, "  updated:      {}", updated)?;
            }
            if let Some(source) = &entry.source {
                writeln!(f, "  source:       {}", source)?;
            }
        } else if let Some(origin) = &self.origin {
            writeln!(f, "  available in: {}", origin)?;
        }
        if let Some(path) = &self.path {
            writeln!(f, "  path:         {}", path.display())?;
        }
        if !d.commands.is_empty() {
            let names: Vec<&str> = d.commands.iter().map(|c| c.name.as_str()).collect();
            writeln!(f, "  commands:     {}", names.join(", "))?;
        }
        if !d.system_dependencies.is_empty() {
            writeln!(f, "  requires:     {}", d.system_dependencies.join(", "))?;
        }
        if !self.missing_system.is_empty() {
            writeln!(f, "  missing:      {}", self.missing_system.join(", "))?;
        }
        if !self.transitive_dependencies.is_empty() {
            writeln!(f, "  depends on:   {}", self.transitive_dependencies.join(", "))?;
        }
        if !self.unsatisfied_plugins.is_empty() {
            writeln!(f, "  not enabled:  {}", self.unsatisfied_plugins.join(", "))?;
        }
        if !self.required_by.is_empty() {
            writeln!(f, "  required by:  {}", self.required_by.join(", "))?;
        }
        match &self.readme {
            Some(readme) => write!(f, "  readme:       {}", readme.display()),
            None => write!(f, "  readme:       none"),
        }
    }
}

/// Result of `create_template`
#[derive(Debug, Clone)]
pub struct TemplateReport {
    pub name: String,
    pub path: PathBuf,
    pub files: Vec<PathBuf>,
}

impl fmt::Display for TemplateReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Created plugin template {} at {}", self.name, self.path.display())?;
        for file in &self.files {
            write!(f, "\n  {}", file.display())?;
        }
        Ok(())
    }
}

/// Result of `verify`
#[derive(Debug, Clone, Default)]
pub struct VerifyReport {
    pub checked: usize,
    /// Registered plugins whose directory is gone; now in `Error`.
    pub missing: Vec<String>,
    /// Plugin directories with no registry entry.
    pub orphans: Vec<PathBuf>,
    /// Leftovers of interrupted installs under the staging area.
    pub stale_staging: Vec<PathBuf>,
}

impl VerifyReport {
    pub fn is_clean(&self) -> bool {
        self.missing.is_empty() && self.orphans.is_empty() && self.stale_staging.is_empty()
    }
}

impl fmt::Display for VerifyReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Checked {} plugins", self.checked)?;
        if self.is_clean() {
            return write!(f, ", no problems found");
        }
        for name in &self.missing {
            write!(f, "\n  {}: directory missing, marked as error", name)?;
        }
        for path in &self.orphans {
            write!(f, "\n  orphaned directory: {}", path.display())?;
        }
        for path in &self.stale_staging {
            write!(f, "\n  stale staging directory: {}", path.display())?;
        }
        Ok(())
    }
}

/// Result of `clean_orphans`
#[derive(Debug, Clone, Default)]
pub struct CleanReport {
    pub removed: Vec<PathBuf>,
}

impl fmt::Display for CleanReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Removed {} leftover directories", self.removed.len())?;
        for path in &self.removed {
            write!(f, "\n  {}", path.display())?;
        }
        Ok(())
    }
}

/// Result of `sync_all`
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    pub synced: Vec<SyncOutcome>,
    pub failed: Vec<(String, String)>,
}

impl fmt::Display for SyncReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut lines: Vec<String> = self.synced.iter().map(ToString::to_string).collect();
        lines.extend(
            self.failed
                .iter()
                .map(|(repo, reason)| format!("{}: unreachable: {}", repo, reason)),
        );
        if lines.is_empty() {
            return write!(f, "No repositories enabled");
        }
        write!(f, "{}", lines.join("\n"))
    }
}

/// Result of bulk enable / load
#[derive(Debug, Clone, Default)]
pub struct LoadReport {
    pub loaded: Vec<String>,
    pub failed: Vec<(String, String)>,
}

impl fmt::Display for LoadReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Loaded {} plugins", self.loaded.len())?;
        for (name, reason) in &self.failed {
            write!(f, "\n  {}: {}", name, reason)?;
        }
        Ok(())
    }
}
