//! Error types for the plugin engine.

use crate::registry::PluginState;
use hangar_common_config::ConfigError;
use std::path::PathBuf;

/// Result type for plugin operations
pub type Result<T> = std::result::Result<T, PluginError>;

/// Errors that can occur in the plugin engine
#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    /// No descriptor file in the candidate directory
    #[error("plugin descriptor not found in {}", .0.display())]
    MetadataMissing(PathBuf),

    /// Descriptor present but a field is missing or malformed
    #[error("invalid plugin descriptor field `{field}`: {reason}")]
    MetadataInvalid { field: String, reason: String },

    /// Explicit source and every repository/catalog lookup failed
    #[error("could not resolve a source for plugin '{name}' (tried: {})", tried.join(", "))]
    SourceUnresolvable { name: String, tried: Vec<String> },

    /// A single repository could not be reached or read
    #[error("repository '{repo}' is unreachable: {reason}")]
    RepositoryUnreachable { repo: String, reason: String },

    #[error("missing system dependencies: {}", .0.join(", "))]
    SystemDependencyMissing(Vec<String>),

    #[error("plugin dependencies not enabled: {}", .0.join(", "))]
    PluginDependencyMissing(Vec<String>),

    #[error("dependency cycle: {}", .0.join(" -> "))]
    DependencyCycle(Vec<String>),

    #[error("plugin '{0}' is already installed")]
    AlreadyInstalled(String),

    #[error("plugin '{0}' is not installed")]
    NotInstalled(String),

    #[error("cannot {operation} plugin '{name}' while it is {from}")]
    InvalidTransition {
        name: String,
        from: PluginState,
        operation: &'static str,
    },

    #[error("{phase} hook failed: {reason}")]
    HookFailed { phase: String, reason: String },

    #[error("entrypoint `{entrypoint}` of plugin '{name}' failed: {reason}")]
    EntrypointFailed {
        name: String,
        entrypoint: String,
        reason: String,
    },

    #[error("command '{command}' is already provided by plugin '{owner}'")]
    CommandConflict { command: String, owner: String },

    #[error("unknown command '{0}'")]
    UnknownCommand(String),

    /// Another process holds the registry lock
    #[error("registry is locked by another process: {0}")]
    RegistryLocked(String),

    /// The registry file was rewritten by someone not holding the lock
    #[error("registry changed underneath this operation (expected revision {expected}, found {found})")]
    RegistryConflict { expected: u64, found: u64 },

    #[error("repository '{0}' already exists")]
    RepositoryExists(String),

    #[error("unknown repository '{0}'")]
    UnknownRepository(String),

    #[error("archive error: {0}")]
    Archive(String),

    #[error("template error: {0}")]
    Template(String),

    #[error("git error: {0}")]
    Git(#[from] git2::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Fs(#[from] hangar_common_core::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl PluginError {
    /// Shorthand for [`PluginError::MetadataInvalid`].
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MetadataInvalid {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Stable snake_case name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MetadataMissing(_) => "metadata_missing",
            Self::MetadataInvalid { .. } => "metadata_invalid",
            Self::SourceUnresolvable { .. } => "source_unresolvable",
            Self::RepositoryUnreachable { .. } => "repository_unreachable",
            Self::SystemDependencyMissing(_) => "system_dependency_missing",
            Self::PluginDependencyMissing(_) => "plugin_dependency_missing",
            Self::DependencyCycle(_) => "dependency_cycle",
            Self::AlreadyInstalled(_) => "already_installed",
            Self::NotInstalled(_) => "not_installed",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::HookFailed { .. } => "hook_failed",
            Self::EntrypointFailed { .. } => "entrypoint_failed",
            Self::CommandConflict { .. } => "command_conflict",
            Self::UnknownCommand(_) => "unknown_command",
            Self::RegistryLocked(_) => "registry_locked",
            Self::RegistryConflict { .. } => "registry_conflict",
            Self::RepositoryExists(_) => "repository_exists",
            Self::UnknownRepository(_) => "unknown_repository",
            Self::Archive(_) => "archive",
            Self::Template(_) => "template",
            Self::Git(_) => "git",
            Self::Http(_) => "http",
            Self::Config(_) => "config",
            Self::Fs(_) => "filesystem",
            Self::Io(_) => "io",
            Self::Yaml(_) => "yaml",
        }
    }

    /// Non-zero process exit status for the command dispatcher.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::MetadataMissing(_) => 10,
            Self::MetadataInvalid { .. } => 11,
            Self::SourceUnresolvable { .. } => 20,
            Self::RepositoryUnreachable { .. } => 21,
            Self::SystemDependencyMissing(_) => 30,
            Self::PluginDependencyMissing(_) => 31,
            Self::DependencyCycle(_) => 32,
            Self::AlreadyInstalled(_) => 40,
            Self::NotInstalled(_) => 41,
            Self::InvalidTransition { .. } => 42,
            Self::HookFailed { .. } => 50,
            Self::EntrypointFailed { .. } => 51,
            Self::CommandConflict { .. } | Self::UnknownCommand(_) => 52,
            Self::RegistryLocked(_) | Self::RegistryConflict { .. } => 60,
            Self::RepositoryExists(_) | Self::UnknownRepository(_) => 70,
            _ => 1,
        }
    }
}
