//! Configuration types.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration, read from `$HANGAR_HOME/config.yaml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HangarConfig {
    /// Directory overrides.
    pub paths: PathsConfig,
    /// Repositories seeded into a fresh registry.
    pub repositories: Vec<RepositoryConfig>,
    /// Network limits for repository and archive fetches.
    pub network: NetworkConfig,
    /// Hook execution limits.
    pub hooks: HooksConfig,
    /// Registry store settings.
    pub registry: RegistryConfig,
}

impl Default for HangarConfig {
    fn default() -> Self {
        Self {
            paths: PathsConfig::default(),
            repositories: RepositoryConfig::defaults(),
            network: NetworkConfig::default(),
            hooks: HooksConfig::default(),
            registry: RegistryConfig::default(),
        }
    }
}

/// Optional directory overrides. Anything left unset derives from `home`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub home: Option<PathBuf>,
    pub plugins_dir: Option<PathBuf>,
    pub data_dir: Option<PathBuf>,
    pub cache_dir: Option<PathBuf>,
    pub catalog_dir: Option<PathBuf>,
}

impl PathsConfig {
    /// Resolve every directory against `home`.
    pub fn resolve(&self, home: impl AsRef<Path>) -> Layout {
        let home = self
            .home
            .clone()
            .unwrap_or_else(|| home.as_ref().to_path_buf());
        let plugins_dir = self
            .plugins_dir
            .clone()
            .unwrap_or_else(|| home.join("plugins"));
        let cache_dir = self.cache_dir.clone().unwrap_or_else(|| home.join("cache"));

        Layout {
            config_file: home.join("config.yaml"),
            registry_file: home.join("registry.yaml"),
            lock_file: home.join("registry.lock"),
            staging_dir: plugins_dir.join(".staging"),
            data_dir: self.data_dir.clone().unwrap_or_else(|| home.join("data")),
            repo_cache_dir: cache_dir.join("repos"),
            catalog_dir: self
                .catalog_dir
                .clone()
                .unwrap_or_else(|| home.join("catalog")),
            plugins_dir,
            cache_dir,
            home,
        }
    }
}

/// Fully resolved on-disk layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    pub home: PathBuf,
    pub config_file: PathBuf,
    pub registry_file: PathBuf,
    pub lock_file: PathBuf,
    pub plugins_dir: PathBuf,
    /// Lives under `plugins_dir` so publishing is a same-filesystem rename.
    pub staging_dir: PathBuf,
    pub data_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub repo_cache_dir: PathBuf,
    pub catalog_dir: PathBuf,
}

impl Layout {
    /// Installed directory for a plugin.
    pub fn plugin_dir(&self, name: &str) -> PathBuf {
        self.plugins_dir.join(name)
    }

    /// Private data directory for a plugin.
    pub fn plugin_data_dir(&self, name: &str) -> PathBuf {
        self.data_dir.join(name)
    }
}

/// Kind of remote catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepositoryKind {
    /// A git repository holding one plugin directory per top-level folder.
    Git,
    /// A YAML index listing descriptors and archive URLs.
    Index,
}

impl fmt::Display for RepositoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Git => write!(f, "git"),
            Self::Index => write!(f, "index"),
        }
    }
}

/// A configured repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryConfig {
    pub name: String,
    pub url: String,
    #[serde(default = "default_kind")]
    pub kind: RepositoryKind,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Lower values are searched first.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<u32>,
}

fn default_kind() -> RepositoryKind {
    RepositoryKind::Git
}

fn default_true() -> bool {
    true
}

impl RepositoryConfig {
    /// The two well-known repositories.
    pub fn defaults() -> Vec<Self> {
        vec![
            Self {
                name: "core".to_string(),
                url: "https://github.com/hangar-plugins/core.git".to_string(),
                kind: RepositoryKind::Git,
                enabled: true,
                priority: Some(0),
            },
            Self {
                name: "community".to_string(),
                url: "https://github.com/hangar-plugins/community.git".to_string(),
                kind: RepositoryKind::Git,
                enabled: true,
                priority: Some(10),
            },
        ]
    }
}

/// Network limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
}

impl NetworkConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 10,
            request_timeout_secs: 60,
        }
    }
}

/// Hook execution limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HooksConfig {
    pub timeout_secs: u64,
}

impl HooksConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for HooksConfig {
    fn default() -> Self {
        Self { timeout_secs: 300 }
    }
}

/// Registry store settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// How long a mutating operation waits for another process's lock.
    pub lock_timeout_secs: u64,
}

impl RegistryConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_secs)
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            lock_timeout_secs: 30,
        }
    }
}
