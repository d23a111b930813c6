//! Configuration file loading and parsing.

use crate::env::{vars, EnvError, Environment};
use crate::types::{HangarConfig, Layout};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Config loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {path}")]
    NotFound { path: PathBuf },

    #[error("failed to read config: {source}")]
    ReadError {
        #[from]
        source: std::io::Error,
    },

    #[error("invalid YAML at line {}: {message}", line.map(|l| l.to_string()).unwrap_or_else(|| "unknown".to_string()))]
    ParseError { line: Option<usize>, message: String },

    #[error("validation error: {message}")]
    ValidationError { message: String },

    #[error("environment variable not found: {var}")]
    EnvVarNotFound { var: String },

    #[error(transparent)]
    Env(#[from] EnvError),
}

/// Configuration loader rooted at a Hangar home directory.
pub struct ConfigLoader {
    home: PathBuf,
}

impl ConfigLoader {
    /// Create a loader for the given home directory.
    pub fn new(home: impl AsRef<Path>) -> Self {
        Self {
            home: home.as_ref().to_path_buf(),
        }
    }

    /// Create a loader from `$HANGAR_HOME` (or `~/.hangar`), loading any
    /// `.env` file found there first.
    pub fn from_env() -> Result<Self, ConfigError> {
        let home = Environment::home_dir()?;
        Environment::init(Some(&home))?;
        Ok(Self::new(home))
    }

    /// The home directory this loader reads from.
    pub fn home(&self) -> &Path {
        &self.home
    }

    /// Path of the config file.
    pub fn config_path(&self) -> PathBuf {
        self.home.join("config.yaml")
    }

    /// Load configuration from `<home>/config.yaml`, falling back to
    /// defaults when the file does not exist.
    ///
    /// Directory overrides from the environment take precedence over the file.
    pub fn load(&self) -> Result<HangarConfig, ConfigError> {
        let config_path = self.config_path();

        let mut config = if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path)?;
            let expanded = self.expand_env_vars(&contents)?;
            if expanded.trim().is_empty() {
                HangarConfig::default()
            } else {
                serde_yaml::from_str(&expanded).map_err(|e| ConfigError::ParseError {
                    line: e.location().map(|l| l.line()),
                    message: e.to_string(),
                })?
            }
        } else {
            HangarConfig::default()
        };

        self.apply_env_overrides(&mut config);
        self.validate(&config)?;
        Ok(config)
    }

    /// Resolve the on-disk layout for a loaded config.
    pub fn layout(&self, config: &HangarConfig) -> Layout {
        config.paths.resolve(&self.home)
    }

    fn apply_env_overrides(&self, config: &mut HangarConfig) {
        let paths = &mut config.paths;
        for (var, slot) in [
            (vars::HANGAR_PLUGINS_DIR, &mut paths.plugins_dir),
            (vars::HANGAR_DATA_DIR, &mut paths.data_dir),
            (vars::HANGAR_CACHE_DIR, &mut paths.cache_dir),
            (vars::HANGAR_CATALOG_DIR, &mut paths.catalog_dir),
        ] {
            if let Some(path) = Environment::get_path(var) {
                *slot = Some(path);
            }
        }
    }

    /// Expand environment variables in the form `${VAR}` or `${VAR:-default}`.
    fn expand_env_vars(&self, content: &str) -> Result<String, ConfigError> {
        let re = regex::Regex::new(r"\$\{([^}:]+)(?::-([^}]*))?\}").map_err(|e| {
            ConfigError::ParseError {
                line: None,
                message: e.to_string(),
            }
        })?;

        let mut result = content.to_string();
        for cap in re.captures_iter(content) {
            let full_match = &cap[0];
            let var_name = &cap[1];
            let default = cap.get(2).map(|m| m.as_str());

            let value = match std::env::var(var_name) {
                Ok(v) => v,
                Err(_) => match default {
                    Some(d) => d.to_string(),
                    None => {
                        return Err(ConfigError::EnvVarNotFound {
                            var: var_name.to_string(),
                        })
                    }
                },
            };

            result = result.replace(full_match, &value);
        }

        Ok(result)
    }

    /// Validate configuration values.
    fn validate(&self, config: &HangarConfig) -> Result<(), ConfigError> {
        let zero = |field: &str| ConfigError::ValidationError {
            message: format!("{} must be greater than 0", field),
        };

        if config.network.connect_timeout_secs == 0 {
            return Err(zero("network.connect_timeout_secs"));
        }
        if config.network.request_timeout_secs == 0 {
            return Err(zero("network.request_timeout_secs"));
        }
        if config.hooks.timeout_secs == 0 {
            return Err(zero("hooks.timeout_secs"));
        }
        if config.registry.lock_timeout_secs == 0 {
            return Err(zero("registry.lock_timeout_secs"));
        }

        let mut seen = HashSet::new();
        for repo in &config.repositories {
            if repo.name.trim().is_empty() {
                return Err(ConfigError::ValidationError {
                    message: "repository name must not be empty".to_string(),
                });
            }
            if repo.url.trim().is_empty() {
                return Err(ConfigError::ValidationError {
                    message: format!("repository '{}' has an empty url", repo.name),
                });
            }
            if !seen.insert(repo.name.as_str()) {
                return Err(ConfigError::ValidationError {
                    message: format!("duplicate repository name '{}'", repo.name),
                });
            }
        }

        Ok(())
    }

    /// Save configuration to `<home>/config.yaml`.
    pub fn save(&self, config: &HangarConfig) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.home)?;

        let yaml = serde_yaml::to_string(config).map_err(|e| ConfigError::ParseError {
            line: None,
            message: e.to_string(),
        })?;

        std::fs::write(self.config_path(), yaml)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RepositoryKind;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_load_defaults_when_no_file() {
        let dir = tempdir().unwrap();
        let loader = ConfigLoader::new(dir.path());
        let config = loader.load().unwrap();
        assert_eq!(config.repositories.len(), 2);
        assert_eq!(config.repositories[0].name, "core");
        assert_eq!(config.hooks.timeout_secs, 300);
    }

    #[test]
    fn test_load_config_from_yaml_file() {
        let dir = tempdir().unwrap();
        let config_content = r#"
repositories:
  - name: team
    url: file:///srv/hangar/index.yaml
    kind: index
  - name: core
    url: https://example.com/core.git
network:
  request_timeout_secs: 5
hooks:
  timeout_secs: 20
"#;
        fs::write(dir.path().join("config.yaml"), config_content).unwrap();

        let config = ConfigLoader::new(dir.path()).load().unwrap();

        assert_eq!(config.repositories.len(), 2);
        assert_eq!(config.repositories[0].kind, RepositoryKind::Index);
        assert!(config.repositories[0].enabled);
        assert_eq!(config.repositories[1].kind, RepositoryKind::Git);
        assert_eq!(config.network.request_timeout_secs, 5);
        assert_eq!(config.network.connect_timeout_secs, 10);
        assert_eq!(config.hooks.timeout_secs, 20);
        assert_eq!(config.registry.lock_timeout_secs, 30);
    }

    #[test]
    fn test_empty_file_is_defaults() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("config.yaml"), "\n").unwrap();
        let config = ConfigLoader::new(dir.path()).load().unwrap();
        assert_eq!(config.repositories.len(), 2);
    }

    #[test]
    fn test_env_var_expansion() {
        std::env::set_var("HANGAR_TEST_EXPAND", "test_value");
        let loader = ConfigLoader::new(".");
        let result = loader.expand_env_vars("key: ${HANGAR_TEST_EXPAND}").unwrap();
        assert_eq!(result, "key: test_value");
        std::env::remove_var("HANGAR_TEST_EXPAND");
    }

    #[test]
    fn test_env_var_default() {
        let loader = ConfigLoader::new(".");
        let result = loader
            .expand_env_vars("key: ${HANGAR_NONEXISTENT:-default}")
            .unwrap();
        assert_eq!(result, "key: default");
    }

    #[test]
    fn test_env_var_missing_error() {
        let loader = ConfigLoader::new(".");
        match loader.expand_env_vars("key: ${HANGAR_MISSING_VAR}").unwrap_err() {
            ConfigError::EnvVarNotFound { var } => assert_eq!(var, "HANGAR_MISSING_VAR"),
            other => panic!("Expected EnvVarNotFound error, got {other}"),
        }
    }

    #[test]
    fn test_validation_errors() {
        let loader = ConfigLoader::new(".");

        let mut config = HangarConfig::default();
        config.hooks.timeout_secs = 0;
        match loader.validate(&config).unwrap_err() {
            ConfigError::ValidationError { message } => assert!(message.contains("hooks")),
            other => panic!("Expected ValidationError, got {other}"),
        }

        let mut config = HangarConfig::default();
        config.repositories[1].name = "core".to_string();
        match loader.validate(&config).unwrap_err() {
            ConfigError::ValidationError { message } => assert!(message.contains("duplicate")),
            other => panic!("Expected ValidationError, got {other}"),
        }

        let mut config = HangarConfig::default();
        config.repositories[0].name = " ".to_string();
        assert!(loader.validate(&config).is_err());

        let mut config = HangarConfig::default();
        config.registry.lock_timeout_secs = 0;
        assert!(loader.validate(&config).is_err());
    }

    #[test]
    fn test_parse_error_with_line_number() {
        let dir = tempdir().unwrap();
        let bad_yaml = r#"
hooks:
  timeout_secs: 10
  invalid_yaml: [unclosed
"#;
        fs::write(dir.path().join("config.yaml"), bad_yaml).unwrap();

        match ConfigLoader::new(dir.path()).load().unwrap_err() {
            ConfigError::ParseError { line, .. } => assert!(line.is_some()),
            other => panic!("Expected ParseError with line number, got {other}"),
        }
    }

    #[test]
    fn test_save_config() {
        let dir = tempdir().unwrap();
        let loader = ConfigLoader::new(dir.path().join("home"));

        let mut config = HangarConfig::default();
        config.hooks.timeout_secs = 42;
        config.repositories.truncate(1);
        loader.save(&config).unwrap();

        assert!(loader.config_path().exists());
        let loaded = loader.load().unwrap();
        assert_eq!(loaded.hooks.timeout_secs, 42);
        assert_eq!(loaded.repositories.len(), 1);
    }

    #[test]
    fn test_layout_uses_home() {
        let loader = ConfigLoader::new("/srv/hangar");
        let mut config = HangarConfig::default();
        config.paths.catalog_dir = Some(PathBuf::from("/opt/catalog"));

        let layout = loader.layout(&config);
        assert_eq!(layout.registry_file, PathBuf::from("/srv/hangar/registry.yaml"));
        assert_eq!(layout.staging_dir, PathBuf::from("/srv/hangar/plugins/.staging"));
        assert_eq!(layout.plugin_data_dir("a"), PathBuf::from("/srv/hangar/data/a"));
        assert_eq!(layout.repo_cache_dir, PathBuf::from("/srv/hangar/cache/repos"));
        assert_eq!(layout.catalog_dir, PathBuf::from("/opt/catalog"));
    }
}
