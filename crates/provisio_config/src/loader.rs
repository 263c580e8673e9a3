//! Property file loading.

use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::error::{ConfigError, ConfigResult};
use crate::models::{CommonProperties, EnvDepProperties};
use crate::validator::{PropertiesValidator, ValidationResult};

/// Default directory holding the property files.
pub const DEFAULT_CONF_DIR: &str = "conf";

/// File name of the shared properties.
pub const COMMON_PROPS_FILE: &str = "comm_props.yaml";

const ENV_PROPS_PREFIX: &str = "env_props.";
const ENV_PROPS_SUFFIX: &str = ".yaml";

/// File name of the properties for `env`.
pub fn env_props_file(env: &str) -> String {
    format!("{ENV_PROPS_PREFIX}{env}{ENV_PROPS_SUFFIX}")
}

/// Parse a YAML document into `T`, mapping every failure to a
/// [`ConfigError`] that names the file.
fn read_document<T: DeserializeOwned>(path: &Path) -> ConfigResult<T> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }

    debug!("Reading properties from {:?}", path);
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    serde_yaml::from_str(&content).map_err(|e| ConfigError::Schema {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

fn ensure_valid(path: &Path, result: ValidationResult) -> ConfigResult<()> {
    if result.valid {
        Ok(())
    } else {
        Err(ConfigError::Invalid {
            path: path.to_path_buf(),
            violations: result.errors,
        })
    }
}

impl EnvDepProperties {
    /// Load and validate an environment property file.
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let props: Self = read_document(path)?;
        ensure_valid(path, PropertiesValidator::validate_env(&props))?;
        Ok(props)
    }
}

impl CommonProperties {
    /// Load and validate the shared property file.
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let props: Self = read_document(path)?;
        ensure_valid(path, PropertiesValidator::validate_common(&props))?;
        Ok(props)
    }
}

/// Both property records for one deployment.
#[derive(Debug, Clone, PartialEq)]
pub struct DeploymentProperties {
    pub env: EnvDepProperties,
    pub common: CommonProperties,
}

/// Locates and loads property files inside a configuration directory.
#[derive(Debug, Clone)]
pub struct PropertiesLoader {
    conf_dir: PathBuf,
}

impl PropertiesLoader {
    pub fn new(conf_dir: impl Into<PathBuf>) -> Self {
        Self {
            conf_dir: conf_dir.into(),
        }
    }

    pub fn conf_dir(&self) -> &Path {
        &self.conf_dir
    }

    pub fn env_path(&self, env: &str) -> PathBuf {
        self.conf_dir.join(env_props_file(env))
    }

    pub fn common_path(&self) -> PathBuf {
        self.conf_dir.join(COMMON_PROPS_FILE)
    }

    pub fn load_env(&self, env: &str) -> ConfigResult<EnvDepProperties> {
        EnvDepProperties::load(self.env_path(env))
    }

    pub fn load_common(&self) -> ConfigResult<CommonProperties> {
        CommonProperties::load(self.common_path())
    }

    /// Load the environment file and then the shared file.
    pub fn load_pair(&self, env: &str) -> ConfigResult<DeploymentProperties> {
        let env_props = self.load_env(env)?;
        let common = self.load_common()?;
        info!("Loaded properties for environment '{}' from {:?}", env, self.conf_dir);
        Ok(DeploymentProperties {
            env: env_props,
            common,
        })
    }

    /// Environments that have a property file, sorted by name.
    pub fn environments(&self) -> Vec<String> {
        let mut envs: Vec<String> = WalkDir::new(&self.conf_dir)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter_map(|e| {
                let name = e.file_name().to_string_lossy().into_owned();
                name.strip_prefix(ENV_PROPS_PREFIX)
                    .and_then(|rest| rest.strip_suffix(ENV_PROPS_SUFFIX))
                    .filter(|env| !env.is_empty())
                    .map(str::to_string)
            })
            .collect();
        envs.sort();
        envs
    }
}

impl Default for PropertiesLoader {
    fn default() -> Self {
        Self::new(DEFAULT_CONF_DIR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_env_props_file_name() {
        assert_eq!(env_props_file("staging"), "env_props.staging.yaml");
    }

    #[test]
    fn test_missing_file() {
        let dir = tempdir().unwrap();
        let err = CommonProperties::load(dir.path().join("comm_props.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn test_invalid_yaml() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("comm_props.yaml");
        fs::write(&path, "product_prefix: [unclosed").unwrap();
        let err = CommonProperties::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Schema { .. }));
    }

    #[test]
    fn test_environments_listing() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("env_props.prod.yaml"), "").unwrap();
        fs::write(dir.path().join("env_props.dev.yaml"), "").unwrap();
        fs::write(dir.path().join("comm_props.yaml"), "").unwrap();
        fs::write(dir.path().join("notes.txt"), "").unwrap();

        let loader = PropertiesLoader::new(dir.path());
        assert_eq!(loader.environments(), vec!["dev", "prod"]);
    }
}
