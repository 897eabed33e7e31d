use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::harvest::{FileTypeFilter, SourceKind};

/// Name of the configuration file inside the config directory.
pub const CONFIG_FILE: &str = "config.toml";

// Define error types for config loading
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSer(String),
}

// Result type alias for config operations
pub type ConfigResult<T> = Result<T, ConfigError>;

// Config structs for config.toml
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Paths {
    pub download_directory: String,
    pub log_directory: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Http {
    pub discovery_timeout_secs: u64,
    pub fetch_timeout_secs: u64,
    pub user_agent: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Sources {
    pub google_api_endpoint: String,
    pub unsplash_endpoint: String,
    pub scrape_endpoint: String,
    pub scrape_denylist: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Run {
    pub default_source: SourceKind,
    pub default_count: usize,
    pub default_file_type: FileTypeFilter,
    pub categories: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Logging {
    pub log_level: String,
    pub log_format: String,
    pub log_to_terminal: bool,
    pub log_to_file: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub paths: Paths,
    pub http: Http,
    pub sources: Sources,
    pub run: Run,
    pub logging: Logging,
}

// Default implementation for AppConfig
impl Default for AppConfig {
    fn default() -> Self {
        Self {
            paths: Paths {
                download_directory: "./downloads".to_string(),
                log_directory: "./logs".to_string(),
            },
            http: Http {
                discovery_timeout_secs: 10,
                fetch_timeout_secs: 15,
                user_agent: "Mozilla/5.0".to_string(),
            },
            sources: Sources {
                google_api_endpoint: "https://www.googleapis.com/customsearch/v1".to_string(),
                unsplash_endpoint: "https://api.unsplash.com/search/photos".to_string(),
                scrape_endpoint: "https://www.google.com/search".to_string(),
                scrape_denylist: vec!["logo".to_string(), "sprite".to_string()],
            },
            run: Run {
                default_source: SourceKind::GoogleApi,
                default_count: 20,
                default_file_type: FileTypeFilter::Any,
                categories: vec![
                    "ထမင်းပေါင်း".to_string(),
                    "ကြာဇံချက်".to_string(),
                    "ခေါက်ဆွဲသုပ်".to_string(),
                    "မုန့်ဟင်းခါး".to_string(),
                    "ရှမ်းခေါက်ဆွဲ".to_string(),
                    "လက်ဖက်သုပ်".to_string(),
                    "အုန်းနို့ခေါက်ဆွဲ".to_string(),
                    "cats".to_string(),
                ],
            },
            logging: Logging {
                log_level: "info".to_string(),
                log_format: "line".to_string(),
                log_to_terminal: true,
                log_to_file: true,
            },
        }
    }
}

/// API credentials, read once from the environment at startup.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub google_api_key: Option<String>,
    pub google_cse_id: Option<String>,
    pub unsplash_access_key: Option<String>,
}

impl Credentials {
    pub const GOOGLE_API_KEY: &'static str = "GOOGLE_API_KEY";
    pub const GOOGLE_CSE_ID: &'static str = "GOOGLE_CSE_ID";
    pub const UNSPLASH_ACCESS_KEY: &'static str = "UNSPLASH_ACCESS_KEY";

    /// Loads `.env` if present, then reads the process environment.
    pub fn from_env() -> Self {
        match dotenvy::dotenv() {
            Ok(path) => info!("Loaded environment from {}", path.display()),
            Err(e) if e.not_found() => {}
            Err(e) => warn!("Failed to load .env file: {}", e),
        }

        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds credentials from any variable lookup. Blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let read = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
        Self {
            google_api_key: read(Self::GOOGLE_API_KEY),
            google_cse_id: read(Self::GOOGLE_CSE_ID),
            unsplash_access_key: read(Self::UNSPLASH_ACCESS_KEY),
        }
    }

    /// Names of the variables a source needs that are not set.
    pub fn missing_for(&self, source: SourceKind) -> Vec<&'static str> {
        let mut missing = Vec::new();
        match source {
            SourceKind::GoogleApi => {
                if self.google_api_key.is_none() {
                    missing.push(Self::GOOGLE_API_KEY);
                }
                if self.google_cse_id.is_none() {
                    missing.push(Self::GOOGLE_CSE_ID);
                }
            }
            SourceKind::Unsplash => {
                if self.unsplash_access_key.is_none() {
                    missing.push(Self::UNSPLASH_ACCESS_KEY);
                }
            }
            SourceKind::GoogleScrape => {}
        }
        missing
    }
}

// Config manager to handle the configuration file
pub struct ConfigManager {
    app_config: AppConfig,
    config_dir: PathBuf,
}

impl ConfigManager {
    // Create a new ConfigManager instance
    pub fn new(config_dir: impl AsRef<Path>) -> ConfigResult<Self> {
        let config_dir = config_dir.as_ref().to_path_buf();

        // Create the directory if it doesn't exist
        if !config_dir.exists() {
            info!("Creating config directory: {}", config_dir.display());
            fs::create_dir_all(&config_dir)?;
        }

        let config_path = config_dir.join(CONFIG_FILE);
        let app_config = if config_path.exists() {
            Self::load_app_config(&config_path)?
        } else {
            warn!("Config file not found: {}", config_path.display());
            Self::write_default_config(&config_path)?
        };

        Ok(Self {
            app_config,
            config_dir,
        })
    }

    // Load app config from config.toml, replacing it with defaults if it does not parse
    fn load_app_config(config_path: &Path) -> ConfigResult<AppConfig> {
        let content = fs::read_to_string(config_path)?;
        match toml::from_str(&content) {
            Ok(config) => Ok(config),
            Err(e) => {
                error!("Failed to parse {}: {}", CONFIG_FILE, e);
                info!("Backing up old config and creating new one with default values");

                if let Err(backup_err) = fs::rename(config_path, config_path.with_extension("toml.backup")) {
                    warn!("Failed to backup old config: {}", backup_err);
                }

                Self::write_default_config(config_path)
            }
        }
    }

    fn write_default_config(config_path: &Path) -> ConfigResult<AppConfig> {
        let default_config = AppConfig::default();
        let toml_string = toml::to_string_pretty(&default_config)
            .map_err(|e| ConfigError::TomlSer(e.to_string()))?;
        fs::write(config_path, toml_string)?;
        info!("Wrote default configuration to {}", config_path.display());

        Ok(default_config)
    }

    pub fn app_config(&self) -> &AppConfig {
        &self.app_config
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }
}

// Helper function to create a ConfigManager instance
pub fn init_config(config_dir: impl AsRef<Path>) -> ConfigResult<ConfigManager> {
    ConfigManager::new(config_dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn test_missing_config_is_created_with_defaults() {
        let dir = tempdir().unwrap();
        let manager = init_config(dir.path().join("config")).unwrap();

        let config = manager.app_config();
        assert_eq!(config.http.fetch_timeout_secs, 15);
        assert_eq!(config.http.discovery_timeout_secs, 10);
        assert_eq!(config.run.default_source, SourceKind::GoogleApi);
        assert!(manager.config_dir().join(CONFIG_FILE).exists());
    }

    #[test]
    fn test_existing_config_is_loaded() {
        let dir = tempdir().unwrap();
        let mut custom = AppConfig::default();
        custom.run.default_count = 7;
        custom.run.default_source = SourceKind::Unsplash;
        fs::write(dir.path().join(CONFIG_FILE), toml::to_string_pretty(&custom).unwrap()).unwrap();

        let config = init_config(dir.path()).unwrap().app_config().clone();
        assert_eq!(config.run.default_count, 7);
        assert_eq!(config.run.default_source, SourceKind::Unsplash);
    }

    #[test]
    fn test_valid_config_file_is_left_untouched() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        let mut custom = AppConfig::default();
        custom.http.fetch_timeout_secs = 30;
        let content = format!("# local overrides\n{}", toml::to_string_pretty(&custom).unwrap());
        fs::write(&path, &content).unwrap();

        let manager = init_config(dir.path()).unwrap();

        assert_eq!(manager.app_config().http.fetch_timeout_secs, 30);
        assert_eq!(fs::read_to_string(&path).unwrap(), content);
        assert!(!dir.path().join("config.toml.backup").exists());
    }

    #[test]
    fn test_corrupt_config_is_backed_up_and_replaced() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        fs::write(&path, "this is = = not toml").unwrap();

        let config = init_config(dir.path()).unwrap().app_config().clone();

        assert_eq!(config.run.default_count, 20);
        assert!(dir.path().join("config.toml.backup").exists());
        let rewritten: AppConfig = toml::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(rewritten.paths.download_directory, "./downloads");
    }

    #[test]
    fn test_credentials_treat_blank_as_missing() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("GOOGLE_API_KEY", "abc"),
            ("GOOGLE_CSE_ID", "  "),
        ]);
        let credentials = Credentials::from_lookup(|name| vars.get(name).map(|v| v.to_string()));

        assert_eq!(credentials.google_api_key.as_deref(), Some("abc"));
        assert_eq!(credentials.google_cse_id, None);
        assert_eq!(credentials.missing_for(SourceKind::GoogleApi), vec!["GOOGLE_CSE_ID"]);
        assert_eq!(credentials.missing_for(SourceKind::Unsplash), vec!["UNSPLASH_ACCESS_KEY"]);
        assert!(credentials.missing_for(SourceKind::GoogleScrape).is_empty());
    }
}
