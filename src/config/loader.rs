//! Configuration Loader
//!
//! Builds a [`TriageConfig`] from layered sources, later layers winning:
//!
//! 1. built-in defaults
//! 2. an optional TOML file (`BUG_TRIAGE_CONFIG_PATH`, else `config/bug_triage.toml`)
//! 3. `BUG_TRIAGE__SECTION__FIELD` environment variables
//! 4. the legacy flat variables (`GITHUB_TOKEN`, `DB_HOST`, `RABBITMQ_PORT`, ...)
//!
//! `.env` is read into the process environment first when present.

use super::error::{ConfigResult, ConfigurationError};
use super::TriageConfig;
use config::{Config, Environment, File, FileFormat};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

pub const CONFIG_PATH_VAR: &str = "BUG_TRIAGE_CONFIG_PATH";
pub const DEFAULT_CONFIG_PATH: &str = "config/bug_triage.toml";
const ENV_PREFIX: &str = "BUG_TRIAGE";
const ENV_SEPARATOR: &str = "__";

/// Legacy variable -> configuration key, applied verbatim
const LEGACY_STRING_VARS: [(&str, &str); 8] = [
    ("GITHUB_TOKEN", "api.github_token"),
    ("DB_HOST", "database.host"),
    ("DB_NAME", "database.database"),
    ("DB_USERNAME", "database.username"),
    ("DB_PASSWORD", "database.password"),
    ("RABBITMQ_HOST", "message_queue.host"),
    ("RABBITMQ_USERNAME", "message_queue.username"),
    ("RABBITMQ_PASSWORD", "message_queue.password"),
];

const LEGACY_PORT_VARS: [(&str, &str); 2] = [
    ("DB_PORT", "database.port"),
    ("RABBITMQ_PORT", "message_queue.port"),
];

/// Where to read configuration from
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// TOML file to read; a missing file is an error only when `required`
    pub config_path: Option<PathBuf>,
    pub required: bool,
    /// Variables to read instead of the process environment
    pub vars: Option<HashMap<String, String>>,
    pub environment: Option<String>,
}

#[derive(Debug)]
pub struct ConfigManager {
    config: TriageConfig,
    environment: String,
    source_file: Option<PathBuf>,
}

impl ConfigManager {
    /// Load from `.env`, the configured TOML file and the process environment
    pub fn load() -> ConfigResult<Arc<ConfigManager>> {
        if let Ok(path) = dotenvy::dotenv() {
            debug!(path = %path.display(), "Loaded .env file");
        }

        let options = match std::env::var(CONFIG_PATH_VAR) {
            Ok(path) if !path.trim().is_empty() => LoadOptions {
                config_path: Some(PathBuf::from(path)),
                required: true,
                ..LoadOptions::default()
            },
            _ => LoadOptions {
                config_path: Some(PathBuf::from(DEFAULT_CONFIG_PATH)),
                required: false,
                ..LoadOptions::default()
            },
        };
        Self::load_with(options)
    }

    pub fn load_with(options: LoadOptions) -> ConfigResult<Arc<ConfigManager>> {
        let environment = options
            .environment
            .clone()
            .unwrap_or_else(crate::logging::get_environment);
        let vars = options
            .vars
            .clone()
            .unwrap_or_else(|| std::env::vars().collect());

        let source_file = match &options.config_path {
            Some(path) if path.exists() => Some(path.clone()),
            Some(path) if options.required => {
                return Err(ConfigurationError::config_file_not_found(path))
            }
            _ => None,
        };

        let config = Self::build(source_file.as_deref(), &vars)?;
        config.validate()?;

        debug!(
            "Configuration loaded: {}",
            serde_json::to_string(&config.sanitized())
                .unwrap_or_else(|_| "[serialization error]".to_string())
        );
        info!(
            environment = %environment,
            config_file = source_file.as_ref().map(|p| p.display().to_string()).as_deref(),
            database_host = %config.database.host,
            exchange = %config.message_queue.exchange,
            "Configuration loaded successfully"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment,
            source_file,
        }))
    }

    fn build(
        source_file: Option<&Path>,
        vars: &HashMap<String, String>,
    ) -> ConfigResult<TriageConfig> {
        let mut builder =
            Config::builder().add_source(Config::try_from(&TriageConfig::default())?);

        if let Some(path) = source_file {
            builder = builder.add_source(File::from(path).format(FileFormat::Toml).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator(ENV_SEPARATOR)
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("discovery.repositories")
                .source(Some(vars.clone().into_iter().collect())),
        );

        builder = apply_legacy_overrides(builder, vars)?;

        builder
            .build()?
            .try_deserialize::<TriageConfig>()
            .map_err(ConfigurationError::from)
    }

    pub fn config(&self) -> &TriageConfig {
        &self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    /// TOML file that contributed to this configuration, if any
    pub fn source_file(&self) -> Option<&Path> {
        self.source_file.as_deref()
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

type Builder = config::ConfigBuilder<config::builder::DefaultState>;

fn apply_legacy_overrides(
    mut builder: Builder,
    vars: &HashMap<String, String>,
) -> ConfigResult<Builder> {
    let present = |name: &str| vars.get(name).map(|v| v.trim()).filter(|v| !v.is_empty());

    for (var, key) in LEGACY_STRING_VARS {
        if let Some(value) = present(var) {
            builder = builder
                .set_override(key, value)
                .map_err(|e| ConfigurationError::environment_override_error(var, e))?;
        }
    }

    for (var, key) in LEGACY_PORT_VARS {
        if let Some(value) = present(var) {
            let port: u16 = value.parse().map_err(|_| {
                ConfigurationError::environment_override_error(
                    var,
                    format!("'{value}' is not a valid port"),
                )
            })?;
            builder = builder
                .set_override(key, i64::from(port))
                .map_err(|e| ConfigurationError::environment_override_error(var, e))?;
        }
    }

    if let Some(level) = present("LOG_LEVEL") {
        builder = builder
            .set_override("logging.level", level.to_lowercase())
            .map_err(|e| ConfigurationError::environment_override_error("LOG_LEVEL", e))?;
    }

    if let Some(repos) = present("GITHUB_REPOSITORIES") {
        let list: Vec<String> = repos
            .split(',')
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(str::to_string)
            .collect();
        builder = builder
            .set_override("discovery.repositories", list)
            .map_err(|e| ConfigurationError::environment_override_error("GITHUB_REPOSITORIES", e))?;
    }

    Ok(builder)
}
