//! Workflow settings.
//!
//! Loaded from `config/deal_workflow.toml` when present, then overridden by
//! `DEAL_WORKFLOW__*` environment variables, e.g.
//! `DEAL_WORKFLOW__WORKFLOW__GENERATED_PASSWORD_LENGTH=20`.
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::PathBuf;

const CONFIG_FILE: &str = "config/deal_workflow.toml";
const ENV_PREFIX: &str = "DEAL_WORKFLOW";

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct WorkflowConfig {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    #[serde(default = "default_generated_password_length")]
    pub generated_password_length: usize,
    #[serde(default = "default_min_password_length")]
    pub min_password_length: usize,
    #[serde(default = "default_min_username_length")]
    pub min_username_length: usize,
    #[serde(default = "default_max_report_attachments")]
    pub max_report_attachments: usize,
    #[serde(default = "default_max_conflict_retries")]
    pub max_conflict_retries: u32,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("deal_workflow.db")
}

fn default_generated_password_length() -> usize {
    16
}

fn default_min_password_length() -> usize {
    8
}

fn default_min_username_length() -> usize {
    3
}

fn default_max_report_attachments() -> usize {
    10
}

fn default_max_conflict_retries() -> u32 {
    3
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            generated_password_length: default_generated_password_length(),
            min_password_length: default_min_password_length(),
            min_username_length: default_min_username_length(),
            max_report_attachments: default_max_report_attachments(),
            max_conflict_retries: default_max_conflict_retries(),
        }
    }
}

impl WorkflowConfig {
    /// Load the `[workflow]` section from the config file and environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(CONFIG_FILE)
    }

    pub fn load_from(path: &str) -> Result<Self, ConfigError> {
        let settings = Config::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        match settings.get::<WorkflowConfig>("workflow") {
            Ok(cfg) => Ok(cfg),
            Err(ConfigError::NotFound(_)) => Ok(Self::default()),
            Err(e) => Err(e),
        }
    }
}
