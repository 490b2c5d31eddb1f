//! Configuration loading.
//!
//! billwatch reads a single YAML file once at startup. The file is located,
//! in order, by an explicit path (`--config`), the `GCLOUD_CONFIG_FILE`
//! environment variable, or `<config_dir>/billwatch/config.yaml`.
//!
//! ```yaml
//! bigquery:
//!   project_id: my-project
//!   billing_table_name: my-project.billing.gcp_billing_export_v1_0000
//! slack:
//!   api_key: xoxb-0000
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{BillingError, Result};

/// Environment variable holding the config file path.
pub const CONFIG_FILE_ENV: &str = "GCLOUD_CONFIG_FILE";

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillwatchConfig {
    /// BigQuery connection and billing table settings.
    pub bigquery: BigQueryConfig,

    /// Slack notification settings. Only `monitor` needs them.
    #[serde(default)]
    pub slack: Option<SlackConfig>,
}

/// BigQuery settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BigQueryConfig {
    /// Project the query jobs are billed to.
    #[serde(default)]
    pub project_id: String,

    /// Fully qualified billing export table (`project.dataset.table`).
    #[serde(default)]
    pub billing_table_name: String,

    /// Environment variable holding an OAuth2 access token.
    #[serde(default = "default_access_token_env")]
    pub access_token_env: String,

    /// API base URL (overridable for tests).
    #[serde(default = "default_bigquery_url")]
    pub api_base_url: String,
}

/// Slack settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlackConfig {
    /// Bot token used for `chat.postMessage`.
    #[serde(default)]
    pub api_key: String,

    /// Destination channel for alerts.
    #[serde(default = "default_channel")]
    pub channel: String,

    /// Display name of the posting bot.
    #[serde(default = "default_username")]
    pub username: String,

    /// Emoji used as the bot avatar.
    #[serde(default = "default_icon_emoji")]
    pub icon_emoji: String,

    /// API base URL (overridable for tests).
    #[serde(default = "default_slack_url")]
    pub api_base_url: String,
}

fn default_access_token_env() -> String {
    "GOOGLE_OAUTH_ACCESS_TOKEN".to_string()
}

fn default_bigquery_url() -> String {
    "https://bigquery.googleapis.com".to_string()
}

fn default_channel() -> String {
    "#notifications".to_string()
}

fn default_username() -> String {
    "billwatch".to_string()
}

fn default_icon_emoji() -> String {
    ":robot_face:".to_string()
}

fn default_slack_url() -> String {
    "https://slack.com".to_string()
}

impl Default for BigQueryConfig {
    fn default() -> Self {
        Self {
            project_id: String::new(),
            billing_table_name: String::new(),
            access_token_env: default_access_token_env(),
            api_base_url: default_bigquery_url(),
        }
    }
}

impl Default for SlackConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            channel: default_channel(),
            username: default_username(),
            icon_emoji: default_icon_emoji(),
            api_base_url: default_slack_url(),
        }
    }
}

impl BillwatchConfig {
    /// Parse and validate a config from YAML text. `path` is used for errors.
    pub fn from_yaml(yaml: &str, path: &Path) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml).map_err(|e| BillingError::ConfigInvalid {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load a config file from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let yaml = std::fs::read_to_string(path)
            .map_err(|e| BillingError::config_not_found_with_source(path, e))?;
        let config = Self::from_yaml(&yaml, path)?;
        tracing::debug!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Load from an explicit path, or from the resolved default location.
    pub fn load_from(explicit: Option<&Path>) -> Result<Self> {
        let path = resolve_config_path(explicit)?;
        Self::load(&path)
    }

    fn validate(&self) -> Result<()> {
        if self.bigquery.billing_table_name.trim().is_empty() {
            return Err(BillingError::ConfigMissingField {
                field: "bigquery.billing_table_name".into(),
            });
        }
        Ok(())
    }

    /// Slack settings, failing if the section or its token is absent.
    pub fn require_slack(&self) -> Result<&SlackConfig> {
        match &self.slack {
            Some(slack) if !slack.api_key.trim().is_empty() => Ok(slack),
            Some(_) => Err(BillingError::ConfigMissingField {
                field: "slack.api_key".into(),
            }),
            None => Err(BillingError::ConfigMissingField {
                field: "slack".into(),
            }),
        }
    }
}

/// Resolve which config file to read.
pub fn resolve_config_path(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }
    if let Ok(path) = std::env::var(CONFIG_FILE_ENV) {
        if !path.trim().is_empty() {
            return Ok(PathBuf::from(path));
        }
    }
    dirs::config_dir()
        .map(|dir| dir.join("billwatch").join("config.yaml"))
        .ok_or_else(|| BillingError::internal("could not determine the user config directory"))
}
