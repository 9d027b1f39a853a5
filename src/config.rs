//! TOML configuration parsing and validation.
//!
//! ```toml
//! [dataset]
//! base_url = "https://dialog-assets.s3.ap-southeast-2.amazonaws.com"
//! path = "excel/output_filled.xlsx"
//! timeout_secs = 30
//! max_age_secs = 86400
//! schema = "auto"
//!
//! [checkpoint]
//! path = "./data/checkpoint.json"
//!
//! [db]
//! path = "./data/dlg.sqlite"
//!
//! [inference]
//! relay_url = "https://relay.example.com/"
//!
//! [server]
//! bind = "127.0.0.1:7340"
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::schema::SchemaSetting;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub dataset: DatasetConfig,
    #[serde(default)]
    pub checkpoint: CheckpointConfig,
    pub db: DbConfig,
    #[serde(default)]
    pub inference: Option<InferenceConfig>,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatasetConfig {
    pub base_url: String,
    #[serde(default = "default_dataset_path")]
    pub path: String,
    #[serde(default = "default_dataset_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_age")]
    pub max_age_secs: u64,
    #[serde(default = "default_schema")]
    pub schema: String,
    #[serde(default)]
    pub signing: Option<SigningConfig>,
}

fn default_dataset_path() -> String {
    "excel/output_filled.xlsx".to_string()
}
fn default_dataset_timeout() -> u64 {
    30
}
fn default_max_age() -> u64 {
    86_400
}
fn default_schema() -> String {
    "auto".to_string()
}

impl DatasetConfig {
    /// The configured schema layout; only valid after [`load_config`] validation.
    pub fn schema_setting(&self) -> SchemaSetting {
        SchemaSetting::parse(&self.schema).unwrap_or(SchemaSetting::Auto)
    }
}

/// AWS Signature V4 settings for private buckets.
#[derive(Debug, Deserialize, Clone)]
pub struct SigningConfig {
    pub region: String,
    #[serde(default = "default_service")]
    pub service: String,
}

fn default_service() -> String {
    "s3".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct CheckpointConfig {
    #[serde(default = "default_checkpoint_path")]
    pub path: PathBuf,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            path: default_checkpoint_path(),
        }
    }
}

fn default_checkpoint_path() -> PathBuf {
    PathBuf::from("./data/checkpoint.json")
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct InferenceConfig {
    pub relay_url: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_inference_timeout")]
    pub timeout_secs: u64,
}

fn default_max_retries() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    1000
}
fn default_inference_timeout() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7340".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config = parse_config(&content)?;
    Ok(config)
}

/// Parse and validate configuration from a TOML string.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    if config.dataset.base_url.trim().is_empty() {
        anyhow::bail!("dataset.base_url must not be empty");
    }
    if !config.dataset.base_url.starts_with("http://")
        && !config.dataset.base_url.starts_with("https://")
    {
        anyhow::bail!(
            "dataset.base_url must be an http(s) URL, got '{}'",
            config.dataset.base_url
        );
    }
    if config.dataset.timeout_secs == 0 {
        anyhow::bail!("dataset.timeout_secs must be > 0");
    }
    if config.dataset.max_age_secs == 0 {
        anyhow::bail!("dataset.max_age_secs must be > 0");
    }
    if SchemaSetting::parse(&config.dataset.schema).is_none() {
        anyhow::bail!(
            "Unknown dataset.schema: '{}'. Must be auto, legacy, or tagged.",
            config.dataset.schema
        );
    }
    if let Some(ref signing) = config.dataset.signing {
        if signing.region.trim().is_empty() {
            anyhow::bail!("dataset.signing.region must not be empty");
        }
    }

    if let Some(ref inference) = config.inference {
        if inference.relay_url.trim().is_empty() {
            anyhow::bail!("inference.relay_url must not be empty");
        }
        if inference.timeout_secs == 0 {
            anyhow::bail!("inference.timeout_secs must be > 0");
        }
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[dataset]
base_url = "https://bucket.s3.ap-southeast-2.amazonaws.com"

[db]
path = "./data/dlg.sqlite"
"#;

    #[test]
    fn minimal_config_fills_defaults() {
        let cfg = parse_config(MINIMAL).unwrap();
        assert_eq!(cfg.dataset.path, "excel/output_filled.xlsx");
        assert_eq!(cfg.dataset.timeout_secs, 30);
        assert_eq!(cfg.dataset.max_age_secs, 86_400);
        assert_eq!(cfg.dataset.schema_setting(), SchemaSetting::Auto);
        assert_eq!(cfg.checkpoint.path, PathBuf::from("./data/checkpoint.json"));
        assert_eq!(cfg.server.bind, "127.0.0.1:7340");
        assert!(cfg.inference.is_none());
        assert!(cfg.dataset.signing.is_none());
    }

    #[test]
    fn inference_defaults() {
        let content = format!("{}\n[inference]\nrelay_url = \"http://localhost:9000/\"\n", MINIMAL);
        let cfg = parse_config(&content).unwrap();
        let inf = cfg.inference.unwrap();
        assert_eq!(inf.max_retries, 3);
        assert_eq!(inf.base_delay_ms, 1000);
        assert_eq!(inf.timeout_secs, 60);
    }

    #[test]
    fn rejects_unknown_schema() {
        let content = MINIMAL.replace(
            "[db]",
            "schema = \"v3\"\n\n[db]",
        );
        let err = parse_config(&content).unwrap_err();
        assert!(err.to_string().contains("dataset.schema"));
    }

    #[test]
    fn rejects_zero_max_age() {
        let content = MINIMAL.replace("[db]", "max_age_secs = 0\n\n[db]");
        assert!(parse_config(&content).is_err());
    }

    #[test]
    fn rejects_non_http_base_url() {
        let content = MINIMAL.replace("https://", "ftp://");
        assert!(parse_config(&content).is_err());
    }

    #[test]
    fn pinned_schema_is_parsed() {
        let content = MINIMAL.replace("[db]", "schema = \"tagged\"\n\n[db]");
        let cfg = parse_config(&content).unwrap();
        assert_eq!(cfg.dataset.schema_setting(), SchemaSetting::Tagged);
    }
}
