use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::report::ReportFormat;

/// Largest `MaxFaces` value Rekognition accepts for `SearchFacesByImage`.
pub const MAX_FACES_LIMIT: u32 = 4096;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub aws: AwsConfig,
    pub storage: StorageConfig,
    pub collection: CollectionConfig,
    #[serde(default)]
    pub matching: MatchingConfig,
    #[serde(default)]
    pub report: ReportConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AwsConfig {
    #[serde(default = "default_region")]
    pub region: String,
    /// Override for both S3 and Rekognition (LocalStack, MinIO).
    #[serde(default)]
    pub endpoint_url: Option<String>,
    /// Named profile from the shared AWS config files. Unset means
    /// `AWS_PROFILE`, then `default`.
    #[serde(default)]
    pub profile: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for AwsConfig {
    fn default() -> Self {
        Self {
            region: default_region(),
            endpoint_url: None,
            profile: None,
            request_timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_region() -> String {
    std::env::var("AWS_REGION")
        .or_else(|_| std::env::var("AWS_DEFAULT_REGION"))
        .ok()
        .filter(|r| !r.is_empty())
        .unwrap_or_else(|| "us-east-2".to_string())
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    pub bucket: String,
    #[serde(default = "default_base_prefix")]
    pub base_prefix: String,
    #[serde(default = "default_query_prefix")]
    pub query_prefix: String,
}

fn default_base_prefix() -> String {
    "base_football/".to_string()
}
fn default_query_prefix() -> String {
    "gametime_football/".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct CollectionConfig {
    pub id: String,
    /// Delete and recreate the collection before populating it.
    #[serde(default)]
    pub recreate: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MatchingConfig {
    #[serde(default = "default_threshold")]
    pub similarity_threshold: f64,
    #[serde(default = "default_max_matches")]
    pub max_matches: u32,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: default_threshold(),
            max_matches: default_max_matches(),
        }
    }
}

fn default_threshold() -> f64 {
    70.0
}
fn default_max_matches() -> u32 {
    70
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReportConfig {
    #[serde(default = "default_report_path")]
    pub path: PathBuf,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            path: default_report_path(),
        }
    }
}

fn default_report_path() -> PathBuf {
    PathBuf::from("./matching_results.xlsx")
}

/// Values from `facematch run` flags that take precedence over the file.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub bucket: Option<String>,
    pub collection: Option<String>,
    pub threshold: Option<f64>,
    pub max_matches: Option<u32>,
    pub output: Option<PathBuf>,
    pub recreate_collection: bool,
}

impl Config {
    /// Apply CLI overrides and re-validate.
    pub fn with_overrides(mut self, overrides: Overrides) -> Result<Self> {
        if let Some(bucket) = overrides.bucket {
            self.storage.bucket = bucket;
        }
        if let Some(id) = overrides.collection {
            self.collection.id = id;
        }
        if let Some(threshold) = overrides.threshold {
            self.matching.similarity_threshold = threshold;
        }
        if let Some(max) = overrides.max_matches {
            self.matching.max_matches = max;
        }
        if let Some(path) = overrides.output {
            self.report.path = path;
        }
        if overrides.recreate_collection {
            self.collection.recreate = true;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.aws.region.trim().is_empty() {
            bail!("aws.region must not be empty");
        }
        if matches!(self.aws.profile.as_deref(), Some(p) if p.trim().is_empty()) {
            bail!("aws.profile must not be empty when set");
        }
        if self.aws.request_timeout_secs == 0 {
            bail!("aws.request_timeout_secs must be > 0");
        }

        if self.storage.bucket.trim().is_empty() {
            bail!("storage.bucket must not be empty");
        }

        let id = &self.collection.id;
        if id.is_empty() || id.len() > 255 {
            bail!("collection.id must be 1-255 characters long");
        }
        if let Some(bad) = id
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-')))
        {
            bail!(
                "collection.id '{}' contains invalid character '{}' (allowed: a-z A-Z 0-9 _ . -)",
                id,
                bad
            );
        }

        if !(0.0..=100.0).contains(&self.matching.similarity_threshold) {
            bail!("matching.similarity_threshold must be in [0, 100]");
        }
        if self.matching.max_matches == 0 || self.matching.max_matches > MAX_FACES_LIMIT {
            bail!("matching.max_matches must be in 1..={}", MAX_FACES_LIMIT);
        }

        ReportFormat::from_path(&self.report.path)?;

        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    config.validate()?;
    Ok(config)
}
