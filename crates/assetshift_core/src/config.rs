use std::env;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_INPUT_MANIFEST: &str = "cloudinary-upload.csv";
pub const DEFAULT_OUTPUT_MANIFEST: &str = "cloudinary-upload.cleaned.csv";
pub const DEFAULT_MAPPING_FILE: &str = "cloudinary-map.json";
pub const DEFAULT_REPORT_FILE: &str = "cloudinary-replacements-report.json";
pub const DEFAULT_UNMIGRATED_FILE: &str = "unmigrated-urls.txt";
pub const DEFAULT_ASSET_DIR: &str = "public";
pub const DEFAULT_LEGACY_HOST: &str = "framerusercontent.com";
pub const DEFAULT_DELIVERY_HOST: &str = "res.cloudinary.com";
pub const DEFAULT_LEGACY_URL_PATTERN: &str =
    r#"https?://framerusercontent\.com/(?:images|assets)/[^\s"'<>)]*"#;
pub const DEFAULT_EXTENSIONS: &[&str] = &["html", "json"];
pub const DEFAULT_SWEEP_DOMAINS: &[&str] = &["framerusercontent.com", "framerstatic.com"];

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct MigrationConfig {
    #[serde(default)]
    pub migration: MigrationSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct MigrationSection {
    pub keep_query_params: Option<bool>,
    pub input_manifest: Option<String>,
    pub output_manifest: Option<String>,
    pub mapping_file: Option<String>,
    pub report_file: Option<String>,
    pub unmigrated_file: Option<String>,
    pub asset_dir: Option<String>,
    pub legacy_host: Option<String>,
    pub delivery_host: Option<String>,
    pub legacy_url_pattern: Option<String>,
    #[serde(default)]
    pub extensions: Vec<String>,
    #[serde(default)]
    pub sweep_domains: Vec<String>,
}

impl MigrationConfig {
    /// Whether normalization keeps (sorted) query parameters. Dropping
    /// them collapses every sizing variant onto the original URL.
    pub fn keep_query_params(&self) -> bool {
        if let Ok(value) = env::var("ASSETSHIFT_KEEP_QUERY_PARAMS") {
            let trimmed = value.trim();
            if !trimmed.is_empty() {
                return trimmed == "1" || trimmed.eq_ignore_ascii_case("true");
            }
        }
        self.migration.keep_query_params.unwrap_or(true)
    }

    pub fn input_manifest(&self) -> String {
        resolve_string(
            "ASSETSHIFT_INPUT_MANIFEST",
            &self.migration.input_manifest,
            DEFAULT_INPUT_MANIFEST,
        )
    }

    pub fn output_manifest(&self) -> String {
        resolve_string(
            "ASSETSHIFT_OUTPUT_MANIFEST",
            &self.migration.output_manifest,
            DEFAULT_OUTPUT_MANIFEST,
        )
    }

    pub fn mapping_file(&self) -> String {
        resolve_string(
            "ASSETSHIFT_MAPPING_FILE",
            &self.migration.mapping_file,
            DEFAULT_MAPPING_FILE,
        )
    }

    pub fn report_file(&self) -> String {
        resolve_string(
            "ASSETSHIFT_REPORT_FILE",
            &self.migration.report_file,
            DEFAULT_REPORT_FILE,
        )
    }

    pub fn unmigrated_file(&self) -> String {
        resolve_string(
            "ASSETSHIFT_UNMIGRATED_FILE",
            &self.migration.unmigrated_file,
            DEFAULT_UNMIGRATED_FILE,
        )
    }

    pub fn asset_dir(&self) -> String {
        resolve_string(
            "ASSETSHIFT_ASSET_DIR",
            &self.migration.asset_dir,
            DEFAULT_ASSET_DIR,
        )
    }

    pub fn legacy_host(&self) -> String {
        resolve_string(
            "ASSETSHIFT_LEGACY_HOST",
            &self.migration.legacy_host,
            DEFAULT_LEGACY_HOST,
        )
    }

    pub fn delivery_host(&self) -> String {
        resolve_string(
            "ASSETSHIFT_DELIVERY_HOST",
            &self.migration.delivery_host,
            DEFAULT_DELIVERY_HOST,
        )
    }

    /// The text-scan pattern is an external contract, not semantics the
    /// rewriter owns; it is overridable but never adjusted at runtime.
    pub fn legacy_url_pattern(&self) -> String {
        resolve_string(
            "ASSETSHIFT_LEGACY_URL_PATTERN",
            &self.migration.legacy_url_pattern,
            DEFAULT_LEGACY_URL_PATTERN,
        )
    }

    /// Extension filter for the rewriter, lowercased and without dots.
    pub fn extensions(&self) -> Vec<String> {
        if !self.migration.extensions.is_empty() {
            return self
                .migration
                .extensions
                .iter()
                .map(|ext| ext.trim_start_matches('.').to_ascii_lowercase())
                .collect();
        }
        DEFAULT_EXTENSIONS
            .iter()
            .map(|ext| (*ext).to_string())
            .collect()
    }

    /// Legacy-provider domains the residual sweep greps for.
    pub fn sweep_domains(&self) -> Vec<String> {
        if !self.migration.sweep_domains.is_empty() {
            return self.migration.sweep_domains.clone();
        }
        DEFAULT_SWEEP_DOMAINS
            .iter()
            .map(|domain| (*domain).to_string())
            .collect()
    }
}

fn resolve_string(env_key: &str, configured: &Option<String>, default: &str) -> String {
    if let Ok(value) = env::var(env_key) {
        let trimmed = value.trim().to_string();
        if !trimmed.is_empty() {
            return trimmed;
        }
    }
    configured
        .clone()
        .unwrap_or_else(|| default.to_string())
}

/// Load and parse a MigrationConfig from a TOML file. Returns default if
/// the file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<MigrationConfig> {
    if !config_path.exists() {
        return Ok(MigrationConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: MigrationConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}
