use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::config::{DEFAULT_MAPPING_FILE, MigrationConfig};

pub const CONFIG_FILENAME: &str = "assetshift.toml";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueSource {
    Flag,
    Env,
    Heuristic,
    Default,
}

impl ValueSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Flag => "flag",
            Self::Env => "env",
            Self::Heuristic => "heuristic",
            Self::Default => "default",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PathOverrides {
    pub project_root: Option<PathBuf>,
    pub config: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ResolutionContext {
    pub cwd: PathBuf,
}

impl ResolutionContext {
    pub fn from_process() -> Result<Self> {
        let cwd = env::current_dir().context("failed to read current directory")?;
        Ok(Self { cwd })
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedPaths {
    pub project_root: PathBuf,
    pub config_path: PathBuf,
    pub root_source: ValueSource,
    pub config_source: ValueSource,
}

impl ResolvedPaths {
    pub fn diagnostics(&self) -> String {
        format!(
            "project_root={} ({})\nconfig_path={} ({})",
            normalize_for_display(&self.project_root),
            self.root_source.as_str(),
            normalize_for_display(&self.config_path),
            self.config_source.as_str(),
        )
    }

    /// Resolve a configured (possibly relative) file path against the
    /// project root.
    pub fn file(&self, configured: &str) -> PathBuf {
        absolutize_from_project(Path::new(configured), &self.project_root)
    }
}

#[derive(Debug, Clone)]
pub struct RuntimeStatus {
    pub project_root_exists: bool,
    pub config_exists: bool,
    pub mapping_exists: bool,
    pub input_manifest_exists: bool,
    pub asset_dir_exists: bool,
    pub mapping_entries: Option<usize>,
    pub warnings: Vec<String>,
}

pub fn resolve_paths(
    context: &ResolutionContext,
    overrides: &PathOverrides,
) -> Result<ResolvedPaths> {
    resolve_paths_with_lookup(context, overrides, |key| env::var(key).ok())
}

fn resolve_paths_with_lookup<F>(
    context: &ResolutionContext,
    overrides: &PathOverrides,
    lookup_env: F,
) -> Result<ResolvedPaths>
where
    F: Fn(&str) -> Option<String>,
{
    let (project_root, root_source) = resolve_project_root(context, overrides, &lookup_env);

    let (config_path, config_source) = if let Some(path) = overrides.config.as_deref() {
        (
            absolutize_from_project(path, &project_root),
            ValueSource::Flag,
        )
    } else if let Some(value) = lookup_env("ASSETSHIFT_CONFIG") {
        (
            absolutize_from_project(Path::new(value.trim()), &project_root),
            ValueSource::Env,
        )
    } else {
        (project_root.join(CONFIG_FILENAME), ValueSource::Default)
    };

    Ok(ResolvedPaths {
        project_root,
        config_path,
        root_source,
        config_source,
    })
}

fn resolve_project_root<F>(
    context: &ResolutionContext,
    overrides: &PathOverrides,
    lookup_env: &F,
) -> (PathBuf, ValueSource)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(path) = overrides.project_root.as_deref() {
        return (absolutize(path, &context.cwd), ValueSource::Flag);
    }
    if let Some(value) = lookup_env("ASSETSHIFT_PROJECT_ROOT") {
        return (
            absolutize(Path::new(value.trim()), &context.cwd),
            ValueSource::Env,
        );
    }
    // Walk up from cwd looking for a config or mapping file marker.
    let mut cursor = Some(context.cwd.as_path());
    while let Some(current) = cursor {
        if current.join(CONFIG_FILENAME).exists() || current.join(DEFAULT_MAPPING_FILE).exists() {
            return (current.to_path_buf(), ValueSource::Heuristic);
        }
        cursor = current.parent();
    }
    (context.cwd.clone(), ValueSource::Default)
}

pub fn inspect_runtime(paths: &ResolvedPaths, config: &MigrationConfig) -> Result<RuntimeStatus> {
    let mapping_path = paths.file(&config.mapping_file());
    let input_path = paths.file(&config.input_manifest());
    let asset_dir = paths.file(&config.asset_dir());

    let project_root_exists = paths.project_root.exists();
    let config_exists = paths.config_path.exists();
    let mapping_exists = mapping_path.exists();
    let input_manifest_exists = input_path.exists();
    let asset_dir_exists = asset_dir.exists();

    let mapping_entries = if mapping_exists {
        let table = crate::mapping::MappingTable::load(&mapping_path)?;
        Some(table.len())
    } else {
        None
    };

    let mut warnings = Vec::new();
    if !mapping_exists {
        warnings.push(format!(
            "{} is missing; `rewrite` and mapping-aware `clean` need it",
            normalize_for_display(&mapping_path)
        ));
    }
    if !input_manifest_exists {
        warnings.push(format!(
            "{} is missing; `clean` needs it",
            normalize_for_display(&input_path)
        ));
    }
    if !asset_dir_exists {
        warnings.push(format!(
            "{} is missing; `verify` will report success trivially",
            normalize_for_display(&asset_dir)
        ));
    }

    Ok(RuntimeStatus {
        project_root_exists,
        config_exists,
        mapping_exists,
        input_manifest_exists,
        asset_dir_exists,
        mapping_entries,
        warnings,
    })
}

fn absolutize(path: &Path, base: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

pub fn absolutize_from_project(path: &Path, project_root: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        project_root.join(path)
    }
}

pub fn normalize_for_display(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

/// Canonical form of a path for identity comparisons; falls back to the
/// absolutized form when the file does not exist yet.
pub fn effective_path(root: &Path, candidate: &Path) -> PathBuf {
    let absolute = absolutize_from_project(candidate, root);
    fs::canonicalize(&absolute).unwrap_or(absolute)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use tempfile::tempdir;

    use super::*;

    #[test]
    fn resolve_paths_prefers_flag_over_env() {
        let temp = tempdir().expect("tempdir");
        let cwd = temp.path().join("cwd");
        let from_flag = temp.path().join("flag-root");
        fs::create_dir_all(&cwd).expect("create cwd");

        let overrides = PathOverrides {
            project_root: Some(from_flag.clone()),
            ..PathOverrides::default()
        };
        let context = ResolutionContext { cwd: cwd.clone() };
        let env = HashMap::from([(
            "ASSETSHIFT_PROJECT_ROOT".to_string(),
            temp.path().join("env-root").to_string_lossy().to_string(),
        )]);

        let resolved = resolve_paths_with_lookup(&context, &overrides, |key| env.get(key).cloned())
            .expect("resolve paths");
        assert_eq!(resolved.project_root, from_flag);
        assert_eq!(resolved.root_source, ValueSource::Flag);
    }

    #[test]
    fn heuristic_finds_mapping_file_in_ancestor() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path().join("site");
        let nested = root.join("public").join("blog");
        fs::create_dir_all(&nested).expect("create nested");
        fs::write(root.join(DEFAULT_MAPPING_FILE), "{}").expect("write marker");

        let context = ResolutionContext { cwd: nested };
        let resolved = resolve_paths_with_lookup(&context, &PathOverrides::default(), |_| None)
            .expect("resolve paths");
        assert_eq!(resolved.project_root, root);
        assert_eq!(resolved.root_source, ValueSource::Heuristic);
    }

    #[test]
    fn missing_markers_default_to_cwd() {
        let temp = tempdir().expect("tempdir");
        let cwd = temp.path().join("bare");
        fs::create_dir_all(&cwd).expect("create cwd");

        let context = ResolutionContext { cwd: cwd.clone() };
        let resolved = resolve_paths_with_lookup(&context, &PathOverrides::default(), |_| None)
            .expect("resolve paths");
        assert_eq!(resolved.project_root, cwd);
        assert_eq!(resolved.root_source, ValueSource::Default);
        assert_eq!(resolved.config_path, cwd.join(CONFIG_FILENAME));
        assert_eq!(resolved.config_source, ValueSource::Default);
    }

    #[test]
    fn file_resolves_relative_against_project_root() {
        let temp = tempdir().expect("tempdir");
        let cwd = temp.path().to_path_buf();
        let context = ResolutionContext { cwd: cwd.clone() };
        let resolved = resolve_paths_with_lookup(&context, &PathOverrides::default(), |_| None)
            .expect("resolve paths");
        assert_eq!(resolved.file("map.json"), cwd.join("map.json"));
    }

    #[test]
    fn inspect_runtime_warns_about_missing_inputs() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path().join("project");
        fs::create_dir_all(&root).expect("create root");

        let context = ResolutionContext { cwd: root.clone() };
        let overrides = PathOverrides {
            project_root: Some(root.clone()),
            ..PathOverrides::default()
        };
        let resolved =
            resolve_paths_with_lookup(&context, &overrides, |_| None).expect("resolve paths");
        let status =
            inspect_runtime(&resolved, &MigrationConfig::default()).expect("inspect runtime");
        assert!(!status.mapping_exists);
        assert!(status.mapping_entries.is_none());
        assert_eq!(status.warnings.len(), 3);
    }

    #[test]
    fn inspect_runtime_counts_mapping_entries() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path().to_path_buf();
        fs::write(
            root.join(DEFAULT_MAPPING_FILE),
            r#"{"cloudName": "demo", "mapping": {"https://f.com/images/a.png": "a"}}"#,
        )
        .expect("write mapping");

        let context = ResolutionContext { cwd: root.clone() };
        let resolved = resolve_paths_with_lookup(&context, &PathOverrides::default(), |_| None)
            .expect("resolve paths");
        let status =
            inspect_runtime(&resolved, &MigrationConfig::default()).expect("inspect runtime");
        assert!(status.mapping_exists);
        assert_eq!(status.mapping_entries, Some(1));
    }
}
