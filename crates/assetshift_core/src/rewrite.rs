use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result, bail};
use regex::Regex;
use serde::Serialize;
use walkdir::WalkDir;

use crate::asset::infer_resource_type;
use crate::mapping::MappingTable;
use crate::runtime::effective_path;
use crate::urlnorm::canonicalize_url;

#[derive(Debug, Clone)]
pub struct RewriteOptions {
    /// Extension filter, lowercased, without leading dots.
    pub extensions: Vec<String>,
    /// Regex source matching legacy asset URLs in text.
    pub legacy_url_pattern: String,
    pub delivery_host: String,
    /// Files never rewritten: the mapping document and report outputs.
    pub skip_files: Vec<PathBuf>,
}

/// Outcome of one rewrite pass. The serialized JSON report carries
/// exactly four fields; the scan counters only show up on stdout.
#[derive(Debug, Clone, Serialize)]
pub struct RewriteReport {
    pub replacements: usize,
    pub no_mapping_count: usize,
    pub no_mapping_urls: Vec<String>,
    pub updated_files: usize,
    #[serde(skip)]
    pub scanned_files: usize,
    #[serde(skip)]
    pub skipped_non_utf8: usize,
}

/// Rewrite every matching legacy URL under `root` to its delivery URL.
/// Unresolved matches stay verbatim and are collected into the
/// no-mapping set; changed files are rewritten in place.
pub fn rewrite_tree(
    root: &Path,
    table: &MappingTable,
    options: &RewriteOptions,
) -> Result<RewriteReport> {
    let pattern = Regex::new(&options.legacy_url_pattern).with_context(|| {
        format!(
            "invalid legacy URL pattern: {}",
            options.legacy_url_pattern
        )
    })?;
    let skip: BTreeSet<PathBuf> = options
        .skip_files
        .iter()
        .map(|path| effective_path(root, path))
        .collect();

    let mut replacements = 0usize;
    let mut no_mapping: BTreeSet<String> = BTreeSet::new();
    let mut updated_files = 0usize;
    let mut scanned_files = 0usize;
    let mut skipped_non_utf8 = 0usize;

    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry.with_context(|| format!("failed to walk {}", root.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if is_hidden(path) || !has_allowed_extension(path, &options.extensions) {
            continue;
        }
        if skip.contains(&effective_path(root, path)) {
            continue;
        }

        let bytes = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
        let Ok(text) = String::from_utf8(bytes) else {
            // Never rewrite bytes that cannot round-trip through UTF-8.
            skipped_non_utf8 += 1;
            continue;
        };
        scanned_files += 1;

        let rewritten = pattern.replace_all(&text, |captures: &regex::Captures<'_>| {
            let original = &captures[0];
            let canonical = canonicalize_url(original);
            match table.resolve(&canonical) {
                Some(public_id) => {
                    replacements += 1;
                    let resource_type = infer_resource_type(&canonical);
                    table.delivery_url(&options.delivery_host, public_id, resource_type)
                }
                None => {
                    no_mapping.insert(canonical);
                    original.to_string()
                }
            }
        });

        if rewritten != text {
            fs::write(path, rewritten.as_bytes())
                .with_context(|| format!("failed to write {}", path.display()))?;
            updated_files += 1;
        }
    }

    Ok(RewriteReport {
        replacements,
        no_mapping_count: no_mapping.len(),
        no_mapping_urls: no_mapping.into_iter().collect(),
        updated_files,
        scanned_files,
        skipped_non_utf8,
    })
}

/// Persist the replacement report as pretty JSON with a trailing newline.
pub fn write_rewrite_report(path: &Path, report: &RewriteReport) -> Result<()> {
    let mut rendered =
        serde_json::to_string_pretty(report).context("failed to serialize replacement report")?;
    rendered.push('\n');
    fs::write(path, rendered).with_context(|| format!("failed to write {}", path.display()))
}

#[derive(Debug, Clone)]
pub struct SweepOptions {
    /// Legacy-provider domains whose presence fails the sweep.
    pub legacy_domains: Vec<String>,
    /// Known outputs excluded from the scan.
    pub skip_files: Vec<PathBuf>,
}

/// Per-file residual reference counts over the version-controlled
/// listing, worst offenders first.
#[derive(Debug, Clone)]
pub struct SweepReport {
    pub scanned_files: usize,
    pub total_references: usize,
    pub offenders: Vec<SweepOffender>,
}

#[derive(Debug, Clone)]
pub struct SweepOffender {
    pub path: String,
    pub references: usize,
}

/// Post-rewrite verification sweep: scan every `git ls-files` entry for
/// remaining legacy-domain references. Any nonzero total means the
/// migration did not fully succeed; the caller turns that into a hard
/// failure.
pub fn sweep_tracked_files(root: &Path, options: &SweepOptions) -> Result<SweepReport> {
    let output = Command::new("git")
        .arg("ls-files")
        .current_dir(root)
        .output()
        .with_context(|| format!("failed to execute git ls-files in {}", root.display()))?;
    if !output.status.success() {
        bail!(
            "git ls-files failed in {}: {}",
            root.display(),
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }

    let skip: BTreeSet<PathBuf> = options
        .skip_files
        .iter()
        .map(|path| effective_path(root, path))
        .collect();

    let listing = String::from_utf8_lossy(&output.stdout).into_owned();
    let mut scanned_files = 0usize;
    let mut total_references = 0usize;
    let mut offenders: Vec<SweepOffender> = Vec::new();

    for line in listing.lines() {
        let relative = line.trim();
        if relative.is_empty() {
            continue;
        }
        let path = root.join(relative);
        if !path.is_file() {
            continue;
        }
        if skip.contains(&effective_path(root, &path)) {
            continue;
        }
        let bytes =
            fs::read(&path).with_context(|| format!("failed to read {}", path.display()))?;
        let text = String::from_utf8_lossy(&bytes);
        scanned_files += 1;

        let references: usize = options
            .legacy_domains
            .iter()
            .map(|domain| text.matches(domain.as_str()).count())
            .sum();
        if references > 0 {
            total_references += references;
            offenders.push(SweepOffender {
                path: relative.to_string(),
                references,
            });
        }
    }

    offenders.sort_by(|left, right| {
        right
            .references
            .cmp(&left.references)
            .then_with(|| left.path.cmp(&right.path))
    });

    Ok(SweepReport {
        scanned_files,
        total_references,
        offenders,
    })
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with('.'))
}

fn has_allowed_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .is_some_and(|ext| extensions.iter().any(|allowed| *allowed == ext))
}
