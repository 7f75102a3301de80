use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use url::Url;

use crate::asset::{AssetRecord, infer_resource_type};
use crate::mapping::MappingTable;
use crate::urlnorm::{canonicalize_url, normalize_url, url_quality_score};

/// Knobs for the manifest-cleaning pass, carried explicitly instead of as
/// module-level constants.
#[derive(Debug, Clone)]
pub struct CleanOptions {
    pub keep_query_params: bool,
    pub legacy_host: String,
    pub delivery_host: String,
}

/// Summary of one `clean` run. Malformed rows and the unmigrated set both
/// mean "could not process" but stay separate counters; downstream
/// consumers depend on the distinction.
#[derive(Debug, Clone)]
pub struct CleanReport {
    pub rows_read: usize,
    pub malformed_rows: usize,
    pub output_rows: usize,
    pub migrated_rows: usize,
    pub unmigrated: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawManifestRow {
    #[serde(default)]
    source_url: String,
    #[serde(default)]
    public_id: String,
    // Present in the input header but always recomputed from the URL.
    #[serde(default)]
    #[allow(dead_code)]
    resource_type: String,
}

/// Clean the asset manifest: skip malformed rows, normalize URLs, infer
/// resource types, optionally resolve legacy URLs through the mapping
/// table, and deduplicate by public identifier keeping the quality-best
/// URL. Output rows keep first-seen order.
pub fn clean_manifest(
    input: &Path,
    output: &Path,
    mapping: Option<&MappingTable>,
    options: &CleanOptions,
) -> Result<CleanReport> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(input)
        .with_context(|| format!("failed to open {}", input.display()))?;

    let mut rows: Vec<AssetRecord> = Vec::new();
    let mut rows_read = 0usize;
    let mut malformed_rows = 0usize;
    let mut migrated_rows = 0usize;
    let mut unmigrated: BTreeSet<String> = BTreeSet::new();

    for record in reader.deserialize::<RawManifestRow>() {
        rows_read += 1;
        let Ok(row) = record else {
            malformed_rows += 1;
            continue;
        };
        if row.source_url.is_empty() || row.public_id.is_empty() {
            malformed_rows += 1;
            continue;
        }

        let normalized = normalize_url(&row.source_url, options.keep_query_params);
        if is_excluded_module_url(&normalized, &options.legacy_host) {
            unmigrated.insert(normalized);
            continue;
        }

        let resource_type = infer_resource_type(&normalized);
        let mut source_url = normalized;
        let mut public_id = row.public_id.trim().to_string();

        if let Some(table) = mapping
            && is_legacy_asset_url(&source_url, &options.legacy_host)
        {
            let canonical = canonicalize_url(&source_url);
            match table.resolve(&canonical) {
                Some(mapped_id) => {
                    public_id = mapped_id.to_string();
                    source_url =
                        table.delivery_url(&options.delivery_host, &public_id, resource_type);
                    migrated_rows += 1;
                }
                None => {
                    unmigrated.insert(canonical);
                }
            }
        }

        rows.push(AssetRecord {
            source_url,
            public_id,
            resource_type,
        });
    }

    let deduped = dedupe_by_public_id(rows);

    let mut writer = csv::Writer::from_path(output)
        .with_context(|| format!("failed to create {}", output.display()))?;
    for record in &deduped {
        writer
            .serialize(record)
            .with_context(|| format!("failed to write {}", output.display()))?;
    }
    writer
        .flush()
        .with_context(|| format!("failed to flush {}", output.display()))?;

    Ok(CleanReport {
        rows_read,
        malformed_rows,
        output_rows: deduped.len(),
        migrated_rows,
        unmigrated: unmigrated.into_iter().collect(),
    })
}

/// Keep one record per public identifier. A later record replaces the
/// kept one only when its URL scores strictly higher, so ties favor the
/// earliest-seen record. First-seen order is preserved.
fn dedupe_by_public_id(rows: Vec<AssetRecord>) -> Vec<AssetRecord> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut deduped: Vec<AssetRecord> = Vec::new();
    for record in rows {
        match index.get(&record.public_id) {
            Some(&slot) => {
                if url_quality_score(&record.source_url)
                    > url_quality_score(&deduped[slot].source_url)
                {
                    deduped[slot] = record;
                }
            }
            None => {
                index.insert(record.public_id.clone(), deduped.len());
                deduped.push(record);
            }
        }
    }
    deduped
}

/// Module bundles under the legacy host's /sites/ path are code, not
/// assets; they are recorded but never migrated.
fn is_excluded_module_url(url: &str, legacy_host: &str) -> bool {
    let Ok(parsed) = Url::parse(url) else {
        return false;
    };
    parsed.host_str() == Some(legacy_host) && parsed.path().starts_with("/sites/")
}

/// Asset-bearing legacy URLs live under /images/ or /assets/.
fn is_legacy_asset_url(url: &str, legacy_host: &str) -> bool {
    let Ok(parsed) = Url::parse(url) else {
        return false;
    };
    parsed.host_str() == Some(legacy_host)
        && (parsed.path().starts_with("/images/") || parsed.path().starts_with("/assets/"))
}

/// Persist the sorted unique unmigrated-URL report, one entry per line.
pub fn write_unmigrated_report(path: &Path, urls: &[String]) -> Result<()> {
    let mut content = urls.join("\n");
    if !content.is_empty() {
        content.push('\n');
    }
    fs::write(path, content).with_context(|| format!("failed to write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::MappingTable;
    use tempfile::tempdir;

    fn options() -> CleanOptions {
        CleanOptions {
            keep_query_params: true,
            legacy_host: "framerusercontent.com".to_string(),
            delivery_host: "res.cloudinary.com".to_string(),
        }
    }

    fn run_clean(
        input_csv: &str,
        mapping: Option<&MappingTable>,
        options: &CleanOptions,
    ) -> (CleanReport, String) {
        let temp = tempdir().expect("tempdir");
        let input = temp.path().join("manifest.csv");
        let output = temp.path().join("manifest.cleaned.csv");
        fs::write(&input, input_csv).expect("write input");
        let report = clean_manifest(&input, &output, mapping, options).expect("clean manifest");
        let cleaned = fs::read_to_string(&output).expect("read output");
        (report, cleaned)
    }

    #[test]
    fn skips_and_counts_malformed_rows() {
        let (report, cleaned) = run_clean(
            "source_url,public_id,resource_type\n\
             https://ex.com/a.png,p1,image\n\
             ,p2,image\n\
             https://ex.com/c.png,,image\n",
            None,
            &options(),
        );
        assert_eq!(report.rows_read, 3);
        assert_eq!(report.malformed_rows, 2);
        assert_eq!(report.output_rows, 1);
        assert!(cleaned.contains("https://ex.com/a.png,p1,image"));
    }

    #[test]
    fn dedup_keeps_quality_best_url() {
        // The dimensionless URL wins regardless of row order.
        let (report, cleaned) = run_clean(
            "source_url,public_id,resource_type\n\
             HTTPS://EX.com/a.png?height=200&width=100,p1,image\n\
             https://ex.com/a.png,p1,image\n",
            None,
            &options(),
        );
        assert_eq!(report.output_rows, 1);
        let lines: Vec<&str> = cleaned.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1], "https://ex.com/a.png,p1,image");
    }

    #[test]
    fn dedup_ties_favor_first_seen() {
        let (_, cleaned) = run_clean(
            "source_url,public_id,resource_type\n\
             https://ex.com/first.png,p1,image\n\
             https://ex.com/second.png,p1,image\n",
            None,
            &options(),
        );
        assert!(cleaned.contains("first.png"));
        assert!(!cleaned.contains("second.png"));
    }

    #[test]
    fn normalizes_and_infers_types() {
        let (_, cleaned) = run_clean(
            "source_url,public_id,resource_type\n\
             https://ex.com/clip.mp4,vid,image\n\
             https://ex.com/font.woff2,font,image\n\
             https://ex.com/b.png?b=2&amp;a=1,img,video\n",
            None,
            &options(),
        );
        assert!(cleaned.contains("https://ex.com/clip.mp4,vid,video"));
        assert!(cleaned.contains("https://ex.com/font.woff2,font,raw"));
        assert!(cleaned.contains("https://ex.com/b.png?a=1&b=2,img,image"));
    }

    #[test]
    fn excluded_module_urls_are_recorded_not_output() {
        let (report, cleaned) = run_clean(
            "source_url,public_id,resource_type\n\
             https://framerusercontent.com/sites/abc/chunk.mjs,mod,image\n\
             https://ex.com/a.png,p1,image\n",
            None,
            &options(),
        );
        assert_eq!(report.output_rows, 1);
        assert_eq!(report.malformed_rows, 0);
        assert_eq!(
            report.unmigrated,
            vec!["https://framerusercontent.com/sites/abc/chunk.mjs".to_string()]
        );
        assert!(!cleaned.contains("chunk.mjs"));
    }

    #[test]
    fn mapping_aware_pass_rewrites_resolved_rows() {
        let table = MappingTable::from_entries(
            "demo".to_string(),
            vec![(
                "https://framerusercontent.com/images/abc.png".to_string(),
                "mapped-id".to_string(),
            )],
        )
        .expect("build table");
        let (report, cleaned) = run_clean(
            "source_url,public_id,resource_type\n\
             https://framerusercontent.com/images/abc.png,old-id,image\n\
             https://framerusercontent.com/images/missing.png,keep-id,image\n\
             https://other.com/a.png,other,image\n",
            Some(&table),
            &options(),
        );
        assert_eq!(report.migrated_rows, 1);
        assert!(cleaned.contains(
            "https://res.cloudinary.com/demo/image/upload/f_auto,q_auto/mapped-id"
        ));
        assert!(cleaned.contains("mapped-id"));
        assert!(!cleaned.contains("old-id"));
        // Unresolved legacy rows keep their original URL and identifier.
        assert!(cleaned.contains("https://framerusercontent.com/images/missing.png,keep-id"));
        assert_eq!(
            report.unmigrated,
            vec!["https://framerusercontent.com/images/missing.png".to_string()]
        );
        // Non-legacy hosts are never looked up.
        assert!(cleaned.contains("https://other.com/a.png,other,image"));
    }

    #[test]
    fn unmigrated_report_is_sorted_and_newline_terminated() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("unmigrated.txt");
        write_unmigrated_report(
            &path,
            &["https://b.com/x".to_string(), "https://a.com/x".to_string()],
        )
        .expect("write report");
        // Callers pass the already-sorted set; the file mirrors it.
        let content = fs::read_to_string(&path).expect("read report");
        assert_eq!(content, "https://b.com/x\nhttps://a.com/x\n");

        write_unmigrated_report(&path, &[]).expect("write empty report");
        assert_eq!(fs::read_to_string(&path).expect("read report"), "");
    }
}
