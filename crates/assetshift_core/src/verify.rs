use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use regex::Regex;
use walkdir::WalkDir;

use crate::runtime::normalize_for_display;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViolationKind {
    VideoWithoutExtension,
    ImageWithoutExtension,
    ProxyBypassSegment,
    ScriptSource,
}

impl ViolationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::VideoWithoutExtension => "delivery video URL without extension",
            Self::ImageWithoutExtension => "delivery images URL without extension",
            Self::ProxyBypassSegment => "delivery URL with /cdn-cgi/",
            Self::ScriptSource => "delivery script src",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Violation {
    pub file: String,
    pub line: usize,
    pub kind: ViolationKind,
    pub url: String,
}

impl Violation {
    pub fn render(&self) -> String {
        format!(
            "{}:{}: {}: {}",
            self.file,
            self.line,
            self.kind.as_str(),
            self.url
        )
    }
}

#[derive(Debug, Clone)]
pub struct VerifyOptions {
    pub delivery_host: String,
}

/// Scan the output asset directory for disallowed delivery URL shapes:
/// extensionless /video/ and /images/ URLs, /cdn-cgi/ proxy-bypass
/// segments, and script tags sourced from the delivery host (flagged
/// unconditionally: executable content never ships from the asset CDN).
/// A missing directory scans clean.
pub fn verify_tree(root: &Path, options: &VerifyOptions) -> Result<Vec<Violation>> {
    if !root.exists() {
        return Ok(Vec::new());
    }
    let url_pattern = delivery_url_pattern(&options.delivery_host)?;
    let script_pattern = script_src_pattern(&options.delivery_host)?;

    let mut violations = Vec::new();
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry.with_context(|| format!("failed to walk {}", root.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let bytes = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
        // Lossy decoding keeps the scan going on odd encodings; the
        // verifier only reads.
        let text = String::from_utf8_lossy(&bytes);
        scan_text(
            &normalize_for_display(path),
            &text,
            &url_pattern,
            &script_pattern,
            &mut violations,
        );
    }
    Ok(violations)
}

fn scan_text(
    file: &str,
    text: &str,
    url_pattern: &Regex,
    script_pattern: &Regex,
    violations: &mut Vec<Violation>,
) {
    for (index, line) in text.lines().enumerate() {
        let line_no = index + 1;
        for found in url_pattern.find_iter(line) {
            let url = found.as_str();
            if url.contains("/video/") && is_extensionless(url) {
                violations.push(Violation {
                    file: file.to_string(),
                    line: line_no,
                    kind: ViolationKind::VideoWithoutExtension,
                    url: url.to_string(),
                });
            }
            if url.contains("/images/") && is_extensionless(url) {
                violations.push(Violation {
                    file: file.to_string(),
                    line: line_no,
                    kind: ViolationKind::ImageWithoutExtension,
                    url: url.to_string(),
                });
            }
            if url.contains("/cdn-cgi/") {
                violations.push(Violation {
                    file: file.to_string(),
                    line: line_no,
                    kind: ViolationKind::ProxyBypassSegment,
                    url: url.to_string(),
                });
            }
        }
        for captures in script_pattern.captures_iter(line) {
            let url = captures
                .get(1)
                .or_else(|| captures.get(2))
                .map(|group| group.as_str())
                .unwrap_or_default();
            violations.push(Violation {
                file: file.to_string(),
                line: line_no,
                kind: ViolationKind::ScriptSource,
                url: url.to_string(),
            });
        }
    }
}

fn delivery_url_pattern(delivery_host: &str) -> Result<Regex> {
    let host = regex::escape(delivery_host);
    Regex::new(&format!(r#"https?://{host}/[^\s"'<>)]*"#))
        .context("failed to compile delivery URL pattern")
}

fn script_src_pattern(delivery_host: &str) -> Result<Regex> {
    let host = regex::escape(delivery_host);
    Regex::new(&format!(
        r#"(?i)<script\s+[^>]*src=(?:"(https?://{host}/[^"]+)"|'(https?://{host}/[^']+)')"#
    ))
    .context("failed to compile script src pattern")
}

/// True when the final path segment (query and fragment stripped) has no
/// `.` in it.
fn is_extensionless(url: &str) -> bool {
    let without_query = url.split('?').next().unwrap_or(url);
    let without_fragment = without_query.split('#').next().unwrap_or(without_query);
    let tail = without_fragment
        .rsplit('/')
        .next()
        .unwrap_or(without_fragment);
    !tail.contains('.')
}
