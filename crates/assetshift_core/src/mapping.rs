use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::Deserialize;

use crate::asset::{ResourceType, delivery_url};
use crate::urlnorm::strip_query;

#[derive(Debug, Deserialize)]
struct MappingDocument {
    #[serde(rename = "cloudName")]
    cloud_name: String,
    #[serde(default)]
    mapping: serde_json::Map<String, serde_json::Value>,
}

/// Immutable lookup from canonical legacy URL to target public identifier,
/// with a query-stripped base-path fallback index. The base-path index is
/// first-seen-wins in document order, so loading preserves the mapping
/// document's insertion order.
#[derive(Debug, Clone)]
pub struct MappingTable {
    cloud_name: String,
    exact: HashMap<String, String>,
    base_paths: HashMap<String, String>,
}

impl MappingTable {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let document: MappingDocument = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse {}", path.display()))?;

        let mut entries = Vec::with_capacity(document.mapping.len());
        for (legacy_url, value) in document.mapping {
            let Some(public_id) = value.as_str() else {
                bail!(
                    "mapping entry for {legacy_url} in {} is not a string",
                    path.display()
                );
            };
            entries.push((legacy_url, public_id.to_string()));
        }
        Self::from_entries(document.cloud_name, entries)
    }

    /// Build a table from `(legacy_url, public_id)` pairs. Pair order
    /// decides base-path tie-breaks.
    pub fn from_entries<I>(cloud_name: String, entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        if cloud_name.trim().is_empty() {
            bail!("mapping document has an empty cloudName");
        }
        let mut exact = HashMap::new();
        let mut base_paths: HashMap<String, String> = HashMap::new();
        for (legacy_url, public_id) in entries {
            base_paths
                .entry(strip_query(&legacy_url))
                .or_insert_with(|| public_id.clone());
            exact.insert(legacy_url, public_id);
        }
        Ok(Self {
            cloud_name,
            exact,
            base_paths,
        })
    }

    pub fn cloud_name(&self) -> &str {
        &self.cloud_name
    }

    pub fn len(&self) -> usize {
        self.exact.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exact.is_empty()
    }

    /// Resolve a canonical URL: exact match first, then the query-stripped
    /// base path. Empty-string targets count as absent.
    pub fn resolve(&self, canonical_url: &str) -> Option<&str> {
        if let Some(public_id) = self.exact.get(canonical_url)
            && !public_id.is_empty()
        {
            return Some(public_id);
        }
        self.base_paths
            .get(&strip_query(canonical_url))
            .map(String::as_str)
            .filter(|public_id| !public_id.is_empty())
    }

    /// Delivery URL for a resolved asset under this table's cloud.
    pub fn delivery_url(
        &self,
        delivery_host: &str,
        public_id: &str,
        resource_type: ResourceType,
    ) -> String {
        delivery_url(delivery_host, &self.cloud_name, public_id, resource_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn table(entries: &[(&str, &str)]) -> MappingTable {
        MappingTable::from_entries(
            "demo".to_string(),
            entries
                .iter()
                .map(|(url, id)| (url.to_string(), id.to_string())),
        )
        .expect("build table")
    }

    #[test]
    fn exact_match_wins_over_base_path() {
        let table = table(&[
            ("https://f.com/images/a.png?width=100", "exact-id"),
            ("https://f.com/images/a.png", "base-id"),
        ]);
        assert_eq!(
            table.resolve("https://f.com/images/a.png?width=100"),
            Some("exact-id")
        );
    }

    #[test]
    fn base_path_fallback_is_first_seen() {
        let table = table(&[
            ("https://f.com/images/a.png?width=100", "first"),
            ("https://f.com/images/a.png?width=200", "second"),
        ]);
        assert_eq!(
            table.resolve("https://f.com/images/a.png?height=300"),
            Some("first")
        );
    }

    #[test]
    fn unknown_url_is_unresolved() {
        let table = table(&[("https://f.com/images/a.png", "id")]);
        assert_eq!(table.resolve("https://f.com/images/b.png"), None);
    }

    #[test]
    fn empty_target_counts_as_absent() {
        let table = table(&[("https://f.com/images/a.png", "")]);
        assert_eq!(table.resolve("https://f.com/images/a.png"), None);
    }

    #[test]
    fn empty_exact_target_falls_through_to_base_path() {
        let table = table(&[
            ("https://f.com/images/a.png?width=100", ""),
            ("https://f.com/images/a.png?width=200", "fallback"),
        ]);
        // Exact hit is empty, base path was claimed first by the empty
        // entry, so the lookup stays unresolved.
        assert_eq!(table.resolve("https://f.com/images/a.png?width=100"), None);
    }

    #[test]
    fn load_parses_document_in_order() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("map.json");
        fs::write(
            &path,
            r#"{
  "cloudName": "demo",
  "mapping": {
    "https://f.com/images/a.png?width=100": "first",
    "https://f.com/images/a.png?width=200": "second"
  }
}"#,
        )
        .expect("write mapping");

        let table = MappingTable::load(&path).expect("load table");
        assert_eq!(table.cloud_name(), "demo");
        assert_eq!(table.len(), 2);
        assert_eq!(
            table.resolve("https://f.com/images/a.png"),
            Some("first")
        );
    }

    #[test]
    fn load_rejects_missing_cloud_name() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("map.json");
        fs::write(&path, r#"{"mapping": {}}"#).expect("write mapping");
        let error = MappingTable::load(&path).expect_err("must fail");
        assert!(error.to_string().contains("failed to parse"));
    }

    #[test]
    fn delivery_url_uses_cloud_name() {
        let table = table(&[]);
        assert_eq!(
            table.delivery_url("res.cloudinary.com", "abc", ResourceType::Image),
            "https://res.cloudinary.com/demo/image/upload/f_auto,q_auto/abc"
        );
    }
}
