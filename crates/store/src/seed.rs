use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use taxtrack_core::PageCollection;

use crate::kv::StoreError;

/// Source of the default personnel of every page.
///
/// Used when a page has never been persisted and after a factory reset.
pub trait SeedProvider: Send + Sync {
    /// Page keys in display order.
    fn page_keys(&self) -> Vec<String>;
    fn seed_page(&self, page_key: &str) -> Option<PageCollection>;
}

/// Seed data held in memory, optionally parsed from a JSON document of the
/// form `{"<pageKey>": {"title", "subtitle", "personnel": [...]}}`.
#[derive(Debug, Clone, Default)]
pub struct StaticSeedProvider {
    pages: BTreeMap<String, PageCollection>,
}

impl StaticSeedProvider {
    pub fn from_pages<I, K>(pages: I) -> Self
    where
        I: IntoIterator<Item = (K, PageCollection)>,
        K: Into<String>,
    {
        Self {
            pages: pages.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    pub fn from_json_str(raw: &str) -> Result<Self, StoreError> {
        let pages: BTreeMap<String, PageCollection> =
            serde_json::from_str(raw).map_err(|source| StoreError::Codec {
                key: "<seed>".to_string(),
                source,
            })?;
        Ok(Self { pages })
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| StoreError::Io {
            key: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }
}

impl SeedProvider for StaticSeedProvider {
    fn page_keys(&self) -> Vec<String> {
        self.pages.keys().cloned().collect()
    }

    fn seed_page(&self, page_key: &str) -> Option<PageCollection> {
        self.pages.get(page_key).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taxtrack_core::TaxStatus;
    use tempfile::TempDir;

    const SEED: &str = r#"{
        "page2": {"title": "Company 2", "subtitle": "2nd Company", "personnel": [
            {"id": "c2-001", "rank": "Cpl.", "firstName": "Narong", "lastName": "Chai"}
        ]},
        "page1": {"title": "Officers", "subtitle": "HQ", "personnel": [
            {"id": "hq-001", "rank": "Capt.", "firstName": "Prasert", "lastName": "Wong"},
            {"id": "hq-002", "rank": "Lt.", "firstName": "Kanya", "lastName": "Srisuk"}
        ]}
    }"#;

    #[test]
    fn parses_pages_in_key_order() {
        let seed = StaticSeedProvider::from_json_str(SEED).unwrap();
        assert_eq!(seed.page_keys(), vec!["page1", "page2"]);
        let page1 = seed.seed_page("page1").unwrap();
        assert_eq!(page1.personnel.len(), 2);
        assert_eq!(page1.personnel[0].tax_status, TaxStatus::Unset);
        assert!(seed.seed_page("page9").is_none());
    }

    #[test]
    fn from_json_file_reads_document() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("seed.json");
        fs::write(&path, SEED).unwrap();
        let seed = StaticSeedProvider::from_json_file(&path).unwrap();
        assert!(!seed.is_empty());
    }

    #[test]
    fn missing_or_malformed_seed_is_an_error() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            StaticSeedProvider::from_json_file(dir.path().join("none.json")),
            Err(StoreError::Io { .. })
        ));
        assert!(matches!(
            StaticSeedProvider::from_json_str("[1, 2]"),
            Err(StoreError::Codec { .. })
        ));
    }
}
