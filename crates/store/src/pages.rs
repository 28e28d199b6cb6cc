//! Namespaced page, session and audit keys on top of a [`KeyValueStore`].

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use taxtrack_core::PageCollection;

use crate::kv::{KeyValueStore, StoreError};

const SESSION_SUFFIX: &str = "session";
const AUDIT_SUFFIX: &str = "audit_log";

/// Persisted value of one page key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageEnvelope {
    pub data: PageCollection,
    pub last_updated: DateTime<Utc>,
}

#[derive(Clone)]
pub struct PageStore {
    kv: Arc<dyn KeyValueStore>,
    prefix: String,
}

impl std::fmt::Debug for PageStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageStore")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

impl PageStore {
    pub fn new(kv: Arc<dyn KeyValueStore>, prefix: impl Into<String>) -> Self {
        Self {
            kv,
            prefix: prefix.into(),
        }
    }

    pub fn kv(&self) -> &Arc<dyn KeyValueStore> {
        &self.kv
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn page_store_key(&self, page_key: &str) -> String {
        format!("{}{page_key}", self.prefix)
    }

    pub fn session_key(&self) -> String {
        format!("{}{SESSION_SUFFIX}", self.prefix)
    }

    pub fn audit_key(&self) -> String {
        format!("{}{AUDIT_SUFFIX}", self.prefix)
    }

    /// Page key addressed by a raw store key, or `None` for the session and
    /// audit keys and for keys outside this namespace.
    pub fn page_key_of<'a>(&self, store_key: &'a str) -> Option<&'a str> {
        let rest = store_key.strip_prefix(self.prefix.as_str())?;
        if rest.is_empty() || rest == SESSION_SUFFIX || rest == AUDIT_SUFFIX {
            return None;
        }
        Some(rest)
    }

    /// Persist `page` with a fresh `lastUpdated` stamp and return the stamp.
    pub fn save_page(
        &self,
        page_key: &str,
        page: &PageCollection,
    ) -> Result<DateTime<Utc>, StoreError> {
        let key = self.page_store_key(page_key);
        let envelope = PageEnvelope {
            data: page.clone(),
            last_updated: Utc::now(),
        };
        let raw = serde_json::to_string(&envelope).map_err(|source| StoreError::Codec {
            key: key.clone(),
            source,
        })?;
        self.kv.set(&key, &raw)?;
        Ok(envelope.last_updated)
    }

    /// Read a page envelope.  Missing, unreadable and malformed values all
    /// read as `None`; the latter two are logged.
    pub fn load_envelope(&self, page_key: &str) -> Option<PageEnvelope> {
        let key = self.page_store_key(page_key);
        let raw = match self.kv.get(&key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(err) => {
                warn!(key = %key, error = %err, "page read failed; treating as absent");
                return None;
            }
        };
        match serde_json::from_str::<PageEnvelope>(&raw) {
            Ok(envelope) => Some(envelope),
            Err(err) => {
                warn!(key = %key, error = %err, "malformed page data; treating as absent");
                None
            }
        }
    }

    pub fn load_page(&self, page_key: &str) -> Option<PageCollection> {
        self.load_envelope(page_key).map(|e| e.data)
    }

    pub fn last_updated(&self, page_key: &str) -> Option<DateTime<Utc>> {
        self.load_envelope(page_key).map(|e| e.last_updated)
    }

    /// Remove every persisted page under the prefix.  The session and audit
    /// keys are left alone; returns the number of pages removed.
    pub fn clear_pages(&self) -> Result<usize, StoreError> {
        let mut removed = 0;
        for key in self.kv.keys()? {
            if self.page_key_of(&key).is_some() {
                self.kv.remove(&key)?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Every readable page under the prefix, keyed by page key.
    pub fn export_all(&self) -> Result<BTreeMap<String, PageCollection>, StoreError> {
        let mut pages = BTreeMap::new();
        for key in self.kv.keys()? {
            if let Some(page_key) = self.page_key_of(&key) {
                if let Some(page) = self.load_page(page_key) {
                    pages.insert(page_key.to_string(), page);
                }
            }
        }
        Ok(pages)
    }
}
