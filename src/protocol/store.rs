//! Cross-test data store
//!
//! Captured headers and content of every evaluated state are recorded under
//! the running test's id so later, independent test runs can reference them
//! through `$$test.<id>|...$$` expressions.

use super::{Content, Headers};
use crate::Result;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;

/// Storage of data shared between test runs, keyed by (test id, state label)
pub trait TestDataStore: Send + Sync {
    fn put_test_content(&self, test_id: &str, state: &str, content: &Content);
    fn put_test_header(&self, test_id: &str, state: &str, headers: &Headers);
    fn put_pattern_values(&self, test_id: &str, values: &HashMap<String, String>);
    fn get_test_content(&self, test_id: &str, state: &str) -> Option<Content>;
    fn get_test_header(&self, test_id: &str, state: &str, name: &str) -> Option<String>;
    fn get_pattern_value(&self, test_id: &str, key: &str) -> Option<String>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct TestRecord {
    #[serde(default)]
    pattern: HashMap<String, String>,
    #[serde(default)]
    headers: HashMap<String, Headers>,
    #[serde(default)]
    content: HashMap<String, Content>,
}

/// In-memory store with optional JSON persistence
#[derive(Debug, Default)]
pub struct InMemoryTestStore {
    tests: RwLock<HashMap<String, TestRecord>>,
}

fn state_key(state: &str) -> String {
    state.to_lowercase()
}

impl InMemoryTestStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a store previously written with [`save`](Self::save); a missing file yields an empty store
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::debug!("No test data at {:?}, starting empty", path);
            return Ok(Self::new());
        }

        let contents = fs::read_to_string(path).await?;
        let tests: HashMap<String, TestRecord> = serde_json::from_str(&contents)?;
        tracing::debug!("Loaded data for {} test(s) from {:?}", tests.len(), path);
        Ok(Self {
            tests: RwLock::new(tests),
        })
    }

    /// Persist the store as JSON
    pub async fn save(&self, path: impl Into<PathBuf>) -> Result<()> {
        let path = path.into();
        let json = serde_json::to_string_pretty(&*self.tests.read())?;
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&path, json).await?;
        Ok(())
    }

    pub fn test_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.tests.read().keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl TestDataStore for InMemoryTestStore {
    fn put_test_content(&self, test_id: &str, state: &str, content: &Content) {
        self.tests
            .write()
            .entry(test_id.to_string())
            .or_default()
            .content
            .insert(state_key(state), content.clone());
    }

    fn put_test_header(&self, test_id: &str, state: &str, headers: &Headers) {
        self.tests
            .write()
            .entry(test_id.to_string())
            .or_default()
            .headers
            .insert(state_key(state), headers.clone());
    }

    fn put_pattern_values(&self, test_id: &str, values: &HashMap<String, String>) {
        let mut tests = self.tests.write();
        let record = tests.entry(test_id.to_string()).or_default();
        for (k, v) in values {
            record.pattern.insert(k.clone(), v.clone());
        }
    }

    fn get_test_content(&self, test_id: &str, state: &str) -> Option<Content> {
        self.tests
            .read()
            .get(test_id)
            .and_then(|t| t.content.get(&state_key(state)).cloned())
    }

    fn get_test_header(&self, test_id: &str, state: &str, name: &str) -> Option<String> {
        self.tests
            .read()
            .get(test_id)
            .and_then(|t| t.headers.get(&state_key(state)))
            .and_then(|h| h.get(name).map(str::to_string))
    }

    fn get_pattern_value(&self, test_id: &str, key: &str) -> Option<String> {
        self.tests
            .read()
            .get(test_id)
            .and_then(|t| t.pattern.get(key).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_put_and_get() {
        let store = InMemoryTestStore::new();
        let headers: Headers = [("Content-Type", "application/json")].into_iter().collect();
        store.put_test_header("t1", "Wait", &headers);
        store.put_test_content("t1", "Wait", &Content::Json(json!({"id": 7})));
        store.put_pattern_values("t1", &HashMap::from([("host".to_string(), "a".to_string())]));

        assert_eq!(
            store.get_test_header("t1", "wait", "content-type"),
            Some("application/json".to_string())
        );
        assert_eq!(
            store.get_test_content("t1", "WAIT"),
            Some(Content::Json(json!({"id": 7})))
        );
        assert_eq!(store.get_pattern_value("t1", "host"), Some("a".to_string()));
        assert!(store.get_pattern_value("t2", "host").is_none());
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("store.json");

        let store = InMemoryTestStore::new();
        store.put_test_content("t1", "s", &Content::Plain("hello".to_string()));
        store.save(&path).await.unwrap();

        let loaded = InMemoryTestStore::load(&path).await.unwrap();
        assert_eq!(loaded.test_ids(), vec!["t1".to_string()]);
        assert_eq!(
            loaded.get_test_content("t1", "s"),
            Some(Content::Plain("hello".to_string()))
        );
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = InMemoryTestStore::load(dir.path().join("none.json"))
            .await
            .unwrap();
        assert!(store.test_ids().is_empty());
    }
}
