//! Where schema sets come from, and the process-lifetime cache in front of
//! them.
//!
//! The cache loads at most once. Callers that arrive while the load is in
//! flight wait on that same load. A failed load is remembered as "no
//! schemas", after which every caller uses the text fallback.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::OnceCell;

use super::schema::SchemaSet;
use crate::error::{Result, WireError};
use crate::BoxFuture;

/// Custom schema loader.
pub trait SchemaLoader: Send + Sync + 'static {
    /// Load the schema set.
    fn load(&self) -> BoxFuture<'_, Result<SchemaSet>>;
}

/// Origin of the schema set.
#[derive(Clone, Default)]
pub enum SchemaSource {
    /// The set shipped with the crate.
    #[default]
    Builtin,
    /// A JSON definition file read on first use.
    File(PathBuf),
    /// Caller-supplied loader.
    Loader(Arc<dyn SchemaLoader>),
    /// No schemas: every payload is text encoded.
    None,
}

impl SchemaSource {
    /// Load the set. `Ok(None)` means no source is configured.
    pub async fn load(&self) -> Result<Option<SchemaSet>> {
        match self {
            SchemaSource::Builtin => SchemaSet::builtin().map(Some),
            SchemaSource::File(path) => {
                let definition = tokio::fs::read_to_string(path).await?;
                SchemaSet::from_json(&definition).map(Some)
            }
            SchemaSource::Loader(loader) => loader.load().await.map(Some),
            SchemaSource::None => Ok(None),
        }
    }
}

impl fmt::Debug for SchemaSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaSource::Builtin => f.write_str("Builtin"),
            SchemaSource::File(path) => f.debug_tuple("File").field(path).finish(),
            SchemaSource::Loader(_) => f.write_str("Loader(..)"),
            SchemaSource::None => f.write_str("None"),
        }
    }
}

/// Lazily loaded, shared schema set.
pub struct SchemaCache {
    source: SchemaSource,
    load_timeout: Option<Duration>,
    cell: OnceCell<Option<Arc<SchemaSet>>>,
}

impl SchemaCache {
    /// Create a cache; nothing is loaded until the first `get`.
    pub fn new(source: SchemaSource, load_timeout: Option<Duration>) -> Self {
        Self {
            source,
            load_timeout,
            cell: OnceCell::new(),
        }
    }

    /// Get the schema set, loading it on first use.
    pub async fn get(&self) -> Option<Arc<SchemaSet>> {
        self.cell.get_or_init(|| self.load()).await.clone()
    }

    /// Get the schema set only if loading already finished.
    pub fn peek(&self) -> Option<Arc<SchemaSet>> {
        self.cell.get().cloned().flatten()
    }

    /// Whether the load has completed, successfully or not.
    pub fn is_settled(&self) -> bool {
        self.cell.initialized()
    }

    async fn load(&self) -> Option<Arc<SchemaSet>> {
        let result = match self.load_timeout {
            Some(limit) => match tokio::time::timeout(limit, self.source.load()).await {
                Ok(result) => result,
                Err(_) => Err(WireError::Schema(format!(
                    "load did not finish within {:?}",
                    limit
                ))),
            },
            None => self.source.load().await,
        };

        match result {
            Ok(Some(set)) => {
                tracing::debug!(source = ?self.source, messages = set.len(), "Schema set loaded");
                Some(Arc::new(set))
            }
            Ok(None) => {
                tracing::debug!("No schema source configured, using text encoding");
                None
            }
            Err(e) => {
                tracing::warn!(
                    source = ?self.source,
                    "Schema load failed, using text encoding: {}",
                    e
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingLoader {
        loads: AtomicUsize,
        delay: Duration,
        fail: bool,
    }

    impl SchemaLoader for CountingLoader {
        fn load(&self) -> BoxFuture<'_, Result<SchemaSet>> {
            Box::pin(async move {
                self.loads.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(self.delay).await;
                if self.fail {
                    Err(WireError::Schema("unavailable".to_string()))
                } else {
                    SchemaSet::builtin()
                }
            })
        }
    }

    fn counting(delay: Duration, fail: bool) -> Arc<CountingLoader> {
        Arc::new(CountingLoader {
            loads: AtomicUsize::new(0),
            delay,
            fail,
        })
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_load() {
        let loader = counting(Duration::from_millis(20), false);
        let cache = Arc::new(SchemaCache::new(SchemaSource::Loader(loader.clone()), None));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.get().await.is_some() })
            })
            .collect();
        for task in tasks {
            assert!(task.await.unwrap());
        }

        assert_eq!(loader.loads.load(Ordering::SeqCst), 1);
        assert!(cache.peek().is_some());
    }

    #[tokio::test]
    async fn test_failed_load_is_permanent() {
        let loader = counting(Duration::ZERO, true);
        let cache = SchemaCache::new(SchemaSource::Loader(loader.clone()), None);

        assert!(cache.get().await.is_none());
        assert!(cache.get().await.is_none());
        assert!(cache.is_settled());
        assert_eq!(loader.loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_load_timeout_falls_back() {
        let loader = counting(Duration::from_secs(60), false);
        let cache = SchemaCache::new(
            SchemaSource::Loader(loader),
            Some(Duration::from_millis(10)),
        );
        assert!(cache.get().await.is_none());
    }

    #[tokio::test]
    async fn test_missing_file_falls_back() {
        let cache = SchemaCache::new(
            SchemaSource::File(PathBuf::from("/nonexistent/recordwire/schema.json")),
            None,
        );
        assert!(cache.get().await.is_none());
    }

    #[tokio::test]
    async fn test_file_source() {
        let path = std::env::temp_dir()
            .join(format!("recordwire-schema-{}.json", std::process::id()));
        tokio::fs::write(&path, super::super::schema::BUILTIN_SCHEMA)
            .await
            .unwrap();

        let cache = SchemaCache::new(SchemaSource::File(path.clone()), None);
        let set = cache.get().await.unwrap();
        assert!(set.get("RecordList").is_some());

        let _ = tokio::fs::remove_file(&path).await;
    }

    #[tokio::test]
    async fn test_none_source() {
        let cache = SchemaCache::new(SchemaSource::None, None);
        assert!(!cache.is_settled());
        assert!(cache.get().await.is_none());
        assert!(cache.is_settled());
    }
}
