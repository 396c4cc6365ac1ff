//! Record store and the procedure-call service in front of it.
//!
//! Handlers only ever talk to a [`RecordService`]; [`StoreService`] is the
//! in-process implementation backed by a [`RecordStore`].

use std::sync::Arc;

use crate::error::{Result, WireError};
use crate::model::{Record, RecordList};
use crate::BoxFuture;

/// Synchronous record access.
pub trait RecordStore: Send + Sync + 'static {
    /// Point lookup.
    fn get_by_id(&self, id: &str) -> Result<Record>;

    /// All records, in insertion order.
    fn get_all(&self) -> RecordList;
}

/// Asynchronous record access used by request handlers.
pub trait RecordService: Send + Sync + 'static {
    /// Point lookup. Fails with [`WireError::RecordNotFound`].
    fn get_by_id(&self, id: &str) -> BoxFuture<'_, Result<Record>>;

    /// All records.
    fn get_all(&self) -> BoxFuture<'_, Result<RecordList>>;
}

/// Immutable in-memory store.
#[derive(Debug, Clone, Default)]
pub struct MemoryRecordStore {
    records: Vec<Record>,
}

impl MemoryRecordStore {
    /// Create a store holding `records`.
    pub fn new(records: Vec<Record>) -> Self {
        Self { records }
    }

    /// The three sample records with ids "1", "2" and "3".
    pub fn seeded() -> Self {
        Self::new(vec![
            Record::new("1", "Kim Cheolsu", "kim@example.com", 30, "admin"),
            Record::new("2", "Lee Younghee", "lee@example.com", 28, "developer"),
            Record::new("3", "Park Minjun", "park@example.com", 35, "designer"),
        ])
    }

    /// Append `count` synthetic records.
    pub fn with_generated(mut self, count: usize) -> Self {
        self.records.extend(generate(count).records);
        self
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl RecordStore for MemoryRecordStore {
    fn get_by_id(&self, id: &str) -> Result<Record> {
        self.records
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or_else(|| WireError::RecordNotFound(id.to_string()))
    }

    fn get_all(&self) -> RecordList {
        RecordList::from(self.records.clone())
    }
}

/// Synthetic records for size comparisons.
///
/// Record `i` (1-based) has id `user{i}`, age `20 + i % 50`, role `admin`
/// for multiples of 5, `developer` for other multiples of 3, else `member`.
pub fn generate(count: usize) -> RecordList {
    (1..=count)
        .map(|i| {
            let role = if i % 5 == 0 {
                "admin"
            } else if i % 3 == 0 {
                "developer"
            } else {
                "member"
            };
            Record::new(
                format!("user{}", i),
                format!("User {}", i),
                format!("user{}@example.com", i),
                20 + (i % 50) as u32,
                role,
            )
        })
        .collect::<Vec<_>>()
        .into()
}

/// [`RecordService`] answering from a local store.
pub struct StoreService<S> {
    store: Arc<S>,
}

impl<S: RecordStore> StoreService<S> {
    /// Wrap a store.
    pub fn new(store: S) -> Self {
        Self {
            store: Arc::new(store),
        }
    }

    /// Wrap a shared store.
    pub fn from_shared(store: Arc<S>) -> Self {
        Self { store }
    }
}

impl<S: RecordStore> RecordService for StoreService<S> {
    fn get_by_id(&self, id: &str) -> BoxFuture<'_, Result<Record>> {
        let result = self.store.get_by_id(id);
        Box::pin(async move { result })
    }

    fn get_all(&self) -> BoxFuture<'_, Result<RecordList>> {
        let list = self.store.get_all();
        Box::pin(async move { Ok(list) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeded_lookup() {
        let store = MemoryRecordStore::seeded();
        assert_eq!(store.len(), 3);

        let record = store.get_by_id("2").unwrap();
        assert_eq!(record.email, "lee@example.com");
    }

    #[test]
    fn test_missing_record() {
        let store = MemoryRecordStore::seeded();
        let err = store.get_by_id("does-not-exist").unwrap_err();
        assert_eq!(err.to_string(), "record does-not-exist not found");
    }

    #[test]
    fn test_get_all_preserves_order() {
        let ids: Vec<_> = MemoryRecordStore::seeded()
            .get_all()
            .records
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, ["1", "2", "3"]);
    }

    #[test]
    fn test_generate() {
        let list = generate(15);
        assert_eq!(list.records.len(), 15);

        let first = &list.records[0];
        assert_eq!(first.id, "user1");
        assert_eq!(first.name, "User 1");
        assert_eq!(first.age, 21);
        assert_eq!(first.role, "member");

        assert_eq!(list.records[2].role, "developer");
        assert_eq!(list.records[4].role, "admin");
        assert_eq!(list.records[14].role, "admin");
        assert_eq!(list.records[5].role, "developer");
    }

    #[test]
    fn test_generate_age_wraps() {
        let list = generate(50);
        assert_eq!(list.records[48].age, 69);
        assert_eq!(list.records[49].age, 20);
    }

    #[test]
    fn test_with_generated_appends() {
        let store = MemoryRecordStore::seeded().with_generated(10);
        assert_eq!(store.len(), 13);
        assert!(store.get_by_id("user10").is_ok());
    }

    #[tokio::test]
    async fn test_store_service() {
        let service = StoreService::new(MemoryRecordStore::seeded());

        let record = service.get_by_id("1").await.unwrap();
        assert_eq!(record.name, "Kim Cheolsu");

        let all = service.get_all().await.unwrap();
        assert_eq!(all.records.len(), 3);

        assert!(matches!(
            service.get_by_id("nope").await,
            Err(WireError::RecordNotFound(_))
        ));
    }
}
