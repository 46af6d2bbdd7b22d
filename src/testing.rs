use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::Value;
use url::Url;

use crate::db::{Collection, Database, Store, StoreError};
use crate::identity::Resolver;
use crate::notices::recording::RecordingNotices;
use crate::state::{Change, Repository};

pub(crate) const ORIGIN: &str = "https://stream.example";

pub(crate) fn resolver() -> Resolver {
    Resolver::new(Url::parse(ORIGIN).expect("origin"))
}

fn disk_full() -> StoreError {
    StoreError::Sqlite(rusqlite::Error::SqliteFailure(
        rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_FULL),
        Some("database or disk is full".to_string()),
    ))
}

/// In-memory SQLite with write counting and switchable write failures.
pub(crate) struct TestStore {
    inner: Database,
    pub(crate) fail_writes: AtomicBool,
    pub(crate) writes: AtomicUsize,
}

impl TestStore {
    pub(crate) fn new() -> Self {
        let inner = Database::open_in_memory().expect("memory database");
        inner.migrate().expect("migrate");
        Self {
            inner,
            fail_writes: AtomicBool::new(false),
            writes: AtomicUsize::new(0),
        }
    }

    pub(crate) fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub(crate) fn set_failing(&self, failing: bool) {
        self.fail_writes.store(failing, Ordering::SeqCst);
    }

    fn write(&self) -> Result<(), StoreError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(disk_full());
        }
        Ok(())
    }
}

impl Store for TestStore {
    fn put(&self, collection: Collection, key: &str, value: &Value) -> Result<(), StoreError> {
        self.write()?;
        self.inner.put(collection, key, value)
    }

    fn delete(&self, collection: Collection, key: &str) -> Result<(), StoreError> {
        self.write()?;
        self.inner.delete(collection, key)
    }

    fn clear(&self, collection: Collection) -> Result<(), StoreError> {
        self.write()?;
        self.inner.clear(collection)
    }

    fn get(&self, collection: Collection, key: &str) -> Result<Option<Value>, StoreError> {
        self.inner.get(collection, key)
    }

    fn get_all(&self, collection: Collection) -> Result<Vec<Value>, StoreError> {
        self.inner.get_all(collection)
    }

    fn get_all_keys(&self, collection: Collection) -> Result<Vec<String>, StoreError> {
        self.inner.get_all_keys(collection)
    }

    fn count(&self, collection: Collection) -> Result<usize, StoreError> {
        self.inner.count(collection)
    }
}

pub(crate) struct Harness {
    pub(crate) store: Arc<TestStore>,
    pub(crate) notices: Arc<RecordingNotices>,
    pub(crate) repo: Arc<Repository>,
    pub(crate) events: Arc<Mutex<Vec<Change>>>,
}

impl Harness {
    pub(crate) fn events(&self) -> Vec<Change> {
        self.events.lock().expect("events").clone()
    }

    pub(crate) fn clear_events(&self) {
        self.events.lock().expect("events").clear();
    }

    pub(crate) fn tags(&self) -> Vec<String> {
        self.events().iter().map(Change::tag).collect()
    }
}

pub(crate) async fn harness_with(store: Arc<TestStore>) -> Harness {
    let notices = Arc::new(RecordingNotices::default());
    let repo = Arc::new(Repository::new(store.clone(), resolver(), notices.clone()));
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    repo.subscribe(move |change| {
        sink.lock().expect("events").push(change.clone());
        Ok(())
    });
    repo.load().await.expect("load");
    Harness {
        store,
        notices,
        repo,
        events,
    }
}

pub(crate) async fn harness() -> Harness {
    harness_with(Arc::new(TestStore::new())).await
}
