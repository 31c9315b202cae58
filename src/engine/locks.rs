use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

/// Per-document reader/writer locks, created on first use and dropped from the
/// table once nobody holds or waits on them.
#[derive(Debug, Default)]
pub struct DocumentLocks {
    locks: Mutex<HashMap<String, Arc<RwLock<()>>>>,
}

#[derive(Debug)]
enum Held {
    Read { _guard: OwnedRwLockReadGuard<()> },
    Write { _guard: OwnedRwLockWriteGuard<()> },
}

/// Access to one document's sub-index and chunk table; released on drop
#[derive(Debug)]
pub struct DocumentGuard<'a> {
    locks: &'a DocumentLocks,
    document_id: String,
    held: Option<Held>,
}

impl DocumentGuard<'_> {
    #[inline]
    pub fn is_exclusive(&self) -> bool {
        matches!(self.held, Some(Held::Write { .. }))
    }
}

impl Drop for DocumentGuard<'_> {
    fn drop(&mut self) {
        // Release the lock before pruning so the table entry is no longer shared
        self.held.take();
        self.locks.release(&self.document_id);
    }
}

impl DocumentLocks {
    /// Shared access for queries
    pub async fn read(&self, document_id: &str) -> DocumentGuard<'_> {
        // Built before the wait so a cancelled wait still releases the entry
        let mut guard = self.unheld(document_id);
        let lock = self.handle(document_id);
        guard.held = Some(Held::Read {
            _guard: lock.read_owned().await,
        });
        guard
    }

    /// Exclusive access for adds, deletes and clears
    pub async fn write(&self, document_id: &str) -> DocumentGuard<'_> {
        let mut guard = self.unheld(document_id);
        let lock = self.handle(document_id);
        guard.held = Some(Held::Write {
            _guard: lock.write_owned().await,
        });
        guard
    }

    /// Number of documents with a live lock entry
    #[inline]
    pub fn len(&self) -> usize {
        self.table().len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.table().is_empty()
    }

    fn unheld(&self, document_id: &str) -> DocumentGuard<'_> {
        DocumentGuard {
            locks: self,
            document_id: document_id.to_string(),
            held: None,
        }
    }

    /// Also prunes idle entries, including any a cancelled wait left behind
    fn handle(&self, document_id: &str) -> Arc<RwLock<()>> {
        let mut table = self.table();
        table.retain(|_, lock| Arc::strong_count(lock) > 1);
        Arc::clone(table.entry(document_id.to_string()).or_default())
    }

    fn release(&self, document_id: &str) {
        let mut table = self.table();
        if table
            .get(document_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            table.remove(document_id);
        }
    }

    fn table(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<RwLock<()>>>> {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
