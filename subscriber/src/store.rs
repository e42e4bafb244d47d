//! Client-side state merged from the push and pull paths.
//!
//! Both paths apply last-write-wins by identifier, so a pushed event and a
//! polled row for the same scan converge to one record no matter which
//! arrives first.

use std::collections::BTreeMap;

use tokio::sync::RwLock;

use crate::normalize::{LogEntry, Registration};

struct StoreInner {
    /// Newest-first, unique ids, length bounded by `cap`.
    logs: Vec<LogEntry>,
    registrations: BTreeMap<i64, Registration>,
}

/// Bounded cache of recent scans plus the registered-tag list.
pub struct LogStore {
    cap: usize,
    inner: RwLock<StoreInner>,
}

impl LogStore {
    pub fn new(cap: usize) -> Self {
        Self {
            cap,
            inner: RwLock::new(StoreInner {
                logs: Vec::new(),
                registrations: BTreeMap::new(),
            }),
        }
    }

    /// Push-path update: prepend, evict any prior record with the same id,
    /// truncate to the cap. Most recent write wins.
    pub async fn upsert_log(&self, entry: LogEntry) {
        let mut inner = self.inner.write().await;
        inner.logs.retain(|log| log.id != entry.id);
        inner.logs.insert(0, entry);
        inner.logs.truncate(self.cap);
    }

    /// Pull-path merge: incoming rows are newest-first and take precedence
    /// over cached rows with the same id.
    pub async fn merge_logs(&self, incoming: Vec<LogEntry>) {
        let mut inner = self.inner.write().await;
        let mut merged: Vec<LogEntry> = Vec::with_capacity(incoming.len() + inner.logs.len());
        merged.extend(incoming);
        merged.extend(inner.logs.drain(..));

        let mut seen = std::collections::HashSet::new();
        merged.retain(|log| seen.insert(log.id));
        merged.truncate(self.cap);
        inner.logs = merged;
    }

    /// Full-resync replacement.
    pub async fn replace_logs(&self, mut incoming: Vec<LogEntry>) {
        incoming.truncate(self.cap);
        let mut seen = std::collections::HashSet::new();
        incoming.retain(|log| seen.insert(log.id));
        self.inner.write().await.logs = incoming;
    }

    pub async fn logs(&self) -> Vec<LogEntry> {
        self.inner.read().await.logs.clone()
    }

    /// Id of the newest cached log, used as the incremental fetch cursor.
    pub async fn latest_log_id(&self) -> i64 {
        self.inner
            .read()
            .await
            .logs
            .first()
            .map(|log| log.id)
            .unwrap_or(0)
    }

    pub async fn merge_registrations(&self, incoming: Vec<Registration>) {
        let mut inner = self.inner.write().await;
        for reg in incoming {
            inner.registrations.insert(reg.id, reg);
        }
    }

    pub async fn replace_registrations(&self, incoming: Vec<Registration>) {
        let mut inner = self.inner.write().await;
        inner.registrations = incoming.into_iter().map(|reg| (reg.id, reg)).collect();
    }

    /// Registered tags in ascending id order.
    pub async fn registrations(&self) -> Vec<Registration> {
        self.inner.read().await.registrations.values().cloned().collect()
    }

    pub async fn log_count(&self) -> usize {
        self.inner.read().await.logs.len()
    }
}
