//! Registry service: orchestrates the mock store and keeps the route
//! index consistent.
//!
//! The registry owns the only mutable route index in the process, behind
//! a `tokio::sync::RwLock`. Every mutating operation performs the write,
//! then awaits a full index rebuild from a fresh store snapshot before
//! returning, so a caller that writes and immediately dispatches sees its
//! own write.

use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::index::{dispatch_key, RouteEntry, RouteIndex};
use crate::store::{MockFields, MockRow, MockStore};

pub struct Registry {
    store: MockStore,
    index: RwLock<RouteIndex>,
}

impl Registry {
    /// Create a registry over `store` and perform the initial index load.
    pub async fn open(store: MockStore) -> anyhow::Result<Self> {
        let registry = Self {
            store,
            index: RwLock::new(RouteIndex::default()),
        };
        registry.reload().await?;

        info!(
            routes = registry.index.read().await.len(),
            db = %registry.store.db_path().display(),
            "Mock registry initialized"
        );
        Ok(registry)
    }

    pub fn store(&self) -> &MockStore {
        &self.store
    }

    /// Discard the index and rebuild it from a full store snapshot.
    pub async fn reload(&self) -> anyhow::Result<()> {
        let rows = self.store.list_mocks().await?;
        let rebuilt = RouteIndex::rebuild(&rows);
        debug!(rows = rows.len(), routes = rebuilt.len(), "Route index rebuilt");
        *self.index.write().await = rebuilt;
        Ok(())
    }

    /// Register a new mock. Persists unconditionally (duplicate
    /// `(method, route)` pairs are legal and shadow at rebuild) and
    /// returns the new row id.
    pub async fn add_mock(&self, fields: MockFields) -> anyhow::Result<i64> {
        let id = self.store.insert_mock(fields).await?;
        self.reload().await?;
        Ok(id)
    }

    /// List every stored mock verbatim, including row ids.
    pub async fn list_mocks(&self) -> anyhow::Result<Vec<MockRow>> {
        self.store.list_mocks().await
    }

    /// Update the mock with `id` in place. Returns whether a row matched.
    pub async fn update_mock(&self, id: i64, fields: MockFields) -> anyhow::Result<bool> {
        let matched = self.store.update_mock(id, fields).await?;
        self.reload().await?;
        Ok(matched)
    }

    /// Delete the mock with `id`. A missing row is not an error.
    pub async fn delete_mock(&self, id: i64) -> anyhow::Result<()> {
        let deleted = self.store.delete_mock(id).await?;
        debug!(id, deleted, "Mock delete applied");
        self.reload().await?;
        Ok(())
    }

    /// Look up the canned response for a request method and route segment.
    pub async fn dispatch(&self, method: &str, route: &str) -> Option<RouteEntry> {
        let key = dispatch_key(method, route);
        self.index.read().await.lookup(&key).cloned()
    }

    /// Upsert the event record for `id` with a serialized JSON body.
    pub async fn register_event(
        &self,
        id: &str,
        body: &serde_json::Value,
    ) -> anyhow::Result<()> {
        let data = serde_json::to_string(body)?;
        self.store.upsert_event(id, data).await
    }

    /// Fetch the event record for `id`; an absent record reads as `{}`.
    pub async fn fetch_event(&self, id: &str) -> anyhow::Result<serde_json::Value> {
        match self.store.get_event(id).await? {
            Some(data) => Ok(serde_json::from_str(&data)
                .unwrap_or(serde_json::Value::String(data))),
            None => Ok(serde_json::json!({})),
        }
    }

    /// Remove the event record for `id`; idempotent.
    pub async fn remove_event(&self, id: &str) -> anyhow::Result<()> {
        self.store.delete_event(id).await
    }

    /// Presence check used by the fixture overlay. Only existence
    /// matters; the stored payload is not inspected.
    pub async fn event_registered(&self, id: &str) -> anyhow::Result<bool> {
        Ok(self.store.get_event(id).await?.is_some())
    }
}
