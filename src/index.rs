//! In-memory route index derived from the mock store.
//!
//! The index is a pure cache: it is discarded and rebuilt wholesale from a
//! store snapshot after every mutation, never patched incrementally.

use std::collections::HashMap;

use tracing::warn;

use crate::store::MockRow;

/// The body half of an index entry.
///
/// Stored response text is parsed as JSON at rebuild time; text that does
/// not parse is kept as the raw string and served as-is.
#[derive(Debug, Clone, PartialEq)]
pub enum StoredBody {
    Json(serde_json::Value),
    Raw(String),
}

/// What the dispatcher serves for one `(method, route)` key.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteEntry {
    pub status: u16,
    pub body: StoredBody,
}

/// Compute the dispatch key for a method and route segment.
///
/// Exact string concatenation, case-sensitive on both sides: a mock
/// registered for `GET` does not answer a request arriving as `get`.
pub fn dispatch_key(method: &str, route: &str) -> String {
    format!("{method}/{route}")
}

/// Derived lookup table from dispatch key to canned response.
#[derive(Debug, Default)]
pub struct RouteIndex {
    entries: HashMap<String, RouteEntry>,
}

impl RouteIndex {
    /// Build a fresh index from a full store snapshot.
    ///
    /// Rows are inserted in snapshot order; duplicate keys shadow earlier
    /// rows (last-write-wins).
    pub fn rebuild(rows: &[MockRow]) -> Self {
        let mut entries = HashMap::with_capacity(rows.len());

        for row in rows {
            let body = match serde_json::from_str::<serde_json::Value>(&row.response) {
                Ok(value) => StoredBody::Json(value),
                Err(err) => {
                    warn!(
                        mock_id = row.id,
                        route = %row.route,
                        error = %err,
                        "Stored response is not valid JSON, serving raw string"
                    );
                    StoredBody::Raw(row.response.clone())
                }
            };

            entries.insert(
                dispatch_key(&row.method, &row.route),
                RouteEntry {
                    status: row.status,
                    body,
                },
            );
        }

        Self { entries }
    }

    pub fn lookup(&self, key: &str) -> Option<&RouteEntry> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
