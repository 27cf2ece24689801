//! Cursor-paginated connections and the page merge.
//!
//! A [`Connection`] is what a list field resolves to once normalized: the
//! ordered edges fetched so far, each pointing at an entity in the store,
//! plus the continuation [`PageInfo`] of the most recent page.
//!
//! [`merge_page`] is append-only. It never reorders and never
//! de-duplicates: overlapping fetches are prevented upstream by the loading
//! guard in [`crate::connection::ConnectionCache`].

use serde::{Deserialize, Serialize};

use crate::model::EntityKey;

/// Continuation metadata of a page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    pub end_cursor: Option<String>,
    pub has_next_page: bool,
}

/// One normalized edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub cursor: Option<String>,
    pub node: EntityKey,
}

/// Accumulated edges of a list field plus the latest page info.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    pub edges: Vec<Edge>,
    pub page_info: PageInfo,
}

impl Connection {
    #[must_use]
    pub const fn new(edges: Vec<Edge>, page_info: PageInfo) -> Self {
        Self { edges, page_info }
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.edges.len()
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Node keys in edge order.
    pub fn nodes(&self) -> impl Iterator<Item = &EntityKey> {
        self.edges.iter().map(|edge| &edge.node)
    }

    /// Cursor to pass as `after` for the next page, if there is one.
    #[must_use]
    pub fn next_cursor(&self) -> Option<&str> {
        if self.page_info.has_next_page {
            self.page_info.end_cursor.as_deref()
        } else {
            None
        }
    }
}

/// Merge an incoming page into the previously accumulated connection.
///
/// - `incoming` absent or without edges (a failed or empty fetch-more):
///   `previous` is returned untouched, page info included.
/// - otherwise: `previous.edges ++ incoming.edges`, with the incoming page
///   info replacing the old one.
#[must_use]
pub fn merge_page(previous: Connection, incoming: Option<Connection>) -> Connection {
    let Some(incoming) = incoming.filter(|page| !page.is_empty()) else {
        tracing::debug!(edges = previous.len(), "empty page, keeping previous connection");
        return previous;
    };

    let mut edges = previous.edges;
    let added = incoming.edges.len();
    edges.extend(incoming.edges);
    tracing::debug!(
        added,
        total = edges.len(),
        has_next_page = incoming.page_info.has_next_page,
        "merged page"
    );

    Connection {
        edges,
        page_info: incoming.page_info,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edge(id: &str) -> Edge {
        Edge {
            cursor: None,
            node: EntityKey::issue(id).expect("valid key"),
        }
    }

    fn page(ids: &[&str], end: &str, more: bool) -> Connection {
        Connection::new(
            ids.iter().map(|id| edge(id)).collect(),
            PageInfo {
                end_cursor: Some(end.to_string()),
                has_next_page: more,
            },
        )
    }

    #[test]
    fn appends_in_call_order_and_takes_newest_page_info() {
        let first = page(&["I1", "I2"], "c2", true);
        let merged = merge_page(first, Some(page(&["I3"], "c3", false)));

        let ids: Vec<_> = merged.nodes().map(EntityKey::id).collect();
        assert_eq!(ids, ["I1", "I2", "I3"]);
        assert_eq!(merged.page_info.end_cursor.as_deref(), Some("c3"));
        assert!(!merged.page_info.has_next_page);
        assert_eq!(merged.next_cursor(), None);
    }

    #[test]
    fn absent_page_is_identity() {
        let first = page(&["I1"], "c1", true);
        assert_eq!(merge_page(first.clone(), None), first);
    }

    #[test]
    fn edgeless_page_is_identity() {
        let first = page(&["I1"], "c1", true);
        let empty = page(&[], "c9", false);
        assert_eq!(merge_page(first.clone(), Some(empty)), first);
    }

    #[test]
    fn duplicate_nodes_from_server_are_kept() {
        let merged = merge_page(page(&["I1"], "c1", true), Some(page(&["I1"], "c2", false)));
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn next_cursor_requires_has_next_page() {
        assert_eq!(page(&["I1"], "c1", true).next_cursor(), Some("c1"));
        assert_eq!(Connection::default().next_cursor(), None);
    }
}
