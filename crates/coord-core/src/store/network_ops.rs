//! Per-network edge tables: atomic replace after a join run, and the
//! ordered read used by the Network Materializer (§4.5, §6.5).

use tracing::instrument;

use super::{DbResult, LOG_TARGET, Store, tables};
use crate::model::{NetworkEdge, NetworkKind, UserId};

/// The `(user_a, user_b) -> weight` table backing one [`NetworkKind`].
#[derive(Clone, Copy)]
pub struct NetworkTableDef(pub redb_bincode::TableDefinition<'static, (UserId, UserId), u64>);

impl NetworkTableDef {
    pub fn for_kind(kind: NetworkKind) -> Self {
        Self(match kind {
            NetworkKind::CoRetweet => tables::network_co_retweet::TABLE,
            NetworkKind::CoTweet => tables::network_co_tweet::TABLE,
            NetworkKind::CoSimilarTweet => tables::network_co_similar_tweet::TABLE,
            NetworkKind::CoLink => tables::network_co_link::TABLE,
            NetworkKind::CoReply => tables::network_co_reply::TABLE,
            NetworkKind::CoPost => tables::network_co_post::TABLE,
        })
    }
}

impl Store {
    /// Atomically replaces the contents of `kind`'s edge table with `edges`,
    /// dropping any edge under `min_weight` (§4.4: the join engine's output
    /// becomes the network's sole content — a `compute` re-run fully
    /// supersedes the previous one).
    #[instrument(skip(self, edges))]
    pub fn write_network(
        &self,
        kind: NetworkKind,
        edges: impl IntoIterator<Item = NetworkEdge>,
        min_weight: u64,
    ) -> DbResult<u64> {
        let def = NetworkTableDef::for_kind(kind);
        self.write_with(|dbtx| {
            // Dropping and reopening clears prior contents within the same
            // transaction; a `compute` re-run fully supersedes the old edges.
            let _ = dbtx.delete_table(&def.0);
            let mut table = dbtx.open_table(&def.0)?;
            let mut written = 0u64;
            for edge in edges {
                if edge.weight < min_weight {
                    continue;
                }
                table.insert(&(edge.user_a, edge.user_b), &edge.weight)?;
                written += 1;
            }
            tracing::debug!(target: LOG_TARGET, network = kind.table_name(), written, "wrote network");
            Ok(written)
        })
    }

    /// Reads back a network's edges, sorted by `(user_a, user_b)` for
    /// deterministic export ordering.
    #[instrument(skip(self))]
    pub fn read_network(&self, kind: NetworkKind) -> DbResult<Vec<NetworkEdge>> {
        let def = NetworkTableDef::for_kind(kind);
        self.read_with(|dbtx| {
            let table = dbtx.open_table(&def.0)?;
            let mut edges = vec![];
            for row in table.range(..)? {
                let (k, v) = row?;
                let (user_a, user_b) = k.value();
                edges.push(NetworkEdge { user_a, user_b, weight: v.value() });
            }
            Ok(edges)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_network_replaces_and_filters_by_weight() {
        let store = Store::open_in_memory().unwrap();
        let edges = vec![
            NetworkEdge { user_a: "a".into(), user_b: "b".into(), weight: 1 },
            NetworkEdge { user_a: "a".into(), user_b: "c".into(), weight: 5 },
        ];
        let written = store.write_network(NetworkKind::CoTweet, edges, 2).unwrap();
        assert_eq!(written, 1);

        let read = store.read_network(NetworkKind::CoTweet).unwrap();
        assert_eq!(read.len(), 1);
        assert_eq!(read[0].weight, 5);

        // Re-running supersedes the previous content entirely.
        let edges2 = vec![NetworkEdge { user_a: "x".into(), user_b: "y".into(), weight: 9 }];
        store.write_network(NetworkKind::CoTweet, edges2, 0).unwrap();
        let read2 = store.read_network(NetworkKind::CoTweet).unwrap();
        assert_eq!(read2.len(), 1);
        assert_eq!(read2[0].user_a.as_str(), "x");
    }
}
