//! Grouped, time-ordered scans over the secondary indices (§4.1
//! `iter_by_key`), and the read-side helpers the resolver and exporter need.

use std::collections::BTreeMap;

use tracing::instrument;

use super::{DbResult, Store, tables};
use crate::model::{Message, MessageId, Timestamp, UserId};

/// Which secondary index to scan, one per row of the §4.4 keying table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKeySelector {
    Repost,
    Fingerprint,
    SimilarityBucket,
    Reply,
    Url,
    /// `co_post`: a single constant key, no split.
    Post,
}

/// The value of one action key, whatever shape it has for a given selector.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum ActionKey {
    Message(MessageId),
    Hash(u64),
    Url(String),
    Post,
}

fn min_message_id() -> MessageId {
    MessageId(String::new())
}

impl Store {
    /// All distinct action keys for `selector`, in ascending order. Cheap
    /// relative to a full group scan: only the index's key column is read.
    #[instrument(skip(self))]
    pub fn distinct_action_keys(&self, selector: ActionKeySelector) -> DbResult<Vec<ActionKey>> {
        self.read_with(|dbtx| {
            Ok(match selector {
                ActionKeySelector::Repost => {
                    let t = dbtx.open_table(&tables::idx_repost::TABLE)?;
                    let mut keys = vec![];
                    for row in t.range(..)? {
                        let (k, _) = row?;
                        keys.push(k.value().0);
                    }
                    keys.dedup();
                    keys.into_iter().map(ActionKey::Message).collect()
                }
                ActionKeySelector::Fingerprint => {
                    let t = dbtx.open_table(&tables::idx_fingerprint::TABLE)?;
                    let mut keys = vec![];
                    for row in t.range(..)? {
                        let (k, _) = row?;
                        keys.push(k.value().0);
                    }
                    keys.dedup();
                    keys.into_iter().map(ActionKey::Hash).collect()
                }
                ActionKeySelector::SimilarityBucket => {
                    let t = dbtx.open_table(&tables::idx_similarity_bucket::TABLE)?;
                    let mut keys = vec![];
                    for row in t.range(..)? {
                        let (k, _) = row?;
                        keys.push(k.value().0);
                    }
                    keys.dedup();
                    keys.into_iter().map(ActionKey::Hash).collect()
                }
                ActionKeySelector::Reply => {
                    let t = dbtx.open_table(&tables::idx_reply::TABLE)?;
                    let mut keys = vec![];
                    for row in t.range(..)? {
                        let (k, _) = row?;
                        keys.push(k.value().0);
                    }
                    keys.dedup();
                    keys.into_iter().map(ActionKey::Message).collect()
                }
                ActionKeySelector::Url => {
                    let t = dbtx.open_table(&tables::idx_url::TABLE)?;
                    let mut keys = vec![];
                    for row in t.range(..)? {
                        let (k, _) = row?;
                        keys.push(k.value().0);
                    }
                    keys.dedup();
                    keys.into_iter().map(ActionKey::Url).collect()
                }
                ActionKeySelector::Post => vec![ActionKey::Post],
            })
        })
    }

    /// All messages for one action key, sorted by `(timestamp, message_id)`
    /// per the §4.4 tie-break.
    #[instrument(skip(self))]
    pub fn messages_for_action_key(
        &self,
        selector: ActionKeySelector,
        key: &ActionKey,
    ) -> DbResult<Vec<Message>> {
        self.read_with(|dbtx| {
            let ids: Vec<MessageId> = match (selector, key) {
                (ActionKeySelector::Repost, ActionKey::Message(k)) => {
                    let t = dbtx.open_table(&tables::idx_repost::TABLE)?;
                    let lower = (k.clone(), Timestamp::MIN, min_message_id());
                    let mut ids = vec![];
                    for row in t.range(&lower..)? {
                        let (row_key, _) = row?;
                        let (rk, _, mid) = row_key.value();
                        if &rk != k {
                            break;
                        }
                        ids.push(mid);
                    }
                    ids
                }
                (ActionKeySelector::Fingerprint, ActionKey::Hash(k)) => {
                    let t = dbtx.open_table(&tables::idx_fingerprint::TABLE)?;
                    let lower = (*k, Timestamp::MIN, min_message_id());
                    let mut ids = vec![];
                    for row in t.range(&lower..)? {
                        let (row_key, _) = row?;
                        let (rk, _, mid) = row_key.value();
                        if rk != *k {
                            break;
                        }
                        ids.push(mid);
                    }
                    ids
                }
                (ActionKeySelector::SimilarityBucket, ActionKey::Hash(k)) => {
                    let t = dbtx.open_table(&tables::idx_similarity_bucket::TABLE)?;
                    let lower = (*k, Timestamp::MIN, min_message_id());
                    let mut ids = vec![];
                    for row in t.range(&lower..)? {
                        let (row_key, _) = row?;
                        let (rk, _, mid) = row_key.value();
                        if rk != *k {
                            break;
                        }
                        ids.push(mid);
                    }
                    ids
                }
                (ActionKeySelector::Reply, ActionKey::Message(k)) => {
                    let t = dbtx.open_table(&tables::idx_reply::TABLE)?;
                    let lower = (k.clone(), Timestamp::MIN, min_message_id());
                    let mut ids = vec![];
                    for row in t.range(&lower..)? {
                        let (row_key, _) = row?;
                        let (rk, _, mid) = row_key.value();
                        if &rk != k {
                            break;
                        }
                        ids.push(mid);
                    }
                    ids
                }
                (ActionKeySelector::Url, ActionKey::Url(k)) => {
                    let t = dbtx.open_table(&tables::idx_url::TABLE)?;
                    let lower = (k.clone(), Timestamp::MIN, min_message_id());
                    let mut ids = vec![];
                    for row in t.range(&lower..)? {
                        let (row_key, _) = row?;
                        let (rk, _, mid) = row_key.value();
                        if &rk != k {
                            break;
                        }
                        ids.push(mid);
                    }
                    ids
                }
                (ActionKeySelector::Post, ActionKey::Post) => {
                    let t = dbtx.open_table(&tables::idx_post::TABLE)?;
                    let mut ids = vec![];
                    for row in t.range(..)? {
                        let (k, _) = row?;
                        ids.push(k.value().1);
                    }
                    ids
                }
                _ => return Ok(vec![]),
            };

            let messages_t = dbtx.open_table(&tables::messages::TABLE)?;
            let mut out = Vec::with_capacity(ids.len());
            for id in ids {
                if let Some(m) = messages_t.get(&id)? {
                    out.push(m.value());
                }
            }
            Ok(out)
        })
    }

    #[instrument(skip(self))]
    pub fn resolved_url(&self, url: &str) -> DbResult<Option<tables::ResolvedUrlRecord>> {
        self.read_with(|dbtx| {
            let t = dbtx.open_table(&tables::resolved_url::TABLE)?;
            Ok(t.get(&url.to_string())?.map(|g| g.value()))
        })
    }

    /// Every distinct raw URL appearing on any message, for the URL
    /// Resolver's work queue (§4.2).
    #[instrument(skip(self))]
    pub fn all_urls(&self) -> DbResult<Vec<String>> {
        self.read_with(|dbtx| {
            let t = dbtx.open_table(&tables::idx_url::TABLE)?;
            let mut seen = std::collections::BTreeSet::new();
            for row in t.range(..)? {
                let (k, _) = row?;
                seen.insert(k.value().0);
            }
            Ok(seen.into_iter().collect())
        })
    }

    /// Resolves `raw_url` through the store if a resolution exists and is
    /// successful, falling back to the raw string — the co-link action key
    /// "resolved-url-or-raw" from §4.4.
    pub fn resolved_or_raw_url(&self, raw_url: &str) -> DbResult<String> {
        Ok(match self.resolved_url(raw_url)? {
            Some(tables::ResolvedUrlRecord::Resolved { canonical }) => canonical,
            _ => raw_url.to_string(),
        })
    }

    /// Per §4.5: the `n` most recent messages (by timestamp) for every user
    /// that has at least one message.
    #[instrument(skip(self))]
    pub fn latest_messages_per_user(
        &self,
        n: usize,
    ) -> DbResult<Vec<(UserId, crate::model::Username, Vec<Message>)>> {
        self.read_with(|dbtx| {
            let messages_t = dbtx.open_table(&tables::messages::TABLE)?;
            // BTreeMap keeps output deterministic (sorted by user_id).
            let mut by_user: BTreeMap<UserId, (crate::model::Username, Vec<Message>)> =
                BTreeMap::new();

            for row in messages_t.range(..)? {
                let (_, v) = row?;
                let message = v.value();
                let entry = by_user
                    .entry(message.user_id.clone())
                    .or_insert_with(|| (message.username.clone(), vec![]));
                entry.0 = message.username.clone();
                entry.1.push(message);
            }

            let mut out = Vec::with_capacity(by_user.len());
            for (user_id, (username, mut messages)) in by_user {
                messages.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
                messages.truncate(n);
                out.push((user_id, username, messages));
            }
            Ok(out)
        })
    }
}
