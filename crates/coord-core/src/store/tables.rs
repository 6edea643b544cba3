//! `redb` table definitions for the normalized corpus store (§4.1, §6.5).
//!
//! Every message-derived secondary index is keyed `(action_key, timestamp,
//! message_id)` so that `iter_by_key` (see `query_ops.rs`) is a single
//! ordered range scan per action-key group, with ties broken by
//! `message_id` per §4.4's tie-break rule.

use bincode::{Decode, Encode};
use serde::Serialize;

use crate::model::{Timestamp, UserId};

#[macro_export]
macro_rules! def_table {
    ($(#[$outer:meta])*
        $name:ident : $k:ty => $v:ty) => {
        #[allow(unused)]
        $(#[$outer])*
        pub mod $name {
            use super::*;
            pub type Key = $k;
            pub type Value = $v;
            pub type Definition<'a> = redb_bincode::TableDefinition<'a, Key, Value>;
            pub type Table<'a> = redb_bincode::Table<'a, Key, Value>;
            pub const TABLE: Definition = redb_bincode::TableDefinition::new(stringify!($name));
        }
    };
}

def_table! {
    /// Tracks schema version for migrations.
    schema_version: () => u64
}

def_table! {
    /// The normalized corpus: every accepted message, keyed by its primary id.
    messages: crate::model::MessageId => crate::model::Message
}

def_table! {
    /// Co-retweet index: groups reposts by the original message they repost.
    ///
    /// Key: (repost_id, timestamp, message_id)
    idx_repost: (crate::model::MessageId, Timestamp, crate::model::MessageId) => ()
}

def_table! {
    /// Co-tweet index: groups non-repost messages by exact-text fingerprint.
    ///
    /// Key: (fingerprint, timestamp, message_id)
    idx_fingerprint: (u64, Timestamp, crate::model::MessageId) => ()
}

def_table! {
    /// Co-similarity index: groups non-repost messages by the similarity
    /// metric's coarse bucket key.
    ///
    /// Key: (bucket, timestamp, message_id)
    idx_similarity_bucket: (u64, Timestamp, crate::model::MessageId) => ()
}

def_table! {
    /// Co-reply index: groups replies by the message they reply to.
    ///
    /// Key: (reply_id, timestamp, message_id)
    idx_reply: (crate::model::MessageId, Timestamp, crate::model::MessageId) => ()
}

def_table! {
    /// Co-link index: one row per (non-repost message, url) pair.
    ///
    /// Key: (url, timestamp, message_id)
    idx_url: (String, Timestamp, crate::model::MessageId) => ()
}

def_table! {
    /// Co-post index: every non-repost message, time-ordered (no key split).
    ///
    /// Key: (timestamp, message_id)
    idx_post: (Timestamp, crate::model::MessageId) => ()
}

/// Outcome of resolving one raw URL, recorded at most once per URL (§4.2).
#[derive(Debug, Clone, Encode, Decode, Serialize, PartialEq, Eq)]
pub enum ResolvedUrlRecord {
    Resolved { canonical: String },
    TransientFailure,
    PermanentFailure,
}

def_table! {
    /// Raw URL -> resolution outcome. Append-only; never overwritten.
    resolved_url: String => ResolvedUrlRecord
}

// ============================================================================
// NETWORK EDGE TABLES
//
// One table per network type (§3, §6.5); all share key/value shape
// `(user_a, user_b) -> weight` so a single accessor can dispatch on
// `NetworkKind` to the right static table definition (see `network_ops.rs`).
// ============================================================================

def_table! {
    network_co_retweet: (UserId, UserId) => u64
}
def_table! {
    network_co_tweet: (UserId, UserId) => u64
}
def_table! {
    network_co_similar_tweet: (UserId, UserId) => u64
}
def_table! {
    network_co_link: (UserId, UserId) => u64
}
def_table! {
    network_co_reply: (UserId, UserId) => u64
}
def_table! {
    network_co_post: (UserId, UserId) => u64
}
