//! Core data model shared by every component: the normalized message row,
//! typed identifiers, and the network-kind enum that parameterizes the join
//! engine and the store's per-network tables.

use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

macro_rules! string_newtype {
    ($name:ident) => {
        #[derive(
            Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Encode, Decode, Serialize, Deserialize,
        )]
        pub struct $name(pub String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_newtype!(MessageId);
string_newtype!(UserId);
string_newtype!(Username);

/// Seconds since a fixed (implementation-irrelevant) epoch.
///
/// Wraps `f64` with a total order so it can be used as a `redb` key; NaN is
/// rejected at construction (§3 invariant: timestamp is finite and non-NaN).
///
/// `redb` orders keys by their encoded bytes, not by decoding and comparing,
/// so the raw IEEE-754 bit pattern can't be used directly: negative floats
/// encode to byte strings *greater* than positive ones (the sign bit sorts
/// the wrong way). `Encode`/`Decode` below map the bits through the standard
/// monotonic float-to-uint transform (flip the sign bit for non-negatives,
/// flip all bits for negatives) before writing them out, so encoded byte
/// order matches numeric order across the whole finite range.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Timestamp(f64);

/// Monotonic bijection from `f64` bits to `u64` such that `a < b` (via
/// `total_cmp`) iff `to_ordered_bits(a) < to_ordered_bits(b)`, for every
/// finite `a`, `b`. Undefined for NaN, which `Timestamp` never stores.
fn to_ordered_bits(secs: f64) -> u64 {
    let bits = secs.to_bits();
    let mask = if bits >> 63 == 1 { u64::MAX } else { 0x8000_0000_0000_0000 };
    bits ^ mask
}

fn from_ordered_bits(ordered: u64) -> f64 {
    let mask = if ordered >> 63 == 1 { 0x8000_0000_0000_0000 } else { u64::MAX };
    f64::from_bits(ordered ^ mask)
}

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp(0.0);
    /// Smallest representable finite timestamp, for use as a range lower
    /// bound over an entire action-key group.
    pub const MIN: Timestamp = Timestamp(f64::MIN);

    /// Returns `None` if `secs` is not finite.
    pub fn new(secs: f64) -> Option<Self> {
        secs.is_finite().then_some(Self(secs))
    }

    pub fn as_secs_f64(&self) -> f64 {
        self.0
    }

    pub fn saturating_sub(&self, other: Timestamp) -> f64 {
        (self.0 - other.0).max(0.0)
    }
}

impl Encode for Timestamp {
    fn encode<E: bincode::enc::Encoder>(
        &self,
        encoder: &mut E,
    ) -> Result<(), bincode::error::EncodeError> {
        to_ordered_bits(self.0).to_be_bytes().encode(encoder)
    }
}

impl<Context> Decode<Context> for Timestamp {
    fn decode<D: bincode::de::Decoder<Context = Context>>(
        decoder: &mut D,
    ) -> Result<Self, bincode::error::DecodeError> {
        let bytes = <[u8; 8]>::decode(decoder)?;
        Ok(Timestamp(from_ordered_bits(u64::from_be_bytes(bytes))))
    }
}

impl PartialEq for Timestamp {
    fn eq(&self, other: &Self) -> bool {
        self.0.total_cmp(&other.0) == Ordering::Equal
    }
}
impl Eq for Timestamp {}

impl PartialOrd for Timestamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Timestamp {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}
impl Hash for Timestamp {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.to_bits().hash(state);
    }
}

/// A single normalized message row: both the ingest contract (§6.1) and the
/// stored record shape, since the core accepts rows already in this shape.
#[derive(Debug, Clone, Encode, Decode, Serialize, Deserialize)]
pub struct Message {
    pub message_id: MessageId,
    pub user_id: UserId,
    pub username: Username,
    pub repost_id: Option<MessageId>,
    pub reply_id: Option<MessageId>,
    pub message: String,
    pub timestamp: Timestamp,
    pub urls: Vec<String>,
}

impl Message {
    pub fn is_repost(&self) -> bool {
        self.repost_id.is_some()
    }

    pub fn is_reply(&self) -> bool {
        self.reply_id.is_some() && self.repost_id.is_none()
    }

    pub fn is_original(&self) -> bool {
        self.repost_id.is_none() && self.reply_id.is_none()
    }
}

/// The ingest contract (§6.1): what an adapter hands to
/// `Store::insert_messages`, before invariant validation turns it into a
/// [`Message`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedRow {
    pub message_id: String,
    pub user_id: String,
    pub username: String,
    pub repost_id: Option<String>,
    pub reply_id: Option<String>,
    pub message: String,
    pub timestamp: f64,
    pub urls: Vec<String>,
}

/// The five detectable coordination networks, plus `co_post` used as a
/// denominator (§1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Encode, Decode, Serialize, Deserialize)]
pub enum NetworkKind {
    CoRetweet,
    CoTweet,
    CoSimilarTweet,
    CoLink,
    CoReply,
    CoPost,
}

impl NetworkKind {
    /// Stable name used for the backing table and for the GraphML/CSV
    /// `edge_type` attribute.
    pub fn table_name(&self) -> &'static str {
        match self {
            NetworkKind::CoRetweet => "co_retweet",
            NetworkKind::CoTweet => "co_tweet",
            NetworkKind::CoSimilarTweet => "co_similar_tweet",
            NetworkKind::CoLink => "co_link",
            NetworkKind::CoReply => "co_reply",
            NetworkKind::CoPost => "co_post",
        }
    }

    pub fn from_table_name(s: &str) -> Option<Self> {
        Some(match s {
            "co_retweet" => NetworkKind::CoRetweet,
            "co_tweet" => NetworkKind::CoTweet,
            "co_similar_tweet" => NetworkKind::CoSimilarTweet,
            "co_link" => NetworkKind::CoLink,
            "co_reply" => NetworkKind::CoReply,
            "co_post" => NetworkKind::CoPost,
            _ => return None,
        })
    }

    pub const ALL: [NetworkKind; 6] = [
        NetworkKind::CoRetweet,
        NetworkKind::CoTweet,
        NetworkKind::CoSimilarTweet,
        NetworkKind::CoLink,
        NetworkKind::CoReply,
        NetworkKind::CoPost,
    ];
}

/// A directed edge `(user_a, user_b)` with an aggregated occurrence count.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode, Serialize, Deserialize)]
pub struct NetworkEdge {
    pub user_a: UserId,
    pub user_b: UserId,
    pub weight: u64,
}
