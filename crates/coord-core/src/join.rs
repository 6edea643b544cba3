//! The Temporal Join Engine (§4.4): for one network type, produces the
//! aggregated directed edge multiset over the corpus.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use snafu::Snafu;
use tracing::{info, instrument, warn};

use crate::model::{Message, NetworkEdge, NetworkKind, Timestamp, UserId};
use crate::store::{ActionKey, ActionKeySelector, DbError, Store};
use crate::tokenize::{self, JaccardMetric, SimilarityMetric};

const LOG_TARGET: &str = "coord::join";

#[derive(Debug, Snafu)]
pub enum JoinError {
    #[snafu(transparent)]
    Store { source: DbError },
    #[snafu(display("time_window must be finite and >= 0, got {value}"))]
    InvalidWindow { value: f64 },
    #[snafu(display("similarity_threshold must be in [0, 1], got {value}"))]
    InvalidThreshold { value: f64 },
    #[snafu(display("shard failed: {message}"))]
    ShardFailed { message: String },
    #[snafu(display("compute cancelled"))]
    Cancelled,
}

pub type JoinResult<T> = std::result::Result<T, JoinError>;

/// Every transition a `compute` invocation walks through (§4.4), logged at
/// each step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComputeState {
    Pending,
    Scanning,
    Joining,
    Aggregating,
    Writing,
    Done,
    Aborted,
}

/// Parameters of one `compute` invocation.
#[derive(Debug, Clone)]
pub struct JoinConfig {
    pub network: NetworkKind,
    pub time_window: f64,
    pub n_cpus: usize,
    pub min_edge_weight: u64,
    pub similarity_threshold: f64,
    /// Co-link only: group by resolved URL rather than the raw string.
    pub use_resolved_urls: bool,
}

impl JoinConfig {
    fn validate(&self) -> JoinResult<()> {
        if !self.time_window.is_finite() || self.time_window < 0.0 {
            return InvalidWindowSnafu { value: self.time_window }.fail();
        }
        if self.network == NetworkKind::CoSimilarTweet
            && !(0.0..=1.0).contains(&self.similarity_threshold)
        {
            return InvalidThresholdSnafu { value: self.similarity_threshold }.fail();
        }
        if self.network == NetworkKind::CoSimilarTweet && self.similarity_threshold == 0.0 {
            warn!(
                target: LOG_TARGET,
                "similarity_threshold is 0.0: every pair in a bucket's window will match"
            );
        }
        Ok(())
    }
}

/// Items the sliding window operates over, generic so co-similarity can
/// carry pre-tokenized text alongside the message.
trait WindowItem {
    fn user_id(&self) -> &UserId;
    fn timestamp(&self) -> Timestamp;
}

impl WindowItem for Message {
    fn user_id(&self) -> &UserId {
        &self.user_id
    }
    fn timestamp(&self) -> Timestamp {
        self.timestamp
    }
}

struct ScoredMessage {
    message: Message,
    tokens: BTreeSet<String>,
}

impl WindowItem for ScoredMessage {
    fn user_id(&self) -> &UserId {
        &self.message.user_id
    }
    fn timestamp(&self) -> Timestamp {
        self.message.timestamp
    }
}

/// The §4.4 sliding-window pass over one action-key group's events, already
/// sorted by `(timestamp, message_id)`. Emits both directions per match,
/// including self-loops, satisfying laws 3-4 of §8 by construction.
fn sliding_window_edges<T: WindowItem>(
    events: &[T],
    window: f64,
    accept: impl Fn(&T, &T) -> bool,
) -> HashMap<(UserId, UserId), u64> {
    let mut edges = HashMap::new();
    let mut deque: VecDeque<&T> = VecDeque::new();

    for e_i in events {
        while let Some(front) = deque.front() {
            if e_i.timestamp().saturating_sub(front.timestamp()) > window {
                deque.pop_front();
            } else {
                break;
            }
        }

        for e_j in &deque {
            if accept(e_j, e_i) {
                *edges.entry((e_j.user_id().clone(), e_i.user_id().clone())).or_insert(0) += 1;
                *edges.entry((e_i.user_id().clone(), e_j.user_id().clone())).or_insert(0) += 1;
            }
        }

        deque.push_back(e_i);
    }

    edges
}

fn selector_for(network: NetworkKind) -> ActionKeySelector {
    match network {
        NetworkKind::CoRetweet => ActionKeySelector::Repost,
        NetworkKind::CoTweet | NetworkKind::CoSimilarTweet => ActionKeySelector::Fingerprint,
        NetworkKind::CoLink => ActionKeySelector::Url,
        NetworkKind::CoReply => ActionKeySelector::Reply,
        NetworkKind::CoPost => ActionKeySelector::Post,
    }
}

fn merge_edge_maps(
    into: &mut HashMap<(UserId, UserId), u64>,
    from: HashMap<(UserId, UserId), u64>,
) {
    for (k, v) in from {
        *into.entry(k).or_insert(0) += v;
    }
}

/// Partitions `keys` into `n` roughly-even shards, preserving order within a
/// shard (shard assignment does not affect the result, per §8 law 6).
fn partition_shards(keys: Vec<ActionKey>, n: usize) -> Vec<Vec<ActionKey>> {
    let n = n.max(1);
    let mut shards: Vec<Vec<ActionKey>> = (0..n).map(|_| vec![]).collect();
    for (i, key) in keys.into_iter().enumerate() {
        shards[i % n].push(key);
    }
    shards
}

fn process_equality_shard(
    store: &Store,
    selector: ActionKeySelector,
    keys: &[ActionKey],
    window: f64,
    cancel: &AtomicBool,
) -> JoinResult<HashMap<(UserId, UserId), u64>> {
    let mut local = HashMap::new();
    for key in keys {
        if cancel.load(Ordering::Relaxed) {
            return CancelledSnafu.fail();
        }
        let mut events = store.messages_for_action_key(selector, key)?;
        events.sort_by(|a, b| (a.timestamp, &a.message_id).cmp(&(b.timestamp, &b.message_id)));
        let group_edges = sliding_window_edges(&events, window, |_, _| true);
        merge_edge_maps(&mut local, group_edges);
    }
    Ok(local)
}

fn process_similarity_shard(
    store: &Store,
    keys: &[ActionKey],
    window: f64,
    threshold: f64,
    cancel: &AtomicBool,
) -> JoinResult<HashMap<(UserId, UserId), u64>> {
    let mut local = HashMap::new();
    for key in keys {
        if cancel.load(Ordering::Relaxed) {
            return CancelledSnafu.fail();
        }
        let mut events = store.messages_for_action_key(ActionKeySelector::SimilarityBucket, key)?;
        events.sort_by(|a, b| (a.timestamp, &a.message_id).cmp(&(b.timestamp, &b.message_id)));
        let scored: Vec<ScoredMessage> = events
            .into_iter()
            .map(|m| {
                let tokens = tokenize::tokens(&m.message);
                ScoredMessage { message: m, tokens }
            })
            .collect();
        let group_edges = sliding_window_edges(&scored, window, |a, b| {
            JaccardMetric.score(&a.tokens, &b.tokens) >= threshold
        });
        merge_edge_maps(&mut local, group_edges);
    }
    Ok(local)
}

/// Builds the resolved-URL grouping for co-link when `--resolved` is set:
/// several raw URLs may collapse into one canonical URL, so groups must be
/// re-merged before the windowed pass runs.
fn resolved_url_groups(store: &Store) -> JoinResult<Vec<Vec<Message>>> {
    let raw_keys = store.distinct_action_keys(ActionKeySelector::Url)?;
    let mut grouped: HashMap<String, Vec<Message>> = HashMap::new();
    for key in raw_keys {
        let ActionKey::Url(raw) = &key else { continue };
        let canonical = store.resolved_or_raw_url(raw)?;
        let messages = store.messages_for_action_key(ActionKeySelector::Url, &key)?;
        grouped.entry(canonical).or_default().extend(messages);
    }
    Ok(grouped.into_values().collect())
}

impl Store {
    /// Runs one `compute` invocation end-to-end: scans action-key groups,
    /// joins within the time window, aggregates, and atomically replaces the
    /// network's edge table (§4.4, §4.1).
    #[instrument(skip(self, cancel), fields(network = ?config.network))]
    pub fn compute_network(
        &self,
        config: &JoinConfig,
        cancel: &Arc<AtomicBool>,
    ) -> JoinResult<u64> {
        config.validate()?;

        let mut state = ComputeState::Pending;
        let log_state = |s: ComputeState| info!(target: LOG_TARGET, ?s, "compute state transition");

        state = ComputeState::Scanning;
        log_state(state);

        let resolved_groups = if config.network == NetworkKind::CoLink && config.use_resolved_urls
        {
            Some(resolved_url_groups(self)?)
        } else {
            None
        };

        state = ComputeState::Joining;
        log_state(state);

        let merged = if let Some(groups) = resolved_groups {
            self.join_preloaded_groups(groups, config, cancel)
        } else {
            self.join_by_selector(config, cancel)
        };

        let merged = match merged {
            Ok(m) => m,
            Err(e) => {
                state = ComputeState::Aborted;
                log_state(state);
                return Err(e);
            }
        };

        state = ComputeState::Aggregating;
        log_state(state);
        let edges: Vec<NetworkEdge> = merged
            .into_iter()
            .map(|((user_a, user_b), weight)| NetworkEdge { user_a, user_b, weight })
            .collect();

        state = ComputeState::Writing;
        log_state(state);
        let written = self.write_network(config.network, edges, config.min_edge_weight)?;

        state = ComputeState::Done;
        log_state(state);

        Ok(written)
    }

    fn join_by_selector(
        &self,
        config: &JoinConfig,
        cancel: &Arc<AtomicBool>,
    ) -> JoinResult<HashMap<(UserId, UserId), u64>> {
        let selector = selector_for(config.network);
        let keys = self.distinct_action_keys(selector)?;
        let shards = partition_shards(keys, config.n_cpus.max(1));

        let mut merged = HashMap::new();
        std::thread::scope(|scope| -> JoinResult<()> {
            let handles: Vec<_> = shards
                .into_iter()
                .map(|shard| {
                    let cancel = Arc::clone(cancel);
                    scope.spawn(move || {
                        if config.network == NetworkKind::CoSimilarTweet {
                            process_similarity_shard(
                                self,
                                &shard,
                                config.time_window,
                                config.similarity_threshold,
                                &cancel,
                            )
                        } else {
                            process_equality_shard(self, selector, &shard, config.time_window, &cancel)
                        }
                    })
                })
                .collect();

            for handle in handles {
                let partial = handle.join().map_err(|_| JoinError::ShardFailed {
                    message: "worker thread panicked".to_string(),
                })??;
                merge_edge_maps(&mut merged, partial);
            }
            Ok(())
        })?;

        Ok(merged)
    }

    fn join_preloaded_groups(
        &self,
        groups: Vec<Vec<Message>>,
        config: &JoinConfig,
        cancel: &Arc<AtomicBool>,
    ) -> JoinResult<HashMap<(UserId, UserId), u64>> {
        let n = config.n_cpus.max(1);
        let mut shards: Vec<Vec<Vec<Message>>> = (0..n).map(|_| vec![]).collect();
        for (i, group) in groups.into_iter().enumerate() {
            shards[i % n].push(group);
        }

        let mut merged = HashMap::new();
        std::thread::scope(|scope| -> JoinResult<()> {
            let handles: Vec<_> = shards
                .into_iter()
                .map(|shard_groups| {
                    let cancel = Arc::clone(cancel);
                    let window = config.time_window;
                    scope.spawn(move || -> JoinResult<HashMap<(UserId, UserId), u64>> {
                        let mut local = HashMap::new();
                        for mut group in shard_groups {
                            if cancel.load(Ordering::Relaxed) {
                                return CancelledSnafu.fail();
                            }
                            group.sort_by(|a, b| {
                                (a.timestamp, &a.message_id).cmp(&(b.timestamp, &b.message_id))
                            });
                            let edges = sliding_window_edges(&group, window, |_, _| true);
                            merge_edge_maps(&mut local, edges);
                        }
                        Ok(local)
                    })
                })
                .collect();

            for handle in handles {
                let partial = handle.join().map_err(|_| JoinError::ShardFailed {
                    message: "worker thread panicked".to_string(),
                })??;
                merge_edge_maps(&mut merged, partial);
            }
            Ok(())
        })?;

        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NormalizedRow;

    fn row(
        id: &str,
        user: &str,
        ts: f64,
        repost_id: Option<&str>,
        message: &str,
    ) -> NormalizedRow {
        NormalizedRow {
            message_id: id.to_string(),
            user_id: user.to_string(),
            username: user.to_string(),
            repost_id: repost_id.map(str::to_string),
            reply_id: None,
            message: message.to_string(),
            timestamp: ts,
            urls: vec![],
        }
    }

    fn cancel_flag() -> Arc<AtomicBool> {
        Arc::new(AtomicBool::new(false))
    }

    #[test]
    fn co_tweet_edges_are_symmetric_and_self_loops_count_double() {
        let store = Store::open_in_memory().unwrap();
        store
            .insert_messages(vec![
                row("a", "alice", 0.0, None, "hello world"),
                row("b", "bob", 1.0, None, "hello world"),
                row("c", "alice", 2.0, None, "hello world"),
            ])
            .unwrap();

        let config = JoinConfig {
            network: NetworkKind::CoTweet,
            time_window: 5.0,
            n_cpus: 2,
            min_edge_weight: 1,
            similarity_threshold: 0.0,
            use_resolved_urls: false,
        };
        store.compute_network(&config, &cancel_flag()).unwrap();

        let edges = store.read_network(NetworkKind::CoTweet).unwrap();
        let weight = |a: &str, b: &str| {
            edges
                .iter()
                .find(|e| e.user_a.as_str() == a && e.user_b.as_str() == b)
                .map(|e| e.weight)
                .unwrap_or(0)
        };
        assert_eq!(weight("alice", "bob"), weight("bob", "alice"));
        assert!(weight("alice", "bob") > 0);
        assert_eq!(weight("alice", "alice"), 2);
    }

    #[test]
    fn window_excludes_events_outside_w() {
        let store = Store::open_in_memory().unwrap();
        store
            .insert_messages(vec![
                row("a", "alice", 0.0, None, "hello world"),
                row("b", "bob", 100.0, None, "hello world"),
            ])
            .unwrap();

        let config = JoinConfig {
            network: NetworkKind::CoTweet,
            time_window: 5.0,
            n_cpus: 1,
            min_edge_weight: 1,
            similarity_threshold: 0.0,
            use_resolved_urls: false,
        };
        store.compute_network(&config, &cancel_flag()).unwrap();
        let edges = store.read_network(NetworkKind::CoTweet).unwrap();
        assert!(edges.is_empty());
    }

    #[test]
    fn repost_excluded_from_co_tweet() {
        let store = Store::open_in_memory().unwrap();
        store
            .insert_messages(vec![
                row("a", "alice", 0.0, None, "hello world"),
                row("b", "bob", 1.0, Some("orig"), "hello world"),
            ])
            .unwrap();

        let config = JoinConfig {
            network: NetworkKind::CoTweet,
            time_window: 5.0,
            n_cpus: 1,
            min_edge_weight: 1,
            similarity_threshold: 0.0,
            use_resolved_urls: false,
        };
        store.compute_network(&config, &cancel_flag()).unwrap();
        let edges = store.read_network(NetworkKind::CoTweet).unwrap();
        assert!(edges.is_empty());
    }

    #[test]
    fn monotonic_in_window_size() {
        let store = Store::open_in_memory().unwrap();
        store
            .insert_messages(vec![
                row("a", "alice", 0.0, None, "hello world"),
                row("b", "bob", 3.0, None, "hello world"),
            ])
            .unwrap();

        for (window, expect_edge) in [(1.0, false), (10.0, true)] {
            let config = JoinConfig {
                network: NetworkKind::CoTweet,
                time_window: window,
                n_cpus: 1,
                min_edge_weight: 1,
                similarity_threshold: 0.0,
                use_resolved_urls: false,
            };
            store.compute_network(&config, &cancel_flag()).unwrap();
            let edges = store.read_network(NetworkKind::CoTweet).unwrap();
            assert_eq!(!edges.is_empty(), expect_edge, "window={window}");
        }
    }

    #[test]
    fn shard_count_does_not_change_weights() {
        let store = Store::open_in_memory().unwrap();
        let rows: Vec<_> = (0..20)
            .map(|i| row(&format!("m{i}"), &format!("u{}", i % 4), i as f64, None, "same text"))
            .collect();
        store.insert_messages(rows).unwrap();

        let mut results = vec![];
        for n_cpus in [1, 3, 8] {
            let config = JoinConfig {
                network: NetworkKind::CoTweet,
                time_window: 100.0,
                n_cpus,
                min_edge_weight: 1,
                similarity_threshold: 0.0,
                use_resolved_urls: false,
            };
            store.compute_network(&config, &cancel_flag()).unwrap();
            let mut edges = store.read_network(NetworkKind::CoTweet).unwrap();
            edges.sort_by(|a, b| {
                (a.user_a.as_str(), a.user_b.as_str()).cmp(&(b.user_a.as_str(), b.user_b.as_str()))
            });
            results.push(edges);
        }
        assert_eq!(results[0], results[1]);
        assert_eq!(results[1], results[2]);
    }
}
