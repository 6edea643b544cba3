//! End-to-end scenarios from the join engine's testable properties, run
//! through the public `Store` API rather than `join`'s private helpers.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use coord_core::join::JoinConfig;
use coord_core::model::{NetworkKind, NormalizedRow};
use coord_core::resolver::{ResolveOutcome, ResolverConfig, TokenBucket};
use coord_core::store::Store;

fn row(
    id: &str,
    user: &str,
    ts: f64,
    repost_id: Option<&str>,
    message: &str,
    urls: &[&str],
) -> NormalizedRow {
    NormalizedRow {
        message_id: id.to_string(),
        user_id: user.to_string(),
        username: user.to_string(),
        repost_id: repost_id.map(str::to_string),
        reply_id: None,
        message: message.to_string(),
        timestamp: ts,
        urls: urls.iter().map(|u| u.to_string()).collect(),
    }
}

fn weight(edges: &[coord_core::model::NetworkEdge], a: &str, b: &str) -> u64 {
    edges
        .iter()
        .find(|e| e.user_a.as_str() == a && e.user_b.as_str() == b)
        .map(|e| e.weight)
        .unwrap_or(0)
}

fn no_cancel() -> Arc<AtomicBool> {
    Arc::new(AtomicBool::new(false))
}

#[test_log::test]
fn scenario_a_co_retweet() {
    let store = Store::open_in_memory().unwrap();
    store
        .insert_messages(vec![
            row("1", "U", 0.0, Some("X"), "", &[]),
            row("2", "V", 30.0, Some("X"), "", &[]),
            row("3", "W", 120.0, Some("X"), "", &[]),
        ])
        .unwrap();

    let config = JoinConfig {
        network: NetworkKind::CoRetweet,
        time_window: 60.0,
        n_cpus: 2,
        min_edge_weight: 1,
        similarity_threshold: 0.0,
        use_resolved_urls: false,
    };
    store.compute_network(&config, &no_cancel()).unwrap();
    let edges = store.read_network(NetworkKind::CoRetweet).unwrap();

    assert_eq!(weight(&edges, "U", "V"), 1);
    assert_eq!(weight(&edges, "V", "U"), 1);
    assert_eq!(weight(&edges, "V", "W"), 1);
    assert_eq!(weight(&edges, "W", "V"), 1);
    assert_eq!(weight(&edges, "U", "W"), 0);
}

#[test_log::test]
fn scenario_b_co_tweet_with_duplicates() {
    let store = Store::open_in_memory().unwrap();
    store
        .insert_messages(vec![
            row("1", "U", 0.0, None, "hello", &[]),
            row("2", "V", 10.0, None, "HELLO", &[]),
            row("3", "V", 20.0, None, "hello", &[]),
        ])
        .unwrap();

    let config = JoinConfig {
        network: NetworkKind::CoTweet,
        time_window: 60.0,
        n_cpus: 1,
        min_edge_weight: 1,
        similarity_threshold: 0.0,
        use_resolved_urls: false,
    };
    store.compute_network(&config, &no_cancel()).unwrap();
    let edges = store.read_network(NetworkKind::CoTweet).unwrap();

    assert_eq!(weight(&edges, "U", "V"), 2);
    assert_eq!(weight(&edges, "V", "U"), 2);
    assert_eq!(weight(&edges, "V", "V"), 2);
}

#[test_log::test]
fn scenario_c_co_link_multi_url() {
    let store = Store::open_in_memory().unwrap();
    store
        .insert_messages(vec![
            row("1", "U", 0.0, None, "", &["a", "b"]),
            row("2", "V", 30.0, None, "", &["a", "b", "c"]),
        ])
        .unwrap();

    let config = JoinConfig {
        network: NetworkKind::CoLink,
        time_window: 60.0,
        n_cpus: 1,
        min_edge_weight: 1,
        similarity_threshold: 0.0,
        use_resolved_urls: false,
    };
    store.compute_network(&config, &no_cancel()).unwrap();
    let edges = store.read_network(NetworkKind::CoLink).unwrap();

    assert_eq!(weight(&edges, "U", "V"), 2);
    assert_eq!(weight(&edges, "V", "U"), 2);
}

#[test_log::test]
fn scenario_d_co_similarity_threshold() {
    let store = Store::open_in_memory().unwrap();
    store
        .insert_messages(vec![
            row("1", "U", 0.0, None, "the cat sat on mat", &[]),
            row("2", "V", 30.0, None, "the cat sat on mat slowly", &[]),
        ])
        .unwrap();

    let config_loose = JoinConfig {
        network: NetworkKind::CoSimilarTweet,
        time_window: 60.0,
        n_cpus: 1,
        min_edge_weight: 1,
        similarity_threshold: 0.8,
        use_resolved_urls: false,
    };
    store.compute_network(&config_loose, &no_cancel()).unwrap();
    let edges = store.read_network(NetworkKind::CoSimilarTweet).unwrap();
    assert_eq!(weight(&edges, "U", "V"), 1);
    assert_eq!(weight(&edges, "V", "U"), 1);

    let config_strict = JoinConfig { similarity_threshold: 0.9, ..config_loose };
    store.compute_network(&config_strict, &no_cancel()).unwrap();
    let edges = store.read_network(NetworkKind::CoSimilarTweet).unwrap();
    assert!(edges.is_empty());
}

#[test_log::test]
fn scenario_e_window_edge() {
    let store = Store::open_in_memory().unwrap();
    store
        .insert_messages(vec![
            row("1", "U", 0.0, None, "hello world", &[]),
            row("2", "V", 60.0, None, "hello world", &[]),
        ])
        .unwrap();

    let config60 = JoinConfig {
        network: NetworkKind::CoTweet,
        time_window: 60.0,
        n_cpus: 1,
        min_edge_weight: 1,
        similarity_threshold: 0.0,
        use_resolved_urls: false,
    };
    store.compute_network(&config60, &no_cancel()).unwrap();
    assert!(!store.read_network(NetworkKind::CoTweet).unwrap().is_empty());

    let config59 = JoinConfig { time_window: 59.0, ..config60 };
    store.compute_network(&config59, &no_cancel()).unwrap();
    assert!(store.read_network(NetworkKind::CoTweet).unwrap().is_empty());
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn scenario_f_resolver_idempotence() {
    let store = Store::open_in_memory().unwrap();
    store
        .insert_messages(vec![
            row("1", "U", 0.0, None, "", &["http://x.test"]),
            row("2", "V", 1.0, None, "", &["http://y.test"]),
        ])
        .unwrap();

    let bucket = TokenBucket::new(25, 25);
    let calls = std::sync::atomic::AtomicU64::new(0);
    let resolve = |url: String| {
        calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        async move {
            if url == "http://x.test" {
                ResolveOutcome::Resolved("http://x.test/canonical".to_string())
            } else {
                ResolveOutcome::Permanent
            }
        }
    };

    store
        .resolve_urls(&ResolverConfig { n_cpus: 2 }, &bucket, resolve)
        .await
        .unwrap();
    assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 2);

    store
        .resolve_urls(&ResolverConfig { n_cpus: 2 }, &bucket, resolve)
        .await
        .unwrap();
    assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 2);
}
