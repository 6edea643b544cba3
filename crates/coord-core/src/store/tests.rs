use tempfile::tempdir;

use super::*;
use crate::model::NormalizedRow;

fn sample_row(id: &str) -> NormalizedRow {
    NormalizedRow {
        message_id: id.to_string(),
        user_id: "u1".to_string(),
        username: "alice".to_string(),
        repost_id: None,
        reply_id: None,
        message: "hello world".to_string(),
        timestamp: 1.0,
        urls: vec!["http://example.test/a".to_string()],
    }
}

#[test_log::test]
fn open_creates_schema_version() {
    let dir = tempdir().unwrap();
    let store = Store::open(dir.path().join("corpus.redb")).unwrap();
    let dump = store.dump_table(&tables::schema_version::TABLE).unwrap();
    assert_eq!(dump.len(), 1);
}

#[test_log::test]
fn reopening_an_existing_corpus_preserves_data() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("corpus.redb");
    {
        let store = Store::open(&path).unwrap();
        store.insert_messages(vec![sample_row("a")]).unwrap();
    }
    let store = Store::open(&path).unwrap();
    let report = store.insert_messages(vec![sample_row("a")]).unwrap();
    assert_eq!(report.rejected_as_duplicate, 1);
    assert_eq!(report.accepted, 0);
}

#[test_log::test]
fn insert_is_idempotent() {
    let store = Store::open_in_memory().unwrap();
    let report1 = store.insert_messages(vec![sample_row("a"), sample_row("b")]).unwrap();
    assert_eq!(report1.accepted, 2);

    let report2 = store.insert_messages(vec![sample_row("a"), sample_row("b")]).unwrap();
    assert_eq!(report2.accepted, 0);
    assert_eq!(report2.rejected_as_duplicate, 2);
}

#[test_log::test]
fn malformed_rows_are_rejected_and_counted() {
    let store = Store::open_in_memory().unwrap();
    let mut bad = sample_row("bad");
    bad.repost_id = Some("x".to_string());
    bad.reply_id = Some("y".to_string());

    let report = store.insert_messages(vec![bad, sample_row("good")]).unwrap();
    assert_eq!(report.accepted, 1);
    assert_eq!(report.rejected_invalid.len(), 1);
}

#[test_log::test]
fn distinct_action_keys_and_group_scan_round_trip() {
    let store = Store::open_in_memory().unwrap();
    store
        .insert_messages(vec![
            sample_row("a"),
            {
                let mut r = sample_row("b");
                r.message_id = "b".into();
                r.timestamp = 2.0;
                r
            },
        ])
        .unwrap();

    let keys = store.distinct_action_keys(ActionKeySelector::Fingerprint).unwrap();
    assert_eq!(keys.len(), 1);
    let messages = store.messages_for_action_key(ActionKeySelector::Fingerprint, &keys[0]).unwrap();
    assert_eq!(messages.len(), 2);
    assert!(messages[0].timestamp <= messages[1].timestamp);
}
