//! Integration tests driving an explorer session against the in-memory store.

use keyscope_core::{
    CoreError, DeleteReport, EngineConfig, Explorer, GlobSyntax, IndexState, PoolConfig,
};
use keyscope_store::{Endpoint, InMemoryStore, StoredValue};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

async fn explorer_with(store: &InMemoryStore, engine: EngineConfig) -> Explorer {
    Explorer::connect(PoolConfig::default(), engine, Arc::new(store.connector()))
        .await
        .unwrap()
}

async fn explorer(store: &InMemoryStore) -> Explorer {
    explorer_with(store, EngineConfig::default()).await
}

fn seeded(keys: &[&str]) -> InMemoryStore {
    let store = InMemoryStore::new(4);
    for key in keys {
        store.insert(0, *key, format!("value of {key}"));
    }
    store
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn search_all_returns_inserted_keys() {
    let keys: Vec<String> = (0..300).map(|i| format!("item:{i}")).collect();
    let store = InMemoryStore::new(2);
    for key in &keys {
        store.insert(0, key.clone(), "x");
    }
    let mut explorer = explorer(&store).await;
    explorer.wait_for_reload().await;

    let found: BTreeSet<String> = explorer.search("*").await.unwrap().into_iter().collect();
    let expected: BTreeSet<String> = keys.into_iter().collect();
    assert_eq!(found, expected);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn search_is_case_insensitive() {
    let store = seeded(&["FOO", "foo", "food"]);
    let explorer = explorer(&store).await;

    assert_eq!(explorer.search("foo").await.unwrap(), vec!["FOO", "foo"]);
    assert_eq!(explorer.search("FoO").await.unwrap(), vec!["FOO", "foo"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn search_prefix_matches_every_case() {
    let store = seeded(&["User:1", "user:2", "USER:3", "session:9"]);
    let explorer = explorer(&store).await;

    let found = explorer.search("user:*").await.unwrap();
    assert_eq!(found, vec!["USER:3", "User:1", "user:2"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn search_waits_for_loading_index() {
    let store = seeded(&["a", "b", "c"]);
    store.set_keys_delay(Duration::from_millis(100));
    let explorer = explorer(&store).await;

    assert!(matches!(explorer.index_state(0), IndexState::Loading));
    let found = explorer.search("*").await.unwrap();
    assert_eq!(found, vec!["a", "b", "c"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn search_times_out_on_failed_database() {
    let store = seeded(&["a"]);
    store.fail_keys(0, true);
    let engine = EngineConfig::new().with_ready_timeout(Duration::from_millis(50));
    let mut explorer = explorer_with(&store, engine).await;

    let report = explorer.wait_for_reload().await.unwrap();
    assert_eq!(report.failed.len(), 1);
    assert!(matches!(explorer.index_state(0), IndexState::NotLoaded));
    assert!(matches!(
        explorer.search("*").await,
        Err(CoreError::NotReady { db: 0, .. })
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn empty_database_is_ready_not_absent() {
    let store = InMemoryStore::new(3);
    let mut explorer = explorer(&store).await;
    explorer.wait_for_reload().await;

    assert!(explorer.index_state(2).is_ready());
    assert_eq!(explorer.indexed_key_count(2), Some(0));
    explorer.switch_database(2).unwrap();
    assert!(explorer.search("*").await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn get_matching_reports_per_key() {
    let store = seeded(&["cfg:a", "cfg:b"]);
    store.insert_value(0, "cfg:list", StoredValue::List(vec![b"x".to_vec()]));
    let explorer = explorer(&store).await;

    let values = explorer.get_matching("cfg:*").await.unwrap();
    assert_eq!(values.len(), 3);
    assert_eq!(values["cfg:a"].as_ref().unwrap(), "value of cfg:a");
    assert!(matches!(values["cfg:list"], Err(CoreError::ValueType { .. })));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stale_index_yields_key_not_found() {
    let store = seeded(&["gone"]);
    let mut explorer = explorer(&store).await;
    explorer.wait_for_reload().await;

    assert!(store.remove(0, "gone"));
    let values = explorer.get_matching("gone").await.unwrap();
    assert!(matches!(values["gone"], Err(CoreError::KeyNotFound { .. })));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn delete_matching_chunks_large_sets() {
    let store = InMemoryStore::new(1);
    for i in 0..2500 {
        store.insert(0, format!("bulk:{i}"), "x");
    }
    store.insert(0, "keep", "x");
    let explorer = explorer(&store).await;

    let report = explorer
        .delete_matching("bulk:*", |_| panic!("confirmation is only for *"))
        .await
        .unwrap();

    let DeleteReport::Deleted(outcomes) = report else {
        panic!("expected chunked delete, got {report:?}");
    };
    assert_eq!(outcomes.len(), 3);
    assert_eq!(store.del_calls(), 3);
    assert_eq!(outcomes.iter().map(|o| o.deleted).sum::<u64>(), 2500);
    assert_eq!(store.keys(0), vec!["keep"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn delete_all_flushes_on_confirm() {
    let store = seeded(&["a", "b"]);
    let explorer = explorer(&store).await;

    let report = explorer.delete_matching("*", |_| true).await.unwrap();
    assert_eq!(report, DeleteReport::Flushed);
    assert_eq!(store.flush_calls(), 1);
    assert_eq!(store.del_calls(), 0);
    assert!(store.is_empty(0));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn delete_all_declined_changes_nothing() {
    let store = seeded(&["a", "b"]);
    let explorer = explorer(&store).await;

    let report = explorer.delete_matching("*", |_| false).await.unwrap();
    assert_eq!(report, DeleteReport::Cancelled);
    assert_eq!(store.flush_calls(), 0);
    assert_eq!(store.len(0), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn delete_with_empty_pattern_asks_like_star() {
    let store = seeded(&["a", "b"]);
    let explorer = explorer(&store).await;

    for pattern in ["", "   "] {
        let mut asked = false;
        let report = explorer
            .delete_matching(pattern, |_| {
                asked = true;
                false
            })
            .await
            .unwrap();
        assert!(asked);
        assert_eq!(report, DeleteReport::Cancelled);
    }
    assert_eq!(store.del_calls(), 0);
    assert_eq!(store.flush_calls(), 0);
    assert_eq!(store.len(0), 2);

    let report = explorer.delete_matching("", |_| true).await.unwrap();
    assert_eq!(report, DeleteReport::Flushed);
    assert!(store.is_empty(0));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn set_value_is_visible_after_reload() {
    let store = seeded(&["a"]);
    let mut explorer = explorer(&store).await;
    explorer.wait_for_reload().await;

    explorer.set_value("B", "2").await.unwrap();
    assert_eq!(explorer.search("b").await.unwrap(), Vec::<String>::new());

    explorer.reload_index();
    explorer.wait_for_reload().await;
    assert_eq!(explorer.search("b").await.unwrap(), vec!["B"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn fan_out_respects_pool_bound() {
    let store = InMemoryStore::new(1);
    for i in 0..1000 {
        store.insert(0, format!("k{i}"), "x");
    }
    let pool = PoolConfig::default().with_max_connections(3);
    let engine = EngineConfig::new().with_delete_chunk_size(10);
    let explorer = Explorer::connect(pool, engine, Arc::new(store.connector()))
        .await
        .unwrap();

    let values = explorer.get_matching("*").await.unwrap();
    assert_eq!(values.len(), 1000);
    explorer.delete_matching("k*", |_| false).await.unwrap();

    assert!(store.peak_connections() <= 3);
    assert!(store.is_empty(0));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn switch_database_validates_range() {
    let store = InMemoryStore::new(4);
    store.insert(3, "only-in-three", "x");
    let mut explorer = explorer(&store).await;
    assert_eq!(explorer.database_count(), 4);

    assert!(matches!(
        explorer.switch_database(4),
        Err(CoreError::InvalidDatabase { db: 4, count: 4 })
    ));
    assert_eq!(explorer.current_database(), 0);

    explorer.switch_database(3).unwrap();
    assert_eq!(explorer.current_database(), 3);
    assert_eq!(explorer.search("*").await.unwrap(), vec!["only-in-three"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn switch_during_slow_reload_keeps_pool_bound() {
    let store = InMemoryStore::new(4);
    let keys: Vec<String> = (0..50).map(|i| format!("k{i}")).collect();
    for key in &keys {
        store.insert(1, key.clone(), "x");
    }
    store.set_keys_delay(Duration::from_millis(300));
    let pool = PoolConfig::default().with_max_connections(2);
    let connector = Arc::new(store.connector());
    let mut explorer = Explorer::connect(pool, EngineConfig::default(), connector)
        .await
        .unwrap();

    // Scans still hold both slots.
    explorer.switch_database(1).unwrap();
    let values = explorer.get_values(&keys).await;
    assert_eq!(values.len(), 50);
    assert!(values.values().all(|v| v.is_ok()));

    explorer.wait_for_reload().await;
    assert!(store.peak_connections() <= 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn reconfigure_during_slow_reload_keeps_pool_bound() {
    let store = InMemoryStore::new(4);
    store.insert(0, "a", "x");
    store.set_keys_delay(Duration::from_millis(200));
    let pool = PoolConfig::default().with_max_connections(2);
    let connector = Arc::new(store.connector());
    let mut explorer = Explorer::connect(pool.clone(), EngineConfig::default(), connector)
        .await
        .unwrap();

    explorer.reconfigure(pool).await.unwrap();
    explorer.wait_for_reload().await;
    assert_eq!(explorer.search("*").await.unwrap(), vec!["a"]);
    assert!(store.peak_connections() <= 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn list_sizes_honors_limit() {
    let store = InMemoryStore::new(4);
    store.insert(1, "a", "x");
    store.insert(1, "b", "x");
    let explorer = explorer(&store).await;

    let all = explorer.list_sizes(None).await;
    assert_eq!(all.len(), 4);
    assert_eq!(all[&1], 2);

    let first_two = explorer.list_sizes(Some(2)).await;
    assert_eq!(first_two.keys().copied().collect::<Vec<_>>(), vec![0, 1]);

    assert_eq!(explorer.list_sizes(Some(99)).await.len(), 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn reconfigure_rediscovers_and_reindexes() {
    let store = InMemoryStore::with_password(4, "secret");
    store.insert(0, "a", "x");
    let config = PoolConfig::new(Endpoint::default().with_password("secret"));
    let mut explorer = Explorer::connect(
        config.clone(),
        EngineConfig::default(),
        Arc::new(store.connector()),
    )
    .await
    .unwrap();
    explorer.switch_database(3).unwrap();

    store.set_config_reply("databases", vec!["databases".into(), "2".into()]);
    explorer
        .reconfigure(config.with_max_connections(2))
        .await
        .unwrap();

    assert_eq!(explorer.database_count(), 2);
    assert_eq!(explorer.current_database(), 0);
    assert_eq!(explorer.status().max_connections, 2);
    assert_eq!(explorer.search("*").await.unwrap(), vec!["a"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn connect_fails_on_bad_password() {
    let store = InMemoryStore::with_password(1, "secret");
    let config = PoolConfig::new(Endpoint::default().with_password("wrong"));

    let result = Explorer::connect(config, EngineConfig::default(), Arc::new(store.connector())).await;
    assert!(matches!(result, Err(CoreError::Connection { .. })));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn connect_retries_discovery() {
    let store = InMemoryStore::new(4);
    store.set_config_reply("databases", vec!["databases".into()]);
    let engine = EngineConfig::new().with_init_attempts(2);

    let result = Explorer::connect(PoolConfig::default(), engine, Arc::new(store.connector())).await;
    assert!(matches!(result, Err(CoreError::ConfigParse { .. })));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn legacy_syntax_keeps_regex_classes() {
    let store = seeded(&["user:1", "user:a"]);
    let engine = EngineConfig::new().with_glob_syntax(GlobSyntax::Legacy);
    let explorer = explorer_with(&store, engine).await;

    assert_eq!(explorer.search("user:[0-9]").await.unwrap(), vec!["user:1"]);
    assert!(matches!(
        explorer.search("user:(").await,
        Err(CoreError::InvalidPattern { .. })
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn case_sensitive_search_matches_exact_case() {
    let store = seeded(&["Order:1", "order:2", "ORDER:3"]);
    let engine = EngineConfig::new().with_case_sensitive(true);
    let explorer = explorer_with(&store, engine).await;

    assert_eq!(explorer.search("order:*").await.unwrap(), vec!["order:2"]);
    assert_eq!(explorer.search("Order:1").await.unwrap(), vec!["Order:1"]);
    assert_eq!(explorer.search("*").await.unwrap().len(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn status_reports_index_progress() {
    let store = seeded(&["a", "b"]);
    let mut explorer = explorer(&store).await;
    explorer.wait_for_reload().await;

    let status = explorer.status();
    assert_eq!(status.database, 0);
    assert_eq!(status.database_count, 4);
    assert_eq!(status.indexed_databases, 4);
    assert_eq!(status.indexed_keys, Some(2));
    assert_eq!(status.in_use, 0);
}
