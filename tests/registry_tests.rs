mod common;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use common::{registry_with, CountingFactory};
use lexibase::error::LexiError;
use lexibase::model::{MemoryKind, MemoryRecord};

#[tokio::test]
async fn open_then_close_leaves_nothing_live() {
    let dir = tempfile::tempdir().unwrap();
    let factory = Arc::new(CountingFactory::default());
    let registry = registry_with(dir.path(), &[("g1", "Glossary")], factory.clone());

    registry.open("g1").await.unwrap();
    assert!(registry.is_open("g1").await);
    registry.close("g1").await.unwrap();

    assert!(!registry.is_open("g1").await);
    assert!(registry.live_ids().await.is_empty());
    assert_eq!(factory.closes(), 1);
}

#[tokio::test]
async fn concurrent_opens_share_one_engine() {
    let dir = tempfile::tempdir().unwrap();
    let factory = Arc::new(CountingFactory {
        build_delay: Duration::from_millis(50),
        ..Default::default()
    });
    let registry = registry_with(dir.path(), &[("g1", "Glossary")], factory.clone());

    let n = 16;
    let opens = (0..n).map(|_| {
        let registry = Arc::clone(&registry);
        tokio::spawn(async move { registry.open("g1").await })
    });
    let engines: Vec<_> = futures::future::join_all(opens)
        .await
        .into_iter()
        .map(|r| r.unwrap().unwrap())
        .collect();

    assert_eq!(factory.builds(), 1);
    assert_eq!(registry.open_count("g1").await, n);
    assert!(engines.iter().all(|e| Arc::ptr_eq(e, &engines[0])));

    for _ in 0..n - 1 {
        registry.close("g1").await.unwrap();
        assert_eq!(factory.closes(), 0);
    }
    assert!(registry.is_open("g1").await);

    registry.close("g1").await.unwrap();
    assert_eq!(factory.closes(), 1);
    assert!(!registry.is_open("g1").await);
}

#[tokio::test]
async fn interleaved_open_close_closes_once() {
    let dir = tempfile::tempdir().unwrap();
    let factory = Arc::new(CountingFactory::default());
    let registry = registry_with(dir.path(), &[("g1", "Glossary")], factory.clone());

    registry.open("g1").await.unwrap();
    let workers = (0..8).map(|_| {
        let registry = Arc::clone(&registry);
        tokio::spawn(async move {
            registry.open("g1").await.unwrap();
            tokio::task::yield_now().await;
            registry.close("g1").await.unwrap();
        })
    });
    for w in futures::future::join_all(workers).await {
        w.unwrap();
    }
    // the extra holder kept it alive throughout
    assert_eq!(factory.builds(), 1);
    assert_eq!(factory.closes(), 0);

    registry.close("g1").await.unwrap();
    assert_eq!(factory.closes(), 1);
}

#[tokio::test]
async fn close_of_unopened_id_is_noop() {
    let dir = tempfile::tempdir().unwrap();
    let factory = Arc::new(CountingFactory::default());
    let registry = registry_with(dir.path(), &[("g1", "Glossary")], factory.clone());

    registry.close("g1").await.unwrap();
    registry.close("not-even-registered").await.unwrap();
    assert_eq!(factory.closes(), 0);
}

#[tokio::test]
async fn get_opens_implicitly_without_counting() {
    let dir = tempfile::tempdir().unwrap();
    let factory = Arc::new(CountingFactory::default());
    let registry = registry_with(dir.path(), &[("g1", "Glossary")], factory.clone());

    let engine = registry.get("g1").await.unwrap();
    assert_eq!(engine.name(), "g1");
    assert_eq!(registry.open_count("g1").await, 1);

    registry.get("g1").await.unwrap();
    assert_eq!(registry.open_count("g1").await, 1);
    assert_eq!(factory.builds(), 1);

    registry.close("g1").await.unwrap();
    assert!(!registry.is_open("g1").await);
}

#[tokio::test]
async fn failed_build_leaves_no_state() {
    let dir = tempfile::tempdir().unwrap();
    let factory = Arc::new(CountingFactory {
        failing: HashSet::from(["down".to_string()]),
        ..Default::default()
    });
    let registry = registry_with(dir.path(), &[("down", "Offline")], factory.clone());

    let err = registry.open("down").await.err().unwrap();
    assert!(matches!(err, LexiError::Transport(_)), "{err}");
    assert!(!registry.is_open("down").await);
    assert_eq!(registry.open_count("down").await, 0);
}

#[tokio::test]
async fn unknown_memory_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let factory = Arc::new(CountingFactory::default());
    let registry = registry_with(dir.path(), &[], factory.clone());

    let err = registry.open("ghost").await.err().unwrap();
    assert!(matches!(err, LexiError::NotFound(_)));
    assert_eq!(factory.builds(), 0);
}

#[tokio::test]
async fn close_all_releases_every_engine() {
    let dir = tempfile::tempdir().unwrap();
    let factory = Arc::new(CountingFactory::default());
    let registry = registry_with(dir.path(), &[("a", "A"), ("b", "B")], factory.clone());

    registry.open("a").await.unwrap();
    registry.open("a").await.unwrap();
    registry.open("b").await.unwrap();
    registry.close_all().await.unwrap();

    assert_eq!(factory.closes(), 2);
    assert!(registry.live_ids().await.is_empty());
}

#[tokio::test]
async fn memories_list_sorted_by_name() {
    let dir = tempfile::tempdir().unwrap();
    let factory = Arc::new(CountingFactory::default());
    let registry = registry_with(
        dir.path(),
        &[("3", "zoology"), ("1", "Botany"), ("2", "chemistry")],
        factory,
    );

    let names: Vec<String> = registry.list_memories().into_iter().map(|(_, n)| n).collect();
    assert_eq!(names, ["Botany", "chemistry", "zoology"]);
}

#[tokio::test]
async fn create_and_delete_memories() {
    let dir = tempfile::tempdir().unwrap();
    let factory = Arc::new(CountingFactory::default());
    let registry = registry_with(dir.path(), &[], factory.clone());

    let created = registry.create_memory(MemoryRecord::local("", "Legal")).await.unwrap();
    assert!(!created.id.is_empty());
    assert!(created.creation_date > 0);
    assert_eq!(registry.memory_name(&created.id).unwrap(), "Legal");

    let dup = registry.create_memory(MemoryRecord::local(created.id.clone(), "Again")).await;
    assert!(matches!(dup, Err(LexiError::Validation(_))));

    let nameless = registry.create_memory(MemoryRecord::local("x", "  ")).await;
    assert!(matches!(nameless, Err(LexiError::Validation(_))));

    registry.open(&created.id).await.unwrap();
    let removed = registry.delete_memories(&[created.id.clone()]).await.unwrap();
    assert_eq!(removed, 1);
    assert!(!registry.is_open(&created.id).await);
    assert!(registry.list_memories().is_empty());
}

#[tokio::test]
async fn remote_records_need_credentials() {
    let dir = tempfile::tempdir().unwrap();
    let factory = Arc::new(CountingFactory::default());
    let registry = registry_with(dir.path(), &[], factory.clone());

    let mut record = MemoryRecord::remote("r1", "Shared", "https://tm.example.com", "ana", "pw");
    record.password = None;
    assert!(matches!(registry.create_memory(record).await, Err(LexiError::Validation(_))));

    let record = MemoryRecord::remote("r1", "Shared", "https://tm.example.com", "ana", "pw");
    let created = registry.create_memory(record).await.unwrap();
    assert_eq!(created.kind, MemoryKind::Remote);
    // registering a remote memory does not contact the server
    assert_eq!(factory.builds(), 0);

    let again = MemoryRecord::remote("r1", "Copy", "https://tm.example.com", "ana", "pw");
    assert!(matches!(registry.add_memory(again), Err(LexiError::Validation(_))));
    let other = MemoryRecord::remote("r2", "Other", "https://tm.example.com", "ana", "pw");
    registry.add_memory(other).unwrap();
    assert_eq!(registry.records().len(), 2);
    assert_eq!(factory.builds(), 0);
}

#[tokio::test]
async fn index_survives_reload() {
    let dir = tempfile::tempdir().unwrap();
    {
        let factory = Arc::new(CountingFactory::default());
        let registry = registry_with(dir.path(), &[], factory);
        registry.create_memory(MemoryRecord::local("keep", "Keeper")).await.unwrap();
    }
    let index = lexibase::index::MemoryIndex::load(dir.path()).unwrap();
    assert_eq!(index.require("keep").unwrap().name, "Keeper");
}
