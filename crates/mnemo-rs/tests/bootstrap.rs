//! Bootstrap integration tests over the durable backends.

use mnemo_rs::config::{MemoryDomain, MemoryManagerConfig};
use mnemo_rs::memory::{
    AddOutcome, ManagerStatus, MemoryError, NewProfileFact, NewUserMemory, SearchOptions,
};
use pretty_assertions::assert_eq;
use std::path::Path;
use tempfile::tempdir;

fn durable_config(root: &Path) -> MemoryManagerConfig {
    let path = |name: &str| serde_json::to_string(&root.join(name)).expect("path json");
    let contents = format!(
        r#"{{
            profile: {{ provider: "sqlite", path: {profile} }},
            knowledge: {{ provider: "sqlite", path: {knowledge}, dimension: 64 }},
            storage: {{ provider: "file", root: {objects} }},
        }}"#,
        profile = path("profile.db"),
        knowledge = path("knowledge.db"),
        objects = path("objects"),
    );
    MemoryManagerConfig::load_from_str(&contents).expect("config")
}

/// Durable backends should keep data across manager instances.
#[tokio::test]
async fn durable_backends_survive_restart() {
    mnemo_rs::init_logging();
    let temp = tempdir().expect("tempdir");
    let config = durable_config(temp.path());

    let manager = mnemo_rs::bootstrap(config.clone()).expect("bootstrap");
    manager.initialize().await.expect("initialize");
    manager
        .profile()
        .expect("profile")
        .set_fact("u1", NewProfileFact::new("timezone", "Europe/Berlin"))
        .await
        .expect("set fact");
    let stored = manager
        .knowledge()
        .expect("knowledge")
        .add_memory(NewUserMemory::new("u1", "fact", "keeps bees on the roof"))
        .await
        .expect("add memory");
    assert!(matches!(stored, AddOutcome::Stored(_)));
    manager
        .storage()
        .expect("storage")
        .put_object("u1", "notes/today.txt", b"buy honey jars".to_vec(), None)
        .await
        .expect("put");
    manager.shutdown().await;

    let manager = mnemo_rs::bootstrap(config).expect("bootstrap");
    manager.initialize().await.expect("initialize");
    assert_eq!(manager.status(), ManagerStatus::Ready);
    let fact = manager
        .profile()
        .expect("profile")
        .get_fact("u1", "timezone")
        .await
        .expect("get fact")
        .expect("fact present");
    assert_eq!(fact.value, serde_json::json!("Europe/Berlin"));
    let hits = manager
        .knowledge()
        .expect("knowledge")
        .search("u1", "keeps bees on the roof", SearchOptions::for_user("u1"))
        .await
        .expect("search");
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].memory.id, stored.memory().id);
    let (meta, data) = manager
        .storage()
        .expect("storage")
        .get_object("u1", "notes/today.txt")
        .await
        .expect("get");
    assert_eq!(data, b"buy honey jars".to_vec());
    assert_eq!(meta.size, 14);
    manager.shutdown().await;
}

/// Unknown backends are rejected before any provider is built.
#[test]
fn bootstrap_rejects_unknown_backend() {
    let config =
        MemoryManagerConfig::load_from_str(r#"{ episodic: { provider: "redis" } }"#).expect("config");
    let err = mnemo_rs::bootstrap(config).expect_err("unknown backend");
    assert!(matches!(
        err,
        MemoryError::ProviderNotFound { domain: MemoryDomain::Episodic, ref backend } if backend == "redis"
    ));
}

/// The project layer in the working directory selects backends.
#[tokio::test]
async fn layered_bootstrap_reads_project_file() {
    let temp = tempdir().expect("tempdir");
    std::fs::write(
        temp.path().join("mnemo.json5"),
        r#"{ working: { provider: "memory", max_messages: 2 } }"#,
    )
    .expect("write config");
    let manager = mnemo_rs::bootstrap_layered(temp.path()).expect("bootstrap");
    assert_eq!(manager.config().working.param_u64("max_messages").expect("param"), Some(2));
    manager.initialize().await.expect("initialize");
    manager.shutdown().await;
}
