//! End-to-end flows over a real session directory with a mock backend.

use std::sync::Arc;

use mnemos_llm::{MockBackend, SharedBackend};
use mnemos_memory::MemoryManager;
use mnemos_types::{DomainConfig, Role};

fn digest_reply(text: &str, importance: u8, memory_worthy: bool) -> String {
    format!(
        r#"{{"rated_segments": [{{"text": "{text}", "type": "information", "importance": {importance}, "topics": [], "memory_worthy": {memory_worthy}}}]}}"#
    )
}

fn plain_config() -> DomainConfig {
    let mut config = DomainConfig::new("test").with_initial_data("Hello world seed.");
    config.enabled = false;
    config
}

fn graph_config() -> DomainConfig {
    DomainConfig::new("test")
        .with_initial_data("Hello world seed.")
        .with_entity_types(["character", "location"])
}

#[tokio::test]
async fn test_fresh_session_single_turn() {
    let dir = tempfile::tempdir().unwrap();
    let backend: SharedBackend = Arc::new(MockBackend::new([
        "I am the keeper of this session.".to_string(),
        digest_reply("user asked who the agent is", 2, true),
        digest_reply("agent introduced itself", 1, false),
    ]));

    let manager = MemoryManager::open(dir.path(), backend, plain_config()).unwrap();
    manager.create_initial_memory("Hello world seed.").unwrap();

    let response = manager.query_memory("who are you?").await.unwrap();
    assert_eq!(response, "I am the keeper of this session.");

    let memory = manager.snapshot();
    assert_eq!(memory.static_memory, "Hello world seed.");
    assert_eq!(memory.conversation_history.len(), 2);
    assert_eq!(memory.conversation_history[0].role, Role::User);
    assert_eq!(memory.conversation_history[1].role, Role::Agent);
    assert!(memory.context.is_empty());

    // Only segment records in the embeddings file, no graph entities.
    let embeddings = std::fs::read_to_string(dir.path().join("embeddings.jsonl")).unwrap();
    assert!(embeddings.contains(r#""source":"segment""#));
    assert!(!embeddings.contains("graph_entity"));
}

#[tokio::test]
async fn test_create_initial_memory_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let backend: SharedBackend = Arc::new(MockBackend::new(Vec::<String>::new()));
    let manager = MemoryManager::open(dir.path(), backend, plain_config()).unwrap();

    assert!(manager.create_initial_memory("Hello world seed.").unwrap());
    let first = std::fs::read(dir.path().join("agent_memory.json")).unwrap();

    assert!(!manager.create_initial_memory("Hello world seed.").unwrap());
    let second = std::fs::read(dir.path().join("agent_memory.json")).unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_every_turn_gets_digest_or_parse_flag() {
    let dir = tempfile::tempdir().unwrap();
    let backend: SharedBackend = Arc::new(MockBackend::new([
        digest_reply("a clean digest", 3, true),
        "this is not json".to_string(),
    ]));
    let manager = MemoryManager::open(dir.path(), backend, plain_config()).unwrap();

    manager.add_turn(Role::User, "first").await.unwrap();
    manager.add_turn(Role::User, "second").await.unwrap();

    let memory = manager.snapshot();
    let first = memory.conversation_history[0].digest.as_ref().unwrap();
    let second = memory.conversation_history[1].digest.as_ref().unwrap();
    assert!(!first.parse_error);
    assert!(second.parse_error);
    assert!(second.rated_segments.is_empty());
}

#[tokio::test]
async fn test_unworthy_digest_produces_no_side_effects() {
    let dir = tempfile::tempdir().unwrap();
    let backend: SharedBackend = Arc::new(MockBackend::new([digest_reply(
        "idle chatter",
        1,
        false,
    )]));
    let manager = MemoryManager::open(dir.path(), backend, graph_config()).unwrap();

    manager.add_turn(Role::User, "nice weather today").await.unwrap();

    assert!(!dir.path().join("embeddings.jsonl").exists());
    assert!(!dir.path().join("graph_data").join("graph_nodes.json").exists());
    assert_eq!(manager.graph().unwrap().node_count(), 0);
}

#[tokio::test]
async fn test_duplicate_entity_converges_on_one_node() {
    let dir = tempfile::tempdir().unwrap();

    // Turn 1 introduces Elena as a new entity.
    let backend: SharedBackend = Arc::new(MockBackend::new([
        digest_reply("Elena is the mayor of Haven", 4, true),
        r#"[{"type": "character", "name": "Elena", "description": "mayor of Haven"}]"#.to_string(),
        r#"[["candidate_1", "<NEW>", "nothing similar", 0.9]]"#.to_string(),
    ]));
    let manager = MemoryManager::open(dir.path(), backend, graph_config()).unwrap();
    let guid1 = manager.add_turn(Role::User, "Elena, mayor of Haven").await.unwrap();

    let graph = manager.graph().unwrap();
    assert_eq!(graph.node_count(), 1);
    let elena = graph.query_for_context("Elena mayor", 1).await.hits[0].node.clone();
    drop(manager);

    // Turn 2 mentions her again; the resolver matches the existing node.
    let resolve = format!(r#"[["candidate_1", "{}", "same person", 0.95]]"#, elena.id);
    let backend: SharedBackend = Arc::new(MockBackend::new([
        digest_reply("Elena the Mayor speaks", 4, true),
        r#"[{"type": "character", "name": "Elena the Mayor", "description": "the mayor, speaking"}]"#.to_string(),
        resolve,
    ]));
    let manager = MemoryManager::open(dir.path(), backend, graph_config()).unwrap();
    let guid2 = manager.add_turn(Role::User, "Elena the Mayor speaks").await.unwrap();

    let graph = manager.graph().unwrap();
    assert_eq!(graph.node_count(), 1);
    let node = graph.node(&elena.id).unwrap();
    assert_eq!(node.mention_count, 2);
    assert!(node.conversation_history_guids.contains(&guid1));
    assert!(node.conversation_history_guids.contains(&guid2));
    assert!(node.aliases.contains(&"Elena the Mayor".to_string()));
}

#[tokio::test]
async fn test_confidence_below_threshold_creates_new_node() {
    let dir = tempfile::tempdir().unwrap();
    let backend: SharedBackend = Arc::new(MockBackend::new([
        digest_reply("Elena is the mayor of Haven", 4, true),
        r#"[{"type": "character", "name": "Elena", "description": "mayor of Haven"}]"#.to_string(),
        r#"[["candidate_1", "<NEW>", "nothing similar", 0.9]]"#.to_string(),
    ]));
    let manager = MemoryManager::open(dir.path(), backend, graph_config()).unwrap();
    manager.add_turn(Role::User, "Elena, mayor of Haven").await.unwrap();
    let elena_id = manager.graph().unwrap().query_for_context("Elena", 1).await.hits[0]
        .node
        .id
        .clone();
    drop(manager);

    // The resolver suggests the existing node but with confidence 0.79,
    // below the 0.8 threshold.
    let resolve = format!(r#"[["candidate_1", "{elena_id}", "might be her", 0.79]]"#);
    let backend: SharedBackend = Arc::new(MockBackend::new([
        digest_reply("someone named Elena appears", 4, true),
        r#"[{"type": "character", "name": "Elena", "description": "a newcomer"}]"#.to_string(),
        resolve,
    ]));
    let manager = MemoryManager::open(dir.path(), backend, graph_config()).unwrap();
    manager.add_turn(Role::User, "Elena appears").await.unwrap();

    assert_eq!(manager.graph().unwrap().node_count(), 2);
}

#[tokio::test]
async fn test_compression_consolidates_old_turns() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = plain_config();
    config.recent_window = 2;

    let backend: SharedBackend = Arc::new(MockBackend::new([
        digest_reply("the gate opens at dawn", 4, true),
        digest_reply("the toll is two coins", 4, true),
        digest_reply("the ferry runs daily", 4, true),
        r#"[{"text": "gate opens at dawn", "guids": [], "importance": 4}]"#.to_string(),
    ]));
    let manager = MemoryManager::open(dir.path(), backend, config).unwrap();

    manager.add_turn(Role::User, "The gate opens at dawn.").await.unwrap();
    manager.add_turn(Role::User, "The toll is two coins.").await.unwrap();
    let before_static = manager.snapshot().static_memory;
    manager.add_turn(Role::User, "The ferry runs daily.").await.unwrap();

    let memory = manager.snapshot();
    assert_eq!(memory.conversation_history.len(), 2);
    assert_eq!(memory.context.len(), 1);
    assert_eq!(memory.context[0].text, "gate opens at dawn");
    assert_eq!(memory.static_memory, before_static);

    // The full turn log keeps everything.
    let store = mnemos_store::SessionStore::open(dir.path()).unwrap();
    assert_eq!(store.load_turn_log().unwrap().len(), 3);
}

#[tokio::test]
async fn test_background_drain() {
    let dir = tempfile::tempdir().unwrap();
    let backend: SharedBackend = Arc::new(MockBackend::with_text(digest_reply(
        "a durable fact",
        4,
        true,
    )));
    let manager = MemoryManager::open(dir.path(), backend, plain_config())
        .unwrap()
        .with_background();

    for i in 0..3 {
        manager.add_turn(Role::User, &format!("fact {i}")).await.unwrap();
    }
    manager.wait_for_pending_operations().await;

    assert!(!manager.has_pending_operations());
    let memory = manager.snapshot();
    assert_eq!(memory.conversation_history.len(), 3);
    for turn in &memory.conversation_history {
        assert!(turn.has_digest());
    }

    let stats = manager.scheduler_stats().unwrap();
    assert_eq!(stats.total_depth(), 0);
    assert_eq!(stats.digest.processed, 3);
    assert_eq!(stats.digest.failed, 0);
    assert!(stats.digest.last_finished.is_some());

    manager.shutdown().await;
}

#[tokio::test]
async fn test_query_failure_degrades_gracefully() {
    let dir = tempfile::tempdir().unwrap();
    let backend: SharedBackend = Arc::new(MockBackend::failing_generate());
    let manager = MemoryManager::open(dir.path(), backend, plain_config()).unwrap();

    let response = manager.query_memory("anything").await.unwrap();
    assert_eq!(response, "Error processing query");

    let memory = manager.snapshot();
    assert_eq!(memory.conversation_history.len(), 2);
    assert_eq!(memory.conversation_history[0].role, Role::User);
    assert_eq!(memory.conversation_history[1].role, Role::System);
    assert!(memory.conversation_history[1].content.contains("query failed"));
}

#[tokio::test]
async fn test_queries_see_drained_graph_state() {
    let dir = tempfile::tempdir().unwrap();
    let backend: SharedBackend = Arc::new(MockBackend::new([
        digest_reply("Elena is the mayor of Haven", 4, true),
        r#"[{"type": "character", "name": "Elena", "description": "mayor of Haven"}]"#.to_string(),
        r#"[["candidate_1", "<NEW>", "nothing similar", 0.9]]"#.to_string(),
    ]));
    let manager = MemoryManager::open(dir.path(), backend, graph_config())
        .unwrap()
        .with_background();

    manager.add_turn(Role::User, "Elena, mayor of Haven").await.unwrap();
    manager.wait_for_pending_operations().await;

    let context = manager.graph().unwrap().query_for_context("mayor of Haven", 3).await;
    assert_eq!(context.node_count, 1);
    assert_eq!(context.hits[0].node.name, "Elena");

    manager.shutdown().await;
}
