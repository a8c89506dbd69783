use crate::{InMemoryActiveActionStore, InMemoryMessageBus, InMemoryStateStoreProvider};
use faultline_core::{
    domain::repository::{ActiveActionStore, EventLog, SnapshotStore, TemplateStore},
    ActionId, ActiveAction, CoreError, EntityEvent, TemplateRecord, TemplateStatus, TriggerKey,
    MessageBus,
};
use faultline_dsl::{parse_template_document, ActionType};
use faultline_graph::{PropertyGraph, Properties, Vertex};
use futures::StreamExt;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

fn active(action: &str, target: &str, template: &str, clause: usize) -> ActiveAction {
    let mut targets = BTreeMap::new();
    targets.insert("target".to_string(), target.to_string());
    ActiveAction {
        action_id: ActionId(action.to_string()),
        action_type: ActionType::SetState,
        target_id: target.to_string(),
        targets,
        template_name: template.to_string(),
        trigger: TriggerKey {
            scenario_id: format!("{}:0", template),
            clause,
            bindings: BTreeMap::new(),
        },
        properties: Properties::new(),
        sequence: 0,
    }
}

#[tokio::test]
async fn test_event_log_queries_after_id() -> Result<(), CoreError> {
    let provider = InMemoryStateStoreProvider::new();
    let repos = provider.create_repositories();

    assert_eq!(repos.event_log.last_event_id().await?, None);
    for id in ["h1", "h2", "h3"] {
        repos.event_log.create(&EntityEvent::update_entity(Vertex::new(id))).await?;
    }

    assert_eq!(repos.event_log.last_event_id().await?, Some(3));
    let all = repos.event_log.query(None).await?;
    assert_eq!(all.iter().map(|e| e.id).collect::<Vec<_>>(), vec![1, 2, 3]);

    let tail = repos.event_log.query(Some(2)).await?;
    assert_eq!(tail.len(), 1);
    assert_eq!(tail[0].event.subject(), "h3");
    Ok(())
}

#[tokio::test]
async fn test_snapshot_store_returns_latest() -> Result<(), CoreError> {
    let provider = InMemoryStateStoreProvider::new();
    let repos = provider.create_repositories();
    assert!(repos.snapshots.latest().await?.is_none());

    let graph = PropertyGraph::new("g");
    graph.add_vertex(Vertex::new("h1"));
    repos.snapshots.create(&graph.snapshot(Some(1))).await?;
    graph.add_vertex(Vertex::new("h2"));
    repos.snapshots.create(&graph.snapshot(Some(5))).await?;

    let latest = repos.snapshots.latest().await?.unwrap();
    assert_eq!(latest.last_event_id, Some(5));
    assert_eq!(latest.vertices.len(), 2);
    assert_eq!(provider.snapshots().count().await, 2);
    Ok(())
}

#[tokio::test]
async fn test_template_store_filters_by_status() -> Result<(), CoreError> {
    let provider = InMemoryStateStoreProvider::new();
    let store = provider.templates();
    let document = parse_template_document(
        "metadata:\n  name: basics\n  type: definition\ndefinitions:\n  entities:\n    - entity: {template_id: host, category: RESOURCE, type: nova.host}\n",
    )
    .map_err(CoreError::from)?;

    let mut record = TemplateRecord::loading(document);
    store.save(&record).await?;
    assert_eq!(store.list(Some(TemplateStatus::Active)).await?.len(), 0);

    record.transition(TemplateStatus::Active, None);
    store.save(&record).await?;
    assert_eq!(store.list(Some(TemplateStatus::Active)).await?.len(), 1);
    assert_eq!(store.list(None).await?.len(), 1);

    store.delete("basics").await?;
    assert!(store.find_by_name("basics").await?.is_none());
    Ok(())
}

#[test]
fn test_active_action_store_counts_triggers() {
    let store = InMemoryActiveActionStore::new();
    let id = ActionId("a".to_string());

    assert_eq!(store.add(active("a", "h1", "t", 0)).unwrap(), Some(1));
    assert_eq!(store.add(active("a", "h1", "t", 1)).unwrap(), Some(2));
    // The same trigger is recorded once
    assert_eq!(store.add(active("a", "h1", "t", 1)).unwrap(), None);
    assert_eq!(store.count().unwrap(), 1);
    assert_eq!(store.triggers(&id).len(), 2);

    let first = active("a", "h1", "t", 0).trigger;
    assert_eq!(store.remove(&id, &first).unwrap(), Some(1));
    assert_eq!(store.remove(&id, &first).unwrap(), None);

    let second = active("a", "h1", "t", 1).trigger;
    assert_eq!(store.remove(&id, &second).unwrap(), Some(0));
    assert_eq!(store.count().unwrap(), 0);
}

#[test]
fn test_active_action_store_lookups_are_ordered() {
    let store = InMemoryActiveActionStore::new();
    store.add(active("b", "h1", "t2", 0)).unwrap();
    store.add(active("a", "h1", "t1", 0)).unwrap();
    store.add(active("c", "h2", "t1", 0)).unwrap();

    let on_h1 = store.by_target(ActionType::SetState, "h1").unwrap();
    assert_eq!(
        on_h1.iter().map(|a| a.action_id.0.as_str()).collect::<Vec<_>>(),
        vec!["b", "a"]
    );
    assert!(store.by_target(ActionType::MarkDown, "h1").unwrap().is_empty());

    let of_t1 = store.by_template("t1").unwrap();
    assert_eq!(
        of_t1.iter().map(|a| a.action_id.0.as_str()).collect::<Vec<_>>(),
        vec!["a", "c"]
    );
}

#[test]
fn test_concurrent_adds_of_one_action() {
    let store = Arc::new(InMemoryActiveActionStore::new());
    let handles: Vec<_> = (0..8)
        .map(|clause| {
            let store = store.clone();
            std::thread::spawn(move || store.add(active("a", "h1", "t", clause)).unwrap())
        })
        .collect();
    let mut counts: Vec<usize> = handles.into_iter().map(|h| h.join().unwrap().unwrap()).collect();
    counts.sort_unstable();
    // Exactly one caller saw itself as the first holder
    assert_eq!(counts, (1..=8).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_message_bus_delivers_by_topic() -> Result<(), CoreError> {
    let bus = InMemoryMessageBus::default();
    // Publishing without subscribers succeeds
    bus.publish("alarms", "raised", json!({})).await?;

    let mut alarms = bus.subscribe("alarms").await?;
    bus.publish("other", "ignored", json!({"n": 0})).await?;
    bus.publish("alarms", "raised", json!({"n": 1})).await?;

    let message = tokio::time::timeout(Duration::from_secs(1), alarms.next())
        .await
        .map_err(|_| CoreError::Other("no message".to_string()))?
        .unwrap();
    assert_eq!(message.event_type, "raised");
    assert_eq!(message.payload, json!({"n": 1}));
    Ok(())
}

#[tokio::test]
async fn test_provider_shares_stores_across_engines() -> Result<(), CoreError> {
    let provider = InMemoryStateStoreProvider::new();
    let first = provider.create_repositories();
    first.event_log.create(&EntityEvent::delete_entity("h1")).await?;
    first.actions.add(active("a", "h1", "t", 0))?;

    let second = provider.create_repositories();
    assert_eq!(second.event_log.last_event_id().await?, Some(1));
    assert_eq!(second.actions.count()?, 0);
    assert_eq!(provider.event_log().len().await, 1);
    Ok(())
}
