#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use faultline::prelude::*;
use faultline::engine::BusMessage;
use futures::stream::BoxStream;
use futures::StreamExt;
use tokio::time::{sleep, timeout, Instant};

pub const DEFINITIONS: &str = r#"
metadata:
  name: dc-basics
  type: definition
definitions:
  entities:
    - entity: {template_id: host_alarm, category: ALARM, type: zabbix, name: host_nic_down}
    - entity: {template_id: host, category: RESOURCE, type: nova.host}
    - entity: {template_id: instance, category: RESOURCE, type: nova.instance}
  relationships:
    - relationship: {template_id: alarm_on_host, source: host_alarm, target: host, relationship_type: on}
    - relationship: {template_id: host_contains_instance, source: host, target: instance, relationship_type: contains}
"#;

pub const INSTANCE_NIC: &str = r#"
metadata:
  name: instance-nic
includes:
  - name: dc-basics
scenarios:
  - scenario:
      condition: alarm_on_host and host_contains_instance
      actions:
        - action:
            action_type: raise_alarm
            action_target: {target: instance}
            properties: {alarm_name: instance_nic_down, severity: CRITICAL}
        - action:
            action_type: set_state
            action_target: {target: instance}
            properties: {state: ERROR}
        - action:
            action_type: mark_down
            action_target: {target: host}
"#;

/// Raises the same alarm as `instance-nic` from a weaker condition
pub const INSTANCE_ON_HOST: &str = r#"
metadata:
  name: instance-on-host
includes:
  - name: dc-basics
scenarios:
  - scenario:
      condition: host_contains_instance
      actions:
        - action:
            action_type: raise_alarm
            action_target: {target: instance}
            properties: {alarm_name: instance_nic_down, severity: CRITICAL}
"#;

pub const RESTART_HOST: &str = r#"
metadata:
  name: restart-host
includes:
  - name: dc-basics
scenarios:
  - scenario:
      condition: alarm_on_host
      actions:
        - action:
            action_type: execute_mistral
            properties: {workflow: restart_host, force: true}
"#;

pub fn config() -> EngineConfig {
    EngineConfig {
        workers: 3,
        high_priority_cooldown_ms: 5,
        low_priority_retry_ms: 1,
        replication_ack_timeout_ms: 2_000,
        ..EngineConfig::default()
    }
}

pub async fn engine(
    provider: &InMemoryStateStoreProvider,
    config: EngineConfig,
) -> Arc<FaultlineEngine> {
    let engine = FaultlineEngine::create_with_repositories(config, provider.create_repositories())
        .await
        .unwrap();
    engine.start().unwrap();
    engine
}

pub async fn load(engine: &FaultlineEngine, sources: &[&str]) {
    for source in sources {
        let record = engine.templates().add_template(source).await.unwrap();
        assert_eq!(record.status, TemplateStatus::Active, "{:?}", record.status_details);
    }
}

pub fn host(id: &str) -> EntityEvent {
    EntityEvent::update_entity(
        Vertex::new(id)
            .with_property(props::CATEGORY, category::RESOURCE)
            .with_property(props::TYPE, "nova.host"),
    )
}

pub fn instance(id: &str, host_id: &str) -> EntityEvent {
    EntityEvent::update_entity(
        Vertex::new(id)
            .with_property(props::CATEGORY, category::RESOURCE)
            .with_property(props::TYPE, "nova.instance"),
    )
    .with_neighbor(Vertex::new(host_id), Edge::new(host_id, id, labels::CONTAINS))
}

pub fn nic_alarm(id: &str, host_id: &str) -> EntityEvent {
    EntityEvent::update_entity(
        Vertex::new(id)
            .with_property(props::CATEGORY, category::ALARM)
            .with_property(props::TYPE, "zabbix")
            .with_property(props::NAME, "host_nic_down"),
    )
    .with_neighbor(Vertex::new(host_id), Edge::new(id, host_id, labels::ON))
}

/// Wait until `check` holds, failing the test after a few seconds
pub async fn eventually<F: Fn() -> bool>(what: &str, check: F) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !check() {
        if Instant::now() > deadline {
            panic!("timed out waiting for {}", what);
        }
        sleep(Duration::from_millis(10)).await;
    }
}

/// Next bus message of a given type
pub async fn next_of_type(
    messages: &mut BoxStream<'static, BusMessage>,
    event_type: &str,
) -> BusMessage {
    timeout(Duration::from_secs(5), async {
        loop {
            match messages.next().await {
                Some(message) if message.event_type == event_type => return message,
                Some(_) => continue,
                None => panic!("bus closed"),
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("no {} message", event_type))
}

pub fn live(graph: &PropertyGraph, id: &str) -> Option<Vertex> {
    graph.get_vertex(id).filter(|v| !v.is_deleted())
}

pub fn live_deduced_alarms(graph: &PropertyGraph) -> Vec<Vertex> {
    let mut filter = faultline::graph::Properties::new();
    filter.insert(props::TYPE.to_string(), "deduced".into());
    filter.insert(props::IS_DELETED.to_string(), false.into());
    graph.get_vertices(Some(&filter))
}
