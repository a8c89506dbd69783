//! Action recipes and the tracker that makes DO and UNDO idempotent.
//!
//! A recipe turns an action on concrete targets into primitive [`Step`]s.
//! Steps are never applied here: the caller turns them into ingestion events
//! so deduced changes take the same path as observed ones.

use std::collections::BTreeMap;
use std::sync::Arc;

use faultline_dsl::{ActionSpec, ActionType};
use faultline_graph::{category, labels, props, Edge, Properties, Vertex};
use faultline_monitoring::metrics::EngineMetrics;
use serde_json::{json, Value};
use tracing::{debug, trace};

use super::matcher::Mapping;
use crate::domain::action::{deduced_alarm_id, ActionId, ActionMode, ActiveAction, Step, TriggerKey};
use crate::domain::repository::ActiveActionStore;
use crate::CoreError;

/// Type given to alarms raised by the evaluator
pub const DEDUCED_ALARM_TYPE: &str = "deduced";

const ALARM_NAME: &str = "alarm_name";
const STATE: &str = "state";
const WORKFLOW: &str = "workflow";

/// An action bound to live ids
#[derive(Debug, Clone, PartialEq)]
pub struct BoundAction {
    /// Action identity
    pub action_id: ActionId,
    /// Action type
    pub action_type: ActionType,
    /// Target role to live id
    pub targets: BTreeMap<String, String>,
    /// Action properties
    pub properties: Properties,
}

impl BoundAction {
    /// Resolve the action's target template ids through a mapping
    pub fn bind(spec: &ActionSpec, mapping: &Mapping) -> Result<Self, CoreError> {
        let mut targets = BTreeMap::new();
        for (role, template_id) in &spec.targets {
            let live = mapping.get(template_id).ok_or_else(|| {
                CoreError::ActionExecutionError(format!(
                    "{} target '{}' ({}) is not bound",
                    spec.action_type, role, template_id
                ))
            })?;
            targets.insert(role.clone(), live.clone());
        }
        Ok(Self {
            action_id: ActionId::compute(spec.action_type, &targets, &spec.properties),
            action_type: spec.action_type,
            targets,
            properties: spec.properties.clone(),
        })
    }

    fn from_active(active: &ActiveAction) -> Self {
        Self {
            action_id: active.action_id.clone(),
            action_type: active.action_type,
            targets: active.targets.clone(),
            properties: active.properties.clone(),
        }
    }

    fn role(&self, role: &str) -> Result<&str, CoreError> {
        self.targets.get(role).map(String::as_str).ok_or_else(|| {
            CoreError::ActionExecutionError(format!(
                "{} has no '{}' target",
                self.action_type, role
            ))
        })
    }

    fn property_str(&self, key: &str) -> Result<&str, CoreError> {
        self.properties.get(key).and_then(Value::as_str).ok_or_else(|| {
            CoreError::ActionExecutionError(format!(
                "{} is missing property '{}'",
                self.action_type, key
            ))
        })
    }

    /// Live id of the primary target, empty for untargeted actions
    pub fn primary_target(&self) -> &str {
        self.targets.get("target").map(String::as_str).unwrap_or_default()
    }
}

/// The recipes, one per action type
pub mod recipes {
    use super::*;

    /// Steps that apply the action
    pub fn do_steps(action: &BoundAction) -> Result<Vec<Step>, CoreError> {
        match action.action_type {
            ActionType::RaiseAlarm => {
                let alarm = alarm_vertex(action)?;
                let on = Edge::new(&alarm.id, action.role("target")?, labels::ON);
                Ok(vec![Step::AddVertex(alarm), Step::AddEdge(on)])
            }
            ActionType::SetState => Ok(vec![set_property(
                action.role("target")?,
                props::DEDUCED_STATE,
                Value::from(action.property_str(STATE)?),
            )]),
            ActionType::MarkDown => Ok(vec![set_property(
                action.role("target")?,
                props::IS_MARKED_DOWN,
                Value::Bool(true),
            )]),
            ActionType::AddCausalRelationship => Ok(vec![Step::AddEdge(causal_edge(action)?)]),
            ActionType::ExecuteMistral => {
                let input: BTreeMap<&String, &Value> = action
                    .properties
                    .iter()
                    .filter(|(key, _)| key.as_str() != WORKFLOW)
                    .collect();
                Ok(vec![Step::NotifyExternal(json!({
                    "workflow": action.property_str(WORKFLOW)?,
                    "input": input,
                    "targets": action.targets,
                }))])
            }
        }
    }

    /// Steps that retract the action. `remaining` are the other active
    /// actions of the same type on the same target, oldest first; an effect
    /// one of them still holds is restored rather than removed.
    pub fn undo_steps(
        action: &BoundAction,
        remaining: &[ActiveAction],
    ) -> Result<Vec<Step>, CoreError> {
        let target = action.role("target");
        match action.action_type {
            ActionType::RaiseAlarm => {
                let name = action.property_str(ALARM_NAME)?;
                let holder = remaining
                    .iter()
                    .rev()
                    .find(|a| a.properties.get(ALARM_NAME).and_then(Value::as_str) == Some(name));
                match holder {
                    Some(holder) => {
                        let alarm = alarm_vertex(&BoundAction::from_active(holder))?;
                        Ok(vec![Step::UpdateVertex(alarm)])
                    }
                    None => Ok(vec![Step::RemoveVertex(deduced_alarm_id(name, target?))]),
                }
            }
            ActionType::SetState => {
                let restored = remaining
                    .last()
                    .and_then(|a| a.properties.get(STATE).cloned())
                    .unwrap_or(Value::Null);
                Ok(vec![set_property(target?, props::DEDUCED_STATE, restored)])
            }
            ActionType::MarkDown if remaining.is_empty() => {
                Ok(vec![set_property(target?, props::IS_MARKED_DOWN, Value::Null)])
            }
            ActionType::MarkDown => Ok(Vec::new()),
            ActionType::AddCausalRelationship => {
                let edge = causal_edge(action)?;
                let still_held = remaining
                    .iter()
                    .any(|a| a.targets.get("source") == Some(&edge.source_id));
                if still_held {
                    Ok(Vec::new())
                } else {
                    Ok(vec![Step::RemoveEdge(edge.key())])
                }
            }
            ActionType::ExecuteMistral => Ok(Vec::new()),
        }
    }

    fn alarm_vertex(action: &BoundAction) -> Result<Vertex, CoreError> {
        let name = action.property_str(ALARM_NAME)?;
        let target = action.role("target")?;
        let mut alarm = Vertex::new(deduced_alarm_id(name, target))
            .with_property(props::CATEGORY, category::ALARM)
            .with_property(props::TYPE, DEDUCED_ALARM_TYPE)
            .with_property(props::NAME, name)
            .with_property(props::RESOURCE_ID, target);
        for (key, value) in &action.properties {
            if key != ALARM_NAME {
                alarm.set(key, value.clone());
            }
        }
        Ok(alarm)
    }

    fn set_property(target: &str, key: &str, value: Value) -> Step {
        Step::UpdateVertex(Vertex::new(target).with_property(key, value))
    }

    fn causal_edge(action: &BoundAction) -> Result<Edge, CoreError> {
        Ok(Edge::new(action.role("source")?, action.role("target")?, labels::CAUSES))
    }
}

/// Runs recipes behind the active-action bookkeeping.
///
/// The first DO of an action emits its steps, later DOs from other triggers
/// are only recorded. An UNDO emits steps when its trigger was the last one
/// holding the action; an UNDO for a trigger that was never recorded is a
/// no-op.
pub struct ActionExecutor {
    store: Arc<dyn ActiveActionStore>,
}

impl ActionExecutor {
    /// Create an executor over a shared store
    pub fn new(store: Arc<dyn ActiveActionStore>) -> Self {
        Self { store }
    }

    /// The store backing this executor
    pub fn store(&self) -> &Arc<dyn ActiveActionStore> {
        &self.store
    }

    /// Execute one action for one trigger
    pub fn execute(
        &self,
        spec: &ActionSpec,
        mode: ActionMode,
        mapping: &Mapping,
        trigger: &TriggerKey,
        template_name: &str,
    ) -> Result<Vec<Step>, CoreError> {
        let action = BoundAction::bind(spec, mapping)?;
        let steps = match mode {
            ActionMode::Do => self.do_action(&action, trigger, template_name)?,
            ActionMode::Undo => self.undo_action(&action, trigger)?,
        };
        if !steps.is_empty() {
            EngineMetrics::record_action(action.action_type.as_str(), mode.as_str());
            debug!(
                action = %action.action_type,
                mode = mode.as_str(),
                target = action.primary_target(),
                trigger = %trigger,
                steps = steps.len(),
                "Action executed"
            );
        }
        Ok(steps)
    }

    fn do_action(
        &self,
        action: &BoundAction,
        trigger: &TriggerKey,
        template_name: &str,
    ) -> Result<Vec<Step>, CoreError> {
        let record = ActiveAction {
            action_id: action.action_id.clone(),
            action_type: action.action_type,
            target_id: action.primary_target().to_string(),
            targets: action.targets.clone(),
            template_name: template_name.to_string(),
            trigger: trigger.clone(),
            properties: action.properties.clone(),
            sequence: 0,
        };
        match self.store.add(record)? {
            Some(1) => recipes::do_steps(action),
            Some(holders) => {
                trace!(action_id = %action.action_id, holders, "Action already active");
                Ok(Vec::new())
            }
            None => {
                trace!(
                    action_id = %action.action_id,
                    trigger = %trigger,
                    "Trigger already recorded"
                );
                Ok(Vec::new())
            }
        }
    }

    fn undo_action(
        &self,
        action: &BoundAction,
        trigger: &TriggerKey,
    ) -> Result<Vec<Step>, CoreError> {
        match self.store.remove(&action.action_id, trigger)? {
            Some(0) => self.retract(action),
            Some(_) => Ok(Vec::new()),
            None => {
                trace!(
                    action_id = %action.action_id,
                    trigger = %trigger,
                    "Undo without matching do"
                );
                Ok(Vec::new())
            }
        }
    }

    fn retract(&self, action: &BoundAction) -> Result<Vec<Step>, CoreError> {
        if !action.action_type.has_undo() {
            return Ok(Vec::new());
        }
        let remaining = self.store.by_target(action.action_type, action.primary_target())?;
        recipes::undo_steps(action, &remaining)
    }

    /// Retract every action held by a template's scenarios. Actions also
    /// held by other templates stay in effect.
    pub fn undo_template(&self, template_name: &str) -> Result<Vec<Step>, CoreError> {
        let mut steps = Vec::new();
        for active in self.store.by_template(template_name)? {
            if let Some(0) = self.store.remove(&active.action_id, &active.trigger)? {
                let action = BoundAction::from_active(&active);
                steps.extend(self.retract(&action)?);
                let mode = ActionMode::Undo.as_str();
                EngineMetrics::record_action(action.action_type.as_str(), mode);
            }
        }
        Ok(steps)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use faultline_graph::properties;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Minimal store for unit tests
    #[derive(Default)]
    pub(crate) struct TestActionStore {
        actions: Mutex<Vec<ActiveAction>>,
        sequence: AtomicU64,
    }

    impl ActiveActionStore for TestActionStore {
        fn add(&self, mut action: ActiveAction) -> Result<Option<usize>, CoreError> {
            let mut actions = self.actions.lock();
            if actions
                .iter()
                .any(|a| a.action_id == action.action_id && a.trigger == action.trigger)
            {
                return Ok(None);
            }
            action.sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
            let id = action.action_id.clone();
            actions.push(action);
            Ok(Some(actions.iter().filter(|a| a.action_id == id).count()))
        }

        fn remove(
            &self,
            action_id: &ActionId,
            trigger: &TriggerKey,
        ) -> Result<Option<usize>, CoreError> {
            let mut actions = self.actions.lock();
            let Some(pos) = actions
                .iter()
                .position(|a| &a.action_id == action_id && &a.trigger == trigger)
            else {
                return Ok(None);
            };
            actions.remove(pos);
            Ok(Some(actions.iter().filter(|a| &a.action_id == action_id).count()))
        }

        fn by_target(
            &self,
            action_type: ActionType,
            target_id: &str,
        ) -> Result<Vec<ActiveAction>, CoreError> {
            let mut out: Vec<ActiveAction> = self
                .actions
                .lock()
                .iter()
                .filter(|a| a.action_type == action_type && a.target_id == target_id)
                .cloned()
                .collect();
            out.sort_by_key(|a| a.sequence);
            Ok(out)
        }

        fn by_template(&self, template_name: &str) -> Result<Vec<ActiveAction>, CoreError> {
            Ok(self
                .actions
                .lock()
                .iter()
                .filter(|a| a.template_name == template_name)
                .cloned()
                .collect())
        }

        fn count(&self) -> Result<usize, CoreError> {
            let ids: BTreeSet<ActionId> =
                self.actions.lock().iter().map(|a| a.action_id.clone()).collect();
            Ok(ids.len())
        }
    }

    fn spec(action_type: ActionType, targets: &[(&str, &str)], props: Properties) -> ActionSpec {
        ActionSpec {
            action_type,
            targets: targets.iter().map(|(r, t)| (r.to_string(), t.to_string())).collect(),
            properties: props,
        }
    }

    fn mapping(pairs: &[(&str, &str)]) -> Mapping {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    fn trigger(scenario: &str, bindings: &Mapping) -> TriggerKey {
        TriggerKey {
            scenario_id: scenario.to_string(),
            clause: 0,
            bindings: bindings.clone(),
        }
    }

    fn executor() -> ActionExecutor {
        ActionExecutor::new(Arc::new(TestActionStore::default()))
    }

    fn run(
        executor: &ActionExecutor,
        spec: &ActionSpec,
        mode: ActionMode,
        mapping: &Mapping,
        scenario: &str,
        template: &str,
    ) -> Vec<Step> {
        executor
            .execute(spec, mode, mapping, &trigger(scenario, mapping), template)
            .unwrap()
    }

    fn set_vertex(id: &str, key: &str, value: impl Into<Value>) -> Step {
        Step::UpdateVertex(Vertex::new(id).with_property(key, value))
    }

    #[test]
    fn test_raise_alarm_emits_once_per_action() {
        let executor = executor();
        let raise = spec(
            ActionType::RaiseAlarm,
            &[("target", "host")],
            properties([("alarm_name", "X"), ("severity", "CRITICAL")]),
        );
        let m1 = mapping(&[("alarm", "a1"), ("host", "h1")]);
        let m2 = mapping(&[("alarm", "a2"), ("host", "h1")]);

        let first = run(&executor, &raise, ActionMode::Do, &m1, "s:0", "t");
        assert_eq!(first.len(), 2);
        match &first[0] {
            Step::AddVertex(alarm) => {
                assert_eq!(alarm.id, deduced_alarm_id("X", "h1"));
                assert_eq!(alarm.name(), Some("X"));
                assert_eq!(alarm.get_str(props::SEVERITY), Some("CRITICAL"));
            }
            other => panic!("unexpected step {:?}", other),
        }

        // Same trigger again, then a second trigger: nothing new is emitted
        assert!(run(&executor, &raise, ActionMode::Do, &m1, "s:0", "t").is_empty());
        assert!(run(&executor, &raise, ActionMode::Do, &m2, "s:0", "t").is_empty());
        assert_eq!(executor.store().count().unwrap(), 1);

        // The alarm goes away with its last trigger
        assert!(run(&executor, &raise, ActionMode::Undo, &m1, "s:0", "t").is_empty());
        let last = run(&executor, &raise, ActionMode::Undo, &m2, "s:0", "t");
        assert_eq!(last, vec![Step::RemoveVertex(deduced_alarm_id("X", "h1"))]);
        assert_eq!(executor.store().count().unwrap(), 0);
    }

    #[test]
    fn test_unmatched_undo_is_noop() {
        let executor = executor();
        let mark = spec(ActionType::MarkDown, &[("target", "host")], Properties::new());
        let m = mapping(&[("host", "h1")]);
        assert!(run(&executor, &mark, ActionMode::Undo, &m, "s:0", "t").is_empty());
    }

    #[test]
    fn test_set_state_undo_restores_remaining_state() {
        let executor = executor();
        let m = mapping(&[("host", "h1")]);
        let target = [("target", "host")];
        let suboptimal = spec(ActionType::SetState, &target, properties([("state", "SUBOPTIMAL")]));
        let error = spec(ActionType::SetState, &target, properties([("state", "ERROR")]));

        run(&executor, &suboptimal, ActionMode::Do, &m, "a:0", "a");
        let steps = run(&executor, &error, ActionMode::Do, &m, "b:0", "b");
        assert_eq!(steps, vec![set_vertex("h1", props::DEDUCED_STATE, "ERROR")]);

        let steps = run(&executor, &error, ActionMode::Undo, &m, "b:0", "b");
        assert_eq!(steps, vec![set_vertex("h1", props::DEDUCED_STATE, "SUBOPTIMAL")]);

        let steps = run(&executor, &suboptimal, ActionMode::Undo, &m, "a:0", "a");
        assert_eq!(steps, vec![set_vertex("h1", props::DEDUCED_STATE, Value::Null)]);
    }

    #[test]
    fn test_causal_relationship_and_mistral() {
        let executor = executor();
        let m = mapping(&[("cause", "a1"), ("effect", "a2")]);
        let causal = spec(
            ActionType::AddCausalRelationship,
            &[("source", "cause"), ("target", "effect")],
            Properties::new(),
        );
        let steps = run(&executor, &causal, ActionMode::Do, &m, "s:0", "t");
        assert_eq!(steps, vec![Step::AddEdge(Edge::new("a1", "a2", labels::CAUSES))]);
        let steps = run(&executor, &causal, ActionMode::Undo, &m, "s:0", "t");
        assert_eq!(steps, vec![Step::RemoveEdge(Edge::new("a1", "a2", labels::CAUSES).key())]);

        let input = properties([("workflow", "reboot"), ("force", "yes")]);
        let mistral = spec(ActionType::ExecuteMistral, &[], input);
        let steps = run(&executor, &mistral, ActionMode::Do, &m, "s:1", "t");
        match &steps[..] {
            [Step::NotifyExternal(payload)] => {
                assert_eq!(payload["workflow"], "reboot");
                assert_eq!(payload["input"]["force"], "yes");
            }
            other => panic!("unexpected steps {:?}", other),
        }
        assert!(run(&executor, &mistral, ActionMode::Undo, &m, "s:1", "t").is_empty());
    }

    #[test]
    fn test_unbound_target_is_an_error() {
        let executor = executor();
        let mark = spec(ActionType::MarkDown, &[("target", "host")], Properties::new());
        let err = executor
            .execute(&mark, ActionMode::Do, &Mapping::new(), &trigger("s:0", &Mapping::new()), "t")
            .unwrap_err();
        assert!(matches!(err, CoreError::ActionExecutionError(_)));
    }

    #[test]
    fn test_undo_template_keeps_shared_actions() {
        let executor = executor();
        let m = mapping(&[("host", "h1")]);
        let mark = spec(ActionType::MarkDown, &[("target", "host")], Properties::new());
        run(&executor, &mark, ActionMode::Do, &m, "a:0", "a");
        run(&executor, &mark, ActionMode::Do, &m, "b:0", "b");

        assert!(executor.undo_template("a").unwrap().is_empty());
        let steps = executor.undo_template("b").unwrap();
        assert_eq!(steps, vec![set_vertex("h1", props::IS_MARKED_DOWN, Value::Null)]);
    }
}
