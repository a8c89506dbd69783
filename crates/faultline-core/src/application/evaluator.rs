//! Delta-driven scenario evaluation.
//!
//! For every graph change the evaluator finds the scenario clauses whose
//! patterns could involve the changed element, matches each clause anchored
//! at the element's state before and after the change, and runs UNDO for
//! embeddings that disappeared and DO for embeddings that appeared.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use faultline_dsl::Scenario;
use faultline_graph::{GraphDelta, GraphElement, PropertyGraph, SubscriptionId};
use faultline_monitoring::metrics::EngineMetrics;
use parking_lot::RwLock;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, error, info, warn};

use super::action_executor::ActionExecutor;
use super::matcher::{GraphView, Mapping, SubgraphMatcher};
use super::scenario_index::{Candidate, ScenarioIndex};
use crate::domain::action::{ActionMode, Step, TriggerKey};
use crate::domain::events::EntityEvent;
use crate::domain::repository::ActiveActionStore;
use crate::CoreError;

/// Evaluates installed scenarios against one graph
pub struct ScenarioEvaluator {
    name: String,
    index: RwLock<ScenarioIndex>,
    executor: ActionExecutor,
    loopback: UnboundedSender<EntityEvent>,
    enabled: AtomicBool,
}

impl ScenarioEvaluator {
    /// Create a disabled evaluator whose steps are sent to `loopback`
    pub fn new(
        name: &str,
        store: Arc<dyn ActiveActionStore>,
        loopback: UnboundedSender<EntityEvent>,
    ) -> Self {
        Self {
            name: name.to_string(),
            index: RwLock::new(ScenarioIndex::new()),
            executor: ActionExecutor::new(store),
            loopback,
            enabled: AtomicBool::new(false),
        }
    }

    /// Evaluator name, used in logs
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether actions fire
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Turn actions on and evaluate every installed scenario once
    pub fn enable_evaluations(&self, graph: &PropertyGraph) -> usize {
        self.enabled.store(true, Ordering::Release);
        let scenarios = self.index.read().all_scenarios();
        let emitted = self.evaluate_full(graph, &scenarios);
        info!(evaluator = %self.name, scenarios = scenarios.len(), emitted, "Evaluations enabled");
        emitted
    }

    /// Turn actions off; deltas are ignored until re-enabled
    pub fn disable_evaluations(&self) {
        self.enabled.store(false, Ordering::Release);
    }

    /// Number of installed scenarios
    pub fn scenario_count(&self) -> usize {
        self.index.read().len()
    }

    /// Installed scenarios of a template
    pub fn scenarios_of_template(&self, template_name: &str) -> Vec<Arc<Scenario>> {
        self.index.read().scenarios_of_template(template_name)
    }

    /// Install a template's scenarios, replacing the ones it had. When
    /// enabled, the new scenarios are evaluated against the whole graph.
    pub fn install_template(
        &self,
        template_name: &str,
        scenarios: Vec<Arc<Scenario>>,
        graph: &PropertyGraph,
    ) -> usize {
        {
            let mut index = self.index.write();
            index.remove_template(template_name);
            index.add_scenarios(scenarios.iter().cloned());
        }
        debug!(
            evaluator = %self.name,
            template = template_name,
            scenarios = scenarios.len(),
            "Template installed"
        );
        if self.is_enabled() {
            self.evaluate_full(graph, &scenarios)
        } else {
            0
        }
    }

    /// Uninstall a template, retracting every action it holds
    pub fn remove_template(&self, template_name: &str) -> usize {
        let removed = self.index.write().remove_template(template_name);
        let steps = match self.executor.undo_template(template_name) {
            Ok(steps) => steps,
            Err(e) => {
                error!(
                    evaluator = %self.name,
                    template = template_name,
                    error = %e,
                    "Failed to retract template actions"
                );
                Vec::new()
            }
        };
        debug!(
            evaluator = %self.name,
            template = template_name,
            scenarios = removed.len(),
            "Template removed"
        );
        self.emit(steps)
    }

    /// Subscribe this evaluator to a graph's changes.
    ///
    /// The subscription keeps the graph handle alive; clear the graph's
    /// subscribers to release it.
    pub fn attach(self: &Arc<Self>, graph: &PropertyGraph) -> SubscriptionId {
        let evaluator = Arc::clone(self);
        let view_graph = graph.clone();
        graph.subscribe(
            &format!("evaluator:{}", self.name),
            move |delta| {
                evaluator.process_delta(&view_graph, delta);
                Ok(())
            },
            false,
        )
    }

    /// Evaluate one committed change of `graph`. Returns the number of
    /// steps emitted.
    pub fn process_delta(&self, graph: &PropertyGraph, delta: &GraphDelta) -> usize {
        if !self.is_enabled() || delta.is_noop() {
            return 0;
        }
        let candidates = self.candidates(graph, delta);
        let mut steps = Vec::new();
        for candidate in candidates {
            if !candidate.scenario.is_enabled() {
                continue;
            }
            match self.diff(graph, delta, &candidate) {
                Ok((undo, redo)) => {
                    for mapping in &undo {
                        steps.extend(self.run_actions(&candidate, mapping, ActionMode::Undo));
                    }
                    for mapping in &redo {
                        steps.extend(self.run_actions(&candidate, mapping, ActionMode::Do));
                    }
                }
                Err(e) => {
                    EngineMetrics::record_match_error(&candidate.scenario.template_name);
                    error!(
                        evaluator = %self.name,
                        scenario = %candidate.scenario.id,
                        element = %delta.identity(),
                        error = %e,
                        "Scenario matching failed"
                    );
                }
            }
        }
        self.emit(steps)
    }

    fn candidates(&self, graph: &PropertyGraph, delta: &GraphDelta) -> Vec<Candidate> {
        let index = self.index.read();
        let mut found: BTreeMap<(String, usize), Candidate> = BTreeMap::new();
        for element in [&delta.before, &delta.after].into_iter().flatten() {
            let candidates = match element {
                GraphElement::Vertex(vertex) => index.candidates_for_vertex(vertex),
                GraphElement::Edge(edge) => {
                    match (graph.get_vertex(&edge.source_id), graph.get_vertex(&edge.target_id)) {
                        (Some(source), Some(target)) => {
                            index.candidates_for_edge(edge, &source, &target)
                        }
                        _ => Vec::new(),
                    }
                }
            };
            for candidate in candidates {
                found
                    .entry((candidate.scenario.id.clone(), candidate.clause))
                    .or_insert(candidate);
            }
        }
        found.into_values().collect()
    }

    // Embeddings that disappeared and embeddings that appeared
    fn diff(
        &self,
        graph: &PropertyGraph,
        delta: &GraphDelta,
        candidate: &Candidate,
    ) -> Result<(Vec<Mapping>, Vec<Mapping>), CoreError> {
        let pattern = candidate.scenario.patterns.get(candidate.clause).ok_or_else(|| {
            CoreError::MatchError(format!(
                "scenario {} has no clause {}",
                candidate.scenario.id, candidate.clause
            ))
        })?;
        let matcher = SubgraphMatcher::new(pattern);

        let before = match &delta.before {
            Some(element) => matcher.match_anchored(&before_view(graph, delta, element), element)?,
            None => Vec::new(),
        };
        let after = match &delta.after {
            Some(element) => matcher.match_anchored(&GraphView::current(graph), element)?,
            None => Vec::new(),
        };

        let before: BTreeSet<Mapping> = before.into_iter().collect();
        let after: BTreeSet<Mapping> = after.into_iter().collect();
        Ok((
            before.difference(&after).cloned().collect(),
            after.difference(&before).cloned().collect(),
        ))
    }

    fn run_actions(&self, candidate: &Candidate, mapping: &Mapping, mode: ActionMode) -> Vec<Step> {
        let scenario = &candidate.scenario;
        let trigger = TriggerKey {
            scenario_id: scenario.id.clone(),
            clause: candidate.clause,
            bindings: mapping.clone(),
        };
        let mut steps = Vec::new();
        for spec in &scenario.actions {
            match self
                .executor
                .execute(spec, mode, mapping, &trigger, &scenario.template_name)
            {
                Ok(action_steps) => steps.extend(action_steps),
                Err(e) => error!(
                    evaluator = %self.name,
                    scenario = %scenario.id,
                    action = %spec.action_type,
                    mode = mode.as_str(),
                    error = %e,
                    "Action execution failed"
                ),
            }
        }
        steps
    }

    /// DO every current embedding of the given scenarios
    pub fn evaluate_full(&self, graph: &PropertyGraph, scenarios: &[Arc<Scenario>]) -> usize {
        let view = GraphView::current(graph);
        let mut steps = Vec::new();
        for scenario in scenarios.iter().filter(|s| s.is_enabled()) {
            for (clause, pattern) in scenario.patterns.iter().enumerate() {
                let candidate = Candidate {
                    scenario: Arc::clone(scenario),
                    clause,
                };
                match SubgraphMatcher::new(pattern).match_all(&view, graph) {
                    Ok(mappings) => {
                        for mapping in &mappings {
                            steps.extend(self.run_actions(&candidate, mapping, ActionMode::Do));
                        }
                    }
                    Err(e) => {
                        EngineMetrics::record_match_error(&scenario.template_name);
                        error!(
                            evaluator = %self.name,
                            scenario = %scenario.id,
                            error = %e,
                            "Full evaluation failed"
                        );
                    }
                }
            }
        }
        self.emit(steps)
    }

    fn emit(&self, steps: Vec<Step>) -> usize {
        let count = steps.len();
        for step in steps {
            if self.loopback.send(step.into_event()).is_err() {
                warn!(evaluator = %self.name, "Loopback channel closed, dropping deduced events");
                break;
            }
        }
        count
    }
}

fn before_view<'a>(
    graph: &'a PropertyGraph,
    delta: &'a GraphDelta,
    element: &'a GraphElement,
) -> GraphView<'a> {
    match element {
        GraphElement::Vertex(vertex) => {
            let before = delta.before.as_ref().and_then(GraphElement::as_vertex);
            GraphView::with_vertex(graph, &vertex.id, before)
        }
        GraphElement::Edge(edge) => {
            let before = delta.before.as_ref().and_then(GraphElement::as_edge);
            GraphView::with_edge(graph, edge.key(), before)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::action_executor::tests::TestActionStore;
    use crate::domain::events::EventAction;
    use faultline_dsl::parse_and_compile_template;
    use faultline_graph::{category, labels, props, Edge, EdgeKey, Vertex};
    use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

    const TEMPLATE: &str = r#"
metadata:
  name: host-alarms
definitions:
  entities:
    - entity: {template_id: alarm, category: ALARM, type: nagios}
    - entity: {template_id: host, category: RESOURCE, type: nova.host}
  relationships:
    - relationship: {template_id: alarm_on_host, source: alarm, target: host, relationship_type: on}
scenarios:
  - scenario:
      condition: alarm_on_host
      actions:
        - action:
            action_type: raise_alarm
            action_target: {target: host}
            properties: {alarm_name: host_problem, severity: WARNING}
"#;

    fn setup() -> (PropertyGraph, Arc<ScenarioEvaluator>, UnboundedReceiver<EntityEvent>) {
        let graph = PropertyGraph::new("replica");
        graph.add_vertex(
            Vertex::new("h1")
                .with_property(props::CATEGORY, category::RESOURCE)
                .with_property(props::TYPE, "nova.host"),
        );
        let (tx, rx) = unbounded_channel();
        let store = Arc::new(TestActionStore::default());
        let evaluator = Arc::new(ScenarioEvaluator::new("w0", store, tx));
        let compiled = parse_and_compile_template(TEMPLATE).unwrap();
        evaluator.install_template(
            "host-alarms",
            compiled.scenarios.into_iter().map(Arc::new).collect(),
            &graph,
        );
        evaluator.attach(&graph);
        (graph, evaluator, rx)
    }

    fn add_alarm(graph: &PropertyGraph, id: &str) {
        graph.add_vertex(
            Vertex::new(id)
                .with_property(props::CATEGORY, category::ALARM)
                .with_property(props::TYPE, "nagios"),
        );
        graph.add_edge(Edge::new(id, "h1", labels::ON)).unwrap();
    }

    fn drain(rx: &mut UnboundedReceiver<EntityEvent>) -> Vec<EntityEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_disabled_evaluator_fires_nothing() {
        let (graph, evaluator, mut rx) = setup();
        add_alarm(&graph, "a1");
        assert!(drain(&mut rx).is_empty());

        // Enabling catches up on the existing match
        assert_eq!(evaluator.enable_evaluations(&graph), 2);
        let events = drain(&mut rx);
        assert_eq!(events[0].action, EventAction::UpdateEntity);
        assert_eq!(events[1].action, EventAction::UpdateRelationship);
    }

    #[test]
    fn test_do_on_appearance_and_undo_on_last_disappearance() {
        let (graph, evaluator, mut rx) = setup();
        evaluator.enable_evaluations(&graph);

        add_alarm(&graph, "a1");
        let events = drain(&mut rx);
        assert_eq!(events.len(), 2);
        let alarm = events[0].vertex.clone().unwrap();
        assert_eq!(alarm.name(), Some("host_problem"));

        // A second trigger for the same action emits nothing
        add_alarm(&graph, "a2");
        assert!(drain(&mut rx).is_empty());

        // Property churn that keeps the match leaves it alone
        graph.update_vertex(Vertex::new("a1").with_property(props::SEVERITY, "CRITICAL"));
        assert!(drain(&mut rx).is_empty());

        graph
            .update_edge(Edge::new("a1", "h1", labels::ON).with_property(props::IS_DELETED, true))
            .unwrap();
        assert!(drain(&mut rx).is_empty());

        graph.remove_edge(&EdgeKey::new("a2", "h1", labels::ON)).unwrap();
        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].action, EventAction::DeleteEntity);
        assert_eq!(events[0].subject(), alarm.id);
    }

    #[test]
    fn test_replica_undoes_when_primary_removes_a_live_vertex() {
        let (replica, evaluator, mut rx) = setup();
        evaluator.enable_evaluations(&replica);
        add_alarm(&replica, "a1");
        let raised = drain(&mut rx)[0].subject();

        // The replica applies the edge removal while both endpoints exist
        let primary = replica.fork("primary");
        for delta in primary.remove_vertex("a1").unwrap() {
            replica.apply_delta(&delta).unwrap();
        }
        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].action, EventAction::DeleteEntity);
        assert_eq!(events[0].subject(), raised);
        assert!(replica.get_vertex("a1").is_none());
    }

    #[test]
    fn test_remove_template_retracts_actions() {
        let (graph, evaluator, mut rx) = setup();
        evaluator.enable_evaluations(&graph);
        add_alarm(&graph, "a1");
        drain(&mut rx);

        assert_eq!(evaluator.remove_template("host-alarms"), 1);
        assert_eq!(drain(&mut rx)[0].action, EventAction::DeleteEntity);
        assert_eq!(evaluator.scenario_count(), 0);

        add_alarm(&graph, "a2");
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_disabled_scenario_is_skipped() {
        let (graph, evaluator, mut rx) = setup();
        evaluator.enable_evaluations(&graph);
        for scenario in evaluator.scenarios_of_template("host-alarms") {
            scenario.set_enabled(false);
        }
        add_alarm(&graph, "a1");
        assert!(drain(&mut rx).is_empty());
    }
}
