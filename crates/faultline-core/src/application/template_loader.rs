//! Template lifecycle: compile, install, recompile dependents, delete.

use std::sync::Arc;

use faultline_dsl::{parse_template_document, TemplateCompiler, TemplateDocument, TemplateType};
use faultline_monitoring::metrics::EngineMetrics;
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::replicator::ScenarioInstaller;
use crate::domain::repository::TemplateStore;
use crate::domain::template::{TemplateRecord, TemplateStatus};
use crate::CoreError;

/// Loads templates into the evaluator workers and tracks their status
pub struct TemplateLoader {
    store: Arc<dyn TemplateStore>,
    installer: Arc<dyn ScenarioInstaller>,
    // Serializes loads so dependents always compile against a stable set of
    // definitions
    compiler: Mutex<TemplateCompiler>,
}

impl TemplateLoader {
    /// Create a loader
    pub fn new(store: Arc<dyn TemplateStore>, installer: Arc<dyn ScenarioInstaller>) -> Self {
        Self {
            store,
            installer,
            compiler: Mutex::new(TemplateCompiler::new()),
        }
    }

    /// Parse and load a YAML or JSON template
    pub async fn add_template(&self, source: &str) -> Result<TemplateRecord, CoreError> {
        let document = parse_template_document(source)?;
        self.add_document(document).await
    }

    /// Load a parsed template.
    ///
    /// Compilation failures do not fail the call: the returned record has
    /// the `Error` status and the failure in its details.
    pub async fn add_document(
        &self,
        document: TemplateDocument,
    ) -> Result<TemplateRecord, CoreError> {
        let mut record = TemplateRecord::loading(document);
        self.store.save(&record).await?;

        let mut compiler = self.compiler.lock().await;
        match compiler.compile(&record.document) {
            Ok(compiled) => {
                let installed = match compiled.template_type {
                    TemplateType::Standard => {
                        let scenarios = compiled.scenarios.into_iter().map(Arc::new).collect();
                        self.installer.install_template(&record.name, scenarios).await.map(|_| ())
                    }
                    TemplateType::Definition | TemplateType::Equivalence => Ok(()),
                };
                match installed {
                    Ok(()) => record.transition(TemplateStatus::Active, None),
                    Err(e) => record.transition(TemplateStatus::Error, Some(e.to_string())),
                }
            }
            Err(e) => {
                EngineMetrics::record_compile_error(&record.name);
                warn!(template = %record.name, error = %e, "Template rejected");
                record.transition(TemplateStatus::Error, Some(e.to_string()));
            }
        }
        self.store.save(&record).await?;
        info!(
            template = %record.name,
            kind = %record.template_type,
            status = %record.status,
            "Template loaded"
        );

        if record.status == TemplateStatus::Active {
            self.recompile_dependents(&compiler, &record).await?;
        }
        Ok(record)
    }

    /// Remove a template from the workers, retracting its actions
    pub async fn delete_template(&self, name: &str) -> Result<TemplateRecord, CoreError> {
        let mut record = self
            .store
            .find_by_name(name)
            .await?
            .ok_or_else(|| CoreError::TemplateNotFound(name.to_string()))?;
        record.transition(TemplateStatus::Deleting, None);
        self.store.save(&record).await?;

        let mut compiler = self.compiler.lock().await;
        match record.template_type {
            TemplateType::Standard => {
                if let Err(e) = self.installer.remove_template(name).await {
                    warn!(template = %name, error = %e, "Template removal failed");
                    record.transition(TemplateStatus::Error, Some(e.to_string()));
                    self.store.save(&record).await?;
                    return Err(e);
                }
            }
            TemplateType::Definition => {
                compiler.remove_definition_template(name);
            }
            TemplateType::Equivalence => {
                compiler.remove_equivalence_template(name);
            }
        }
        if record.template_type != TemplateType::Standard {
            self.recompile_dependents(&compiler, &record).await?;
        }

        record.transition(TemplateStatus::Deleted, None);
        self.store.save(&record).await?;
        info!(template = %name, "Template deleted");
        Ok(record)
    }

    /// A template record by name
    pub async fn get(&self, name: &str) -> Result<Option<TemplateRecord>, CoreError> {
        self.store.find_by_name(name).await
    }

    /// Reload every active template from the store, definitions and
    /// equivalences before the standard templates that use them
    pub async fn load_active(&self) -> Result<usize, CoreError> {
        let mut records = self.store.list(Some(TemplateStatus::Active)).await?;
        records.sort_by_key(|r| match r.template_type {
            TemplateType::Definition => 0,
            TemplateType::Equivalence => 1,
            TemplateType::Standard => 2,
        });
        let count = records.len();
        for record in records {
            self.add_document(record.document).await?;
        }
        Ok(count)
    }

    // Standard templates affected by a definition or equivalence change
    async fn recompile_dependents(
        &self,
        compiler: &TemplateCompiler,
        changed: &TemplateRecord,
    ) -> Result<(), CoreError> {
        if changed.template_type == TemplateType::Standard {
            return Ok(());
        }
        let candidates = self.store.list(None).await?;
        for mut record in candidates {
            let relevant = record.template_type == TemplateType::Standard
                && matches!(record.status, TemplateStatus::Active | TemplateStatus::Error)
                && match changed.template_type {
                    TemplateType::Definition => {
                        TemplateCompiler::depends_on(&record.document, &changed.name)
                    }
                    _ => true,
                };
            if !relevant {
                continue;
            }
            match compiler.compile_standard(&record.document) {
                Ok(scenarios) => {
                    let scenarios = scenarios.into_iter().map(Arc::new).collect();
                    self.installer.install_template(&record.name, scenarios).await?;
                    record.transition(TemplateStatus::Active, None);
                }
                Err(e) => {
                    EngineMetrics::record_compile_error(&record.name);
                    warn!(
                        template = %record.name,
                        changed = %changed.name,
                        error = %e,
                        "Dependent template no longer compiles"
                    );
                    if record.status == TemplateStatus::Active {
                        self.installer.remove_template(&record.name).await?;
                    }
                    record.transition(TemplateStatus::Error, Some(e.to_string()));
                }
            }
            self.store.save(&record).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use faultline_dsl::Scenario;
    use parking_lot::Mutex as SyncMutex;
    use std::collections::BTreeMap;

    #[derive(Default)]
    struct MapStore(SyncMutex<BTreeMap<String, TemplateRecord>>);

    #[async_trait]
    impl TemplateStore for MapStore {
        async fn save(&self, record: &TemplateRecord) -> Result<(), CoreError> {
            self.0.lock().insert(record.name.clone(), record.clone());
            Ok(())
        }
        async fn find_by_name(&self, name: &str) -> Result<Option<TemplateRecord>, CoreError> {
            Ok(self.0.lock().get(name).cloned())
        }
        async fn list(
            &self,
            status: Option<TemplateStatus>,
        ) -> Result<Vec<TemplateRecord>, CoreError> {
            Ok(self
                .0
                .lock()
                .values()
                .filter(|r| status.map(|s| r.status == s).unwrap_or(true))
                .cloned()
                .collect())
        }
        async fn delete(&self, name: &str) -> Result<(), CoreError> {
            self.0.lock().remove(name);
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingInstaller(SyncMutex<BTreeMap<String, usize>>);

    #[async_trait]
    impl ScenarioInstaller for RecordingInstaller {
        async fn install_template(
            &self,
            template: &str,
            scenarios: Vec<Arc<Scenario>>,
        ) -> Result<usize, CoreError> {
            self.0.lock().insert(template.to_string(), scenarios.len());
            Ok(0)
        }
        async fn remove_template(&self, template: &str) -> Result<usize, CoreError> {
            self.0.lock().remove(template);
            Ok(0)
        }
    }

    struct BrokenInstaller;

    #[async_trait]
    impl ScenarioInstaller for BrokenInstaller {
        async fn install_template(
            &self,
            _template: &str,
            scenarios: Vec<Arc<Scenario>>,
        ) -> Result<usize, CoreError> {
            Ok(scenarios.len())
        }
        async fn remove_template(&self, _template: &str) -> Result<usize, CoreError> {
            Err(CoreError::ReplicationFault("worker 1 gone".to_string()))
        }
    }

    const DEFINITIONS: &str = r#"
metadata:
  name: openstack-basics
  type: definition
definitions:
  entities:
    - entity: {template_id: alarm, category: ALARM, type: nagios}
    - entity: {template_id: host, category: RESOURCE, type: nova.host}
  relationships:
    - relationship: {template_id: alarm_on_host, source: alarm, target: host, relationship_type: on}
"#;

    const STANDARD: &str = r#"
metadata:
  name: host-down
includes:
  - name: openstack-basics
scenarios:
  - scenario:
      condition: alarm_on_host
      actions:
        - action:
            action_type: mark_down
            action_target: {target: host}
"#;

    fn loader() -> (TemplateLoader, Arc<MapStore>, Arc<RecordingInstaller>) {
        let store = Arc::new(MapStore::default());
        let installer = Arc::new(RecordingInstaller::default());
        (TemplateLoader::new(store.clone(), installer.clone()), store, installer)
    }

    #[tokio::test]
    async fn test_missing_include_is_error_then_recovers() {
        let (loader, _store, installer) = loader();
        let record = loader.add_template(STANDARD).await.unwrap();
        assert_eq!(record.status, TemplateStatus::Error);
        assert!(record.status_details.unwrap().contains("openstack-basics"));
        assert!(installer.0.lock().is_empty());

        // Loading the definitions recompiles the failed template
        let defs = loader.add_template(DEFINITIONS).await.unwrap();
        assert_eq!(defs.status, TemplateStatus::Active);
        assert_eq!(loader.get("host-down").await.unwrap().unwrap().status, TemplateStatus::Active);
        assert_eq!(installer.0.lock().get("host-down"), Some(&1));
    }

    #[tokio::test]
    async fn test_delete_definition_breaks_dependents() {
        let (loader, _store, installer) = loader();
        loader.add_template(DEFINITIONS).await.unwrap();
        loader.add_template(STANDARD).await.unwrap();

        let deleted = loader.delete_template("openstack-basics").await.unwrap();
        assert_eq!(deleted.status, TemplateStatus::Deleted);
        assert_eq!(loader.get("host-down").await.unwrap().unwrap().status, TemplateStatus::Error);
        assert!(installer.0.lock().is_empty());
    }

    #[tokio::test]
    async fn test_delete_standard_and_unknown() {
        let (loader, _store, installer) = loader();
        loader.add_template(DEFINITIONS).await.unwrap();
        loader.add_template(STANDARD).await.unwrap();
        loader.delete_template("host-down").await.unwrap();
        assert!(installer.0.lock().is_empty());

        let err = loader.delete_template("nope").await.unwrap_err();
        assert_eq!(err, CoreError::TemplateNotFound("nope".to_string()));
    }

    #[tokio::test]
    async fn test_load_active_orders_definitions_first() {
        let (loader, store, _) = loader();
        loader.add_template(DEFINITIONS).await.unwrap();
        loader.add_template(STANDARD).await.unwrap();

        let installer = Arc::new(RecordingInstaller::default());
        let fresh = TemplateLoader::new(store, installer.clone());
        assert_eq!(fresh.load_active().await.unwrap(), 2);
        assert_eq!(installer.0.lock().get("host-down"), Some(&1));
    }

    #[tokio::test]
    async fn test_failed_removal_leaves_template_in_error() {
        let store = Arc::new(MapStore::default());
        let loader = TemplateLoader::new(store.clone(), Arc::new(BrokenInstaller));
        loader.add_template(DEFINITIONS).await.unwrap();
        loader.add_template(STANDARD).await.unwrap();

        let err = loader.delete_template("host-down").await.unwrap_err();
        assert!(matches!(err, CoreError::ReplicationFault(_)));
        let record = loader.get("host-down").await.unwrap().unwrap();
        assert_eq!(record.status, TemplateStatus::Error);
        assert!(record.status_details.unwrap().contains("worker 1 gone"));
    }
}
