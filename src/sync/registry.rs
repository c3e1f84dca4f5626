//! Per-model component table
//!
//! Importers and exporters are registered once at startup, keyed by model.
//! Tests swap single components with [`Registry::register_importer`].

use super::exporter::{Exporter, ProjectExport, RecordExporter, TaskExport};
use super::importer::{
    Importer, IssueTypeImport, OrganizationImport, ProjectImport, RecordImporter, TaskImport,
    UserImport, WorklogImport,
};
use super::Model;
use crate::{Result, SyncError};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Default, Clone)]
pub struct Registry {
    importers: HashMap<Model, Arc<dyn RecordImporter>>,
    exporters: HashMap<Model, Arc<dyn RecordExporter>>,
}

impl Registry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Every built-in component
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry
            .register_importer(Arc::new(Importer::new(ProjectImport)))
            .register_importer(Arc::new(Importer::new(TaskImport)))
            .register_importer(Arc::new(Importer::new(IssueTypeImport)))
            .register_importer(Arc::new(Importer::new(UserImport)))
            .register_importer(Arc::new(Importer::new(WorklogImport)))
            .register_importer(Arc::new(Importer::new(OrganizationImport)))
            .register_exporter(Arc::new(Exporter::new(ProjectExport)))
            .register_exporter(Arc::new(Exporter::new(TaskExport)));
        registry
    }

    pub fn register_importer(&mut self, importer: Arc<dyn RecordImporter>) -> &mut Self {
        self.importers.insert(importer.model(), importer);
        self
    }

    pub fn register_exporter(&mut self, exporter: Arc<dyn RecordExporter>) -> &mut Self {
        self.exporters.insert(exporter.model(), exporter);
        self
    }

    pub fn importer(&self, model: Model) -> Result<Arc<dyn RecordImporter>> {
        self.importers
            .get(&model)
            .cloned()
            .ok_or_else(|| SyncError::Config(format!("No importer registered for {}", model)))
    }

    pub fn exporter(&self, model: Model) -> Result<Arc<dyn RecordExporter>> {
        self.exporters
            .get(&model)
            .cloned()
            .ok_or_else(|| SyncError::Config(format!("{} records cannot be exported", model)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_registry() {
        let registry = Registry::with_defaults();
        for model in Model::ALL {
            assert_eq!(registry.importer(model).unwrap().model(), model);
        }
        assert!(registry.exporter(Model::Task).is_ok());
        assert!(registry.exporter(Model::Project).is_ok());
        assert!(registry.exporter(Model::Worklog).is_err());
    }
}
