//! Explicit `(service, data type)` → adapter mapping, built at startup.

use std::collections::HashMap;
use std::sync::Arc;

use portage_core::{Exporter, Importer};

type Key = (String, String);

fn key(service: &str, data_type: &str) -> Key {
    (service.to_ascii_lowercase(), data_type.to_ascii_lowercase())
}

/// Adapter lookup by capability. Service and data type names are matched
/// case-insensitively.
#[derive(Default)]
pub struct AdapterRegistry {
    exporters: HashMap<Key, Arc<dyn Exporter>>,
    importers: HashMap<Key, Arc<dyn Importer>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an exporter, replacing any previous one for the same key.
    pub fn register_exporter(
        &mut self,
        service: &str,
        data_type: &str,
        exporter: Arc<dyn Exporter>,
    ) -> &mut Self {
        self.exporters.insert(key(service, data_type), exporter);
        self
    }

    pub fn register_importer(
        &mut self,
        service: &str,
        data_type: &str,
        importer: Arc<dyn Importer>,
    ) -> &mut Self {
        self.importers.insert(key(service, data_type), importer);
        self
    }

    pub fn exporter(&self, service: &str, data_type: &str) -> Option<Arc<dyn Exporter>> {
        self.exporters.get(&key(service, data_type)).cloned()
    }

    pub fn importer(&self, service: &str, data_type: &str) -> Option<Arc<dyn Importer>> {
        self.importers.get(&key(service, data_type)).cloned()
    }

    pub fn supports_export(&self, service: &str, data_type: &str) -> bool {
        self.exporters.contains_key(&key(service, data_type))
    }

    pub fn supports_import(&self, service: &str, data_type: &str) -> bool {
        self.importers.contains_key(&key(service, data_type))
    }

    /// Both sides of a transfer are available.
    pub fn supports_transfer(&self, export_service: &str, import_service: &str, data_type: &str) -> bool {
        self.supports_export(export_service, data_type) && self.supports_import(import_service, data_type)
    }

    /// Data types with an exporter registered for `service`.
    pub fn exportable_types(&self, service: &str) -> Vec<String> {
        let service = service.to_ascii_lowercase();
        let mut types: Vec<_> = self
            .exporters
            .keys()
            .filter(|(s, _)| *s == service)
            .map(|(_, t)| t.clone())
            .collect();
        types.sort();
        types
    }
}

impl core::fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let mut exporters: Vec<_> = self.exporters.keys().collect();
        let mut importers: Vec<_> = self.importers.keys().collect();
        exporters.sort();
        importers.sort();
        f.debug_struct("AdapterRegistry")
            .field("exporters", &exporters)
            .field("importers", &importers)
            .finish()
    }
}
