// Runtime module registry
//
// Runtime truth about what modules exist, what they expose, and whether they
// are active and healthy. Derived from server wiring, not from config files.

use std::collections::BTreeMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleDefinition {
    pub module_id: String,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route_prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleStatus {
    pub module_id: String,
    pub enabled: bool,
    pub available: bool,
    pub initialized: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// In-memory module registry (runtime truth).
pub struct ModuleRegistry {
    definitions: RwLock<BTreeMap<String, ModuleDefinition>>,
    statuses: RwLock<BTreeMap<String, ModuleStatus>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self {
            definitions: RwLock::new(BTreeMap::new()),
            statuses: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn register(&self, definition: ModuleDefinition) {
        self.definitions
            .write()
            .insert(definition.module_id.clone(), definition);
    }

    pub fn set_status(&self, status: ModuleStatus) {
        self.statuses.write().insert(status.module_id.clone(), status);
    }

    /// Deterministic, JSON-ready view ordered by module_id.
    pub fn snapshot(&self) -> Value {
        let definitions = self.definitions.read();
        let statuses = self.statuses.read();

        let module_ids: std::collections::BTreeSet<&String> =
            definitions.keys().chain(statuses.keys()).collect();

        let modules: Vec<Value> = module_ids
            .into_iter()
            .map(|module_id| {
                json!({
                    "module_id": module_id,
                    "definition": definitions.get(module_id),
                    "status": statuses.get(module_id),
                })
            })
            .collect();

        json!({
            "count": modules.len(),
            "modules": modules,
        })
    }
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}
