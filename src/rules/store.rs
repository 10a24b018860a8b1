//! Rule lookup for the orchestrator.

use std::collections::BTreeMap;
use std::path::Path;

use parking_lot::RwLock;
use tracing::info;

use crate::models::{ConditionDefinition, RuleDefinition};
use crate::{Result, SignalGenError};

/// Id of the built-in system rule.
pub const DEFAULT_RULE_ID: i64 = 1;

/// Source of stored rule definitions.
pub trait RulesStore: Send + Sync {
    fn get_rule(&self, id: i64) -> Option<RuleDefinition>;
}

/// In-memory rules keyed by id, optionally loaded from a JSON file holding an
/// array of rule definitions.
#[derive(Debug, Default)]
pub struct MemoryRulesStore {
    rules: RwLock<BTreeMap<i64, RuleDefinition>>,
}

impl MemoryRulesStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store holding only the built-in "Default Scalping" rule.
    pub fn with_default_rule() -> Self {
        let store = Self::new();
        store.insert(default_rule());
        store
    }

    /// Loads an array of rule definitions from `path`. The built-in rule is
    /// added when the file does not define id 1.
    ///
    /// # Errors
    ///
    /// Returns [`SignalGenError::Config`] if the file cannot be read, and
    /// [`SignalGenError::Json`] if it is not an array of rules.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            SignalGenError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        let definitions: Vec<RuleDefinition> = serde_json::from_str(&contents)?;

        let store = Self::new();
        for definition in definitions {
            if definition.id.is_none() {
                return Err(SignalGenError::Config(format!(
                    "{}: rule '{}' has no id",
                    path.display(),
                    definition.name.as_deref().unwrap_or("<unnamed>")
                )));
            }
            store.insert(definition);
        }
        if store.get_rule(DEFAULT_RULE_ID).is_none() {
            store.insert(default_rule());
        }
        info!(path = %path.display(), rules = store.len(), "Loaded rules");
        Ok(store)
    }

    /// Adds or replaces a rule. Definitions without an id are ignored.
    pub fn insert(&self, definition: RuleDefinition) {
        if let Some(id) = definition.id {
            self.rules.write().insert(id, definition);
        }
    }

    pub fn len(&self) -> usize {
        self.rules.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.read().is_empty()
    }
}

impl RulesStore for MemoryRulesStore {
    fn get_rule(&self, id: i64) -> Option<RuleDefinition> {
        self.rules.read().get(&id).cloned()
    }
}

/// The read-only scalping rule every installation starts with: an EMA6/EMA10
/// cross near EMA20 with rising RSI, ADX, volume and MACD histogram.
pub fn default_rule() -> RuleDefinition {
    let conditions = vec![
        ConditionDefinition::new("EMA6", "CROSS_UP", "EMA10"),
        ConditionDefinition::new("PRICE", ">=", "EMA20"),
        ConditionDefinition::new("PRICE_EMA20_DIFF_PCT", "<=", 0.002),
        ConditionDefinition::new("RSI14", ">", "RSI14_PREV"),
        ConditionDefinition::new("RSI14", ">", 38),
        ConditionDefinition::new("RSI14", "<", 55),
        ConditionDefinition::new("ADX5", ">=", 15),
        ConditionDefinition::new("ADX5", ">", "ADX5_PREV"),
        ConditionDefinition::new("REL_VOLUME_20", ">=", 1.3),
        ConditionDefinition::new("MACD_HIST", ">=", "MACD_HIST_PREV"),
    ];
    RuleDefinition {
        id: Some(DEFAULT_RULE_ID),
        name: Some("Default Scalping".to_string()),
        kind: Some("system".to_string()),
        logic: Some("AND".to_string()),
        conditions: Some(conditions),
        cooldown_sec: Some(60),
        is_system: true,
    }
}
