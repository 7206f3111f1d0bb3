//! Transaction data as seen by operators.

use std::collections::HashMap;

use crate::phase::Phase;
use crate::value::Value;

/// Read access to the transaction a graph is being evaluated for.
pub trait Transaction {
    fn id(&self) -> &str;

    /// Phase the transaction is currently in.
    fn phase(&self) -> Phase;

    /// Current value of a named data field, if the field exists yet.
    fn field(&self, name: &str) -> Option<Value>;
}

/// In-memory transaction whose fields grow as phases advance.
#[derive(Debug, Clone, Default)]
pub struct TransactionData {
    id: String,
    phase: Phase,
    fields: HashMap<String, Value>,
}

impl TransactionData {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    pub fn set_phase(&mut self, phase: Phase) {
        self.phase = phase;
    }

    /// Replaces a field.
    pub fn set_field(&mut self, name: impl Into<String>, value: Value) {
        self.fields.insert(name.into(), value);
    }

    /// Appends an item to a list field, creating the field if needed. A
    /// scalar field becomes a list holding the old value first.
    pub fn append_field(&mut self, name: impl Into<String>, item: Value) {
        let entry = self.fields.entry(name.into()).or_insert_with(Value::empty_list);
        if !entry.is_list() {
            let previous = std::mem::take(entry);
            *entry = Value::list(previous.items().to_vec());
        }
        entry.push(item);
    }
}

impl Transaction for TransactionData {
    fn id(&self) -> &str {
        &self.id
    }

    fn phase(&self) -> Phase {
        self.phase
    }

    fn field(&self, name: &str) -> Option<Value> {
        self.fields.get(name).cloned()
    }
}
