use crate::core::value::{Params, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One row produced by the read step. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkItem {
    fields: BTreeMap<String, Value>,
}

impl WorkItem {
    pub fn new(fields: BTreeMap<String, Value>) -> Self {
        WorkItem { fields }
    }

    pub fn from_pairs<I, K>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        WorkItem {
            fields: pairs.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn get_value(&self, field: &str) -> Value {
        self.get(field).cloned().unwrap_or(Value::Null)
    }

    /// Value of the alphabetically first field. Fields are kept sorted by
    /// name, so this is only meaningful for single-column results.
    pub fn first_value(&self) -> Option<&Value> {
        self.fields.values().next()
    }

    pub fn fields(&self) -> &BTreeMap<String, Value> {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn to_value(&self) -> Value {
        Value::Object(
            self.fields
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }

    pub fn to_params(&self) -> Params {
        self.fields.clone()
    }
}

impl From<BTreeMap<String, Value>> for WorkItem {
    fn from(fields: BTreeMap<String, Value>) -> Self {
        WorkItem::new(fields)
    }
}
