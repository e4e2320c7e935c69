use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::models::{Document, Kind};
use crate::store::StoreError;

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Top-level field equals the value.
    Eq(&'static str, Value),
    /// Top-level array field contains the value.
    Contains(&'static str, Value),
    /// Document was created strictly after the instant.
    CreatedAfter(DateTime<Utc>),
}

impl Filter {
    pub fn eq(path: &'static str, value: impl Into<Value>) -> Self {
        Filter::Eq(path, value.into())
    }

    pub fn contains(path: &'static str, value: impl Into<Value>) -> Self {
        Filter::Contains(path, value.into())
    }

    /// Evaluates the filter against a serialized document.
    pub fn matches(&self, data: &Value, created_at: DateTime<Utc>) -> bool {
        match self {
            Filter::Eq(path, expected) => {
                data.get(path).unwrap_or(&Value::Null) == expected
            }
            Filter::Contains(path, needle) => data
                .get(path)
                .and_then(Value::as_array)
                .is_some_and(|items| items.contains(needle)),
            Filter::CreatedAfter(instant) => created_at > *instant,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Order {
    #[default]
    OldestFirst,
    NewestFirst,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub kind: Kind,
    pub filters: Vec<Filter>,
    pub order: Order,
    pub limit: Option<u32>,
}

impl Query {
    pub fn new(kind: Kind) -> Self {
        Self {
            kind,
            filters: Vec::new(),
            order: Order::default(),
            limit: None,
        }
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn created_after(self, instant: DateTime<Utc>) -> Self {
        self.filter(Filter::CreatedAfter(instant))
    }

    pub fn order(mut self, order: Order) -> Self {
        self.order = order;
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, doc: &Document) -> Result<bool, StoreError> {
        if doc.kind() != self.kind {
            return Ok(false);
        }
        if self.filters.is_empty() {
            return Ok(true);
        }
        let data = doc.to_value()?;
        let created_at = doc.created_at();
        Ok(self.filters.iter().all(|f| f.matches(&data, created_at)))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldUpdate {
    Set(&'static str, Value),
    ArrayUnion(&'static str, Value),
    ArrayRemove(&'static str, Value),
}

impl FieldUpdate {
    pub fn set(path: &'static str, value: impl Into<Value>) -> Self {
        FieldUpdate::Set(path, value.into())
    }

    pub fn set_time(path: &'static str, instant: DateTime<Utc>) -> Self {
        FieldUpdate::Set(
            path,
            Value::String(instant.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
        )
    }

    pub fn array_union(path: &'static str, value: impl Into<Value>) -> Self {
        FieldUpdate::ArrayUnion(path, value.into())
    }

    pub fn array_remove(path: &'static str, value: impl Into<Value>) -> Self {
        FieldUpdate::ArrayRemove(path, value.into())
    }

    pub fn apply(&self, data: &mut Value) -> Result<(), StoreError> {
        let object = data
            .as_object_mut()
            .ok_or_else(|| StoreError::Backend("document is not an object".into()))?;

        match self {
            FieldUpdate::Set(path, value) => {
                object.insert((*path).to_string(), value.clone());
            }
            FieldUpdate::ArrayUnion(path, value) => {
                let items = array_field(object, path)?;
                if !items.contains(value) {
                    items.push(value.clone());
                }
            }
            FieldUpdate::ArrayRemove(path, value) => {
                let items = array_field(object, path)?;
                items.retain(|item| item != value);
            }
        }
        Ok(())
    }
}

fn array_field<'a>(
    object: &'a mut serde_json::Map<String, Value>,
    path: &str,
) -> Result<&'a mut Vec<Value>, StoreError> {
    object
        .entry(path.to_string())
        .or_insert_with(|| Value::Array(Vec::new()))
        .as_array_mut()
        .ok_or_else(|| StoreError::Backend(format!("field {path} is not an array")))
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    Create(Document),
    Update {
        kind: Kind,
        id: Uuid,
        updates: Vec<FieldUpdate>,
    },
}

/// An all-or-nothing group of writes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    pub operations: Vec<Operation>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(mut self, doc: Document) -> Self {
        self.operations.push(Operation::Create(doc));
        self
    }

    pub fn update(mut self, kind: Kind, id: Uuid, updates: Vec<FieldUpdate>) -> Self {
        self.operations.push(Operation::Update { kind, id, updates });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}
