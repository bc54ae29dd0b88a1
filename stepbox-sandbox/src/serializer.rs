//! Snapshot serialization.
//!
//! Values are captured inside the isolate as a tagged tree ([`RawValue`]),
//! classified into the closed [`Value`] type, and rendered to bounded JSON by
//! [`serialize`]. [`SnapshotBuilder`] derives the variable, call-stack and
//! heap views of one snapshot.

use crate::config::SnapshotOptions;
use serde::Deserialize;
use serde_json::{Map, Number, Value as Json};
use std::collections::HashMap;
use stepbox_common::{Frame, HeapObject, PropertyView, Snapshot, ValueKind, VariableView};

/// Wire form of a value captured in the isolate
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "t", rename_all = "lowercase")]
pub enum RawValue {
    Undefined,
    Null,
    Bool {
        v: bool,
    },
    Number {
        v: f64,
    },
    Nonfinite {
        v: String,
    },
    String {
        v: String,
    },
    Bigint {
        v: String,
    },
    Symbol {
        v: String,
    },
    Function {
        name: String,
    },
    Date {
        #[serde(default)]
        id: u64,
        v: String,
    },
    /// A field that could not be read or captured
    Opaque {
        v: String,
    },
    Array {
        id: u64,
        #[serde(rename = "class")]
        class_name: String,
        len: usize,
        items: Vec<RawValue>,
    },
    Object {
        id: u64,
        #[serde(rename = "class")]
        class_name: String,
        total: usize,
        /// Enumeration stopped early; `total` counts only what was seen
        #[serde(default)]
        more: bool,
        entries: Vec<(String, RawValue)>,
    },
    /// Capture depth ran out at this object
    Truncated {
        id: u64,
        #[serde(rename = "class")]
        class_name: String,
        array: bool,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Primitive(Primitive),
    Reference(Reference),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Primitive {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    /// `NaN`, `Infinity`, `-Infinity`
    NonFinite(String),
    String(String),
    BigInt(String),
    Symbol(String),
    Function(String),
    /// Placeholder left by a capture failure
    Unserializable(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reference {
    pub id: u64,
    pub class_name: String,
    pub contents: Contents,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Contents {
    /// Not captured: the depth bound was reached inside the isolate
    Elided { array: bool },
    Array { len: usize, items: Vec<Value> },
    Object {
        total: usize,
        more: bool,
        entries: Vec<(String, Value)>,
    },
    /// Objects rendered as a single string (dates)
    Scalar(String),
}

impl From<RawValue> for Value {
    fn from(raw: RawValue) -> Self {
        classify(raw)
    }
}

/// Turn a captured tree into a [`Value`]
pub fn classify(raw: RawValue) -> Value {
    let primitive = Value::Primitive;
    match raw {
        RawValue::Undefined => primitive(Primitive::Undefined),
        RawValue::Null => primitive(Primitive::Null),
        RawValue::Bool { v } => primitive(Primitive::Bool(v)),
        RawValue::Number { v } => primitive(Primitive::Number(v)),
        RawValue::Nonfinite { v } => primitive(Primitive::NonFinite(v)),
        RawValue::String { v } => primitive(Primitive::String(v)),
        RawValue::Bigint { v } => primitive(Primitive::BigInt(v)),
        RawValue::Symbol { v } => primitive(Primitive::Symbol(v)),
        RawValue::Function { name } => primitive(Primitive::Function(name)),
        RawValue::Opaque { v } => primitive(Primitive::Unserializable(v)),
        RawValue::Date { id, v } => Value::Reference(Reference {
            id,
            class_name: "Date".to_string(),
            contents: Contents::Scalar(v),
        }),
        RawValue::Array {
            id,
            class_name,
            len,
            items,
        } => Value::Reference(Reference {
            id,
            class_name,
            contents: Contents::Array {
                len,
                items: items.into_iter().map(classify).collect(),
            },
        }),
        RawValue::Object {
            id,
            class_name,
            total,
            more,
            entries,
        } => Value::Reference(Reference {
            id,
            class_name,
            contents: Contents::Object {
                total,
                more,
                entries: entries
                    .into_iter()
                    .map(|(key, value)| (key, classify(value)))
                    .collect(),
            },
        }),
        RawValue::Truncated {
            id,
            class_name,
            array,
        } => Value::Reference(Reference {
            id,
            class_name,
            contents: Contents::Elided { array },
        }),
    }
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Self::Primitive(_) => ValueKind::Primitive,
            Self::Reference(_) => ValueKind::Reference,
        }
    }
}

impl Reference {
    fn is_array_like(&self) -> bool {
        match &self.contents {
            Contents::Elided { array } => *array,
            Contents::Array { .. } => true,
            Contents::Object { .. } | Contents::Scalar(_) => false,
        }
    }

    fn placeholder(&self) -> Json {
        let tag = if self.is_array_like() {
            "[Array]"
        } else {
            "[Object]"
        };
        Json::String(tag.to_string())
    }

    /// Own properties in display order for the heap view, at most `limit`
    fn properties(&self, limit: usize, depth: usize) -> Vec<PropertyView> {
        let view = |name: String, value: &Value| PropertyView {
            name,
            serialized_value: serialize(value, depth),
        };
        match &self.contents {
            Contents::Array { items, .. } => items
                .iter()
                .take(limit)
                .enumerate()
                .map(|(index, item)| view(index.to_string(), item))
                .collect(),
            Contents::Object { entries, .. } => entries
                .iter()
                .take(limit)
                .map(|(key, value)| view(key.clone(), value))
                .collect(),
            Contents::Scalar(text) if limit > 0 => vec![PropertyView {
                name: "value".to_string(),
                serialized_value: Json::String(text.clone()),
            }],
            Contents::Elided { .. } | Contents::Scalar(_) => Vec::new(),
        }
    }
}

impl Primitive {
    fn to_json(&self) -> Json {
        match self {
            Self::Undefined => Json::String("undefined".to_string()),
            Self::Null => Json::Null,
            Self::Bool(b) => Json::Bool(*b),
            Self::Number(n) => number_to_json(*n),
            Self::NonFinite(text) | Self::String(text) | Self::Symbol(text) => {
                Json::String(text.clone())
            }
            Self::BigInt(digits) => Json::String(format!("{digits}n")),
            Self::Function(name) => Json::String(format!("[Function: {name}]")),
            Self::Unserializable(text) => Json::String(text.clone()),
        }
    }
}

fn number_to_json(n: f64) -> Json {
    // integral values keep their integer form so `3` does not become `3.0`
    if n.fract() == 0.0 && n.abs() < 9.007_199_254_740_992e15 {
        return Json::Number(Number::from(n as i64));
    }
    Number::from_f64(n).map_or(Json::Null, Json::Number)
}

/// Render a value as JSON, descending at most `remaining_depth` levels.
/// Collections at depth 0 collapse to `"[Array]"` / `"[Object]"`.
pub fn serialize(value: &Value, remaining_depth: usize) -> Json {
    let reference = match value {
        Value::Primitive(primitive) => return primitive.to_json(),
        Value::Reference(reference) => reference,
    };
    if let Contents::Scalar(text) = &reference.contents {
        return Json::String(text.clone());
    }
    if remaining_depth == 0 {
        return reference.placeholder();
    }
    match &reference.contents {
        Contents::Array { len, items } => {
            let mut out: Vec<Json> = items
                .iter()
                .map(|item| serialize(item, remaining_depth - 1))
                .collect();
            if *len > items.len() {
                out.push(Json::String(format!("... {} more", len - items.len())));
            }
            Json::Array(out)
        }
        Contents::Object {
            total,
            more,
            entries,
        } => {
            let mut out = Map::new();
            for (key, item) in entries {
                out.insert(key.clone(), serialize(item, remaining_depth - 1));
            }
            if *total > entries.len() {
                out.insert(
                    "...".to_string(),
                    Json::String(format!("{} more", total - entries.len())),
                );
            } else if *more {
                out.insert("...".to_string(), Json::String("more".to_string()));
            }
            Json::Object(out)
        }
        Contents::Elided { .. } | Contents::Scalar(_) => reference.placeholder(),
    }
}

/// Builds [`Snapshot`]s for one run, remembering the previous serialized
/// value of every variable so changes can be flagged.
#[derive(Debug)]
pub struct SnapshotBuilder {
    options: SnapshotOptions,
    entry_point: String,
    previous: HashMap<String, Json>,
}

impl SnapshotBuilder {
    pub fn new(entry_point: impl Into<String>, options: SnapshotOptions) -> Self {
        Self {
            options,
            entry_point: entry_point.into(),
            previous: HashMap::new(),
        }
    }

    /// Build the snapshot for `line` from captured `(name, value)` pairs
    pub fn build(&mut self, line: u32, in_entry: bool, captured: Vec<(String, RawValue)>) -> Snapshot {
        let values: Vec<(String, Value)> = captured
            .into_iter()
            .map(|(name, raw)| (name, classify(raw)))
            .collect();

        let variables: Vec<VariableView> = values
            .iter()
            .map(|(name, value)| {
                let serialized_value = serialize(value, self.options.depth);
                let changed = self.previous.get(name) != Some(&serialized_value);
                self.previous.insert(name.clone(), serialized_value.clone());
                VariableView {
                    name: name.clone(),
                    serialized_value,
                    kind: value.kind(),
                    changed,
                }
            })
            .collect();

        let mut heap_objects: Vec<HeapObject> = Vec::new();
        for (_, value) in &values {
            let Value::Reference(reference) = value else {
                continue;
            };
            let id = format!("obj{}", reference.id);
            if reference.id == 0 || heap_objects.iter().any(|object| object.id == id) {
                continue;
            }
            let properties =
                reference.properties(self.options.heap_properties, self.options.depth);
            heap_objects.push(HeapObject {
                id,
                class_name: reference.class_name.clone(),
                properties,
            });
        }

        let frame_name = if in_entry {
            self.entry_point.clone()
        } else {
            "global".to_string()
        };

        Snapshot {
            line,
            call_stack: vec![Frame {
                name: frame_name,
                variables: variables.clone(),
            }],
            variables,
            heap_objects,
        }
    }
}
