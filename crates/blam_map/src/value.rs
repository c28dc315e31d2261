//! Decoded records

use indexmap::IndexMap;

#[cfg(feature = "serde")]
use serde::Serialize;

use crate::error::ValueError;
use crate::layout::TagLayout;
use crate::path::PropertyPath;
use crate::store::TagRef;
use crate::types::TagId;

/// A decoded field
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize), serde(untagged))]
pub enum Value {
    U8(u8),
    I8(i8),
    U16(u16),
    I16(i16),
    U32(u32),
    I32(i32),
    U64(u64),
    I64(i64),
    F32(f32),
    F64(f64),
    String(String),
    TagRef(TagId),
    Array(Vec<Value>),
    Record(Record),
}

impl Value {
    /// Integer value of any integer variant
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Value::U8(v) => Some(v.into()),
            Value::I8(v) => Some(v.into()),
            Value::U16(v) => Some(v.into()),
            Value::I16(v) => Some(v.into()),
            Value::U32(v) => Some(v.into()),
            Value::I32(v) => Some(v.into()),
            Value::U64(v) => i64::try_from(v).ok(),
            Value::I64(v) => Some(v),
            _ => None,
        }
    }

    /// Numeric value of any integer or float variant
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Value::F32(v) => Some(v.into()),
            Value::F64(v) => Some(v),
            _ => self.as_i64().map(|v| v as f64),
        }
    }

    pub fn as_record(&self) -> Option<&Record> {
        match self {
            Value::Record(record) => Some(record),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(values) => Some(values),
            _ => None,
        }
    }
}

/// Conversion from a decoded leaf value
pub trait FromValue: Sized {
    /// What the value was expected to be, used in errors
    const EXPECTED: &'static str;

    fn from_value(value: &Value) -> Option<Self>;
}

macro_rules! impl_from_value {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl FromValue for $ty {
                const EXPECTED: &'static str = stringify!($ty);

                fn from_value(value: &Value) -> Option<Self> {
                    match value {
                        Value::$variant(v) => Some(*v),
                        _ => None,
                    }
                }
            }
        )*
    };
}

impl_from_value! {
    u8 => U8,
    i8 => I8,
    u16 => U16,
    i16 => I16,
    u32 => U32,
    i32 => I32,
    u64 => U64,
    i64 => I64,
    f32 => F32,
    f64 => F64,
    TagId => TagRef,
}

impl FromValue for String {
    const EXPECTED: &'static str = "a string";

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(s.clone()),
            _ => None,
        }
    }
}

impl FromValue for Value {
    const EXPECTED: &'static str = "a value";

    fn from_value(value: &Value) -> Option<Self> {
        Some(value.clone())
    }
}

/// A decoded record, its fields in layout order
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize), serde(transparent))]
pub struct Record {
    #[cfg_attr(feature = "serde", serde(skip))]
    type_name: String,
    fields: IndexMap<String, Value>,
}

impl Record {
    pub fn new(type_name: impl Into<String>, fields: IndexMap<String, Value>) -> Self {
        Self {
            type_name: type_name.into(),
            fields,
        }
    }

    /// Name of the layout this record was decoded with
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn value(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Typed value of a scalar, string or tag reference field
    pub fn get<T: FromValue>(&self, field: &str) -> Result<T, ValueError> {
        T::from_value(self.require(field)?).ok_or_else(|| self.mismatch(field, T::EXPECTED))
    }

    /// Typed values of a primitive array field
    pub fn array<T: FromValue>(&self, field: &str) -> Result<Vec<T>, ValueError> {
        self.require(field)?
            .as_array()
            .and_then(|values| values.iter().map(T::from_value).collect())
            .ok_or_else(|| self.mismatch(field, "an array"))
    }

    /// A nested record field converted to `T`
    pub fn record<T: TagLayout>(&self, field: &str) -> Result<T, ValueError> {
        let record = self
            .require(field)?
            .as_record()
            .ok_or_else(|| self.mismatch(field, "a record"))?;
        T::from_record(record)
    }

    /// A reference array field converted to a list of `T`
    pub fn records<T: TagLayout>(&self, field: &str) -> Result<Vec<T>, ValueError> {
        self.require(field)?
            .as_array()
            .ok_or_else(|| self.mismatch(field, "a reference array"))?
            .iter()
            .map(|value| {
                value
                    .as_record()
                    .ok_or_else(|| self.mismatch(field, "a reference array"))
                    .and_then(T::from_record)
            })
            .collect()
    }

    /// A tag reference field as a typed [`TagRef`]
    pub fn tag_ref<T>(&self, field: &str) -> Result<TagRef<T>, ValueError> {
        self.get::<TagId>(field).map(TagRef::new)
    }

    /// Follow a property path through the decoded graph
    pub fn lookup(&self, path: &PropertyPath) -> Option<&Value> {
        let mut record = self;
        let mut current = None;
        for step in path.steps() {
            if let Some(value) = current {
                record = Value::as_record(value)?;
            }
            let mut value = record.value(&step.field)?;
            for &index in &step.indices {
                value = value.as_array()?.get(index)?;
            }
            current = Some(value);
        }
        current
    }

    /// Every tag reference in this record and below, with the path leading to it
    pub fn tag_refs(&self) -> Vec<(String, TagId)> {
        let mut refs = Vec::new();
        self.collect_refs("", &mut refs);
        refs
    }

    fn collect_refs(&self, prefix: &str, refs: &mut Vec<(String, TagId)>) {
        for (name, value) in &self.fields {
            let path = if prefix.is_empty() {
                name.clone()
            } else {
                format!("{prefix}.{name}")
            };
            collect_value_refs(value, &path, refs);
        }
    }

    fn require(&self, field: &str) -> Result<&Value, ValueError> {
        self.fields.get(field).ok_or_else(|| ValueError::MissingField {
            ty: self.type_name.clone(),
            field: field.to_owned(),
        })
    }

    fn mismatch(&self, field: &str, expected: &'static str) -> ValueError {
        ValueError::TypeMismatch {
            ty: self.type_name.clone(),
            field: field.to_owned(),
            expected,
        }
    }
}

fn collect_value_refs(value: &Value, path: &str, refs: &mut Vec<(String, TagId)>) {
    match value {
        Value::TagRef(id) => refs.push((path.to_owned(), *id)),
        Value::Record(record) => record.collect_refs(path, refs),
        Value::Array(values) => {
            for (i, value) in values.iter().enumerate() {
                collect_value_refs(value, &format!("{path}[{i}]"), refs);
            }
        }
        _ => {}
    }
}
