//! Compiles record layouts into cached decode plans.
//!
//! A [`Schema`] owns every registered [`RecordLayout`] and the type code bindings of root tags. The first
//! request for a type compiles its [`DecodePlan`], recursively compiling the plans of nested and element
//! types, and caches it for the lifetime of the schema. Later requests, including concurrent ones from
//! other threads, share the cached plan.

#[cfg(feature = "serde")]
use std::collections::BTreeMap;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, trace, warn};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::SchemaError;
use crate::layout::{FieldKind, Primitive, RecordLayout, RecordLength, TagLayout};
use crate::offset::PointerBasis;
use crate::types::TypeCode;

/// Byte length of a reference array header, `(count: i32, pointer: i32)`
pub const REFERENCE_ARRAY_HEADER: usize = 8;

/// Byte length of a tag reference
pub const TAG_REF_SIZE: usize = 4;

/// Furthest byte a field may reach, maps are addressed with `i32`
pub const MAX_FIELD_END: usize = i32::MAX as usize;

/// Length of a compiled record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanLength {
    Fixed(usize),
    /// Supplied by the caller when decoding, only for root tags
    Arbitrary,
}

/// What to do for one field
#[derive(Debug, Clone, PartialEq)]
pub enum FieldOp {
    Primitive(Primitive),
    PrimitiveArray {
        element: Primitive,
        count: usize,
    },
    String {
        max_length: usize,
    },
    TagRef,
    Record(Arc<DecodePlan>),
    ReferenceArray {
        element: Arc<DecodePlan>,
        basis: PointerBasis,
    },
}

impl FieldOp {
    /// Number of bytes the field occupies inside its record
    pub fn size(&self) -> usize {
        match self {
            FieldOp::Primitive(p) => p.size(),
            FieldOp::PrimitiveArray { element, count } => element.size().saturating_mul(*count),
            FieldOp::String { max_length } => *max_length,
            FieldOp::TagRef => TAG_REF_SIZE,
            FieldOp::Record(plan) => plan.fixed_length().unwrap_or_default(),
            FieldOp::ReferenceArray { .. } => REFERENCE_ARRAY_HEADER,
        }
    }

    /// Human readable description, used in diagnostics
    pub fn describe(&self) -> String {
        match self {
            FieldOp::Primitive(p) => p.name().to_owned(),
            FieldOp::PrimitiveArray { element, count } => format!("[{}; {count}]", element.name()),
            FieldOp::String { max_length } => format!("string({max_length})"),
            FieldOp::TagRef => "tag reference".to_owned(),
            FieldOp::Record(plan) => format!("record `{}`", plan.name),
            FieldOp::ReferenceArray { element, .. } => {
                format!("reference array of `{}`", element.name)
            }
        }
    }
}

/// A field of a compiled plan
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedField {
    pub name: String,
    pub offset: usize,
    pub op: FieldOp,
}

/// Compiled form of a [`RecordLayout`]
#[derive(Debug, Clone, PartialEq)]
pub struct DecodePlan {
    pub name: String,
    pub length: PlanLength,
    /// Fields ordered by offset
    pub fields: Vec<PlannedField>,
}

impl DecodePlan {
    pub fn fixed_length(&self) -> Option<usize> {
        match self.length {
            PlanLength::Fixed(length) => Some(length),
            PlanLength::Arbitrary => None,
        }
    }

    pub fn field(&self, name: &str) -> Option<&PlannedField> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// Collects layouts and bindings before a [`Schema`] is built
#[derive(Debug, Default, Clone)]
pub struct SchemaBuilder {
    layouts: HashMap<String, RecordLayout>,
    bindings: HashMap<TypeCode, String>,
}

impl SchemaBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a layout, replacing any previous layout of the same name
    pub fn layout(&mut self, layout: RecordLayout) -> &mut Self {
        if let Some(previous) = self.layouts.insert(layout.name.clone(), layout) {
            warn!("replaced layout for `{}`", previous.name);
        }
        self
    }

    /// Register the layout of `T` and of everything it embeds
    pub fn register<T: TagLayout>(&mut self) -> &mut Self {
        if !self.layouts.contains_key(T::NAME) {
            self.layouts.insert(T::NAME.to_owned(), T::layout());
            T::register_dependencies(self);
        }
        self
    }

    /// Decode tags of class `code` with the layout named `ty`
    pub fn bind(&mut self, code: TypeCode, ty: impl Into<String>) -> &mut Self {
        self.bindings.insert(code, ty.into());
        self
    }

    /// Register `T` and decode tags of class `code` with it
    pub fn bind_tag<T: TagLayout>(&mut self, code: TypeCode) -> &mut Self {
        self.register::<T>().bind(code, T::NAME)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.layouts.contains_key(name)
    }

    pub fn build(&mut self) -> Schema {
        Schema {
            layouts: std::mem::take(&mut self.layouts),
            bindings: std::mem::take(&mut self.bindings),
            plans: DashMap::new(),
        }
    }
}

/// Serialized schema, as loaded from a schema file
#[cfg(feature = "serde")]
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaDefinition {
    pub types: Vec<RecordLayout>,

    /// Type code to layout name
    #[serde(default)]
    pub bindings: BTreeMap<TypeCode, String>,
}

#[cfg(feature = "serde")]
impl SchemaDefinition {
    pub fn into_builder(self) -> SchemaBuilder {
        let mut builder = SchemaBuilder::new();
        for layout in self.types {
            builder.layout(layout);
        }
        for (code, ty) in self.bindings {
            builder.bind(code, ty);
        }
        builder
    }
}

/// Registered layouts plus the cache of their compiled plans
#[derive(Debug)]
pub struct Schema {
    layouts: HashMap<String, RecordLayout>,
    bindings: HashMap<TypeCode, String>,
    plans: DashMap<String, Arc<DecodePlan>>,
}

impl Schema {
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::new()
    }

    /// Compiled plan of the type registered as `name`
    pub fn plan(&self, name: &str) -> Result<Arc<DecodePlan>, SchemaError> {
        self.compile(name, &mut Vec::new())
    }

    /// Compiled plan of `T`
    pub fn plan_of<T: TagLayout>(&self) -> Result<Arc<DecodePlan>, SchemaError> {
        self.plan(T::NAME)
    }

    /// Compiled plan of the root layout bound to `code`
    pub fn plan_for(&self, code: TypeCode) -> Result<Arc<DecodePlan>, SchemaError> {
        let name = self
            .bindings
            .get(&code)
            .ok_or(SchemaError::UnboundTypeCode(code))?;
        self.plan(name)
    }

    pub fn is_bound(&self, code: TypeCode) -> bool {
        self.bindings.contains_key(&code)
    }

    pub fn layout(&self, name: &str) -> Option<&RecordLayout> {
        self.layouts.get(name)
    }

    /// Compile every registered layout and check every binding.
    ///
    /// Any error here means the schema does not match the code using it and a load should be aborted.
    pub fn validate(&self) -> Result<(), SchemaError> {
        let mut names = self.layouts.keys().collect::<Vec<_>>();
        names.sort();
        for name in names {
            self.plan(name)?;
        }
        for code in self.bindings.keys() {
            self.plan_for(*code)?;
        }
        Ok(())
    }

    fn compile(
        &self,
        name: &str,
        in_progress: &mut Vec<String>,
    ) -> Result<Arc<DecodePlan>, SchemaError> {
        if let Some(plan) = self.plans.get(name) {
            trace!("plan cache hit for `{name}`");
            return Ok(plan.value().clone());
        }

        if in_progress.iter().any(|n| n == name) {
            return Err(SchemaError::Recursive(name.to_owned()));
        }

        let layout = self
            .layouts
            .get(name)
            .ok_or_else(|| SchemaError::UnknownType(name.to_owned()))?;

        in_progress.push(name.to_owned());
        let plan = self.compile_layout(layout, in_progress);
        in_progress.pop();
        let plan = plan?;

        debug!(
            "compiled plan for `{name}` ({} fields, {:?})",
            plan.fields.len(),
            plan.length
        );

        // Another thread may have finished first, everyone keeps the plan that made it into the cache
        Ok(self
            .plans
            .entry(name.to_owned())
            .or_insert_with(|| Arc::new(plan))
            .value()
            .clone())
    }

    fn compile_layout(
        &self,
        layout: &RecordLayout,
        in_progress: &mut Vec<String>,
    ) -> Result<DecodePlan, SchemaError> {
        let mut seen = HashSet::new();
        let mut fields = Vec::with_capacity(layout.fields.len());

        for field in &layout.fields {
            if !seen.insert(field.name.as_str()) {
                return Err(SchemaError::DuplicateField {
                    ty: layout.name.clone(),
                    field: field.name.clone(),
                });
            }

            let op = match &field.kind {
                FieldKind::Primitive { ty } => FieldOp::Primitive(*ty),
                FieldKind::PrimitiveArray { ty, count } => FieldOp::PrimitiveArray {
                    element: *ty,
                    count: *count,
                },
                FieldKind::String { max_length } => FieldOp::String {
                    max_length: *max_length,
                },
                FieldKind::TagRef => FieldOp::TagRef,
                FieldKind::Record { ty } => {
                    FieldOp::Record(self.compile_fixed(layout, &field.name, ty, in_progress)?)
                }
                FieldKind::ReferenceArray { element, basis } => {
                    let plan = self.compile_fixed(layout, &field.name, element, in_progress)?;
                    if plan.fixed_length() == Some(0) {
                        return Err(SchemaError::EmptyElement {
                            parent: layout.name.clone(),
                            field: field.name.clone(),
                            ty: element.clone(),
                        });
                    }
                    FieldOp::ReferenceArray {
                        element: plan,
                        basis: *basis,
                    }
                }
            };

            let size = match &field.kind {
                FieldKind::PrimitiveArray { ty, count } => ty.size().checked_mul(*count),
                _ => Some(op.size()),
            };
            let end = size
                .and_then(|size| field.offset.checked_add(size))
                .filter(|&end| end <= MAX_FIELD_END)
                .ok_or_else(|| SchemaError::FieldTooLarge {
                    ty: layout.name.clone(),
                    field: field.name.clone(),
                })?;

            if let RecordLength::Fixed(length) = layout.length {
                if end > length {
                    return Err(SchemaError::FieldOutOfBounds {
                        ty: layout.name.clone(),
                        field: field.name.clone(),
                        end,
                        length,
                    });
                }
            }

            fields.push(PlannedField {
                name: field.name.clone(),
                offset: field.offset,
                op,
            });
        }

        fields.sort_by_key(|f| f.offset);

        Ok(DecodePlan {
            name: layout.name.clone(),
            length: match layout.length {
                RecordLength::Fixed(length) => PlanLength::Fixed(length),
                RecordLength::Arbitrary => PlanLength::Arbitrary,
            },
            fields,
        })
    }

    /// Compile a type embedded in `parent`, which needs a fixed length to have a stride
    fn compile_fixed(
        &self,
        parent: &RecordLayout,
        field: &str,
        ty: &str,
        in_progress: &mut Vec<String>,
    ) -> Result<Arc<DecodePlan>, SchemaError> {
        let plan = self.compile(ty, in_progress)?;
        if plan.fixed_length().is_none() {
            return Err(SchemaError::NestedArbitraryLength {
                parent: parent.name.clone(),
                field: field.to_owned(),
                ty: ty.to_owned(),
            });
        }
        Ok(plan)
    }
}
