//! Declarative descriptions of how records are laid out on disk.
//!
//! Every field of a record is described by a [`FieldLayout`] carrying its offset inside the record and its
//! [`FieldKind`]. Descriptors are self-describing, so the order fields are declared in does not matter.
//!
//! Layouts are registered with a [`crate::schema::SchemaBuilder`], either from Rust through the
//! [`TagLayout`] trait or from a serialized [`crate::schema::SchemaDefinition`].

use byteorder::{ByteOrder, LittleEndian};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::ValueError;
use crate::offset::PointerBasis;
use crate::schema::SchemaBuilder;
use crate::store::TagStore;
use crate::value::{Record, Value};

/// Fixed width little-endian scalar
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(rename_all = "lowercase")
)]
pub enum Primitive {
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    U64,
    I64,
    F32,
    F64,
}

impl Primitive {
    /// Width of the scalar in bytes
    pub const fn size(self) -> usize {
        match self {
            Primitive::U8 | Primitive::I8 => 1,
            Primitive::U16 | Primitive::I16 => 2,
            Primitive::U32 | Primitive::I32 | Primitive::F32 => 4,
            Primitive::U64 | Primitive::I64 | Primitive::F64 => 8,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Primitive::U8 => "u8",
            Primitive::I8 => "i8",
            Primitive::U16 => "u16",
            Primitive::I16 => "i16",
            Primitive::U32 => "u32",
            Primitive::I32 => "i32",
            Primitive::U64 => "u64",
            Primitive::I64 => "i64",
            Primitive::F32 => "f32",
            Primitive::F64 => "f64",
        }
    }

    pub const fn is_float(self) -> bool {
        matches!(self, Primitive::F32 | Primitive::F64)
    }

    /// Read a value of this type from the start of `bytes`.
    ///
    /// `bytes` must hold at least [`Primitive::size`] bytes.
    pub fn read(self, bytes: &[u8]) -> Value {
        match self {
            Primitive::U8 => Value::U8(bytes[0]),
            Primitive::I8 => Value::I8(bytes[0] as i8),
            Primitive::U16 => Value::U16(LittleEndian::read_u16(bytes)),
            Primitive::I16 => Value::I16(LittleEndian::read_i16(bytes)),
            Primitive::U32 => Value::U32(LittleEndian::read_u32(bytes)),
            Primitive::I32 => Value::I32(LittleEndian::read_i32(bytes)),
            Primitive::U64 => Value::U64(LittleEndian::read_u64(bytes)),
            Primitive::I64 => Value::I64(LittleEndian::read_i64(bytes)),
            Primitive::F32 => Value::F32(LittleEndian::read_f32(bytes)),
            Primitive::F64 => Value::F64(LittleEndian::read_f64(bytes)),
        }
    }
}

/// How a single field is stored
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(tag = "kind", rename_all = "snake_case")
)]
pub enum FieldKind {
    /// One scalar
    Primitive {
        #[cfg_attr(feature = "serde", serde(rename = "type"))]
        ty: Primitive,
    },

    /// `count` scalars stored back to back
    PrimitiveArray {
        #[cfg_attr(feature = "serde", serde(rename = "type"))]
        ty: Primitive,
        count: usize,
    },

    /// Out of line array behind an 8 byte `(count, pointer)` header
    ReferenceArray {
        element: String,
        #[cfg_attr(feature = "serde", serde(default))]
        basis: PointerBasis,
    },

    /// A fixed length record embedded in place
    Record {
        #[cfg_attr(feature = "serde", serde(rename = "type"))]
        ty: String,
    },

    /// Zero terminated string occupying at most `max_length` bytes
    String { max_length: usize },

    /// 4 byte identifier of another tag
    TagRef,
}

/// One field of a record
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FieldLayout {
    pub name: String,

    /// Offset of the field from the start of the enclosing record
    pub offset: usize,

    #[cfg_attr(feature = "serde", serde(flatten))]
    pub kind: FieldKind,
}

impl FieldLayout {
    pub fn new(name: impl Into<String>, offset: usize, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            offset,
            kind,
        }
    }

    pub fn primitive(name: impl Into<String>, offset: usize, ty: Primitive) -> Self {
        Self::new(name, offset, FieldKind::Primitive { ty })
    }

    pub fn primitive_array(
        name: impl Into<String>,
        offset: usize,
        ty: Primitive,
        count: usize,
    ) -> Self {
        Self::new(name, offset, FieldKind::PrimitiveArray { ty, count })
    }

    /// Reference array with a secondary basis pointer, see [`FieldLayout::with_basis`]
    pub fn reference_array(
        name: impl Into<String>,
        offset: usize,
        element: impl Into<String>,
    ) -> Self {
        Self::new(
            name,
            offset,
            FieldKind::ReferenceArray {
                element: element.into(),
                basis: PointerBasis::default(),
            },
        )
    }

    pub fn record(name: impl Into<String>, offset: usize, ty: impl Into<String>) -> Self {
        Self::new(name, offset, FieldKind::Record { ty: ty.into() })
    }

    pub fn string(name: impl Into<String>, offset: usize, max_length: usize) -> Self {
        Self::new(name, offset, FieldKind::String { max_length })
    }

    pub fn tag_ref(name: impl Into<String>, offset: usize) -> Self {
        Self::new(name, offset, FieldKind::TagRef)
    }

    /// Change the pointer basis of a reference array field. Other kinds are left untouched.
    pub fn with_basis(mut self, basis: PointerBasis) -> Self {
        if let FieldKind::ReferenceArray { basis: b, .. } = &mut self.kind {
            *b = basis;
        }
        self
    }
}

/// Total byte length of a record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(rename_all = "snake_case")
)]
pub enum RecordLength {
    Fixed(usize),

    /// Whatever the index says the tag is. Only valid for root tags.
    Arbitrary,
}

/// Layout of one record type
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RecordLayout {
    pub name: String,
    pub length: RecordLength,
    pub fields: Vec<FieldLayout>,
}

impl RecordLayout {
    pub fn fixed(name: impl Into<String>, length: usize, fields: Vec<FieldLayout>) -> Self {
        Self {
            name: name.into(),
            length: RecordLength::Fixed(length),
            fields,
        }
    }

    pub fn arbitrary(name: impl Into<String>, fields: Vec<FieldLayout>) -> Self {
        Self {
            name: name.into(),
            length: RecordLength::Arbitrary,
            fields,
        }
    }
}

/// A Rust type with a static layout table.
///
/// ```
/// use blam_map::error::ValueError;
/// use blam_map::layout::{FieldLayout, Primitive, RecordLayout, TagLayout};
/// use blam_map::value::Record;
///
/// struct Marker {
///     position: Vec<f32>,
///     name: String,
/// }
///
/// impl TagLayout for Marker {
///     const NAME: &'static str = "Marker";
///
///     fn layout() -> RecordLayout {
///         RecordLayout::fixed("Marker", 44, vec![
///             FieldLayout::primitive_array("Position", 0, Primitive::F32, 3),
///             FieldLayout::string("Name", 12, 32),
///         ])
///     }
///
///     fn from_record(record: &Record) -> Result<Self, ValueError> {
///         Ok(Marker {
///             position: record.array("Position")?,
///             name: record.get("Name")?,
///         })
///     }
/// }
/// ```
pub trait TagLayout: Sized {
    /// Name the layout is registered under
    const NAME: &'static str;

    /// Descriptor table of this type
    fn layout() -> RecordLayout;

    /// Register the layouts of nested and element types
    fn register_dependencies(_schema: &mut SchemaBuilder) {}

    /// Build the value from a record decoded with [`TagLayout::layout`]
    fn from_record(record: &Record) -> Result<Self, ValueError>;

    /// Wire up references to other tags once the whole index is available.
    ///
    /// Runs once after decoding and is the only mutation allowed on a decoded tag.
    fn populate_external(&mut self, _store: &TagStore) {}
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use crate::layout::{FieldKind, FieldLayout, Primitive};
    use crate::offset::PointerBasis;
    use crate::value::Value;

    #[test]
    fn primitive_sizes() {
        assert_eq!(Primitive::U8.size(), 1);
        assert_eq!(Primitive::I16.size(), 2);
        assert_eq!(Primitive::F32.size(), 4);
        assert_eq!(Primitive::F64.size(), 8);
    }

    #[test]
    fn primitive_read_little_endian() {
        assert_eq!(Primitive::I32.read(&[0x77, 0, 0, 0]), Value::I32(119));
        assert_eq!(Primitive::U16.read(&[0x34, 0x12]), Value::U16(0x1234));
        assert_eq!(Primitive::I8.read(&[0xFF]), Value::I8(-1));
        assert_eq!(
            Primitive::F32.read(&[0x00, 0x00, 0x80, 0x3F]),
            Value::F32(1.0)
        );
    }

    #[test]
    fn basis_only_applies_to_reference_arrays() {
        let field = FieldLayout::reference_array("Blocks", 8, "Block")
            .with_basis(PointerBasis::TagInternal);
        assert_eq!(
            field.kind,
            FieldKind::ReferenceArray {
                element: "Block".into(),
                basis: PointerBasis::TagInternal
            }
        );

        let scalar = FieldLayout::primitive("Value", 0, Primitive::I32)
            .with_basis(PointerBasis::TagInternal);
        assert_eq!(scalar.kind, FieldKind::Primitive { ty: Primitive::I32 });
    }
}
