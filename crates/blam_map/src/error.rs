//! Error types that can be emitted from this library

use miette::Diagnostic;
use thiserror::Error;

use crate::types::{TagId, TypeCode};

/// Error type for library
#[derive(Error, Diagnostic, Debug)]
pub enum Error {
    /// Transparent warpper for [`std::io::Error`]
    #[error(transparent)]
    IOError(#[from] std::io::Error),

    /// Transparent warpper for [`binrw::Error`]
    #[error(transparent)]
    BinRWError(#[from] binrw::Error),

    /// file is an invalid map archive
    #[error("file is an invalid map archive")]
    InvalidArchive,

    /// The record layouts do not describe a decodable schema
    #[error(transparent)]
    #[diagnostic(transparent)]
    Schema(#[from] SchemaError),

    /// A tag's bytes disagree with its schema
    #[error(transparent)]
    #[diagnostic(transparent)]
    Corrupt(#[from] CorruptTagError),

    /// A property path could not be resolved or written
    #[error(transparent)]
    #[diagnostic(transparent)]
    Path(#[from] PathError),

    /// A decoded record could not be converted into a typed value
    #[error(transparent)]
    #[diagnostic(transparent)]
    Value(#[from] ValueError),

    /// `{0}` is not a four character type code
    #[error("`{0}` is not a four character type code")]
    InvalidTypeCode(String),

    /// unable to find tag {0}
    #[error("unable to find tag {0}")]
    TagNotFound(TagId),

    /// {0}
    #[error("{0}")]
    CustomError(String),
}

/// Errors found while compiling record layouts into decode plans.
///
/// These point at a mismatch between the schema and the code using it, never at bad data.
#[derive(Error, Diagnostic, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    /// no layout registered for type `{0}`
    #[error("no layout registered for type `{0}`")]
    #[diagnostic(help("register the type with SchemaBuilder::layout or SchemaBuilder::register"))]
    UnknownType(String),

    /// no layout bound to type code `{0}`
    #[error("no layout bound to type code `{0}`")]
    UnboundTypeCode(TypeCode),

    /// `{parent}.{field}` embeds `{ty}` which has no fixed length
    #[error("`{parent}.{field}` embeds `{ty}` which has no fixed length")]
    #[diagnostic(help("only root tag layouts may use RecordLength::Arbitrary"))]
    NestedArbitraryLength {
        parent: String,
        field: String,
        ty: String,
    },

    /// `{ty}.{field}` ends at byte {end} but the record is only {length} bytes long
    #[error("`{ty}.{field}` ends at byte {end} but the record is only {length} bytes long")]
    FieldOutOfBounds {
        ty: String,
        field: String,
        end: usize,
        length: usize,
    },

    /// `{ty}` declares field `{field}` more than once
    #[error("`{ty}` declares field `{field}` more than once")]
    DuplicateField { ty: String, field: String },

    /// `{0}` contains itself
    #[error("`{0}` contains itself")]
    Recursive(String),

    /// `{ty}.{field}` does not fit in the 32 bit address space of a map
    #[error("`{ty}.{field}` does not fit in the 32 bit address space of a map")]
    FieldTooLarge { ty: String, field: String },

    /// `{parent}.{field}` is an array of `{ty}` which is zero bytes long
    #[error("`{parent}.{field}` is an array of `{ty}` which is zero bytes long")]
    #[diagnostic(help("elements of a reference array need a non-zero fixed length"))]
    EmptyElement {
        parent: String,
        field: String,
        ty: String,
    },
}

/// A tag whose bytes could not be decoded according to its schema.
#[derive(Error, Diagnostic, Debug, Clone, PartialEq, Eq)]
#[error("tag {tag} ({type_code}) field `{field}`: {reason}")]
pub struct CorruptTagError {
    pub tag: TagId,
    pub type_code: TypeCode,
    pub field: String,
    pub reason: Corruption,
}

/// What was wrong with the bytes of a corrupt tag.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Corruption {
    /// Reading `len` bytes at `offset` runs past the end of the buffer
    #[error("{len} bytes at {offset:#x} runs past the end of the {available} byte buffer")]
    OutOfBounds {
        offset: i64,
        len: usize,
        available: usize,
    },

    /// A reference array header carries a negative count
    #[error("reference array count {0} is negative")]
    NegativeCount(i32),

    /// A reference array would not fit in the buffer
    #[error("reference array of {count} x {element_length} bytes at {offset:#x} overflows the {available} byte buffer")]
    CountOverflow {
        count: i32,
        element_length: usize,
        offset: i64,
        available: usize,
    },

    /// An offset was dereferenced before the archive's magics were known
    #[error("{0} offset dereferenced before its magic is known")]
    UnresolvedMagic(&'static str),
}

/// Errors raised while resolving or writing a property path
#[derive(Error, Diagnostic, Debug, Clone, PartialEq)]
pub enum PathError {
    /// `{path}` is not a valid property path (at byte {offset})
    #[error("`{path}` is not a valid property path (at byte {offset})")]
    #[diagnostic(help("paths look like `SubValues[1].SubSubTags[0].Value`"))]
    Syntax { path: String, offset: usize },

    /// `{ty}` has no field `{segment}`
    #[error("`{ty}` has no field `{segment}`")]
    UnknownField { segment: String, ty: String },

    /// `{segment}` is not an array
    #[error("`{segment}` is not an array")]
    NotIndexable { segment: String },

    /// `{segment}` needs an index before it can be descended into
    #[error("`{segment}` needs an index before it can be descended into")]
    MissingIndex { segment: String },

    /// `{segment}` is not a record
    #[error("`{segment}` is not a record")]
    NotARecord { segment: String },

    /// `{segment}` has {count} elements, index {index} is out of range
    #[error("`{segment}` has {count} elements, index {index} is out of range")]
    IndexOutOfRange {
        segment: String,
        index: usize,
        count: usize,
    },

    /// `{segment}` could not be read from the live buffer
    #[error("`{segment}` could not be read from the live buffer: {reason}")]
    Unreadable { segment: String, reason: Corruption },

    /// `{path}` is a {leaf} which cannot be written directly
    #[error("`{path}` is a {leaf} which cannot be written directly")]
    UnsupportedLeaf { path: String, leaf: String },

    /// `{path}` expects {expected}
    #[error("`{path}` expects {expected}")]
    ValueMismatch { path: String, expected: String },
}

/// Errors converting a decoded record into a Rust value
#[derive(Error, Diagnostic, Debug, Clone, PartialEq, Eq)]
pub enum ValueError {
    /// `{ty}` has no field `{field}`
    #[error("`{ty}` has no field `{field}`")]
    MissingField { ty: String, field: String },

    /// `{ty}.{field}` is not {expected}
    #[error("`{ty}.{field}` is not {expected}")]
    TypeMismatch {
        ty: String,
        field: String,
        expected: &'static str,
    },
}

/// Generic result type with crate's Error as its error variant
pub type Result<T, E = Error> = core::result::Result<T, E>;
