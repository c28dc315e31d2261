//! Base types for structure of a map file.

use std::fmt;
use std::str::FromStr;

use binrw::{BinRead, BinWrite};
use derive_more::derive::{Display, From, Into};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::offset::Offset;

/// Identifier of a tag, unique for the lifetime of a process and stable across loads
#[derive(
    BinRead, BinWrite, Display, From, Into, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord,
)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(transparent))]
#[brw(little)]
#[display("{_0:#010x}")]
pub struct TagId(pub u32);

impl TagId {
    /// Reserved identifier meaning "no tag"
    pub const INVALID: TagId = TagId(u32::MAX);

    /// Whether this identifier can refer to a tag at all
    pub const fn is_valid(self) -> bool {
        self.0 != Self::INVALID.0
    }
}

impl Default for TagId {
    fn default() -> Self {
        TagId::INVALID
    }
}

/// Four character class code of a tag, e.g. `bitm` or `scnr`.
///
/// Stored on disk as a little-endian `u32`, so the characters appear reversed in a hex dump.
#[derive(BinRead, BinWrite, Debug, Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(try_from = "String", into = "String")
)]
#[brw(little)]
pub struct TypeCode(pub u32);

impl TypeCode {
    /// Parent class of root classes
    pub const NONE: TypeCode = TypeCode(u32::MAX);

    /// Build a type code from its four characters
    pub const fn new(code: [u8; 4]) -> Self {
        TypeCode(u32::from_be_bytes(code))
    }

    /// The four characters of this code
    pub const fn chars(self) -> [u8; 4] {
        self.0.to_be_bytes()
    }
}

impl fmt::Display for TypeCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for c in self.chars() {
            let c = if c.is_ascii_graphic() || c == b' ' {
                c as char
            } else {
                '?'
            };
            write!(f, "{c}")?;
        }
        Ok(())
    }
}

impl FromStr for TypeCode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = s.as_bytes();
        if bytes.is_empty() || bytes.len() > 4 || !s.is_ascii() {
            return Err(Error::InvalidTypeCode(s.to_owned()));
        }

        // Short codes such as `snd` are padded with spaces
        let mut code = [b' '; 4];
        code[..bytes.len()].copy_from_slice(bytes);
        Ok(TypeCode::new(code))
    }
}

impl TryFrom<String> for TypeCode {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TypeCode> for String {
    fn from(value: TypeCode) -> Self {
        value.to_string()
    }
}

/// Map file header
///
/// Locates the index, the tag metadata section and the tag name table. All data is little endian.
#[derive(BinRead, BinWrite, Debug, Copy, Clone, PartialEq, Eq)]
#[brw(magic = b"daeh", little)]
pub struct MapHeader {
    /// Format version of the map
    pub version: u32,

    /// Total size of the map in bytes
    pub file_size: u32,

    /// Absolute offset of the [`IndexHeader`]
    pub index_offset: u32,

    /// Size of the index header, class list and index table together
    pub index_size: u32,

    /// Absolute offset where the tag metadata section starts
    pub meta_offset: u32,

    /// Virtual address the metadata section is loaded at, the base of all secondary pointers
    pub meta_base: i32,

    /// Absolute offset of the zero terminated tag names, stored in index order
    pub names_offset: u32,

    /// Number of names in the name table, zero if the map carries no names
    pub names_count: u32,
}

impl MapHeader {
    /// Size of the header on disk, including the magic
    pub const SIZE: u32 = 36;

    /// The only version this library writes
    pub const VERSION: u32 = 8;
}

impl Default for MapHeader {
    fn default() -> Self {
        Self {
            version: Self::VERSION,
            file_size: Self::SIZE,
            index_offset: Self::SIZE,
            index_size: 0,
            meta_offset: Self::SIZE,
            meta_base: 0,
            names_offset: 0,
            names_count: 0,
        }
    }
}

/// Header at the start of the index
#[derive(BinRead, BinWrite, Debug, Default, Copy, Clone, PartialEq, Eq)]
#[brw(little)]
pub struct IndexHeader {
    pub file_raw_offset: u32,

    /// Virtual address the index header is loaded at
    pub primary_magic_constant: i32,

    /// Number of [`TagClassEntry`] records following this header
    pub tag_list_count: u32,

    /// Location of the index table in the primary basis
    pub tag_index_offset: i32,

    pub scenario_ref: TagId,

    pub globals_ref: TagId,

    pub unknown1: u32,

    /// Number of [`TagIndexRecord`] entries in the index table
    pub tag_index_count: u32,
}

impl IndexHeader {
    pub const SIZE: u32 = 32;
}

/// Class hierarchy entry, one per tag class present in the map
#[derive(BinRead, BinWrite, Debug, Default, Copy, Clone, PartialEq, Eq)]
#[brw(little)]
pub struct TagClassEntry {
    pub class: TypeCode,
    pub parent: TypeCode,
    pub grandparent: TypeCode,
}

impl TagClassEntry {
    pub const SIZE: u32 = 12;
}

/// Raw index table entry as stored on disk
#[derive(BinRead, BinWrite, Debug, Default, Copy, Clone, PartialEq, Eq)]
#[brw(little)]
pub struct TagIndexRecord {
    pub type_code: TypeCode,
    pub id: TagId,

    /// Location of the tag body in the primary basis
    pub offset: i32,

    pub data_size: u32,
}

impl TagIndexRecord {
    pub const SIZE: u32 = 16;
}

/// Index table entry with its location captured as an [`Offset`]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TagIndexEntry {
    pub type_code: TypeCode,
    pub id: TagId,
    pub offset: Offset,
    pub data_size: u32,
}

impl From<TagIndexRecord> for TagIndexEntry {
    fn from(value: TagIndexRecord) -> Self {
        Self {
            type_code: value.type_code,
            id: value.id,
            offset: Offset::primary(value.offset),
            data_size: value.data_size,
        }
    }
}

impl From<&TagIndexEntry> for TagIndexRecord {
    fn from(value: &TagIndexEntry) -> Self {
        Self {
            type_code: value.type_code,
            id: value.id,
            offset: value.offset.original(),
            data_size: value.data_size,
        }
    }
}
