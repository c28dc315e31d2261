//! This library decodes and patches the tags stored inside **Blam** engine map files.
//!
//! Tags are described declaratively. Each tag class gets a [`layout::RecordLayout`], a table of named fields
//! at fixed offsets, and a [`schema::Schema`] compiles those tables once into decode plans shared by every
//! tag of the class. The same plans drive the reverse direction: a property path such as
//! `SubValues[1].SubSubTags[0].Value` resolves to the byte offset the decoder would have read, which is what
//! [`patch::MapPatcher`] writes to.
//!
//! # Map Format Documentation
//!
//! A map holds a header, the tag metadata section, a table of tag names and the tag index. All multi-byte
//! values are little endian.
//!
//! | Offset (bytes) | Field          | Description                                                      |
//! |----------------|----------------|------------------------------------------------------------------|
//! | 0x0000         | Magic number   | 4 bytes: "daeh"                                                  |
//! | 0x0004         | Version        | 4 bytes: format version, `8`                                     |
//! | 0x0008         | File Size      | 4 bytes: total size of the map                                   |
//! | 0x000C         | Index Offset   | 4 bytes: absolute offset of the index header                     |
//! | 0x0010         | Index Size     | 4 bytes: size of the index header, class list and index table    |
//! | 0x0014         | Meta Offset    | 4 bytes: absolute offset of the tag metadata section             |
//! | 0x0018         | Meta Base      | 4 bytes: virtual address the metadata section is loaded at       |
//! | 0x001C         | Names Offset   | 4 bytes: absolute offset of the tag name table                   |
//! | 0x0020         | Names Count    | 4 bytes: number of names, `0` if the map carries none            |
//!
//! ### Index Header
//!
//! | Offset (bytes) | Field                  | Description                                              |
//! |----------------|------------------------|----------------------------------------------------------|
//! | 0x0000         | File Raw Offset        | 4 bytes                                                  |
//! | 0x0004         | Primary Magic Constant | 4 bytes: subtracted from the index offset to get the primary magic |
//! | 0x0008         | Tag List Count         | 4 bytes: number of class entries following the header    |
//! | 0x000C         | Tag Index Offset       | 4 bytes: location of the index table, primary basis      |
//! | 0x0010         | Scenario Ref           | 4 bytes: tag id of the scenario                          |
//! | 0x0014         | Globals Ref            | 4 bytes: tag id of the globals                           |
//! | 0x0018         | Unknown                | 4 bytes                                                  |
//! | 0x001C         | Tag Index Count        | 4 bytes: number of index table entries                   |
//!
//! The header is followed by `Tag List Count` class entries of 12 bytes (class, parent and grandparent type
//! codes). Each index table entry is 16 bytes: type code, tag id, location of the body in the primary basis
//! and the size of the body.
//!
//! ### Offsets
//!
//! Locations are stored in one of several bases, see [`offset`]. The primary magic is
//! `index offset - primary magic constant` and relocates index locations. The secondary magic is
//! `meta base - meta offset`; pointers inside tag bodies are virtual addresses and subtracting it yields a
//! position in the file. Some tag classes store pointers relative to the tag itself instead.
//!
//! ### Tag Bodies
//!
//! A reference array is an 8 byte `(count: i32, pointer: i32)` header pointing at `count` records of a fixed
//! length stored back to back. Strings are zero terminated inside a fixed width field. A tag reference is the
//! 4 byte id of another tag, `0xFFFFFFFF` meaning none.
//!
//! ## Additional Information
//!
//! - **File Extension**: `.map`
//! - **Endianness**: Little-endian for all multi-byte integers
//!

pub mod archive;
pub mod decode;
pub mod error;
pub mod layout;
pub mod offset;
pub mod patch;
pub mod path;
pub mod schema;
pub mod store;
pub mod types;
pub mod value;
pub mod write;

pub use archive::MapArchive;
pub use decode::decode;
pub use patch::MapPatcher;
pub use schema::Schema;
pub use store::TagStore;
pub use write::MapWriter;
