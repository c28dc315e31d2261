//! Types for writing map archives
//!

use std::io::{self, Seek, Write};

use binrw::BinWrite;
use bon::Builder;
use indexmap::IndexMap;
use tracing::{debug, instrument, Level};

use crate::error::Result;
use crate::types::{
    IndexHeader, MapHeader, TagClassEntry, TagId, TagIndexRecord, TypeCode,
};

/// Virtual address the meta section is loaded at unless told otherwise
pub const DEFAULT_META_BASE: i32 = 0x0100_0000;

/// Options for how the map file should be written
#[derive(Debug, Clone, Copy, Builder)]
pub struct MapWriterOptions {
    /// Virtual address of the first byte of the meta section, the base of every secondary pointer
    #[builder(default = DEFAULT_META_BASE)]
    pub meta_base: i32,

    /// Tag bodies start on a multiple of this many bytes
    #[builder(default = 4)]
    pub alignment: usize,

    /// Whether to write the tag name table
    #[builder(default = true)]
    pub names: bool,
}

impl Default for MapWriterOptions {
    fn default() -> Self {
        MapWriterOptions::builder().build()
    }
}

#[derive(Debug, Clone, Copy)]
struct PendingTag {
    id: TagId,
    type_code: TypeCode,
    start: usize,
    size: usize,
}

/// Map archive generator
///
/// Tag bodies are addressed through virtual addresses, so a tag that points into itself has to know where it
/// will be loaded. [`MapWriter::start_tag`] returns that address before the body is written.
///
/// ```
/// # fn doit() -> blam_map::error::Result<()>
/// # {
/// use std::io::Write;
/// use blam_map::types::{TagId, TypeCode};
/// use blam_map::write::{MapWriter, MapWriterOptions};
///
/// let mut map = MapWriter::new(std::io::Cursor::new(Vec::new()), MapWriterOptions::default());
///
/// let address = map.start_tag(TagId(0xE000_0001), TypeCode::new(*b"bloc"), "blocks")?;
/// map.write_all(&1i32.to_le_bytes())?;
/// // A reference array with one element, placed right behind its header
/// map.write_all(&1i32.to_le_bytes())?;
/// map.write_all(&(address + 12).to_le_bytes())?;
/// map.write_all(&7i32.to_le_bytes())?;
///
/// let data = map.finish()?.into_inner();
/// let archive = blam_map::MapArchive::new(data)?;
/// assert_eq!(archive.len(), 1);
/// # Ok(())
/// # }
/// # doit().unwrap();
/// ```
pub struct MapWriter<W: Write + Seek> {
    inner: W,
    options: MapWriterOptions,
    meta: Vec<u8>,
    names: Vec<u8>,
    classes: IndexMap<TypeCode, TagClassEntry>,
    tags: Vec<PendingTag>,
    current: Option<PendingTag>,
    scenario: TagId,
    globals: TagId,
}

impl<W: Write + Seek> MapWriter<W> {
    /// Initializes the map.
    ///
    /// Before writing to this object, the [`MapWriter::start_tag`] function should be called.
    pub fn new(inner: W, options: MapWriterOptions) -> MapWriter<W> {
        MapWriter {
            inner,
            options,
            meta: Vec::new(),
            names: Vec::new(),
            classes: IndexMap::new(),
            tags: Vec::new(),
            current: None,
            scenario: TagId::INVALID,
            globals: TagId::INVALID,
        }
    }

    /// Returns true if a tag is currently open for writing.
    pub const fn is_writing_tag(&self) -> bool {
        self.current.is_some()
    }

    /// Virtual address the next byte written will be loaded at
    pub fn virtual_address(&self) -> i32 {
        self.options.meta_base.wrapping_add(self.meta.len() as i32)
    }

    /// Declare the parents of a class. Classes that are never declared are written as root classes.
    pub fn add_class(&mut self, class: TagClassEntry) -> &mut Self {
        self.classes.insert(class.class, class);
        self
    }

    pub fn set_scenario(&mut self, id: TagId) -> &mut Self {
        self.scenario = id;
        self
    }

    pub fn set_globals(&mut self, id: TagId) -> &mut Self {
        self.globals = id;
        self
    }

    /// Start a new tag, returning the virtual address its body will be loaded at.
    #[instrument(skip(self, name), err)]
    pub fn start_tag(&mut self, id: TagId, type_code: TypeCode, name: impl ToString) -> Result<i32> {
        if self.current.is_some() {
            self.finish_tag();
        }

        let padding = self.meta.len().next_multiple_of(self.options.alignment.max(1)) - self.meta.len();
        self.meta.extend(std::iter::repeat(0u8).take(padding));

        self.names.write_all(name.to_string().as_bytes())?;
        self.names.write_all(&[0u8])?;

        self.classes.entry(type_code).or_insert(TagClassEntry {
            class: type_code,
            parent: TypeCode::NONE,
            grandparent: TypeCode::NONE,
        });

        self.current = Some(PendingTag {
            id,
            type_code,
            start: self.meta.len(),
            size: 0,
        });

        Ok(self.virtual_address())
    }

    fn finish_tag(&mut self) {
        if let Some(mut tag) = self.current.take() {
            tag.size = self.meta.len() - tag.start;
            self.tags.push(tag);
        }
    }

    /// Finish the last tag and write the header, name table and index
    ///
    /// This will return the writer, but one should normally not append any data to the end of the file.
    #[instrument(skip(self), err)]
    pub fn finish(mut self) -> Result<W> {
        self.finish_tag();

        let meta_offset = MapHeader::SIZE;
        let names_offset = meta_offset + self.meta.len() as u32;
        let index_offset = names_offset + self.names.len() as u32;
        let index_size = IndexHeader::SIZE
            + TagClassEntry::SIZE * self.classes.len() as u32
            + TagIndexRecord::SIZE * self.tags.len() as u32;

        // Index entries store virtual addresses, so the primary magic undoes the meta relocation
        let primary = (meta_offset as i32).wrapping_sub(self.options.meta_base);
        let table = index_offset + IndexHeader::SIZE + TagClassEntry::SIZE * self.classes.len() as u32;

        let header = MapHeader {
            version: MapHeader::VERSION,
            file_size: index_offset + index_size,
            index_offset,
            index_size,
            meta_offset,
            meta_base: self.options.meta_base,
            names_offset: if self.options.names { names_offset } else { 0 },
            names_count: if self.options.names { self.tags.len() as u32 } else { 0 },
        };

        let index_header = IndexHeader {
            file_raw_offset: 0,
            primary_magic_constant: (index_offset as i32).wrapping_sub(primary),
            tag_list_count: self.classes.len() as u32,
            tag_index_offset: (table as i32).wrapping_sub(primary),
            scenario_ref: self.scenario,
            globals_ref: self.globals,
            unknown1: 0,
            tag_index_count: self.tags.len() as u32,
        };

        debug!(
            "writing {} tags in {} classes, {} meta bytes",
            self.tags.len(),
            self.classes.len(),
            self.meta.len()
        );

        header.write(&mut self.inner)?;
        self.inner.write_all(&self.meta)?;
        if self.options.names {
            self.inner.write_all(&self.names)?;
        } else {
            // Keep the index where the header says it is
            self.inner.write_all(&vec![0u8; self.names.len()])?;
        }
        index_header.write(&mut self.inner)?;
        for class in self.classes.values() {
            class.write(&mut self.inner)?;
        }
        for tag in &self.tags {
            TagIndexRecord {
                type_code: tag.type_code,
                id: tag.id,
                offset: self.options.meta_base.wrapping_add(tag.start as i32),
                data_size: tag.size as u32,
            }
            .write(&mut self.inner)?;
        }

        Ok(self.inner)
    }
}

impl<W: Write + Seek> Write for MapWriter<W> {
    #[instrument(skip_all, err, ret(level = Level::TRACE), fields(size=buf.len()) )]
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.current.is_none() {
            return Err(io::Error::new(io::ErrorKind::Other, "No tag has been started"));
        }
        self.meta.extend_from_slice(buf);
        Ok(buf.len())
    }

    #[instrument(skip(self), err)]
    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod test {
    use std::io::{Cursor, Write};

    use pretty_assertions::assert_eq;
    use tracing_test::traced_test;

    use crate::archive::MapArchive;
    use crate::error::Result;
    use crate::types::{TagClassEntry, TagId, TypeCode};
    use crate::write::{MapWriter, MapWriterOptions};

    #[traced_test]
    #[test]
    fn empty_map_write() -> Result<()> {
        #[rustfmt::skip]
        let expected = vec![
            // Header
            0x64, 0x61, 0x65, 0x68,
            0x08, 0x00, 0x00, 0x00,
            0x44, 0x00, 0x00, 0x00,
            0x24, 0x00, 0x00, 0x00,
            0x20, 0x00, 0x00, 0x00,
            0x24, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x01,
            0x24, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
            // Index header
            0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x01,
            0x00, 0x00, 0x00, 0x00,
            0x20, 0x00, 0x00, 0x01,
            0xFF, 0xFF, 0xFF, 0xFF,
            0xFF, 0xFF, 0xFF, 0xFF,
            0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
        ];

        let writer = MapWriter::new(Cursor::new(Vec::new()), MapWriterOptions::default());
        let result = writer.finish()?.into_inner();
        assert_eq!(result, expected);

        let archive = MapArchive::new(result)?;
        assert!(archive.is_empty());

        Ok(())
    }

    #[traced_test]
    #[test]
    fn written_tags_read_back() -> Result<()> {
        let mut writer = MapWriter::new(
            Cursor::new(Vec::new()),
            MapWriterOptions::builder().meta_base(0x4000).alignment(16).build(),
        );
        writer.add_class(TagClassEntry {
            class: TypeCode::new(*b"weap"),
            parent: TypeCode::new(*b"item"),
            grandparent: TypeCode::new(*b"obje"),
        });

        let first = writer.start_tag(TagId(1), TypeCode::new(*b"weap"), "weapons/pistol")?;
        writer.write_all(&[1, 2, 3])?;
        let second = writer.start_tag(TagId(2), TypeCode::new(*b"snd!"), "sound/click")?;
        writer.write_all(&[4, 5])?;
        writer.set_scenario(TagId(2));

        assert_eq!(first, 0x4000);
        assert_eq!(second, 0x4010);

        let archive = MapArchive::new(writer.finish()?.into_inner())?;
        assert_eq!(archive.len(), 2);
        assert_eq!(archive.index_header().scenario_ref, TagId(2));
        assert_eq!(archive.name(TagId(1)), Some("weapons/pistol"));
        assert_eq!(archive.tag_bytes(TagId(1)), Some(&[1u8, 2, 3][..]));
        assert_eq!(archive.tag_bytes(TagId(2)), Some(&[4u8, 5][..]));
        assert_eq!(
            archive.class(TypeCode::new(*b"weap")).map(|c| c.parent),
            Some(TypeCode::new(*b"item"))
        );
        assert_eq!(
            archive.class(TypeCode::new(*b"snd!")).map(|c| c.parent),
            Some(TypeCode::NONE)
        );

        Ok(())
    }

    #[test]
    fn writing_without_a_tag_fails() {
        let mut writer = MapWriter::new(Cursor::new(Vec::new()), MapWriterOptions::default());
        assert!(writer.write_all(&[1]).is_err());
    }
}
