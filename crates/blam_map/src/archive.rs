//! Types for reading map archives

use std::fmt;
use std::io::{Cursor, Seek, SeekFrom};
use std::sync::Arc;

use binrw::BinRead;
use byteorder::ReadBytesExt;
use indexmap::IndexMap;
use tracing::{debug, instrument, warn};

use crate::decode::{bytes_at, decode_tag};
use crate::error::{CorruptTagError, Corruption, Error, Result};
use crate::offset::{Magics, Offset, TagFrame};
use crate::patch::MapPatcher;
use crate::schema::{DecodePlan, Schema};
use crate::store::Tag;
use crate::types::{
    IndexHeader, MapHeader, TagClassEntry, TagId, TagIndexEntry, TagIndexRecord, TypeCode,
};

/// A map file held in memory together with its index
///
/// ```no_run
/// fn list_map_contents(path: &str) -> blam_map::error::Result<()> {
///     let map = blam_map::MapArchive::new(std::fs::read(path)?)?;
///
///     for entry in map.entries() {
///         println!("{} {} {}", entry.id, entry.type_code, map.name(entry.id).unwrap_or_default());
///     }
///
///     Ok(())
/// }
/// ```
pub struct MapArchive {
    data: Vec<u8>,
    header: MapHeader,
    index_header: IndexHeader,
    magics: Magics,
    classes: Vec<TagClassEntry>,
    entries: IndexMap<TagId, TagIndexEntry>,
    names: Vec<String>,
}

impl fmt::Debug for MapArchive {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("MapArchive")
            .field("size", &self.data.len())
            .field("magics", &self.magics)
            .field("tags", &self.entries.len())
            .finish()
    }
}

impl MapArchive {
    /// Read the header and index of a map held in `data`.
    #[instrument(skip_all, fields(size = data.len()))]
    pub fn new(data: Vec<u8>) -> Result<MapArchive> {
        match Self::load(&data) {
            Ok(archive) => Ok(MapArchive { data, ..archive }),
            Err(err) => {
                warn!("unable to read map index: {err}");
                Err(Error::InvalidArchive)
            }
        }
    }

    pub fn header(&self) -> &MapHeader {
        &self.header
    }

    pub fn index_header(&self) -> &IndexHeader {
        &self.index_header
    }

    /// The relocation constants discovered while loading
    pub fn magics(&self) -> Magics {
        self.magics
    }

    /// Class hierarchy of every class present in the map
    pub fn classes(&self) -> &[TagClassEntry] {
        &self.classes
    }

    pub fn class(&self, code: TypeCode) -> Option<&TagClassEntry> {
        self.classes.iter().find(|c| c.class == code)
    }

    /// Number of tags in the index
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the index contains no tags
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: TagId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn entry(&self, id: TagId) -> Option<&TagIndexEntry> {
        self.entries.get(&id)
    }

    /// Index entries in the order they are stored
    pub fn entries(&self) -> impl Iterator<Item = &TagIndexEntry> {
        self.entries.values()
    }

    /// Name of a tag, if the map carries a name table
    pub fn name(&self, id: TagId) -> Option<&str> {
        self.entries
            .get_index_of(&id)
            .and_then(|i| self.names.get(i))
            .map(String::as_str)
            .filter(|name| !name.is_empty())
    }

    /// Buffer position of a tag body
    pub fn frame(&self, entry: &TagIndexEntry) -> Result<TagFrame, Corruption> {
        let base = entry.offset.value(&self.magics)?;
        let base = usize::try_from(base).map_err(|_| Corruption::OutOfBounds {
            offset: base.into(),
            len: entry.data_size as usize,
            available: self.data.len(),
        })?;
        Ok(TagFrame::new(self.magics, base, entry.offset.original()))
    }

    /// The body of a tag as recorded in the index
    pub fn tag_bytes(&self, id: TagId) -> Option<&[u8]> {
        let entry = self.entry(id)?;
        self.slice(&entry.offset, entry.data_size as usize).ok()
    }

    /// `len` bytes at `offset`
    pub fn slice(&self, offset: &Offset, len: usize) -> Result<&[u8], Corruption> {
        let position = offset.value(&self.magics)?;
        bytes_at(&self.data, position.into(), len)
    }

    /// Decode the tag described by `entry` with `plan`
    pub fn decode(
        &self,
        plan: &Arc<DecodePlan>,
        entry: &TagIndexEntry,
    ) -> Result<Tag, CorruptTagError> {
        decode_tag(
            plan,
            &self.data,
            entry,
            self.name(entry.id).unwrap_or_default(),
            &self.magics,
        )
    }

    /// Patch tags of this map in place
    pub fn patcher<'a>(&'a mut self, schema: &'a Schema) -> MapPatcher<'a> {
        MapPatcher::new(self, schema)
    }

    /// The whole map
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub(crate) fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Unwrap and return the map bytes, including any patches
    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }

    fn get_classes(reader: &mut Cursor<&[u8]>, count: u32) -> Result<Vec<TagClassEntry>> {
        (0..count)
            .map(|_| TagClassEntry::read(reader).map_err(Error::from))
            .collect()
    }

    /// Index entries keyed by id, plus the table slot each kept entry came from
    fn get_entries(
        reader: &mut Cursor<&[u8]>,
        count: u32,
    ) -> Result<(IndexMap<TagId, TagIndexEntry>, Vec<usize>)> {
        let mut entries = IndexMap::with_capacity(count as usize);
        let mut slots = Vec::with_capacity(count as usize);
        for slot in 0..count as usize {
            let entry = TagIndexEntry::from(TagIndexRecord::read(reader)?);
            if entries.contains_key(&entry.id) {
                warn!("tag {} is indexed more than once, keeping the first entry", entry.id);
                continue;
            }
            entries.insert(entry.id, entry);
            slots.push(slot);
        }
        Ok((entries, slots))
    }

    fn get_names(reader: &mut Cursor<&[u8]>, count: u32) -> Result<Vec<String>> {
        (0..count)
            .map(|_| {
                let mut name_raw: Vec<u8> = Vec::new();
                loop {
                    let char = reader.read_u8()?;
                    if char == b'\0' {
                        break;
                    }
                    name_raw.push(char);
                }
                Ok(String::from_utf8_lossy(&name_raw).into_owned())
            })
            .collect()
    }

    /// Tables of `count` records of `size` bytes that cannot fit are rejected before allocating for them
    fn check_table(data: &[u8], count: u32, size: u32) -> Result<()> {
        if count as u64 * size as u64 > data.len() as u64 {
            return Err(Error::CustomError(format!(
                "table of {count} entries does not fit in a {} byte map",
                data.len()
            )));
        }
        Ok(())
    }

    fn load(data: &[u8]) -> Result<MapArchive> {
        let mut reader = Cursor::new(data);

        let header = MapHeader::read(&mut reader)?;
        if header.file_size as usize != data.len() {
            warn!(
                "header claims {} bytes but the map is {} bytes",
                header.file_size,
                data.len()
            );
        }

        reader.seek(SeekFrom::Start(header.index_offset.into()))?;
        let index_header = IndexHeader::read(&mut reader)?;

        let primary = (header.index_offset as i32).wrapping_sub(index_header.primary_magic_constant);
        let magics = Magics::unresolved().with_primary(primary);

        Self::check_table(data, index_header.tag_list_count, TagClassEntry::SIZE)?;
        let classes = Self::get_classes(&mut reader, index_header.tag_list_count)?;

        let table = Offset::primary(index_header.tag_index_offset)
            .value(&magics)
            .map_err(|reason| Error::CustomError(reason.to_string()))?;
        let table = u64::try_from(table)
            .map_err(|_| Error::CustomError(format!("index table at negative offset {table}")))?;
        reader.seek(SeekFrom::Start(table))?;

        Self::check_table(data, index_header.tag_index_count, TagIndexRecord::SIZE)?;
        let (entries, slots) = Self::get_entries(&mut reader, index_header.tag_index_count)?;

        // Tag bodies can only be dereferenced once the index has been read
        let secondary = header.meta_base.wrapping_sub(header.meta_offset as i32);
        let magics = magics.with_secondary(secondary);

        let names = if header.names_count == 0 {
            Vec::new()
        } else {
            Self::check_table(data, header.names_count, 1)?;
            reader.seek(SeekFrom::Start(header.names_offset.into()))?;
            let mut names = Self::get_names(&mut reader, header.names_count)?;
            if names.len() != index_header.tag_index_count as usize {
                warn!(
                    "name table holds {} names for {} index entries",
                    names.len(),
                    index_header.tag_index_count
                );
            }
            // Names are stored per table slot, including the slots of skipped duplicates
            slots
                .iter()
                .map(|&slot| names.get_mut(slot).map(std::mem::take).unwrap_or_default())
                .collect()
        };

        debug!(
            "loaded index of {} tags, primary magic {primary:#x}, secondary magic {secondary:#x}",
            entries.len()
        );

        Ok(MapArchive {
            data: Vec::new(),
            header,
            index_header,
            magics,
            classes,
            entries,
            names,
        })
    }
}
