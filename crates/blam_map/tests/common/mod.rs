#![allow(dead_code)]

use std::io::{Cursor, Write};
use std::sync::Arc;

use blam_map::error::ValueError;
use blam_map::layout::{FieldLayout, Primitive, RecordLayout, TagLayout};
use blam_map::schema::{Schema, SchemaBuilder};
use blam_map::store::{TagRef, TagStore};
use blam_map::types::{TagId, TypeCode};
use blam_map::value::Record;
use blam_map::write::{MapWriter, MapWriterOptions, DEFAULT_META_BASE};

pub const ROOT: TypeCode = TypeCode::new(*b"root");
pub const LINK: TypeCode = TypeCode::new(*b"link");
pub const JUNK: TypeCode = TypeCode::new(*b"junk");

pub const ROOT_ID: TagId = TagId(0xE000_0001);
pub const LINK_ID: TagId = TagId(0xE001_0002);
pub const JUNK_ID: TagId = TagId(0xE002_0003);
pub const CORRUPT_ID: TagId = TagId(0xE003_0004);
pub const MISSING_ID: TagId = TagId(0xDEAD_0001);
pub const SHARED_ID: TagId = TagId(0xE0FF_0009);

/// The root tag is written first, so it sits at the start of the meta section
pub const ROOT_ADDRESS: i32 = DEFAULT_META_BASE;

#[derive(Debug, Clone, PartialEq)]
pub struct SubSubTag {
    pub value: f32,
}

impl TagLayout for SubSubTag {
    const NAME: &'static str = "SubSubTag";

    fn layout() -> RecordLayout {
        RecordLayout::fixed(
            Self::NAME,
            8,
            vec![FieldLayout::primitive("Value", 0, Primitive::F32)],
        )
    }

    fn from_record(record: &Record) -> Result<Self, ValueError> {
        Ok(SubSubTag {
            value: record.get("Value")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubValue {
    pub value: f32,
    pub sub_sub_tags: Vec<SubSubTag>,
}

impl TagLayout for SubValue {
    const NAME: &'static str = "SubValue";

    fn layout() -> RecordLayout {
        RecordLayout::fixed(
            Self::NAME,
            16,
            vec![
                FieldLayout::primitive("Value", 0, Primitive::F32),
                FieldLayout::reference_array("SubSubTags", 8, SubSubTag::NAME),
            ],
        )
    }

    fn register_dependencies(schema: &mut SchemaBuilder) {
        schema.register::<SubSubTag>();
    }

    fn from_record(record: &Record) -> Result<Self, ValueError> {
        Ok(SubValue {
            value: record.get("Value")?,
            sub_sub_tags: record.records("SubSubTags")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Root {
    pub value1: i32,
    pub value2: f32,
    pub sub_values: Vec<SubValue>,
}

impl TagLayout for Root {
    const NAME: &'static str = "Root";

    fn layout() -> RecordLayout {
        RecordLayout::arbitrary(
            Self::NAME,
            vec![
                FieldLayout::primitive("Value1", 0, Primitive::I32),
                FieldLayout::primitive("Value2", 4, Primitive::F32),
                FieldLayout::reference_array("SubValues", 8, SubValue::NAME),
            ],
        )
    }

    fn register_dependencies(schema: &mut SchemaBuilder) {
        schema.register::<SubValue>();
    }

    fn from_record(record: &Record) -> Result<Self, ValueError> {
        Ok(Root {
            value1: record.get("Value1")?,
            value2: record.get("Value2")?,
            sub_values: record.records("SubValues")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Link {
    pub target: TagRef<Root>,
    pub label: String,
    pub spare: TagRef<Root>,
    pub nothing: TagRef<Root>,
    /// Filled in from the target once the store is available
    pub target_value1: Option<i32>,
}

impl TagLayout for Link {
    const NAME: &'static str = "Link";

    fn layout() -> RecordLayout {
        RecordLayout::arbitrary(
            Self::NAME,
            vec![
                FieldLayout::tag_ref("Target", 0),
                FieldLayout::string("Label", 4, 12),
                FieldLayout::tag_ref("Spare", 16),
                FieldLayout::tag_ref("Nothing", 20),
            ],
        )
    }

    fn from_record(record: &Record) -> Result<Self, ValueError> {
        Ok(Link {
            target: record.tag_ref("Target")?,
            label: record.get("Label")?,
            spare: record.tag_ref("Spare")?,
            nothing: record.tag_ref("Nothing")?,
            target_value1: None,
        })
    }

    fn populate_external(&mut self, store: &TagStore) {
        self.target_value1 = store.resolve(self.target).map(|root| root.value1);
    }
}

pub fn schema() -> Arc<Schema> {
    Arc::new(
        Schema::builder()
            .bind_tag::<Root>(ROOT)
            .bind_tag::<Link>(LINK)
            .build(),
    )
}

fn put_f32(data: &mut [u8], at: usize, value: f32) {
    data[at..at + 4].copy_from_slice(&value.to_le_bytes());
}

fn put_array(data: &mut [u8], at: usize, count: i32, pointer: i32) {
    data[at..at + 4].copy_from_slice(&count.to_le_bytes());
    data[at + 4..at + 8].copy_from_slice(&pointer.to_le_bytes());
}

/// Body of a `Root` tag loaded at `address`.
///
/// With `address == 0` the first 16 bytes are `77 00 00 00 | 3F 40 17 43 | 02 00 00 00 7C 00 00 00`.
pub fn root_body(address: i32) -> Vec<u8> {
    let mut data = vec![0u8; 0xC0];

    #[rustfmt::skip]
    let head: [u8; 8] = [
        0x77, 0x00, 0x00, 0x00,
        0x3F, 0x40, 0x17, 0x43,
    ];
    data[..8].copy_from_slice(&head);
    put_array(&mut data, 0x08, 2, address + 0x7C);

    // SubValues
    put_f32(&mut data, 0x7C, 1.5);
    put_array(&mut data, 0x84, 2, address + 0xA0);
    put_f32(&mut data, 0x8C, 2.5);
    put_array(&mut data, 0x94, 2, address + 0xB0);

    // SubSubTags
    put_f32(&mut data, 0xA0, 0.25);
    put_f32(&mut data, 0xA8, 0.5);
    put_f32(&mut data, 0xB0, 0.75);
    put_f32(&mut data, 0xB8, 0.001);

    data
}

fn link_body() -> Vec<u8> {
    let mut data = Vec::with_capacity(24);
    data.extend_from_slice(&ROOT_ID.0.to_le_bytes());
    data.extend_from_slice(b"hello\0\0\0\0\0\0\0");
    data.extend_from_slice(&MISSING_ID.0.to_le_bytes());
    data.extend_from_slice(&TagId::INVALID.0.to_le_bytes());
    data
}

/// A `Root` whose sub values would run far past the end of the map
fn corrupt_body(address: i32) -> Vec<u8> {
    let mut data = vec![0u8; 16];
    data[..4].copy_from_slice(&1i32.to_le_bytes());
    put_array(&mut data, 0x08, 0x0010_0000, address + 16);
    data
}

/// A map holding a root, a link to it, a tag of a class without a layout and a corrupt root
pub fn fixture_map() -> Vec<u8> {
    let mut map = MapWriter::new(Cursor::new(Vec::new()), MapWriterOptions::default());

    let address = map
        .start_tag(ROOT_ID, ROOT, "fixtures/root")
        .expect("start root");
    assert_eq!(address, ROOT_ADDRESS);
    map.write_all(&root_body(address)).expect("write root");

    map.start_tag(LINK_ID, LINK, "fixtures/link")
        .expect("start link");
    map.write_all(&link_body()).expect("write link");

    map.start_tag(JUNK_ID, JUNK, "fixtures/junk")
        .expect("start junk");
    map.write_all(&[0xAA; 4]).expect("write junk");

    let address = map
        .start_tag(CORRUPT_ID, ROOT, "fixtures/corrupt")
        .expect("start corrupt");
    map.write_all(&corrupt_body(address)).expect("write corrupt");

    map.set_scenario(ROOT_ID);
    map.finish().expect("finish map").into_inner()
}

/// A map standing in for a shared map, holding one root
pub fn shared_map() -> Vec<u8> {
    let mut map = MapWriter::new(
        Cursor::new(Vec::new()),
        MapWriterOptions::builder().meta_base(0x0200_0000).build(),
    );
    let address = map
        .start_tag(SHARED_ID, ROOT, "shared/root")
        .expect("start shared root");
    map.write_all(&root_body(address)).expect("write shared root");
    map.finish().expect("finish map").into_inner()
}
