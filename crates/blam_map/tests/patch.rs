mod common;

use blam_map::error::{Error, PathError, Result};
use blam_map::patch::{PatchValue, TagPatch};
use blam_map::path::PropertyPath;
use blam_map::types::TagId;
use blam_map::MapArchive;
use common::{Link, Root, LINK_ID, MISSING_ID, ROOT_ADDRESS, ROOT_ID};
use pretty_assertions::assert_eq;
use tracing_test::traced_test;

fn decode_root(map: &MapArchive) -> Result<Root> {
    let schema = common::schema();
    let entry = map.entry(ROOT_ID).copied().ok_or(Error::TagNotFound(ROOT_ID))?;
    Ok(map.decode(&schema.plan_of::<Root>()?, &entry)?.to_value()?)
}

fn decode_link(map: &MapArchive) -> Result<Link> {
    let schema = common::schema();
    let entry = map.entry(LINK_ID).copied().ok_or(Error::TagNotFound(LINK_ID))?;
    Ok(map.decode(&schema.plan_of::<Link>()?, &entry)?.to_value()?)
}

fn patch(tag: TagId, path: &str, value: PatchValue) -> TagPatch {
    TagPatch {
        tag,
        path: path.to_owned(),
        value,
    }
}

#[traced_test]
#[test]
fn patched_values_decode_back() -> Result<()> {
    let schema = common::schema();
    let mut map = MapArchive::new(common::fixture_map())?;

    {
        let mut patcher = map.patcher(&schema);
        patcher.apply(&patch(
            ROOT_ID,
            "SubValues[1].SubSubTags[1].Value",
            PatchValue::Float(2.5),
        ))?;
        patcher.apply(&patch(ROOT_ID, "Value1", PatchValue::Integer(-7)))?;
        patcher.apply(&patch(LINK_ID, "Label", PatchValue::Text("bye".into())))?;
        patcher.apply(&patch(LINK_ID, "Target", PatchValue::Integer(-1)))?;
    }

    let root = decode_root(&map)?;
    assert_eq!(root.value1, -7);
    assert_eq!(root.sub_values[1].sub_sub_tags[1].value, 2.5);
    // Neighbours are untouched
    assert_eq!(root.sub_values[1].sub_sub_tags[0].value, 0.75);

    let link = decode_link(&map)?;
    assert_eq!(link.label, "bye");
    assert!(!link.target.is_valid());

    Ok(())
}

#[traced_test]
#[test]
fn batch_continues_past_failures() -> Result<()> {
    let schema = common::schema();
    let mut map = MapArchive::new(common::fixture_map())?;

    let report = map.patcher(&schema).apply_all(&[
        patch(ROOT_ID, "Value2", PatchValue::Float(0.5)),
        patch(ROOT_ID, "SubValues[9].Value", PatchValue::Float(1.0)),
        patch(MISSING_ID, "Value1", PatchValue::Integer(1)),
        patch(ROOT_ID, "SubValues", PatchValue::Integer(1)),
        patch(ROOT_ID, "SubValues[0].Value", PatchValue::Float(4.0)),
    ]);

    assert_eq!(report.applied, 2);
    assert_eq!(
        report.failed.iter().map(|f| f.index).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );
    assert!(matches!(
        report.failed[0].error,
        Error::Path(PathError::IndexOutOfRange { index: 9, count: 2, .. })
    ));
    assert!(matches!(report.failed[1].error, Error::TagNotFound(id) if id == MISSING_ID));
    assert!(matches!(
        report.failed[2].error,
        Error::Path(PathError::UnsupportedLeaf { .. })
    ));

    let root = decode_root(&map)?;
    assert_eq!(root.value2, 0.5);
    assert_eq!(root.sub_values[0].value, 4.0);

    Ok(())
}

#[test]
fn values_are_checked_against_the_field() -> Result<()> {
    let schema = common::schema();
    let mut map = MapArchive::new(common::fixture_map())?;
    let before = map.data().to_vec();

    let mut patcher = map.patcher(&schema);
    for (path, value) in [
        ("Value1", PatchValue::Float(1.5)),
        ("Value1", PatchValue::Integer(i64::MAX)),
        ("Value2", PatchValue::Text("text".into())),
        ("Value1", PatchValue::Bytes(vec![1, 2])),
    ] {
        let result = patcher.apply(&patch(ROOT_ID, path, value));
        assert!(
            matches!(result, Err(Error::Path(PathError::ValueMismatch { .. }))),
            "{path}: {result:?}"
        );
    }
    assert!(matches!(
        patcher.apply(&patch(LINK_ID, "Label", PatchValue::Text("far too long for it".into()))),
        Err(Error::Path(PathError::ValueMismatch { .. }))
    ));
    assert!(matches!(
        patcher.apply(&patch(ROOT_ID, "Sub Values", PatchValue::Integer(1))),
        Err(Error::Path(PathError::Syntax { offset: 3, .. }))
    ));

    assert_eq!(map.data(), &before[..]);

    Ok(())
}

#[traced_test]
#[test]
fn offsets_follow_the_live_buffer() -> Result<()> {
    let schema = common::schema();
    let mut map = MapArchive::new(common::fixture_map())?;
    let mut patcher = map.patcher(&schema);

    let path: PropertyPath = "SubValues[1].SubSubTags[0].Value".parse()?;
    let (before, _) = patcher.resolve(ROOT_ID, &path)?;

    // Point the second sub value at the sub sub tags of the first one
    let header: PropertyPath = "SubValues[1].SubSubTags".parse()?;
    let mut bytes = 1i32.to_le_bytes().to_vec();
    bytes.extend_from_slice(&(ROOT_ADDRESS + 0xA0).to_le_bytes());
    patcher.write_bytes(ROOT_ID, &header, &bytes)?;

    let (after, _) = patcher.resolve(ROOT_ID, &path)?;
    assert_eq!(before - after, 0x10);

    let index_out_of_range: PropertyPath = "SubValues[1].SubSubTags[1].Value".parse()?;
    assert!(matches!(
        patcher.resolve(ROOT_ID, &index_out_of_range),
        Err(Error::Path(PathError::IndexOutOfRange { count: 1, .. }))
    ));

    let root = decode_root(&map)?;
    assert_eq!(root.sub_values[1].sub_sub_tags.len(), 1);
    assert_eq!(root.sub_values[1].sub_sub_tags[0].value, 0.25);

    Ok(())
}

#[test]
fn patch_script_from_json() -> Result<()> {
    let schema = common::schema();
    let mut map = MapArchive::new(common::fixture_map())?;

    let patches: Vec<TagPatch> = serde_json::from_str(&format!(
        r#"[
            {{ "tag": {root}, "path": "SubValues[0].SubSubTags[1].Value", "value": 8.0 }},
            {{ "tag": {link}, "path": "Label", "value": "patched" }}
        ]"#,
        root = ROOT_ID.0,
        link = LINK_ID.0
    ))
    .expect("valid patch json");

    let report = map.patcher(&schema).apply_all(&patches);
    assert!(report.is_clean());

    assert_eq!(decode_root(&map)?.sub_values[0].sub_sub_tags[1].value, 8.0);
    assert_eq!(decode_link(&map)?.label, "patched");

    Ok(())
}
