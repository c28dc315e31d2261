//! In-place patching of tag fields addressed by property paths.
//!
//! A [`MapPatcher`] holds the only mutable borrow of a [`MapArchive`], so patches are never applied while
//! anything else reads the buffer. Offsets are resolved against the live bytes, which means a patch that
//! rewrites a reference array header changes where later patches in the same batch land.

use tracing::{debug, instrument, warn};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::archive::MapArchive;
use crate::error::{CorruptTagError, Corruption, Error, PathError, Result};
use crate::layout::Primitive;
use crate::path::{resolve_offset, PropertyPath, ResolvedField};
use crate::schema::{FieldOp, Schema};
use crate::types::TagId;

/// A value to store into a field
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(untagged))]
pub enum PatchValue {
    Integer(i64),
    Float(f64),
    Text(String),
    /// Raw bytes, written as they are
    Bytes(Vec<u8>),
}

/// One field of one tag to overwrite
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TagPatch {
    pub tag: TagId,
    pub path: String,
    pub value: PatchValue,
}

/// A patch that could not be applied
#[derive(Debug)]
pub struct PatchFailure {
    /// Position of the patch in the batch
    pub index: usize,
    pub tag: TagId,
    pub path: String,
    pub error: Error,
}

/// Outcome of [`MapPatcher::apply_all`]
#[derive(Debug, Default)]
pub struct PatchReport {
    pub applied: usize,
    pub failed: Vec<PatchFailure>,
}

impl PatchReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Writes values into the tags of a map
#[derive(Debug)]
pub struct MapPatcher<'a> {
    archive: &'a mut MapArchive,
    schema: &'a Schema,
}

impl<'a> MapPatcher<'a> {
    pub fn new(archive: &'a mut MapArchive, schema: &'a Schema) -> Self {
        Self { archive, schema }
    }

    /// Where `path` of tag `tag` currently lives, as a position in the map
    pub fn resolve(&self, tag: TagId, path: &PropertyPath) -> Result<(i64, ResolvedField)> {
        let entry = self.archive.entry(tag).ok_or(Error::TagNotFound(tag))?;
        let plan = self.schema.plan_for(entry.type_code)?;
        let frame = self
            .archive
            .frame(entry)
            .map_err(|reason| CorruptTagError {
                tag,
                type_code: entry.type_code,
                field: plan.name.clone(),
                reason,
            })?;

        let field = resolve_offset(&plan, path, self.archive.data(), &frame)?;
        Ok((field.position(&frame), field))
    }

    /// Apply one patch, returning the position it was written at
    #[instrument(skip(self, patch), fields(tag = %patch.tag, path = %patch.path), err)]
    pub fn apply(&mut self, patch: &TagPatch) -> Result<i64> {
        let path: PropertyPath = patch.path.parse()?;
        let (position, field) = self.resolve(patch.tag, &path)?;
        let bytes = encode(&field.leaf, &patch.value, &path)?;
        self.write_at(&path, position, &bytes)?;
        debug!("wrote {} bytes at {position:#x}", bytes.len());
        Ok(position)
    }

    /// Apply every patch in order. Failures are recorded and do not stop the batch.
    pub fn apply_all(&mut self, patches: &[TagPatch]) -> PatchReport {
        let mut report = PatchReport::default();
        for (index, patch) in patches.iter().enumerate() {
            match self.apply(patch) {
                Ok(_) => report.applied += 1,
                Err(error) => {
                    warn!("patch {index} not applied: {error}");
                    report.failed.push(PatchFailure {
                        index,
                        tag: patch.tag,
                        path: patch.path.clone(),
                        error,
                    });
                }
            }
        }
        report
    }

    /// Overwrite a field with raw bytes, which must be exactly as long as the field
    pub fn write_bytes(&mut self, tag: TagId, path: &PropertyPath, bytes: &[u8]) -> Result<i64> {
        let (position, field) = self.resolve(tag, path)?;
        if bytes.len() != field.size() {
            return Err(PathError::ValueMismatch {
                path: path.to_string(),
                expected: format!("{} bytes", field.size()),
            }
            .into());
        }
        self.write_at(path, position, bytes)?;
        Ok(position)
    }

    fn write_at(&mut self, path: &PropertyPath, position: i64, bytes: &[u8]) -> Result<()> {
        let data = self.archive.data_mut();
        let range = usize::try_from(position)
            .ok()
            .and_then(|start| Some(start..start.checked_add(bytes.len())?))
            .filter(|range| range.end <= data.len());

        match range {
            Some(range) => {
                data[range].copy_from_slice(bytes);
                Ok(())
            }
            None => Err(PathError::Unreadable {
                segment: path.to_string(),
                reason: Corruption::OutOfBounds {
                    offset: position,
                    len: bytes.len(),
                    available: data.len(),
                },
            }
            .into()),
        }
    }
}

fn mismatch(path: &PropertyPath, expected: impl Into<String>) -> PathError {
    PathError::ValueMismatch {
        path: path.to_string(),
        expected: expected.into(),
    }
}

/// Little-endian bytes of `value` stored as `leaf`
fn encode(leaf: &FieldOp, value: &PatchValue, path: &PropertyPath) -> Result<Vec<u8>, PathError> {
    match (leaf, value) {
        (FieldOp::Primitive(ty), PatchValue::Integer(v)) => encode_integer(*ty, *v, path),
        (FieldOp::Primitive(ty), PatchValue::Float(v)) => match ty {
            Primitive::F32 if !v.is_finite() || v.abs() <= f32::MAX as f64 => {
                Ok((*v as f32).to_le_bytes().to_vec())
            }
            Primitive::F64 => Ok(v.to_le_bytes().to_vec()),
            _ => Err(mismatch(path, format!("a value that fits in {}", ty.name()))),
        },
        (FieldOp::TagRef, PatchValue::Integer(v)) => {
            // -1 is accepted for the "no tag" sentinel
            let id = u32::try_from(*v)
                .ok()
                .or((*v == -1).then_some(TagId::INVALID.0))
                .ok_or_else(|| mismatch(path, "a tag id"))?;
            Ok(id.to_le_bytes().to_vec())
        }
        (FieldOp::String { max_length }, PatchValue::Text(text)) => {
            if text.len() > *max_length {
                return Err(mismatch(
                    path,
                    format!("a string of at most {max_length} bytes"),
                ));
            }
            let mut bytes = text.as_bytes().to_vec();
            bytes.resize(*max_length, 0);
            Ok(bytes)
        }
        (FieldOp::Record(_) | FieldOp::ReferenceArray { .. }, _) => Err(PathError::UnsupportedLeaf {
            path: path.to_string(),
            leaf: leaf.describe(),
        }),
        (_, PatchValue::Bytes(bytes)) if bytes.len() == leaf.size() => Ok(bytes.clone()),
        (_, PatchValue::Bytes(_)) => Err(mismatch(path, format!("{} bytes", leaf.size()))),
        (FieldOp::PrimitiveArray { .. }, _) => {
            Err(mismatch(path, format!("{} bytes", leaf.size())))
        }
        _ => Err(mismatch(path, format!("a value for a {}", leaf.describe()))),
    }
}

fn encode_integer(ty: Primitive, v: i64, path: &PropertyPath) -> Result<Vec<u8>, PathError> {
    let out_of_range = || mismatch(path, format!("a value that fits in {}", ty.name()));
    Ok(match ty {
        Primitive::U8 => u8::try_from(v).map_err(|_| out_of_range())?.to_le_bytes().to_vec(),
        Primitive::I8 => i8::try_from(v).map_err(|_| out_of_range())?.to_le_bytes().to_vec(),
        Primitive::U16 => u16::try_from(v).map_err(|_| out_of_range())?.to_le_bytes().to_vec(),
        Primitive::I16 => i16::try_from(v).map_err(|_| out_of_range())?.to_le_bytes().to_vec(),
        Primitive::U32 => u32::try_from(v).map_err(|_| out_of_range())?.to_le_bytes().to_vec(),
        Primitive::I32 => i32::try_from(v).map_err(|_| out_of_range())?.to_le_bytes().to_vec(),
        Primitive::U64 => u64::try_from(v).map_err(|_| out_of_range())?.to_le_bytes().to_vec(),
        Primitive::I64 => v.to_le_bytes().to_vec(),
        Primitive::F32 => (v as f32).to_le_bytes().to_vec(),
        Primitive::F64 => (v as f64).to_le_bytes().to_vec(),
    })
}
