//! Decoding tag bodies with compiled plans.
//!
//! Each field is read at `record base + field offset`. Reference arrays read their `(count, pointer)` header
//! in place and their elements from wherever the pointer leads, element `i` starting at `start + i * length`.
//! Every read is bounds checked against the buffer; failures name the field they happened in.

use byteorder::{ByteOrder, LittleEndian};
use indexmap::IndexMap;
use tracing::{instrument, trace};

use crate::error::{CorruptTagError, Corruption};
use crate::layout::TagLayout;
use crate::offset::{Magics, TagFrame};
use crate::schema::{DecodePlan, FieldOp, Schema, REFERENCE_ARRAY_HEADER};
use crate::store::Tag;
use crate::types::{TagId, TagIndexEntry};
use crate::value::{Record, Value};

/// `len` bytes of `buffer` starting at `offset`
pub(crate) fn bytes_at(buffer: &[u8], offset: i64, len: usize) -> Result<&[u8], Corruption> {
    let out_of_bounds = || Corruption::OutOfBounds {
        offset,
        len,
        available: buffer.len(),
    };

    let start = usize::try_from(offset).map_err(|_| out_of_bounds())?;
    let end = start.checked_add(len).ok_or_else(out_of_bounds)?;
    buffer.get(start..end).ok_or_else(out_of_bounds)
}

/// A decode failure and the fields it happened under, innermost first
#[derive(Debug)]
struct Fault {
    trail: Vec<String>,
    reason: Corruption,
}

impl Fault {
    fn within(mut self, segment: String) -> Self {
        self.trail.push(segment);
        self
    }

    /// The trail in property path syntax
    fn path(&self) -> String {
        let mut path = String::new();
        for segment in self.trail.iter().rev() {
            if !path.is_empty() && !segment.starts_with('[') {
                path.push('.');
            }
            path.push_str(segment);
        }
        path
    }
}

impl From<Corruption> for Fault {
    fn from(reason: Corruption) -> Self {
        Fault {
            trail: Vec::new(),
            reason,
        }
    }
}

struct Decoder<'a> {
    buffer: &'a [u8],
    frame: TagFrame,
}

impl Decoder<'_> {
    fn record(&self, plan: &DecodePlan, at: i64, length: usize) -> Result<Record, Fault> {
        // The inline part of the record has to be there even if some fields are never read
        bytes_at(self.buffer, at, length)?;

        let mut fields = IndexMap::with_capacity(plan.fields.len());
        for field in &plan.fields {
            let value = self
                .field(&field.op, at + field.offset as i64)
                .map_err(|f| f.within(field.name.clone()))?;
            fields.insert(field.name.clone(), value);
        }
        Ok(Record::new(plan.name.clone(), fields))
    }

    fn field(&self, op: &FieldOp, at: i64) -> Result<Value, Fault> {
        Ok(match op {
            FieldOp::Primitive(ty) => ty.read(bytes_at(self.buffer, at, ty.size())?),
            FieldOp::PrimitiveArray { element, count } => {
                let bytes = bytes_at(self.buffer, at, element.size() * count)?;
                Value::Array(
                    bytes
                        .chunks_exact(element.size())
                        .map(|chunk| element.read(chunk))
                        .collect(),
                )
            }
            FieldOp::String { max_length } => {
                let bytes = bytes_at(self.buffer, at, *max_length)?;
                let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
                Value::String(String::from_utf8_lossy(&bytes[..end]).into_owned())
            }
            FieldOp::TagRef => {
                Value::TagRef(TagId(LittleEndian::read_u32(bytes_at(self.buffer, at, 4)?)))
            }
            FieldOp::Record(plan) => Value::Record(self.record(
                plan,
                at,
                plan.fixed_length().unwrap_or_default(),
            )?),
            FieldOp::ReferenceArray { element, basis } => {
                let header = bytes_at(self.buffer, at, REFERENCE_ARRAY_HEADER)?;
                let count = LittleEndian::read_i32(&header[0..4]);
                let pointer = LittleEndian::read_i32(&header[4..8]);

                if count == 0 {
                    return Ok(Value::Array(Vec::new()));
                }
                let elements = usize::try_from(count).map_err(|_| Corruption::NegativeCount(count))?;

                let length = element.fixed_length().unwrap_or_default();
                let start = self.frame.locate(*basis, pointer)?;
                let overflow = || Corruption::CountOverflow {
                    count,
                    element_length: length,
                    offset: start,
                    available: self.buffer.len(),
                };
                // Zero length elements take no room, so the count alone has to be bounded
                if length == 0 && elements > self.buffer.len() {
                    return Err(overflow().into());
                }
                let total = elements.checked_mul(length).ok_or_else(overflow)?;
                bytes_at(self.buffer, start, total).map_err(|_| overflow())?;

                trace!(
                    "reference array of {count} `{}` at {start:#x}",
                    element.name
                );

                let mut values = Vec::with_capacity(elements);
                for i in 0..elements {
                    let record = self
                        .record(element, start + (i * length) as i64, length)
                        .map_err(|f| f.within(format!("[{i}]")))?;
                    values.push(Value::Record(record));
                }
                Value::Array(values)
            }
        })
    }
}

/// Decode one record of `plan` sitting at `frame.base` inside `buffer`.
///
/// `length` is the inline length of the record, used when the plan has no fixed length of its own. On failure
/// the returned error carries the path of the failing field and the reason.
pub fn decode_record(
    plan: &DecodePlan,
    buffer: &[u8],
    frame: &TagFrame,
    length: usize,
) -> Result<Record, (String, Corruption)> {
    let decoder = Decoder {
        buffer,
        frame: *frame,
    };
    let length = plan.fixed_length().unwrap_or(length);
    decoder
        .record(plan, frame.base as i64, length)
        .map_err(|fault| (fault.path(), fault.reason))
}

/// Decode the tag described by `entry` out of `buffer`.
///
/// The entry's offset is resolved with `magics` to find the tag body; its stored value is the origin of tag
/// internal pointers.
#[instrument(skip_all, fields(tag = %entry.id, type_code = %entry.type_code))]
pub fn decode_tag(
    plan: &DecodePlan,
    buffer: &[u8],
    entry: &TagIndexEntry,
    name: impl Into<String>,
    magics: &Magics,
) -> Result<Tag, CorruptTagError> {
    let corrupt = |field: String, reason: Corruption| CorruptTagError {
        tag: entry.id,
        type_code: entry.type_code,
        field,
        reason,
    };

    let base = entry
        .offset
        .value(magics)
        .map_err(|reason| corrupt(plan.name.clone(), reason))?;
    let base = usize::try_from(base).map_err(|_| {
        corrupt(
            plan.name.clone(),
            Corruption::OutOfBounds {
                offset: base.into(),
                len: entry.data_size as usize,
                available: buffer.len(),
            },
        )
    })?;

    let frame = TagFrame::new(*magics, base, entry.offset.original());
    let body = decode_record(plan, buffer, &frame, entry.data_size as usize).map_err(
        |(field, reason)| {
            let field = if field.is_empty() {
                plan.name.clone()
            } else {
                field
            };
            corrupt(field, reason)
        },
    )?;

    Ok(Tag::new(entry.id, entry.type_code, name.into(), body))
}

/// Decode the tag described by `entry` as a `T`
pub fn decode<T: TagLayout>(
    schema: &Schema,
    buffer: &[u8],
    entry: &TagIndexEntry,
    magics: &Magics,
) -> crate::error::Result<T> {
    let plan = schema.plan_of::<T>()?;
    let tag = decode_tag(&plan, buffer, entry, "", magics)?;
    Ok(T::from_record(tag.body())?)
}
