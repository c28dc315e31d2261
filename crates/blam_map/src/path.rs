//! Property paths and the offsets they point at.
//!
//! A property path names one field inside a tag, e.g. `SubValues[1].SubSubTags[0].Value`. Resolving a path
//! walks the same [`DecodePlan`] the decoder uses and reproduces the decoder's offset arithmetic, so the
//! resulting offset is exactly where the decoder read that field from.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use byteorder::{ByteOrder, LittleEndian};
use winnow::ascii::digit1;
use winnow::combinator::{cut_err, preceded, repeat, terminated};
use winnow::prelude::*;
use winnow::token::take_while;
use winnow::ModalResult;

use crate::decode::bytes_at;
use crate::error::{Corruption, PathError};
use crate::offset::TagFrame;
use crate::schema::{DecodePlan, FieldOp};

/// How a step reaches into its field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Direct,
    ElementAt(usize),
}

/// One `Name[index]...` segment of a path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathStep {
    pub field: String,
    pub indices: Vec<usize>,
}

impl PathStep {
    /// Access applied to the field itself
    pub fn access(&self) -> Access {
        match self.indices.first() {
            Some(&index) => Access::ElementAt(index),
            None => Access::Direct,
        }
    }
}

/// A parsed property path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyPath {
    source: String,
    steps: Vec<PathStep>,
}

impl PropertyPath {
    pub fn steps(&self) -> &[PathStep] {
        &self.steps
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl fmt::Display for PropertyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl FromStr for PropertyPath {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let steps = parse_path.parse(s).map_err(|e| PathError::Syntax {
            path: s.to_owned(),
            offset: e.offset(),
        })?;

        Ok(PropertyPath {
            source: s.to_owned(),
            steps,
        })
    }
}

fn field_name<'s>(s: &mut &'s str) -> ModalResult<&'s str> {
    take_while(1.., |c: char| c.is_ascii_alphanumeric() || c == '_')
        .verify(|name: &str| !name.starts_with(|c: char| c.is_ascii_digit()))
        .parse_next(s)
}

fn index(s: &mut &str) -> ModalResult<usize> {
    // Once a bracket is open the index has to follow
    preceded(
        '[',
        cut_err(terminated(digit1.try_map(|d: &str| d.parse::<usize>()), ']')),
    )
    .parse_next(s)
}

fn step(s: &mut &str) -> ModalResult<PathStep> {
    (field_name, repeat(0.., index))
        .map(|(field, indices): (&str, Vec<usize>)| PathStep {
            field: field.to_owned(),
            indices,
        })
        .parse_next(s)
}

fn parse_path(s: &mut &str) -> ModalResult<Vec<PathStep>> {
    let first = step.parse_next(s)?;
    let rest: Vec<PathStep> = repeat(0.., preceded('.', cut_err(step))).parse_next(s)?;
    Ok(std::iter::once(first).chain(rest).collect())
}

/// Where a field lives inside a tag
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedField {
    /// Offset of the field relative to the start of the tag body
    pub offset: i64,

    /// What is stored there
    pub leaf: FieldOp,
}

impl ResolvedField {
    /// Number of bytes the field occupies
    pub fn size(&self) -> usize {
        self.leaf.size()
    }

    /// Buffer position of the field
    pub fn position(&self, frame: &TagFrame) -> i64 {
        frame.base as i64 + self.offset
    }
}

/// Resolve `path` against the tag described by `plan` sitting at `frame` inside `live`.
///
/// Reference array headers are read from `live`, since where an array lives differs per tag instance.
pub fn resolve_offset(
    plan: &Arc<DecodePlan>,
    path: &PropertyPath,
    live: &[u8],
    frame: &TagFrame,
) -> Result<ResolvedField, PathError> {
    let mut offset = 0i64;
    let mut leaf = FieldOp::Record(plan.clone());
    let mut segment = String::new();

    for step in path.steps() {
        let record = match &leaf {
            FieldOp::Record(record) => record,
            FieldOp::ReferenceArray { .. } | FieldOp::PrimitiveArray { .. } => {
                return Err(PathError::MissingIndex { segment })
            }
            _ => return Err(PathError::NotARecord { segment }),
        };

        let field = record
            .field(&step.field)
            .ok_or_else(|| PathError::UnknownField {
                segment: step.field.clone(),
                ty: record.name.clone(),
            })?;
        offset += field.offset as i64;
        let next = field.op.clone();

        if !segment.is_empty() {
            segment.push('.');
        }
        segment.push_str(&step.field);
        leaf = next;

        for &index in &step.indices {
            leaf = match leaf {
                FieldOp::PrimitiveArray { element, count } => {
                    if index >= count {
                        return Err(PathError::IndexOutOfRange {
                            segment,
                            index,
                            count,
                        });
                    }
                    offset += (index * element.size()) as i64;
                    FieldOp::Primitive(element)
                }
                FieldOp::ReferenceArray { element, basis } => {
                    let header = frame.base as i64 + offset;
                    let unreadable = |reason| PathError::Unreadable {
                        segment: segment.clone(),
                        reason,
                    };

                    let bytes = bytes_at(live, header, 8).map_err(unreadable)?;
                    let count = LittleEndian::read_i32(&bytes[0..4]);
                    let pointer = LittleEndian::read_i32(&bytes[4..8]);

                    let count = usize::try_from(count)
                        .map_err(|_| unreadable(Corruption::NegativeCount(count)))?;
                    if index >= count {
                        return Err(PathError::IndexOutOfRange {
                            segment,
                            index,
                            count,
                        });
                    }

                    let start = frame.locate(basis, pointer).map_err(unreadable)?;
                    let length = element.fixed_length().unwrap_or_default();
                    offset = start - frame.base as i64 + (index * length) as i64;
                    FieldOp::Record(element)
                }
                _ => return Err(PathError::NotIndexable { segment }),
            };
            segment.push_str(&format!("[{index}]"));
        }
    }

    Ok(ResolvedField { offset, leaf })
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use crate::error::PathError;
    use crate::path::{Access, PathStep, PropertyPath};

    #[test]
    fn parses_nested_paths() {
        let path: PropertyPath = "SubValues[1].SubSubTags[0].Value".parse().expect("valid");
        assert_eq!(
            path.steps(),
            &[
                PathStep {
                    field: "SubValues".into(),
                    indices: vec![1]
                },
                PathStep {
                    field: "SubSubTags".into(),
                    indices: vec![0]
                },
                PathStep {
                    field: "Value".into(),
                    indices: vec![]
                },
            ]
        );
        assert_eq!(path.steps()[0].access(), Access::ElementAt(1));
        assert_eq!(path.steps()[2].access(), Access::Direct);
        assert_eq!(path.to_string(), "SubValues[1].SubSubTags[0].Value");
    }

    #[test]
    fn parses_repeated_indices() {
        let path: PropertyPath = "Grid[2][3]".parse().expect("valid");
        assert_eq!(path.steps()[0].indices, vec![2, 3]);
    }

    #[test]
    fn rejects_malformed_paths() {
        for (input, offset) in [
            ("", 0),
            ("Value.", 6),
            ("Values[x]", 7),
            ("Values[1", 8),
            ("Values[1]x", 9),
            ("1Value", 0),
            ("A..B", 2),
            ("A.1B", 2),
            ("Sub Values", 3),
        ] {
            match input.parse::<PropertyPath>() {
                Err(PathError::Syntax { path, offset: at }) => {
                    assert_eq!(path, input);
                    assert_eq!(at, offset, "offset for {input:?}");
                }
                other => panic!("expected a syntax error for {input:?}, got {other:?}"),
            }
        }
    }
}
