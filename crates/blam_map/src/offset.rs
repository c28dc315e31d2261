//! Offsets and the relocation bases they are stored in.
//!
//! A map stores locations in several incompatible bases. Reading one is a two step affair: an [`Offset`]
//! captures the stored value and its basis as plain data, and [`Offset::value`] turns it into a position
//! once the archive's [`Magics`] are known. Offsets never hold a reference to the archive they came from.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::Corruption;

/// The relocation basis of an [`Offset`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OffsetKind {
    /// Raw absolute position, no relocation
    Byte,

    /// Top level index and tag locations, relative to the primary magic
    Primary,

    /// Pointers inside tag bodies, relative to the secondary magic of the owning archive
    Secondary,

    /// Secondary pointer whose magic was already known when it was captured
    SecondaryFixed(i32),

    /// Pointer relative to the stored offset of the tag that owns it
    TagInternal { origin: i32 },
}

impl OffsetKind {
    /// Short name of the basis, used in diagnostics
    pub const fn name(&self) -> &'static str {
        match self {
            OffsetKind::Byte => "byte",
            OffsetKind::Primary => "primary",
            OffsetKind::Secondary | OffsetKind::SecondaryFixed(_) => "secondary",
            OffsetKind::TagInternal { .. } => "tag internal",
        }
    }
}

/// Relocation constants of one archive.
///
/// Both magics are discovered during loading, the primary one from the index header and the secondary one
/// from the map header once the index has been read.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Magics {
    pub primary: Option<i32>,
    pub secondary: Option<i32>,
}

impl Magics {
    /// Magics with both constants known
    pub const fn new(primary: i32, secondary: i32) -> Self {
        Self {
            primary: Some(primary),
            secondary: Some(secondary),
        }
    }

    /// Magics before anything about the archive is known
    pub const fn unresolved() -> Self {
        Self {
            primary: None,
            secondary: None,
        }
    }

    pub const fn with_primary(self, primary: i32) -> Self {
        Self {
            primary: Some(primary),
            ..self
        }
    }

    pub const fn with_secondary(self, secondary: i32) -> Self {
        Self {
            secondary: Some(secondary),
            ..self
        }
    }

    /// Whether every basis can be dereferenced
    pub const fn is_resolved(&self) -> bool {
        self.primary.is_some() && self.secondary.is_some()
    }
}

/// A stored location together with the basis it was stored in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Offset {
    kind: OffsetKind,
    original: i32,
}

impl Offset {
    pub const fn byte(original: i32) -> Self {
        Self {
            kind: OffsetKind::Byte,
            original,
        }
    }

    pub const fn primary(original: i32) -> Self {
        Self {
            kind: OffsetKind::Primary,
            original,
        }
    }

    pub const fn secondary(original: i32) -> Self {
        Self {
            kind: OffsetKind::Secondary,
            original,
        }
    }

    /// A secondary offset resolved against a magic known up front, e.g. one borrowed from a shared map
    pub const fn secondary_with_magic(original: i32, magic: i32) -> Self {
        Self {
            kind: OffsetKind::SecondaryFixed(magic),
            original,
        }
    }

    /// An offset relative to the tag located at `owner`
    pub const fn tag_internal(original: i32, owner: &Offset) -> Self {
        Self {
            kind: OffsetKind::TagInternal {
                origin: owner.original,
            },
            original,
        }
    }

    pub const fn kind(&self) -> OffsetKind {
        self.kind
    }

    /// The value exactly as it was stored
    pub const fn original(&self) -> i32 {
        self.original
    }

    /// Derive the relocated value of this offset.
    ///
    /// Primary and secondary offsets fail with [`Corruption::UnresolvedMagic`] until `magics` carries the
    /// matching constant.
    pub fn value(&self, magics: &Magics) -> Result<i32, Corruption> {
        match self.kind {
            OffsetKind::Byte => Ok(self.original),
            OffsetKind::Primary => magics
                .primary
                .map(|magic| magic.wrapping_add(self.original))
                .ok_or(Corruption::UnresolvedMagic(self.kind.name())),
            OffsetKind::Secondary => magics
                .secondary
                .map(|magic| self.original.wrapping_sub(magic))
                .ok_or(Corruption::UnresolvedMagic(self.kind.name())),
            OffsetKind::SecondaryFixed(magic) => Ok(self.original.wrapping_sub(magic)),
            OffsetKind::TagInternal { origin } => Ok(self.original.wrapping_sub(origin)),
        }
    }
}

/// How the pointer of a reference array is stored.
///
/// Which basis applies is a property of the tag type, so it is declared per field.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(rename_all = "snake_case")
)]
pub enum PointerBasis {
    #[default]
    Secondary,
    TagInternal,
}

/// Where a tag sits in the buffer being decoded or patched.
///
/// Turns pointers read from the tag into buffer positions. The decoder and the property path resolver both
/// go through [`TagFrame::locate`] so that they always agree on where a reference array lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagFrame {
    pub magics: Magics,

    /// Position of the tag body in the buffer
    pub base: usize,

    /// Stored (unrelocated) offset of the tag, the origin of tag internal pointers
    pub origin: i32,
}

impl TagFrame {
    pub const fn new(magics: Magics, base: usize, origin: i32) -> Self {
        Self {
            magics,
            base,
            origin,
        }
    }

    /// A frame for a buffer holding nothing but the body of one tag
    pub const fn detached(magics: Magics, origin: i32) -> Self {
        Self::new(magics, 0, origin)
    }

    /// Capture a stored pointer in the given basis
    pub const fn offset(&self, basis: PointerBasis, pointer: i32) -> Offset {
        match basis {
            PointerBasis::Secondary => Offset::secondary(pointer),
            PointerBasis::TagInternal => Offset {
                kind: OffsetKind::TagInternal {
                    origin: self.origin,
                },
                original: pointer,
            },
        }
    }

    /// Buffer position a stored pointer refers to
    pub fn locate(&self, basis: PointerBasis, pointer: i32) -> Result<i64, Corruption> {
        let value = self.offset(basis, pointer).value(&self.magics)? as i64;
        Ok(match basis {
            PointerBasis::Secondary => value,
            PointerBasis::TagInternal => self.base as i64 + value,
        })
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use crate::error::Corruption;
    use crate::offset::{Magics, Offset, OffsetKind, PointerBasis, TagFrame};

    #[test]
    fn byte_offset_is_unrelocated() {
        let offset = Offset::byte(0x1234);
        assert_eq!(offset.value(&Magics::unresolved()), Ok(0x1234));
        assert_eq!(offset.original(), 0x1234);
    }

    #[test]
    fn primary_adds_magic() {
        for (magic, stored) in [(0, 0), (100, 24), (-0x0006_0000, 0x7FFF_FFFF), (i32::MAX, 1)] {
            let magics = Magics::new(magic, 0);
            assert_eq!(
                Offset::primary(stored).value(&magics),
                Ok(magic.wrapping_add(stored))
            );
        }
        assert_eq!(Offset::primary(10).value(&Magics::new(-20, 0)), Ok(-10));
    }

    #[test]
    fn secondary_subtracts_magic() {
        for (magic, stored) in [(0, 0), (100, 24), (0x10, -0x10), (i32::MIN, 1)] {
            let magics = Magics::new(0, magic);
            assert_eq!(
                Offset::secondary(stored).value(&magics),
                Ok(stored.wrapping_sub(magic))
            );
        }
        assert_eq!(Offset::secondary(24).value(&Magics::new(0, 100)), Ok(-76));
    }

    #[test]
    fn secondary_with_magic_ignores_archive() {
        let offset = Offset::secondary_with_magic(0x500, 0x100);
        assert_eq!(offset.value(&Magics::unresolved()), Ok(0x400));
        assert_eq!(offset.kind().name(), "secondary");
    }

    #[test]
    fn unresolved_magics_are_an_error() {
        let magics = Magics::unresolved().with_primary(8);
        assert_eq!(Offset::primary(1).value(&magics), Ok(9));
        assert_eq!(
            Offset::secondary(1).value(&magics),
            Err(Corruption::UnresolvedMagic("secondary"))
        );
        assert_eq!(
            Offset::primary(1).value(&Magics::unresolved()),
            Err(Corruption::UnresolvedMagic("primary"))
        );
    }

    #[test]
    fn tag_internal_is_relative_to_owner() {
        let owner = Offset::primary(0x1000);
        let offset = Offset::tag_internal(0x1040, &owner);
        assert_eq!(offset.kind(), OffsetKind::TagInternal { origin: 0x1000 });
        assert_eq!(offset.value(&Magics::unresolved()), Ok(0x40));
    }

    #[test]
    fn frame_locates_both_bases() {
        let frame = TagFrame::new(Magics::new(0, 0x100), 0x20, 0x1000);
        assert_eq!(frame.locate(PointerBasis::Secondary, 0x180), Ok(0x80));
        assert_eq!(frame.locate(PointerBasis::TagInternal, 0x1010), Ok(0x30));

        let detached = TagFrame::detached(Magics::unresolved(), 0x1000);
        assert_eq!(detached.locate(PointerBasis::TagInternal, 0x1010), Ok(0x10));
        assert!(detached.locate(PointerBasis::Secondary, 0x1010).is_err());
    }
}
