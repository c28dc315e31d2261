//! Decoded tags, their cache and cross references between them.
//!
//! A [`TagStore`] owns the map being loaded plus any shared maps it borrows tags from. Tags are decoded on
//! first request and cached for the lifetime of the store; concurrent requests for the same tag decode it
//! once. A reference that cannot be found is a miss, reported as `None`, never an error.

use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, OnceLock};

use bon::Builder;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rayon::prelude::*;
use tracing::{debug, info, instrument, trace, warn};

#[cfg(feature = "serde")]
use serde::Serialize;

use crate::archive::MapArchive;
use crate::error::{Error, Result, ValueError};
use crate::layout::TagLayout;
use crate::schema::Schema;
use crate::types::{TagId, TagIndexEntry, TypeCode};
use crate::value::Record;

/// Which shared map an auxiliary archive stands in for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize), serde(rename_all = "snake_case"))]
pub enum ArchiveRole {
    MultiplayerShared,
    SinglePlayerShared,
    MainMenu,
}

impl fmt::Display for ArchiveRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ArchiveRole::MultiplayerShared => "multiplayer shared",
            ArchiveRole::SinglePlayerShared => "single player shared",
            ArchiveRole::MainMenu => "main menu",
        })
    }
}

/// A tag reference found while populating external data
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct ExternalRef {
    /// Where the reference sits in the referring tag
    pub path: String,
    pub target: TagId,

    /// Class of the referenced tag, `None` if no loaded map has it
    pub target_type: Option<TypeCode>,
}

impl ExternalRef {
    pub fn is_resolved(&self) -> bool {
        self.target_type.is_some()
    }
}

/// A decoded tag
#[derive(Debug)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct Tag {
    id: TagId,
    type_code: TypeCode,
    name: String,
    body: Record,
    #[cfg_attr(feature = "serde", serde(skip))]
    external: OnceLock<Vec<ExternalRef>>,
}

impl Tag {
    pub fn new(id: TagId, type_code: TypeCode, name: String, body: Record) -> Self {
        Self {
            id,
            type_code,
            name,
            body,
            external: OnceLock::new(),
        }
    }

    pub fn id(&self) -> TagId {
        self.id
    }

    pub fn type_code(&self) -> TypeCode {
        self.type_code
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn body(&self) -> &Record {
        &self.body
    }

    /// References to other tags, once [`TagStore::populate_external`] has run for this tag
    pub fn external(&self) -> Option<&[ExternalRef]> {
        self.external.get().map(Vec::as_slice)
    }

    /// Convert the body into `T`
    pub fn to_value<T: TagLayout>(&self) -> Result<T, ValueError> {
        T::from_record(&self.body)
    }
}

/// Identifier of a tag expected to decode as `T`
pub struct TagRef<T> {
    id: TagId,
    _marker: PhantomData<fn() -> T>,
}

impl<T> TagRef<T> {
    pub const fn new(id: TagId) -> Self {
        Self {
            id,
            _marker: PhantomData,
        }
    }

    pub const fn id(&self) -> TagId {
        self.id
    }

    /// Whether this is something other than the "no tag" sentinel
    pub const fn is_valid(&self) -> bool {
        self.id.is_valid()
    }
}

impl<T> Clone for TagRef<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for TagRef<T> {}

impl<T> PartialEq for TagRef<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T> Eq for TagRef<T> {}

impl<T> fmt::Debug for TagRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TagRef<{}>({})", std::any::type_name::<T>(), self.id)
    }
}

/// Options for how a [`TagStore`] loads tags
#[derive(Debug, Clone, Copy, Builder)]
pub struct StoreOptions {
    /// Decode tags on the rayon thread pool in [`TagStore::load_all`]
    #[builder(default = true)]
    pub parallel: bool,

    /// Run [`TagStore::populate_external`] on every tag after [`TagStore::load_all`]
    #[builder(default = true)]
    pub populate_external: bool,
}

impl Default for StoreOptions {
    fn default() -> Self {
        StoreOptions::builder().build()
    }
}

/// Outcome of [`TagStore::load_all`]
#[derive(Debug, Default)]
pub struct LoadReport {
    /// Tags decoded, or found already decoded
    pub decoded: usize,

    /// Tags whose class has no layout in the schema
    pub unbound: usize,

    /// Tags that failed to decode and were skipped
    pub failed: Vec<(TagId, Error)>,

    /// References that point at a tag some loaded map has
    pub external_hits: usize,

    /// References that point nowhere
    pub external_misses: usize,
}

impl LoadReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.external_misses == 0
    }
}

/// Decoded tags of one map and the shared maps it references
pub struct TagStore {
    schema: Arc<Schema>,
    primary: MapArchive,
    shared: Vec<(ArchiveRole, MapArchive)>,
    tags: DashMap<TagId, Arc<Tag>>,
    options: StoreOptions,
}

impl fmt::Debug for TagStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TagStore")
            .field("primary", &self.primary)
            .field(
                "shared",
                &self.shared.iter().map(|(role, _)| role).collect::<Vec<_>>(),
            )
            .field("decoded", &self.tags.len())
            .finish()
    }
}

impl TagStore {
    /// Create a store for `primary`, failing if `schema` cannot be compiled.
    pub fn new(schema: Arc<Schema>, primary: MapArchive) -> Result<TagStore> {
        Self::with_options(schema, primary, StoreOptions::default())
    }

    pub fn with_options(
        schema: Arc<Schema>,
        primary: MapArchive,
        options: StoreOptions,
    ) -> Result<TagStore> {
        schema.validate()?;
        Ok(TagStore {
            schema,
            primary,
            shared: Vec::new(),
            tags: DashMap::new(),
            options,
        })
    }

    /// Add a shared map to look tags up in after the primary one.
    ///
    /// Shared maps are searched in the order they were added.
    pub fn add_shared(&mut self, role: ArchiveRole, archive: MapArchive) {
        debug!("added {role} map with {} tags", archive.len());
        self.shared.push((role, archive));
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn archive(&self) -> &MapArchive {
        &self.primary
    }

    pub fn shared(&self, role: ArchiveRole) -> Option<&MapArchive> {
        self.shared
            .iter()
            .find(|(r, _)| *r == role)
            .map(|(_, archive)| archive)
    }

    /// Give the primary map back, e.g. to patch it
    pub fn into_archive(self) -> MapArchive {
        self.primary
    }

    /// Number of tags decoded so far
    pub fn decoded(&self) -> usize {
        self.tags.len()
    }

    /// Index entry of a tag in whichever map has it
    pub fn entry(&self, id: TagId) -> Option<&TagIndexEntry> {
        self.locate(id).map(|(_, entry)| entry)
    }

    fn locate(&self, id: TagId) -> Option<(&MapArchive, &TagIndexEntry)> {
        std::iter::once(&self.primary)
            .chain(self.shared.iter().map(|(_, archive)| archive))
            .find_map(|archive| archive.entry(id).map(|entry| (archive, entry)))
    }

    /// The decoded tag `id`, decoding it on first use.
    ///
    /// Returns `Ok(None)` for the "no tag" sentinel and for ids no loaded map has.
    pub fn get_tag(&self, id: TagId) -> Result<Option<Arc<Tag>>> {
        if !id.is_valid() {
            return Ok(None);
        }

        if let Some(tag) = self.tags.get(&id) {
            trace!("tag cache hit for {id}");
            return Ok(Some(tag.value().clone()));
        }

        let Some((archive, entry)) = self.locate(id) else {
            warn!("reference miss: no loaded map has tag {id}");
            return Ok(None);
        };
        let plan = self.schema.plan_for(entry.type_code)?;

        // Holding the entry keeps other threads asking for the same tag waiting instead of decoding it again
        match self.tags.entry(id) {
            Entry::Occupied(tag) => Ok(Some(tag.get().clone())),
            Entry::Vacant(slot) => {
                let tag = archive.decode(&plan, entry)?;
                debug!("decoded tag {id} ({}) `{}`", tag.type_code(), tag.name());
                Ok(Some(slot.insert(Arc::new(tag)).value().clone()))
            }
        }
    }

    /// [`TagStore::get_tag`], logging and swallowing failures
    pub fn try_get_tag(&self, id: TagId) -> Option<Arc<Tag>> {
        match self.get_tag(id) {
            Ok(tag) => tag,
            Err(err) => {
                warn!("unable to load tag {id}: {err}");
                None
            }
        }
    }

    /// The tag `id` converted into `T`
    pub fn get_as<T: TagLayout>(&self, id: TagId) -> Result<Option<T>> {
        let Some(tag) = self.get_tag(id)? else {
            return Ok(None);
        };
        let mut value = tag.to_value::<T>()?;
        value.populate_external(self);
        Ok(Some(value))
    }

    /// Follow a typed reference, `None` on a miss or when the tag cannot be converted
    pub fn resolve<T: TagLayout>(&self, reference: TagRef<T>) -> Option<T> {
        match self.get_as::<T>(reference.id()) {
            Ok(value) => value,
            Err(err) => {
                warn!("unable to resolve {reference:?}: {err}");
                None
            }
        }
    }

    /// Record every tag reference of `tag` and whether it points anywhere.
    ///
    /// Runs at most once per tag, later calls return the first result.
    pub fn populate_external<'t>(&self, tag: &'t Tag) -> &'t [ExternalRef] {
        tag.external.get_or_init(|| {
            tag.body
                .tag_refs()
                .into_iter()
                .filter(|(_, target)| target.is_valid())
                .map(|(path, target)| {
                    let target_type = self.entry(target).map(|e| e.type_code);
                    if target_type.is_none() {
                        debug!("{} `{path}` points at missing tag {target}", tag.id);
                    }
                    ExternalRef {
                        path,
                        target,
                        target_type,
                    }
                })
                .collect()
        })
    }

    /// Decode every tag of the primary map whose class is in the schema.
    ///
    /// Tags that fail to decode are skipped and listed in the report; they do not stop the load.
    #[instrument(skip(self), fields(tags = self.primary.len()))]
    pub fn load_all(&self) -> LoadReport {
        let (ids, unbound): (Vec<&TagIndexEntry>, Vec<&TagIndexEntry>) = self
            .primary
            .entries()
            .partition(|entry| self.schema.is_bound(entry.type_code));
        let ids = ids.into_iter().map(|entry| entry.id).collect::<Vec<_>>();

        let load = |id: &TagId| (*id, self.get_tag(*id));
        let results = if self.options.parallel {
            ids.par_iter().map(load).collect::<Vec<_>>()
        } else {
            ids.iter().map(load).collect::<Vec<_>>()
        };

        let mut report = LoadReport {
            unbound: unbound.len(),
            ..Default::default()
        };
        let mut loaded = Vec::with_capacity(results.len());
        for (id, result) in results {
            match result {
                Ok(Some(tag)) => loaded.push(tag),
                Ok(None) => {}
                Err(err) => {
                    warn!("skipping tag {id}: {err}");
                    report.failed.push((id, err));
                }
            }
        }
        report.decoded = loaded.len();

        if self.options.populate_external {
            let counts = |tag: &Arc<Tag>| {
                let refs = self.populate_external(tag);
                let hits = refs.iter().filter(|r| r.is_resolved()).count();
                (hits, refs.len() - hits)
            };
            let (hits, misses) = if self.options.parallel {
                loaded
                    .par_iter()
                    .map(counts)
                    .reduce(|| (0, 0), |a, b| (a.0 + b.0, a.1 + b.1))
            } else {
                loaded
                    .iter()
                    .map(counts)
                    .fold((0, 0), |a, b| (a.0 + b.0, a.1 + b.1))
            };
            report.external_hits = hits;
            report.external_misses = misses;
        }

        info!(
            "loaded {} tags, {} failed, {} without a layout",
            report.decoded,
            report.failed.len(),
            report.unbound
        );
        report
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use crate::store::{StoreOptions, TagRef};
    use crate::types::TagId;

    #[test]
    fn options_default_to_parallel() {
        let options = StoreOptions::default();
        assert!(options.parallel);
        assert!(options.populate_external);

        let options = StoreOptions::builder().parallel(false).build();
        assert!(!options.parallel);
    }

    #[test]
    fn tag_refs_compare_by_id() {
        struct Marker;

        let a = TagRef::<Marker>::new(TagId(1));
        let b = a;
        assert_eq!(a, b);
        assert!(a.is_valid());
        assert!(!TagRef::<Marker>::new(TagId::INVALID).is_valid());
        assert!(format!("{a:?}").ends_with("Marker>(0x00000001)"));
    }
}
