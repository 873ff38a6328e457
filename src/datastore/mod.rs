//! Interned datastore nodes and their capability surface.
//!
//! A `DataStore` is one node of the session graph: a dsid, a referrer
//! list keeping it alive, outgoing references to the datastores it holds,
//! and per-kind state. Kinds form a closed variant set dispatched by
//! `Kind`; capability methods (`child_dsid`, `enum_keys`, `read_bytes`,
//! `write_bytes`, `locate_end`, `on_change`, ...) match on the variant
//! and delegate to the kind modules.
//!
//! Reference bookkeeping mirrors the cache invariant: a datastore with
//! zero referrers is removed from the session cache, releases every
//! outgoing reference (which may cascade), and only then lets go of
//! external resources as the last `Arc` drops.

pub mod array;
pub mod chunkstream;
pub mod filesystem;
pub mod primitive;
pub mod root;
pub mod slice;
pub mod structure;

use std::sync::atomic::AtomicU64;
use std::sync::{Arc, Mutex};

use crate::dsid::{Dsid, Key};
use crate::error::{EditError, Result};
use crate::progress::{self, Progress};
use crate::range::{ByteRange, End};
use crate::schema::{Shape, TypeDef, TypeMarker};
use crate::session::{RefTag, SessionShared};

use array::ArrayTable;
use filesystem::{FsState, StatState};
use slice::SliceState;
use structure::ParsedStruct;

/// Concrete datastore class, as named by child-dsid resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DsClass {
    Root,
    FileSystem,
    Slice,
    Stat,
    Typed(TypeMarker),
}

/// Per-kind instance state.
pub(crate) enum Kind {
    Root,
    FileSystem(FsState),
    Slice(SliceState),
    Stat(StatState),
    Typed(TypedState),
}

/// State shared by every typed view: the parent region it reinterprets,
/// plus the caches composite shapes maintain.
pub(crate) struct TypedState {
    pub(crate) def: &'static TypeDef,
    pub(crate) parent: Arc<DataStore>,
    /// Memoised schema decode, guarded by the generation counter.
    pub(crate) parsed: Mutex<Option<Arc<ParsedStruct>>>,
    pub(crate) generation: AtomicU64,
    /// Lazily extended item table for array shapes.
    pub(crate) items: Mutex<ArrayTable>,
}

struct RefState {
    referrers: Vec<RefTag>,
    references: Vec<Arc<DataStore>>,
    freed: bool,
}

/// One interned node of the session graph.
pub struct DataStore {
    session: Arc<SessionShared>,
    dsid: Dsid,
    state: Mutex<RefState>,
    kind: Kind,
}

impl DataStore {
    /// Construct an instance for `class` at `dsid`. Initialises data
    /// structures and reserves parent datastores; no other blocking work
    /// happens here. The caller inserts the result into the cache and
    /// attaches the first referrer.
    pub(crate) fn build(
        session: &Arc<SessionShared>,
        class: DsClass,
        dsid: Dsid,
    ) -> Result<Arc<DataStore>> {
        let mut references: Vec<Arc<DataStore>> = Vec::new();
        let open_parent = |dsid: &Dsid| -> Result<Arc<DataStore>> {
            let parent_dsid = dsid.parent().ok_or_else(|| {
                EditError::InvalidDsid(format!("{dsid} has no parent to wrap"))
            })?;
            session.open(&parent_dsid, RefTag::Holder(dsid.clone()))
        };

        let kind = match class {
            DsClass::Root => Kind::Root,
            DsClass::FileSystem => Kind::FileSystem(FsState::new(&dsid, &session.tuning)?),
            DsClass::Slice => {
                let range = match dsid.last() {
                    Some(Key::Range(range)) => *range,
                    _ => {
                        return Err(EditError::InvalidDsid(format!(
                            "{dsid} does not end in a byte range"
                        )))
                    }
                };
                let parent = open_parent(&dsid)?;
                references.push(Arc::clone(&parent));
                Kind::Slice(SliceState { parent, range })
            }
            DsClass::Stat => {
                let parent = open_parent(&dsid)?;
                references.push(Arc::clone(&parent));
                Kind::Stat(StatState { parent })
            }
            DsClass::Typed(marker) => {
                let parent = open_parent(&dsid)?;
                references.push(Arc::clone(&parent));
                Kind::Typed(TypedState {
                    def: marker.def(),
                    parent,
                    parsed: Mutex::new(None),
                    generation: AtomicU64::new(0),
                    items: Mutex::new(ArrayTable::default()),
                })
            }
        };

        Ok(Arc::new(DataStore {
            session: Arc::clone(session),
            dsid,
            state: Mutex::new(RefState {
                referrers: Vec::new(),
                references,
                freed: false,
            }),
            kind,
        }))
    }

    /// Drop a never-cached instance (construction race loser), releasing
    /// the parent references it reserved.
    pub(crate) fn discard(&self) {
        let references = {
            let mut state = self.state.lock().unwrap();
            state.freed = true;
            std::mem::take(&mut state.references)
        };
        for reference in references {
            reference.release(&RefTag::Holder(self.dsid.clone()));
        }
    }

    pub fn dsid(&self) -> &Dsid {
        &self.dsid
    }

    pub fn class(&self) -> DsClass {
        match &self.kind {
            Kind::Root => DsClass::Root,
            Kind::FileSystem(_) => DsClass::FileSystem,
            Kind::Slice(_) => DsClass::Slice,
            Kind::Stat(_) => DsClass::Stat,
            Kind::Typed(state) => DsClass::Typed(TypeMarker(state.def)),
        }
    }

    pub(crate) fn session(&self) -> &Arc<SessionShared> {
        &self.session
    }

    pub(crate) fn kind(&self) -> &Kind {
        &self.kind
    }

    // ── Reference bookkeeping ───────────────────────────────────────

    /// Attach a referrer, keeping this datastore alive.
    pub fn addref(&self, referrer: RefTag) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.freed {
            return Err(EditError::SessionClosed);
        }
        state.referrers.push(referrer);
        Ok(())
    }

    /// Detach the first matching referrer. Reaching zero removes this
    /// datastore from the session cache and releases every outgoing
    /// reference; kind teardown runs as the last `Arc` drops.
    pub fn release(&self, referrer: &RefTag) {
        let references = {
            let mut cache = self.session.cache.lock().unwrap();
            let mut state = self.state.lock().unwrap();
            if state.freed {
                return;
            }
            match state.referrers.iter().position(|tag| tag == referrer) {
                Some(index) => {
                    state.referrers.remove(index);
                }
                None => {
                    tracing::warn!(dsid = %self.dsid, ?referrer, "release without matching referrer");
                    return;
                }
            }
            if !state.referrers.is_empty() {
                return;
            }
            state.freed = true;
            cache.remove(&self.dsid);
            std::mem::take(&mut state.references)
        };
        for reference in references {
            reference.release(&RefTag::Holder(self.dsid.clone()));
        }
    }

    /// Snapshot of the current referrer tags.
    pub fn referrers(&self) -> Vec<RefTag> {
        self.state.lock().unwrap().referrers.clone()
    }

    /// Dsids of datastores this node has reserved.
    pub fn references(&self) -> Vec<Dsid> {
        self.state
            .lock()
            .unwrap()
            .references
            .iter()
            .map(|ds| ds.dsid.clone())
            .collect()
    }

    /// Dsids of referrers that are themselves datastores.
    pub(crate) fn holder_dsids(&self) -> Vec<Dsid> {
        self.state
            .lock()
            .unwrap()
            .referrers
            .iter()
            .filter_map(|tag| match tag {
                RefTag::Holder(dsid) => Some(dsid.clone()),
                RefTag::Label(_) => None,
            })
            .collect()
    }

    // ── Child resolution ────────────────────────────────────────────

    /// Resolve one key to `(child dsid, class)`. Pure with respect to
    /// session state; may read bytes. The result either extends this
    /// dsid by one key or redirects to a canonical dsid.
    pub fn child_dsid(self: &Arc<Self>, key: &Key) -> Result<(Dsid, DsClass)> {
        let specific = match &self.kind {
            Kind::Root => root::child_dsid(self, key)?,
            Kind::FileSystem(state) => filesystem::child_dsid(self, state, key)?,
            Kind::Slice(state) => slice::child_dsid(self, state, key)?,
            Kind::Stat(state) => match key {
                Key::Parent => Some((state.parent.dsid.clone(), state.parent.class())),
                _ => None,
            },
            Kind::Typed(state) => match &state.def.shape {
                Shape::Structure(schema) => structure::child_dsid(self, state, *schema, key)?,
                Shape::Array(def) => array::child_dsid(self, state, *def, key)?,
                Shape::ChunkStream(def) => chunkstream::child_dsid(self, state, *def, key)?,
                _ => match key {
                    Key::Parent => Some((state.parent.dsid.clone(), state.parent.class())),
                    _ => None,
                },
            },
        };
        match specific {
            Some(resolved) => Ok(resolved),
            None => self.default_child_dsid(key),
        }
    }

    /// Rules shared by every kind: type markers wrap, the identity range
    /// collapses, other ranges slice.
    fn default_child_dsid(&self, key: &Key) -> Result<(Dsid, DsClass)> {
        match key {
            Key::Type(marker) => Ok((
                self.dsid.child(key.clone()),
                DsClass::Typed(*marker),
            )),
            Key::Range(range) if range.is_all() => Ok((self.dsid.clone(), self.class())),
            Key::Range(_) => Ok((self.dsid.child(key.clone()), DsClass::Slice)),
            Key::Parent => Ok(self.parent_link()),
            Key::Broken(_) => Err(EditError::InvalidDsid(
                "broken-data warnings are not traversable".into(),
            )),
            other => Err(EditError::InvalidDsid(format!(
                "{} has no child {other}",
                self.dsid
            ))),
        }
    }

    /// `(dsid, class)` of the parent, for kinds that hold one; the root
    /// is its own parent.
    fn parent_link(&self) -> (Dsid, DsClass) {
        match &self.kind {
            Kind::Root => (Dsid::root(), DsClass::Root),
            Kind::FileSystem(_) => unreachable!("filesystem resolves Parent itself"),
            Kind::Slice(state) => (state.parent.dsid.clone(), state.parent.class()),
            Kind::Stat(state) => (state.parent.dsid.clone(), state.parent.class()),
            Kind::Typed(state) => (state.parent.dsid.clone(), state.parent.class()),
        }
    }

    // ── Key enumeration ─────────────────────────────────────────────

    /// Lazily enumerate this datastore's keys, interleaving broken-data
    /// warnings with valid keys.
    pub fn enum_keys(self: &Arc<Self>) -> Result<KeyIter> {
        match &self.kind {
            Kind::Root => Ok(KeyIter::list(root::keys(self))),
            Kind::FileSystem(state) => Ok(KeyIter::list(filesystem::keys(self, state)?)),
            Kind::Slice(state) => Ok(KeyIter::list(vec![Key::Range(state.local_extent())])),
            Kind::Stat(_) => Ok(KeyIter::Empty),
            Kind::Typed(state) => match &state.def.shape {
                Shape::Structure(schema) => {
                    Ok(KeyIter::list(structure::keys(self, state, *schema)?))
                }
                Shape::Array(def) => Ok(KeyIter::Array(array::ArrayKeys::new(
                    Arc::clone(self),
                    *def,
                ))),
                Shape::ChunkStream(def) => Ok(KeyIter::Chunks(chunkstream::ChunkKeys::new(
                    Arc::clone(self),
                    *def,
                ))),
                _ => Ok(KeyIter::Empty),
            },
        }
    }

    // ── Bytes ───────────────────────────────────────────────────────

    /// Read the bytes in `r`, streaming progress per chunk. Reads past
    /// the readable end come back short.
    pub fn read_bytes(&self, r: ByteRange, progress: Progress<'_>) -> Result<Vec<u8>> {
        match &self.kind {
            Kind::Root => Err(EditError::NotReadable(
                "the session root holds no bytes".into(),
            )),
            Kind::FileSystem(state) => filesystem::read(state, r, progress),
            Kind::Slice(state) => {
                // Resolve an open end against the window before
                // translating, so reads never escape the slice.
                let r = self.resolve_slice_range(r)?;
                state.parent.read_bytes(state.range.translate(r), progress)
            }
            Kind::Stat(state) => filesystem::read_stat(state, r),
            Kind::Typed(state) => state.parent.read_bytes(r, progress),
        }
    }

    /// `read_bytes` with no progress reporting.
    pub fn read_all(&self, r: ByteRange) -> Result<Vec<u8>> {
        self.read_bytes(r, &mut progress::sink)
    }

    /// Splice `src` over the bytes in `r`. The write descends to the
    /// backing datastore; change notifications originate there and
    /// propagate back up along referrer edges.
    pub fn write_bytes(
        self: &Arc<Self>,
        r: ByteRange,
        src: &[u8],
        requestor: &RefTag,
    ) -> Result<()> {
        match &self.kind {
            Kind::Root => Err(EditError::NotReadable(
                "the session root does not accept writes".into(),
            )),
            Kind::Stat(_) => Err(EditError::NotReadable(
                "stat records are read-only".into(),
            )),
            Kind::FileSystem(state) => filesystem::write(self, state, r, src, requestor),
            Kind::Slice(state) => {
                let r = self.resolve_slice_range(r)?;
                state.parent.write_bytes(state.range.translate(r), src, requestor)
            }
            Kind::Typed(state) => state.parent.write_bytes(r, src, requestor),
        }
    }

    /// Logical size in bytes.
    pub fn get_size(&self) -> Result<u64> {
        match &self.kind {
            Kind::Root => Err(EditError::NotReadable(
                "the session root holds no bytes".into(),
            )),
            Kind::FileSystem(state) => filesystem::size(state),
            Kind::Slice(state) => match state.range.width() {
                Some(width) => Ok(width),
                None => Ok(state
                    .parent
                    .get_size()?
                    .saturating_sub(state.range.start)),
            },
            Kind::Stat(state) => Ok(filesystem::render_stat(state)?.len() as u64),
            Kind::Typed(state) => state.parent.get_size(),
        }
    }

    /// The type's self-described extent in local coordinates; `Open`
    /// when indeterminate.
    pub fn locate_end(self: &Arc<Self>) -> Result<End> {
        match &self.kind {
            Kind::Root => Err(EditError::NotReadable(
                "the session root holds no bytes".into(),
            )),
            Kind::FileSystem(state) => Ok(End::At(filesystem::size(state)?)),
            Kind::Slice(state) => Ok(match state.range.width() {
                Some(width) => End::At(width),
                None => End::Open,
            }),
            Kind::Stat(state) => Ok(End::At(filesystem::render_stat(state)?.len() as u64)),
            Kind::Typed(state) => match &state.def.shape {
                Shape::CString => primitive::cstring_end(self),
                Shape::Boolean => Ok(End::At(1)),
                Shape::Structure(schema) => structure::locate_end(self, state, *schema),
                Shape::Array(def) => array::locate_end(self, state, *def),
                Shape::Bytes | Shape::UIntBE | Shape::Enum(_) | Shape::ChunkStream(_) => {
                    Ok(End::Open)
                }
            },
        }
    }

    /// Locate a structure field by name: `(range, field type)` in this
    /// datastore's coordinates.
    pub fn locate_field(self: &Arc<Self>, name: &str) -> Result<(ByteRange, &'static TypeDef)> {
        match &self.kind {
            Kind::Typed(state) => match &state.def.shape {
                Shape::Structure(schema) => structure::locate_field(self, state, *schema, name),
                _ => Err(EditError::InvalidDsid(format!(
                    "{} has no schema fields",
                    self.dsid
                ))),
            },
            _ => Err(EditError::InvalidDsid(format!(
                "{} has no schema fields",
                self.dsid
            ))),
        }
    }

    /// One-line human description; never load-bearing for navigation.
    pub fn describe(self: &Arc<Self>) -> String {
        match &self.kind {
            Kind::Root => "session root".into(),
            Kind::FileSystem(state) => filesystem::describe(self, state),
            Kind::Slice(state) => format!("bytes {}", state.range),
            Kind::Stat(_) => "stat record".into(),
            Kind::Typed(state) => primitive::describe(self, state),
        }
    }

    /// Flush pending edits back to the backing store.
    pub fn commit(self: &Arc<Self>) -> Result<()> {
        match &self.kind {
            Kind::FileSystem(state) => filesystem::commit(self, state),
            _ => Err(EditError::NotAFile(self.dsid.to_string())),
        }
    }

    // ── Change notification ─────────────────────────────────────────

    /// A datastore this node refers to changed. Translate the key into
    /// local coordinates, invalidate caches, and re-notify this node's
    /// own referrers.
    pub(crate) fn on_change(
        self: &Arc<Self>,
        _origin: &Arc<DataStore>,
        key: &Key,
        requestor: &RefTag,
    ) {
        match &self.kind {
            Kind::Root | Kind::FileSystem(_) | Kind::Stat(_) => {}
            Kind::Slice(state) => {
                let local = match key {
                    Key::Range(range) => match range.intersect(state.range) {
                        Some(overlap) => {
                            Key::Range(overlap.offset(-(state.range.start as i64)))
                        }
                        None => return,
                    },
                    other => other.clone(),
                };
                self.session.notify_change(self, &local, requestor);
            }
            Kind::Typed(state) => {
                if let Key::Range(range) = key {
                    match &state.def.shape {
                        Shape::Structure(_) => structure::invalidate(state),
                        Shape::Array(_) => array::invalidate(state, *range),
                        _ => {}
                    }
                }
                // A typed view shares its parent's coordinates.
                self.session.notify_change(self, key, requestor);
            }
        }
    }

    /// Resolve an open-ended local range against this slice's concrete
    /// width, so translation cannot escape the window.
    fn resolve_slice_range(&self, r: ByteRange) -> Result<ByteRange> {
        if !r.end.is_open() {
            return Ok(r);
        }
        let size = self.get_size()?;
        Ok(ByteRange::to(r.start.min(size), size))
    }

    /// Open a transient typed view over `[start, Open)` of this
    /// datastore and ask it for its extent. Used by schema evaluation
    /// and array stepping.
    pub(crate) fn probe_typed_end(&self, start: u64, ty: &'static TypeDef) -> Result<End> {
        let sub_dsid = self
            .dsid
            .child(Key::Range(ByteRange::from(start)))
            .child(Key::marker(ty));
        let sub = self.session.open(&sub_dsid, RefTag::temporary())?;
        let end = sub.locate_end();
        sub.release(&RefTag::temporary());
        Ok(match end? {
            End::At(n) => End::At(start + n),
            End::Open => End::Open,
        })
    }
}

impl std::fmt::Debug for DataStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataStore")
            .field("dsid", &self.dsid.to_string())
            .field("class", &self.class())
            .finish()
    }
}

// ── Key enumeration ─────────────────────────────────────────────────

/// Pull-based key sequence. Composite kinds enumerate lazily and may
/// interleave `Key::Broken` warnings with valid keys.
pub enum KeyIter {
    Empty,
    List(std::vec::IntoIter<Key>),
    Array(array::ArrayKeys),
    Chunks(chunkstream::ChunkKeys),
}

impl KeyIter {
    fn list(keys: Vec<Key>) -> Self {
        KeyIter::List(keys.into_iter())
    }
}

impl Iterator for KeyIter {
    type Item = Result<Key>;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            KeyIter::Empty => None,
            KeyIter::List(iter) => iter.next().map(Ok),
            KeyIter::Array(iter) => iter.next(),
            KeyIter::Chunks(iter) => iter.next(),
        }
    }
}
