//! Session: the owning container of the datastore cache.
//!
//! A session interns live datastores by dsid, reference-counts them via
//! referrer tags, resolves dsids into instances by recursive child
//! construction, and routes change notifications along referrer edges.
//! All mutable state lives on the session object; multiple sessions
//! coexist without shared globals.
//!
//! # Locking
//!
//! The session lock covers cache-map inspection and referrer-list edits
//! only. It is never held across child-dsid resolution, datastore
//! construction, or anything else that may touch the filesystem; the
//! open protocol re-inspects the cache each iteration, so a racing
//! insertion by another thread is simply observed on the next pass.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use crate::datastore::{DataStore, DsClass};
use crate::dsid::{parse_dsid, Dsid, Key, ParsedDsid};
use crate::error::{EditError, Result};
use crate::resource::{ResourceManager, TuningProfile};
use crate::schema::TypeDef;

/// Referrer tag: who is holding a datastore alive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefTag {
    /// Free-form annotation ("<temporary>", "<modified>", a shell name).
    Label(String),
    /// Another datastore, named by dsid.
    Holder(Dsid),
}

impl RefTag {
    pub fn label(text: impl Into<String>) -> Self {
        RefTag::Label(text.into())
    }

    /// Tag for transiently constructed intermediates of the open walk.
    pub fn temporary() -> Self {
        RefTag::label("<temporary>")
    }

    /// Self-referrer pinning a datastore with uncommitted edits.
    pub fn modified() -> Self {
        RefTag::label("<modified>")
    }

    fn session() -> Self {
        RefTag::label("<session>")
    }
}

/// Case-insensitive table of registered datastore types.
pub struct TypeRegistry {
    by_name: HashMap<String, &'static TypeDef>,
}

impl TypeRegistry {
    fn with_builtins() -> Self {
        let mut registry = TypeRegistry {
            by_name: HashMap::new(),
        };
        for def in [
            &crate::schema::DATA,
            &crate::schema::UINT_BE,
            &crate::schema::CSTRING,
            &crate::schema::BOOLEAN,
        ] {
            registry.register(def);
        }
        for def in crate::formats::registered_types().iter().copied() {
            registry.register(def);
        }
        registry
    }

    pub fn register(&mut self, def: &'static TypeDef) {
        self.by_name.insert(def.name.to_ascii_lowercase(), def);
    }

    pub fn resolve(&self, name: &str) -> Option<&'static TypeDef> {
        self.by_name.get(&name.to_ascii_lowercase()).copied()
    }

    /// Registered chunk-stream types whose magic matches the prefix.
    pub fn magic_matches(&self, prefix: &[u8]) -> Vec<&'static TypeDef> {
        let mut matches: Vec<&'static TypeDef> = self
            .by_name
            .values()
            .copied()
            .filter(|def| match &def.shape {
                crate::schema::Shape::ChunkStream(stream) => prefix.starts_with(stream.magic),
                _ => false,
            })
            .collect();
        matches.sort_by_key(|def| def.name);
        matches
    }
}

/// Shared state behind every datastore's session back-reference.
pub(crate) struct SessionShared {
    pub(crate) cache: Mutex<HashMap<Dsid, Arc<DataStore>>>,
    pub(crate) registry: TypeRegistry,
    pub(crate) tuning: TuningProfile,
    pub(crate) modified: Mutex<HashSet<Dsid>>,
    home: Option<String>,
}

impl SessionShared {
    /// The open protocol: walk the longest cached prefix, resolve one key
    /// at a time, constructing intermediates under `<temporary>` tags
    /// that are released on every exit path.
    pub(crate) fn open(
        self: &Arc<Self>,
        dsid: &Dsid,
        referrer: RefTag,
    ) -> Result<Arc<DataStore>> {
        let mut transients: Vec<Arc<DataStore>> = Vec::new();
        let result = self.open_inner(dsid, &referrer, &mut transients);
        for transient in transients {
            transient.release(&RefTag::temporary());
        }
        result
    }

    fn open_inner(
        self: &Arc<Self>,
        dsid: &Dsid,
        referrer: &RefTag,
        transients: &mut Vec<Arc<DataStore>>,
    ) -> Result<Arc<DataStore>> {
        enum Step {
            Done(Arc<DataStore>),
            Resolve(Arc<DataStore>, usize),
        }

        let mut target = dsid.clone();
        loop {
            let step = {
                let cache = self.cache.lock().unwrap();
                if let Some(ds) = cache.get(&target) {
                    ds.addref(referrer.clone())?;
                    Step::Done(Arc::clone(ds))
                } else {
                    if target.is_empty() {
                        // The root is only ever absent once the session
                        // handle has been dropped.
                        return Err(EditError::SessionClosed);
                    }
                    // Longest cached prefix; the empty dsid is pinned for
                    // the session's lifetime, so the scan always lands.
                    let mut depth = target.len() - 1;
                    loop {
                        if let Some(holder) = cache.get(&target.prefix(depth)) {
                            break Step::Resolve(Arc::clone(holder), depth);
                        }
                        if depth == 0 {
                            return Err(EditError::SessionClosed);
                        }
                        depth -= 1;
                    }
                }
            };

            match step {
                Step::Done(ds) => return Ok(ds),
                Step::Resolve(holder, depth) => {
                    // Resolution may read bytes; the session lock is not
                    // held here.
                    let key = &target.keys()[depth];
                    let (next_dsid, class) = holder.child_dsid(key)?;

                    if next_dsid == target.prefix(depth + 1) {
                        let built = DataStore::build(self, class, next_dsid.clone())?;
                        let mut cache = self.cache.lock().unwrap();
                        match cache.get(&next_dsid) {
                            Some(_) => {
                                // Lost the construction race; the loop
                                // will observe the winner next pass.
                                drop(cache);
                                tracing::debug!(dsid = %next_dsid, "open race lost, discarding");
                                built.discard();
                            }
                            None => {
                                built.addref(RefTag::temporary())?;
                                cache.insert(next_dsid, Arc::clone(&built));
                                transients.push(built);
                            }
                        }
                    } else {
                        // The key redirects to a canonical dsid.
                        target = next_dsid.join(&target.keys()[depth + 1..]);
                    }
                }
            }
        }
    }

    /// Deliver a change to every datastore currently referring to
    /// `origin`, skipping the requestor's own echo. Targets are collected
    /// under the session lock; handlers run outside it.
    pub(crate) fn notify_change(
        self: &Arc<Self>,
        origin: &Arc<DataStore>,
        key: &Key,
        requestor: &RefTag,
    ) {
        let targets: Vec<Arc<DataStore>> = {
            let mut seen: Vec<Dsid> = Vec::new();
            let cache = self.cache.lock().unwrap();
            origin
                .holder_dsids()
                .into_iter()
                .filter(|dsid| {
                    if seen.contains(dsid) {
                        false
                    } else {
                        seen.push(dsid.clone());
                        true
                    }
                })
                .filter_map(|dsid| cache.get(&dsid).cloned())
                .collect()
        };

        for target in targets {
            if matches!(requestor, RefTag::Holder(dsid) if *dsid == *target.dsid()) {
                continue;
            }
            target.on_change(origin, key, requestor);
        }
    }

    pub(crate) fn mark_modified(self: &Arc<Self>, ds: &Arc<DataStore>) {
        let mut modified = self.modified.lock().unwrap();
        if modified.insert(ds.dsid().clone()) {
            // Pin the datastore until an explicit commit releases it.
            let _ = ds.addref(RefTag::modified());
        }
    }

    pub(crate) fn clear_modified(self: &Arc<Self>, ds: &Arc<DataStore>) {
        let mut modified = self.modified.lock().unwrap();
        if modified.remove(ds.dsid()) {
            drop(modified);
            ds.release(&RefTag::modified());
        }
    }
}

/// Owning handle to one editing session.
pub struct Session {
    shared: Arc<SessionShared>,
}

impl Session {
    pub fn new() -> Result<Self> {
        Self::with_tuning(ResourceManager::auto_tune())
    }

    pub fn with_tuning(tuning: TuningProfile) -> Result<Self> {
        let shared = Arc::new(SessionShared {
            cache: Mutex::new(HashMap::new()),
            registry: TypeRegistry::with_builtins(),
            tuning,
            modified: Mutex::new(HashSet::new()),
            home: std::env::var("HOME").ok(),
        });

        // The empty-dsid root lives for the session's entire lifetime.
        let root = DataStore::build(&shared, DsClass::Root, Dsid::root())?;
        root.addref(RefTag::session())?;
        shared.cache.lock().unwrap().insert(Dsid::root(), root);

        Ok(Session { shared })
    }

    /// Open a dsid, constructing intermediates as needed. The returned
    /// datastore is held by `referrer` until released.
    pub fn open(&self, dsid: &Dsid, referrer: RefTag) -> Result<Arc<DataStore>> {
        self.shared.open(dsid, referrer)
    }

    /// Parse the textual dsid form against this session's type registry.
    pub fn parse_dsid(&self, text: &str) -> Result<ParsedDsid> {
        parse_dsid(
            text,
            |name| self.shared.registry.resolve(name),
            self.shared.home.as_deref(),
        )
    }

    /// Parse and open an absolute textual dsid.
    pub fn open_text(&self, text: &str, referrer: RefTag) -> Result<Arc<DataStore>> {
        let parsed = self.parse_dsid(text)?;
        self.open(&Dsid::new(parsed.keys), referrer)
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.shared.registry
    }

    pub fn tuning(&self) -> &TuningProfile {
        &self.shared.tuning
    }

    /// Currently cached datastore at `dsid`, without opening.
    pub fn cached(&self, dsid: &Dsid) -> Option<Arc<DataStore>> {
        self.shared.cache.lock().unwrap().get(dsid).cloned()
    }

    /// Dsids carrying uncommitted edits.
    pub fn modified(&self) -> Vec<Dsid> {
        let mut dsids: Vec<Dsid> =
            self.shared.modified.lock().unwrap().iter().cloned().collect();
        dsids.sort_by_key(|d| d.to_string());
        dsids
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        // Break the session -> cache -> datastore -> session cycle; kind
        // teardown (fds, scratch stores) runs as the map entries drop.
        self.shared.cache.lock().unwrap().clear();
        self.shared.modified.lock().unwrap().clear();
    }
}

// -- Tests --------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_is_pinned() {
        let session = Session::with_tuning(TuningProfile::default()).unwrap();
        let root = session.cached(&Dsid::root()).unwrap();
        assert_eq!(root.dsid(), &Dsid::root());
        assert!(!root.referrers().is_empty());
    }

    #[test]
    fn test_open_root_by_empty_dsid() {
        let session = Session::with_tuning(TuningProfile::default()).unwrap();
        let tag = RefTag::label("test");
        let root = session.open(&Dsid::root(), tag.clone()).unwrap();
        assert_eq!(root.referrers().len(), 2);
        root.release(&tag);
        assert_eq!(root.referrers().len(), 1);
    }

    #[test]
    fn test_registry_is_case_insensitive() {
        let session = Session::with_tuning(TuningProfile::default()).unwrap();
        let a = session.registry().resolve("uintbe").unwrap();
        let b = session.registry().resolve("UIntBE").unwrap();
        assert_eq!(a.name, b.name);
        assert!(session.registry().resolve("NoSuchType").is_none());
    }

    #[test]
    fn test_magic_matches_png() {
        let session = Session::with_tuning(TuningProfile::default()).unwrap();
        let hits = session
            .registry()
            .magic_matches(b"\x89PNG\r\n\x1a\n\x00\x00");
        assert!(hits.iter().any(|def| def.name == "Png"));
        assert!(session.registry().magic_matches(b"GIF89a").is_empty());
    }
}
