//! bytetree — interactive low-level editor core.
//!
//! Navigates arbitrary binary artifacts (files, and recursively the
//! structured data inside them) as a tree of addressable objects. An
//! object is named by a dsid, lists its children, reads its bytes, and
//! accepts replacement writes into byte ranges; uncommitted edits layer
//! over the on-disk data until explicitly saved.
//!
//! # Architecture
//!
//! - `range` / `dsid`: path arithmetic — half-open byte ranges with an
//!   open-ended sentinel, and the key tuples addressing datastores.
//! - `overlay` / `scratch`: copy-on-write edits as an ordered segment
//!   list over a backing byte source, payloads spooled in scratch files.
//! - `session`: the datastore cache — interning by dsid, reference
//!   counting via referrer tags, the open protocol, change routing.
//! - `datastore`: the concrete kinds (root, filesystem objects, slices,
//!   typed leaf views, schema-driven structures, heterogeneous arrays,
//!   chunk streams).
//! - `schema` / `formats`: declarative type tables and the PNG instance.
//! - `jobs` / `progress` / `resource`: worker threads for long
//!   operations, cancellable progress callbacks, adaptive tuning.

pub mod datastore;
pub mod dsid;
pub mod error;
pub mod formats;
pub mod jobs;
pub mod overlay;
pub mod progress;
pub mod range;
pub mod resource;
pub mod schema;
pub mod scratch;
pub mod session;

pub use datastore::{DataStore, DsClass, KeyIter};
pub use dsid::{BrokenData, Dsid, Key};
pub use error::{EditError, Result};
pub use range::{ByteRange, End, ALL};
pub use session::{RefTag, Session, TypeRegistry};
