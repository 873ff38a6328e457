//! The session root: registered top-level names.
//!
//! Every open path begins here. Top-level names resolve
//! case-insensitively to their canonical spelling.

use crate::dsid::{Dsid, Key};
use crate::error::{EditError, Result};

use super::{DataStore, DsClass};

/// Registered top-level datastore classes. The filesystem root is always
/// present.
pub(crate) const TOP_LEVELS: &[(&str, DsClass)] = &[("FileSystem", DsClass::FileSystem)];

pub(super) fn child_dsid(_ds: &DataStore, key: &Key) -> Result<Option<(Dsid, DsClass)>> {
    match key {
        Key::Name(bytes) => {
            let name = std::str::from_utf8(bytes).map_err(|_| {
                EditError::InvalidDsid(format!(
                    "unknown top-level name: {}",
                    String::from_utf8_lossy(bytes)
                ))
            })?;
            for (canonical, class) in TOP_LEVELS {
                if canonical.eq_ignore_ascii_case(name) {
                    return Ok(Some((
                        Dsid::new(vec![Key::name(canonical.as_bytes())]),
                        *class,
                    )));
                }
            }
            Err(EditError::InvalidDsid(format!(
                "unknown top-level name: {name}"
            )))
        }
        Key::Parent => Ok(Some((Dsid::root(), DsClass::Root))),
        _ => Ok(None),
    }
}

pub(super) fn keys(_ds: &DataStore) -> Vec<Key> {
    TOP_LEVELS
        .iter()
        .map(|(name, _)| Key::name(name.as_bytes()))
        .collect()
}
