//! Format modules: declarative schema instances registered with every
//! session's type table.

pub mod png;

use crate::schema::TypeDef;

/// All format-supplied types, in registration order.
pub(crate) fn registered_types() -> &'static [&'static TypeDef] {
    png::TYPES
}
