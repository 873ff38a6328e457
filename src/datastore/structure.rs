//! Schema-driven decomposition of a byte region into named fields.
//!
//! Evaluation walks the schema's fields in order, maintaining a running
//! cursor. Settings override a field's start or end; dependencies
//! resolve against fields already decoded in the same pass. Brokenness
//! is reported in-band: a missing field yields a warning and is skipped,
//! a truncated field yields a warning and is kept.
//!
//! The decoded layout is memoised under a generation counter. Evaluation
//! runs outside the session lock; the result is installed only if no
//! change notification advanced the generation meanwhile.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::dsid::{BrokenData, Dsid, Key};
use crate::error::{EditError, Result};
use crate::range::{ByteRange, End};
use crate::schema::{bytes_to_uint_be, FieldDef, SchemaDef, Shape, TypeDef, TypeMarker};

use super::{DataStore, DsClass, TypedState};

/// One decoded field layout.
#[derive(Debug, Clone)]
pub(crate) struct ParsedField {
    pub(crate) name: &'static str,
    pub(crate) ty: &'static TypeDef,
    pub(crate) range: ByteRange,
}

/// Memoised result of one evaluation pass.
#[derive(Debug)]
pub(crate) struct ParsedStruct {
    pub(crate) fields: Vec<ParsedField>,
    /// Enumeration order: field names with warnings interleaved.
    pub(crate) keys: Vec<Key>,
    /// Final cursor position: the structure's own extent.
    pub(crate) end: End,
}

enum Dep<'a> {
    Found(&'a ParsedField),
    /// The referent exists earlier in the schema but was skipped this
    /// pass; the dependent field is skipped too.
    Skipped,
}

fn find_dep<'a>(
    decoded: &'a [ParsedField],
    schema: &SchemaDef,
    field: &FieldDef,
    name: &str,
) -> Result<Dep<'a>> {
    if let Some(found) = decoded.iter().find(|f| f.name == name) {
        return Ok(Dep::Found(found));
    }
    let my_pos = schema
        .fields
        .iter()
        .position(|f| f.name == field.name)
        .unwrap_or(schema.fields.len());
    match schema.fields.iter().position(|f| f.name == name) {
        Some(pos) if pos < my_pos => Ok(Dep::Skipped),
        _ => Err(EditError::SchemaMismatch(format!(
            "field {} depends on {name}, which is not an earlier field",
            field.name
        ))),
    }
}

/// Scan `[start, end)` for a NUL; the field truncates one past it.
fn scan_nul(ds: &Arc<DataStore>, start: u64, end: End) -> Result<Option<End>> {
    const CHUNK: u64 = 256;
    let mut offset = start;
    loop {
        let chunk_end = match end {
            End::At(e) => e.min(offset + CHUNK),
            End::Open => offset + CHUNK,
        };
        if chunk_end <= offset {
            return Ok(None);
        }
        let chunk = ds.read_all(ByteRange::to(offset, chunk_end))?;
        if chunk.is_empty() {
            return Ok(None);
        }
        if let Some(pos) = chunk.iter().position(|&b| b == 0) {
            return Ok(Some(End::At(offset + pos as u64 + 1)));
        }
        offset += chunk.len() as u64;
    }
}

fn evaluate(ds: &Arc<DataStore>, schema: &'static SchemaDef) -> Result<ParsedStruct> {
    let mut decoded: Vec<ParsedField> = Vec::new();
    let mut keys: Vec<Key> = Vec::new();
    let mut ofs: u64 = 0;
    let mut frozen = false;

    'fields: for field in schema.fields {
        // Conditional presence.
        if let Some((ref_name, expected)) = field.ifequal() {
            match find_dep(&decoded, schema, field, ref_name)? {
                Dep::Skipped => continue 'fields,
                Dep::Found(referent) => {
                    if ds.read_all(referent.range)? != expected {
                        continue 'fields;
                    }
                }
            }
        }

        // Start: the running cursor, unless anchored to another field.
        let mut anchored = false;
        let mut start = ofs;
        if let Some(ref_name) = field.starts_with() {
            match find_dep(&decoded, schema, field, ref_name)? {
                Dep::Skipped => continue 'fields,
                Dep::Found(referent) => {
                    start = referent.range.start;
                    anchored = true;
                }
            }
        }

        // End: size settings first, an ends_with anchor overrides, and a
        // field with neither asks its own type for the extent.
        let mut end: Option<End> = None;
        if let Some(n) = field.size() {
            end = Some(End::At(start + n));
        } else if let Some(ref_name) = field.size_is() {
            match find_dep(&decoded, schema, field, ref_name)? {
                Dep::Skipped => continue 'fields,
                Dep::Found(referent) => {
                    let bytes = ds.read_all(referent.range)?;
                    end = Some(End::At(start + bytes_to_uint_be(&bytes)));
                }
            }
        }
        if let Some(ref_name) = field.ends_with() {
            match find_dep(&decoded, schema, field, ref_name)? {
                Dep::Skipped => continue 'fields,
                Dep::Found(referent) => end = Some(referent.range.end),
            }
        }
        let mut end = match end {
            Some(end) => end,
            None => ds.probe_typed_end(start, field.ty)?,
        };

        if field.stop_at_nul() {
            if let Some(truncated) = scan_nul(ds, start, end)? {
                end = truncated;
            }
        }

        // A malformed override never yields a backwards range.
        if let End::At(e) = end {
            if e < start {
                end = End::At(start);
            }
        }
        let range = ByteRange::new(start, end);

        // Readability: a missing field is skipped (with a warning unless
        // optional); a truncated field is kept with a warning.
        let mut truncated = false;
        if range.width() != Some(0) {
            if ds.read_all(ByteRange::to(start, start + 1))?.is_empty() {
                if !field.is_optional() {
                    keys.push(Key::Broken(BrokenData::new(format!(
                        "Missing field {}",
                        field.name
                    ))));
                }
                continue 'fields;
            }
            if let End::At(e) = end {
                if ds.read_all(ByteRange::to(e - 1, e))?.is_empty() {
                    truncated = true;
                }
            }
        }

        keys.push(Key::name(field.name.as_bytes()));
        if truncated {
            keys.push(Key::Broken(BrokenData::new(format!(
                "Truncated field {}",
                field.name
            ))));
        }
        decoded.push(ParsedField {
            name: field.name,
            ty: field.ty,
            range,
        });

        // Anchored fields reinterpret bytes already consumed; only the
        // positional chain moves the cursor.
        if !anchored {
            match end {
                End::At(e) => ofs = e,
                End::Open => frozen = true,
            }
        }
    }

    Ok(ParsedStruct {
        fields: decoded,
        keys,
        end: if frozen { End::Open } else { End::At(ofs) },
    })
}

/// Decode (or fetch the memoised decode of) this structure's layout.
pub(super) fn ensure_parsed(
    ds: &Arc<DataStore>,
    state: &TypedState,
    schema: &'static SchemaDef,
) -> Result<Arc<ParsedStruct>> {
    let generation = state.generation.load(Ordering::Acquire);
    if let Some(parsed) = state.parsed.lock().unwrap().as_ref() {
        return Ok(Arc::clone(parsed));
    }

    let parsed = Arc::new(evaluate(ds, schema)?);

    // Install only if no change invalidated the layout while we were
    // computing it.
    if state.generation.load(Ordering::Acquire) == generation {
        let mut cache = state.parsed.lock().unwrap();
        if cache.is_none() {
            *cache = Some(Arc::clone(&parsed));
        }
    }
    Ok(parsed)
}

pub(super) fn keys(
    ds: &Arc<DataStore>,
    state: &TypedState,
    schema: &'static SchemaDef,
) -> Result<Vec<Key>> {
    Ok(ensure_parsed(ds, state, schema)?.keys.clone())
}

pub(super) fn locate_field(
    ds: &Arc<DataStore>,
    state: &TypedState,
    schema: &'static SchemaDef,
    name: &str,
) -> Result<(ByteRange, &'static TypeDef)> {
    let parsed = ensure_parsed(ds, state, schema)?;
    parsed
        .fields
        .iter()
        .find(|field| field.name.eq_ignore_ascii_case(name))
        .map(|field| (field.range, field.ty))
        .ok_or_else(|| EditError::InvalidDsid(format!("{} has no field {name}", ds.dsid())))
}

pub(super) fn locate_end(
    ds: &Arc<DataStore>,
    state: &TypedState,
    schema: &'static SchemaDef,
) -> Result<End> {
    Ok(ensure_parsed(ds, state, schema)?.end)
}

pub(super) fn child_dsid(
    ds: &Arc<DataStore>,
    state: &TypedState,
    schema: &'static SchemaDef,
    key: &Key,
) -> Result<Option<(Dsid, DsClass)>> {
    let name = match key {
        Key::Name(bytes) => match std::str::from_utf8(bytes) {
            Ok(name) => name,
            Err(_) => return Ok(None),
        },
        _ => return Ok(None),
    };

    let (range, ty) = locate_field(ds, state, schema, name)?;

    let child = match ty.shape {
        // Plain byte fields are windows, nothing more.
        Shape::Bytes => (ds.dsid().child(Key::Range(range)), DsClass::Slice),
        _ => (
            ds.dsid().child(Key::Range(range)).child(Key::marker(ty)),
            DsClass::Typed(TypeMarker(ty)),
        ),
    };
    Ok(Some(child))
}

/// A byte-range change landed somewhere in this structure's region:
/// advance the generation and drop the memoised layout.
pub(super) fn invalidate(state: &TypedState) {
    state.generation.fetch_add(1, Ordering::AcqRel);
    *state.parsed.lock().unwrap() = None;
}
