//! Datastore ids: ordered key tuples naming nodes of the session graph.
//!
//! A dsid is the system's universal address. Keys mix printable names,
//! the `Stat`/`Parent` sentinels, integer indices, datastore type markers,
//! byte ranges, and opaque broken-data warnings. Dsids compare
//! element-wise and serve as cache-map keys.
//!
//! The textual form (the sole stable wire form) lives here too:
//! `/`-separated components, double-quoted strings with `""` escaping,
//! `..` for parent, `A..B` and `A...` for ranges, `?Name` for type
//! markers, and `~` as a leading alias for the user's home path.

use std::fmt;

use crate::error::{EditError, Result};
use crate::range::{ByteRange, End};
use crate::schema::{TypeDef, TypeMarker};

/// In-band warning yielded during key enumeration. Opaque: it names a
/// recoverable inconsistency but is never traversable.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BrokenData(pub String);

impl BrokenData {
    pub fn new(description: impl Into<String>) -> Self {
        BrokenData(description.into())
    }

    pub fn description(&self) -> &str {
        &self.0
    }
}

/// One element of a dsid.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Key {
    /// Printable name; a byte string, not necessarily UTF-8.
    Name(Vec<u8>),
    /// Metadata record of the holder (file type, size, mode, mtime).
    Stat,
    /// The holder's parent; resolution peels it without materialising
    /// intermediate datastores.
    Parent,
    /// Integer index into an array datastore.
    Index(u64),
    /// Typed view of a region, naming a registered datastore class.
    Type(TypeMarker),
    /// Byte window.
    Range(ByteRange),
    /// Broken-data warning; enumerated, never opened.
    Broken(BrokenData),
}

impl Key {
    pub fn name(name: impl Into<Vec<u8>>) -> Self {
        Key::Name(name.into())
    }

    pub fn marker(def: &'static TypeDef) -> Self {
        Key::Type(TypeMarker(def))
    }

    /// The name as UTF-8, if it is one.
    pub fn as_name_str(&self) -> Option<&str> {
        match self {
            Key::Name(bytes) => std::str::from_utf8(bytes).ok(),
            _ => None,
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Name(bytes) => {
                if name_is_bare(bytes) {
                    f.write_str(std::str::from_utf8(bytes).expect("bare names are ASCII"))
                } else {
                    write!(f, "\"{}\"", String::from_utf8_lossy(bytes).replace('"', "\"\""))
                }
            }
            Key::Stat => f.write_str("Stat"),
            Key::Parent => f.write_str(".."),
            Key::Index(i) => write!(f, "{i}"),
            Key::Type(marker) => write!(f, "{marker}"),
            Key::Range(r) => write!(f, "{r}"),
            Key::Broken(b) => write!(f, "<broken: {}>", b.description()),
        }
    }
}

/// Ordered tuple of keys naming a datastore. The empty dsid names the
/// session root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Dsid(Vec<Key>);

impl Dsid {
    pub const fn root() -> Self {
        Dsid(Vec::new())
    }

    pub fn new(keys: Vec<Key>) -> Self {
        Dsid(keys)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn keys(&self) -> &[Key] {
        &self.0
    }

    pub fn last(&self) -> Option<&Key> {
        self.0.last()
    }

    /// First `n` keys as a new dsid.
    pub fn prefix(&self, n: usize) -> Dsid {
        Dsid(self.0[..n].to_vec())
    }

    /// All keys but the last; `None` for the root.
    pub fn parent(&self) -> Option<Dsid> {
        if self.0.is_empty() {
            None
        } else {
            Some(self.prefix(self.0.len() - 1))
        }
    }

    /// This dsid extended by one key.
    pub fn child(&self, key: Key) -> Dsid {
        let mut keys = self.0.clone();
        keys.push(key);
        Dsid(keys)
    }

    /// This dsid extended by a tail of keys.
    pub fn join(&self, tail: &[Key]) -> Dsid {
        let mut keys = self.0.clone();
        keys.extend_from_slice(tail);
        Dsid(keys)
    }
}

impl From<Vec<Key>> for Dsid {
    fn from(keys: Vec<Key>) -> Self {
        Dsid(keys)
    }
}

impl fmt::Display for Dsid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("/");
        }
        for key in &self.0 {
            write!(f, "/{key}")?;
        }
        Ok(())
    }
}

// ── Textual form ────────────────────────────────────────────────────

/// Result of parsing a textual dsid: the keys plus whether the text was
/// anchored at the session root.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedDsid {
    pub keys: Vec<Key>,
    pub absolute: bool,
}

/// True when a name round-trips as a bare (unquoted) component.
fn name_is_bare(bytes: &[u8]) -> bool {
    if bytes.is_empty() {
        return false;
    }
    if !bytes
        .iter()
        .all(|&b| (0x21..=0x7e).contains(&b) && b != b'"' && b != b'/')
    {
        return false;
    }
    let text = std::str::from_utf8(bytes).expect("graphic ASCII");
    // Reject anything another component form would claim first.
    !(text.starts_with('?')
        || text.starts_with('~')
        || text == ".."
        || text.eq_ignore_ascii_case("stat")
        || text.bytes().all(|b| b.is_ascii_digit())
        || parse_range(text).is_some())
}

/// `A..B` or `A...` with decimal endpoints.
fn parse_range(component: &str) -> Option<ByteRange> {
    if let Some(start) = component.strip_suffix("...") {
        if !start.is_empty() && start.bytes().all(|b| b.is_ascii_digit()) {
            return Some(ByteRange::from(start.parse().ok()?));
        }
        return None;
    }
    let (a, b) = component.split_once("..")?;
    if a.is_empty()
        || b.is_empty()
        || !a.bytes().all(|c| c.is_ascii_digit())
        || !b.bytes().all(|c| c.is_ascii_digit())
    {
        return None;
    }
    Some(ByteRange::to(a.parse().ok()?, b.parse().ok()?))
}

/// Strip quoting from a component containing `"`; `None` when a quote is
/// left unterminated. `""` inside a quoted run is a literal quote.
fn unquote(component: &str) -> Option<Vec<u8>> {
    let bytes = component.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut in_quotes = false;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'"' {
            if in_quotes && bytes.get(i + 1) == Some(&b'"') {
                out.push(b'"');
                i += 2;
                continue;
            }
            in_quotes = !in_quotes;
            i += 1;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    if in_quotes {
        None
    } else {
        Some(out)
    }
}

/// Split on `/`, re-joining components whose quote count is odd so `/`
/// survives inside quoted strings.
fn split_components(text: &str) -> Vec<String> {
    let mut parts: Vec<String> = text.split('/').map(str::to_owned).collect();
    let mut i = 0;
    while i + 1 < parts.len() {
        if parts[i].matches('"').count() % 2 == 1 {
            let next = parts.remove(i + 1);
            parts[i] = format!("{}/{}", parts[i], next);
        } else {
            i += 1;
        }
    }
    parts
}

/// Parse the textual dsid form. `resolve_type` maps a `?Name` component
/// to the session's registered type table; `home` feeds the leading `~`
/// alias.
pub fn parse_dsid(
    text: &str,
    resolve_type: impl Fn(&str) -> Option<&'static TypeDef>,
    home: Option<&str>,
) -> Result<ParsedDsid> {
    let mut components = split_components(text);
    let mut absolute = false;
    let mut keys = Vec::new();

    if let Some(first) = components.first() {
        if first.is_empty() {
            absolute = true;
            components.remove(0);
        } else if first == "~" {
            let home = home
                .ok_or_else(|| EditError::InvalidDsid("no home directory for ~".into()))?;
            absolute = true;
            keys.push(Key::name(&b"FileSystem"[..]));
            keys.push(Key::name(home.as_bytes()));
            components.remove(0);
        }
    }

    for component in components {
        if component.is_empty() {
            continue;
        }
        if component.contains('"') {
            let name = unquote(&component).ok_or_else(|| {
                EditError::InvalidDsid(format!("unterminated quote in {component:?}"))
            })?;
            keys.push(Key::Name(name));
            continue;
        }
        if component == ".." {
            keys.push(Key::Parent);
        } else if component.eq_ignore_ascii_case("stat") {
            keys.push(Key::Stat);
        } else if component.bytes().all(|b| b.is_ascii_digit()) {
            let index = component
                .parse()
                .map_err(|_| EditError::InvalidDsid(format!("index out of range: {component}")))?;
            keys.push(Key::Index(index));
        } else if let Some(range) = parse_range(&component) {
            if let End::At(end) = range.end {
                if end < range.start {
                    return Err(EditError::InvalidDsid(format!(
                        "range ends before it starts: {component}"
                    )));
                }
            }
            keys.push(Key::Range(range));
        } else if let Some(name) = component.strip_prefix('?') {
            let def = resolve_type(name).ok_or_else(|| {
                EditError::InvalidDsid(format!("unknown datastore type: {name}"))
            })?;
            keys.push(Key::marker(def));
        } else {
            keys.push(Key::Name(component.into_bytes()));
        }
    }

    Ok(ParsedDsid { keys, absolute })
}

// -- Tests --------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{DATA, UINT_BE};

    fn resolve(name: &str) -> Option<&'static TypeDef> {
        if name.eq_ignore_ascii_case("data") {
            Some(&DATA)
        } else if name.eq_ignore_ascii_case("uintbe") {
            Some(&UINT_BE)
        } else {
            None
        }
    }

    fn parse(text: &str) -> ParsedDsid {
        parse_dsid(text, resolve, Some("/home/user")).unwrap()
    }

    #[test]
    fn test_parse_component_kinds() {
        let parsed = parse("/FileSystem/tmp/a.bin/4..6/?Data/Stat/../3/8...");
        assert!(parsed.absolute);
        assert_eq!(
            parsed.keys,
            vec![
                Key::name(&b"FileSystem"[..]),
                Key::name(&b"tmp"[..]),
                Key::name(&b"a.bin"[..]),
                Key::Range(ByteRange::to(4, 6)),
                Key::marker(&DATA),
                Key::Stat,
                Key::Parent,
                Key::Index(3),
                Key::Range(ByteRange::from(8)),
            ]
        );
    }

    #[test]
    fn test_parse_relative() {
        let parsed = parse("a/b");
        assert!(!parsed.absolute);
        assert_eq!(parsed.keys.len(), 2);
    }

    #[test]
    fn test_quotes_protect_slashes_and_quotes() {
        let parsed = parse("/FileSystem/\"/tmp/a.bin\"");
        assert_eq!(
            parsed.keys,
            vec![Key::name(&b"FileSystem"[..]), Key::name(&b"/tmp/a.bin"[..])]
        );

        let parsed = parse("\"he said \"\"hi\"\"\"");
        assert_eq!(parsed.keys, vec![Key::name(&b"he said \"hi\""[..])]);
    }

    #[test]
    fn test_quoting_shields_special_forms() {
        // A quoted component is always a literal name.
        let parsed = parse("\"..\"/\"42\"/\"stat\"");
        assert_eq!(
            parsed.keys,
            vec![
                Key::name(&b".."[..]),
                Key::name(&b"42"[..]),
                Key::name(&b"stat"[..]),
            ]
        );
    }

    #[test]
    fn test_stat_is_case_insensitive() {
        assert_eq!(parse("STAT").keys, vec![Key::Stat]);
        assert_eq!(parse("stat").keys, vec![Key::Stat]);
    }

    #[test]
    fn test_tilde_expands_to_home() {
        let parsed = parse("~/notes.txt");
        assert!(parsed.absolute);
        assert_eq!(
            parsed.keys,
            vec![
                Key::name(&b"FileSystem"[..]),
                Key::name(&b"/home/user"[..]),
                Key::name(&b"notes.txt"[..]),
            ]
        );
    }

    #[test]
    fn test_unknown_type_marker_rejected() {
        let err = parse_dsid("?NoSuchType", resolve, None).unwrap_err();
        assert!(matches!(err, EditError::InvalidDsid(_)));
    }

    #[test]
    fn test_backwards_range_rejected() {
        let err = parse_dsid("9..4", resolve, None).unwrap_err();
        assert!(matches!(err, EditError::InvalidDsid(_)));
    }

    #[test]
    fn test_display_round_trips() {
        let dsid = Dsid::new(vec![
            Key::name(&b"FileSystem"[..]),
            Key::name(&b"/tmp/a.bin"[..]),
            Key::Range(ByteRange::to(0, 8)),
            Key::marker(&UINT_BE),
            Key::Index(2),
            Key::Parent,
            Key::Stat,
        ]);
        let text = dsid.to_string();
        let parsed = parse(&text);
        assert!(parsed.absolute);
        assert_eq!(parsed.keys, dsid.keys());
    }

    #[test]
    fn test_root_displays_as_slash() {
        assert_eq!(Dsid::root().to_string(), "/");
    }

    #[test]
    fn test_names_needing_quotes_display_quoted() {
        let dsid = Dsid::new(vec![Key::name(&b"two words"[..])]);
        assert_eq!(dsid.to_string(), "/\"two words\"");
        let dsid = Dsid::new(vec![Key::name(&b"1234"[..])]);
        assert_eq!(dsid.to_string(), "/\"1234\"");
    }

    #[test]
    fn test_dsid_prefix_and_parent() {
        let dsid = Dsid::new(vec![Key::name(&b"FileSystem"[..]), Key::Stat]);
        assert_eq!(dsid.prefix(1).keys(), &[Key::name(&b"FileSystem"[..])]);
        assert_eq!(dsid.parent().unwrap().len(), 1);
        assert_eq!(Dsid::root().parent(), None);
    }
}
