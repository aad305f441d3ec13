//! Export trie decoding.
//!
//! Each node holds a ULEB128 terminal size, the terminal export data when the
//! node ends a symbol name, a child count and `(edge label, child offset)`
//! pairs. Child offsets are relative to the start of the trie.

use memchr::memchr;

pub const EXPORT_SYMBOL_FLAGS_KIND_MASK: u64 = 0x03;
pub const EXPORT_SYMBOL_FLAGS_WEAK_DEFINITION: u64 = 0x04;
pub const EXPORT_SYMBOL_FLAGS_REEXPORT: u64 = 0x08;
pub const EXPORT_SYMBOL_FLAGS_STUB_AND_RESOLVER: u64 = 0x10;

// Deeper than any real symbol name; stops malformed tries that loop.
const MAX_DEPTH: usize = 512;

/// One exported symbol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportSymbol {
    /// Name with the leading underscore of C-level names removed.
    pub name: String,
    /// Offset from the image header; zero for re-exports.
    pub offset: u64,
    pub flags: u64,
    /// `(dylib ordinal, imported name)` for re-exported symbols.
    pub reexport: Option<(u64, String)>,
}

impl ExportSymbol {
    pub fn is_reexport(&self) -> bool {
        self.flags & EXPORT_SYMBOL_FLAGS_REEXPORT != 0
    }

    pub fn is_weak(&self) -> bool {
        self.flags & EXPORT_SYMBOL_FLAGS_WEAK_DEFINITION != 0
    }
}

pub(crate) fn read_uleb128(data: &[u8], pos: &mut usize) -> Option<u64> {
    let mut result = 0u64;
    let mut shift = 0u32;
    loop {
        let byte = *data.get(*pos)?;
        *pos += 1;
        if shift < 64 {
            result |= u64::from(byte & 0x7f) << shift;
        }
        if byte & 0x80 == 0 {
            return Some(result);
        }
        shift += 7;
        if shift > 70 {
            return None;
        }
    }
}

fn read_cstr<'a>(data: &'a [u8], pos: &mut usize) -> Option<&'a [u8]> {
    let tail = data.get(*pos..)?;
    let end = memchr(0, tail)?;
    *pos += end + 1;
    Some(&tail[..end])
}

fn display_name(raw: &[u8]) -> String {
    let raw = raw.strip_prefix(b"_").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}

fn terminal(data: &[u8], name: &[u8]) -> Option<ExportSymbol> {
    let mut pos = 0usize;
    let flags = read_uleb128(data, &mut pos)?;
    if flags & EXPORT_SYMBOL_FLAGS_REEXPORT != 0 {
        let ordinal = read_uleb128(data, &mut pos)?;
        let imported = read_cstr(data, &mut pos).unwrap_or(&[]);
        let imported = if imported.is_empty() { name } else { imported };
        return Some(ExportSymbol {
            name: display_name(name),
            offset: 0,
            flags,
            reexport: Some((ordinal, display_name(imported))),
        });
    }
    // Stub-and-resolver entries carry the stub address first, which is the
    // address callers bind to.
    let offset = read_uleb128(data, &mut pos)?;
    Some(ExportSymbol {
        name: display_name(name),
        offset,
        flags,
        reexport: None,
    })
}

/// Decode every export in `trie`. Malformed branches are skipped.
pub fn parse_exports(trie: &[u8]) -> Vec<ExportSymbol> {
    let mut out = Vec::new();
    if trie.is_empty() {
        return out;
    }
    // (node offset, accumulated name, depth)
    let mut stack: Vec<(usize, Vec<u8>, usize)> = vec![(0, Vec::new(), 0)];
    while let Some((node, name, depth)) = stack.pop() {
        if depth > MAX_DEPTH {
            continue;
        }
        let mut pos = node;
        let Some(terminal_size) = read_uleb128(trie, &mut pos) else {
            continue;
        };
        let terminal_size = terminal_size as usize;
        if terminal_size != 0 {
            let Some(data) = pos.checked_add(terminal_size).and_then(|end| trie.get(pos..end)) else {
                continue;
            };
            if let Some(symbol) = terminal(data, &name) {
                out.push(symbol);
            }
            pos += terminal_size;
        }
        let Some(&children) = trie.get(pos) else {
            continue;
        };
        pos += 1;
        let mut pending = Vec::with_capacity(children as usize);
        for _ in 0..children {
            let (Some(edge), Some(child)) = (read_cstr(trie, &mut pos), read_uleb128(trie, &mut pos))
            else {
                break;
            };
            let child = child as usize;
            // Children always follow their parent; anything else is a cycle.
            if child <= node || child >= trie.len() {
                continue;
            }
            let mut child_name = name.clone();
            child_name.extend_from_slice(edge);
            pending.push((child, child_name, depth + 1));
        }
        // Reverse so the first edge is visited first.
        stack.extend(pending.into_iter().rev());
    }
    out
}

/// Exports of one image sorted by address, for nearest-symbol queries.
#[derive(Debug, Clone, Default)]
pub struct ExportTable {
    entries: Vec<(u64, String)>,
}

impl ExportTable {
    pub fn from_trie(trie: &[u8]) -> Self {
        let mut entries: Vec<(u64, String)> = parse_exports(trie)
            .into_iter()
            .filter(|e| !e.is_reexport())
            .map(|e| (e.offset, e.name))
            .collect();
        entries.sort();
        ExportTable { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The export at or immediately before `offset`.
    pub fn nearest(&self, offset: u64) -> Option<(u64, &str)> {
        let idx = self.entries.partition_point(|(o, _)| *o <= offset);
        let (start, name) = self.entries.get(idx.checked_sub(1)?)?;
        Some((*start, name.as_str()))
    }
}
