//! Mach-O structures needed to walk symbol tables.
//!
//! Only the parts of the format that symbol enumeration and rebinding depend
//! on are decoded: the header, segment and section load commands, `LC_SYMTAB`,
//! `LC_DYSYMTAB` and the export trie location. Both mapped images (addressed
//! through raw pointers handed out by the loader) and file buffers are read
//! through the same bounds-checked [`Memory`] view.

pub mod fat;
pub mod trie;

use crate::error::{DlError, Result};
use serde::{Deserialize, Serialize};
use std::marker::PhantomData;
use std::ops::Range;

pub const MH_MAGIC: u32 = 0xfeed_face;
pub const MH_CIGAM: u32 = 0xcefa_edfe; // swapped
pub const MH_MAGIC_64: u32 = 0xfeed_facf;
pub const MH_CIGAM_64: u32 = 0xcffa_edfe; // swapped

pub const MH_EXECUTE: u32 = 0x2;

pub const LC_REQ_DYLD: u32 = 0x8000_0000;
pub const LC_SEGMENT: u32 = 0x1;
pub const LC_SYMTAB: u32 = 0x2;
pub const LC_DYSYMTAB: u32 = 0xb;
pub const LC_SEGMENT_64: u32 = 0x19;
pub const LC_DYLD_INFO: u32 = 0x22;
pub const LC_DYLD_INFO_ONLY: u32 = 0x22 | LC_REQ_DYLD;
pub const LC_DYLD_EXPORTS_TRIE: u32 = 0x33 | LC_REQ_DYLD;

pub const N_STAB: u8 = 0xe0;
pub const N_PEXT: u8 = 0x10;
pub const N_TYPE: u8 = 0x0e;
pub const N_EXT: u8 = 0x01;
pub const N_UNDF: u8 = 0x0;
pub const N_SECT: u8 = 0xe;
pub const NO_SECT: u8 = 0;

pub const SECTION_TYPE: u32 = 0x0000_00ff;
pub const S_NON_LAZY_SYMBOL_POINTERS: u32 = 0x6;
pub const S_LAZY_SYMBOL_POINTERS: u32 = 0x7;
pub const INDIRECT_SYMBOL_LOCAL: u32 = 0x8000_0000;
pub const INDIRECT_SYMBOL_ABS: u32 = 0x4000_0000;

pub const SEG_TEXT: &str = "__TEXT";
pub const SEG_LINKEDIT: &str = "__LINKEDIT";
pub const SEG_DATA_CONST: &str = "__DATA_CONST";

const CPU_ARCH_ABI64: i32 = 0x0100_0000;

/// CPU type field of a Mach-O or fat header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CpuType(pub i32);

impl CpuType {
    pub const X86: CpuType = CpuType(7);
    pub const X86_64: CpuType = CpuType(7 | CPU_ARCH_ABI64);
    pub const ARM: CpuType = CpuType(12);
    pub const ARM64: CpuType = CpuType(12 | CPU_ARCH_ABI64);

    /// CPU type of the running process, when it is one Mach-O knows about.
    pub fn host() -> Option<CpuType> {
        if cfg!(target_arch = "aarch64") {
            Some(CpuType::ARM64)
        } else if cfg!(target_arch = "x86_64") {
            Some(CpuType::X86_64)
        } else if cfg!(target_arch = "arm") {
            Some(CpuType::ARM)
        } else if cfg!(target_arch = "x86") {
            Some(CpuType::X86)
        } else {
            None
        }
    }
}

pub(crate) fn read_u16(data: &[u8], off: usize, le: bool) -> Option<u16> {
    let b = data.get(off..off.checked_add(2)?)?;
    Some(if le {
        u16::from_le_bytes([b[0], b[1]])
    } else {
        u16::from_be_bytes([b[0], b[1]])
    })
}

pub(crate) fn read_u32(data: &[u8], off: usize, le: bool) -> Option<u32> {
    let b = data.get(off..off.checked_add(4)?)?;
    Some(if le {
        u32::from_le_bytes([b[0], b[1], b[2], b[3]])
    } else {
        u32::from_be_bytes([b[0], b[1], b[2], b[3]])
    })
}

pub(crate) fn read_u64(data: &[u8], off: usize, le: bool) -> Option<u64> {
    let b = data.get(off..off.checked_add(8)?)?;
    let mut raw = [0u8; 8];
    raw.copy_from_slice(b);
    Some(if le {
        u64::from_le_bytes(raw)
    } else {
        u64::from_be_bytes(raw)
    })
}

fn fixed_name(bytes: &[u8]) -> String {
    let end = memchr::memchr(0, bytes).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

fn truncated(offset: usize, message: &str) -> DlError {
    DlError::Truncated {
        offset: offset as u64,
        message: message.to_string(),
    }
}

#[derive(Debug, Clone, Copy)]
enum Repr<'data> {
    Mapped(usize, PhantomData<&'data [u8]>),
    Buffer(&'data [u8]),
}

/// The bytes of one image, either mapped into this process or held in a buffer.
#[derive(Debug, Clone, Copy)]
pub struct Memory<'data> {
    repr: Repr<'data>,
}

impl<'data> Memory<'data> {
    /// View an image mapped at `header`.
    ///
    /// # Safety
    ///
    /// `header` must be the address of a Mach-O header whose load commands and
    /// every region they describe (segments, symbol and string tables, indirect
    /// symbol table, export trie) remain mapped and readable for `'data`.
    pub unsafe fn mapped(header: usize) -> Self {
        Memory {
            repr: Repr::Mapped(header, PhantomData),
        }
    }

    /// View an image held in a byte buffer, header at offset zero.
    pub fn buffer(data: &'data [u8]) -> Self {
        Memory {
            repr: Repr::Buffer(data),
        }
    }

    /// Address of the image header.
    pub fn base(&self) -> usize {
        match self.repr {
            Repr::Mapped(base, _) => base,
            Repr::Buffer(data) => data.as_ptr() as usize,
        }
    }

    pub fn is_mapped(&self) -> bool {
        matches!(self.repr, Repr::Mapped(..))
    }

    /// Bytes `[offset, offset + len)` relative to the header.
    pub fn bytes(&self, offset: i64, len: usize) -> Option<&'data [u8]> {
        match self.repr {
            Repr::Buffer(data) => {
                let start = usize::try_from(offset).ok()?;
                data.get(start..start.checked_add(len)?)
            }
            Repr::Mapped(base, _) => {
                let start = (base as i64).checked_add(offset)?;
                if base == 0 || start <= 0 {
                    return None;
                }
                // SAFETY: `Memory::mapped` requires the header and every region
                // its load commands describe to stay mapped for 'data.
                Some(unsafe { std::slice::from_raw_parts(start as usize as *const u8, len) })
            }
        }
    }
}

/// One section header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub sectname: String,
    pub segname: String,
    pub addr: u64,
    pub size: u64,
    pub offset: u32,
    pub flags: u32,
    pub reserved1: u32,
}

impl Section {
    pub fn section_type(&self) -> u32 {
        self.flags & SECTION_TYPE
    }

    pub fn is_symbol_pointers(&self) -> bool {
        matches!(
            self.section_type(),
            S_LAZY_SYMBOL_POINTERS | S_NON_LAZY_SYMBOL_POINTERS
        )
    }
}

/// One `LC_SEGMENT`/`LC_SEGMENT_64` command with its sections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub name: String,
    pub vmaddr: u64,
    pub vmsize: u64,
    pub fileoff: u64,
    pub filesize: u64,
    pub sections: Vec<Section>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SymtabCommand {
    pub symoff: u32,
    pub nsyms: u32,
    pub stroff: u32,
    pub strsize: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DysymtabCommand {
    pub ilocalsym: u32,
    pub nlocalsym: u32,
    pub iextdefsym: u32,
    pub nextdefsym: u32,
    pub iundefsym: u32,
    pub nundefsym: u32,
    pub indirectsymoff: u32,
    pub nindirectsyms: u32,
}

/// Sub-ranges of the symbol table described by `LC_DYSYMTAB`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DynamicRanges {
    pub locals: Range<u32>,
    pub exported: Range<u32>,
    pub undefined: Range<u32>,
}

impl From<&DysymtabCommand> for DynamicRanges {
    fn from(cmd: &DysymtabCommand) -> Self {
        let span = |start: u32, count: u32| start..start.saturating_add(count);
        DynamicRanges {
            locals: span(cmd.ilocalsym, cmd.nlocalsym),
            exported: span(cmd.iextdefsym, cmd.nextdefsym),
            undefined: span(cmd.iundefsym, cmd.nundefsym),
        }
    }
}

/// Raw `nlist`/`nlist_64` entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Nlist {
    pub n_strx: u32,
    pub n_type: u8,
    pub n_sect: u8,
    pub n_desc: u16,
    pub n_value: u64,
}

impl Nlist {
    pub fn is_stab(&self) -> bool {
        self.n_type & N_STAB != 0
    }

    pub fn is_defined(&self) -> bool {
        self.n_sect != NO_SECT
    }
}

/// Symbol and string tables of one image.
#[derive(Debug, Clone, Copy)]
pub struct SymbolTable<'data> {
    symbols: &'data [u8],
    strings: &'data [u8],
    count: u32,
    is_64: bool,
    le: bool,
}

impl<'data> SymbolTable<'data> {
    pub fn len(&self) -> u32 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    fn entry_size(&self) -> usize {
        if self.is_64 {
            16
        } else {
            12
        }
    }

    /// Decode entry `index`.
    pub fn nlist(&self, index: u32) -> Option<Nlist> {
        let off = (index as usize).checked_mul(self.entry_size())?;
        let le = self.le;
        let data = self.symbols;
        let n_value = if self.is_64 {
            read_u64(data, off + 8, le)?
        } else {
            u64::from(read_u32(data, off + 8, le)?)
        };
        Some(Nlist {
            n_strx: read_u32(data, off, le)?,
            n_type: *data.get(off + 4)?,
            n_sect: *data.get(off + 5)?,
            n_desc: read_u16(data, off + 6, le)?,
            n_value,
        })
    }

    /// The string stored at `n_strx`, without its NUL terminator.
    pub fn raw_name(&self, n_strx: u32) -> &'data [u8] {
        let Some(tail) = self.strings.get(n_strx as usize..) else {
            return &[];
        };
        let end = memchr::memchr(0, tail).unwrap_or(tail.len());
        &tail[..end]
    }

    /// The symbol name at `n_strx` with the one-byte underscore placeholder
    /// that precedes every C-level name skipped.
    pub fn name(&self, n_strx: u32) -> &'data [u8] {
        self.raw_name(n_strx).get(1..).unwrap_or(&[])
    }
}

/// Parsed header and load commands of one image.
#[derive(Debug, Clone)]
pub struct MachImage<'data> {
    memory: Memory<'data>,
    is_64: bool,
    le: bool,
    cputype: CpuType,
    filetype: u32,
    segments: Vec<Segment>,
    symtab: Option<SymtabCommand>,
    dysymtab: Option<DysymtabCommand>,
    exports_trie: Option<(u32, u32)>,
}

/// Classify a header magic, returning `(is_64, little_endian)`.
pub fn classify_magic(head: &[u8]) -> Option<(bool, bool)> {
    let b = head.get(..4)?;
    let magic_le = u32::from_le_bytes([b[0], b[1], b[2], b[3]]);
    let magic_be = u32::from_be_bytes([b[0], b[1], b[2], b[3]]);
    match (magic_le, magic_be) {
        (MH_MAGIC_64, _) => Some((true, true)),
        (MH_MAGIC, _) => Some((false, true)),
        (_, MH_MAGIC_64) => Some((true, false)),
        (_, MH_MAGIC) => Some((false, false)),
        _ => None,
    }
}

impl<'data> MachImage<'data> {
    /// Decode the header and load commands found in `memory`.
    pub fn parse(memory: Memory<'data>) -> Result<Self> {
        let head = memory
            .bytes(0, 28)
            .ok_or_else(|| truncated(0, "mach header"))?;
        let (is_64, le) = classify_magic(head).ok_or_else(|| {
            DlError::InvalidFormat(format!(
                "unrecognised magic {:02x}{:02x}{:02x}{:02x}",
                head[0], head[1], head[2], head[3]
            ))
        })?;
        let header_size: usize = if is_64 { 32 } else { 28 };
        let cputype = CpuType(read_u32(head, 4, le).unwrap_or(0) as i32);
        let filetype = read_u32(head, 12, le).unwrap_or(0);
        let ncmds = read_u32(head, 16, le).unwrap_or(0);
        let sizeofcmds = read_u32(head, 20, le).unwrap_or(0) as usize;
        let commands = memory
            .bytes(header_size as i64, sizeofcmds)
            .ok_or_else(|| truncated(header_size, "load commands"))?;

        let mut image = MachImage {
            memory,
            is_64,
            le,
            cputype,
            filetype,
            segments: Vec::new(),
            symtab: None,
            dysymtab: None,
            exports_trie: None,
        };

        let mut off = 0usize;
        for _ in 0..ncmds {
            let (Some(cmd), Some(cmdsize)) = (read_u32(commands, off, le), read_u32(commands, off + 4, le))
            else {
                return Err(truncated(header_size + off, "load command header"));
            };
            let cmdsize = cmdsize as usize;
            let body = match off.checked_add(cmdsize).and_then(|end| commands.get(off..end)) {
                Some(body) if cmdsize >= 8 => body,
                _ => return Err(truncated(header_size + off, "load command body")),
            };
            image.load_command(cmd, body);
            off += cmdsize;
        }
        Ok(image)
    }

    fn load_command(&mut self, cmd: u32, body: &[u8]) {
        let le = self.le;
        let u32_at = |off: usize| read_u32(body, off, le).unwrap_or(0);
        match cmd {
            LC_SEGMENT_64 => {
                if let Some(segment) = Self::segment_64(body, le) {
                    self.segments.push(segment);
                }
            }
            LC_SEGMENT => {
                if let Some(segment) = Self::segment_32(body, le) {
                    self.segments.push(segment);
                }
            }
            LC_SYMTAB => {
                self.symtab = Some(SymtabCommand {
                    symoff: u32_at(8),
                    nsyms: u32_at(12),
                    stroff: u32_at(16),
                    strsize: u32_at(20),
                });
            }
            LC_DYSYMTAB => {
                self.dysymtab = Some(DysymtabCommand {
                    ilocalsym: u32_at(8),
                    nlocalsym: u32_at(12),
                    iextdefsym: u32_at(16),
                    nextdefsym: u32_at(20),
                    iundefsym: u32_at(24),
                    nundefsym: u32_at(28),
                    indirectsymoff: u32_at(56),
                    nindirectsyms: u32_at(60),
                });
            }
            LC_DYLD_INFO | LC_DYLD_INFO_ONLY => {
                self.exports_trie = Some((u32_at(40), u32_at(44)));
            }
            LC_DYLD_EXPORTS_TRIE => {
                self.exports_trie = Some((u32_at(8), u32_at(12)));
            }
            _ => {}
        }
    }

    fn segment_64(body: &[u8], le: bool) -> Option<Segment> {
        let nsects = read_u32(body, 64, le)? as usize;
        let mut sections = Vec::with_capacity(nsects.min(64));
        for i in 0..nsects {
            let s = 72 + i * 80;
            sections.push(Section {
                sectname: fixed_name(body.get(s..s + 16)?),
                segname: fixed_name(body.get(s + 16..s + 32)?),
                addr: read_u64(body, s + 32, le)?,
                size: read_u64(body, s + 40, le)?,
                offset: read_u32(body, s + 48, le)?,
                flags: read_u32(body, s + 64, le)?,
                reserved1: read_u32(body, s + 68, le)?,
            });
        }
        Some(Segment {
            name: fixed_name(body.get(8..24)?),
            vmaddr: read_u64(body, 24, le)?,
            vmsize: read_u64(body, 32, le)?,
            fileoff: read_u64(body, 40, le)?,
            filesize: read_u64(body, 48, le)?,
            sections,
        })
    }

    fn segment_32(body: &[u8], le: bool) -> Option<Segment> {
        let nsects = read_u32(body, 48, le)? as usize;
        let mut sections = Vec::with_capacity(nsects.min(64));
        for i in 0..nsects {
            let s = 56 + i * 68;
            sections.push(Section {
                sectname: fixed_name(body.get(s..s + 16)?),
                segname: fixed_name(body.get(s + 16..s + 32)?),
                addr: u64::from(read_u32(body, s + 32, le)?),
                size: u64::from(read_u32(body, s + 36, le)?),
                offset: read_u32(body, s + 40, le)?,
                flags: read_u32(body, s + 56, le)?,
                reserved1: read_u32(body, s + 60, le)?,
            });
        }
        Some(Segment {
            name: fixed_name(body.get(8..24)?),
            vmaddr: u64::from(read_u32(body, 24, le)?),
            vmsize: u64::from(read_u32(body, 28, le)?),
            fileoff: u64::from(read_u32(body, 32, le)?),
            filesize: u64::from(read_u32(body, 36, le)?),
            sections,
        })
    }

    pub fn memory(&self) -> Memory<'data> {
        self.memory
    }

    pub fn is_64(&self) -> bool {
        self.is_64
    }

    pub fn is_little_endian(&self) -> bool {
        self.le
    }

    pub fn cputype(&self) -> CpuType {
        self.cputype
    }

    pub fn filetype(&self) -> u32 {
        self.filetype
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn segment(&self, name: &str) -> Option<&Segment> {
        self.segments.iter().find(|s| s.name == name)
    }

    pub fn sections(&self) -> impl Iterator<Item = &Section> {
        self.segments.iter().flat_map(|s| s.sections.iter())
    }

    pub fn symtab(&self) -> Option<&SymtabCommand> {
        self.symtab.as_ref()
    }

    pub fn dysymtab(&self) -> Option<&DysymtabCommand> {
        self.dysymtab.as_ref()
    }

    pub fn dynamic_ranges(&self) -> Option<DynamicRanges> {
        self.dysymtab.as_ref().map(DynamicRanges::from)
    }

    pub fn text_vmaddr(&self) -> u64 {
        self.segment(SEG_TEXT).map(|s| s.vmaddr).unwrap_or(0)
    }

    /// Distance between a linkedit file offset and its position relative to the
    /// header. Zero for buffers, which hold the file layout verbatim.
    pub fn file_slide(&self) -> i64 {
        if !self.memory.is_mapped() {
            return 0;
        }
        match self.segment(SEG_LINKEDIT) {
            Some(linkedit) => (linkedit.vmaddr as i64)
                .wrapping_sub(self.text_vmaddr() as i64)
                .wrapping_sub(linkedit.fileoff as i64),
            None => 0,
        }
    }

    /// Value added to a symbol's `n_value` to produce its address.
    pub fn address_base(&self) -> usize {
        self.memory.base().wrapping_sub(self.text_vmaddr() as usize)
    }

    /// Bytes at a linkedit file offset.
    pub fn linkedit_bytes(&self, fileoff: u32, len: usize) -> Option<&'data [u8]> {
        self.memory
            .bytes(i64::from(fileoff).wrapping_add(self.file_slide()), len)
    }

    pub fn symbol_table(&self) -> Option<SymbolTable<'data>> {
        let symtab = self.symtab?;
        let entry_size = if self.is_64 { 16 } else { 12 };
        let symbols =
            self.linkedit_bytes(symtab.symoff, (symtab.nsyms as usize).checked_mul(entry_size)?)?;
        let strings = self.linkedit_bytes(symtab.stroff, symtab.strsize as usize)?;
        Some(SymbolTable {
            symbols,
            strings,
            count: symtab.nsyms,
            is_64: self.is_64,
            le: self.le,
        })
    }

    /// Entries of the indirect symbol table.
    pub fn indirect_symbols(&self) -> Option<IndirectSymbols<'data>> {
        let dysymtab = self.dysymtab?;
        let bytes = self.linkedit_bytes(
            dysymtab.indirectsymoff,
            (dysymtab.nindirectsyms as usize).checked_mul(4)?,
        )?;
        Some(IndirectSymbols { bytes, le: self.le })
    }

    /// Raw export trie bytes, when the image carries one.
    pub fn export_trie(&self) -> Option<&'data [u8]> {
        let (offset, size) = self.exports_trie?;
        if size == 0 {
            return None;
        }
        self.linkedit_bytes(offset, size as usize)
    }
}

/// The indirect symbol table: symbol-table indices for each pointer slot.
#[derive(Debug, Clone, Copy)]
pub struct IndirectSymbols<'data> {
    bytes: &'data [u8],
    le: bool,
}

impl<'data> IndirectSymbols<'data> {
    pub fn get(&self, index: usize) -> Option<u32> {
        read_u32(self.bytes, index.checked_mul(4)?, self.le)
    }

    pub fn len(&self) -> usize {
        self.bytes.len() / 4
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}
