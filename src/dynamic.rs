//! Decoder for the `.dynamic` section of a DSO.
use core::fmt;

use crate::{
    error::{DynamicError, DynldError},
    sym::SYM_ENTRY_SIZE,
};

/// Number of dynamic tags kept in the dense table. Entries with larger
/// tags are ignored by the decoder.
pub const DT_MAX_CNT: usize = 29;

/// Upper limit of `DT_NEEDED` entries per DSO. Deliberately small: the
/// linker does not support arbitrary dependency graphs.
pub const MAX_NEEDED: usize = 1;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DynamicTag {
    /// Marks the end of the dynamic array.
    Null = 0,
    /// The string table offset of the name of a needed library.
    Needed = 1,
    /// Total size, in bytes, of the PLT relocation entries.
    PltRelSz = 2,
    /// Address of the global offset table.
    PltGot = 3,
    /// Address of the SysV symbol hash table.
    Hash = 4,
    /// Address of the dynamic string table.
    StrTab = 5,
    /// Address of the dynamic symbol table.
    SymTab = 6,
    /// Address of a relocation table with Elf64Rela entries.
    RelA = 7,
    /// Total size, in bytes, of the DT_RELA relocation table.
    RelASz = 8,
    /// Size, in bytes, of each RelA relocation entry.
    RelAEnt = 9,
    /// Total size, in bytes, of the string table.
    StrSz = 10,
    /// Size, in bytes, of each symbol table entry.
    SymEnt = 11,
    /// Address of the initialization function.
    Init = 12,
    /// Address of the termination function.
    Fini = 13,
    /// The string table offset of the name of this shared object.
    SoName = 14,
    /// The string table offset of a library search path string.
    RPath = 15,
    /// Modifies the symbol resolution algorithm; value ignored.
    Symbolic = 16,
    /// Address of a relocation table with Rel entries.
    Rel = 17,
    /// Total size, in bytes, of the Rel relocation table.
    RelSz = 18,
    /// Size, in bytes, of each Rel relocation entry.
    RelEnt = 19,
    /// Type of relocation entry used for the PLT.
    PltRel = 20,
    /// Reserved for debugger use.
    Debug = 21,
    /// Signals relocations against a non-writable segment.
    TextRel = 22,
    /// Address of the relocations associated with the PLT.
    JmpRel = 23,
    /// Process all relocations before transferring control.
    BindNow = 24,
    /// Pointer to an array of initialization function pointers.
    InitArray = 25,
    /// Pointer to an array of termination function pointers.
    FiniArray = 26,
    /// Size, in bytes, of the initialization function array.
    InitArraySz = 27,
    /// Size, in bytes, of the termination function array.
    FiniArraySz = 28,
}

impl DynamicTag {
    pub fn from_u64(value: u64) -> Option<DynamicTag> {
        let tag = match value {
            0 => Self::Null,
            1 => Self::Needed,
            2 => Self::PltRelSz,
            3 => Self::PltGot,
            4 => Self::Hash,
            5 => Self::StrTab,
            6 => Self::SymTab,
            7 => Self::RelA,
            8 => Self::RelASz,
            9 => Self::RelAEnt,
            10 => Self::StrSz,
            11 => Self::SymEnt,
            12 => Self::Init,
            13 => Self::Fini,
            14 => Self::SoName,
            15 => Self::RPath,
            16 => Self::Symbolic,
            17 => Self::Rel,
            18 => Self::RelSz,
            19 => Self::RelEnt,
            20 => Self::PltRel,
            21 => Self::Debug,
            22 => Self::TextRel,
            23 => Self::JmpRel,
            24 => Self::BindNow,
            25 => Self::InitArray,
            26 => Self::FiniArray,
            27 => Self::InitArraySz,
            28 => Self::FiniArraySz,
            _ => return None,
        };
        Some(tag)
    }
}

impl fmt::Display for DynamicTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Null => "DT_NULL",
            Self::Needed => "DT_NEEDED",
            Self::PltRelSz => "DT_PLTRELSZ",
            Self::PltGot => "DT_PLTGOT",
            Self::Hash => "DT_HASH",
            Self::StrTab => "DT_STRTAB",
            Self::SymTab => "DT_SYMTAB",
            Self::RelA => "DT_RELA",
            Self::RelASz => "DT_RELASZ",
            Self::RelAEnt => "DT_RELAENT",
            Self::StrSz => "DT_STRSZ",
            Self::SymEnt => "DT_SYMENT",
            Self::Init => "DT_INIT",
            Self::Fini => "DT_FINI",
            Self::SoName => "DT_SONAME",
            Self::RPath => "DT_RPATH",
            Self::Symbolic => "DT_SYMBOLIC",
            Self::Rel => "DT_REL",
            Self::RelSz => "DT_RELSZ",
            Self::RelEnt => "DT_RELENT",
            Self::PltRel => "DT_PLTREL",
            Self::Debug => "DT_DEBUG",
            Self::TextRel => "DT_TEXTREL",
            Self::JmpRel => "DT_JMPREL",
            Self::BindNow => "DT_BIND_NOW",
            Self::InitArray => "DT_INIT_ARRAY",
            Self::FiniArray => "DT_FINI_ARRAY",
            Self::InitArraySz => "DT_INIT_ARRAYSZ",
            Self::FiniArraySz => "DT_FINI_ARRAYSZ",
        };
        f.write_str(name)
    }
}

/// Decoded view of a `.dynamic` section.
///
/// Values are kept in a dense table indexed by tag, `0` meaning "tag not
/// present". `DT_NEEDED` entries are collected separately since the tag can
/// repeat.
#[derive(Debug)]
pub struct DynInfo {
    table: [u64; DT_MAX_CNT],
    needed: [u64; MAX_NEEDED],
    needed_len: usize,
}

impl DynInfo {
    /// Decode dynamic entries until the terminating `DT_NULL`.
    ///
    /// Repeated tags are last-wins; tags outside the dense table are
    /// ignored without stopping the walk. Validates that the string table,
    /// symbol table and SysV hash table entries required of a well-formed
    /// DSO are all present.
    pub fn decode<I>(entries: I) -> Result<Self, DynldError>
    where
        I: IntoIterator<Item = (u64, u64)>,
    {
        let mut info = DynInfo {
            table: [0; DT_MAX_CNT],
            needed: [0; MAX_NEEDED],
            needed_len: 0,
        };

        for (tag, val) in entries {
            if tag == DynamicTag::Null as u64 {
                break;
            }

            if tag == DynamicTag::Needed as u64 {
                if info.needed_len == MAX_NEEDED {
                    return Err(DynamicError::TooManyNeeded(MAX_NEEDED).into());
                }
                info.needed[info.needed_len] = val;
                info.needed_len += 1;
            } else if DynamicTag::from_u64(tag).is_some() {
                info.table[tag as usize] = val;
            }
        }

        for tag in [
            DynamicTag::StrTab,
            DynamicTag::StrSz,
            DynamicTag::SymTab,
            DynamicTag::SymEnt,
            DynamicTag::Hash,
        ] {
            if info.get(tag) == 0 {
                return Err(DynamicError::MissingTag(tag).into());
            }
        }

        let syment = info.get(DynamicTag::SymEnt);
        if syment != SYM_ENTRY_SIZE as u64 {
            return Err(DynamicError::SymbolEntrySize(syment).into());
        }

        Ok(info)
    }

    /// Decode the `.dynamic` section found at `base + dynoff` in a mapped
    /// image.
    ///
    /// # Safety
    ///
    /// `base + dynoff` must point at a `DT_NULL` terminated sequence of
    /// `Elf64Dyn` entries inside a live mapping.
    pub unsafe fn decode_at(base: *const u8, dynoff: u64) -> Result<Self, DynldError> {
        let mut dynp = base.add(dynoff as usize) as *const u64;
        Self::decode(core::iter::from_fn(move || {
            let tag = dynp.read_unaligned();
            let val = dynp.add(1).read_unaligned();
            dynp = dynp.add(2);
            Some((tag, val))
        }))
    }

    /// Value stored for `tag`, `0` if the tag is not present.
    pub fn get(&self, tag: DynamicTag) -> u64 {
        self.table[tag as usize]
    }

    /// String table indices of the shared object dependencies, in the
    /// order the `DT_NEEDED` entries appeared.
    pub fn needed(&self) -> &[u64] {
        &self.needed[..self.needed_len]
    }
}
