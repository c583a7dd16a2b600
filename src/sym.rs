//! Dynamic symbol table entries.
use crate::{addr::Addr, error::ParseError, reader::Reader};

/// On-disk size of one `Elf64Sym` entry. `DT_SYMENT` must match.
pub const SYM_ENTRY_SIZE: usize = 24;

/// Section index used to mark an undefined symbol.
pub const SHN_UNDEF: u16 = 0;

/// One entry of the dynamic symbol table.
///
/// The first entry is reserved and all zeroes.
#[derive(Debug, Clone, Copy)]
pub struct Symbol {
    /// Offset of the symbol name in the dynamic string table. Zero means
    /// the symbol has no name.
    st_name: u32,
    /// Type (low four bits) and binding (high four bits).
    st_info: u8,
    st_other: u8,
    /// Index of the section the symbol is defined in, `SHN_UNDEF` for
    /// undefined symbols.
    st_shndx: u16,
    /// Image-relative value of the symbol.
    st_value: Addr,
    /// Size associated with the symbol, zero if unknown.
    st_size: u64,
}

impl Symbol {
    pub fn parse(reader: &mut Reader) -> Result<Self, ParseError> {
        let st_name = reader.read_u32()?;
        let st_info = reader.read_u8()?;
        let st_other = reader.read_u8()?;
        let st_shndx = reader.read_u16()?;
        let st_value = Addr::from(reader.read_u64()?);
        let st_size = reader.read_u64()?;
        Ok(Self {
            st_name,
            st_info,
            st_other,
            st_shndx,
            st_value,
            st_size,
        })
    }

    pub fn name(&self) -> u32 {
        self.st_name
    }

    pub fn value(&self) -> Addr {
        self.st_value
    }

    pub fn size(&self) -> u64 {
        self.st_size
    }

    pub fn sym_type(&self) -> SymbolType {
        SymbolType::from(self.st_info & 0xF)
    }

    pub fn binding(&self) -> SymbolBinding {
        SymbolBinding::from(self.st_info >> 4)
    }

    /// Whether this entry can satisfy a global symbol lookup: a defined
    /// data object or function with global binding.
    pub fn is_global_definition(&self) -> bool {
        matches!(self.sym_type(), SymbolType::Object | SymbolType::Func)
            && matches!(self.binding(), SymbolBinding::Global)
            && self.st_shndx != SHN_UNDEF
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SymbolType {
    NoType,
    Object,
    Func,
    Section,
    File,
    Other(u8),
}

impl From<u8> for SymbolType {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::NoType,
            1 => Self::Object,
            2 => Self::Func,
            3 => Self::Section,
            4 => Self::File,
            _ => Self::Other(value),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SymbolBinding {
    Local,
    Global,
    Weak,
    Other(u8),
}

impl From<u8> for SymbolBinding {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::Local,
            1 => Self::Global,
            2 => Self::Weak,
            _ => Self::Other(value),
        }
    }
}
