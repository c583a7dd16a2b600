//! RELA relocation entries and the relocation kinds this linker applies.
use crate::{addr::Addr, error::RelocError, reader::Reader};

/// On-disk size of one `Elf64Rela` entry.
pub const RELA_ENTRY_SIZE: usize = 24;

/// One relocation record with an explicit addend. x86_64 only uses Rela
/// entries.
#[derive(Debug, Clone, Copy)]
pub struct Rela {
    /// Image-relative address of the storage unit the relocation patches.
    pub r_offset: Addr,
    /// The kind of patch to perform.
    pub r_type: RelType,
    /// Dynamic symbol table index the relocation refers to.
    pub r_sym: u32,
    /// Constant addend used when computing the stored value.
    pub r_addend: i64,
}

impl Rela {
    pub fn parse(reader: &mut Reader) -> Result<Self, RelocError> {
        let r_offset = Addr::parse(reader)?;
        // r_info packs the type in the low and the symbol index in the
        // high 32 bit.
        let r_type = RelType::try_from(reader.read_u32()?)?;
        let r_sym = reader.read_u32()?;
        let r_addend = reader.read_i64()?;

        Ok(Self {
            r_offset,
            r_type,
            r_sym,
            r_addend,
        })
    }
}

/// Relocation kinds understood by the linker. Everything else is fatal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RelType {
    /// Patch with the 64-bit address of the symbol.
    W64,
    /// Copy the initial bytes of a library-defined object into storage
    /// owned by the main program.
    Copy,
    /// GOT entry for a data object.
    GlobDat,
    /// PLT entry, bound eagerly here.
    JumpSlot,
    /// Patch with base plus addend, no symbol lookup.
    Relative,
}

impl TryFrom<u32> for RelType {
    type Error = RelocError;
    fn try_from(value: u32) -> Result<RelType, Self::Error> {
        let rel_type = match value {
            1 => Self::W64,
            5 => Self::Copy,
            6 => Self::GlobDat,
            7 => Self::JumpSlot,
            8 => Self::Relative,
            _ => return Err(RelocError::UnsupportedType(value)),
        };

        Ok(rel_type)
    }
}
