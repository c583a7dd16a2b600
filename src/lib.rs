//! A minimal dynamic linker for 64-bit ELF executables on x86_64 Linux.
//!
//! Invoked by the kernel as the program interpreter, the linker decodes
//! the process-init frame on the initial stack, recovers the already
//! mapped user program, maps its shared object dependency from the
//! current working directory, eagerly resolves all relocations across the
//! link map, runs the initializers, transfers control to the user entry
//! and runs the finalizers on return. Every validation failure is fatal:
//! a diagnostic on stderr and a nonzero exit.

#[cfg(not(all(target_os = "linux", target_arch = "x86_64")))]
compile_error!("only supported on linux(x86_64)");

pub mod addr;
pub mod alloc;
pub mod auxv;
pub mod dso;
pub mod dynamic;
pub mod error;
pub mod file_type;
pub mod fmt;
pub mod io;
pub mod link;
pub mod machine;
pub mod map;
pub mod mem;
pub mod reader;
pub mod reloc;
pub mod runtime;
pub mod segment;
pub mod sym;
pub mod sys;

#[cfg(test)]
pub(crate) mod testimg;

use crate::{
    addr::Addr,
    error::{ElfHeaderError, SegmentError},
    file_type::FileType,
    machine::Machine,
    reader::Reader,
    segment::{SegmentFlags, SegmentType},
};

/// Hard-coded page size, verified against `AT_PAGESZ` at startup.
pub const PAGE_SIZE: u64 = 4096;

/// On-disk size of the ELF file header.
pub const EHDR_SIZE: usize = 64;

/// On-disk size of one program header entry.
pub const PHDR_ENTRY_SIZE: usize = 56;

const ELF_MAGIC_SIZE: usize = 4;
const ELF_MAGIC: &[u8] = &[0x7F, 0x45, 0x4C, 0x46];

/// The ELF file header of a shared object, limited to the fields the
/// linker consumes.
#[derive(Debug)]
pub struct ElfHeader {
    pub e_type: FileType,
    pub e_machine: Machine,
    /// Memory address of the entry point.
    pub e_entry: Addr,
    /// File offset of the program header table.
    pub e_phoff: Addr,
    /// File offset of the section header table.
    pub e_shoff: Addr,
    /// Size of one program header table entry.
    pub e_phentsize: u16,
    /// Number of entries in the program header table.
    pub e_phnum: u16,
}

impl ElfHeader {
    pub fn parse(reader: &mut Reader) -> Result<Self, ElfHeaderError> {
        // Read the magic
        let e_magic = reader.read_slice(ELF_MAGIC_SIZE)?;
        if e_magic != ELF_MAGIC {
            let mut magic = [0u8; 4];
            magic.copy_from_slice(e_magic);
            return Err(ElfHeaderError::BadMagic(magic));
        }

        // Check the class is 64-bit
        let e_class = reader.read_u8()?;
        if e_class != 2 {
            return Err(ElfHeaderError::Not64Bit);
        }

        // Check the data encoding is little endian
        let e_data = reader.read_u8()?;
        if e_data != 1 {
            return Err(ElfHeaderError::BadEndianness);
        }

        // Should be 1 for the original and current version of ELF
        let e_version = reader.read_u8()?;
        if e_version != 1 {
            return Err(ElfHeaderError::BadVersion);
        }

        // Only the SysV OS ABI is supported
        let e_osabi = reader.read_u8()?;
        if e_osabi != 0 {
            return Err(ElfHeaderError::BadOsAbi);
        }

        // Skip the remaining padding
        let _ = reader.read_slice(8)?;

        let e_type: FileType = reader.read_u16()?.try_into()?;
        let e_machine: Machine = reader.read_u16()?.try_into()?;

        // Read yet another version
        let e_version = reader.read_u32()?;
        if e_version != 1 {
            return Err(ElfHeaderError::BadVersion);
        }

        let e_entry = Addr::parse(reader)?;
        let e_phoff = Addr::parse(reader)?;
        let e_shoff = Addr::parse(reader)?;

        // Skip `e_flags`
        let _ = reader.read_slice(4)?;

        // The header must describe itself with the on-disk size
        let e_ehsize = reader.read_u16()?;
        if e_ehsize as usize != EHDR_SIZE {
            return Err(ElfHeaderError::EhdrSize(e_ehsize));
        }

        let e_phentsize = reader.read_u16()?;
        let e_phnum = reader.read_u16()?;

        Ok(ElfHeader {
            e_type,
            e_machine,
            e_entry,
            e_phoff,
            e_shoff,
            e_phentsize,
            e_phnum,
        })
    }
}

/// One entry of the program header table, describing how a piece of the
/// file lands in the process image.
#[derive(Debug, Clone, Copy)]
pub struct ProgramHeader {
    /// Identifies the type of the segment
    pub p_type: SegmentType,
    /// Permission bits of the segment
    pub p_flags: SegmentFlags,
    /// Offset of the segment in the file image
    pub p_offset: Addr,
    /// Virtual address of the segment in memory
    pub p_vaddr: Addr,
    /// Reserved for the segment's physical address
    pub p_paddr: Addr,
    /// Size in bytes of the segment in the file image. May be 0.
    pub p_filesz: u64,
    /// Size in bytes of the segment in memory; any excess over `p_filesz`
    /// holds zero bytes
    pub p_memsz: u64,
    pub p_align: u64,
}

impl ProgramHeader {
    pub fn parse(reader: &mut Reader) -> Result<Self, SegmentError> {
        let p_type = SegmentType::parse(reader)?;
        let p_flags = SegmentFlags::parse(reader)?;
        let p_offset = Addr::parse(reader)?;
        let p_vaddr = Addr::parse(reader)?;
        let p_paddr = Addr::parse(reader)?;
        let p_filesz = reader.read_u64()?;
        let p_memsz = reader.read_u64()?;
        let p_align = reader.read_u64()?;

        Ok(Self {
            p_type,
            p_flags,
            p_offset,
            p_vaddr,
            p_paddr,
            p_filesz,
            p_memsz,
            p_align,
        })
    }
}
