use thiserror::Error;

use crate::{dynamic::DynamicTag, file_type, machine};

/// Top-level error of the dynamic linker.
///
/// Every validation failure in the crate folds into this type. No error is
/// recovered from: the runtime entry path prints the chain to stderr and
/// terminates the process with a nonzero status.
#[derive(Debug, Error)]
pub enum DynldError {
    #[error("auxiliary vector: {0}")]
    Auxv(#[from] AuxvError),
    #[error("ELF header: {0}")]
    ElfHeader(#[from] ElfHeaderError),
    #[error("dynamic section: {0}")]
    Dynamic(#[from] DynamicError),
    #[error("segment: {0}")]
    Segment(#[from] SegmentError),
    #[error("{0}")]
    Map(#[from] MapError),
    #[error("relocation: {0}")]
    Reloc(#[from] RelocError),
    #[error("parsing error: {0}")]
    Parse(#[from] ParseError),
    #[error("{0}")]
    Sys(#[from] SysError),
    #[error("thread local storage not supported, found PT_TLS segment")]
    TlsNotSupported,
    #[error("PT_PHDR entry missing in program headers")]
    NoPhdrSegment,
    #[error("PT_DYNAMIC entry missing in program headers")]
    NoDynamicSegment,
    #[error("user program must have exactly one shared object dependency")]
    WantOneDependency,
    #[error("shared object dependencies must not have further dependencies")]
    NestedDependency,
}

#[derive(Debug, Error)]
pub enum AuxvError {
    #[error("AT_PHDR entry missing, kernel did not map the user program")]
    ProgramNotMapped,
    #[error("AT_ENTRY entry missing")]
    NoEntry,
    #[error("AT_PHENT value {0} does not match the Elf64Phdr size")]
    PhdrEntrySize(u64),
    #[error("AT_PAGESZ value {0} does not match the hard-coded page size")]
    PageSizeMismatch(u64),
    #[error("AT_PHDR address lies below the PT_PHDR vaddr")]
    PhdrBelowVaddr,
}

#[derive(Debug, Error)]
pub enum ElfHeaderError {
    #[error("cannot find ELF magic, found: {0:x?}")]
    BadMagic([u8; 4]),
    #[error("ELF is not 64-bit")]
    Not64Bit,
    #[error("ELF is not little endian")]
    BadEndianness,
    #[error("ELF has bad version (not 1)")]
    BadVersion,
    #[error("ELF is not built for the SysV OS ABI")]
    BadOsAbi,
    #[error("unknown object file type: {0}")]
    FileTypeError(#[from] file_type::Error),
    #[error("unknown machine: {0}")]
    MachineError(#[from] machine::Error),
    #[error("not an x86_64 image")]
    WrongMachine,
    #[error("not a shared object (ET_DYN)")]
    NotSharedObject,
    #[error("Elf64Ehdr size mismatch: {0}")]
    EhdrSize(u16),
    #[error("Elf64Phdr size mismatch: {0}")]
    PhdrEntrySize(u16),
    #[error("no program headers")]
    NoProgramHeaders,
    #[error("parsing error: {0}")]
    ParseError(#[from] ParseError),
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("trying to parse more than the upper bound")]
    OutOfBounds,
}

#[derive(Debug, Error)]
pub enum DynamicError {
    #[error("{0} missing in dynamic section")]
    MissingTag(DynamicTag),
    #[error("too many shared object dependencies, limit is {0}")]
    TooManyNeeded(usize),
    #[error("Elf64Sym size mismatch, DT_SYMENT is {0}")]
    SymbolEntrySize(u64),
    #[error("string table indexed out of bounds: {0}")]
    StrIndexOutOfBounds(u64),
    #[error("symbol table indexed out of bounds: {0}")]
    SymIndexOutOfBounds(u64),
    #[error("relocation table indexed out of bounds: {0}")]
    RelaIndexOutOfBounds(u64),
    #[error("PLT relocation table indexed out of bounds: {0}")]
    PltRelaIndexOutOfBounds(u64),
}

#[derive(Debug, Error)]
pub enum SegmentError {
    #[error("segment type unknown: {0:#x}")]
    TypeUnknown(u32),
    #[error("segment flags unknown: {0:#x}")]
    FlagsUnknown(u32),
    #[error("parsing error: {0}")]
    ParseError(#[from] ParseError),
}

#[derive(Debug, Error)]
pub enum MapError {
    #[error("dependency '{0}' does not exist")]
    NotFound(String),
    #[error("short read while loading {0}")]
    ShortRead(&'static str),
    #[error("no PT_LOAD segments")]
    NoLoadSegments,
}

#[derive(Debug, Error)]
pub enum RelocError {
    #[error("failed to look up symbol '{0}'")]
    UnresolvedSymbol(String),
    #[error("unsupported relocation type: {0}")]
    UnsupportedType(u32),
    #[error("parsing error: {0}")]
    ParseError(#[from] ParseError),
}

/// Error of the raw system-call surface. Carries the `errno` value left
/// behind by the kernel so diagnostics can name the exact failure.
#[derive(Debug, Error)]
#[error("syscall {op} failed with errno {errno}")]
pub struct SysError {
    pub op: &'static str,
    pub errno: i32,
}
