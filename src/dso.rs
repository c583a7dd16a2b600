//! Handle for one dynamic shared object mapped into the process image.
use core::ffi::{c_char, CStr};

use crate::{
    auxv::{AuxView, AuxvTag},
    dynamic::{DynInfo, DynamicTag},
    error::{AuxvError, DynamicError, DynldError},
    reader::Reader,
    reloc::{Rela, RELA_ENTRY_SIZE},
    segment::SegmentType,
    sym::{Symbol, SYM_ENTRY_SIZE},
    ProgramHeader, PHDR_ENTRY_SIZE,
};

/// One ELF image in memory: the load bias all of its virtual addresses
/// are relative to, the optional entry function (main program only) and
/// the decoded `.dynamic` section. Derived views like the string table or
/// the relocation tables are computed on demand from `base` plus the
/// dynamic values.
#[derive(Debug)]
pub struct Dso {
    base: *mut u8,
    entry: Option<u64>,
    dyn_info: DynInfo,
}

impl Dso {
    /// Build the DSO handle for the user program the kernel already
    /// mapped.
    ///
    /// The base address is recovered from the auxiliary vector: `AT_PHDR`
    /// holds the absolute address of the program header table while the
    /// `PT_PHDR` entry holds its image-relative address, so the
    /// difference of the two is the load bias.
    ///
    /// # Safety
    ///
    /// `aux` must describe this process, with `AT_PHDR`/`AT_PHNUM`
    /// pointing at the live program header table of a mapped program.
    pub unsafe fn program(aux: &AuxView) -> Result<Dso, DynldError> {
        if aux.get(AuxvTag::Phdr) == 0 || aux.get(AuxvTag::ExecFd) != 0 {
            return Err(AuxvError::ProgramNotMapped.into());
        }

        let phent = aux.get(AuxvTag::Phent);
        if phent != PHDR_ENTRY_SIZE as u64 {
            return Err(AuxvError::PhdrEntrySize(phent).into());
        }

        let at_phdr = aux.get(AuxvTag::Phdr);
        let phnum = aux.get(AuxvTag::Phnum) as usize;
        let bytes = core::slice::from_raw_parts(at_phdr as *const u8, phnum * PHDR_ENTRY_SIZE);
        let mut reader = Reader::from_bytes(bytes);

        let mut base = None;
        let mut dynoff = None;
        for _ in 0..phnum {
            let phdr = ProgramHeader::parse(&mut reader)?;
            match phdr.p_type {
                SegmentType::PtPhdr => {
                    let vaddr: u64 = phdr.p_vaddr.into();
                    if at_phdr < vaddr {
                        return Err(AuxvError::PhdrBelowVaddr.into());
                    }
                    base = Some((at_phdr - vaddr) as *mut u8);
                }
                SegmentType::PtDynamic => dynoff = Some(phdr.p_vaddr.into()),
                SegmentType::PtTls => return Err(DynldError::TlsNotSupported),
                _ => {}
            }
        }

        let base = base.ok_or(DynldError::NoPhdrSegment)?;
        let dynoff: u64 = dynoff.ok_or(DynldError::NoDynamicSegment)?;

        let entry = aux.get(AuxvTag::Entry);
        if entry == 0 {
            return Err(AuxvError::NoEntry.into());
        }

        let dyn_info = DynInfo::decode_at(base, dynoff)?;

        Ok(Dso {
            base,
            entry: Some(entry),
            dyn_info,
        })
    }

    /// Wrap an image the dependency mapper just placed at `base`.
    ///
    /// # Safety
    ///
    /// `base` must be a live mapping with a well-formed `.dynamic`
    /// section at image-relative `dynoff`.
    pub unsafe fn from_mapped(base: *mut u8, dynoff: u64) -> Result<Dso, DynldError> {
        let dyn_info = DynInfo::decode_at(base, dynoff)?;
        Ok(Dso {
            base,
            entry: None,
            dyn_info,
        })
    }

    pub fn base(&self) -> *mut u8 {
        self.base
    }

    /// Entry address of the image, only set for the main program.
    pub fn entry(&self) -> Option<u64> {
        self.entry
    }

    /// Raw `.dynamic` value for `tag`, `0` meaning "not present".
    pub fn dynamic(&self, tag: DynamicTag) -> u64 {
        self.dyn_info.get(tag)
    }

    /// String table indices of the shared object dependencies.
    pub fn needed(&self) -> &[u64] {
        self.dyn_info.needed()
    }

    /// Absolute address of the image-relative `offset`.
    pub fn vaddr(&self, offset: u64) -> *mut u8 {
        self.base.wrapping_add(offset as usize)
    }

    /// Number of dynamic symbol table entries.
    ///
    /// The SysV hash table starts with `nbucket, nchain`, and the chain
    /// array parallels the symbol table, so `nchain` is the entry count.
    /// The hash table is used for nothing else here: lookups scan the
    /// symbol table linearly.
    pub fn num_dynsyms(&self) -> u64 {
        let hashtab = self.vaddr(self.dynamic(DynamicTag::Hash)) as *const u32;
        unsafe { hashtab.add(1).read_unaligned() as u64 }
    }

    /// Null-terminated string at `idx` in the dynamic string table.
    pub fn str_at(&self, idx: u64) -> Result<&CStr, DynldError> {
        if idx >= self.dynamic(DynamicTag::StrSz) {
            return Err(DynamicError::StrIndexOutOfBounds(idx).into());
        }
        let string = self.vaddr(self.dynamic(DynamicTag::StrTab) + idx);
        Ok(unsafe { CStr::from_ptr(string as *const c_char) })
    }

    /// Entry `idx` of the dynamic symbol table.
    pub fn sym_at(&self, idx: u64) -> Result<Symbol, DynldError> {
        if idx >= self.num_dynsyms() {
            return Err(DynamicError::SymIndexOutOfBounds(idx).into());
        }
        let entry = self.vaddr(self.dynamic(DynamicTag::SymTab) + idx * SYM_ENTRY_SIZE as u64);
        let bytes = unsafe { core::slice::from_raw_parts(entry, SYM_ENTRY_SIZE) };
        Ok(Symbol::parse(&mut Reader::from_bytes(bytes))?)
    }

    /// Number of entries in the RELA relocation table.
    pub fn rela_count(&self) -> u64 {
        self.dynamic(DynamicTag::RelASz) / RELA_ENTRY_SIZE as u64
    }

    /// Entry `idx` of the RELA relocation table.
    pub fn rela_at(&self, idx: u64) -> Result<Rela, DynldError> {
        if (idx + 1) * RELA_ENTRY_SIZE as u64 > self.dynamic(DynamicTag::RelASz) {
            return Err(DynamicError::RelaIndexOutOfBounds(idx).into());
        }
        let entry = self.vaddr(self.dynamic(DynamicTag::RelA) + idx * RELA_ENTRY_SIZE as u64);
        let bytes = unsafe { core::slice::from_raw_parts(entry, RELA_ENTRY_SIZE) };
        Ok(Rela::parse(&mut Reader::from_bytes(bytes))?)
    }

    /// Number of entries in the PLT relocation table.
    pub fn pltrela_count(&self) -> u64 {
        self.dynamic(DynamicTag::PltRelSz) / RELA_ENTRY_SIZE as u64
    }

    /// Entry `idx` of the PLT relocation table.
    pub fn pltrela_at(&self, idx: u64) -> Result<Rela, DynldError> {
        if (idx + 1) * RELA_ENTRY_SIZE as u64 > self.dynamic(DynamicTag::PltRelSz) {
            return Err(DynamicError::PltRelaIndexOutOfBounds(idx).into());
        }
        let entry = self.vaddr(self.dynamic(DynamicTag::JmpRel) + idx * RELA_ENTRY_SIZE as u64);
        let bytes = unsafe { core::slice::from_raw_parts(entry, RELA_ENTRY_SIZE) };
        Ok(Rela::parse(&mut Reader::from_bytes(bytes))?)
    }

    /// Naive lookup of a global symbol definition in this DSO.
    ///
    /// Linearly scans the dynamic symbol table instead of hashing; the
    /// result is the same and the tables involved are tiny. Returns the
    /// absolute symbol address on a hit.
    pub fn lookup(&self, name: &CStr) -> Result<Option<*mut u8>, DynldError> {
        for idx in 0..self.num_dynsyms() {
            let sym = self.sym_at(idx)?;
            if !sym.is_global_definition() {
                continue;
            }
            if self.str_at(sym.name() as u64)? == name {
                return Ok(Some(self.vaddr(sym.value().into())));
            }
        }
        Ok(None)
    }
}
