//! The link map and the relocation engine driven over it.
use core::ffi::CStr;

use crate::{
    dso::Dso,
    error::{DynldError, RelocError},
    mem, pfmt,
    reloc::{Rela, RelType},
};

/// Ordered chain of DSOs defining the symbol lookup precedence. The head
/// is always the main program, followed by its dependencies in load
/// order. Entries borrow DSO handles that strictly outlive the chain.
pub struct LinkMap<'a> {
    pub dso: &'a Dso,
    pub next: Option<&'a LinkMap<'a>>,
}

impl<'a> LinkMap<'a> {
    /// Walk the chain starting at this entry.
    pub fn iter(&'a self) -> LinkMapIter<'a> {
        LinkMapIter { cursor: Some(self) }
    }

    /// Address of the first definition of `name` in chain order.
    pub fn lookup(&'a self, name: &CStr) -> Result<Option<*mut u8>, DynldError> {
        for dso in self.iter() {
            if let Some(addr) = dso.lookup(name)? {
                return Ok(Some(addr));
            }
        }
        Ok(None)
    }
}

pub struct LinkMapIter<'a> {
    cursor: Option<&'a LinkMap<'a>>,
}

impl<'a> Iterator for LinkMapIter<'a> {
    type Item = &'a Dso;

    fn next(&mut self) -> Option<&'a Dso> {
        let entry = self.cursor?;
        self.cursor = entry.next;
        Some(entry.dso)
    }
}

/// Resolve all relocations of `dso` against the lookup order `map`.
///
/// Processes the RELA table (typically one entry per undefined data
/// symbol) followed by the PLT table (one entry per undefined function
/// symbol, bound eagerly here).
pub fn resolve_relocs(dso: &Dso, map: &LinkMap) -> Result<(), DynldError> {
    for idx in 0..dso.rela_count() {
        resolve_reloc(dso, map, &dso.rela_at(idx)?)?;
    }
    for idx in 0..dso.pltrela_count() {
        resolve_reloc(dso, map, &dso.pltrela_at(idx)?)?;
    }
    Ok(())
}

fn resolve_reloc(dso: &Dso, map: &LinkMap, reloc: &Rela) -> Result<(), DynldError> {
    let target = dso.vaddr(reloc.r_offset.into());

    match reloc.r_type {
        RelType::Relative => {
            // No symbol involved: rebase the addend onto this image.
            let addr = dso.base().wrapping_offset(reloc.r_addend as isize);
            pfmt!("Resolved reloc %s to %p (base %p)\n", "<relative>", addr, dso.base());
            unsafe { (target as *mut u64).write_unaligned(addr as u64) };
        }
        RelType::W64 | RelType::GlobDat | RelType::JumpSlot => {
            let sym = dso.sym_at(reloc.r_sym as u64)?;
            let name = dso.str_at(sym.name() as u64)?;
            let addr = map.lookup(name)?.ok_or_else(|| unresolved(name))?;
            pfmt!("Resolved reloc %s to %p (base %p)\n", name, addr, dso.base());
            unsafe { (target as *mut u64).write_unaligned(addr as u64) };
        }
        RelType::Copy => {
            // The main program owns storage for an object whose
            // authoritative initial value lives in a library. The lookup
            // starts at the second link map entry: the head is the main
            // program itself, and its own placeholder must never satisfy
            // the relocation. Both images keep independent storage
            // afterwards, the copy happens exactly once.
            let sym = dso.sym_at(reloc.r_sym as u64)?;
            let name = dso.str_at(sym.name() as u64)?;
            let addr = match map.next {
                Some(tail) => tail.lookup(name)?,
                None => None,
            };
            let addr = addr.ok_or_else(|| unresolved(name))?;
            pfmt!("Resolved reloc %s to %p (base %p)\n", name, addr, dso.base());
            unsafe { mem::copy(target, addr, sym.size() as usize) };
        }
    }

    Ok(())
}

fn unresolved(name: &CStr) -> DynldError {
    RelocError::UnresolvedSymbol(name.to_string_lossy().into_owned()).into()
}
