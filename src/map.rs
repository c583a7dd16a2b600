//! Mapper turning an on-disk shared object into a [`Dso`] in the process
//! image.
use core::ffi::CStr;
use core::ptr;

use crate::{
    addr::Addr,
    dso::Dso,
    error::{DynldError, ElfHeaderError, MapError},
    file_type::FileType,
    machine::Machine,
    mem,
    reader::Reader,
    segment::SegmentType,
    sys, ElfHeader, ProgramHeader, EHDR_SIZE, PHDR_ENTRY_SIZE,
};

/// Page-aligned address range `[start, end)` the load segments occupy,
/// plus the image-relative offset of the dynamic section.
#[derive(Debug)]
struct LoadSpan {
    start: Addr,
    end: Addr,
    dynoff: u64,
}

/// Compute the load span from the program header table.
///
/// The two extremes are tracked independently: a single `PT_LOAD` that is
/// the lowest-address segment must still be reflected in the end address.
fn load_span(phdrs: &[ProgramHeader]) -> Result<LoadSpan, DynldError> {
    let mut dynoff = None;
    let mut start = u64::MAX;
    let mut end = 0u64;

    for phdr in phdrs {
        match phdr.p_type {
            SegmentType::PtDynamic => dynoff = Some(phdr.p_vaddr.into()),
            SegmentType::PtLoad => {
                let vaddr: u64 = phdr.p_vaddr.into();
                start = start.min(vaddr);
                end = end.max(vaddr + phdr.p_memsz);
            }
            SegmentType::PtTls => return Err(DynldError::TlsNotSupported),
            _ => {}
        }
    }

    if start > end {
        return Err(MapError::NoLoadSegments.into());
    }

    Ok(LoadSpan {
        start: Addr(start).page_floor(),
        end: Addr(end).page_ceil(),
        dynoff: dynoff.ok_or(DynldError::NoDynamicSegment)?,
    })
}

/// Map the shared object `dependency` and return its DSO handle.
///
/// The name is taken as a path relative to the current working directory;
/// there is no search path support of any kind.
pub fn map_dependency(dependency: &CStr) -> Result<Dso, DynldError> {
    if sys::access(dependency, libc::R_OK).is_err() {
        return Err(MapError::NotFound(dependency.to_string_lossy().into_owned()).into());
    }

    let fd = sys::open(dependency, libc::O_RDONLY)?;
    let result = map_file(fd);
    let _ = sys::close(fd);
    result
}

fn map_file(fd: i32) -> Result<Dso, DynldError> {
    let mut ehdr_bytes = [0u8; EHDR_SIZE];
    if sys::read(fd, &mut ehdr_bytes)? != ehdr_bytes.len() {
        return Err(MapError::ShortRead("Elf64Ehdr").into());
    }
    let ehdr = ElfHeader::parse(&mut Reader::from_bytes(&ehdr_bytes))?;

    if ehdr.e_type != FileType::EtDyn {
        return Err(ElfHeaderError::NotSharedObject.into());
    }
    if ehdr.e_machine != Machine::AmdX86_64 {
        return Err(ElfHeaderError::WrongMachine.into());
    }
    if ehdr.e_phnum == 0 {
        return Err(ElfHeaderError::NoProgramHeaders.into());
    }
    if ehdr.e_phentsize as usize != PHDR_ENTRY_SIZE {
        return Err(ElfHeaderError::PhdrEntrySize(ehdr.e_phentsize).into());
    }

    // Read the full program header table at `e_phoff`.
    let mut phdr_bytes = vec![0u8; ehdr.e_phnum as usize * PHDR_ENTRY_SIZE];
    if sys::pread(fd, &mut phdr_bytes, ehdr.e_phoff.into())? != phdr_bytes.len() {
        return Err(MapError::ShortRead("Elf64Phdr table").into());
    }
    let mut reader = Reader::from_bytes(&phdr_bytes);
    let mut phdrs = Vec::with_capacity(ehdr.e_phnum.into());
    for _ in 0..ehdr.e_phnum {
        phdrs.push(ProgramHeader::parse(&mut reader)?);
    }

    let span = load_span(&phdrs)?;
    let reserve_len = (span.end.0 - span.start.0) as usize;

    // Reserve the whole span without access; the segment mappings below
    // replace pieces of the reservation at fixed addresses.
    let reservation = sys::mmap(
        ptr::null_mut(),
        reserve_len,
        libc::PROT_NONE,
        libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
        -1,
        0,
    )?;
    let base = reservation.wrapping_sub(Into::<usize>::into(span.start));

    for phdr in &phdrs {
        if phdr.p_type != SegmentType::PtLoad {
            continue;
        }

        let vaddr: u64 = phdr.p_vaddr.into();
        let seg_start: u64 = phdr.p_vaddr.page_floor().into();
        let seg_end: u64 = Addr(vaddr + phdr.p_memsz).page_ceil().into();
        let file_off: u64 = phdr.p_offset.page_floor().into();

        let mapped = sys::mmap(
            base.wrapping_add(seg_start as usize),
            (seg_end - seg_start) as usize,
            phdr.p_flags.prot(),
            libc::MAP_PRIVATE | libc::MAP_FIXED,
            fd,
            file_off,
        );
        if let Err(err) = mapped {
            let _ = sys::munmap(reservation, reserve_len);
            return Err(err.into());
        }

        // The bytes between file size and memory size hold the value 0,
        // typically the .bss tail of the segment.
        if phdr.p_memsz > phdr.p_filesz {
            unsafe {
                mem::fill(
                    base.add((vaddr + phdr.p_filesz) as usize),
                    0,
                    (phdr.p_memsz - phdr.p_filesz) as usize,
                );
            }
        }
    }

    unsafe { Dso::from_mapped(base, span.dynoff) }
}
