//! Process lifecycle: relocate both images, run initializers, hand
//! control to the user program, run finalizers, exit.
use core::arch::global_asm;
use core::mem;

use crate::{
    auxv::AuxView,
    dso::Dso,
    dynamic::DynamicTag,
    efmt,
    error::{AuxvError, DynldError},
    io,
    link::{resolve_relocs, LinkMap},
    map::map_dependency,
    sys,
};

type HookFn = unsafe extern "C" fn();

/// Run the initializers of `dso`: `DT_INIT` first (if present), then
/// every `DT_INIT_ARRAY` entry in ascending order. The array slots hold
/// absolute addresses once relocations are resolved.
pub unsafe fn run_init(dso: &Dso) {
    if dso.dynamic(DynamicTag::Init) != 0 {
        let hook: HookFn = mem::transmute(dso.vaddr(dso.dynamic(DynamicTag::Init)));
        hook();
    }

    let nhooks = dso.dynamic(DynamicTag::InitArraySz) as usize / mem::size_of::<HookFn>();
    let hooks = dso.vaddr(dso.dynamic(DynamicTag::InitArray)) as *const u64;
    for idx in 0..nhooks {
        let hook: HookFn = mem::transmute(hooks.add(idx).read_unaligned());
        hook();
    }
}

/// Run the finalizers of `dso`: every `DT_FINI_ARRAY` entry in
/// descending order, then `DT_FINI` (if present).
pub unsafe fn run_fini(dso: &Dso) {
    let nhooks = dso.dynamic(DynamicTag::FiniArraySz) as usize / mem::size_of::<HookFn>();
    let hooks = dso.vaddr(dso.dynamic(DynamicTag::FiniArray)) as *const u64;
    for idx in (0..nhooks).rev() {
        let hook: HookFn = mem::transmute(hooks.add(idx).read_unaligned());
        hook();
    }

    if dso.dynamic(DynamicTag::Fini) != 0 {
        let hook: HookFn = mem::transmute(dso.vaddr(dso.dynamic(DynamicTag::Fini)));
        hook();
    }
}

// Jump target for the PLT0 pad. The pad pushed two words on the stack,
// the GOT[1] cookie and the relocation index; move them into the first
// two SysV integer argument registers and hand over to the terminator.
global_asm!(
    ".global dynld_resolve_entry",
    "dynld_resolve_entry:",
    "pop rdi",
    "pop rsi",
    "jmp {dynresolve}",
    dynresolve = sym dynresolve,
);

extern "C" {
    fn dynld_resolve_entry();
}

/// Reached through `GOT[2]` if lazy binding is ever attempted. All
/// bindings were resolved eagerly, so getting here means a call went
/// through a relocation the linker missed; fail loudly instead of
/// jumping into the void.
extern "C" fn dynresolve(got1: u64, reloc_idx: u64) -> ! {
    efmt!(
        "dynresolve request not supported!\n\tGOT[1]    = 0x%lx\n\treloc_idx = %ld\n",
        got1,
        reloc_idx
    );
    sys::exit(1)
}

/// Install the lazy-bind handler in the GOT of `dso`.
///
/// The first three GOT entries are reserved: `GOT[0]` holds the address
/// of the dynamic section, `GOT[1]` the cookie the PLT0 pad pushes for
/// the resolver, `GOT[2]` the resolver jump target. Only `GOT[2]` is
/// written here.
pub fn setup_got(dso: &Dso) {
    if dso.dynamic(DynamicTag::PltGot) == 0 {
        return;
    }
    let got = dso.vaddr(dso.dynamic(DynamicTag::PltGot)) as *mut u64;
    unsafe { got.add(2).write_unaligned(dynld_resolve_entry as usize as u64) };
}

/// Entry point of the dynamic linker.
///
/// # Safety
///
/// `sp` must be the raw stack pointer the kernel placed control at,
/// pointing at the SysV process-init frame.
pub unsafe extern "C" fn dl_entry(sp: *const u64) -> ! {
    match run(sp) {
        Ok(()) => sys::exit(0),
        Err(err) => io::fatal(&err),
    }
}

unsafe fn run(sp: *const u64) -> Result<(), DynldError> {
    let aux = AuxView::decode(sp);
    aux.verify_page_size()?;

    let prog = Dso::program(&aux)?;

    // The user program names exactly one dependency, and that library
    // must not pull in anything further.
    if prog.needed().len() != 1 {
        return Err(DynldError::WantOneDependency);
    }
    let lib = map_dependency(prog.str_at(prog.needed()[0])?)?;
    if !lib.needed().is_empty() {
        return Err(DynldError::NestedDependency);
    }

    // The link map determines the symbol lookup order: the main program
    // is the head, the dependency follows.
    let map_lib = LinkMap {
        dso: &lib,
        next: None,
    };
    let map = LinkMap {
        dso: &prog,
        next: Some(&map_lib),
    };

    // Resolve the dependency first, then the main program, each against
    // the full link map.
    resolve_relocs(&lib, &map)?;
    resolve_relocs(&prog, &map)?;

    // Initialize the dependency before its dependent.
    run_init(&lib);
    run_init(&prog);

    // Everything is bound at this point; the handler only guards against
    // a PLT entry whose relocation was somehow missed.
    setup_got(&lib);
    setup_got(&prog);

    let entry = prog.entry().ok_or(AuxvError::NoEntry)?;
    let entry_fn: HookFn = mem::transmute(entry);
    entry_fn();

    // Finalize in reverse: the main program before the library.
    run_fini(&prog);
    run_fini(&lib);

    Ok(())
}

/// Emit the `_start` symbol for the linker binary. The kernel enters
/// `_start` with the process-init frame at the stack pointer; forward it
/// to [`dl_entry`] as the first argument.
///
/// ```rust,ignore
/// #![no_std]
/// #![no_main]
///
/// dynld::dynld_startup!();
/// ```
#[macro_export]
macro_rules! dynld_startup {
    () => {
        core::arch::global_asm!(
            ".global _start",
            "_start:",
            "xor rbp, rbp",
            "mov rdi, rsp",
            "call {entry}",
            entry = sym $crate::runtime::dl_entry,
        );
    };
}
