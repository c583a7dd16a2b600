//! Test fixture fabricating minimal ELF images.
//!
//! An image is a single byte buffer holding a scratch data area followed
//! by string/symbol/hash/RELA tables, a dynamic section and a program
//! header table. Virtual addresses are buffer offsets plus an optional
//! load bias, so the buffer doubles as a consistent fake process image
//! for the decoding, lookup and relocation paths, and (with a nonzero
//! bias leaving room for an ELF header) as the loadable content of an
//! on-disk shared object for the mapper.
use std::collections::HashMap;

use crate::{auxv::AuxvTag, dso::Dso, dynamic::DynamicTag, sym::SHN_UNDEF};

/// Scratch area at the start of every image: symbol storage, relocation
/// targets, GOTs and init/fini arrays live below this offset.
pub const DATA_SIZE: usize = 0x200;

/// Image-relative entry point used by [`TestImage::aux_stack`].
pub const ENTRY_OFF: u64 = 0x80;

struct SymSpec {
    name: String,
    info: u8,
    shndx: u16,
    value: u64,
    size: u64,
}

struct RelaSpec {
    offset: u64,
    ty: u32,
    sym: String,
    addend: i64,
}

pub struct ImageBuilder {
    bias: u64,
    syms: Vec<SymSpec>,
    relas: Vec<RelaSpec>,
    plt_relas: Vec<RelaSpec>,
    needed: Vec<String>,
    extra_dyn: Vec<(u64, u64)>,
    tls_phdr: bool,
}

impl ImageBuilder {
    pub fn new() -> Self {
        ImageBuilder {
            bias: 0,
            syms: Vec::new(),
            relas: Vec::new(),
            plt_relas: Vec::new(),
            needed: Vec::new(),
            extra_dyn: Vec::new(),
            tls_phdr: false,
        }
    }

    /// Shift all virtual addresses by `bias`. Needed when the image is
    /// written out as a shared object, where the first page holds the
    /// ELF header.
    pub fn bias(mut self, bias: u64) -> Self {
        self.bias = bias;
        self
    }

    fn sym(mut self, name: &str, info: u8, shndx: u16, value: u64, size: u64) -> Self {
        self.syms.push(SymSpec {
            name: name.into(),
            info,
            shndx,
            value,
            size,
        });
        self
    }

    /// Global function defined at image-relative `value`.
    pub fn global_func(self, name: &str, value: u64) -> Self {
        self.sym(name, 0x12, 1, value, 0)
    }

    /// Global data object defined at image-relative `value`.
    pub fn global_object(self, name: &str, value: u64, size: u64) -> Self {
        self.sym(name, 0x11, 1, value, size)
    }

    /// Undefined function reference.
    pub fn undef_func(self, name: &str) -> Self {
        self.sym(name, 0x12, SHN_UNDEF, 0, 0)
    }

    pub fn needed(mut self, name: &str) -> Self {
        self.needed.push(name.into());
        self
    }

    /// RELA entry; `sym` names one of the symbols added above, or `""`
    /// for the reserved index 0.
    pub fn rela(mut self, offset: u64, ty: u32, sym: &str, addend: i64) -> Self {
        self.relas.push(RelaSpec {
            offset,
            ty,
            sym: sym.into(),
            addend,
        });
        self
    }

    /// PLT RELA entry.
    pub fn plt_rela(mut self, offset: u64, ty: u32, sym: &str, addend: i64) -> Self {
        self.plt_relas.push(RelaSpec {
            offset,
            ty,
            sym: sym.into(),
            addend,
        });
        self
    }

    /// Extra raw dynamic entry, e.g. `DT_PLTGOT` or `DT_INIT_ARRAY`.
    pub fn dynamic(mut self, tag: DynamicTag, val: u64) -> Self {
        self.extra_dyn.push((tag as u64, val));
        self
    }

    /// Add a `PT_TLS` program header to the image.
    pub fn with_tls_phdr(mut self) -> Self {
        self.tls_phdr = true;
        self
    }

    pub fn build(self) -> TestImage {
        let bias = self.bias;
        let mut bytes = vec![0u8; DATA_SIZE];

        // String table, index 0 is the empty string.
        let strtab_pos = bytes.len() as u64;
        bytes.push(0);
        let mut names: HashMap<String, u64> = HashMap::new();
        let all_names = self
            .syms
            .iter()
            .map(|sym| sym.name.clone())
            .chain(self.needed.iter().cloned());
        for name in all_names {
            if !names.contains_key(&name) {
                let idx = bytes.len() as u64 - strtab_pos;
                bytes.extend_from_slice(name.as_bytes());
                bytes.push(0);
                names.insert(name, idx);
            }
        }
        let strsz = bytes.len() as u64 - strtab_pos;

        // Symbol table with the reserved zero entry in front.
        align8(&mut bytes);
        let symtab_pos = bytes.len() as u64;
        bytes.extend_from_slice(&[0u8; 24]);
        for sym in &self.syms {
            bytes.extend_from_slice(&(names[&sym.name] as u32).to_le_bytes());
            bytes.push(sym.info);
            bytes.push(0);
            bytes.extend_from_slice(&sym.shndx.to_le_bytes());
            bytes.extend_from_slice(&sym.value.to_le_bytes());
            bytes.extend_from_slice(&sym.size.to_le_bytes());
        }

        // SysV hash table; only `nchain` is ever consumed.
        align8(&mut bytes);
        let hash_pos = bytes.len() as u64;
        let nsyms = self.syms.len() as u32 + 1;
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.extend_from_slice(&nsyms.to_le_bytes());
        for _ in 0..(1 + nsyms) {
            bytes.extend_from_slice(&0u32.to_le_bytes());
        }

        let sym_index = |name: &str| -> u32 {
            if name.is_empty() {
                return 0;
            }
            self.syms
                .iter()
                .position(|sym| sym.name == name)
                .map(|pos| pos as u32 + 1)
                .expect("relocation references unknown symbol")
        };

        let push_relas = |bytes: &mut Vec<u8>, relas: &[RelaSpec]| -> u64 {
            align8(bytes);
            let pos = bytes.len() as u64;
            for rela in relas {
                bytes.extend_from_slice(&rela.offset.to_le_bytes());
                bytes.extend_from_slice(&rela.ty.to_le_bytes());
                bytes.extend_from_slice(&sym_index(&rela.sym).to_le_bytes());
                bytes.extend_from_slice(&rela.addend.to_le_bytes());
            }
            pos
        };

        let rela_pos = push_relas(&mut bytes, &self.relas);
        let jmprel_pos = push_relas(&mut bytes, &self.plt_relas);

        // Dynamic section; table addresses carry the load bias.
        align8(&mut bytes);
        let dynoff = bias + bytes.len() as u64;
        let mut dynent = vec![
            (DynamicTag::StrTab as u64, bias + strtab_pos),
            (DynamicTag::StrSz as u64, strsz),
            (DynamicTag::SymTab as u64, bias + symtab_pos),
            (DynamicTag::SymEnt as u64, 24),
            (DynamicTag::Hash as u64, bias + hash_pos),
        ];
        if !self.relas.is_empty() {
            dynent.push((DynamicTag::RelA as u64, bias + rela_pos));
            dynent.push((DynamicTag::RelASz as u64, self.relas.len() as u64 * 24));
            dynent.push((DynamicTag::RelAEnt as u64, 24));
        }
        if !self.plt_relas.is_empty() {
            dynent.push((DynamicTag::JmpRel as u64, bias + jmprel_pos));
            dynent.push((DynamicTag::PltRelSz as u64, self.plt_relas.len() as u64 * 24));
        }
        for name in &self.needed {
            dynent.push((DynamicTag::Needed as u64, names[name]));
        }
        dynent.extend_from_slice(&self.extra_dyn);
        dynent.push((DynamicTag::Null as u64, 0));
        for (tag, val) in dynent {
            bytes.extend_from_slice(&tag.to_le_bytes());
            bytes.extend_from_slice(&val.to_le_bytes());
        }

        // Program header table. Sizes must be known up front so the
        // PT_LOAD entry can cover the whole image.
        align8(&mut bytes);
        let phdr_off = bias + bytes.len() as u64;
        let phnum = if self.tls_phdr { 4 } else { 3 };
        let total = bytes.len() as u64 + phnum * 56;

        push_phdr(&mut bytes, 6, 0x4, phdr_off, phdr_off, phnum * 56, phnum * 56);
        // One writable load segment spanning the image, with a small
        // zero-initialized tail.
        push_phdr(&mut bytes, 1, 0x6, bias, bias, total, total + 64);
        push_phdr(&mut bytes, 2, 0x6, dynoff, dynoff, 0, 0);
        if self.tls_phdr {
            push_phdr(&mut bytes, 7, 0x4, bias + 0x100, bias + 0x100, 8, 8);
        }

        TestImage {
            bytes,
            bias,
            dynoff,
            phdr_off,
            phnum,
        }
    }
}

fn align8(bytes: &mut Vec<u8>) {
    while bytes.len() % 8 != 0 {
        bytes.push(0);
    }
}

fn push_phdr(
    bytes: &mut Vec<u8>,
    p_type: u32,
    flags: u32,
    offset: u64,
    vaddr: u64,
    filesz: u64,
    memsz: u64,
) {
    bytes.extend_from_slice(&p_type.to_le_bytes());
    bytes.extend_from_slice(&flags.to_le_bytes());
    bytes.extend_from_slice(&offset.to_le_bytes());
    bytes.extend_from_slice(&vaddr.to_le_bytes());
    bytes.extend_from_slice(&0u64.to_le_bytes()); // paddr
    bytes.extend_from_slice(&filesz.to_le_bytes());
    bytes.extend_from_slice(&memsz.to_le_bytes());
    bytes.extend_from_slice(&8u64.to_le_bytes());
}

/// A built image. The buffer must stay alive for as long as any [`Dso`]
/// handle derived from it.
pub struct TestImage {
    pub bytes: Vec<u8>,
    pub bias: u64,
    pub dynoff: u64,
    pub phdr_off: u64,
    pub phnum: u64,
}

impl TestImage {
    /// Load bias of the in-memory image: image-relative address `x`
    /// resolves to `base() + x`.
    pub fn base(&mut self) -> *mut u8 {
        self.bytes.as_mut_ptr().wrapping_sub(self.bias as usize)
    }

    /// Absolute address of the image-relative `offset`.
    pub fn addr(&mut self, offset: u64) -> u64 {
        self.base() as u64 + offset
    }

    pub fn dso(&mut self) -> Dso {
        let base = self.base();
        let dynoff = self.dynoff;
        unsafe { Dso::from_mapped(base, dynoff) }.expect("well-formed test image")
    }

    /// Read the eight bytes at image-relative `offset`.
    pub fn read_u64(&self, offset: u64) -> u64 {
        let pos = (offset - self.bias) as usize;
        u64::from_le_bytes(self.bytes[pos..pos + 8].try_into().unwrap())
    }

    /// Write the eight bytes at image-relative `offset`.
    pub fn write_u64(&mut self, offset: u64, value: u64) {
        let pos = (offset - self.bias) as usize;
        self.bytes[pos..pos + 8].copy_from_slice(&value.to_le_bytes());
    }

    /// Fabricated initial stack describing this image as the mapped user
    /// program.
    pub fn aux_stack(&mut self, with_entry: bool) -> Vec<u64> {
        let phdr = self.addr(self.phdr_off);
        let entry = self.addr(self.bias + ENTRY_OFF);
        let mut stack = vec![0, 0, 0]; // argc, argv null, envv null
        let pair = |stack: &mut Vec<u64>, tag: AuxvTag, val: u64| {
            stack.push(tag as u64);
            stack.push(val);
        };
        pair(&mut stack, AuxvTag::Phdr, phdr);
        pair(&mut stack, AuxvTag::Phent, 56);
        pair(&mut stack, AuxvTag::Phnum, self.phnum);
        pair(&mut stack, AuxvTag::PageSz, crate::PAGE_SIZE);
        pair(&mut stack, AuxvTag::Base, 0);
        if with_entry {
            pair(&mut stack, AuxvTag::Entry, entry);
        }
        pair(&mut stack, AuxvTag::Null, 0);
        stack
    }

    /// Serialize as an on-disk shared object: ELF header, padding up to
    /// the load bias, then the image bytes. Requires a bias of at least
    /// one page so header and loadable content do not overlap.
    pub fn to_elf_file(&self) -> Vec<u8> {
        assert!(self.bias >= 64, "bias leaves no room for the ELF header");

        let mut file = Vec::new();
        file.extend_from_slice(&[0x7f, b'E', b'L', b'F']);
        file.push(2); // ELFCLASS64
        file.push(1); // little endian
        file.push(1); // EV_CURRENT
        file.push(0); // ELFOSABI_SYSV
        file.extend_from_slice(&[0u8; 8]); // padding
        file.extend_from_slice(&3u16.to_le_bytes()); // ET_DYN
        file.extend_from_slice(&0x3eu16.to_le_bytes()); // EM_X86_64
        file.extend_from_slice(&1u32.to_le_bytes()); // version
        file.extend_from_slice(&0u64.to_le_bytes()); // entry
        file.extend_from_slice(&self.phdr_off.to_le_bytes()); // phoff
        file.extend_from_slice(&0u64.to_le_bytes()); // shoff
        file.extend_from_slice(&0u32.to_le_bytes()); // flags
        file.extend_from_slice(&64u16.to_le_bytes()); // ehsize
        file.extend_from_slice(&56u16.to_le_bytes()); // phentsize
        file.extend_from_slice(&(self.phnum as u16).to_le_bytes());
        file.extend_from_slice(&0u16.to_le_bytes()); // shentsize
        file.extend_from_slice(&0u16.to_le_bytes()); // shnum
        file.extend_from_slice(&0u16.to_le_bytes()); // shstrndx
        assert_eq!(64, file.len());

        file.resize(self.bias as usize, 0);
        file.extend_from_slice(&self.bytes);
        file
    }
}
