use std::convert::TryFrom;

use bitflags::bitflags;

use crate::{error::SegmentError, reader::Reader};

// Reserved inclusive range. Operating system specific.
const LOOS: u32 = 0x6000_0000;
const HIOS: u32 = 0x6FFF_FFFF;
// Reserved inclusive range. Processor specific.
const LOPROC: u32 = 0x7000_0000;
const HIPROC: u32 = 0x7FFF_FFFF;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SegmentType {
    /// Program header table entry unused.
    PtNull,
    /// Loadable segment, mapped into the process image.
    PtLoad,
    /// Dynamic linking information.
    PtDynamic,
    /// Interpreter information.
    PtInterp,
    /// Auxiliary information.
    PtNote,
    /// Reserved.
    PtShlib,
    /// Segment containing the program header table itself.
    PtPhdr,
    /// Thread-local storage template. Rejected by this linker.
    PtTls,
    /// Value for specific OS.
    PtOsSpecific(u32),
    /// Value for specific processor.
    PtProcSpecific(u32),
}

impl SegmentType {
    pub fn parse(reader: &mut Reader) -> Result<Self, SegmentError> {
        let value: u32 = reader.read_u32()?;
        let segment_type: Self = SegmentType::try_from(value)?;
        Ok(segment_type)
    }
}

impl TryFrom<u32> for SegmentType {
    type Error = SegmentError;
    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0x0 => Ok(Self::PtNull),
            0x1 => Ok(Self::PtLoad),
            0x2 => Ok(Self::PtDynamic),
            0x3 => Ok(Self::PtInterp),
            0x4 => Ok(Self::PtNote),
            0x5 => Ok(Self::PtShlib),
            0x6 => Ok(Self::PtPhdr),
            0x7 => Ok(Self::PtTls),
            LOOS..=HIOS => Ok(Self::PtOsSpecific(value)),
            LOPROC..=HIPROC => Ok(Self::PtProcSpecific(value)),
            _ => Err(SegmentError::TypeUnknown(value)),
        }
    }
}

bitflags! {
    /// The `p_flags` permission bits of a program header.
    pub struct SegmentFlags: u32 {
        const READ = 0x4;
        const WRITE = 0x2;
        const EXEC = 0x1;
    }
}

impl SegmentFlags {
    pub fn parse(reader: &mut Reader) -> Result<Self, SegmentError> {
        let value = reader.read_u32()?;
        SegmentFlags::from_bits(value).ok_or(SegmentError::FlagsUnknown(value))
    }

    /// Translate into the `PROT_*` bits used when mapping the segment.
    pub fn prot(&self) -> i32 {
        let mut prot = libc::PROT_NONE;
        if self.contains(SegmentFlags::READ) {
            prot |= libc::PROT_READ;
        }
        if self.contains(SegmentFlags::WRITE) {
            prot |= libc::PROT_WRITE;
        }
        if self.contains(SegmentFlags::EXEC) {
            prot |= libc::PROT_EXEC;
        }
        prot
    }
}
