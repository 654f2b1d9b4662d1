//! Minimal Mach-O 64 walker.
//!
//! Just enough of the format to find segments and sections, map virtual
//! addresses to file offsets, and read words out of the image. Only
//! little-endian 64-bit images are accepted, which covers every binary the
//! discovery pass ever looks at.

use crate::errors::{Error, Result};

pub const MH_MAGIC_64: u32 = 0xFEED_FACF;
pub const LC_SEGMENT_64: u32 = 0x19;

pub const SEG_TEXT: &str = "__TEXT";
pub const SEG_DATA: &str = "__DATA";
pub const SEG_DATA_CONST: &str = "__DATA_CONST";
pub const SECT_TEXT: &str = "__text";
pub const SECT_OBJC_METHNAME: &str = "__objc_methname";
pub const SECT_OBJC_SELREFS: &str = "__objc_selrefs";

pub const MACH_HEADER_64_SIZE: usize = 32;
pub const SEGMENT_COMMAND_64_SIZE: usize = 72;
pub const SECTION_64_SIZE: usize = 80;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub name: String,
    pub vmaddr: u64,
    pub vmsize: u64,
    pub fileoff: u64,
    pub filesize: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub segment: String,
    pub name: String,
    pub addr: u64,
    pub size: u64,
    pub offset: u32,
}

pub struct MachImage<'a> {
    data: &'a [u8],
    pub segments: Vec<Segment>,
    pub sections: Vec<Section>,
}

fn read_u32(data: &[u8], at: usize) -> Option<u32> {
    data.get(at..at + 4).map(|b| u32::from_le_bytes(b.try_into().unwrap()))
}

fn read_u64(data: &[u8], at: usize) -> Option<u64> {
    data.get(at..at + 8).map(|b| u64::from_le_bytes(b.try_into().unwrap()))
}

fn fixed_name(data: &[u8], at: usize) -> Option<String> {
    let raw = data.get(at..at + 16)?;
    let end = raw.iter().position(|b| *b == 0).unwrap_or(16);
    std::str::from_utf8(&raw[..end]).ok().map(str::to_owned)
}

impl<'a> MachImage<'a> {
    pub fn parse(data: &'a [u8]) -> Result<MachImage<'a>> {
        let magic = read_u32(data, 0).ok_or(Error::PatternNotFound("truncated header"))?;
        if magic != MH_MAGIC_64 {
            return Err(Error::PatternNotFound("not a 64-bit mach-o image"));
        }
        let ncmds = read_u32(data, 16).ok_or(Error::PatternNotFound("truncated header"))?;

        let mut segments = Vec::new();
        let mut sections = Vec::new();
        let mut cursor = MACH_HEADER_64_SIZE;
        for _ in 0..ncmds {
            let cmd = read_u32(data, cursor).ok_or(Error::PatternNotFound("truncated load command"))?;
            let cmdsize =
                read_u32(data, cursor + 4).ok_or(Error::PatternNotFound("truncated load command"))?
                    as usize;
            if cmdsize < 8 {
                return Err(Error::PatternNotFound("malformed load command"));
            }
            if cmd == LC_SEGMENT_64 {
                let name = fixed_name(data, cursor + 8)
                    .ok_or(Error::PatternNotFound("truncated segment"))?;
                let vmaddr = read_u64(data, cursor + 24)
                    .ok_or(Error::PatternNotFound("truncated segment"))?;
                let vmsize = read_u64(data, cursor + 32)
                    .ok_or(Error::PatternNotFound("truncated segment"))?;
                let fileoff = read_u64(data, cursor + 40)
                    .ok_or(Error::PatternNotFound("truncated segment"))?;
                let filesize = read_u64(data, cursor + 48)
                    .ok_or(Error::PatternNotFound("truncated segment"))?;
                let nsects = read_u32(data, cursor + 64)
                    .ok_or(Error::PatternNotFound("truncated segment"))?;
                segments.push(Segment { name: name.clone(), vmaddr, vmsize, fileoff, filesize });

                let mut sect_at = cursor + SEGMENT_COMMAND_64_SIZE;
                for _ in 0..nsects {
                    let sectname = fixed_name(data, sect_at)
                        .ok_or(Error::PatternNotFound("truncated section"))?;
                    let segname = fixed_name(data, sect_at + 16)
                        .ok_or(Error::PatternNotFound("truncated section"))?;
                    let addr = read_u64(data, sect_at + 32)
                        .ok_or(Error::PatternNotFound("truncated section"))?;
                    let size = read_u64(data, sect_at + 40)
                        .ok_or(Error::PatternNotFound("truncated section"))?;
                    let offset = read_u32(data, sect_at + 48)
                        .ok_or(Error::PatternNotFound("truncated section"))?;
                    sections.push(Section { segment: segname, name: sectname, addr, size, offset });
                    sect_at += SECTION_64_SIZE;
                }
            }
            cursor += cmdsize;
        }

        Ok(MachImage { data, segments, sections })
    }

    pub fn section(&self, segment: &str, name: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.segment == segment && s.name == name)
    }

    pub fn section_bytes(&self, section: &Section) -> Option<&'a [u8]> {
        let start = section.offset as usize;
        self.data.get(start..start + section.size as usize)
    }

    pub fn va_to_offset(&self, va: u64) -> Option<usize> {
        let section = self
            .sections
            .iter()
            .find(|s| va >= s.addr && va < s.addr + s.size)?;
        Some((section.offset as u64 + (va - section.addr)) as usize)
    }

    pub fn read_u32_at_va(&self, va: u64) -> Option<u32> {
        read_u32(self.data, self.va_to_offset(va)?)
    }

    pub fn read_u64_at_va(&self, va: u64) -> Option<u64> {
        read_u64(self.data, self.va_to_offset(va)?)
    }

    /// Whether `va` falls inside the executable text section.
    pub fn is_text_va(&self, va: u64) -> bool {
        self.section(SEG_TEXT, SECT_TEXT)
            .is_some_and(|s| va >= s.addr && va < s.addr + s.size)
    }

    /// Whether `va` falls inside any writable/constant data segment.
    pub fn is_data_va(&self, va: u64) -> bool {
        self.segments
            .iter()
            .filter(|s| s.name == SEG_DATA || s.name == SEG_DATA_CONST)
            .any(|s| va >= s.vmaddr && va < s.vmaddr + s.vmsize)
    }

    /// Locates a NUL-terminated string inside a section and returns its
    /// virtual address.
    pub fn find_cstring(&self, section: &Section, needle: &str) -> Option<u64> {
        let bytes = self.section_bytes(section)?;
        let mut start = 0;
        while start < bytes.len() {
            let end = bytes[start..]
                .iter()
                .position(|b| *b == 0)
                .map(|p| start + p)
                .unwrap_or(bytes.len());
            if &bytes[start..end] == needle.as_bytes() {
                return Some(section.addr + start as u64);
            }
            start = end + 1;
        }
        None
    }
}

/// Synthetic image assembly for the analysis tests.
#[cfg(test)]
pub mod testimage {
    use super::*;

    pub const TEXT_VA: u64 = 0x1_0000_4000;
    pub const METHNAME_VA: u64 = 0x1_0000_5000;
    pub const SELREFS_VA: u64 = 0x1_0000_8000;
    pub const DATA_VA: u64 = 0x1_0000_9000;

    const TEXT_OFF: u32 = 0x1000;
    const METHNAME_OFF: u32 = 0x2000;
    const SELREFS_OFF: u32 = 0x3000;
    const DATA_OFF: u32 = 0x4000;
    const FILE_SIZE: usize = 0x5000;

    /// Builds a two-segment image: `__TEXT` (`__text`, `__objc_methname`)
    /// and `__DATA` (`__objc_selrefs`, `__data`).
    #[derive(Default)]
    pub struct ImageBuilder {
        pub text: Vec<u8>,
        pub methnames: Vec<u8>,
        pub selrefs: Vec<u64>,
        pub data: Vec<u8>,
    }

    impl ImageBuilder {
        pub fn new() -> Self {
            Self::default()
        }

        /// Appends instructions and returns the VA of the first one.
        pub fn push_insns(&mut self, insns: &[u32]) -> u64 {
            let va = TEXT_VA + self.text.len() as u64;
            for insn in insns {
                self.text.extend_from_slice(&insn.to_le_bytes());
            }
            va
        }

        pub fn push_text_bytes(&mut self, bytes: &[u8]) -> u64 {
            let va = TEXT_VA + self.text.len() as u64;
            self.text.extend_from_slice(bytes);
            va
        }

        /// Adds a selector string and its selref entry; returns the selref VA.
        pub fn add_selector(&mut self, name: &str) -> u64 {
            let name_va = METHNAME_VA + self.methnames.len() as u64;
            self.methnames.extend_from_slice(name.as_bytes());
            self.methnames.push(0);
            let selref_va = SELREFS_VA + (self.selrefs.len() * 8) as u64;
            self.selrefs.push(name_va);
            selref_va
        }

        /// Reserves 8 bytes of data; returns their VA.
        pub fn add_data_word(&mut self, value: u64) -> u64 {
            let va = DATA_VA + self.data.len() as u64;
            self.data.extend_from_slice(&value.to_le_bytes());
            va
        }

        pub fn build(&self) -> Vec<u8> {
            let mut image = vec![0u8; FILE_SIZE];

            let sections = [
                (SECT_TEXT, SEG_TEXT, TEXT_VA, self.text.len() as u64, TEXT_OFF),
                (
                    SECT_OBJC_METHNAME,
                    SEG_TEXT,
                    METHNAME_VA,
                    self.methnames.len() as u64,
                    METHNAME_OFF,
                ),
                (
                    SECT_OBJC_SELREFS,
                    SEG_DATA,
                    SELREFS_VA,
                    (self.selrefs.len() * 8) as u64,
                    SELREFS_OFF,
                ),
                ("__data", SEG_DATA, DATA_VA, self.data.len().max(8) as u64, DATA_OFF),
            ];
            let segments = [
                (SEG_TEXT, 0x1_0000_0000u64, 0x8000u64, 0u64, 0x3000u64, 2u32),
                (SEG_DATA, SELREFS_VA, 0x2000, SELREFS_OFF as u64, 0x2000, 2u32),
            ];

            // header
            image[0..4].copy_from_slice(&MH_MAGIC_64.to_le_bytes());
            image[4..8].copy_from_slice(&0x0100_000Cu32.to_le_bytes()); // arm64
            image[16..20].copy_from_slice(&(segments.len() as u32).to_le_bytes());

            let mut cursor = MACH_HEADER_64_SIZE;
            let mut section_index = 0;
            for (name, vmaddr, vmsize, fileoff, filesize, nsects) in segments {
                let cmdsize = SEGMENT_COMMAND_64_SIZE + SECTION_64_SIZE * nsects as usize;
                image[cursor..cursor + 4].copy_from_slice(&LC_SEGMENT_64.to_le_bytes());
                image[cursor + 4..cursor + 8].copy_from_slice(&(cmdsize as u32).to_le_bytes());
                image[cursor + 8..cursor + 8 + name.len()].copy_from_slice(name.as_bytes());
                image[cursor + 24..cursor + 32].copy_from_slice(&vmaddr.to_le_bytes());
                image[cursor + 32..cursor + 40].copy_from_slice(&vmsize.to_le_bytes());
                image[cursor + 40..cursor + 48].copy_from_slice(&fileoff.to_le_bytes());
                image[cursor + 48..cursor + 56].copy_from_slice(&filesize.to_le_bytes());
                image[cursor + 64..cursor + 68].copy_from_slice(&nsects.to_le_bytes());

                let mut sect_at = cursor + SEGMENT_COMMAND_64_SIZE;
                for _ in 0..nsects {
                    let (sectname, segname, addr, size, offset) = sections[section_index];
                    section_index += 1;
                    image[sect_at..sect_at + sectname.len()]
                        .copy_from_slice(sectname.as_bytes());
                    image[sect_at + 16..sect_at + 16 + segname.len()]
                        .copy_from_slice(segname.as_bytes());
                    image[sect_at + 32..sect_at + 40].copy_from_slice(&addr.to_le_bytes());
                    image[sect_at + 40..sect_at + 48].copy_from_slice(&size.to_le_bytes());
                    image[sect_at + 48..sect_at + 52].copy_from_slice(&offset.to_le_bytes());
                    sect_at += SECTION_64_SIZE;
                }
                cursor += cmdsize;
            }

            image[TEXT_OFF as usize..TEXT_OFF as usize + self.text.len()]
                .copy_from_slice(&self.text);
            image[METHNAME_OFF as usize..METHNAME_OFF as usize + self.methnames.len()]
                .copy_from_slice(&self.methnames);
            for (i, selref) in self.selrefs.iter().enumerate() {
                let at = SELREFS_OFF as usize + i * 8;
                image[at..at + 8].copy_from_slice(&selref.to_le_bytes());
            }
            image[DATA_OFF as usize..DATA_OFF as usize + self.data.len()]
                .copy_from_slice(&self.data);

            image
        }
    }
}
