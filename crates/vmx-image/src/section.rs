//! The sectioned binary image format (§6): a small header, a section
//! table, then concatenated payloads.

use serde::Serialize;
use thiserror::Error;

/// Magic bytes at the start of every image file.
pub const MAGIC: [u8; 4] = *b"E8VM";
pub const FORMAT_VERSION: u32 = 1;

/// One tagged region of an image file (§3 "A section").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SectionType {
    Zeros,
    Code,
    Data,
    None,
    Debug,
    Comment,
}

impl SectionType {
    fn to_tag(self) -> u8 {
        match self {
            SectionType::Zeros => 0,
            SectionType::Code => 1,
            SectionType::Data => 2,
            SectionType::None => 3,
            SectionType::Debug => 4,
            SectionType::Comment => 5,
        }
    }

    fn from_tag(tag: u8) -> Option<Self> {
        Some(match tag {
            0 => SectionType::Zeros,
            1 => SectionType::Code,
            2 => SectionType::Data,
            3 => SectionType::None,
            4 => SectionType::Debug,
            5 => SectionType::Comment,
            _ => return None,
        })
    }
}

/// A tagged image section: `{type, addr, size, bytes}`. `Zeros`
/// sections carry no payload; `bytes` is empty and `size` alone
/// describes the region to zero-fill.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Section {
    pub ty: SectionType,
    pub addr: u32,
    pub size: u32,
    pub bytes: Vec<u8>,
}

impl Section {
    pub fn code(addr: u32, bytes: Vec<u8>) -> Self {
        Self {
            ty: SectionType::Code,
            addr,
            size: bytes.len() as u32,
            bytes,
        }
    }

    pub fn data(addr: u32, bytes: Vec<u8>) -> Self {
        Self {
            ty: SectionType::Data,
            addr,
            size: bytes.len() as u32,
            bytes,
        }
    }

    pub fn zeros(addr: u32, size: u32) -> Self {
        Self {
            ty: SectionType::Zeros,
            addr,
            size,
            bytes: Vec::new(),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ImageError {
    #[error("bad magic bytes")]
    BadMagic,
    #[error("unsupported format version {0}")]
    UnsupportedVersion(u32),
    #[error("truncated image: expected {expected} more bytes, found {found}")]
    Truncated { expected: usize, found: usize },
    #[error("unknown section type tag {0}")]
    UnknownSectionType(u8),
}

fn take<'a>(buf: &'a [u8], pos: &mut usize, n: usize) -> Result<&'a [u8], ImageError> {
    if *pos + n > buf.len() {
        return Err(ImageError::Truncated {
            expected: n,
            found: buf.len() - *pos,
        });
    }
    let s = &buf[*pos..*pos + n];
    *pos += n;
    Ok(s)
}

fn take_u32(buf: &[u8], pos: &mut usize) -> Result<u32, ImageError> {
    Ok(u32::from_le_bytes(take(buf, pos, 4)?.try_into().unwrap()))
}

/// Reads a sequence of [`Section`]s out of a full image buffer.
pub fn read(buf: &[u8]) -> Result<Vec<Section>, ImageError> {
    let mut pos = 0usize;
    let magic = take(buf, &mut pos, 4)?;
    if magic != MAGIC {
        return Err(ImageError::BadMagic);
    }
    let version = take_u32(buf, &mut pos)?;
    if version != FORMAT_VERSION {
        return Err(ImageError::UnsupportedVersion(version));
    }
    let count = take_u32(buf, &mut pos)? as usize;

    struct RawEntry {
        ty: u8,
        addr: u32,
        size: u32,
        payload_offset: u32,
    }
    let mut entries = Vec::with_capacity(count);
    for _ in 0..count {
        let ty = take(buf, &mut pos, 1)?[0];
        pos += 3; // pad
        let addr = take_u32(buf, &mut pos)?;
        let size = take_u32(buf, &mut pos)?;
        let payload_offset = take_u32(buf, &mut pos)?;
        entries.push(RawEntry {
            ty,
            addr,
            size,
            payload_offset,
        });
    }

    let payload_base = pos;
    let mut sections = Vec::with_capacity(count);
    for e in entries {
        let ty = SectionType::from_tag(e.ty).ok_or(ImageError::UnknownSectionType(e.ty))?;
        let bytes = if matches!(ty, SectionType::Zeros) {
            Vec::new()
        } else {
            let start = payload_base + e.payload_offset as usize;
            take(buf, &mut { start }, e.size as usize)?.to_vec()
        };
        sections.push(Section {
            ty,
            addr: e.addr,
            size: e.size,
            bytes,
        });
    }
    Ok(sections)
}

/// Serializes a sequence of sections back into the on-disk format.
pub fn write(sections: &[Section]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&MAGIC);
    out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    out.extend_from_slice(&(sections.len() as u32).to_le_bytes());

    let mut payload_offset = 0u32;
    let mut table = Vec::new();
    for s in sections {
        table.push((s, payload_offset));
        if !matches!(s.ty, SectionType::Zeros) {
            payload_offset += s.bytes.len() as u32;
        }
    }
    for (s, offset) in &table {
        out.push(s.ty.to_tag());
        out.extend_from_slice(&[0, 0, 0]);
        out.extend_from_slice(&s.addr.to_le_bytes());
        out.extend_from_slice(&s.size.to_le_bytes());
        out.extend_from_slice(&offset.to_le_bytes());
    }
    for (s, _) in &table {
        if !matches!(s.ty, SectionType::Zeros) {
            out.extend_from_slice(&s.bytes);
        }
    }
    out
}

/// Locates the program's entry point: the address of the first `Code`
/// section, by convention (§4.5).
pub fn code_start(sections: &[Section]) -> Option<u32> {
    sections
        .iter()
        .find(|s| matches!(s.ty, SectionType::Code))
        .map(|s| s.addr)
}

/// Loads sections into physical memory, zero-filling `Zeros` sections
/// and skipping `None`/`Debug`/`Comment`.
pub fn load_sections(
    mem: &mut vmx_memory::PhysicalMemory,
    sections: &[Section],
) -> Result<(), vmx_memory::MemoryError> {
    for s in sections {
        match s.ty {
            SectionType::Zeros => mem.zero_fill(s.addr, s.size)?,
            SectionType::Code | SectionType::Data => mem.write_bytes(s.addr, &s.bytes)?,
            SectionType::None | SectionType::Debug | SectionType::Comment => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_bytes() {
        let sections = vec![
            Section::code(0x1000, vec![1, 2, 3, 4]),
            Section::zeros(0x2000, 16),
            Section::data(0x3000, vec![9, 9]),
        ];
        let bytes = write(&sections);
        let back = read(&bytes).unwrap();
        assert_eq!(back, sections);
    }

    #[test]
    fn code_start_is_first_code_section() {
        let sections = vec![
            Section::zeros(0, 16),
            Section::code(0x8000, vec![0; 4]),
        ];
        assert_eq!(code_start(&sections), Some(0x8000));
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut bytes = write(&[Section::code(0, vec![1])]);
        bytes[0] = b'X';
        assert_eq!(read(&bytes).unwrap_err(), ImageError::BadMagic);
    }

    #[test]
    fn loading_zeros_section_zero_fills_memory() {
        let mut mem = vmx_memory::PhysicalMemory::new(0);
        mem.write_word(0x4000, 0xffff_ffff).unwrap();
        let sections = vec![Section::zeros(0x4000, 8)];
        load_sections(&mut mem, &sections).unwrap();
        // A Zeros section must clear bytes a prior section already wrote,
        // not just leave untouched memory alone.
        assert_eq!(mem.read_word(0x4000).unwrap(), 0);
    }
}
