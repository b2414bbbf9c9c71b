//! The sectioned binary image format and the name-based linker (§4.5,
//! §6).

pub mod linker;
pub mod section;

pub use linker::{link, relative_word_offset, LinkError, Library, ObjFunc, Reloc};
pub use section::{code_start, load_sections, read, write, ImageError, Section, SectionType};
