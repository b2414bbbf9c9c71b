//! The linker: lays out compiled function bodies at fixed addresses
//! and patches call-site relocations by name (§4.5).
//!
//! Kept independent of any particular instruction set: a [`Reloc`]
//! just says "patch these 4 bytes with `f(target_addr, site_addr)`",
//! so `vmx-lang::codegen` supplies the relative-offset encoding that
//! matches its own instruction format.

use std::collections::HashMap;

use thiserror::Error;

use crate::section::Section;

/// One relocation: a call or jump in `func` at byte `offset` that must
/// be patched once the target symbol's address is known.
#[derive(Debug, Clone)]
pub struct Reloc {
    pub offset: u32,
    pub symbol: String,
}

/// One compiled function body, ready for layout.
#[derive(Debug, Clone)]
pub struct ObjFunc {
    pub name: String,
    pub code: Vec<u8>,
    pub relocs: Vec<Reloc>,
}

/// One compiled package's worth of functions, the unit the build
/// driver passes to the linker (§4.6 step 4).
#[derive(Debug, Clone, Default)]
pub struct Library {
    pub funcs: Vec<ObjFunc>,
}

impl Library {
    pub fn has_func(&self, name: &str) -> bool {
        self.funcs.iter().any(|f| f.name == name)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LinkError {
    #[error("unresolved symbol {symbol:?} referenced from {site:?}")]
    Unresolved { symbol: String, site: String },
    #[error("duplicate global/function {0:?}")]
    Duplicate(String),
    #[error("entry function {0:?} not found")]
    MissingEntry(String),
}

/// Encodes a relative word offset the way `vmx-machine`'s `Call`/`Jmp`
/// instructions decode it: `offset = (target - (site + 4)) / 4`. Both
/// addresses are always 4-byte aligned because every function starts
/// on a word boundary and every instruction is 4 bytes.
pub fn relative_word_offset(target_addr: u32, site_addr: u32) -> i16 {
    ((target_addr as i64 - (site_addr as i64 + 4)) / 4) as i16
}

/// Lays out `libs` back to back starting at `base_addr`, resolving
/// every relocation across the transitive set, and returns one `Code`
/// section plus the resolved entry address.
///
/// `entry` names the function symbol to start execution at (`:start`
/// for a bare-function image, `main` for a full program).
pub fn link(
    libs: &[Library],
    base_addr: u32,
    entry: &str,
) -> Result<(Section, u32), LinkError> {
    let mut addrs: HashMap<String, u32> = HashMap::new();
    let mut code = Vec::new();
    let mut cursor = base_addr;

    for lib in libs {
        for f in &lib.funcs {
            if addrs.contains_key(&f.name) {
                return Err(LinkError::Duplicate(f.name.clone()));
            }
            addrs.insert(f.name.clone(), cursor);
            cursor += f.code.len() as u32;
        }
    }

    let entry_addr = *addrs
        .get(entry)
        .ok_or_else(|| LinkError::MissingEntry(entry.to_string()))?;

    let mut site_addr = base_addr;
    for lib in libs {
        for f in &lib.funcs {
            let func_base = site_addr;
            let mut bytes = f.code.clone();
            for reloc in &f.relocs {
                let target = *addrs.get(&reloc.symbol).ok_or_else(|| LinkError::Unresolved {
                    symbol: reloc.symbol.clone(),
                    site: f.name.clone(),
                })?;
                let call_site = func_base + reloc.offset;
                let off = relative_word_offset(target, call_site);
                let patch = off.to_le_bytes();
                let at = reloc.offset as usize;
                bytes[at + 1] = patch[0];
                bytes[at + 2] = patch[1];
            }
            code.extend_from_slice(&bytes);
            site_addr += f.code.len() as u32;
        }
    }

    Ok((Section::code(base_addr, code), entry_addr))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unresolved_symbol_names_the_importing_site() {
        let lib = Library {
            funcs: vec![ObjFunc {
                name: "main".into(),
                code: vec![0xd, 0, 0, 0], // OP_CALL placeholder
                relocs: vec![Reloc {
                    offset: 0,
                    symbol: "missing".into(),
                }],
            }],
        };
        let err = link(&[lib], 0x8000, "main").unwrap_err();
        assert_eq!(
            err,
            LinkError::Unresolved {
                symbol: "missing".into(),
                site: "main".into(),
            }
        );
    }

    #[test]
    fn functions_are_laid_out_back_to_back() {
        let lib = Library {
            funcs: vec![
                ObjFunc {
                    name: "a".into(),
                    code: vec![0; 4],
                    relocs: vec![],
                },
                ObjFunc {
                    name: "b".into(),
                    code: vec![0; 8],
                    relocs: vec![],
                },
            ],
        };
        let (section, entry) = link(&[lib], 0x8000, "a").unwrap();
        assert_eq!(entry, 0x8000);
        assert_eq!(section.bytes.len(), 12);
    }
}
