//! Binary Loader Module
//!
//! Parses the ELF objects mapped into the debuggee using goblin and extracts
//! their symbols at runtime addresses:
//! - `.symtab` and `.dynsym` functions and untyped labels
//! - Load bias from the mapping the object was found at

use anyhow::{anyhow, Result};
use goblin::elf::{program_header, section_header, sym, Elf};
use std::collections::HashSet;
use std::fs;

use crate::core::breakpoint::SymbolMatcher;
use crate::core::memory::MemoryRegion;

/// A symbol at its absolute address in the debuggee
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolInfo {
    /// Symbol name
    pub name: String,
    /// Runtime address (load bias applied)
    pub address: u64,
    /// Size in bytes (0 if unknown)
    pub size: u64,
    /// Path of the object defining the symbol
    pub module: String,
}

/// An ELF object mapped into the debuggee
#[derive(Debug)]
pub struct LoadedModule {
    /// Path of the backing file
    pub path: String,
    /// Lowest mapped address of the object
    pub base_address: u64,
    /// Difference between runtime and link-time addresses
    pub load_bias: u64,
    /// Defined symbols at runtime addresses
    pub symbols: Vec<SymbolInfo>,
}

impl LoadedModule {
    /// Load a module from disk given the mapping it was found at
    pub fn from_file(path: &str, map_start: u64, map_offset: u64) -> Result<Self> {
        let data = fs::read(path)?;
        Self::from_bytes(&data, path, map_start, map_offset)
    }

    /// Parse a module from bytes given the mapping it was found at
    pub fn from_bytes(data: &[u8], path: &str, map_start: u64, map_offset: u64) -> Result<Self> {
        if data.len() < 4 || data[0..4] != [0x7F, b'E', b'L', b'F'] {
            return Err(anyhow!("{} is not an ELF object", path));
        }

        let elf = Elf::parse(data)?;
        let load_bias = load_bias(&elf, map_start, map_offset)?;

        let mut seen = HashSet::new();
        let mut symbols = Vec::new();
        let tables = [(&elf.syms, &elf.strtab), (&elf.dynsyms, &elf.dynstrtab)];
        for (table, strtab) in tables {
            for symbol in table.iter() {
                if !is_code_symbol(&symbol) {
                    continue;
                }
                let name = match strtab.get_at(symbol.st_name) {
                    Some(name) if !name.is_empty() => name,
                    _ => continue,
                };
                let address = symbol.st_value.wrapping_add(load_bias);
                if seen.insert((name, address)) {
                    symbols.push(SymbolInfo {
                        name: name.to_string(),
                        address,
                        size: symbol.st_size,
                        module: path.to_string(),
                    });
                }
            }
        }

        log::debug!(
            "Loaded {} at {:#x} (bias {:#x}, {} symbols)",
            path,
            map_start,
            load_bias,
            symbols.len()
        );

        Ok(Self {
            path: path.to_string(),
            base_address: map_start,
            load_bias,
            symbols,
        })
    }

    /// Symbols whose name matches
    pub fn find<'a>(&'a self, matcher: &'a SymbolMatcher) -> impl Iterator<Item = &'a SymbolInfo> {
        self.symbols.iter().filter(move |s| matcher.matches(&s.name))
    }
}

/// Defined functions and untyped labels (hand-written assembly stubs)
fn is_code_symbol(symbol: &sym::Sym) -> bool {
    let kind = symbol.st_type();
    (kind == sym::STT_FUNC || kind == sym::STT_NOTYPE)
        && symbol.st_value != 0
        && symbol.st_shndx != section_header::SHN_UNDEF as usize
}

/// Bias of an object whose file offset `map_offset` is mapped at `map_start`.
///
/// Inside a `PT_LOAD` segment the mapping is linear, so
/// `p_vaddr + bias == map_start + (p_offset - map_offset)`.
fn load_bias(elf: &Elf, map_start: u64, map_offset: u64) -> Result<u64> {
    let loads: Vec<_> = elf
        .program_headers
        .iter()
        .filter(|ph| ph.p_type == program_header::PT_LOAD)
        .collect();

    let segment = loads
        .iter()
        .find(|ph| ph.p_offset <= map_offset && map_offset < ph.p_offset + ph.p_filesz.max(1))
        .or_else(|| loads.first())
        .ok_or_else(|| anyhow!("no PT_LOAD segment"))?;

    Ok(map_start
        .wrapping_add(segment.p_offset)
        .wrapping_sub(map_offset)
        .wrapping_sub(segment.p_vaddr))
}

/// Every ELF object currently known in the debuggee
#[derive(Debug, Default)]
pub struct ModuleMap {
    modules: Vec<LoadedModule>,
    /// File mappings that are not ELF objects, skipped on later refreshes
    skipped: HashSet<String>,
}

impl ModuleMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load objects that appeared in `regions` since the last refresh.
    ///
    /// Only objects with at least one executable mapping are considered.
    /// Returns the indices of newly loaded modules.
    pub fn refresh(&mut self, regions: &[MemoryRegion]) -> Vec<usize> {
        let mut fresh = Vec::new();

        for region in regions {
            let Some(path) = region.file_path() else {
                continue;
            };
            if self.is_known(path) {
                continue;
            }
            let has_code = regions
                .iter()
                .any(|r| r.file_path() == Some(path) && r.protection.execute);
            if !has_code {
                continue;
            }

            // maps is sorted by address, so this is the object's first mapping
            match LoadedModule::from_file(path, region.base_address, region.file_offset) {
                Ok(module) => {
                    fresh.push(self.modules.len());
                    self.modules.push(module);
                }
                Err(e) => {
                    log::debug!("Skipping {}: {}", path, e);
                    self.skipped.insert(path.to_string());
                }
            }
        }

        fresh
    }

    fn is_known(&self, path: &str) -> bool {
        self.skipped.contains(path) || self.modules.iter().any(|m| m.path == path)
    }

    pub fn modules(&self) -> &[LoadedModule] {
        &self.modules
    }

    pub fn get(&self, index: usize) -> Option<&LoadedModule> {
        self.modules.get(index)
    }

    /// Every symbol of every module
    pub fn symbols(&self) -> impl Iterator<Item = &SymbolInfo> {
        self.modules.iter().flat_map(|m| m.symbols.iter())
    }

    /// First symbol with exactly this name
    pub fn find_symbol(&self, name: &str) -> Option<&SymbolInfo> {
        self.symbols().find(|s| s.name == name)
    }

    pub fn clear(&mut self) {
        self.modules.clear();
        self.skipped.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::memory::MemoryProtection;

    fn self_module() -> LoadedModule {
        let exe = std::env::current_exe().unwrap();
        let path = exe.to_string_lossy().to_string();
        LoadedModule::from_file(&path, 0, 0).unwrap()
    }

    #[test]
    fn test_parse_self() {
        let module = self_module();
        assert!(!module.symbols.is_empty());
        assert!(module.symbols.iter().all(|s| s.module == module.path));
    }

    #[test]
    fn test_find_by_regex() {
        let module = self_module();
        let matcher = SymbolMatcher::regex("main").unwrap();
        assert!(module.find(&matcher).next().is_some());
    }

    #[test]
    fn test_rejects_non_elf() {
        let err = LoadedModule::from_bytes(b"not an elf file", "/tmp/x", 0, 0).unwrap_err();
        assert!(err.to_string().contains("not an ELF object"));
    }

    #[test]
    fn test_refresh_skips_non_code_and_remembers_failures() {
        let regions = vec![
            MemoryRegion {
                base_address: 0x1000,
                size: 0x1000,
                protection: MemoryProtection::RW,
                file_offset: 0,
                name: Some("/dev/null".into()),
            },
            MemoryRegion {
                base_address: 0x3000,
                size: 0x1000,
                protection: MemoryProtection::RX,
                file_offset: 0,
                name: Some("/nonexistent/libjit.so".into()),
            },
        ];

        let mut map = ModuleMap::new();
        assert!(map.refresh(&regions).is_empty());
        assert!(map.is_known("/nonexistent/libjit.so"));
        assert!(!map.is_known("/dev/null"));
        assert!(map.modules().is_empty());
    }

    #[test]
    fn test_refresh_loads_code_mapping_once() {
        let exe = std::env::current_exe().unwrap();
        let path = exe.to_string_lossy().to_string();
        let regions = vec![MemoryRegion {
            base_address: 0x5000_0000,
            size: 0x1000,
            protection: MemoryProtection::RX,
            file_offset: 0,
            name: Some(path.clone()),
        }];

        let mut map = ModuleMap::new();
        assert_eq!(map.refresh(&regions), vec![0]);
        assert!(map.refresh(&regions).is_empty());

        let module = map.get(0).unwrap();
        assert_eq!(module.path, path);
        assert_eq!(module.base_address, 0x5000_0000);

        let main = map.find_symbol("main").unwrap();
        assert_eq!(main.module, path);
        assert!(map.find_symbol("no_such_symbol_anywhere").is_none());

        map.clear();
        assert!(map.modules().is_empty());
    }
}
