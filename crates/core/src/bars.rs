// PCIForge - PCILeech Donor Firmware Generator
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! BAR classification and sizing.
//!
//! Type and width come from the header dwords at 0x10..0x27; size and
//! presence come from the host resource table. 64-bit BARs occupy two
//! header slots; the upper half is collapsed into the lower descriptor.

use crate::config_space::ConfigSpace;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// One line of the sysfs `resource` table: half-open `[start, end]` span
/// plus kernel resource flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceEntry {
    pub start: u64,
    pub end: u64,
    pub flags: u64,
}

impl ResourceEntry {
    pub const EMPTY: ResourceEntry = ResourceEntry {
        start: 0,
        end: 0,
        flags: 0,
    };

    pub fn is_populated(&self) -> bool {
        !(self.start == 0 && self.end == 0)
    }

    /// Span in bytes, rounded up to the next power of two. An inverted
    /// span (end before start) reads as empty.
    pub fn span_pow2(&self) -> u64 {
        if !self.is_populated() || self.end < self.start {
            return 0;
        }
        let raw = self.end - self.start + 1;
        raw.next_power_of_two()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BarKind {
    Memory,
    Io,
    None,
}

/// Analyzed view of one BAR slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BarDescriptor {
    pub index: usize,
    pub present: bool,
    pub kind: BarKind,
    pub size_bytes: u64,
    pub is_64bit: bool,
    pub is_prefetchable: bool,
    /// Set on a 64-bit BAR whose upper half lives in slot `index + 1`.
    pub consumes_next_index: bool,
}

impl BarDescriptor {
    pub fn absent(index: usize) -> Self {
        Self {
            index,
            present: false,
            kind: BarKind::None,
            size_bytes: 0,
            is_64bit: false,
            is_prefetchable: false,
            consumes_next_index: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpansionRomDescriptor {
    pub present: bool,
    pub size_bytes: u64,
}

const BAR_IO_BIT: u32 = 1 << 0;
const BAR_MEM_TYPE_MASK: u32 = 0b11 << 1;
const BAR_MEM_TYPE_64: u32 = 0b10 << 1;
const BAR_PREFETCH_BIT: u32 = 1 << 3;

/// Classify and size all six BAR slots.
pub fn analyze_bars(cfg: &ConfigSpace, resources: &[ResourceEntry]) -> Result<[BarDescriptor; 6]> {
    let mut bars = [
        BarDescriptor::absent(0),
        BarDescriptor::absent(1),
        BarDescriptor::absent(2),
        BarDescriptor::absent(3),
        BarDescriptor::absent(4),
        BarDescriptor::absent(5),
    ];

    let mut sixty_four_bit = 0usize;
    let mut i = 0;
    while i < 6 {
        let dword = cfg.bar_dword(i);
        let resource = resources.get(i).copied().unwrap_or(ResourceEntry::EMPTY);
        let size = resource.span_pow2();

        if dword & BAR_IO_BIT != 0 {
            if dword & BAR_PREFETCH_BIT != 0 {
                return Err(Error::BarInvalid {
                    index: i,
                    reason: "I/O BAR flagged prefetchable".into(),
                });
            }
            bars[i] = BarDescriptor {
                index: i,
                present: size > 0,
                kind: if size > 0 { BarKind::Io } else { BarKind::None },
                size_bytes: size,
                is_64bit: false,
                is_prefetchable: false,
                consumes_next_index: false,
            };
            i += 1;
            continue;
        }

        let is_64bit = dword & BAR_MEM_TYPE_MASK == BAR_MEM_TYPE_64;
        let is_prefetchable = dword & BAR_PREFETCH_BIT != 0;

        if is_64bit {
            if i == 5 {
                return Err(Error::BarInvalid {
                    index: i,
                    reason: "64-bit BAR in the last slot has no upper half".into(),
                });
            }
            sixty_four_bit += 1;
            if sixty_four_bit > 3 {
                return Err(Error::BarInvalid {
                    index: i,
                    reason: "more than three 64-bit BARs".into(),
                });
            }
        } else if size > (1u64 << 32) {
            return Err(Error::BarInvalid {
                index: i,
                reason: format!("32-bit memory BAR sized {size:#x}"),
            });
        }

        bars[i] = BarDescriptor {
            index: i,
            present: size > 0,
            kind: if size > 0 {
                BarKind::Memory
            } else {
                BarKind::None
            },
            size_bytes: size,
            is_64bit,
            is_prefetchable,
            consumes_next_index: is_64bit,
        };

        if is_64bit {
            // Slot i+1 is the upper dword of this BAR, never its own window.
            bars[i + 1] = BarDescriptor::absent(i + 1);
            i += 2;
        } else {
            i += 1;
        }
    }

    Ok(bars)
}

/// Expansion ROM descriptor from resource line 6 when the table carries one.
pub fn analyze_expansion_rom(resources: &[ResourceEntry]) -> Option<ExpansionRomDescriptor> {
    let rom = resources.get(6)?;
    if !rom.is_populated() {
        return None;
    }
    Some(ExpansionRomDescriptor {
        present: true,
        size_bytes: rom.span_pow2(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image_with_bars(dwords: [u32; 6]) -> ConfigSpace {
        let mut bytes = vec![0u8; 256];
        for (i, d) in dwords.iter().enumerate() {
            bytes[0x10 + 4 * i..0x14 + 4 * i].copy_from_slice(&d.to_le_bytes());
        }
        ConfigSpace::new(bytes).unwrap()
    }

    fn mem(start: u64, size: u64) -> ResourceEntry {
        ResourceEntry {
            start,
            end: start + size - 1,
            flags: 0x200,
        }
    }

    #[test]
    fn classifies_32bit_memory_bar() {
        let cfg = image_with_bars([0xf000_0000, 0, 0, 0, 0, 0]);
        let res = [
            mem(0xf000_0000, 0x20000),
            ResourceEntry::EMPTY,
            ResourceEntry::EMPTY,
            ResourceEntry::EMPTY,
            ResourceEntry::EMPTY,
            ResourceEntry::EMPTY,
        ];
        let bars = analyze_bars(&cfg, &res).unwrap();
        assert!(bars[0].present);
        assert_eq!(bars[0].kind, BarKind::Memory);
        assert_eq!(bars[0].size_bytes, 0x20000);
        assert!(!bars[0].is_64bit);
        assert!(!bars[0].is_prefetchable);
        assert!(!bars[0].consumes_next_index);
        for bar in &bars[1..] {
            assert!(!bar.present);
        }
    }

    #[test]
    fn collapses_64bit_pair() {
        // BAR4 is 64-bit prefetchable; BAR5 holds its upper dword.
        let mut dwords = [0u32; 6];
        dwords[4] = 0xe000_0000 | BAR_MEM_TYPE_64 | BAR_PREFETCH_BIT;
        let cfg = image_with_bars(dwords);
        let mut res = [ResourceEntry::EMPTY; 6];
        res[4] = mem(0xe000_0000, 0x2000);

        let bars = analyze_bars(&cfg, &res).unwrap();
        assert!(bars[4].present);
        assert!(bars[4].is_64bit);
        assert!(bars[4].is_prefetchable);
        assert!(bars[4].consumes_next_index);
        assert_eq!(bars[4].size_bytes, 0x2000);
        assert!(!bars[5].present);
        assert_eq!(bars[5].kind, BarKind::None);
    }

    #[test]
    fn sizes_round_up_to_power_of_two() {
        let entry = ResourceEntry {
            start: 0x1000,
            end: 0x1000 + 0x1800 - 1,
            flags: 0x200,
        };
        assert_eq!(entry.span_pow2(), 0x2000);
    }

    #[test]
    fn io_bar_never_prefetchable() {
        let cfg = image_with_bars([BAR_IO_BIT | BAR_PREFETCH_BIT, 0, 0, 0, 0, 0]);
        let res = [mem(0x1000, 0x100); 6];
        match analyze_bars(&cfg, &res) {
            Err(Error::BarInvalid { index: 0, .. }) => {}
            other => panic!("expected BarInvalid, got {other:?}"),
        }
    }

    #[test]
    fn oversized_32bit_memory_bar_rejected() {
        let cfg = image_with_bars([0xf000_0000, 0, 0, 0, 0, 0]);
        let mut res = [ResourceEntry::EMPTY; 6];
        res[0] = ResourceEntry {
            start: 0,
            end: (1u64 << 33) - 1,
            flags: 0x200,
        };
        assert!(analyze_bars(&cfg, &res).is_err());
    }

    #[test]
    fn sixty_four_bit_bar_in_last_slot_rejected() {
        let mut dwords = [0u32; 6];
        dwords[5] = BAR_MEM_TYPE_64;
        let cfg = image_with_bars(dwords);
        assert!(analyze_bars(&cfg, &[ResourceEntry::EMPTY; 6]).is_err());
    }

    #[test]
    fn rom_from_seventh_resource_line() {
        let mut res = vec![ResourceEntry::EMPTY; 6];
        res.push(mem(0xfff0_0000, 0x8000));
        let rom = analyze_expansion_rom(&res).unwrap();
        assert!(rom.present);
        assert_eq!(rom.size_bytes, 0x8000);
        assert!(analyze_expansion_rom(&res[..6]).is_none());
    }
}
