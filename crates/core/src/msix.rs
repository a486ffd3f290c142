// PCIForge - PCILeech Donor Firmware Generator
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! MSI-X geometry: vector count, table window, pending-bit-array window,
//! and the cross-checks tying both windows to the analyzed BARs.

use crate::bars::{BarDescriptor, BarKind};
use crate::caps::CapabilityKind;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

pub const MSIX_MIN_VECTORS: u16 = 1;
pub const MSIX_MAX_VECTORS: u16 = 2048;

/// Bytes per MSI-X table entry (address + data + vector control).
pub const MSIX_ENTRY_BYTES: u32 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsixInfo {
    pub num_vectors: u16,
    pub table_bar: u8,
    pub table_offset: u32,
    pub pba_bar: u8,
    pub pba_offset: u32,
}

impl MsixInfo {
    /// Build from a decoded MSI-X capability node. Returns `None` for any
    /// other capability kind.
    pub fn from_capability(kind: &CapabilityKind) -> Option<Self> {
        match *kind {
            CapabilityKind::MsiX {
                table_size,
                table_bar,
                table_offset,
                pba_bar,
                pba_offset,
                ..
            } => Some(Self {
                num_vectors: table_size + 1,
                table_bar,
                table_offset,
                pba_bar,
                pba_offset,
            }),
            _ => None,
        }
    }

    /// The encoded form written back into generated capability registers.
    pub fn table_size_minus_one(&self) -> u16 {
        self.num_vectors - 1
    }

    pub fn table_len_bytes(&self) -> u32 {
        MSIX_ENTRY_BYTES * u32::from(self.num_vectors)
    }

    /// PBA length: one bit per vector, rounded up to a whole dword.
    pub fn pba_len_bytes(&self) -> u32 {
        let bytes = (u32::from(self.num_vectors) + 7) / 8;
        (bytes + 3) & !3
    }

    /// Validate vector bounds and that both windows sit inside their BARs.
    pub fn validate(&self, bars: &[BarDescriptor; 6]) -> Result<()> {
        if !(MSIX_MIN_VECTORS..=MSIX_MAX_VECTORS).contains(&self.num_vectors) {
            return Err(Error::Input(format!(
                "MSI-X vector count {} outside {MSIX_MIN_VECTORS}..={MSIX_MAX_VECTORS}",
                self.num_vectors
            )));
        }

        let table_bar = self.window_bar(bars, self.table_bar, "table")?;
        let table_end = u64::from(self.table_offset) + u64::from(self.table_len_bytes());
        if table_end > table_bar.size_bytes {
            return Err(Error::MsixTableOutOfBar {
                bar: self.table_bar,
                offset: self.table_offset,
                len: self.table_len_bytes(),
                bar_size: table_bar.size_bytes,
            });
        }

        let pba_bar = self.window_bar(bars, self.pba_bar, "PBA")?;
        let pba_end = u64::from(self.pba_offset) + u64::from(self.pba_len_bytes());
        if pba_end > pba_bar.size_bytes {
            return Err(Error::MsixPbaOutOfBar {
                bar: self.pba_bar,
                offset: self.pba_offset,
                len: self.pba_len_bytes(),
                bar_size: pba_bar.size_bytes,
            });
        }

        if self.table_bar == self.pba_bar {
            let t0 = u64::from(self.table_offset);
            let p0 = u64::from(self.pba_offset);
            if t0 < pba_end && p0 < table_end {
                return Err(Error::MsixOverlap { bar: self.table_bar });
            }
        }

        Ok(())
    }

    fn window_bar<'a>(
        &self,
        bars: &'a [BarDescriptor; 6],
        bir: u8,
        what: &str,
    ) -> Result<&'a BarDescriptor> {
        let bar = bars
            .get(bir as usize)
            .ok_or_else(|| Error::Input(format!("MSI-X {what} BIR {bir} out of range")))?;
        if !bar.present || bar.kind != BarKind::Memory {
            return Err(Error::Input(format!(
                "MSI-X {what} BIR {bir} references an absent or non-memory BAR"
            )));
        }
        Ok(bar)
    }
}
