// PCIForge - PCILeech Donor Firmware Generator
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// PCIe Bus/Device/Function address, formatted `DDDD:BB:DD.F`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Bdf {
    pub domain: u16,
    pub bus: u8,
    pub device: u8,
    pub function: u8,
}

impl Bdf {
    pub fn new(domain: u16, bus: u8, device: u8, function: u8) -> Result<Self, Error> {
        if device > 0x1f {
            return Err(Error::Input(format!(
                "device number {device:#x} exceeds 0x1f"
            )));
        }
        if function > 7 {
            return Err(Error::Input(format!("function number {function} exceeds 7")));
        }
        Ok(Self {
            domain,
            bus,
            device,
            function,
        })
    }
}

impl FromStr for Bdf {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        let malformed = || Error::Input(format!("malformed BDF '{s}', expected DDDD:BB:DD.F"));

        let mut colon = s.split(':');
        let domain = colon.next().ok_or_else(malformed)?;
        let bus = colon.next().ok_or_else(malformed)?;
        let dev_fn = colon.next().ok_or_else(malformed)?;
        if colon.next().is_some() {
            return Err(malformed());
        }

        let (device, function) = dev_fn.split_once('.').ok_or_else(malformed)?;
        if domain.len() != 4 || bus.len() != 2 || device.len() != 2 || function.len() != 1 {
            return Err(malformed());
        }

        let domain = u16::from_str_radix(domain, 16).map_err(|_| malformed())?;
        let bus = u8::from_str_radix(bus, 16).map_err(|_| malformed())?;
        let device = u8::from_str_radix(device, 16).map_err(|_| malformed())?;
        let function = u8::from_str_radix(function, 16).map_err(|_| malformed())?;

        Bdf::new(domain, bus, device, function)
    }
}

impl fmt::Display for Bdf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04x}:{:02x}:{:02x}.{:x}",
            self.domain, self.bus, self.device, self.function
        )
    }
}

impl TryFrom<String> for Bdf {
    type Error = Error;

    fn try_from(s: String) -> Result<Self, Error> {
        s.parse()
    }
}

impl From<Bdf> for String {
    fn from(bdf: Bdf) -> String {
        bdf.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_canonical_form() {
        let bdf: Bdf = "0000:03:00.0".parse().unwrap();
        assert_eq!(bdf.domain, 0);
        assert_eq!(bdf.bus, 3);
        assert_eq!(bdf.device, 0);
        assert_eq!(bdf.function, 0);
        assert_eq!(bdf.to_string(), "0000:03:00.0");
    }

    #[test]
    fn parses_nonzero_domain_and_function() {
        let bdf: Bdf = "10ab:a1:1f.7".parse().unwrap();
        assert_eq!(bdf.domain, 0x10ab);
        assert_eq!(bdf.bus, 0xa1);
        assert_eq!(bdf.device, 0x1f);
        assert_eq!(bdf.function, 7);
    }

    #[test]
    fn rejects_malformed_strings() {
        for s in [
            "",
            "0000:03:00",
            "03:00.0",
            "0000:03:00.8",
            "0000:03:20.0",
            "zzzz:03:00.0",
            "0000:03:00.0.1",
            "00000:03:00.0",
        ] {
            assert!(s.parse::<Bdf>().is_err(), "accepted '{s}'");
        }
    }

    #[test]
    fn serde_round_trips_as_string() {
        let bdf: Bdf = "0000:a1:00.0".parse().unwrap();
        let json = serde_json::to_string(&bdf).unwrap();
        assert_eq!(json, "\"0000:a1:00.0\"");
        let back: Bdf = serde_json::from_str(&json).unwrap();
        assert_eq!(back, bdf);
    }
}
