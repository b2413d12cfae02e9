//! Mining location and the diagnostics port derived from it.

use crate::Context;
use alloy_primitives::Bytes;
use core::fmt;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Number of regions below Prime.
pub const NUM_REGIONS: u8 = 3;

/// Number of zones below each region.
pub const ZONES_PER_REGION: u8 = 3;

/// Base diagnostics port for the Prime context.
const PRIME_DIAGNOSTICS_PORT: u16 = 21000;

/// Base diagnostics port for region contexts.
const REGION_DIAGNOSTICS_PORT: u16 = 22000;

/// Base diagnostics port for zone contexts.
const ZONE_DIAGNOSTICS_PORT: u16 = 23000;

/// Invalid location coordinates
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LocationError {
    /// Region index is outside the hierarchy
    #[error("region {0} out of range (expected < {NUM_REGIONS})")]
    RegionOutOfRange(u8),
    /// Zone index is outside its region
    #[error("zone {0} out of range (expected < {ZONES_PER_REGION})")]
    ZoneOutOfRange(u8),
    /// Wire encoding was not exactly two bytes
    #[error("expected a 2-byte zone location, got {0} bytes")]
    InvalidLength(usize),
}

/// The `(region, zone)` coordinate a miner targets.
///
/// Encoded on the wire as two hex bytes, e.g. region 1 zone 2 is `"0x0102"`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Location {
    /// Region index
    pub region: u8,
    /// Zone index within the region
    pub zone: u8,
}

impl Location {
    /// Create a location, checking both coordinates are in range.
    pub const fn new(region: u8, zone: u8) -> Result<Self, LocationError> {
        if region >= NUM_REGIONS {
            return Err(LocationError::RegionOutOfRange(region));
        }
        if zone >= ZONES_PER_REGION {
            return Err(LocationError::ZoneOutOfRange(zone));
        }
        Ok(Self { region, zone })
    }

    /// The context this location names. Miner locations are always zones.
    pub const fn context(&self) -> Context {
        Context::Zone
    }

    /// Port of the diagnostics endpoint for a miner at this location.
    pub const fn diagnostics_port(&self) -> u16 {
        diagnostics_port(self.context(), self.region, self.zone)
    }
}

/// Diagnostics port for a process running in `ctx` at `(region, zone)`.
///
/// Prime binds 21000, region `r` binds `22000 + r` and zone `(r, z)` binds
/// `23000 + 100 * r + z`. Coordinates a context does not use are ignored.
pub const fn diagnostics_port(ctx: Context, region: u8, zone: u8) -> u16 {
    match ctx {
        Context::Prime => PRIME_DIAGNOSTICS_PORT,
        Context::Region => REGION_DIAGNOSTICS_PORT + region as u16,
        Context::Zone => ZONE_DIAGNOSTICS_PORT + 100 * region as u16 + zone as u16,
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{} {}]", self.region, self.zone)
    }
}

impl Serialize for Location {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        Bytes::copy_from_slice(&[self.region, self.zone]).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Location {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let bytes = Bytes::deserialize(deserializer)?;
        match bytes.as_ref() {
            [region, zone] => Self::new(*region, *zone).map_err(serde::de::Error::custom),
            other => Err(serde::de::Error::custom(LocationError::InvalidLength(other.len()))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagnostics_ports() {
        assert_eq!(diagnostics_port(Context::Prime, 2, 2), 21000);
        assert_eq!(diagnostics_port(Context::Region, 0, 0), 22000);
        assert_eq!(diagnostics_port(Context::Region, 2, 0), 22002);
        assert_eq!(diagnostics_port(Context::Zone, 0, 0), 23000);
        assert_eq!(diagnostics_port(Context::Zone, 0, 2), 23002);
        assert_eq!(diagnostics_port(Context::Zone, 1, 1), 23101);
        assert_eq!(diagnostics_port(Context::Zone, 2, 2), 23202);
    }

    #[test]
    fn location_port_uses_zone_context() {
        let location = Location::new(1, 2).unwrap();
        assert_eq!(location.diagnostics_port(), 23102);
    }

    #[test]
    fn rejects_out_of_range() {
        assert_eq!(Location::new(3, 0), Err(LocationError::RegionOutOfRange(3)));
        assert_eq!(Location::new(0, 7), Err(LocationError::ZoneOutOfRange(7)));
    }

    #[test]
    fn wire_encoding() {
        let location = Location::new(1, 2).unwrap();
        let json = serde_json::to_string(&location).unwrap();
        assert_eq!(json, "\"0x0102\"");
        assert_eq!(serde_json::from_str::<Location>(&json).unwrap(), location);

        assert!(serde_json::from_str::<Location>("\"0x01\"").is_err());
        assert!(serde_json::from_str::<Location>("\"0x0105\"").is_err());
    }
}
