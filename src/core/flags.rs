//! Classification flag vocabulary
//!
//! Each pixel carries a `u32` bitmask. The bit positions below are part of the
//! public contract and must stay stable between releases, because downstream
//! consumers decode the mask without this crate.

use crate::types::FlagValue;
use serde::{Deserialize, Serialize};

/// Named classification bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Flag {
    Invalid = 0,
    CloudAmbiguous = 1,
    CloudSure = 2,
    Cloud = 3,
    CloudBuffer = 4,
    CloudShadow = 5,
    SnowIce = 6,
    Bright = 7,
    White = 8,
    Coastline = 9,
    Land = 10,
    MountainShadow = 11,
    CloudTestA = 12,
    CloudTestABuffer = 13,
    CloudTestB = 14,
    CloudTestBBuffer = 15,
    CloudTestC = 16,
    CloudTestCBuffer = 17,
    CloudTestD = 18,
    CloudTestDBuffer = 19,
    CloudTestE = 20,
    CloudTestEBuffer = 21,
}

impl Flag {
    pub const ALL: [Flag; 22] = [
        Flag::Invalid,
        Flag::CloudAmbiguous,
        Flag::CloudSure,
        Flag::Cloud,
        Flag::CloudBuffer,
        Flag::CloudShadow,
        Flag::SnowIce,
        Flag::Bright,
        Flag::White,
        Flag::Coastline,
        Flag::Land,
        Flag::MountainShadow,
        Flag::CloudTestA,
        Flag::CloudTestABuffer,
        Flag::CloudTestB,
        Flag::CloudTestBBuffer,
        Flag::CloudTestC,
        Flag::CloudTestCBuffer,
        Flag::CloudTestD,
        Flag::CloudTestDBuffer,
        Flag::CloudTestE,
        Flag::CloudTestEBuffer,
    ];

    /// Bit position
    pub const fn bit(self) -> u8 {
        self as u8
    }

    /// Single-bit mask
    pub const fn mask(self) -> FlagValue {
        1 << (self as u8)
    }

    /// Upper-case name used in product flag codings
    pub fn name(self) -> &'static str {
        match self {
            Flag::Invalid => "INVALID",
            Flag::CloudAmbiguous => "CLOUD_AMBIGUOUS",
            Flag::CloudSure => "CLOUD_SURE",
            Flag::Cloud => "CLOUD",
            Flag::CloudBuffer => "CLOUD_BUFFER",
            Flag::CloudShadow => "CLOUD_SHADOW",
            Flag::SnowIce => "SNOW_ICE",
            Flag::Bright => "BRIGHT",
            Flag::White => "WHITE",
            Flag::Coastline => "COASTLINE",
            Flag::Land => "LAND",
            Flag::MountainShadow => "MOUNTAIN_SHADOW",
            Flag::CloudTestA => "CLOUD_TEST_A",
            Flag::CloudTestABuffer => "CLOUD_TEST_A_BUFFER",
            Flag::CloudTestB => "CLOUD_TEST_B",
            Flag::CloudTestBBuffer => "CLOUD_TEST_B_BUFFER",
            Flag::CloudTestC => "CLOUD_TEST_C",
            Flag::CloudTestCBuffer => "CLOUD_TEST_C_BUFFER",
            Flag::CloudTestD => "CLOUD_TEST_D",
            Flag::CloudTestDBuffer => "CLOUD_TEST_D_BUFFER",
            Flag::CloudTestE => "CLOUD_TEST_E",
            Flag::CloudTestEBuffer => "CLOUD_TEST_E_BUFFER",
        }
    }

    /// Look up a flag by its bit position
    pub fn from_bit(bit: u8) -> Option<Flag> {
        Flag::ALL.get(bit as usize).copied()
    }
}

impl std::fmt::Display for Flag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Aggregate cloud bits cleared together with a coastline artefact
pub const CLOUD_AGGREGATE_MASK: FlagValue =
    Flag::Cloud.mask() | Flag::CloudSure.mask() | Flag::CloudAmbiguous.mask();

#[inline]
pub fn is_set(value: FlagValue, flag: Flag) -> bool {
    value & flag.mask() != 0
}

/// Set or clear `flag` without branching on `on`
#[inline]
pub fn with_flag(value: FlagValue, flag: Flag, on: bool) -> FlagValue {
    let m = flag.mask();
    (value & !m) | (m & (on as FlagValue).wrapping_neg())
}

#[inline]
pub fn set_flag(cell: &mut FlagValue, flag: Flag, on: bool) {
    *cell = with_flag(*cell, flag, on);
}

#[inline]
pub fn clear_flags(cell: &mut FlagValue, mask: FlagValue) {
    *cell &= !mask;
}

/// Merge two masks, keeping every bit set in either
#[inline]
pub fn combine(a: FlagValue, b: FlagValue) -> FlagValue {
    a | b
}

pub fn mask_of(flags: &[Flag]) -> FlagValue {
    flags.iter().fold(0, |acc, f| acc | f.mask())
}

/// A cloud bit paired with the buffer bit dilated from it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudCategory {
    pub cloud: Flag,
    pub buffer: Flag,
}

impl CloudCategory {
    pub const fn new(cloud: Flag, buffer: Flag) -> Self {
        Self { cloud, buffer }
    }

    pub const OVERALL: CloudCategory = CloudCategory::new(Flag::Cloud, Flag::CloudBuffer);
    pub const SURE: CloudCategory = CloudCategory::new(Flag::CloudSure, Flag::CloudBuffer);

    /// Per-algorithm test slots in bit order
    pub const TESTS: [CloudCategory; 5] = [
        CloudCategory::new(Flag::CloudTestA, Flag::CloudTestABuffer),
        CloudCategory::new(Flag::CloudTestB, Flag::CloudTestBBuffer),
        CloudCategory::new(Flag::CloudTestC, Flag::CloudTestCBuffer),
        CloudCategory::new(Flag::CloudTestD, Flag::CloudTestDBuffer),
        CloudCategory::new(Flag::CloudTestE, Flag::CloudTestEBuffer),
    ];
}

/// Rule deriving the overall CLOUD bit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CloudDerivation {
    /// CLOUD := CLOUD_SURE
    SureOnly,
    /// CLOUD := CLOUD_SURE | CLOUD_AMBIGUOUS
    SureOrAmbiguous,
    /// CLOUD := CLOUD_SURE | any per-test bit
    AnyTest,
}

/// Sensor-specific cloud test layout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorProfile {
    pub name: String,
    /// Per-algorithm tests with their display names
    pub tests: Vec<(String, CloudCategory)>,
    pub derivation: CloudDerivation,
}

impl SensorProfile {
    /// Landsat-8 OLI: SHIMEZ, HOT, OTSU and CLOST tests, CLOUD taken from CLOUD_SURE
    pub fn landsat8() -> Self {
        let names = ["SHIMEZ", "HOT", "OTSU", "CLOST"];
        Self {
            name: "Landsat-8".to_string(),
            tests: names
                .iter()
                .zip(CloudCategory::TESTS.iter())
                .map(|(n, c)| (n.to_string(), *c))
                .collect(),
            derivation: CloudDerivation::SureOnly,
        }
    }

    /// Sentinel-2 MSI: no per-test bits, CLOUD from sure or ambiguous
    pub fn sentinel2() -> Self {
        Self {
            name: "Sentinel-2".to_string(),
            tests: Vec::new(),
            derivation: CloudDerivation::SureOrAmbiguous,
        }
    }

    /// Up to five anonymous tests, CLOUD from any of them
    pub fn generic(test_count: usize) -> Self {
        Self {
            name: "generic".to_string(),
            tests: CloudCategory::TESTS
                .iter()
                .take(test_count)
                .enumerate()
                .map(|(i, c)| (format!("TEST_{}", (b'A' + i as u8) as char), *c))
                .collect(),
            derivation: CloudDerivation::AnyTest,
        }
    }

    /// Category refined alongside the per-test bits
    pub fn overall_category(&self) -> CloudCategory {
        match self.derivation {
            CloudDerivation::SureOnly => CloudCategory::SURE,
            _ => CloudCategory::OVERALL,
        }
    }

    /// Per-test categories followed by the overall one
    pub fn refined_categories(&self) -> Vec<CloudCategory> {
        let mut categories: Vec<CloudCategory> = self.tests.iter().map(|(_, c)| *c).collect();
        categories.push(self.overall_category());
        categories
    }

    /// Per-test categories followed by CLOUD/CLOUD_BUFFER
    pub fn buffered_categories(&self) -> Vec<CloudCategory> {
        let mut categories: Vec<CloudCategory> = self.tests.iter().map(|(_, c)| *c).collect();
        categories.push(CloudCategory::OVERALL);
        categories
    }

    fn test_mask(&self) -> FlagValue {
        self.tests.iter().fold(0, |acc, (_, c)| acc | c.cloud.mask())
    }

    /// Whether `value` would carry CLOUD under this profile's rule
    pub fn is_cloud(&self, value: FlagValue) -> bool {
        let sources = match self.derivation {
            CloudDerivation::SureOnly => Flag::CloudSure.mask(),
            CloudDerivation::SureOrAmbiguous => {
                Flag::CloudSure.mask() | Flag::CloudAmbiguous.mask()
            }
            CloudDerivation::AnyTest => Flag::CloudSure.mask() | self.test_mask(),
        };
        value & sources != 0
    }

    /// Recompute the CLOUD bit from its sources
    pub fn derive_cloud(&self, value: FlagValue) -> FlagValue {
        with_flag(value, Flag::Cloud, self.is_cloud(value))
    }
}

impl Default for SensorProfile {
    fn default() -> Self {
        Self::landsat8()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bit_layout_is_stable() {
        for (i, flag) in Flag::ALL.iter().enumerate() {
            assert_eq!(flag.bit() as usize, i);
            assert_eq!(Flag::from_bit(i as u8), Some(*flag));
        }
        assert_eq!(Flag::Cloud.mask(), 0b1000);
        assert_eq!(Flag::MountainShadow.mask(), 1 << 11);
        assert_eq!(Flag::from_bit(22), None);
    }

    #[test]
    fn test_with_flag_sets_and_clears() {
        let v = with_flag(0, Flag::SnowIce, true);
        assert!(is_set(v, Flag::SnowIce));
        let v = with_flag(v | Flag::Cloud.mask(), Flag::SnowIce, false);
        assert!(!is_set(v, Flag::SnowIce));
        assert!(is_set(v, Flag::Cloud));
    }

    #[test]
    fn test_combine_is_monotonic() {
        let a = mask_of(&[Flag::Cloud, Flag::Land]);
        let b = mask_of(&[Flag::SnowIce]);
        let c = combine(a, b);
        assert_eq!(c & a, a);
        assert_eq!(c & b, b);
    }

    #[test]
    fn test_clear_flags() {
        let mut v = mask_of(&[Flag::Cloud, Flag::CloudSure, Flag::Land]);
        clear_flags(&mut v, CLOUD_AGGREGATE_MASK);
        assert_eq!(v, Flag::Land.mask());
    }

    #[test]
    fn test_landsat8_derivation() {
        let profile = SensorProfile::landsat8();
        assert_eq!(profile.tests.len(), 4);
        assert_eq!(profile.tests[1].0, "HOT");
        assert_eq!(profile.overall_category(), CloudCategory::SURE);

        let v = profile.derive_cloud(Flag::CloudSure.mask());
        assert!(is_set(v, Flag::Cloud));
        let v = profile.derive_cloud(Flag::Cloud.mask() | Flag::CloudTestA.mask());
        assert!(!is_set(v, Flag::Cloud));
    }

    #[test]
    fn test_sentinel2_and_generic_derivation() {
        let s2 = SensorProfile::sentinel2();
        assert!(s2.is_cloud(Flag::CloudAmbiguous.mask()));
        assert_eq!(s2.refined_categories(), vec![CloudCategory::OVERALL]);

        let generic = SensorProfile::generic(2);
        assert_eq!(generic.tests[1].0, "TEST_B");
        assert!(generic.is_cloud(Flag::CloudTestB.mask()));
        assert!(!generic.is_cloud(Flag::CloudTestC.mask()));
    }

    #[test]
    fn test_buffered_categories_include_overall() {
        let l8 = SensorProfile::landsat8();
        let categories = l8.buffered_categories();
        assert_eq!(categories.len(), 5);
        assert_eq!(categories.last(), Some(&CloudCategory::OVERALL));
    }
}
