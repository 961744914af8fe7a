//! Discrete duty levels

use serde::{Deserialize, Serialize};
use std::fmt;

/// Set of duty levels a fan channel accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DutyScale {
    /// 0, 20, 40, 60, 80, 100 %
    #[default]
    FiveStep,
    /// 0, 33, 66, 100 % (multi-fan panel)
    ThreeStep,
}

impl DutyScale {
    /// Levels in ascending order
    pub fn levels(self) -> &'static [u8] {
        match self {
            DutyScale::FiveStep => &[0, 20, 40, 60, 80, 100],
            DutyScale::ThreeStep => &[0, 33, 66, 100],
        }
    }

    /// Whether `percent` is one of this scale's levels
    pub fn contains(self, percent: u8) -> bool {
        self.levels().contains(&percent)
    }
}

impl fmt::Display for DutyScale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DutyScale::FiveStep => f.write_str("five-step"),
            DutyScale::ThreeStep => f.write_str("three-step"),
        }
    }
}

/// 16-bit duty register value for a percentage (20% -> 0x3333)
pub fn duty_for_percent(percent: u8) -> u16 {
    let percent = percent.min(100) as u32;
    (percent * 0xFFFF / 100) as u16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duty_table_matches_hotkey_values() {
        let duties: Vec<u16> = DutyScale::FiveStep
            .levels()
            .iter()
            .map(|&p| duty_for_percent(p))
            .collect();
        assert_eq!(duties, vec![0x0000, 0x3333, 0x6666, 0x9999, 0xCCCC, 0xFFFF]);
    }

    #[test]
    fn test_scale_membership() {
        assert!(DutyScale::ThreeStep.contains(66));
        assert!(!DutyScale::ThreeStep.contains(60));
        assert!(DutyScale::FiveStep.contains(0));
        assert_eq!(duty_for_percent(150), 0xFFFF);
    }

    #[test]
    fn test_scale_serde() {
        let scale: DutyScale = serde_json::from_str("\"three_step\"").unwrap();
        assert_eq!(scale, DutyScale::ThreeStep);
    }
}
