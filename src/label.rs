//! The closed set of mask classes the counter tallies.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// RGB color used when annotating frames.
pub type Rgb = [u8; 3];

/// Marker color for detections whose class index has no label.
pub const DEFAULT_MARKER: Rgb = [0, 255, 0];

/// Caption drawn for detections whose class index has no label.
pub const UNLABELED_CAPTION: &str = "None";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MaskLabel {
    #[serde(rename = "Without_Mask")]
    WithoutMask,
    #[serde(rename = "With_Mask")]
    WithMask,
    #[serde(rename = "Incorrectly_Worn_Mask")]
    IncorrectlyWornMask,
    #[serde(rename = "Partially_Worn_Mask")]
    PartiallyWornMask,
}

impl MaskLabel {
    /// All labels, in model class-index order.
    pub const ALL: [MaskLabel; 4] = [
        MaskLabel::WithoutMask,
        MaskLabel::WithMask,
        MaskLabel::IncorrectlyWornMask,
        MaskLabel::PartiallyWornMask,
    ];

    /// Resolve a model class index. Indices outside the map have no label.
    pub fn from_class_index(index: i64) -> Option<Self> {
        match index {
            0 => Some(Self::WithoutMask),
            1 => Some(Self::WithMask),
            2 => Some(Self::IncorrectlyWornMask),
            3 => Some(Self::PartiallyWornMask),
            _ => None,
        }
    }

    pub fn class_index(self) -> usize {
        self as usize
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::WithoutMask => "Without_Mask",
            Self::WithMask => "With_Mask",
            Self::IncorrectlyWornMask => "Incorrectly_Worn_Mask",
            Self::PartiallyWornMask => "Partially_Worn_Mask",
        }
    }

    pub fn color(self) -> Rgb {
        match self {
            Self::WithoutMask => [255, 0, 0],
            Self::WithMask => [0, 255, 0],
            Self::IncorrectlyWornMask => [255, 255, 0],
            Self::PartiallyWornMask => [255, 0, 255],
        }
    }
}

impl fmt::Display for MaskLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MaskLabel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|label| label.as_str() == s)
            .ok_or_else(|| anyhow!("unknown mask label '{}'", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_indices_follow_model_order() {
        for (index, label) in MaskLabel::ALL.iter().enumerate() {
            assert_eq!(MaskLabel::from_class_index(index as i64), Some(*label));
            assert_eq!(label.class_index(), index);
        }
        assert_eq!(MaskLabel::from_class_index(4), None);
        assert_eq!(MaskLabel::from_class_index(-1), None);
    }

    #[test]
    fn names_round_trip() {
        for label in MaskLabel::ALL {
            assert_eq!(label.as_str().parse::<MaskLabel>().unwrap(), label);
        }
        assert!("Face_Shield".parse::<MaskLabel>().is_err());
    }

    #[test]
    fn serde_uses_wire_names() {
        let json = serde_json::to_string(&MaskLabel::IncorrectlyWornMask).unwrap();
        assert_eq!(json, "\"Incorrectly_Worn_Mask\"");
    }
}
