//! Finger positions

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Finger a template was enrolled from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Finger {
    #[default]
    Unknown,
    LeftThumb,
    LeftIndex,
    LeftMiddle,
    LeftRing,
    LeftPinky,
    RightThumb,
    RightIndex,
    RightMiddle,
    RightRing,
    RightPinky,
}

impl Finger {
    /// All positions, `Unknown` first
    pub const ALL: [Finger; 11] = [
        Self::Unknown,
        Self::LeftThumb,
        Self::LeftIndex,
        Self::LeftMiddle,
        Self::LeftRing,
        Self::LeftPinky,
        Self::RightThumb,
        Self::RightIndex,
        Self::RightMiddle,
        Self::RightRing,
        Self::RightPinky,
    ];

    /// Wire name (e.g. `LEFT_INDEX`)
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "UNKNOWN",
            Self::LeftThumb => "LEFT_THUMB",
            Self::LeftIndex => "LEFT_INDEX",
            Self::LeftMiddle => "LEFT_MIDDLE",
            Self::LeftRing => "LEFT_RING",
            Self::LeftPinky => "LEFT_PINKY",
            Self::RightThumb => "RIGHT_THUMB",
            Self::RightIndex => "RIGHT_INDEX",
            Self::RightMiddle => "RIGHT_MIDDLE",
            Self::RightRing => "RIGHT_RING",
            Self::RightPinky => "RIGHT_PINKY",
        }
    }
}

impl FromStr for Finger {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|f| f.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::UnknownFinger(s.to_string()))
    }
}

impl fmt::Display for Finger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
