//! Similarity scores
//!
//! Scores are integers on a 0..=100 scale. Matchers reporting a normalized
//! float are converted once, at the matcher boundary.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Similarity score, 0..=100
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Score(u8);

impl Score {
    pub const MIN: Score = Score(0);
    pub const MAX: Score = Score(100);

    /// Default acceptance threshold
    pub const DEFAULT_THRESHOLD: Score = Score(60);

    /// Create a score, rejecting values above 100
    pub fn new(value: u8) -> Result<Self> {
        if value > 100 {
            return Err(Error::InvalidScore(value));
        }
        Ok(Self(value))
    }

    /// Convert a normalized matcher result (0.0..=1.0)
    ///
    /// Negative and NaN values mean the matcher failed and yield `None`.
    /// Values above 1.0 saturate at 100.
    pub fn from_normalized(value: f32) -> Option<Self> {
        if value.is_nan() || value < 0.0 {
            return None;
        }
        let scaled = (value * 100.0).round().min(100.0);
        Some(Self(scaled as u8))
    }

    /// Convert a percentage matcher result (0.0..=100.0)
    ///
    /// Same failure rule as [`Score::from_normalized`].
    pub fn from_percentage(value: f32) -> Option<Self> {
        Self::from_normalized(value / 100.0)
    }

    pub fn value(self) -> u8 {
        self.0
    }

    /// Score on the 0.0..=1.0 scale
    pub fn as_normalized(self) -> f32 {
        f32::from(self.0) / 100.0
    }

    /// Clears `threshold`
    pub fn meets(self, threshold: Score) -> bool {
        self >= threshold
    }
}

impl TryFrom<u8> for Score {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Score> for u8 {
    fn from(score: Score) -> u8 {
        score.0
    }
}

impl fmt::Display for Score {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
