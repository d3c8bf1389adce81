use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;

/// Upper bound of the source rating scale (Plex stores 0-10, five stars).
pub const MAX_RATING: f64 = 10.0;

/// Three-way label derived from a rating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Classification {
    Loved,
    Hated,
    Neutral,
}

impl Classification {
    /// The ledger-representable part of this classification.
    pub fn mark(self) -> Option<Mark> {
        match self {
            Self::Loved => Some(Mark::Loved),
            Self::Hated => Some(Mark::Hated),
            Self::Neutral => None,
        }
    }
}

/// A classification the relay can apply to a destination and keep in the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mark {
    Loved,
    Hated,
}

impl Mark {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Loved => "loved",
            Self::Hated => "hated",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "loved" => Some(Self::Loved),
            "hated" => Some(Self::Hated),
            _ => None,
        }
    }
}

impl fmt::Display for Mark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<Mark> for Classification {
    fn from(mark: Mark) -> Self {
        match mark {
            Mark::Loved => Self::Loved,
            Mark::Hated => Self::Hated,
        }
    }
}

/// Set of marks a destination accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
    pub loved: bool,
    pub hated: bool,
}

impl Capabilities {
    pub const LOVED_ONLY: Self = Self { loved: true, hated: false };
    pub const LOVED_AND_HATED: Self = Self { loved: true, hated: true };

    pub fn supports(&self, mark: Mark) -> bool {
        match mark {
            Mark::Loved => self.loved,
            Mark::Hated => self.hated,
        }
    }

    /// What a destination with these capabilities should hold for `desired`.
    /// Unsupported marks collapse to Neutral.
    pub fn gate(&self, desired: Classification) -> Classification {
        match desired.mark() {
            Some(mark) if !self.supports(mark) => Classification::Neutral,
            _ => desired,
        }
    }
}

/// Validated love/hate thresholds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    love: f64,
    hate: Option<f64>,
}

impl Thresholds {
    pub fn new(love: f64, hate: Option<f64>) -> Result<Self, ConfigError> {
        check_range("love_threshold", love)?;
        if let Some(hate) = hate {
            check_range("hate_threshold", hate)?;
            if hate >= love {
                return Err(ConfigError::InvertedThresholds { love, hate });
            }
        }
        Ok(Self { love, hate })
    }

    pub fn love(&self) -> f64 {
        self.love
    }

    pub fn hate(&self) -> Option<f64> {
        self.hate
    }

    pub fn classify(&self, rating: Option<f64>) -> Classification {
        classify(rating, self.love, self.hate)
    }
}

fn check_range(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 && value <= MAX_RATING {
        Ok(())
    } else {
        Err(ConfigError::ThresholdOutOfRange { name, value })
    }
}

/// Classify a rating. Hate is checked first and only matches explicit
/// ratings above zero, so an unrated track can never be Hated.
pub fn classify(rating: Option<f64>, love_threshold: f64, hate_threshold: Option<f64>) -> Classification {
    let Some(rating) = rating else {
        return Classification::Neutral;
    };
    if let Some(hate) = hate_threshold {
        if rating > 0.0 && rating <= hate {
            return Classification::Hated;
        }
    }
    if rating >= love_threshold {
        Classification::Loved
    } else {
        Classification::Neutral
    }
}
