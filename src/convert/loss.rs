// src/convert/loss.rs
//! Loss classification for IR extraction and native emission
//!
//! Every plugin step reports how much of the source survived. The levels
//! are ordered, and a chain of steps is as lossy as its worst step.

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// How much information a conversion step lost
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LossClass {
    /// Lossless
    #[default]
    L0,
    /// Presentation only (whitespace, attribute order)
    L1,
    /// Markup the target cannot express was dropped
    L2,
    /// Content was dropped or only inventoried
    L3,
}

impl LossClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::L0 => "L0",
            Self::L1 => "L1",
            Self::L2 => "L2",
            Self::L3 => "L3",
        }
    }

    /// Loss of two steps applied in sequence
    #[inline]
    pub fn combine(self, other: Self) -> Self {
        self.max(other)
    }

    /// Parse a plugin-reported value; empty and missing mean lossless
    pub fn parse_reported(value: Option<&str>) -> Result<Self, String> {
        value.unwrap_or_default().parse()
    }

    pub fn is_lossless(&self) -> bool {
        *self == Self::L0
    }
}

impl std::fmt::Display for LossClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LossClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "" | "L0" => Ok(Self::L0),
            "L1" => Ok(Self::L1),
            "L2" => Ok(Self::L2),
            "L3" => Ok(Self::L3),
            _ => Err(format!("Unknown loss class: {}", s)),
        }
    }
}

impl Serialize for LossClass {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for LossClass {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Option::<String>::deserialize(deserializer)?;
        Self::parse_reported(value.as_deref()).map_err(serde::de::Error::custom)
    }
}

/// Combined loss of any number of steps
pub fn combine_all<I: IntoIterator<Item = LossClass>>(steps: I) -> LossClass {
    steps.into_iter().fold(LossClass::L0, LossClass::combine)
}
