use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Device category. Each class lives in its own counter table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadClass {
    Light,
    Medium,
    Heavy,
    Universal,
}

impl LoadClass {
    pub const ALL: [LoadClass; 4] = [Self::Light, Self::Medium, Self::Heavy, Self::Universal];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Light => "light",
            Self::Medium => "medium",
            Self::Heavy => "heavy",
            Self::Universal => "universal",
        }
    }

    /// Counter table holding this class' rows.
    pub fn table(self) -> &'static str {
        match self {
            Self::Light => "light_loads",
            Self::Medium => "medium_loads",
            Self::Heavy => "heavy_loads",
            Self::Universal => "universal_loads",
        }
    }
}

impl fmt::Display for LoadClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LoadClass {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LoadClass::ALL
            .into_iter()
            .find(|class| class.as_str() == s)
            .ok_or_else(|| Error::UnknownLoadClass(s.to_string()))
    }
}
