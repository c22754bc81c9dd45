//! Geography identifiers and hierarchy levels.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a region or planning area.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GeographyId(String);

impl GeographyId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GeographyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for GeographyId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for GeographyId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Level of the geographic hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeoLevel {
    /// Top level, modelled with a VAR.
    Region,
    /// Planning area inside a region, modelled with ARIMAX.
    Area,
}

impl GeoLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            GeoLevel::Region => "region",
            GeoLevel::Area => "area",
        }
    }

    pub fn parse(text: &str) -> Option<Self> {
        match text.trim().to_ascii_lowercase().as_str() {
            "region" => Some(GeoLevel::Region),
            "area" => Some(GeoLevel::Area),
            _ => None,
        }
    }
}

impl fmt::Display for GeoLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_parses_case_insensitively() {
        assert_eq!(GeoLevel::parse("Region"), Some(GeoLevel::Region));
        assert_eq!(GeoLevel::parse(" area "), Some(GeoLevel::Area));
        assert_eq!(GeoLevel::parse("district"), None);
        assert_eq!(GeoLevel::Area.to_string(), "area");
    }

    #[test]
    fn ids_order_lexically() {
        let mut ids = vec![GeographyId::from("west"), GeographyId::from("central")];
        ids.sort();
        assert_eq!(ids[0].as_str(), "central");
    }
}
