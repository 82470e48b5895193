//! Metal kinds handled by the refining operation

use serde::{Deserialize, Serialize};

/// Kind of precious metal carried by accounts, quotations, lots and orders
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetalKind {
    Au,
    Ag,
    Rh,
}

impl MetalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetalKind::Au => "au",
            MetalKind::Ag => "ag",
            MetalKind::Rh => "rh",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "au" => Some(MetalKind::Au),
            "ag" => Some(MetalKind::Ag),
            "rh" => Some(MetalKind::Rh),
            _ => None,
        }
    }

    /// Chemical symbol as printed on documents
    pub fn symbol(&self) -> &'static str {
        match self {
            MetalKind::Au => "Au",
            MetalKind::Ag => "Ag",
            MetalKind::Rh => "Rh",
        }
    }
}

impl std::fmt::Display for MetalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetalKind::Au => write!(f, "Gold"),
            MetalKind::Ag => write!(f, "Silver"),
            MetalKind::Rh => write!(f, "Rhodium"),
        }
    }
}
