//! Market sectors as reported by fundamentals providers.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sector {
    Technology,
    Financials,
    Healthcare,
    ConsumerCyclical,
    ConsumerDefensive,
    Industrials,
    Energy,
    Utilities,
    Materials,
    RealEstate,
    Communication,
    Unknown,
}

impl Sector {
    /// Maps a provider sector label onto a `Sector`.
    ///
    /// Labels differ between vendors ("Financial Services" vs "Financials"),
    /// so matching is loose. Anything unrecognised is `Unknown`.
    pub fn from_label(label: &str) -> Self {
        let l = label.trim().to_ascii_lowercase();
        match l.as_str() {
            "technology" | "information technology" | "tech" => Self::Technology,
            "financial services" | "financials" | "financial" => Self::Financials,
            "healthcare" | "health care" => Self::Healthcare,
            "consumer cyclical" | "consumer discretionary" => Self::ConsumerCyclical,
            "consumer defensive" | "consumer staples" => Self::ConsumerDefensive,
            "industrials" => Self::Industrials,
            "energy" => Self::Energy,
            "utilities" => Self::Utilities,
            "basic materials" | "materials" => Self::Materials,
            "real estate" => Self::RealEstate,
            "communication services" | "communication" => Self::Communication,
            _ => Self::Unknown,
        }
    }
}

impl std::fmt::Display for Sector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Technology => "Technology",
            Self::Financials => "Financials",
            Self::Healthcare => "Healthcare",
            Self::ConsumerCyclical => "Consumer Cyclical",
            Self::ConsumerDefensive => "Consumer Defensive",
            Self::Industrials => "Industrials",
            Self::Energy => "Energy",
            Self::Utilities => "Utilities",
            Self::Materials => "Materials",
            Self::RealEstate => "Real Estate",
            Self::Communication => "Communication",
            Self::Unknown => "Unknown",
        };
        f.write_str(name)
    }
}
