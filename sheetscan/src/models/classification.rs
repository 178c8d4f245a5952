use serde::{Deserialize, Serialize};

/// Drawing category assigned by the extraction service
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum Classification {
    Plan,
    Elevation,
    Section,
    Detail,
    Notes,
    Schedule,
    #[default]
    Unknown,
}

impl Classification {
    pub const ALL: [Classification; 7] = [
        Self::Plan,
        Self::Elevation,
        Self::Section,
        Self::Detail,
        Self::Notes,
        Self::Schedule,
        Self::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Plan => "Plan",
            Self::Elevation => "Elevation",
            Self::Section => "Section",
            Self::Detail => "Detail",
            Self::Notes => "Notes",
            Self::Schedule => "Schedule",
            Self::Unknown => "Unknown",
        }
    }

    /// Lenient mapping of whatever label the service returned.
    ///
    /// Case and surrounding whitespace are ignored and simple plurals are
    /// accepted ("Sections", "details"); anything else is `Unknown`.
    pub fn from_label(label: &str) -> Self {
        let normalized = label.trim().to_lowercase();
        let singular = normalized
            .strip_suffix('s')
            .filter(|stem| *stem != "note")
            .unwrap_or(normalized.as_str());

        match singular {
            "plan" => Self::Plan,
            "elevation" => Self::Elevation,
            "section" => Self::Section,
            "detail" => Self::Detail,
            "notes" | "note" => Self::Notes,
            "schedule" => Self::Schedule,
            _ => Self::Unknown,
        }
    }
}

impl std::fmt::Display for Classification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Classification {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s.trim()))
            .copied()
            .ok_or_else(|| format!("Unknown classification: {s}"))
    }
}
