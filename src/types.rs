// =============================================================================
// Shared types used across the SMC Sentinel engine
// =============================================================================

use serde::{Deserialize, Serialize};

/// Trade direction for a setup, trigger, or open signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    pub fn opposite(self) -> Self {
        match self {
            Self::Long => Self::Short,
            Self::Short => Self::Long,
        }
    }

    /// Stable wire string used in the DB and reason codes.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Long => "LONG",
            Self::Short => "SHORT",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "LONG" => Some(Self::Long),
            "SHORT" => Some(Self::Short),
            _ => None,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Directional judgment of the higher-timeframe narrative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Bias {
    Long,
    Short,
    Neutral,
}

impl Bias {
    pub fn direction(self) -> Option<Direction> {
        match self {
            Self::Long => Some(Direction::Long),
            Self::Short => Some(Direction::Short),
            Self::Neutral => None,
        }
    }
}

impl std::fmt::Display for Bias {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Long => write!(f, "LONG"),
            Self::Short => write!(f, "SHORT"),
            Self::Neutral => write!(f, "NEUTRAL"),
        }
    }
}

/// Quality of the structural read behind a narrative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StructureQuality {
    Strong,
    Weak,
    Neutral,
}

impl std::fmt::Display for StructureQuality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Strong => write!(f, "STRONG"),
            Self::Weak => write!(f, "WEAK"),
            Self::Neutral => write!(f, "NEUTRAL"),
        }
    }
}

/// Persisted lifecycle state of a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalStatus {
    Active,
    Won,
    Lost,
    Cancelled,
}

impl SignalStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Won => "WON",
            Self::Lost => "LOST",
            Self::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ACTIVE" => Some(Self::Active),
            "WON" => Some(Self::Won),
            "LOST" => Some(Self::Lost),
            "CANCELLED" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Terminal states never transition again.
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Active)
    }
}

impl std::fmt::Display for SignalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a watchlist entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WatchStatus {
    Watching,
    Promoted,
    Expired,
}

impl WatchStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Watching => "WATCHING",
            Self::Promoted => "PROMOTED",
            Self::Expired => "EXPIRED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "WATCHING" => Some(Self::Watching),
            "PROMOTED" => Some(Self::Promoted),
            "EXPIRED" => Some(Self::Expired),
            _ => None,
        }
    }
}

impl std::fmt::Display for WatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The instantaneous observation that validated a POI for market entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerType {
    SweepRejection,
    Mss,
    Displacement,
}

impl TriggerType {
    /// Stable component tag consumed by the optimiser's performance queries.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SweepRejection => "SWEEP_REJECTION",
            Self::Mss => "MSS",
            Self::Displacement => "DISPLACEMENT",
        }
    }
}

impl std::fmt::Display for TriggerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Setup grade attached to a fired trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerQuality {
    APlus,
    A,
    B,
    C,
    /// 5m-confirmation variant fired from the watchlist re-check path.
    Sniper,
}

impl TriggerQuality {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::APlus => "A+",
            Self::A => "A",
            Self::B => "B",
            Self::C => "C",
            Self::Sniper => "SNIPER",
        }
    }
}

impl std::fmt::Display for TriggerQuality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_roundtrip() {
        assert_eq!(Direction::parse("LONG"), Some(Direction::Long));
        assert_eq!(Direction::parse("SHORT"), Some(Direction::Short));
        assert_eq!(Direction::parse("SIDEWAYS"), None);
        assert_eq!(Direction::Long.opposite(), Direction::Short);
    }

    #[test]
    fn status_terminality() {
        assert!(!SignalStatus::Active.is_terminal());
        assert!(SignalStatus::Won.is_terminal());
        assert!(SignalStatus::Lost.is_terminal());
        assert!(SignalStatus::Cancelled.is_terminal());
        for s in ["ACTIVE", "WON", "LOST", "CANCELLED"] {
            assert_eq!(SignalStatus::parse(s).unwrap().as_str(), s);
        }
    }

    #[test]
    fn bias_to_direction() {
        assert_eq!(Bias::Long.direction(), Some(Direction::Long));
        assert_eq!(Bias::Neutral.direction(), None);
    }
}
