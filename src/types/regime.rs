use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::BarIndex;

/// Semantic label attached to a trained HMM state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegimeLabel {
    BullHighVol,
    BullLowVol,
    BearHighVol,
    BearLowVol,
}

impl RegimeLabel {
    pub const ALL: [RegimeLabel; 4] = [
        RegimeLabel::BullHighVol,
        RegimeLabel::BullLowVol,
        RegimeLabel::BearHighVol,
        RegimeLabel::BearLowVol,
    ];

    pub fn index(&self) -> usize {
        match self {
            RegimeLabel::BullHighVol => 0,
            RegimeLabel::BullLowVol => 1,
            RegimeLabel::BearHighVol => 2,
            RegimeLabel::BearLowVol => 3,
        }
    }

    pub fn direction(&self) -> Direction {
        match self {
            RegimeLabel::BullHighVol | RegimeLabel::BullLowVol => Direction::Bull,
            RegimeLabel::BearHighVol | RegimeLabel::BearLowVol => Direction::Bear,
        }
    }

    pub fn volatility(&self) -> Volatility {
        match self {
            RegimeLabel::BullHighVol | RegimeLabel::BearHighVol => Volatility::High,
            RegimeLabel::BullLowVol | RegimeLabel::BearLowVol => Volatility::Low,
        }
    }

    /// Display label; both low-vol states collapse to range-bound.
    pub fn display(&self) -> DayLabel {
        match self {
            RegimeLabel::BullHighVol => DayLabel::BullHighVol,
            RegimeLabel::BearHighVol => DayLabel::BearHighVol,
            RegimeLabel::BullLowVol | RegimeLabel::BearLowVol => DayLabel::RangeBound,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Bull,
    Bear,
}

impl Direction {
    /// Sign of a return; zero and non-finite values have no direction.
    pub fn from_sign(value: f64) -> Option<Self> {
        if value > 0.0 {
            Some(Direction::Bull)
        } else if value < 0.0 {
            Some(Direction::Bear)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Volatility {
    High,
    Low,
}

/// One of the three labels shown on the chart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DayLabel {
    BullHighVol,
    RangeBound,
    BearHighVol,
}

impl DayLabel {
    pub const ALL: [DayLabel; 3] = [DayLabel::BullHighVol, DayLabel::RangeBound, DayLabel::BearHighVol];

    pub fn index(&self) -> usize {
        match self {
            DayLabel::BullHighVol => 0,
            DayLabel::RangeBound => 1,
            DayLabel::BearHighVol => 2,
        }
    }

    pub fn trend(direction: Direction) -> Self {
        match direction {
            Direction::Bull => DayLabel::BullHighVol,
            Direction::Bear => DayLabel::BearHighVol,
        }
    }

    pub fn is_trend(&self) -> bool {
        !matches!(self, DayLabel::RangeBound)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DayLabel::BullHighVol => "bull-high-vol",
            DayLabel::RangeBound => "range-bound",
            DayLabel::BearHighVol => "bear-high-vol",
        }
    }
}

impl fmt::Display for DayLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Maximal run of identical day labels, both ends inclusive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub label: DayLabel,
    pub start: BarIndex,
    pub end: BarIndex,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

impl Segment {
    pub fn len(&self) -> usize {
        self.end.get() - self.start.get() + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }
}
