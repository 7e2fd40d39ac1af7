use std::fmt;

use serde::{Deserialize, Serialize};

use crate::game::DEFAULT_START_YEAR;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Season {
    Spring,
    Summer,
    Autumn,
    Winter,
}

impl Season {
    pub fn next(self) -> Self {
        match self {
            Season::Spring => Season::Summer,
            Season::Summer => Season::Autumn,
            Season::Autumn => Season::Winter,
            Season::Winter => Season::Spring,
        }
    }

    pub fn index(self) -> u8 {
        match self {
            Season::Spring => 0,
            Season::Summer => 1,
            Season::Autumn => 2,
            Season::Winter => 3,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Season::Spring => "Spring",
            Season::Summer => "Summer",
            Season::Autumn => "Autumn",
            Season::Winter => "Winter",
        }
    }
}

/// Year (ab urbe condita) and season of a round. One round is one season.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundCalendar {
    pub year: u16,
    pub season: Season,
}

impl RoundCalendar {
    pub fn new(year: u16, season: Season) -> Self {
        Self { year, season }
    }

    pub fn from_start(year: u16) -> Self {
        Self::new(year, Season::Spring)
    }

    pub fn advance(&mut self) {
        if self.season == Season::Winter {
            self.year = self.year.saturating_add(1);
        }
        self.season = self.season.next();
    }
}

impl Default for RoundCalendar {
    fn default() -> Self {
        Self::from_start(DEFAULT_START_YEAR)
    }
}

impl fmt::Display for RoundCalendar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} AUC", self.season.label(), self.year)
    }
}
