//! Fixed window lengths.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Unit a window length is expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowUnit {
    /// Seconds
    Second,
    /// Minutes
    Minute,
    /// Hours
    Hour,
    /// Days
    Day,
}

impl WindowUnit {
    /// Number of seconds in one unit.
    pub fn seconds(&self) -> u64 {
        match self {
            WindowUnit::Second => 1,
            WindowUnit::Minute => 60,
            WindowUnit::Hour => 3600,
            WindowUnit::Day => 86400,
        }
    }

    /// Get the duration of one unit.
    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.seconds())
    }
}

/// A window length with an explicit unit, e.g. `length: 5, unit: minute`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    /// How many units the window spans
    #[serde(default = "default_length")]
    pub length: u64,
    /// The unit of `length`
    #[serde(default = "default_unit")]
    pub unit: WindowUnit,
}

impl Window {
    /// Create a window of `length` units.
    pub fn new(length: u64, unit: WindowUnit) -> Self {
        Self { length, unit }
    }

    /// Total duration of the window, saturating on overflow.
    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.unit.seconds().saturating_mul(self.length))
    }
}

impl Default for Window {
    fn default() -> Self {
        Self {
            length: default_length(),
            unit: default_unit(),
        }
    }
}

impl From<Window> for Duration {
    fn from(window: Window) -> Self {
        window.duration()
    }
}

fn default_length() -> u64 {
    1
}

fn default_unit() -> WindowUnit {
    WindowUnit::Minute
}
