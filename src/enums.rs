use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Key used to order the slices of a series.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum SortBy {
    /// Position along the through-plane axis.
    #[default]
    ImagePositionPatient,
    InstanceNumber,
}

/// Acquisition phase of a case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "UPPERCASE")]
pub enum Phase {
    #[value(name = "PRE", alias = "pre")]
    Pre,
    #[value(name = "POST", alias = "post")]
    Post,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Pre => write!(f, "PRE"),
            Phase::Post => write!(f, "POST"),
        }
    }
}

/// Per spatial axis flags, indexed `x`, `y`, `z` (`i`, `j`, `k`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AxisFlips(pub [bool; 3]);

impl AxisFlips {
    pub const NONE: AxisFlips = AxisFlips([false; 3]);

    pub fn is_flipped(&self, axis: usize) -> bool {
        self.0[axis]
    }

    /// Axes where `self` and `other` disagree.
    pub fn difference(&self, other: &AxisFlips) -> AxisFlips {
        AxisFlips([
            self.0[0] != other.0[0],
            self.0[1] != other.0[1],
            self.0[2] != other.0[2],
        ])
    }
}

impl fmt::Display for AxisFlips {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = ["x", "y", "z"]
            .iter()
            .zip(self.0.iter())
            .filter(|(_, flipped)| **flipped)
            .map(|(name, _)| *name)
            .collect();
        if names.is_empty() {
            write!(f, "none")
        } else {
            write!(f, "{}", names.join(","))
        }
    }
}

impl FromStr for AxisFlips {
    type Err = String;

    /// Parses a comma separated axis list such as `x,z` or `0,2`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut flips = [false; 3];
        for token in s.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            let axis = match token.to_ascii_lowercase().as_str() {
                "x" | "0" => 0,
                "y" | "1" => 1,
                "z" | "2" => 2,
                other => return Err(format!("unknown axis '{other}'")),
            };
            flips[axis] = true;
        }
        Ok(AxisFlips(flips))
    }
}

/// How the axis reconciler decides which axes to reverse.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FlipPolicy {
    /// Flip every axis whose diagonal direction cosine is negative.
    #[default]
    DirectionCosines,
    /// Legacy mode: flip a fixed set of axes whatever the direction says.
    Forced { axes: AxisFlips },
}
