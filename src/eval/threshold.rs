use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::EvalError;

pub const GRID_STEPS: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Threshold(u32);

impl Threshold {
    #[cfg(test)]
    pub const fn from_hundredths(hundredths: u32) -> Self {
        Self(hundredths)
    }

    pub fn from_value(value: f64) -> Result<Self, EvalError> {
        if !value.is_finite() || value < 0.0 {
            return Err(EvalError::aggregation(format!(
                "threshold {value} is not a non-negative finite number"
            )));
        }
        Ok(Self((value * 100.0).round() as u32))
    }

    #[cfg(test)]
    pub fn hundredths(self) -> u32 {
        self.0
    }

    pub fn value(self) -> f64 {
        f64::from(self.0) / 100.0
    }

    pub fn grid() -> [Threshold; (GRID_STEPS + 1) as usize] {
        std::array::from_fn(|step| Threshold(step as u32 * (100 / GRID_STEPS)))
    }

    pub fn is_on_grid(self) -> bool {
        self.0 <= 100 && self.0 % (100 / GRID_STEPS) == 0
    }
}

impl fmt::Display for Threshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

impl FromStr for Threshold {
    type Err = EvalError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let value = raw
            .trim()
            .parse::<f64>()
            .map_err(|err| EvalError::aggregation(format!("invalid threshold '{raw}': {err}")))?;
        Self::from_value(value)
    }
}

impl Serialize for Threshold {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Threshold {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_has_eleven_evenly_spaced_points() {
        let grid = Threshold::grid();
        assert_eq!(grid.len(), 11);
        assert_eq!(grid[0].value(), 0.0);
        assert_eq!(grid[5].to_string(), "0.50");
        assert_eq!(grid[10].value(), 1.0);
        assert!(grid.iter().all(|threshold| threshold.is_on_grid()));
    }

    #[test]
    fn float_accumulation_noise_rounds_onto_the_grid() {
        let accumulated = (0..3).fold(0.0_f64, |acc, _| acc + 0.1);
        assert_ne!(accumulated, 0.3);
        let threshold = Threshold::from_value(accumulated).expect("valid");
        assert_eq!(threshold, Threshold::grid()[3]);
    }

    #[test]
    fn parse_accepts_short_and_long_forms() {
        let short: Threshold = "0.5".parse().expect("short form");
        let long: Threshold = "0.50".parse().expect("long form");
        assert_eq!(short, long);
        assert!("-0.1".parse::<Threshold>().is_err());
        assert!("abc".parse::<Threshold>().is_err());
        assert!(!"0.55".parse::<Threshold>().expect("valid").is_on_grid());
    }
}
