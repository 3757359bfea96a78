//! Data models for recipes and production targets

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Game ticks in one second of game time.
pub const TICKS_PER_SECOND: f64 = 20.0;

/// Length of one recipe cycle, stored in seconds.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct GameTime {
    seconds: f64,
}

impl GameTime {
    pub fn from_ticks(ticks: u64) -> Self {
        Self {
            seconds: ticks as f64 / TICKS_PER_SECOND,
        }
    }

    pub fn from_seconds(seconds: f64) -> Self {
        Self { seconds }
    }

    pub fn as_seconds(self) -> f64 {
        self.seconds
    }

    /// Whole ticks, rounded up. A partial tick still occupies the machine.
    pub fn as_ticks(self) -> u64 {
        let ticks = self.seconds * TICKS_PER_SECOND;
        let nearest = ticks.round();
        let ticks = if (ticks - nearest).abs() < 1e-9 { nearest } else { ticks.ceil() };
        ticks.max(0.0) as u64
    }
}

impl fmt::Display for GameTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}s ({} ticks)", self.seconds, self.as_ticks())
    }
}

/// A normalized recipe: one machine cycle turning inputs into outputs.
///
/// Quantities are per cycle. A recipe with no inputs is an infinite source
/// (ore drills, fluid pumps) whose material comes from outside the factory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipeDef {
    pub name: String,
    pub inputs: BTreeMap<String, f64>,
    pub outputs: BTreeMap<String, f64>,
    pub duration: GameTime,
    /// EU drawn per tick by one machine running this recipe.
    pub energy_per_tick: f64,
}

impl RecipeDef {
    pub fn new(name: impl Into<String>, duration: GameTime, energy_per_tick: f64) -> Self {
        Self {
            name: name.into(),
            inputs: BTreeMap::new(),
            outputs: BTreeMap::new(),
            duration,
            energy_per_tick,
        }
    }

    pub fn input(mut self, item: impl Into<String>, quantity: f64) -> Self {
        self.inputs.insert(item.into(), quantity);
        self
    }

    pub fn output(mut self, item: impl Into<String>, quantity: f64) -> Self {
        self.outputs.insert(item.into(), quantity);
        self
    }

    pub fn is_infinite_source(&self) -> bool {
        self.inputs.is_empty()
    }

    /// Items per second moved by one machine for a per-cycle quantity.
    pub fn rate_per_second(&self, quantity: f64) -> f64 {
        quantity / self.duration.as_seconds()
    }
}

/// Desired steady-state output, item name to items per second.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TargetSpec {
    rates: BTreeMap<String, f64>,
}

impl TargetSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(item: impl Into<String>, rate: f64) -> Self {
        Self::new().with(item, rate)
    }

    pub fn with(mut self, item: impl Into<String>, rate: f64) -> Self {
        self.insert(item, rate);
        self
    }

    pub fn insert(&mut self, item: impl Into<String>, rate: f64) {
        self.rates.insert(item.into(), rate);
    }

    pub fn rate(&self, item: &str) -> Option<f64> {
        self.rates.get(item).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.rates.iter().map(|(item, rate)| (item.as_str(), *rate))
    }

    pub fn len(&self) -> usize {
        self.rates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rates.is_empty()
    }

    /// Same targets with every rate multiplied by `factor`.
    pub fn scaled(&self, factor: f64) -> Self {
        Self {
            rates: self
                .rates
                .iter()
                .map(|(item, rate)| (item.clone(), rate * factor))
                .collect(),
        }
    }
}

impl FromIterator<(String, f64)> for TargetSpec {
    fn from_iter<I: IntoIterator<Item = (String, f64)>>(iter: I) -> Self {
        Self {
            rates: iter.into_iter().collect(),
        }
    }
}
