//! Voltage tiers and overclocking
//!
//! A machine built at a higher tier than its recipe needs runs the recipe
//! faster at a higher energy cost. Each tier above the recipe's own tier is
//! one overclock.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::models::GameTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum VoltageTier {
    LV = 1,
    MV,
    HV,
    EV,
    IV,
    LuV,
    ZPM,
    UV,
    UHV,
    UEV,
    UIV,
    UMV,
    UXV,
    MAX,
}

const ALL_TIERS: [VoltageTier; 14] = [
    VoltageTier::LV,
    VoltageTier::MV,
    VoltageTier::HV,
    VoltageTier::EV,
    VoltageTier::IV,
    VoltageTier::LuV,
    VoltageTier::ZPM,
    VoltageTier::UV,
    VoltageTier::UHV,
    VoltageTier::UEV,
    VoltageTier::UIV,
    VoltageTier::UMV,
    VoltageTier::UXV,
    VoltageTier::MAX,
];

impl VoltageTier {
    /// Tier number, LV = 1.
    pub fn level(self) -> u32 {
        self as u32
    }

    pub fn name(self) -> &'static str {
        match self {
            VoltageTier::LV => "LV",
            VoltageTier::MV => "MV",
            VoltageTier::HV => "HV",
            VoltageTier::EV => "EV",
            VoltageTier::IV => "IV",
            VoltageTier::LuV => "LuV",
            VoltageTier::ZPM => "ZPM",
            VoltageTier::UV => "UV",
            VoltageTier::UHV => "UHV",
            VoltageTier::UEV => "UEV",
            VoltageTier::UIV => "UIV",
            VoltageTier::UMV => "UMV",
            VoltageTier::UXV => "UXV",
            VoltageTier::MAX => "MAX",
        }
    }

    /// Case-insensitive lookup by tier name.
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim();
        ALL_TIERS
            .iter()
            .copied()
            .find(|tier| tier.name().eq_ignore_ascii_case(name))
    }

    /// Highest EU/t a machine of this tier accepts.
    pub fn max_voltage(self) -> f64 {
        32.0 * 4f64.powi(self.level() as i32 - 1)
    }

    /// Lowest tier that can power a recipe drawing `energy_per_tick`.
    ///
    /// Draws above the MAX tier's limit clamp to MAX.
    pub fn for_energy(energy_per_tick: f64) -> Self {
        ALL_TIERS
            .iter()
            .copied()
            .find(|tier| tier.max_voltage() >= energy_per_tick)
            .unwrap_or(VoltageTier::MAX)
    }
}

impl fmt::Display for VoltageTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for VoltageTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s).ok_or_else(|| format!("unknown voltage tier '{s}'"))
    }
}

/// How much faster each overclock makes a recipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OverclockKind {
    /// Half the duration per tier.
    Standard,
    /// Quarter of the duration per tier.
    Perfect,
}

impl OverclockKind {
    pub fn speed_factor(self) -> f64 {
        match self {
            OverclockKind::Standard => 2.0,
            OverclockKind::Perfect => 4.0,
        }
    }
}

const POWER_FACTOR: f64 = 4.0;

#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
#[error("{machine} machine cannot run a {recipe} recipe")]
pub struct TierTooLow {
    pub machine: VoltageTier,
    pub recipe: VoltageTier,
}

/// Recipe duration and draw after overclocking.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Overclocked {
    pub duration: GameTime,
    pub energy_per_tick: f64,
    pub overclocks: u32,
}

/// Overclock a recipe to run on a machine of `machine_tier`.
///
/// Overclocked durations are rounded up to whole ticks and never drop below
/// one tick. A recipe run at its own tier is returned unchanged.
pub fn overclock(
    kind: OverclockKind,
    machine_tier: VoltageTier,
    duration: GameTime,
    energy_per_tick: f64,
) -> Result<Overclocked, TierTooLow> {
    let recipe_tier = VoltageTier::for_energy(energy_per_tick);
    if machine_tier < recipe_tier {
        return Err(TierTooLow {
            machine: machine_tier,
            recipe: recipe_tier,
        });
    }

    let overclocks = machine_tier.level() - recipe_tier.level();
    let speedup = kind.speed_factor().powi(overclocks as i32);
    let ticks = duration.as_ticks();
    let ticks = if overclocks == 0 {
        ticks
    } else {
        (ticks as f64 / speedup).ceil().max(1.0) as u64
    };

    Ok(Overclocked {
        duration: GameTime::from_ticks(ticks),
        energy_per_tick: energy_per_tick * POWER_FACTOR.powi(overclocks as i32),
        overclocks,
    })
}
