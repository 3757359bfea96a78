//! Factory config files
//!
//! A factory file lists machine recipes the way they appear in game (machine
//! name, voltage tier, per-cycle quantities, duration in ticks, EU/t) and the
//! target rates. Loading normalizes names and applies overclocking so the
//! balancer only ever sees per-second [`RecipeDef`]s.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::electricity::{self, OverclockKind, TierTooLow, VoltageTier};
use crate::models::{GameTime, RecipeDef, TargetSpec};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid JSON factory file: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid YAML factory file: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("unsupported factory file extension '{0}' (expected json, yaml or yml)")]
    UnsupportedFormat(String),

    #[error("recipe {index} ({machine}): unknown voltage tier '{tier}'")]
    UnknownTier { index: usize, machine: String, tier: String },

    #[error("recipe {index} ({machine}): {source}")]
    TierTooLow {
        index: usize,
        machine: String,
        #[source]
        source: TierTooLow,
    },

    #[error("recipe {index} ({machine}): duration must be at least one tick")]
    ZeroDuration { index: usize, machine: String },

    #[error("invalid name pattern: {0}")]
    Pattern(#[from] regex::Error),
}

/// One recipe as written in a factory file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputRecipe {
    /// Machine name; common abbreviations are expanded.
    pub m: String,
    /// Voltage tier of the machine running the recipe.
    pub tier: String,
    #[serde(default)]
    pub inputs: BTreeMap<String, f64>,
    #[serde(default)]
    pub outputs: BTreeMap<String, f64>,
    /// Duration in ticks.
    pub dur: u64,
    /// EU per tick at the recipe's own tier.
    #[serde(default)]
    pub eut: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputFactoryConfig {
    pub recipes: Vec<InputRecipe>,
    #[serde(default)]
    pub targets: BTreeMap<String, f64>,
}

/// Recipes and targets ready to balance.
#[derive(Debug, Clone, PartialEq)]
pub struct FactoryConfig {
    pub recipes: Vec<RecipeDef>,
    pub targets: TargetSpec,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Json,
    Yaml,
}

impl ConfigFormat {
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_ascii_lowercase();
        match ext.as_str() {
            "json" => Ok(ConfigFormat::Json),
            "yaml" | "yml" => Ok(ConfigFormat::Yaml),
            _ => Err(ConfigError::UnsupportedFormat(ext)),
        }
    }
}

const MACHINE_ALIASES: &[(&str, &[&str])] = &[
    ("Electric Blast Furnace", &["electric blast furnace", "ebf"]),
    ("Large Chemical Reactor", &["large chemical reactor", "lcr"]),
];

/// Machines that overclock perfectly (4x speed per tier).
const PERFECT_OVERCLOCK: &[&str] = &["Large Chemical Reactor"];

/// Canonical machine and item names.
pub struct NameNormalizer {
    whitespace: Regex,
}

impl NameNormalizer {
    pub fn new() -> Result<Self, ConfigError> {
        Ok(Self {
            whitespace: Regex::new(r"\s+")?,
        })
    }

    /// Expand known abbreviations, case-insensitively. Unknown names pass
    /// through untouched.
    pub fn machine(&self, name: &str) -> String {
        let key = self.whitespace.replace_all(name.trim(), " ").to_lowercase();
        MACHINE_ALIASES
            .iter()
            .find(|(_, aliases)| aliases.contains(&key.as_str()))
            .map(|(canonical, _)| canonical.to_string())
            .unwrap_or_else(|| name.to_string())
    }

    /// Item names use underscores in place of whitespace.
    pub fn item(&self, name: &str) -> String {
        self.whitespace.replace_all(name.trim(), "_").into_owned()
    }

    /// Normalize every item name, adding up quantities whose names collide.
    pub fn items(&self, quantities: &BTreeMap<String, f64>) -> BTreeMap<String, f64> {
        let mut merged = BTreeMap::new();
        for (item, quantity) in quantities {
            *merged.entry(self.item(item)).or_insert(0.0) += *quantity;
        }
        merged
    }
}

pub fn overclock_kind(machine: &str) -> OverclockKind {
    if PERFECT_OVERCLOCK.contains(&machine) {
        OverclockKind::Perfect
    } else {
        OverclockKind::Standard
    }
}

impl InputFactoryConfig {
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn parse(text: &str, format: ConfigFormat) -> Result<Self, ConfigError> {
        match format {
            ConfigFormat::Json => Self::from_json(text),
            ConfigFormat::Yaml => Self::from_yaml(text),
        }
    }

    /// Normalize names and overclock every recipe to its machine's tier.
    pub fn resolve(&self) -> Result<FactoryConfig, ConfigError> {
        let names = NameNormalizer::new()?;
        let mut recipes = Vec::with_capacity(self.recipes.len());

        for (index, raw) in self.recipes.iter().enumerate() {
            let machine = names.machine(&raw.m);
            let tier = VoltageTier::from_name(&raw.tier).ok_or_else(|| ConfigError::UnknownTier {
                index,
                machine: machine.clone(),
                tier: raw.tier.clone(),
            })?;

            if raw.dur == 0 {
                return Err(ConfigError::ZeroDuration { index, machine });
            }

            let kind = overclock_kind(&machine);
            let oc = electricity::overclock(kind, tier, GameTime::from_ticks(raw.dur), raw.eut).map_err(|source| {
                ConfigError::TierTooLow {
                    index,
                    machine: machine.clone(),
                    source,
                }
            })?;
            debug!(
                machine = %machine,
                %tier,
                overclocks = oc.overclocks,
                ticks = oc.duration.as_ticks(),
                eut = oc.energy_per_tick,
                "recipe loaded"
            );

            let mut recipe = RecipeDef::new(machine, oc.duration, oc.energy_per_tick);
            recipe.inputs = names.items(&raw.inputs);
            recipe.outputs = names.items(&raw.outputs);
            recipes.push(recipe);
        }

        let targets = names.items(&self.targets).into_iter().collect();

        Ok(FactoryConfig { recipes, targets })
    }
}

/// Read a factory file, picking the parser from its extension.
pub fn load_factory_config(path: &Path) -> Result<FactoryConfig, ConfigError> {
    let format = ConfigFormat::from_path(path)?;
    let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let config = InputFactoryConfig::parse(&text, format)?.resolve()?;
    debug!(
        path = %path.display(),
        recipes = config.recipes.len(),
        targets = config.targets.len(),
        "factory config loaded"
    );
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const YAML: &str = r#"
recipes:
  - m: electrolyzer
    tier: LV
    inputs: { water: 1000 }
    outputs: { hydrogen: 2000, oxygen: 1000 }
    dur: 40
    eut: 30
  - m: LCR
    tier: mv
    inputs: { hydrogen: 2000, "sulfur dust": 1 }
    outputs: { "hydrogen  sulfide": 1000 }
    dur: 60
    eut: 8
targets:
  hydrogen sulfide: 1000
"#;

    #[test]
    fn machine_aliases_expand() {
        let names = NameNormalizer::new().unwrap();
        assert_eq!(names.machine("ebf"), "Electric Blast Furnace");
        assert_eq!(names.machine("EBF"), "Electric Blast Furnace");
        assert_eq!(names.machine("Large  Chemical Reactor"), "Large Chemical Reactor");
        assert_eq!(names.machine("Centrifuge"), "Centrifuge");
    }

    #[test]
    fn item_whitespace_becomes_underscores() {
        let names = NameNormalizer::new().unwrap();
        assert_eq!(names.item(" sulfur  dust "), "sulfur_dust");
        assert_eq!(names.item("water"), "water");
    }

    #[test]
    fn yaml_resolves_with_overclocks() {
        let config = InputFactoryConfig::from_yaml(YAML).unwrap().resolve().unwrap();
        assert_eq!(config.recipes.len(), 2);

        let electrolyzer = &config.recipes[0];
        assert_eq!(electrolyzer.name, "electrolyzer");
        assert_eq!(electrolyzer.duration.as_ticks(), 40);
        assert_eq!(electrolyzer.energy_per_tick, 30.0);

        // LV recipe on an MV reactor: one perfect overclock.
        let reactor = &config.recipes[1];
        assert_eq!(reactor.name, "Large Chemical Reactor");
        assert_eq!(reactor.duration.as_ticks(), 15);
        assert_eq!(reactor.energy_per_tick, 32.0);
        assert_eq!(reactor.inputs.get("sulfur_dust"), Some(&1.0));
        assert_eq!(reactor.outputs.get("hydrogen_sulfide"), Some(&1000.0));

        assert_eq!(config.targets.rate("hydrogen_sulfide"), Some(1000.0));
    }

    #[test]
    fn json_matches_yaml() {
        let json = r#"{
            "recipes": [{"m": "pump", "tier": "LV", "outputs": {"water": 1000}, "dur": 20, "eut": 0}],
            "targets": {"water": 500}
        }"#;
        let config = InputFactoryConfig::from_json(json).unwrap().resolve().unwrap();
        assert!(config.recipes[0].is_infinite_source());
        assert_eq!(config.targets.rate("water"), Some(500.0));
    }

    #[test]
    fn colliding_item_names_are_added_up() {
        let yaml = r#"
recipes:
  - m: macerator
    tier: LV
    inputs: { "sulfur ore": 1, sulfur_ore: 2 }
    outputs: { "sulfur dust": 2 }
    dur: 20
    eut: 2
targets:
  sulfur dust: 1
  sulfur_dust: 0.5
"#;
        let config = InputFactoryConfig::from_yaml(yaml).unwrap().resolve().unwrap();
        assert_eq!(config.recipes[0].inputs.len(), 1);
        assert_eq!(config.recipes[0].inputs.get("sulfur_ore"), Some(&3.0));
        assert_eq!(config.targets.rate("sulfur_dust"), Some(1.5));
    }

    #[test]
    fn zero_duration_is_rejected() {
        let yaml = "recipes:\n  - {m: pump, tier: HV, outputs: {water: 1}, dur: 0, eut: 0}\n";
        let err = InputFactoryConfig::from_yaml(yaml).unwrap().resolve().unwrap_err();
        assert!(matches!(err, ConfigError::ZeroDuration { index: 0, ref machine } if machine == "pump"));
    }

    #[test]
    fn unknown_tier_is_reported() {
        let yaml = "recipes:\n  - {m: ebf, tier: XV, dur: 20, eut: 120}\n";
        let err = InputFactoryConfig::from_yaml(yaml).unwrap().resolve().unwrap_err();
        assert!(matches!(err, ConfigError::UnknownTier { index: 0, ref tier, .. } if tier == "XV"));
    }

    #[test]
    fn underpowered_machine_is_reported() {
        let yaml = "recipes:\n  - {m: ebf, tier: LV, dur: 20, eut: 120}\n";
        let err = InputFactoryConfig::from_yaml(yaml).unwrap().resolve().unwrap_err();
        assert!(matches!(err, ConfigError::TierTooLow { ref machine, .. } if machine == "Electric Blast Furnace"));
    }

    #[test]
    fn loads_from_disk_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("factory.yml");
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(YAML.as_bytes()).unwrap();

        let config = load_factory_config(&path).unwrap();
        assert_eq!(config.recipes.len(), 2);
    }

    #[test]
    fn unsupported_extension_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("factory.toml");
        fs::write(&path, "").unwrap();
        let err = load_factory_config(&path).unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedFormat(ref ext) if ext == "toml"));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = load_factory_config(Path::new("/nonexistent/factory.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
