use crate::dispenser::pump::NOT_CALIBRATED;
use crate::dispenser::{self, Parameters};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

pub const BOTTOM_HAT: u8 = 0x60;
pub const MIDDLE_HAT: u8 = 0x61;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid parameters: {0}")]
    Parameters(#[from] dispenser::Error),
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PumpConfig {
    pub name: String,
    /// Seconds per ounce, 0 or missing if the pump still needs calibrating.
    #[serde(default)]
    pub calibration: f64,
}

impl PumpConfig {
    pub fn new(name: impl Into<String>, calibration: f64) -> Self {
        Self {
            name: name.into(),
            calibration,
        }
    }

    pub fn is_calibrated(&self) -> bool {
        self.calibration != NOT_CALIBRATED
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BarConfig {
    /// Hat bus addresses, in the order their channels get handed out.
    #[serde(default = "default_boards")]
    pub boards: Vec<u8>,
    #[serde(default)]
    pub parameters: Parameters,
    pub pumps: Vec<PumpConfig>,
}

fn default_boards() -> Vec<u8> {
    vec![BOTTOM_HAT, MIDDLE_HAT]
}

impl BarConfig {
    pub fn new(pumps: Vec<PumpConfig>) -> Self {
        Self {
            boards: default_boards(),
            parameters: Parameters::default(),
            pumps,
        }
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.parameters.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_json(&fs::read_to_string(path)?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        fs::write(path, self.to_json()?)?;
        Ok(())
    }
}

#[test]
fn test_minimal_config_uses_defaults() {
    let config = BarConfig::from_json(
        r#"{
            "pumps": [
                {"name": "lime", "calibration": 30.0},
                {"name": "rum"}
            ]
        }"#,
    )
    .unwrap();
    assert_eq!(config.boards, [0x60, 0x61]);
    assert_eq!(config.parameters, Parameters::default());
    assert_eq!(config.pumps[0], PumpConfig::new("lime", 30.0));
    assert!(!config.pumps[1].is_calibrated());
}

#[test]
fn test_partial_parameters_keep_other_defaults() {
    let config = BarConfig::from_json(
        r#"{
            "boards": [96],
            "parameters": {"primeTime": 3.5, "stabilizeDelay": 0.25},
            "pumps": []
        }"#,
    )
    .unwrap();
    assert_eq!(config.boards, [0x60]);
    assert_eq!(config.parameters.prime_time, 3.5);
    assert_eq!(config.parameters.stabilize_delay, 0.25);
    assert_eq!(config.parameters.calibration_time, 60.0);
    assert_eq!(config.parameters.max_speed, 255);
}

#[test]
fn test_missing_pumps_is_an_error() {
    assert!(matches!(
        BarConfig::from_json(r#"{"boards": [96]}"#),
        Err(ConfigError::Json(_))
    ));
}

#[test]
fn test_save_then_load() {
    let path = std::env::temp_dir().join(format!("drinkbot-config-{}.json", std::process::id()));
    let config = BarConfig::new(vec![PumpConfig::new("gin", 27.5), PumpConfig::new("tonic", 0.)]);
    config.save(&path).unwrap();
    let loaded = BarConfig::load(&path).unwrap();
    fs::remove_file(&path).unwrap();
    assert_eq!(loaded, config);
    assert!(matches!(BarConfig::load(&path), Err(ConfigError::Io(_))));
}

#[test]
fn test_out_of_range_timing_is_rejected_on_load() {
    let cases = [
        (r#"{"primeTime": -1}"#, "primeTime"),
        (r#"{"primeTime": 0}"#, "primeTime"),
        (r#"{"calibrationTime": 0}"#, "calibrationTime"),
        (r#"{"calibrationTime": -60}"#, "calibrationTime"),
        (r#"{"referenceVolume": 0}"#, "referenceVolume"),
        (r#"{"stabilizeDelay": -0.5}"#, "stabilizeDelay"),
    ];
    for (parameters, expected) in cases {
        let json = format!(r#"{{"parameters": {parameters}, "pumps": []}}"#);
        let result = BarConfig::from_json(&json);
        assert!(
            matches!(
                &result,
                Err(ConfigError::Parameters(dispenser::Error::InvalidParameter { name, .. })) if *name == expected
            ),
            "{parameters} gave {result:?}"
        );
    }
}

#[test]
fn test_zero_stabilize_delay_is_allowed() {
    let config = BarConfig::from_json(r#"{"parameters": {"stabilizeDelay": 0}, "pumps": []}"#).unwrap();
    assert_eq!(config.parameters.stabilize_delay, 0.);
}
