pub mod pump;
pub mod timed_dispense;

use crate::controllers::motor_hat::{HatError, MAX_SPEED};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("no motor hat at position {board} (only {configured} configured), cannot add another pump")]
    BoardUnavailable { board: usize, configured: usize },
    #[error("{pump} - calibration: {factor} must be > 0 for motors to run")]
    InvalidCalibration { pump: String, factor: f64 },
    #[error("{pump} - cannot dispense {ounces} oz")]
    InvalidVolume { pump: String, ounces: f64 },
    #[error("{pump} has no run to wait for")]
    NoActiveRun { pump: String },
    #[error("{pump} is still running, wait for it before starting another run")]
    DoubleLaunch { pump: String },
    #[error("a pump named {0} already exists")]
    DuplicatePump(String),
    #[error("no pump named {0}")]
    UnknownPump(String),
    #[error("{pump} run did not finish: {reason}")]
    RunFailed { pump: String, reason: String },
    #[error("parameter {name} = {value} is out of range")]
    InvalidParameter { name: &'static str, value: f64 },
    #[error(transparent)]
    Hat(#[from] HatError),
}

/// Timing constants for the pumps. Times are in seconds, volumes in ounces.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Parameters {
    pub max_speed: u8,
    /// Pumps draw a current spike on start up, this keeps pumps started together from spiking at once.
    pub stabilize_delay: f64,
    /// How long it takes to fill empty tubing.
    pub prime_time: f64,
    pub calibration_time: f64,
    /// What an uncalibrated pump is assumed to deliver in `calibration_time`.
    pub reference_volume: f64,
}

impl Parameters {
    /// Times must be finite and positive, except the start up delay which may be 0.
    pub fn validate(&self) -> Result<(), Error> {
        let checks = [
            ("stabilizeDelay", self.stabilize_delay, self.stabilize_delay >= 0.),
            ("primeTime", self.prime_time, self.prime_time > 0.),
            ("calibrationTime", self.calibration_time, self.calibration_time > 0.),
            ("referenceVolume", self.reference_volume, self.reference_volume > 0.),
        ];
        for (name, value, in_range) in checks {
            if !value.is_finite() || !in_range {
                return Err(Error::InvalidParameter { name, value });
            }
        }
        Ok(())
    }

    pub fn stabilize_delay(&self) -> Result<Duration, Error> {
        seconds("stabilizeDelay", self.stabilize_delay)
    }

    pub fn prime_time(&self) -> Result<Duration, Error> {
        seconds("primeTime", self.prime_time)
    }

    pub fn calibration_time(&self) -> Result<Duration, Error> {
        seconds("calibrationTime", self.calibration_time)
    }

    pub fn default_calibration(&self) -> f64 {
        self.calibration_time / self.reference_volume
    }
}

fn seconds(name: &'static str, value: f64) -> Result<Duration, Error> {
    Duration::try_from_secs_f64(value).map_err(|_| Error::InvalidParameter { name, value })
}

impl Default for Parameters {
    fn default() -> Self {
        Self {
            max_speed: MAX_SPEED,
            stabilize_delay: 0.1,
            prime_time: 2.0,
            calibration_time: 60.0,
            reference_volume: 2.0,
        }
    }
}

#[test]
fn test_default_calibration_is_thirty_seconds_per_ounce() {
    assert_eq!(Parameters::default().default_calibration(), 30.0);
}

#[test]
fn test_default_parameters_are_valid() {
    assert!(Parameters::default().validate().is_ok());
    let no_delay = Parameters {
        stabilize_delay: 0.,
        ..Parameters::default()
    };
    assert!(no_delay.validate().is_ok());
}

#[test]
fn test_out_of_range_parameters_are_rejected() {
    let cases = [
        ("stabilizeDelay", Parameters { stabilize_delay: -0.1, ..Parameters::default() }),
        ("primeTime", Parameters { prime_time: -1., ..Parameters::default() }),
        ("primeTime", Parameters { prime_time: 0., ..Parameters::default() }),
        ("calibrationTime", Parameters { calibration_time: 0., ..Parameters::default() }),
        ("calibrationTime", Parameters { calibration_time: f64::NAN, ..Parameters::default() }),
        ("referenceVolume", Parameters { reference_volume: 0., ..Parameters::default() }),
        ("referenceVolume", Parameters { reference_volume: f64::INFINITY, ..Parameters::default() }),
    ];
    for (expected, parameters) in cases {
        assert!(
            matches!(parameters.validate(), Err(Error::InvalidParameter { name, .. }) if name == expected),
            "{expected} should be rejected"
        );
    }
}

#[test]
fn test_negative_time_is_an_error_not_a_panic() {
    let parameters = Parameters {
        prime_time: -1.,
        ..Parameters::default()
    };
    assert!(matches!(
        parameters.prime_time(),
        Err(Error::InvalidParameter { name: "primeTime", .. })
    ));
}
