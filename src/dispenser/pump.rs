use crate::components::hat_motor::HatMotor;
use crate::dispenser::timed_dispense::timed_dispense;
use crate::dispenser::{Error, Parameters};
use crate::interface::operator::Operator;
use crate::subsystems::registry::PumpRegistry;
use log::{debug, info, warn};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Calibration value meaning "this pump has never been calibrated".
pub const NOT_CALIBRATED: f64 = 0.;

/// A peristaltic pump on one motor hat channel.
///
/// Runs are launched in the background so several pumps can pour at once. Start every pump
/// with [`Pump::dispense`] first, then call [`Pump::wait_until_done`] on each of them; waiting
/// right after each start would pour the ingredients one after the other.
#[derive(Debug)]
pub struct Pump {
    name: String,
    motor: HatMotor,
    calibration: f64,
    parameters: Parameters,
    active_run: Option<JoinHandle<Result<(), Error>>>,
}

impl Pump {
    pub async fn new(
        name: impl Into<String>,
        calibration: f64,
        registry: &mut PumpRegistry,
        operator: &mut impl Operator,
    ) -> Result<Self, Error> {
        Self::with_parameters(name, calibration, Parameters::default(), registry, operator).await
    }

    pub async fn with_parameters(
        name: impl Into<String>,
        calibration: f64,
        parameters: Parameters,
        registry: &mut PumpRegistry,
        operator: &mut impl Operator,
    ) -> Result<Self, Error> {
        parameters.validate()?;
        let motor = registry.assign_next_channel()?;
        let mut pump = Self {
            name: name.into(),
            motor,
            calibration: NOT_CALIBRATED,
            parameters,
            active_run: None,
        };
        info!("Pump {} is on {:?}", pump.name, pump.motor);
        pump.calibration = pump.calibrate(calibration, operator).await?;
        Ok(pump)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn motor(&self) -> &HatMotor {
        &self.motor
    }

    /// Seconds of run time per ounce.
    pub fn calibration(&self) -> f64 {
        self.calibration
    }

    pub fn is_running(&self) -> bool {
        self.active_run
            .as_ref()
            .is_some_and(|run| !run.is_finished())
    }

    async fn calibrate(&mut self, calibration: f64, operator: &mut impl Operator) -> Result<f64, Error> {
        if calibration != NOT_CALIBRATED {
            return Ok(calibration);
        }
        if operator.confirm(&format!("Do you want to calibrate pump for {}?", self.name)) {
            self.launch(self.parameters.calibration_time()?).await?;
            self.wait_until_done().await?;
            loop {
                match operator.ask_number("How much liquid was delivered?") {
                    Some(delivered) if delivered.is_finite() && delivered > 0. => {
                        let factor = self.checked_factor(self.parameters.calibration_time / delivered)?;
                        operator.notify(&format!(
                            "Note: please change the calibration for {} to {factor} in your config.",
                            self.name
                        ));
                        return Ok(factor);
                    }
                    Some(delivered) => {
                        operator.notify(&format!("{delivered} oz can't be right, it has to be more than 0."));
                    }
                    None => break,
                }
            }
        }
        let factor = self.checked_factor(self.parameters.default_calibration())?;
        warn!("{} is not calibrated, using {factor}s/oz", self.name);
        operator.notify(&format!(
            "Well...ok, but that means I'll use a standard {} oz for {} and it will be inaccurate!",
            self.parameters.reference_volume, self.name
        ));
        Ok(factor)
    }

    fn checked_factor(&self, factor: f64) -> Result<f64, Error> {
        if factor.is_finite() && factor > 0. {
            Ok(factor)
        } else {
            Err(Error::InvalidCalibration {
                pump: self.name.clone(),
                factor,
            })
        }
    }

    fn check_idle(&self) -> Result<(), Error> {
        if self.active_run.is_some() {
            return Err(Error::DoubleLaunch {
                pump: self.name.clone(),
            });
        }
        Ok(())
    }

    async fn launch(&mut self, duration: Duration) -> Result<(), Error> {
        self.check_idle()?;
        tokio::time::sleep(self.parameters.stabilize_delay()?).await;
        let motor = self.motor.clone();
        let speed = self.parameters.max_speed;
        self.active_run = Some(tokio::spawn(async move {
            timed_dispense(motor, speed, duration)
                .await
                .map_err(Error::from)
        }));
        Ok(())
    }

    /// Starts pouring `ounces` and returns the run time without waiting for it.
    pub async fn dispense(&mut self, ounces: f64) -> Result<Duration, Error> {
        if self.calibration <= 0. || !self.calibration.is_finite() {
            return Err(Error::InvalidCalibration {
                pump: self.name.clone(),
                factor: self.calibration,
            });
        }
        let duration = (ounces > 0.)
            .then(|| Duration::try_from_secs_f64(ounces * self.calibration).ok())
            .flatten()
            .ok_or_else(|| Error::InvalidVolume {
                pump: self.name.clone(),
                ounces,
            })?;
        self.check_idle()?;
        debug!("Dispensing {ounces} oz of {} for {:.2}s", self.name, duration.as_secs_f64());
        self.launch(duration).await?;
        Ok(duration)
    }

    /// Fills the tubing, then keeps kicking the pump for a tenth of the prime time for as long
    /// as the operator asks for more.
    pub async fn prime(&mut self, operator: &mut impl Operator) -> Result<(), Error> {
        let prime_time = self.parameters.prime_time()?;
        self.launch(prime_time).await?;
        self.wait_until_done().await?;
        while operator.confirm(&format!("More {}?", self.name)) {
            self.launch(prime_time / 10).await?;
            self.wait_until_done().await?;
        }
        Ok(())
    }

    pub async fn wait_until_done(&mut self) -> Result<(), Error> {
        let run = self.active_run.take().ok_or_else(|| Error::NoActiveRun {
            pump: self.name.clone(),
        })?;
        run.await.map_err(|e| Error::RunFailed {
            pump: self.name.clone(),
            reason: e.to_string(),
        })?
    }

    /// Cuts the current run short, if there is one, and makes sure the motor is released.
    pub async fn stop(&mut self) -> Result<(), Error> {
        if let Some(run) = self.active_run.take() {
            run.abort();
            info!("Stopping {} early", self.name);
        }
        self.motor.release().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controllers::motor_hat::{Board, Command, Direction};
    use crate::controllers::simulated_hat::SimulatedHat;
    use crate::interface::operator::{Answer, Scripted};
    use tokio::time::Instant;

    fn setup() -> (PumpRegistry, SimulatedHat) {
        let hat = SimulatedHat::new(0x60);
        let (board, client) = Board::with_client(0x60, hat.clone());
        tokio::spawn(client);
        (PumpRegistry::new(vec![board]), hat)
    }

    async fn calibrated(registry: &mut PumpRegistry, name: &str, calibration: f64) -> Pump {
        Pump::new(name, calibration, registry, &mut Scripted::default())
            .await
            .unwrap()
    }

    fn commands(hat: &SimulatedHat, channel: u8) -> Vec<Command> {
        hat.events_for(channel).iter().map(|e| e.command).collect()
    }

    fn close_to(actual: Duration, expected: f64) -> bool {
        (actual.as_secs_f64() - expected).abs() < 0.05
    }

    #[tokio::test(start_paused = true)]
    async fn test_lime_pours_half_an_ounce() {
        let (mut registry, hat) = setup();
        let mut lime = calibrated(&mut registry, "lime", 30.0).await;

        let duration = lime.dispense(0.5).await.unwrap();
        assert_eq!(duration, Duration::from_secs(15));
        assert!(lime.is_running());
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(hat.channel_state(1).unwrap().direction, Direction::Forward);

        lime.wait_until_done().await.unwrap();
        assert!(!lime.is_running());
        assert_eq!(hat.channel_state(1).unwrap().direction, Direction::Release);
        assert_eq!(
            commands(&hat, 1),
            [
                Command::SetSpeed(255),
                Command::Run(Direction::Forward),
                Command::Run(Direction::Release)
            ]
        );
        let events = hat.events_for(1);
        assert!(close_to(events[2].at - events[1].at, 15.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispense_returns_before_run_ends() {
        let (mut registry, _hat) = setup();
        let mut pump = calibrated(&mut registry, "rum", 4.0).await;

        let start = Instant::now();
        pump.dispense(2.0).await.unwrap();
        let launched = start.elapsed();
        assert!(launched < Duration::from_secs(1));
        assert!(launched >= Parameters::default().stabilize_delay().unwrap());

        pump.wait_until_done().await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(8));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pumps_pour_concurrently() {
        let (mut registry, hat) = setup();
        let mut pumps = Vec::new();
        for name in ["one", "two", "three"] {
            pumps.push(calibrated(&mut registry, name, 1.0).await);
        }

        let start = Instant::now();
        for (pump, ounces) in pumps.iter_mut().zip([1.0, 3.0, 6.0]) {
            pump.dispense(ounces).await.unwrap();
        }
        for pump in pumps.iter_mut() {
            pump.wait_until_done().await.unwrap();
        }
        let elapsed = start.elapsed().as_secs_f64();
        assert!(elapsed >= 6.0 && elapsed < 7.0, "took {elapsed}s");
        for channel in 1..=3 {
            assert_eq!(hat.channel_state(channel).unwrap().direction, Direction::Release);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_starts_are_staggered() {
        let (mut registry, hat) = setup();
        let mut first = calibrated(&mut registry, "first", 1.0).await;
        let mut second = calibrated(&mut registry, "second", 1.0).await;

        first.dispense(1.0).await.unwrap();
        second.dispense(1.0).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;
        let first_start = hat.events_for(1)[0].at;
        let second_start = hat.events_for(2)[0].at;
        assert!(second_start - first_start >= Parameters::default().stabilize_delay().unwrap());

        first.wait_until_done().await.unwrap();
        second.wait_until_done().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_bad_calibration_never_starts_motor() {
        let (mut registry, hat) = setup();
        let mut pump = calibrated(&mut registry, "broken", -1.0).await;

        assert!(matches!(
            pump.dispense(1.0).await,
            Err(Error::InvalidCalibration { factor, .. }) if factor == -1.0
        ));
        assert!(hat.events().is_empty());
        assert!(matches!(pump.wait_until_done().await, Err(Error::NoActiveRun { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_bad_volume_is_rejected() {
        let (mut registry, hat) = setup();
        let mut pump = calibrated(&mut registry, "gin", 30.0).await;
        for ounces in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            assert!(matches!(
                pump.dispense(ounces).await,
                Err(Error::InvalidVolume { .. })
            ));
        }
        assert!(hat.events().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_without_run_fails() {
        let (mut registry, _hat) = setup();
        let mut pump = calibrated(&mut registry, "tonic", 30.0).await;
        assert!(matches!(
            pump.wait_until_done().await,
            Err(Error::NoActiveRun { pump }) if pump == "tonic"
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_run_before_join_fails() {
        let (mut registry, hat) = setup();
        let mut pump = calibrated(&mut registry, "vodka", 1.0).await;
        pump.dispense(1.0).await.unwrap();
        assert!(matches!(
            pump.dispense(1.0).await,
            Err(Error::DoubleLaunch { .. })
        ));
        pump.wait_until_done().await.unwrap();
        // A finished but unjoined run still blocks a new one.
        pump.dispense(0.5).await.unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(!pump.is_running());
        assert!(matches!(
            pump.dispense(0.5).await,
            Err(Error::DoubleLaunch { .. })
        ));
        pump.wait_until_done().await.unwrap();
        assert_eq!(
            commands(&hat, 1)
                .iter()
                .filter(|c| **c == Command::Run(Direction::Forward))
                .count(),
            2
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_declined_calibration_uses_standard_factor() {
        let (mut registry, hat) = setup();
        let mut operator = Scripted::new([Answer::No]);
        let pump = Pump::new("lemon", NOT_CALIBRATED, &mut registry, &mut operator)
            .await
            .unwrap();
        assert_eq!(pump.calibration(), 30.0);
        assert!(operator.messages[0].contains("inaccurate"));
        assert!(hat.events().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_calibration_run_measures_delivered_volume() {
        let (mut registry, hat) = setup();
        let mut operator = Scripted::new([Answer::Yes, Answer::Number(-1.0), Answer::Number(2.4)]);
        let start = Instant::now();
        let pump = Pump::new("cola", NOT_CALIBRATED, &mut registry, &mut operator)
            .await
            .unwrap();

        assert_eq!(pump.calibration(), 60.0 / 2.4);
        assert!(start.elapsed() >= Duration::from_secs(60));
        assert_eq!(hat.channel_state(1).unwrap().direction, Direction::Release);
        assert_eq!(operator.prompts.len(), 3);
        assert!(operator.messages.last().unwrap().contains("cola"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_calibration_given_up_falls_back() {
        let (mut registry, _hat) = setup();
        let mut operator = Scripted::new([Answer::Yes, Answer::GiveUp]);
        let pump = Pump::new("soda", NOT_CALIBRATED, &mut registry, &mut operator)
            .await
            .unwrap();
        assert_eq!(pump.calibration(), 30.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_given_calibration_is_kept() {
        let (mut registry, hat) = setup();
        let mut operator = Scripted::new([Answer::Yes]);
        let pump = Pump::new("bitters", 12.5, &mut registry, &mut operator)
            .await
            .unwrap();
        assert_eq!(pump.calibration(), 12.5);
        assert_eq!(operator.remaining(), 1);
        assert!(hat.events().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_prime_with_kicks() {
        let (mut registry, hat) = setup();
        let mut pump = calibrated(&mut registry, "syrup", 30.0).await;
        let mut operator = Scripted::new([Answer::Yes, Answer::Yes, Answer::No]);

        let start = Instant::now();
        pump.prime(&mut operator).await.unwrap();
        let elapsed = start.elapsed().as_secs_f64();
        // 2s prime plus two 0.2s kicks, each preceded by the start up delay
        assert!((elapsed - 2.7).abs() < 0.05, "took {elapsed}s");
        assert!(!pump.is_running());
        assert_eq!(hat.channel_state(1).unwrap().direction, Direction::Release);
        assert_eq!(
            commands(&hat, 1)
                .iter()
                .filter(|c| **c == Command::Run(Direction::Forward))
                .count(),
            3
        );
        assert_eq!(operator.prompts.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_releases_motor_early() {
        let (mut registry, hat) = setup();
        let mut pump = calibrated(&mut registry, "cream", 30.0).await;
        pump.dispense(10.0).await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(hat.channel_state(1).unwrap().direction, Direction::Forward);

        pump.stop().await.unwrap();
        assert_eq!(hat.channel_state(1).unwrap().direction, Direction::Release);
        assert!(matches!(pump.wait_until_done().await, Err(Error::NoActiveRun { .. })));
        pump.dispense(0.1).await.unwrap();
        pump.wait_until_done().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_out_of_range_timing_is_refused_before_any_run() {
        let (mut registry, hat) = setup();
        let parameters = Parameters {
            prime_time: -1.,
            ..Parameters::default()
        };
        let result = Pump::with_parameters("rum", 2.0, parameters, &mut registry, &mut Scripted::default()).await;
        assert!(matches!(
            result,
            Err(Error::InvalidParameter { name: "primeTime", value }) if value == -1.
        ));
        assert!(hat.events().is_empty());
        // the channel was not used up
        assert_eq!(registry.assign_next_channel().unwrap().channel, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_calibration_time_never_yields_zero_factor() {
        let (mut registry, hat) = setup();
        let parameters = Parameters {
            calibration_time: 0.,
            ..Parameters::default()
        };
        let mut operator = Scripted::new([Answer::No]);
        let result = Pump::with_parameters("lime", NOT_CALIBRATED, parameters, &mut registry, &mut operator).await;
        assert!(matches!(
            result,
            Err(Error::InvalidParameter { name: "calibrationTime", .. })
        ));
        assert_eq!(operator.remaining(), 1);
        assert!(hat.events().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallback_factor_is_positive() {
        let (mut registry, _hat) = setup();
        let parameters = Parameters {
            calibration_time: 10.,
            reference_volume: 4.,
            ..Parameters::default()
        };
        let mut operator = Scripted::new([Answer::No]);
        let pump = Pump::with_parameters("lime", NOT_CALIBRATED, parameters, &mut registry, &mut operator)
            .await
            .unwrap();
        assert_eq!(pump.calibration(), 2.5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lost_client_surfaces_as_hat_error() {
        let (board, client) = Board::with_client(0x60, SimulatedHat::new(0x60));
        drop(client);
        let mut registry = PumpRegistry::new(vec![board]);
        let mut pump = calibrated(&mut registry, "water", 1.0).await;
        pump.dispense(1.0).await.unwrap();
        assert!(matches!(pump.wait_until_done().await, Err(Error::Hat(_))));
    }
}
