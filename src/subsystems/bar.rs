use crate::config::{BarConfig, PumpConfig};
use crate::controllers::motor_hat::Board;
use crate::dispenser::pump::Pump;
use crate::dispenser::{Error, Parameters};
use crate::interface::operator::Operator;
use crate::subsystems::registry::PumpRegistry;
use log::{error, info};
use std::collections::HashSet;
use std::time::Duration;

/// All the pumps of the machine, by ingredient name.
pub struct Bar {
    registry: PumpRegistry,
    parameters: Parameters,
    pumps: Vec<Pump>,
}

impl Bar {
    pub fn new(registry: PumpRegistry, parameters: Parameters) -> Self {
        Self {
            registry,
            parameters,
            pumps: Vec::new(),
        }
    }

    /// `boards` must be in the same order as `config.boards`, pumps take their channels in the
    /// order they are listed.
    pub async fn from_config(
        config: &BarConfig,
        boards: Vec<Board>,
        operator: &mut impl Operator,
    ) -> Result<Self, Error> {
        let mut bar = Self::new(PumpRegistry::new(boards), config.parameters.clone());
        for pump in &config.pumps {
            bar.add_pump(pump.name.clone(), pump.calibration, operator)
                .await?;
        }
        info!("Bar ready with {} pumps", bar.pumps.len());
        Ok(bar)
    }

    pub async fn add_pump(
        &mut self,
        name: String,
        calibration: f64,
        operator: &mut impl Operator,
    ) -> Result<&Pump, Error> {
        if self.pump(&name).is_some() {
            return Err(Error::DuplicatePump(name));
        }
        let pump = Pump::with_parameters(
            name,
            calibration,
            self.parameters.clone(),
            &mut self.registry,
            operator,
        )
        .await?;
        self.pumps.push(pump);
        Ok(&self.pumps[self.pumps.len() - 1])
    }

    pub fn pump(&self, name: &str) -> Option<&Pump> {
        self.pumps.iter().find(|pump| pump.name() == name)
    }

    pub fn pumps(&self) -> &[Pump] {
        &self.pumps
    }

    fn index_of(&self, name: &str) -> Result<usize, Error> {
        self.pumps
            .iter()
            .position(|pump| pump.name() == name)
            .ok_or_else(|| Error::UnknownPump(name.to_string()))
    }

    pub async fn prime_all(&mut self, operator: &mut impl Operator) -> Result<(), Error> {
        for pump in self.pumps.iter_mut() {
            info!("Priming {}", pump.name());
            pump.prime(operator).await?;
        }
        Ok(())
    }

    /// Pours every ingredient at once and returns when the slowest pump is done. Gives back the
    /// longest run time.
    pub async fn pour(&mut self, order: &[(&str, f64)]) -> Result<Duration, Error> {
        let mut seen = HashSet::new();
        let mut indexes = Vec::with_capacity(order.len());
        for (name, _) in order {
            if !seen.insert(*name) {
                return Err(Error::DuplicatePump(name.to_string()));
            }
            indexes.push(self.index_of(name)?);
        }

        let mut launched = Vec::with_capacity(order.len());
        let mut failure = None;
        let mut longest = Duration::ZERO;
        for (&idx, (_, ounces)) in indexes.iter().zip(order) {
            match self.pumps[idx].dispense(*ounces).await {
                Ok(duration) => {
                    launched.push(idx);
                    longest = longest.max(duration);
                }
                Err(e) => {
                    error!("Could not start {}: {e}", self.pumps[idx].name());
                    failure = Some(e);
                    break;
                }
            }
        }

        //Only join once everything is started, otherwise the pumps pour one at a time
        for idx in launched {
            if let Err(e) = self.pumps[idx].wait_until_done().await {
                error!("{} did not finish pouring: {e}", self.pumps[idx].name());
                failure.get_or_insert(e);
            }
        }
        match failure {
            Some(e) => Err(e),
            None => {
                info!("Drink ready after {:.1}s", longest.as_secs_f64());
                Ok(longest)
            }
        }
    }

    pub fn calibrations(&self) -> Vec<PumpConfig> {
        self.pumps
            .iter()
            .map(|pump| PumpConfig::new(pump.name(), pump.calibration()))
            .collect()
    }

    /// Stops every pump and releases every channel on every hat.
    pub async fn shutdown(&mut self) -> Result<(), Error> {
        for pump in self.pumps.iter_mut() {
            if let Err(e) = pump.stop().await {
                error!("Failed to stop {}: {e}", pump.name());
            }
        }
        self.registry.release_all().await
    }
}
