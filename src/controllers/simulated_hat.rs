use crate::controllers::motor_hat::{check_channel, Command, Direction, HatError, MotorHat, CHANNELS_PER_BOARD};
use log::info;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelState {
    pub speed: u8,
    pub direction: Direction,
}

impl Default for ChannelState {
    fn default() -> Self {
        Self {
            speed: 0,
            direction: Direction::Release,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Event {
    pub channel: u8,
    pub command: Command,
    pub at: Instant,
}

#[derive(Debug, Default)]
struct State {
    channels: [ChannelState; CHANNELS_PER_BOARD as usize],
    events: Vec<Event>,
}

/// In-memory stand-in for a motor hat. Clones share the same state, so a test can keep one
/// copy for inspection while the board client owns the other.
#[derive(Debug, Clone)]
pub struct SimulatedHat {
    address: u8,
    state: Arc<Mutex<State>>,
}

impl SimulatedHat {
    pub fn new(address: u8) -> Self {
        Self {
            address,
            state: Arc::new(Mutex::new(State::default())),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, HatError> {
        self.state.lock().map_err(|_| HatError::Bus {
            address: self.address,
            message: "simulated hat state poisoned".to_string(),
        })
    }

    fn record(&mut self, channel: u8, command: Command) -> Result<(), HatError> {
        let channel = check_channel(channel)?;
        let mut state = self.lock()?;
        let slot = &mut state.channels[usize::from(channel - 1)];
        match command {
            Command::SetSpeed(speed) => slot.speed = speed,
            Command::Run(direction) => slot.direction = direction,
        }
        info!("hat {:#04x} motor {channel}: {command:?}", self.address);
        state.events.push(Event {
            channel,
            command,
            at: Instant::now(),
        });
        Ok(())
    }

    pub fn channel_state(&self, channel: u8) -> Result<ChannelState, HatError> {
        let channel = check_channel(channel)?;
        Ok(self.lock()?.channels[usize::from(channel - 1)])
    }

    pub fn events(&self) -> Vec<Event> {
        self.lock().map(|state| state.events.clone()).unwrap_or_default()
    }

    pub fn events_for(&self, channel: u8) -> Vec<Event> {
        self.events()
            .into_iter()
            .filter(|event| event.channel == channel)
            .collect()
    }
}

impl MotorHat for SimulatedHat {
    fn set_speed(&mut self, channel: u8, speed: u8) -> Result<(), HatError> {
        self.record(channel, Command::SetSpeed(speed))
    }

    fn run(&mut self, channel: u8, direction: Direction) -> Result<(), HatError> {
        self.record(channel, Command::Run(direction))
    }
}

#[test]
fn test_simulated_hat_records_commands() {
    let mut hat = SimulatedHat::new(0x60);
    let probe = hat.clone();
    hat.set_speed(2, 200).unwrap();
    hat.run(2, Direction::Forward).unwrap();

    assert_eq!(
        probe.channel_state(2).unwrap(),
        ChannelState {
            speed: 200,
            direction: Direction::Forward
        }
    );
    let commands: Vec<Command> = probe.events_for(2).iter().map(|e| e.command).collect();
    assert_eq!(
        commands,
        [Command::SetSpeed(200), Command::Run(Direction::Forward)]
    );
    assert!(probe.events_for(1).is_empty());
}

#[test]
fn test_simulated_hat_rejects_bad_channel() {
    let mut hat = SimulatedHat::new(0x60);
    assert_eq!(hat.run(9, Direction::Forward), Err(HatError::InvalidChannel(9)));
    assert!(hat.events().is_empty());
}
