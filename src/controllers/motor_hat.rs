use crate::components::hat_motor::HatMotor;
use log::{error, info};
use std::future::Future;
use thiserror::Error;
use tokio::sync::mpsc::{channel, Receiver, Sender};
use tokio::sync::oneshot;

pub const CHANNELS_PER_BOARD: u8 = 4;
pub const MAX_SPEED: u8 = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Release,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    SetSpeed(u8),
    Run(Direction),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum HatError {
    #[error("motor channel {0} does not exist, hats have channels 1-4")]
    InvalidChannel(u8),
    #[error("bus error on hat {address:#04x}: {message}")]
    Bus { address: u8, message: String },
    #[error("motor hat client is not running")]
    Disconnected,
}

/// The physical driver board. Implementations talk to the real hardware (or pretend to),
/// the rest of the crate only sees it through a [`Board`] handle.
pub trait MotorHat: Send + 'static {
    fn set_speed(&mut self, channel: u8, speed: u8) -> Result<(), HatError>;
    fn run(&mut self, channel: u8, direction: Direction) -> Result<(), HatError>;
}

pub struct Message {
    pub channel: u8,
    pub command: Command,
    pub response: oneshot::Sender<Result<(), HatError>>,
}

pub fn check_channel(channel: u8) -> Result<u8, HatError> {
    if (1..=CHANNELS_PER_BOARD).contains(&channel) {
        Ok(channel)
    } else {
        Err(HatError::InvalidChannel(channel))
    }
}

//A board is only an address and the sender half of its client's queue, so cloning it is cheap
//and every motor handle made from it talks to the same client.
#[derive(Debug, Clone)]
pub struct Board {
    address: u8,
    tx: Sender<Message>,
}

impl Board {
    pub fn new(address: u8, tx: Sender<Message>) -> Self {
        Self { address, tx }
    }

    pub fn with_client<H: MotorHat>(address: u8, hat: H) -> (Self, impl Future<Output = ()>) {
        let (tx, rx) = channel(100);
        (Self::new(address, tx), client(address, hat, rx))
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    pub fn get_motor(&self, channel: u8) -> Result<HatMotor, HatError> {
        let channel = check_channel(channel)?;
        Ok(HatMotor::new(self.address, channel, self.tx.clone()))
    }

    /// Releases every channel on the board. Keeps going after a failure and reports the first one.
    pub async fn release_all(&self) -> Result<(), HatError> {
        let mut first_error = None;
        for channel in 1..=CHANNELS_PER_BOARD {
            let result = match self.get_motor(channel) {
                Ok(motor) => motor.release().await,
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                error!("Failed to release motor {channel} on hat {:#04x}: {e}", self.address);
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

pub async fn client<H: MotorHat>(address: u8, mut hat: H, mut rx: Receiver<Message>) {
    info!("Motor hat client started for address {address:#04x}");
    while let Some(message) = rx.recv().await {
        let result = check_channel(message.channel).and_then(|channel| match message.command {
            Command::SetSpeed(speed) => hat.set_speed(channel, speed),
            Command::Run(direction) => hat.run(channel, direction),
        });
        if let Err(e) = &result {
            error!(
                "Hat {address:#04x} motor {} rejected {:?}: {e}",
                message.channel, message.command
            );
        }
        if message.response.send(result).is_err() {
            error!("Failed to send via channel");
        }
    }
    info!("Motor hat client for address {address:#04x} shut down");
}

#[cfg(test)]
use crate::controllers::simulated_hat::SimulatedHat;

#[tokio::test]
async fn test_board_routes_commands_to_channel() {
    let hat = SimulatedHat::new(0x60);
    let (board, client) = Board::with_client(0x60, hat.clone());
    tokio::spawn(client);

    let motor = board.get_motor(3).unwrap();
    motor.set_speed(MAX_SPEED).await.unwrap();
    motor.run(Direction::Forward).await.unwrap();

    let state = hat.channel_state(3).unwrap();
    assert_eq!(state.speed, MAX_SPEED);
    assert_eq!(state.direction, Direction::Forward);
    assert_eq!(hat.channel_state(1).unwrap().direction, Direction::Release);
}

#[tokio::test]
async fn test_get_motor_rejects_out_of_range_channel() {
    let (board, _client) = Board::with_client(0x60, SimulatedHat::new(0x60));
    assert_eq!(board.get_motor(0).unwrap_err(), HatError::InvalidChannel(0));
    assert_eq!(board.get_motor(5).unwrap_err(), HatError::InvalidChannel(5));
}

#[tokio::test]
async fn test_release_all_releases_every_channel() {
    let hat = SimulatedHat::new(0x61);
    let (board, client) = Board::with_client(0x61, hat.clone());
    tokio::spawn(client);

    for channel in 1..=CHANNELS_PER_BOARD {
        board
            .get_motor(channel)
            .unwrap()
            .run(Direction::Forward)
            .await
            .unwrap();
    }
    board.release_all().await.unwrap();
    for channel in 1..=CHANNELS_PER_BOARD {
        assert_eq!(hat.channel_state(channel).unwrap().direction, Direction::Release);
    }
}

#[tokio::test]
async fn test_commands_fail_without_client() {
    let (board, client) = Board::with_client(0x60, SimulatedHat::new(0x60));
    drop(client);
    let motor = board.get_motor(1).unwrap();
    assert_eq!(motor.release().await.unwrap_err(), HatError::Disconnected);
    assert_eq!(board.release_all().await.unwrap_err(), HatError::Disconnected);
}
