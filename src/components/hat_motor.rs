use crate::components::send_recv::SendRecv;
use crate::controllers::motor_hat::{Command, Direction, HatError, Message};
use std::fmt;
use tokio::sync::mpsc::Sender;

/// One DC motor output on a motor hat.
#[derive(Clone)]
pub struct HatMotor {
    pub address: u8,
    pub channel: u8,
    drive_sender: Sender<Message>,
}

impl HatMotor {
    pub fn new(address: u8, channel: u8, drive_sender: Sender<Message>) -> Self {
        HatMotor {
            address,
            channel,
            drive_sender,
        }
    }

    pub async fn set_speed(&self, speed: u8) -> Result<(), HatError> {
        self.write(Command::SetSpeed(speed)).await
    }

    pub async fn run(&self, direction: Direction) -> Result<(), HatError> {
        self.write(Command::Run(direction)).await
    }

    pub async fn release(&self) -> Result<(), HatError> {
        self.run(Direction::Release).await
    }
}

impl fmt::Debug for HatMotor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "hat {:#04x} motor {}", self.address, self.channel)
    }
}

impl SendRecv for HatMotor {
    fn get_sender(&self) -> &Sender<Message> {
        &self.drive_sender
    }

    fn get_channel(&self) -> u8 {
        self.channel
    }
}
