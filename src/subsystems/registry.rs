use crate::components::hat_motor::HatMotor;
use crate::controllers::motor_hat::{Board, CHANNELS_PER_BOARD};
use crate::dispenser::Error;
use log::{error, info};

/// Hands out motor channels to pumps in the order they are declared: channels 1-4 of the first
/// hat, then 1-4 of the next one, and so on until the hats run out.
pub struct PumpRegistry {
    boards: Vec<Board>,
    current_board: usize,
    //0 until the first pump is assigned, then the last channel handed out on the current board
    next_channel: u8,
}

impl PumpRegistry {
    pub fn new(boards: Vec<Board>) -> Self {
        Self {
            boards,
            current_board: 0,
            next_channel: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.boards.len() * usize::from(CHANNELS_PER_BOARD)
    }

    pub fn assign_next_channel(&mut self) -> Result<HatMotor, Error> {
        let (board_idx, channel) = if self.next_channel < CHANNELS_PER_BOARD {
            (self.current_board, self.next_channel + 1)
        } else {
            (self.current_board + 1, 1)
        };
        let board = self.boards.get(board_idx).ok_or(Error::BoardUnavailable {
            board: board_idx,
            configured: self.boards.len(),
        })?;
        let motor = board.get_motor(channel)?;
        if board_idx != self.current_board {
            info!("Note: now adding pumps from the hat at {:#04x}.", board.address());
        }
        self.current_board = board_idx;
        self.next_channel = channel;
        Ok(motor)
    }

    /// Releases every channel of every hat, whether a pump was assigned to it or not.
    pub async fn release_all(&self) -> Result<(), Error> {
        let mut first_error = None;
        for board in &self.boards {
            if let Err(e) = board.release_all().await {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => {
                error!("Not every motor could be released: {e}");
                Err(e.into())
            }
            None => {
                info!("All motors released");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
use crate::controllers::{motor_hat::Direction, simulated_hat::SimulatedHat};

#[cfg(test)]
fn registry_with(addresses: &[u8]) -> (PumpRegistry, Vec<SimulatedHat>) {
    let mut hats = Vec::new();
    let mut boards = Vec::new();
    for &address in addresses {
        let hat = SimulatedHat::new(address);
        let (board, client) = Board::with_client(address, hat.clone());
        tokio::spawn(client);
        hats.push(hat);
        boards.push(board);
    }
    (PumpRegistry::new(boards), hats)
}

#[tokio::test]
async fn test_first_assignment_is_channel_one_of_first_board() {
    let (mut registry, _) = registry_with(&[0x60, 0x61]);
    let motor = registry.assign_next_channel().unwrap();
    assert_eq!((motor.address, motor.channel), (0x60, 1));
}

#[tokio::test]
async fn test_assignments_are_unique_and_ordered() {
    let (mut registry, _) = registry_with(&[0x60, 0x61, 0x62]);
    let assigned: Vec<(u8, u8)> = (0..registry.capacity())
        .map(|_| registry.assign_next_channel().unwrap())
        .map(|motor| (motor.address, motor.channel))
        .collect();

    let expected: Vec<(u8, u8)> = [0x60, 0x61, 0x62]
        .into_iter()
        .flat_map(|address| (1..=4).map(move |channel| (address, channel)))
        .collect();
    assert_eq!(assigned, expected);
}

#[tokio::test]
async fn test_one_pump_too_many_is_board_unavailable() {
    let (mut registry, _) = registry_with(&[0x60, 0x61]);
    for _ in 0..8 {
        registry.assign_next_channel().unwrap();
    }
    let err = registry.assign_next_channel().unwrap_err();
    assert!(matches!(err, Error::BoardUnavailable { board: 2, configured: 2 }));
    // The cursor stays put, asking again fails the same way.
    assert!(matches!(
        registry.assign_next_channel(),
        Err(Error::BoardUnavailable { board: 2, .. })
    ));
}

#[tokio::test]
async fn test_no_boards_is_board_unavailable() {
    let mut registry = PumpRegistry::new(Vec::new());
    assert!(matches!(
        registry.assign_next_channel(),
        Err(Error::BoardUnavailable { board: 0, configured: 0 })
    ));
}

#[tokio::test]
async fn test_release_all_covers_unassigned_channels() {
    let (mut registry, hats) = registry_with(&[0x60, 0x61]);
    let motor = registry.assign_next_channel().unwrap();
    motor.run(Direction::Forward).await.unwrap();

    registry.release_all().await.unwrap();
    for hat in &hats {
        for channel in 1..=4 {
            assert_eq!(hat.channel_state(channel).unwrap().direction, Direction::Release);
            assert!(hat
                .events_for(channel)
                .iter()
                .any(|e| e.command == crate::controllers::motor_hat::Command::Run(Direction::Release)));
        }
    }
}
