use crate::components::hat_motor::HatMotor;
use crate::controllers::motor_hat::{Direction, HatError};
use log::{debug, error};
use std::time::Duration;

/// Drives the motor forward for `duration`, then releases it. The release is sent even when
/// starting the motor failed.
pub async fn timed_dispense(motor: HatMotor, motor_speed: u8, duration: Duration) -> Result<(), HatError> {
    let started = start(&motor, motor_speed).await;
    if started.is_ok() {
        debug!("{motor:?} running for {:.2}s", duration.as_secs_f64());
        tokio::time::sleep(duration).await;
    }
    let released = motor.release().await;
    if let Err(e) = &released {
        error!("Failed to release {motor:?}: {e}");
    }
    debug!("{motor:?} released");
    started.and(released)
}

async fn start(motor: &HatMotor, motor_speed: u8) -> Result<(), HatError> {
    motor.set_speed(motor_speed).await?;
    motor.run(Direction::Forward).await
}

#[cfg(test)]
use crate::controllers::{motor_hat::{Board, Command}, simulated_hat::SimulatedHat};

#[tokio::test(start_paused = true)]
async fn test_timed_dispense_holds_then_releases() {
    let hat = SimulatedHat::new(0x60);
    let (board, client) = Board::with_client(0x60, hat.clone());
    tokio::spawn(client);

    timed_dispense(board.get_motor(2).unwrap(), 255, Duration::from_secs(4))
        .await
        .unwrap();

    let events = hat.events_for(2);
    let commands: Vec<Command> = events.iter().map(|e| e.command).collect();
    assert_eq!(
        commands,
        [
            Command::SetSpeed(255),
            Command::Run(Direction::Forward),
            Command::Run(Direction::Release)
        ]
    );
    let held = events[2].at - events[1].at;
    assert!(held >= Duration::from_secs(4) && held < Duration::from_millis(4010));
}
