pub mod motor_hat;
pub mod simulated_hat;
