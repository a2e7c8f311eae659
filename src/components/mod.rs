pub mod hat_motor;
pub mod send_recv;
