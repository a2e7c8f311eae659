pub mod components;
pub mod config;
pub mod controllers;
pub mod dispenser;
pub mod interface;
pub mod subsystems;
