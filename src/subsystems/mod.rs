pub mod bar;
pub mod registry;
