//! # Configuration
//!
//! Process-level settings, loaded once from the environment at startup.

pub mod controller;

pub use controller::ControllerConfig;
