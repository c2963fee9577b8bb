//! MailServer Controller Library
//!
//! Core functionality for the MailServer controller. Unit tests live next to
//! the code they cover; reconcile scenarios run against the in-memory store
//! under `tests/`.
//!
//! ## Quick Start
//!
//! ```rust
//! use mailserver_controller::prelude::*;
//! ```

pub mod config;
pub mod constants;
pub mod controller;
pub mod crd;
pub mod observability;
pub mod prelude;
pub mod runtime;
