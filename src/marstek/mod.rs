//! Marstek device module
//!
//! UDP/JSON client, command catalogue and the polling coordinator.

pub mod client;
pub mod command;
pub mod coordinator;
pub mod setup;
pub mod types;

pub use client::MarstekClient;
pub use command::{Command, EsMode};
pub use coordinator::Coordinator;
pub use setup::validate_device;
pub use types::*;
