//! # Modemlink Core Library
//!
//! Drives an LTE modem over a half-duplex serial link:
//! - AT command transactions with poll-budget timeouts
//! - Bring-up that resynchronizes the modem from an unknown state
//! - Periodic network registration polling
//! - Raw byte relay into an external PPP stack once in data mode
//! - Thread-safe session state for other parts of the program
//!
//! ## Example
//!
//! ```rust,no_run
//! use modemlink_core::{AppConfig, LoggingBridge, Modem, SerialTransport};
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = AppConfig::load(None)?;
//!     let transport = SerialTransport::open(config.serial.clone())?;
//!     let modem = Modem::spawn(transport, Box::new(LoggingBridge::new()), config.modem)?;
//!     modem.start();
//!
//!     let rsp = modem.send_at("AT+CGMR", 2500)?;
//!     println!("{} {}", rsp.ok, rsp.text_lossy());
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod config;
pub mod core;

// Re-exports for convenience
pub use crate::cli::{CliResult, ExitCodes};
pub use crate::config::{AppConfig, ConfigError, LoggingConfig, ModemConfig, ModemTimings};
pub use crate::core::bringup::BringUpOutcome;
pub use crate::core::command::{
    CommandError, CommandLink, CommandOpcode, CommandRequest, CommandResponse,
};
pub use crate::core::modem::{Modem, ModemError};
pub use crate::core::ppp::{LinkAddresses, LoggingBridge, PppAuth, PppBridge, PppHost, PppStatus};
pub use crate::core::simulator::{SimHandle, SimulatedModem};
pub use crate::core::state::{SessionState, StateRegister};
pub use crate::core::transport::{
    ModemTransport, SerialConfig, SerialFlowControl, SerialParity, SerialTransport, TransportError,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
