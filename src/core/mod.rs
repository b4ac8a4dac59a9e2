//! Core module containing the modem bridge
//!
//! This module provides:
//! - Transport layer over the serial link to the modem
//! - Command link for submitting AT commands from any thread
//! - AT transaction engine
//! - One-shot bring-up sequence
//! - Modem control loop (the worker)
//! - Session state register
//! - PPP bridge boundary
//! - Simulated modem for tests and development

pub mod at;
pub mod bringup;
pub mod command;
pub mod modem;
pub mod ppp;
pub mod simulator;
pub mod state;
pub mod transport;
mod worker;
