//! Transport layer between the modem worker and the physical link
//!
//! The modem speaks over a half-duplex byte pipe. Everything the worker
//! needs from it is captured by [`ModemTransport`]:
//! - flush of stale inbound bytes
//! - blocking write and "wait until transmitted"
//! - bounded-time read and a buffered-byte count
//! - flow-control switching

mod serial;

pub use serial::{list_ports, SerialConfig, SerialFlowControl, SerialParity, SerialTransport};

use std::time::Duration;
use thiserror::Error;

/// Transport error types
#[derive(Error, Debug)]
pub enum TransportError {
    /// Connection failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Port not found
    #[error("Port not found: {0}")]
    PortNotFound(String),

    /// Permission denied
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Not connected
    #[error("Not connected")]
    NotConnected,
}

/// Time needed to move `byte_count` bytes over the link, in milliseconds.
///
/// Twelve bit times per byte leaves headroom over 8N1 framing. One extra
/// byte is always accounted for.
pub fn wait_ms(byte_count: usize, baud_rate: u32) -> u64 {
    if baud_rate == 0 {
        return 0;
    }
    ((byte_count as u64 + 1) * 12_000) / u64::from(baud_rate)
}

/// Same as [`wait_ms`], as a [`Duration`]
pub fn wait_duration(byte_count: usize, baud_rate: u32) -> Duration {
    Duration::from_millis(wait_ms(byte_count, baud_rate))
}

/// Blocking byte transport owned by the modem worker
pub trait ModemTransport: Send {
    /// Discard any bytes already buffered on the receive side
    fn flush_input(&mut self) -> Result<(), TransportError>;

    /// Write bytes, returning how many were accepted
    fn write(&mut self, data: &[u8]) -> Result<usize, TransportError>;

    /// Block until queued output has left the wire, or `timeout` elapses
    fn wait_tx_done(&mut self, timeout: Duration) -> Result<(), TransportError>;

    /// Keep reading until `buf` is full or `timeout` has elapsed, and
    /// return the total. A reply split across several arrivals comes back
    /// whole as long as it lands inside the budget.
    ///
    /// Returns `Ok(0)` when nothing arrived in time.
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, TransportError>;

    /// Number of received bytes waiting to be read
    fn bytes_available(&mut self) -> Result<usize, TransportError>;

    /// Switch the link's flow control
    fn set_flow_control(&mut self, flow: SerialFlowControl) -> Result<(), TransportError>;

    /// Line rate in bits per second
    fn baud_rate(&self) -> u32;
}

impl<T: ModemTransport + ?Sized> ModemTransport for Box<T> {
    fn flush_input(&mut self) -> Result<(), TransportError> {
        (**self).flush_input()
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        (**self).write(data)
    }

    fn wait_tx_done(&mut self, timeout: Duration) -> Result<(), TransportError> {
        (**self).wait_tx_done(timeout)
    }

    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, TransportError> {
        (**self).read(buf, timeout)
    }

    fn bytes_available(&mut self) -> Result<usize, TransportError> {
        (**self).bytes_available()
    }

    fn set_flow_control(&mut self, flow: SerialFlowControl) -> Result<(), TransportError> {
        (**self).set_flow_control(flow)
    }

    fn baud_rate(&self) -> u32 {
        (**self).baud_rate()
    }
}
