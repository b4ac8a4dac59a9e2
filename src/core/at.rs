//! AT transaction engine
//!
//! One transaction: flush stale input, write the command, wait for the
//! first response byte under a poll budget, read what arrived into the
//! shared transaction buffer and classify it.

use super::transport::{wait_duration, ModemTransport, TransportError};
use std::thread;
use std::time::Duration;

/// Success marker in a response
pub const OK_MARKER: &str = "OK";

/// Marker the modem prints when it switches to data mode
pub const CONNECT_MARKER: &str = "CONNECT";

/// Guard sequence that drops the modem back to command mode
pub const ESCAPE_SEQUENCE: &str = "+++";

/// Registration poll query
pub const REGISTRATION_QUERY: &str = "AT+CEREG?";

/// Registered-home prefix in a `+CEREG` report
pub const REGISTERED_MARKER: &str = "+CEREG: 2,1,";

/// Minimum length, counted from the start of [`REGISTERED_MARKER`], of a
/// report carrying the location fields. Shorter text is a truncated read.
pub const REGISTRATION_MIN_LEN: usize = 21;

/// Default transaction buffer capacity
pub const DEFAULT_BUFFER_CAPACITY: usize = 1024;

const LINE_TERMINATOR: &[u8] = b"\r\n";

/// Fixed-capacity buffer reused by every transaction
#[derive(Debug)]
pub struct TransactionBuffer {
    data: Box<[u8]>,
    len: usize,
}

impl TransactionBuffer {
    /// Allocate a buffer. Capacity is at least 3 bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![0u8; capacity.max(3)].into_boxed_slice(),
            len: 0,
        }
    }

    /// Total capacity
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Bytes currently held
    pub fn as_bytes(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// Drop the previous contents
    pub fn clear(&mut self) {
        self.data.fill(0);
        self.len = 0;
    }

    /// Whole buffer for a raw read; call [`Self::set_len`] afterwards
    pub(crate) fn spare(&mut self, limit: usize) -> &mut [u8] {
        let end = limit.min(self.data.len());
        &mut self.data[..end]
    }

    pub(crate) fn set_len(&mut self, len: usize) {
        self.len = len.min(self.data.len());
    }

    /// Substring search over the held bytes
    pub fn contains(&self, marker: &str) -> bool {
        contains(self.as_bytes(), marker)
    }
}

/// Byte-level substring search
pub fn contains(haystack: &[u8], needle: &str) -> bool {
    find(haystack, needle).is_some()
}

fn find(haystack: &[u8], needle: &str) -> Option<usize> {
    let needle = needle.as_bytes();
    if needle.is_empty() {
        return Some(0);
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Does the response carry the success marker?
pub fn is_ok_response(response: &[u8]) -> bool {
    contains(response, OK_MARKER)
}

/// Parse a registration poll response.
///
/// Registered means the registered-home prefix is present and the text
/// from that prefix to the end is at least [`REGISTRATION_MIN_LEN`] long.
pub fn is_registered(response: &[u8]) -> bool {
    match find(response, REGISTERED_MARKER) {
        Some(pos) => response.len() - pos >= REGISTRATION_MIN_LEN,
        None => false,
    }
}

/// Sends commands and reads responses through the shared buffer
#[derive(Debug)]
pub struct AtEngine {
    buffer: TransactionBuffer,
    poll_interval: Duration,
}

impl AtEngine {
    /// Create an engine with its own transaction buffer
    pub fn new(buffer_capacity: usize, poll_interval: Duration) -> Self {
        Self {
            buffer: TransactionBuffer::new(buffer_capacity),
            poll_interval,
        }
    }

    /// Text of the last response
    pub fn response(&self) -> &[u8] {
        self.buffer.as_bytes()
    }

    /// Last response, lossily decoded
    pub fn response_lossy(&self) -> String {
        String::from_utf8_lossy(self.buffer.as_bytes()).into_owned()
    }

    /// Does the last response contain `marker`?
    pub fn response_contains(&self, marker: &str) -> bool {
        self.buffer.contains(marker)
    }

    pub(crate) fn buffer_mut(&mut self) -> &mut TransactionBuffer {
        &mut self.buffer
    }

    /// Run one transaction.
    ///
    /// `timeout` is the number of poll iterations to wait for the first
    /// response byte. Returns `true` iff bytes arrived and contain
    /// [`OK_MARKER`]. Transport errors count as failure.
    pub fn send_and_wait<T>(&mut self, transport: &mut T, command: &str, timeout: u32) -> bool
    where
        T: ModemTransport + ?Sized,
    {
        match self.transact(transport, command, timeout) {
            Ok(ok) => ok,
            Err(e) => {
                tracing::warn!(command, error = %e, "AT transaction failed");
                false
            }
        }
    }

    fn transact<T>(
        &mut self,
        transport: &mut T,
        command: &str,
        mut timeout: u32,
    ) -> Result<bool, TransportError>
    where
        T: ModemTransport + ?Sized,
    {
        let baud = transport.baud_rate();

        transport.flush_input()?;
        transport.write(command.as_bytes())?;
        if command != ESCAPE_SEQUENCE {
            transport.write(LINE_TERMINATOR)?;
        }
        transport.wait_tx_done(wait_duration(command.len(), baud))?;
        thread::sleep(self.poll_interval);

        let mut available;
        loop {
            thread::sleep(self.poll_interval);
            available = transport.bytes_available()?;
            timeout = timeout.saturating_sub(1);
            if timeout == 0 || available > 0 {
                break;
            }
        }

        self.buffer.clear();
        if available == 0 {
            tracing::trace!(command, "no response");
            return Ok(false);
        }

        let capacity = self.buffer.capacity();
        let read_timeout = wait_duration(capacity, baud);
        let n = transport.read(self.buffer.spare(capacity - 2), read_timeout)?;
        self.buffer.set_len(n);

        let ok = n > 0 && self.buffer.contains(OK_MARKER);
        tracing::trace!(command, ok, len = n, "AT transaction complete");
        Ok(ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::simulator::SimulatedModem;

    fn engine() -> AtEngine {
        AtEngine::new(64, Duration::ZERO)
    }

    #[test]
    fn test_ok_marker_means_success() {
        let mut modem = SimulatedModem::new();
        modem.respond_exact("AT", "\r\nOK\r\n");

        let mut at = engine();
        assert!(at.send_and_wait(&mut modem, "AT", 5));
        assert_eq!(at.response(), b"\r\nOK\r\n");
    }

    #[test]
    fn test_response_without_marker_is_failure() {
        let mut modem = SimulatedModem::new();
        modem.respond_exact("AT+FOO", "\r\nERROR\r\n");

        let mut at = engine();
        assert!(!at.send_and_wait(&mut modem, "AT+FOO", 5));
        assert_eq!(at.response(), b"\r\nERROR\r\n");
    }

    #[test]
    fn test_silence_times_out() {
        let mut modem = SimulatedModem::new();
        let mut at = engine();
        assert!(!at.send_and_wait(&mut modem, "AT", 3));
        assert!(at.response().is_empty());
        assert_eq!(modem.handle().polls(), 3);
    }

    #[test]
    fn test_zero_budget_still_polls_once() {
        let mut modem = SimulatedModem::new();
        let mut at = engine();
        assert!(!at.send_and_wait(&mut modem, "AT", 0));
        assert_eq!(modem.handle().polls(), 1);
    }

    #[test]
    fn test_escape_sequence_has_no_terminator() {
        let mut modem = SimulatedModem::new();
        let mut at = engine();
        at.send_and_wait(&mut modem, ESCAPE_SEQUENCE, 1);
        at.send_and_wait(&mut modem, "ATH", 1);
        assert_eq!(modem.handle().written(), b"+++ATH\r\n".to_vec());
        assert_eq!(modem.handle().commands(), vec!["+++", "ATH"]);
    }

    #[test]
    fn test_stale_input_is_flushed() {
        let mut modem = SimulatedModem::new();
        modem.handle().inject(b"\r\nOK\r\n");
        let mut at = engine();
        assert!(!at.send_and_wait(&mut modem, "AT", 2));
    }

    #[test]
    fn test_read_leaves_two_bytes_spare() {
        let mut modem = SimulatedModem::new();
        modem.respond_exact("AT+LONG", "X".repeat(100));
        let mut at = AtEngine::new(16, Duration::ZERO);
        at.send_and_wait(&mut modem, "AT+LONG", 2);
        assert_eq!(at.response().len(), 14);
    }

    #[test]
    fn test_split_reply_is_read_whole() {
        let mut modem = SimulatedModem::new();
        modem.respond_staggered("AT", ["\r\n", "OK\r\n"], Duration::from_millis(2));

        // 1024 bytes at 921600 baud leaves a 13 ms read budget
        let mut at = AtEngine::new(DEFAULT_BUFFER_CAPACITY, Duration::ZERO);
        assert!(at.send_and_wait(&mut modem, "AT", 5));
        assert_eq!(at.response(), b"\r\nOK\r\n");
        assert_eq!(modem.bytes_available().unwrap(), 0);
    }

    #[test]
    fn test_split_registration_report() {
        let mut modem = SimulatedModem::new();
        modem.respond_staggered(
            REGISTRATION_QUERY,
            ["\r\n+CEREG: 2,1,", "\"2F4A\",\"01A2D101\",7\r\n", "\r\nOK\r\n"],
            Duration::from_millis(2),
        );

        let mut at = AtEngine::new(DEFAULT_BUFFER_CAPACITY, Duration::ZERO);
        assert!(at.send_and_wait(&mut modem, REGISTRATION_QUERY, 5));
        assert!(is_registered(at.response()));
    }

    #[test]
    fn test_registration_guard() {
        // 20 characters from the marker: truncated
        assert!(!is_registered(b"+CEREG: 2,1,AB\r\nOK\r\n"));
        // 21 characters: accepted
        assert!(is_registered(b"+CEREG: 2,1,ABC\r\nOK\r\n"));
        assert!(is_registered(
            b"\r\n+CEREG: 2,1,\"2F4A\",\"01A2D101\",7\r\n\r\nOK\r\n"
        ));
        // Searching / roaming codes are not registered-home
        assert!(!is_registered(b"\r\n+CEREG: 2,2,\"2F4A\",\"01A2D101\",7\r\n\r\nOK\r\n"));
        assert!(!is_registered(b""));
    }

    #[test]
    fn test_marker_search() {
        assert!(is_ok_response(b"\r\nOK\r\n"));
        assert!(!is_ok_response(b"\r\nERROR\r\n"));
        assert!(contains(b"\r\nCONNECT 150000000\r\n", CONNECT_MARKER));
    }
}
