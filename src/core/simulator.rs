//! Simulated modem
//!
//! A scriptable [`ModemTransport`] for tests and development. Command lines
//! written by the host are matched against response rules; matching rules
//! queue their response on the receive side. Unmatched commands get no
//! answer, which looks like a timeout to the host.

use super::transport::{ModemTransport, SerialFlowControl, TransportError};
use parking_lot::Mutex;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const ESCAPE: &[u8] = b"+++";
const MAX_PENDING: usize = 4096;

/// Command match condition
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MatchCondition {
    /// Whole command line equals text
    Exact { text: String },
    /// Command line starts with text
    Prefix { text: String },
    /// Command line matches regex
    Regex { pattern: String },
    /// Any command line
    Any,
}

impl MatchCondition {
    /// Check if a command line matches this condition
    pub fn matches(&self, command: &str) -> bool {
        match self {
            Self::Exact { text } => command == text,
            Self::Prefix { text } => command.starts_with(text.as_str()),
            Self::Regex { pattern } => Regex::new(pattern)
                .map(|re| re.is_match(command))
                .unwrap_or(false),
            Self::Any => true,
        }
    }
}

/// Response rule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseRule {
    /// Match condition
    pub condition: MatchCondition,
    /// Bytes queued on a match. The first chunk is available at once, each
    /// further chunk `chunk_gap_ms` after the previous one.
    pub chunks: Vec<Vec<u8>>,
    /// Delay between chunks
    #[serde(default)]
    pub chunk_gap_ms: u64,
    /// Matches left before the rule retires (`None` = unlimited)
    pub remaining: Option<u32>,
    /// Match count
    #[serde(default)]
    pub match_count: u64,
}

impl ResponseRule {
    /// Rule answering an exact command
    pub fn exact(command: &str, response: impl AsRef<[u8]>) -> Self {
        Self::new(
            MatchCondition::Exact {
                text: command.to_string(),
            },
            response,
        )
    }

    /// Rule with an arbitrary condition
    pub fn new(condition: MatchCondition, response: impl AsRef<[u8]>) -> Self {
        Self {
            condition,
            chunks: vec![response.as_ref().to_vec()],
            chunk_gap_ms: 0,
            remaining: None,
            match_count: 0,
        }
    }

    /// Retire the rule after `n` matches
    #[must_use]
    pub fn times(mut self, n: u32) -> Self {
        self.remaining = Some(n);
        self
    }

    /// Deliver the response in pieces, `gap` apart
    #[must_use]
    pub fn staggered<I, B>(mut self, parts: I, gap: Duration) -> Self
    where
        I: IntoIterator<Item = B>,
        B: AsRef<[u8]>,
    {
        self.chunks = parts.into_iter().map(|p| p.as_ref().to_vec()).collect();
        self.chunk_gap_ms = u64::try_from(gap.as_millis()).unwrap_or(u64::MAX);
        self
    }

    fn is_live(&self) -> bool {
        self.remaining != Some(0)
    }
}

#[derive(Debug, Default)]
struct SimState {
    rules: Vec<ResponseRule>,
    rx: VecDeque<u8>,
    scheduled: VecDeque<(Instant, Vec<u8>)>,
    pending: Vec<u8>,
    written: Vec<u8>,
    commands: Vec<String>,
    polls: usize,
    flow_changes: Vec<SerialFlowControl>,
    fail_io: bool,
}

impl SimState {
    fn accept(&mut self, data: &[u8]) {
        self.written.extend_from_slice(data);

        // A lone escape write stands in for the guard-time escape
        if data == ESCAPE {
            self.pending.clear();
            self.dispatch("+++".to_string());
            return;
        }
        self.pending.extend_from_slice(data);

        while let Some(pos) = self.pending.windows(2).position(|w| w == b"\r\n") {
            let line: Vec<u8> = self.pending.drain(..pos + 2).take(pos).collect();
            self.dispatch(String::from_utf8_lossy(&line).into_owned());
        }

        if self.pending.len() > MAX_PENDING {
            self.pending.clear();
        }
    }

    fn dispatch(&mut self, command: String) {
        let rule = self
            .rules
            .iter_mut()
            .find(|r| r.is_live() && r.condition.matches(&command));

        match rule {
            Some(rule) => {
                rule.match_count += 1;
                if let Some(n) = rule.remaining.as_mut() {
                    *n -= 1;
                }
                let gap = Duration::from_millis(rule.chunk_gap_ms);
                let mut due = Instant::now();
                let mut chunks = rule.chunks.iter();
                if let Some(first) = chunks.next() {
                    self.rx.extend(first.iter().copied());
                }
                for chunk in chunks {
                    due += gap;
                    self.scheduled.push_back((due, chunk.clone()));
                }
            }
            None => tracing::trace!(%command, "simulated modem: no rule"),
        }
        self.commands.push(command);
    }

    /// Move chunks whose time has come onto the receive side
    fn release_due(&mut self) {
        let now = Instant::now();
        while let Some((due, _)) = self.scheduled.front() {
            if *due > now {
                break;
            }
            if let Some((_, chunk)) = self.scheduled.pop_front() {
                self.rx.extend(chunk);
            }
        }
    }

    fn check_io(&self) -> Result<(), TransportError> {
        if self.fail_io {
            Err(TransportError::NotConnected)
        } else {
            Ok(())
        }
    }
}

/// Shared view of a [`SimulatedModem`], usable after the modem has been
/// moved into a worker
#[derive(Debug, Clone, Default)]
pub struct SimHandle {
    state: Arc<Mutex<SimState>>,
}

impl SimHandle {
    /// Append a response rule. Rules are tried in insertion order.
    pub fn add_rule(&self, rule: ResponseRule) {
        self.state.lock().rules.push(rule);
    }

    /// Queue unsolicited bytes on the receive side
    pub fn inject(&self, data: &[u8]) {
        self.state.lock().rx.extend(data.iter().copied());
    }

    /// Everything the host has written
    pub fn written(&self) -> Vec<u8> {
        self.state.lock().written.clone()
    }

    /// Command lines seen so far, without terminators
    pub fn commands(&self) -> Vec<String> {
        self.state.lock().commands.clone()
    }

    /// How often the host asked for the buffered-byte count
    pub fn polls(&self) -> usize {
        self.state.lock().polls
    }

    /// Flow-control changes requested by the host, in order
    pub fn flow_changes(&self) -> Vec<SerialFlowControl> {
        self.state.lock().flow_changes.clone()
    }

    /// Make every transport call fail
    pub fn set_fail_io(&self, fail: bool) {
        self.state.lock().fail_io = fail;
    }

    /// Forget the write and command logs
    pub fn clear_log(&self) {
        let mut state = self.state.lock();
        state.written.clear();
        state.commands.clear();
        state.polls = 0;
    }
}

/// Scriptable modem behind a [`ModemTransport`]
#[derive(Debug, Clone)]
pub struct SimulatedModem {
    handle: SimHandle,
    baud_rate: u32,
}

impl Default for SimulatedModem {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedModem {
    /// Create a silent modem
    pub fn new() -> Self {
        Self {
            handle: SimHandle::default(),
            baud_rate: 921_600,
        }
    }

    /// Shared handle for inspection
    pub fn handle(&self) -> SimHandle {
        self.handle.clone()
    }

    /// Answer `command` with `response` every time
    pub fn respond_exact(&mut self, command: &str, response: impl AsRef<[u8]>) -> &mut Self {
        self.handle.add_rule(ResponseRule::exact(command, response));
        self
    }

    /// Answer `command` with `response` once
    pub fn respond_once(&mut self, command: &str, response: impl AsRef<[u8]>) -> &mut Self {
        self.handle.add_rule(ResponseRule::exact(command, response).times(1));
        self
    }

    /// Answer `command` with `parts`, delivered `gap` apart
    pub fn respond_staggered<I, B>(&mut self, command: &str, parts: I, gap: Duration) -> &mut Self
    where
        I: IntoIterator<Item = B>,
        B: AsRef<[u8]>,
    {
        let rule = ResponseRule::exact(command, b"").staggered(parts, gap);
        self.handle.add_rule(rule);
        self
    }

    /// Append an arbitrary rule
    pub fn add_rule(&mut self, rule: ResponseRule) -> &mut Self {
        self.handle.add_rule(rule);
        self
    }
}

impl ModemTransport for SimulatedModem {
    fn flush_input(&mut self) -> Result<(), TransportError> {
        let mut state = self.handle.state.lock();
        state.check_io()?;
        state.release_due();
        state.rx.clear();
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        let mut state = self.handle.state.lock();
        state.check_io()?;
        state.accept(data);
        Ok(data.len())
    }

    fn wait_tx_done(&mut self, _timeout: Duration) -> Result<(), TransportError> {
        self.handle.state.lock().check_io()
    }

    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, TransportError> {
        let deadline = Instant::now() + timeout;
        let mut total = 0;

        loop {
            let mut state = self.handle.state.lock();
            state.check_io()?;
            state.release_due();

            let n = (buf.len() - total).min(state.rx.len());
            for (slot, byte) in buf[total..].iter_mut().zip(state.rx.drain(..n)) {
                *slot = byte;
            }
            total += n;

            // Nothing more is on its way, or the budget is spent
            if total == buf.len() || state.scheduled.is_empty() || Instant::now() >= deadline {
                return Ok(total);
            }
            drop(state);
            thread::sleep(Duration::from_millis(1));
        }
    }

    fn bytes_available(&mut self) -> Result<usize, TransportError> {
        let mut state = self.handle.state.lock();
        state.check_io()?;
        state.release_due();
        state.polls += 1;
        Ok(state.rx.len())
    }

    fn set_flow_control(&mut self, flow: SerialFlowControl) -> Result<(), TransportError> {
        let mut state = self.handle.state.lock();
        state.check_io()?;
        state.flow_changes.push(flow);
        Ok(())
    }

    fn baud_rate(&self) -> u32 {
        self.baud_rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_match_conditions() {
        let exact = MatchCondition::Exact { text: "AT".into() };
        assert!(exact.matches("AT"));
        assert!(!exact.matches("ATH"));

        let prefix = MatchCondition::Prefix { text: "AT+SQNCTM=".into() };
        assert!(prefix.matches("AT+SQNCTM=\"verizon\""));

        let re = MatchCondition::Regex { pattern: r"^ATD\*99".into() };
        assert!(re.matches("ATD*99***1#"));
        assert!(!MatchCondition::Regex { pattern: "(".into() }.matches("("));
    }

    #[test]
    fn test_line_assembly_across_writes() {
        let mut modem = SimulatedModem::new();
        modem.respond_exact("AT", "OK");
        modem.write(b"A").unwrap();
        modem.write(b"T").unwrap();
        assert_eq!(modem.bytes_available().unwrap(), 0);
        modem.write(b"\r\n").unwrap();
        assert_eq!(modem.bytes_available().unwrap(), 2);
        assert_eq!(modem.handle().commands(), vec!["AT"]);
    }

    #[test]
    fn test_one_shot_rule_falls_through() {
        let mut modem = SimulatedModem::new();
        modem.respond_once("AT", "FIRST");
        modem.respond_exact("AT", "LATER");

        let mut buf = [0u8; 16];
        modem.write(b"AT\r\n").unwrap();
        let n = modem.read(&mut buf, Duration::ZERO).unwrap();
        assert_eq!(&buf[..n], b"FIRST");

        modem.write(b"AT\r\n").unwrap();
        let n = modem.read(&mut buf, Duration::ZERO).unwrap();
        assert_eq!(&buf[..n], b"LATER");
    }

    #[test]
    fn test_escape_after_data_bytes() {
        let mut modem = SimulatedModem::new();
        modem.respond_exact("+++", "OK");
        modem.write(&[0x7e, 0xff, 0x7e]).unwrap();
        modem.write(b"+++").unwrap();
        assert_eq!(modem.handle().commands(), vec!["+++"]);
        assert_eq!(modem.bytes_available().unwrap(), 2);
    }

    #[test]
    fn test_staggered_reply_arrives_over_time() {
        let mut modem = SimulatedModem::new();
        modem.respond_staggered("AT", ["\r\n", "OK\r\n"], Duration::from_millis(20));
        modem.write(b"AT\r\n").unwrap();

        let mut buf = [0u8; 16];
        let n = modem.read(&mut buf, Duration::ZERO).unwrap();
        assert_eq!(&buf[..n], b"\r\n");

        let n = modem.read(&mut buf, Duration::from_millis(500)).unwrap();
        assert_eq!(&buf[..n], b"OK\r\n");
    }

    #[test]
    fn test_read_waits_for_the_whole_reply() {
        let mut modem = SimulatedModem::new();
        modem.respond_staggered("AT", ["\r\n", "O", "K\r\n"], Duration::from_millis(2));
        modem.write(b"AT\r\n").unwrap();

        let mut buf = [0u8; 16];
        let n = modem.read(&mut buf, Duration::from_millis(500)).unwrap();
        assert_eq!(&buf[..n], b"\r\nOK\r\n");
    }

    #[test]
    fn test_flush_drops_late_chunks() {
        let mut modem = SimulatedModem::new();
        modem.respond_staggered("AT", ["A", "B"], Duration::ZERO);
        modem.write(b"AT\r\n").unwrap();
        modem.flush_input().unwrap();
        assert_eq!(modem.bytes_available().unwrap(), 0);
    }

    #[test]
    fn test_fail_io() {
        let mut modem = SimulatedModem::new();
        modem.handle().set_fail_io(true);
        assert!(modem.write(b"AT\r\n").is_err());
        assert!(modem.bytes_available().is_err());
    }
}
