//! Serial port transport implementation

use super::{ModemTransport, TransportError};
use serde::{Deserialize, Serialize};
use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::io::{Read, Write};
use std::time::{Duration, Instant};

/// Serial port flow control type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SerialFlowControl {
    /// No flow control
    #[default]
    None,
    /// Hardware flow control (RTS/CTS)
    Hardware,
    /// Software flow control (XON/XOFF)
    Software,
}

impl From<SerialFlowControl> for FlowControl {
    fn from(flow: SerialFlowControl) -> Self {
        match flow {
            SerialFlowControl::Hardware => FlowControl::Hardware,
            SerialFlowControl::Software => FlowControl::Software,
            SerialFlowControl::None => FlowControl::None,
        }
    }
}

/// Serial port parity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SerialParity {
    /// No parity
    #[default]
    None,
    /// Odd parity
    Odd,
    /// Even parity
    Even,
}

impl std::str::FromStr for SerialParity {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "odd" | "o" => Ok(Self::Odd),
            "even" | "e" => Ok(Self::Even),
            _ => Ok(Self::None),
        }
    }
}

/// Serial port configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Port name (e.g., COM3, /dev/ttyUSB0)
    pub port: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Data bits (5, 6, 7, 8)
    pub data_bits: u8,
    /// Stop bits (1, 2)
    pub stop_bits: u8,
    /// Parity
    pub parity: SerialParity,
    /// Flow control used while the modem is brought up
    pub flow_control: SerialFlowControl,
}

impl SerialConfig {
    /// Create a new serial configuration with modem defaults (8N1, RTS/CTS)
    pub fn new(port: &str, baud_rate: u32) -> Self {
        Self {
            port: port.to_string(),
            baud_rate,
            data_bits: 8,
            stop_bits: 1,
            parity: SerialParity::None,
            flow_control: SerialFlowControl::Hardware,
        }
    }

    /// Set parity
    #[must_use]
    pub fn parity(mut self, parity: SerialParity) -> Self {
        self.parity = parity;
        self
    }

    /// Set flow control
    #[must_use]
    pub fn flow_control(mut self, flow: SerialFlowControl) -> Self {
        self.flow_control = flow;
        self
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self::new("/dev/ttyUSB0", 921_600)
    }
}

/// Serial port transport
pub struct SerialTransport {
    config: SerialConfig,
    port: Box<dyn SerialPort>,
}

impl SerialTransport {
    /// Open the port described by `config`
    pub fn open(config: SerialConfig) -> Result<Self, TransportError> {
        let data_bits = match config.data_bits {
            5 => DataBits::Five,
            6 => DataBits::Six,
            7 => DataBits::Seven,
            _ => DataBits::Eight,
        };

        let stop_bits = match config.stop_bits {
            2 => StopBits::Two,
            _ => StopBits::One,
        };

        let parity = match config.parity {
            SerialParity::Odd => Parity::Odd,
            SerialParity::Even => Parity::Even,
            SerialParity::None => Parity::None,
        };

        let port = serialport::new(&config.port, config.baud_rate)
            .data_bits(data_bits)
            .stop_bits(stop_bits)
            .parity(parity)
            .flow_control(config.flow_control.into())
            .timeout(Duration::from_millis(100))
            .open()
            .map_err(|e| match e.kind() {
                serialport::ErrorKind::NoDevice => {
                    TransportError::PortNotFound(config.port.clone())
                }
                serialport::ErrorKind::InvalidInput => TransportError::ConfigError(e.to_string()),
                serialport::ErrorKind::Io(std::io::ErrorKind::PermissionDenied) => {
                    TransportError::PermissionDenied(config.port.clone())
                }
                _ => TransportError::ConnectionFailed(e.to_string()),
            })?;

        tracing::info!(port = %config.port, baud = config.baud_rate, "serial port opened");

        Ok(Self { config, port })
    }

    /// Get connection info string
    pub fn connection_info(&self) -> String {
        format!(
            "{} @ {} baud ({}{}{})",
            self.config.port,
            self.config.baud_rate,
            self.config.data_bits,
            match self.config.parity {
                SerialParity::None => "N",
                SerialParity::Odd => "O",
                SerialParity::Even => "E",
            },
            self.config.stop_bits,
        )
    }
}

fn port_error(e: serialport::Error) -> TransportError {
    TransportError::IoError(e.into())
}

impl ModemTransport for SerialTransport {
    fn flush_input(&mut self) -> Result<(), TransportError> {
        self.port.clear(ClearBuffer::Input).map_err(port_error)
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        self.port.write_all(data)?;
        Ok(data.len())
    }

    fn wait_tx_done(&mut self, timeout: Duration) -> Result<(), TransportError> {
        // flush() drains the OS queue; the timeout only bounds the write side.
        self.port.set_timeout(timeout.max(Duration::from_millis(1))).map_err(port_error)?;
        self.port.flush()?;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, TransportError> {
        let deadline = Instant::now() + timeout.max(Duration::from_millis(1));
        let mut total = 0;

        while total < buf.len() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            self.port.set_timeout(remaining).map_err(port_error)?;
            match self.port.read(&mut buf[total..]) {
                Ok(0) => break,
                Ok(n) => total += n,
                Err(ref e) if e.kind() == std::io::ErrorKind::TimedOut => break,
                Err(ref e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(e) => return Err(TransportError::IoError(e)),
            }
        }
        Ok(total)
    }

    fn bytes_available(&mut self) -> Result<usize, TransportError> {
        let n = self.port.bytes_to_read().map_err(port_error)?;
        Ok(n as usize)
    }

    fn set_flow_control(&mut self, flow: SerialFlowControl) -> Result<(), TransportError> {
        self.port.set_flow_control(flow.into()).map_err(port_error)?;
        if flow == SerialFlowControl::None {
            self.port.write_request_to_send(false).map_err(port_error)?;
        }
        self.config.flow_control = flow;
        Ok(())
    }

    fn baud_rate(&self) -> u32 {
        self.config.baud_rate
    }
}

/// List available serial ports
pub fn list_ports() -> Result<Vec<serialport::SerialPortInfo>, TransportError> {
    serialport::available_ports().map_err(port_error)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_modem_framing() {
        let config = SerialConfig::default();
        assert_eq!(config.baud_rate, 921_600);
        assert_eq!(config.data_bits, 8);
        assert_eq!(config.stop_bits, 1);
        assert_eq!(config.flow_control, SerialFlowControl::Hardware);
    }

    #[test]
    fn test_builders() {
        let config = SerialConfig::new("/dev/ttyS1", 115_200)
            .parity(SerialParity::Even)
            .flow_control(SerialFlowControl::None);
        assert_eq!(config.parity, SerialParity::Even);
        assert_eq!(config.flow_control, SerialFlowControl::None);
        assert_eq!(config.stop_bits, 1);
    }

    #[test]
    fn test_parity_from_str() {
        assert_eq!("E".parse::<SerialParity>(), Ok(SerialParity::Even));
        assert_eq!("odd".parse::<SerialParity>(), Ok(SerialParity::Odd));
        assert_eq!("whatever".parse::<SerialParity>(), Ok(SerialParity::None));
    }

    #[cfg(unix)]
    fn pty_transport() -> (SerialTransport, serialport::TTYPort) {
        let (master, slave) = serialport::TTYPort::pair().unwrap();
        let transport = SerialTransport {
            config: SerialConfig::default(),
            port: Box::new(master),
        };
        (transport, slave)
    }

    #[cfg(unix)]
    #[test]
    fn test_read_collects_staggered_chunks() {
        let (mut transport, mut slave) = pty_transport();

        let writer = std::thread::spawn(move || {
            slave.write_all(b"+CEREG: 2,1,").unwrap();
            std::thread::sleep(Duration::from_millis(4));
            slave.write_all(b"\"2F4A\",\"01A2D101\",7").unwrap();
            slave
        });

        std::thread::sleep(Duration::from_millis(1));
        let mut buf = [0u8; 256];
        let n = transport.read(&mut buf, Duration::from_millis(100)).unwrap();
        let _slave = writer.join().unwrap();

        assert_eq!(&buf[..n], b"+CEREG: 2,1,\"2F4A\",\"01A2D101\",7");
    }

    #[cfg(unix)]
    #[test]
    fn test_split_ok_reply_is_success() {
        use crate::core::at::AtEngine;

        let (mut transport, mut slave) = pty_transport();
        slave.set_timeout(Duration::from_secs(2)).unwrap();

        let modem = std::thread::spawn(move || {
            let mut cmd = [0u8; 1];
            slave.read_exact(&mut cmd).unwrap();
            slave.write_all(b"\r\n").unwrap();
            std::thread::sleep(Duration::from_millis(4));
            slave.write_all(b"OK\r\n").unwrap();
            slave
        });

        let mut engine = AtEngine::new(1024, Duration::from_millis(1));
        let ok = engine.send_and_wait(&mut transport, "AT", 250);
        let _slave = modem.join().unwrap();

        assert!(ok, "reply read as {:?}", engine.response_lossy());
    }

    #[cfg(unix)]
    #[test]
    fn test_read_times_out_empty() {
        let (mut transport, _slave) = pty_transport();
        let mut buf = [0u8; 16];
        assert_eq!(transport.read(&mut buf, Duration::from_millis(5)).unwrap(), 0);
    }
}
