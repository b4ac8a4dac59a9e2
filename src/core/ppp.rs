//! PPP bridge boundary
//!
//! The PPP/IP machinery lives outside this crate. It plugs in through
//! [`PppBridge`]; the worker hands it a [`PppHost`] whenever it calls in,
//! so every byte the bridge sends goes out on the worker that owns the
//! transport.

use super::transport::{wait_duration, ModemTransport};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use std::sync::Arc;

/// Authentication scheme requested from the bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PppAuth {
    /// No authentication
    None,
    /// Password Authentication Protocol
    Pap,
    /// Challenge Handshake Authentication Protocol
    Chap,
}

/// Addresses negotiated for the link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkAddresses {
    /// Local address
    pub ip: Ipv4Addr,
    /// Gateway
    pub gateway: Ipv4Addr,
    /// Netmask
    pub netmask: Ipv4Addr,
}

/// Link status reported by the bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PppStatus {
    /// Link is up
    Connected(Option<LinkAddresses>),
    /// Invalid parameter
    Param,
    /// Unable to open PPP session
    Open,
    /// Invalid I/O device for PPP
    Device,
    /// Unable to allocate resources
    Alloc,
    /// User interrupt (disconnected)
    User,
    /// Connection lost
    ConnectionLost,
    /// Failed authentication challenge
    AuthFail,
    /// Failed to meet protocol
    Protocol,
    /// Connection timeout
    PeerDead,
    /// Idle timeout
    IdleTimeout,
    /// Max connect time reached
    ConnectTime,
    /// Loopback detected
    Loopback,
    /// Code outside the known set
    Unknown(i32),
}

impl PppStatus {
    /// Decode a numeric status code (0 = connected)
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => Self::Connected(None),
            1 => Self::Param,
            2 => Self::Open,
            3 => Self::Device,
            4 => Self::Alloc,
            5 => Self::User,
            6 => Self::ConnectionLost,
            7 => Self::AuthFail,
            8 => Self::Protocol,
            9 => Self::PeerDead,
            10 => Self::IdleTimeout,
            11 => Self::ConnectTime,
            12 => Self::Loopback,
            other => Self::Unknown(other),
        }
    }

    /// Numeric status code
    pub fn code(&self) -> i32 {
        match self {
            Self::Connected(_) => 0,
            Self::Param => 1,
            Self::Open => 2,
            Self::Device => 3,
            Self::Alloc => 4,
            Self::User => 5,
            Self::ConnectionLost => 6,
            Self::AuthFail => 7,
            Self::Protocol => 8,
            Self::PeerDead => 9,
            Self::IdleTimeout => 10,
            Self::ConnectTime => 11,
            Self::Loopback => 12,
            Self::Unknown(code) => *code,
        }
    }

    /// Link is up
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected(_))
    }
}

impl fmt::Display for PppStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connected(_) => write!(f, "Connected"),
            Self::Param => write!(f, "Invalid parameter"),
            Self::Open => write!(f, "Unable to open PPP session"),
            Self::Device => write!(f, "Invalid I/O device for PPP"),
            Self::Alloc => write!(f, "Unable to allocate resources"),
            Self::User => write!(f, "User interrupt (disconnected)"),
            Self::ConnectionLost => write!(f, "Connection lost"),
            Self::AuthFail => write!(f, "Failed authentication challenge"),
            Self::Protocol => write!(f, "Failed to meet protocol"),
            Self::PeerDead => write!(f, "Connection timeout"),
            Self::IdleTimeout => write!(f, "Idle Timeout"),
            Self::ConnectTime => write!(f, "Max connect time reached"),
            Self::Loopback => write!(f, "Loopback detected"),
            Self::Unknown(code) => write!(f, "Unknown error code {code}"),
        }
    }
}

/// Callbacks the bridge may invoke while the worker is calling into it
pub trait PppHost {
    /// Transmit `data` on the modem link; returns bytes actually sent
    fn output(&mut self, data: &[u8]) -> usize;

    /// Report a link status change
    fn status(&mut self, status: PppStatus);
}

/// External PPP machinery driven by the worker
pub trait PppBridge: Send {
    /// Raw bytes received from the modem
    fn feed(&mut self, data: &[u8], host: &mut dyn PppHost);

    /// Make this link the default route
    fn set_default(&mut self);

    /// Configure authentication
    fn set_auth(&mut self, auth: PppAuth, user: &str, password: &str);

    /// Start negotiating the session
    fn connect(&mut self, host: &mut dyn PppHost);

    /// Close the session; reason 0 is a normal close
    fn close(&mut self, reason: u8, host: &mut dyn PppHost);
}

/// Last status reported by the bridge, shared with modem handles
pub type SharedPppStatus = Arc<Mutex<Option<PppStatus>>>;

/// [`PppHost`] backed by the worker's transport
pub(crate) struct TransportHost<'a, T: ModemTransport + ?Sized> {
    transport: &'a mut T,
    last_status: &'a SharedPppStatus,
}

impl<'a, T: ModemTransport + ?Sized> TransportHost<'a, T> {
    pub(crate) fn new(transport: &'a mut T, last_status: &'a SharedPppStatus) -> Self {
        Self {
            transport,
            last_status,
        }
    }
}

impl<T: ModemTransport + ?Sized> PppHost for TransportHost<'_, T> {
    fn output(&mut self, data: &[u8]) -> usize {
        let sent = match self.transport.write(data) {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(error = %e, len = data.len(), "PPP output failed");
                return 0;
            }
        };
        let timeout = wait_duration(data.len(), self.transport.baud_rate());
        if let Err(e) = self.transport.wait_tx_done(timeout) {
            tracing::warn!(error = %e, "PPP output drain failed");
        }
        tracing::trace!(len = sent, data = %hex::encode(data), "PPP tx");
        sent
    }

    fn status(&mut self, status: PppStatus) {
        match status {
            PppStatus::Connected(Some(addrs)) => tracing::info!(
                ip = %addrs.ip,
                gateway = %addrs.gateway,
                netmask = %addrs.netmask,
                "PPP status: {status}"
            ),
            PppStatus::Connected(None) => tracing::info!("PPP status: {status}"),
            _ => tracing::warn!(code = status.code(), "PPP status: {status}"),
        }
        *self.last_status.lock() = Some(status);
    }
}

/// Bridge that only logs. Used when no IP stack is attached.
#[derive(Debug, Default)]
pub struct LoggingBridge {
    received: u64,
}

impl LoggingBridge {
    /// Create a logging bridge
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes fed so far
    pub fn received(&self) -> u64 {
        self.received
    }
}

impl PppBridge for LoggingBridge {
    fn feed(&mut self, data: &[u8], _host: &mut dyn PppHost) {
        self.received += data.len() as u64;
        tracing::debug!(len = data.len(), total = self.received, "PPP rx (no stack attached)");
    }

    fn set_default(&mut self) {
        tracing::debug!("PPP set default route");
    }

    fn set_auth(&mut self, auth: PppAuth, user: &str, _password: &str) {
        tracing::debug!(?auth, user, "PPP set auth");
    }

    fn connect(&mut self, _host: &mut dyn PppHost) {
        tracing::info!("PPP connect requested (no stack attached)");
    }

    fn close(&mut self, reason: u8, host: &mut dyn PppHost) {
        tracing::info!(reason, "PPP close requested");
        host.status(PppStatus::User);
    }
}
