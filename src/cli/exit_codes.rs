//! CLI Exit Codes
//!
//! Standard exit codes for CLI operations and automation.

use crate::config::ConfigError;
use crate::core::modem::ModemError;
use crate::core::transport::TransportError;
use std::process::ExitCode;

/// Exit code constants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitCodes;

impl ExitCodes {
    /// Success
    pub const SUCCESS: u8 = 0;

    /// General error
    pub const ERROR: u8 = 1;

    /// Invalid arguments
    pub const INVALID_ARGS: u8 = 2;

    /// Connection failed
    pub const CONNECTION_FAILED: u8 = 3;

    /// Modem did not answer in time
    pub const TIMEOUT: u8 = 4;

    /// Permission denied
    pub const PERMISSION_DENIED: u8 = 7;

    /// Configuration error
    pub const CONFIG_ERROR: u8 = 8;

    /// Modem answered without the expected marker
    pub const PROTOCOL_ERROR: u8 = 9;

    /// Port not found
    pub const PORT_NOT_FOUND: u8 = 14;

    /// Internal error
    pub const INTERNAL_ERROR: u8 = 127;
}

/// CLI operation result
#[derive(Debug)]
pub enum CliResult {
    /// Success with optional message
    Success(Option<String>),

    /// Error with code and message
    Error(u8, String),
}

impl CliResult {
    /// Plain success
    pub fn success() -> Self {
        Self::Success(None)
    }

    /// Success carrying a message
    pub fn success_with_message(msg: impl Into<String>) -> Self {
        Self::Success(Some(msg.into()))
    }

    /// Error with an explicit code
    pub fn error(code: u8, msg: impl Into<String>) -> Self {
        Self::Error(code, msg.into())
    }

    /// Failed AT transaction. An empty response is a timeout, anything
    /// else is a protocol mismatch.
    pub fn command_failed(response: &[u8]) -> Self {
        if response.is_empty() {
            Self::Error(ExitCodes::TIMEOUT, "No response from modem".to_string())
        } else {
            Self::Error(
                ExitCodes::PROTOCOL_ERROR,
                String::from_utf8_lossy(response).trim().to_string(),
            )
        }
    }

    /// Get exit code
    pub fn code(&self) -> u8 {
        match self {
            Self::Success(_) => ExitCodes::SUCCESS,
            Self::Error(code, _) => *code,
        }
    }

    /// Get message
    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Success(Some(msg)) | Self::Error(_, msg) => Some(msg),
            Self::Success(None) => None,
        }
    }

    /// Convert to `ExitCode`
    pub fn to_exit_code(&self) -> ExitCode {
        ExitCode::from(self.code())
    }

    /// Is success?
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

impl From<TransportError> for CliResult {
    fn from(err: TransportError) -> Self {
        let code = match &err {
            TransportError::PortNotFound(_) => ExitCodes::PORT_NOT_FOUND,
            TransportError::PermissionDenied(_) => ExitCodes::PERMISSION_DENIED,
            TransportError::ConfigError(_) => ExitCodes::CONFIG_ERROR,
            TransportError::ConnectionFailed(_) | TransportError::NotConnected => {
                ExitCodes::CONNECTION_FAILED
            }
            TransportError::IoError(_) => ExitCodes::ERROR,
        };
        Self::Error(code, err.to_string())
    }
}

impl From<ModemError> for CliResult {
    fn from(err: ModemError) -> Self {
        match err {
            ModemError::Transport(e) => e.into(),
            ModemError::Spawn(e) => Self::Error(ExitCodes::INTERNAL_ERROR, e.to_string()),
        }
    }
}

impl From<ConfigError> for CliResult {
    fn from(err: ConfigError) -> Self {
        Self::Error(ExitCodes::CONFIG_ERROR, err.to_string())
    }
}

/// Exit code description
pub fn exit_code_description(code: u8) -> &'static str {
    match code {
        0 => "Success",
        1 => "General error",
        2 => "Invalid arguments",
        3 => "Connection failed",
        4 => "No response from modem",
        7 => "Permission denied",
        8 => "Configuration error",
        9 => "Unexpected modem response",
        14 => "Port not found",
        127 => "Internal error",
        _ => "Unknown error",
    }
}

/// Print exit code table
pub fn print_exit_codes() {
    println!("Exit Codes:");
    for code in [0, 1, 2, 3, 4, 7, 8, 9, 14, 127] {
        println!("  {:>3}  {}", code, exit_code_description(code));
    }
}
