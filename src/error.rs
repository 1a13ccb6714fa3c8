//! Error types and result definitions for the tuya_lan crate.
//! Includes TinyTuya-style numeric error codes so the HTTP façade and the
//! standalone CLI tool can surface a stable code without depending on the
//! error enum's shape.

use thiserror::Error;

/// Errors surfaced by the codec, controller, and their collaborators.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Standard IO error (connect, read, write, timeout).
    #[error("IO error: {0}")]
    Io(String),

    /// JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(String),

    /// Failed to decrypt a payload (wrong local key, garbled ciphertext).
    #[error("Decryption failed")]
    DecryptionFailed,

    /// Failed to encrypt a payload (oversized output buffer).
    #[error("Encryption failed")]
    EncryptionFailed,

    /// The packet's prefix or suffix did not match the expected constants.
    #[error("Invalid frame")]
    InvalidFrame,

    /// The packet was shorter than its declared length.
    #[error("Truncated frame")]
    TruncatedFrame,

    /// Connecting to the device's TCP port failed or timed out.
    #[error("Socket connection failed")]
    ConnectionFailed,

    /// A command's confirmation window elapsed without a matching response.
    #[error("Command timeout")]
    Timeout,

    /// Config document could not be parsed as JSON.
    #[error("Config parse error: {0}")]
    ConfigParse(String),

    /// Referenced device index does not exist in the device table.
    #[error("Unknown device index {0}")]
    UnknownDevice(usize),
}

pub type Result<T> = std::result::Result<T, CoreError>;

impl From<std::io::Error> for CoreError {
    fn from(err: std::io::Error) -> Self {
        CoreError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::Json(err.to_string())
    }
}

impl CoreError {
    /// TinyTuya-style numeric error code for collaborators that need a
    /// stable machine-readable identifier instead of matching the variant.
    pub fn code(&self) -> u32 {
        match self {
            CoreError::Json(_) => ERR_JSON,
            CoreError::Io(_) => ERR_CONNECT,
            CoreError::ConnectionFailed => ERR_CONNECT,
            CoreError::Timeout => ERR_TIMEOUT,
            CoreError::DecryptionFailed | CoreError::EncryptionFailed => ERR_KEY_OR_VER,
            CoreError::InvalidFrame | CoreError::TruncatedFrame => ERR_PAYLOAD,
            CoreError::ConfigParse(_) => ERR_CONFIG,
            CoreError::UnknownDevice(_) => ERR_JSON,
        }
    }
}

/// TinyTuya-style numeric error codes, surfaced to the HTTP façade.
pub const ERR_JSON: u32 = 900;
pub const ERR_CONNECT: u32 = 901;
pub const ERR_TIMEOUT: u32 = 902;
pub const ERR_PAYLOAD: u32 = 904;
pub const ERR_OFFLINE: u32 = 905;
pub const ERR_KEY_OR_VER: u32 = 914;
pub const ERR_CONFIG: u32 = 920;

pub fn error_message(code: u32) -> &'static str {
    match code {
        ERR_JSON => "Invalid JSON Response from Device",
        ERR_CONNECT => "Network Error: Unable to Connect",
        ERR_TIMEOUT => "Timeout Waiting for Device",
        ERR_PAYLOAD => "Unexpected Payload from Device",
        ERR_OFFLINE => "Network Error: Device Unreachable",
        ERR_KEY_OR_VER => "Check device key or version",
        ERR_CONFIG => "Invalid Configuration Document",
        _ => "Unknown Error",
    }
}
