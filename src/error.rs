//! Error types for the intercom link

use thiserror::Error;

/// Main error type for the application
#[derive(Error, Debug)]
pub enum Error {
    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Malformed packet: {0}")]
    Packet(#[from] PacketError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Self-test failed: {0}")]
    SelfTest(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Audio subsystem errors
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to open stream: {0}")]
    StreamError(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Read timed out after {0} ms")]
    Timeout(u64),

    #[error("Device disconnected")]
    Disconnected,
}

/// Codec errors
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Encoder initialization failed: {0}")]
    EncoderInit(String),

    #[error("Decoder initialization failed: {0}")]
    DecoderInit(String),

    #[error("Encoding failed: {0}")]
    EncodingFailed(String),

    #[error("Decoding failed: {0}")]
    DecodingFailed(String),

    #[error("Invalid frame size: {0}")]
    InvalidFrameSize(usize),
}

/// Network errors
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Socket bind failed: {0}")]
    BindFailed(String),

    #[error("Send failed: {0}")]
    SendFailed(#[source] std::io::Error),

    #[error("Receive failed: {0}")]
    ReceiveFailed(#[source] std::io::Error),

    #[error("Local address unavailable: {0}")]
    LocalAddr(#[source] std::io::Error),
}

impl NetworkError {
    /// True for send failures expected while the peer is not reachable yet
    /// (link still associating, base station out of range).
    pub fn is_unreachable(&self) -> bool {
        match self {
            NetworkError::SendFailed(e) => {
                matches!(
                    e.kind(),
                    std::io::ErrorKind::HostUnreachable
                        | std::io::ErrorKind::NetworkUnreachable
                        | std::io::ErrorKind::NetworkDown
                        | std::io::ErrorKind::AddrNotAvailable
                        | std::io::ErrorKind::ConnectionRefused
                )
            }
            _ => false,
        }
    }
}

/// Wire packet rejection reasons
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketError {
    #[error("datagram of {0} bytes is shorter than the header")]
    TooShort(usize),

    #[error("declared payload of {0} bytes exceeds capacity")]
    PayloadTooLarge(usize),

    #[error("declared payload of {declared} bytes but only {available} present")]
    Truncated { declared: usize, available: usize },
}

/// Result type alias for the application
pub type Result<T> = std::result::Result<T, Error>;
