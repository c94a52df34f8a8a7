//! Error types for ConsoleCast

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// ConsoleCast error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Serial port error
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// TOML serialization error
    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Capture service transfer failed
    #[error("Capture transfer failed: {0}")]
    Capture(String),

    /// Capture source named in the config does not exist
    #[error("Unknown capture source: {0}")]
    UnknownCaptureSource(String),

    /// Send made no progress within the retry budget
    #[error("Send gave up after {polls} write polls")]
    Backpressure {
        /// Number of write-readiness polls spent before giving up
        polls: u32,
    },

    /// Peer hung up or the connection reported an error
    #[error("Connection closed by peer")]
    Disconnected,

    /// Running flag cleared while an operation was in flight
    #[error("Shutting down")]
    ShuttingDown,

    /// Failed to start a thread
    #[error("Failed to spawn thread {name}: {source}")]
    ThreadSpawn {
        /// Thread name
        name: String,
        /// Underlying spawn error
        source: std::io::Error,
    },

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether this error means the network stack went away (device sleep)
    pub fn is_net_down(&self) -> bool {
        matches!(self, Error::Io(e) if crate::transport::socket::is_net_down(e))
    }
}
