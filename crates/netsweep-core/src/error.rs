//! Error types for the NetSweep core library

use std::io;
use std::net::AddrParseError;
use thiserror::Error;

/// Result type alias for NetSweep operations
pub type Result<T> = std::result::Result<T, Error>;

/// Comprehensive error types for sweep operations
#[derive(Error, Debug)]
pub enum Error {
    /// Network-related errors
    #[error("Network error: {0}")]
    Network(String),

    /// I/O errors with automatic conversion
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Parsing errors for IP addresses, ports, durations
    #[error("Parse error: {0}")]
    Parse(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Storage/backend errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// CIDR literal unparsable or unsupported prefix
    #[error("Invalid CIDR: {0}")]
    InvalidCidr(String),

    /// Prefix length would require a shift width of 63 or more
    #[error("CIDR mask too large: {0}")]
    CidrMaskTooLarge(String),

    /// Integer overflow in target-count pre-allocation
    #[error("Capacity overflow: {0}")]
    CapacityOverflow(String),

    /// Target host is not a valid IPv4 literal
    #[error("Invalid host: {0}")]
    InvalidHost(String),

    /// ICMP socket pool is saturated
    #[error("No available sockets in pool")]
    NoAvailableSockets,

    /// Post-dial read indicates a dead connection
    #[error("Invalid connection: {0}")]
    InvalidConnection(String),

    /// Sub-scanner failed inside the early-error window
    #[error("Scanner failed to start: {0}")]
    ScannerStart(String),

    /// Caller context or component done signal fired
    #[error("Operation cancelled")]
    Cancelled,

    /// One or more sub-components returned errors on stop
    #[error("{}", format_aggregate(.0))]
    Aggregate(Vec<Error>),
}

fn format_aggregate(errors: &[Error]) -> String {
    let parts: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
    format!("{} errors during shutdown: [{}]", errors.len(), parts.join("; "))
}

impl Error {
    /// Collapse a list of errors into a single error.
    ///
    /// Returns `Ok(())` for an empty list, the error itself for a single
    /// entry, and [`Error::Aggregate`] otherwise.
    pub fn aggregate(mut errors: Vec<Error>) -> Result<()> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(Error::Aggregate(errors)),
        }
    }

    /// Whether this error represents cooperative cancellation rather than
    /// a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

impl From<AddrParseError> for Error {
    fn from(err: AddrParseError) -> Self {
        Error::Parse(format!("Invalid IP address: {}", err))
    }
}

impl From<ipnetwork::IpNetworkError> for Error {
    fn from(err: ipnetwork::IpNetworkError) -> Self {
        Error::InvalidCidr(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(format!("TOML parse error: {}", err))
    }
}

impl From<toml::ser::Error> for Error {
    fn from(err: toml::ser::Error) -> Self {
        Error::Config(format!("TOML serialization error: {}", err))
    }
}
