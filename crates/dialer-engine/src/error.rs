use thiserror::Error;

/// Error types for power dialer operations
///
/// Covers everything from run lifecycle problems to telephony provider
/// failures and persistence errors.
///
/// # Examples
///
/// ```
/// use dialer_engine::{DialerError, Result};
///
/// fn start() -> Result<()> {
///     Err(DialerError::run("another run is already active for this list"))
/// }
///
/// match start() {
///     Ok(_) => println!("run started"),
///     Err(DialerError::Run(msg)) => println!("run error: {}", msg),
///     Err(e) => println!("other error: {}", e),
/// }
/// ```
#[derive(Error, Debug)]
pub enum DialerError {
    /// Run lifecycle errors
    ///
    /// Invalid lifecycle transitions, duplicate runs for a list, or
    /// operations against a run that no longer exists.
    #[error("Run error: {0}")]
    Run(String),

    /// Call leg errors
    ///
    /// Problems acting on an individual outbound call attempt, such as a
    /// lookup of a leg that has already been finalized.
    #[error("Leg error: {0}")]
    Leg(String),

    /// Telephony provider errors
    ///
    /// The provider rejected or failed an outbound request (create call,
    /// hangup, conference operations). These are never retried.
    #[error("Telephony error: {0}")]
    Telephony(String),

    /// Conference bridge errors
    ///
    /// Conference creation, softphone dial-out, or join failures. Bridge
    /// failures leave the winning call connected but silent, so these are
    /// usually logged rather than propagated.
    #[error("Bridge error: {0}")]
    Bridge(String),

    /// Database operation errors
    #[error("Database error: {0}")]
    Database(String),

    /// Configuration validation errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Invalid input from the control surface or a webhook
    ///
    /// Includes malformed correlation tokens, which are rejected before
    /// any state lookup.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Requested run, leg, or queue entry could not be located
    #[error("Not found: {0}")]
    NotFound(String),

    /// Unexpected internal errors that indicate a bug
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<anyhow::Error> for DialerError {
    fn from(err: anyhow::Error) -> Self {
        // The database layer reports through anyhow; anything else
        // arriving this way is unexpected.
        Self::Database(err.to_string())
    }
}

impl DialerError {
    /// Create a new Run error with the provided message
    pub fn run<S: Into<String>>(msg: S) -> Self {
        Self::Run(msg.into())
    }

    /// Create a new Leg error with the provided message
    pub fn leg<S: Into<String>>(msg: S) -> Self {
        Self::Leg(msg.into())
    }

    /// Create a new Telephony error with the provided message
    pub fn telephony<S: Into<String>>(msg: S) -> Self {
        Self::Telephony(msg.into())
    }

    /// Create a new Bridge error with the provided message
    pub fn bridge<S: Into<String>>(msg: S) -> Self {
        Self::Bridge(msg.into())
    }

    /// Create a new Database error with the provided message
    pub fn database<S: Into<String>>(msg: S) -> Self {
        Self::Database(msg.into())
    }

    /// Create a new Configuration error with the provided message
    pub fn configuration<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create a new InvalidInput error with the provided message
    pub fn invalid_input<S: Into<String>>(msg: S) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create a new NotFound error with the provided message
    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a new Internal error with the provided message
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }
}

/// Result type for dialer operations
pub type Result<T> = std::result::Result<T, DialerError>;
