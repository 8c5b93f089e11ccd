//! Error handling types

use thiserror::Error;

/// Result type alias for operations that can fail
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the Warden enforcement core
#[derive(Error, Debug)]
pub enum Error {
    /// I/O operation error
    #[error("I/O error: {source}")]
    Io {
        /// The underlying I/O error
        #[from]
        source: std::io::Error,
    },

    /// Persistence layer error
    #[error("Database error: {message}")]
    Database {
        /// Description of the database error
        message: String,
        /// Optional source error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Configuration loading or validation error
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error
        message: String,
    },

    /// Invalid persisted record (dropped during rule compilation)
    #[error("Invalid rule record: {message}")]
    InvalidRule {
        /// Description of what is wrong with the record
        message: String,
    },

    /// Pattern failed to compile into a matcher
    #[error("Pattern compile error for '{pattern}': {message}")]
    PatternCompile {
        /// The pattern that failed to compile
        pattern: String,
        /// The compilation error message
        message: String,
    },

    /// DNS wire-format error
    #[error("DNS message error: {message}")]
    Dns {
        /// Description of the DNS error
        message: String,
    },

    /// Process sampling failed
    #[error("Process sampler error: {message}")]
    Sampler {
        /// Description of the sampler fault
        message: String,
    },

    /// Process termination failed
    #[error("Terminator error for pid {pid}: {message}")]
    Terminator {
        /// Target process id
        pid: u32,
        /// Description of the termination fault
        message: String,
    },

    /// Resource not found
    #[error("Not found: {resource}")]
    NotFound {
        /// The resource that was not found
        resource: String,
    },

    /// Invalid argument provided to a function
    #[error("Invalid argument: {message}")]
    InvalidArgument {
        /// Description of the invalid argument
        message: String,
    },

    /// Operation did not complete before shutdown deadline
    #[error("Shutdown timed out: {message}")]
    ShutdownTimeout {
        /// Description of what failed to drain
        message: String,
    },

    /// Internal invariant violation
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error
        message: String,
    },
}

impl Error {
    /// Create a database error (without source)
    pub fn database<S: Into<String>>(message: S) -> Self {
        Self::Database {
            message: message.into(),
            source: None,
        }
    }

    /// Create a database error (with source)
    pub fn database_with_source<S: Into<String>, E: std::error::Error + Send + Sync + 'static>(
        message: S,
        source: E,
    ) -> Self {
        Self::Database {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an invalid-rule error
    pub fn invalid_rule<S: Into<String>>(message: S) -> Self {
        Self::InvalidRule {
            message: message.into(),
        }
    }

    /// Create a pattern compile error
    pub fn pattern_compile<P: Into<String>, S: Into<String>>(pattern: P, message: S) -> Self {
        Self::PatternCompile {
            pattern: pattern.into(),
            message: message.into(),
        }
    }

    /// Create a DNS wire-format error
    pub fn dns<S: Into<String>>(message: S) -> Self {
        Self::Dns {
            message: message.into(),
        }
    }

    /// Create a sampler error
    pub fn sampler<S: Into<String>>(message: S) -> Self {
        Self::Sampler {
            message: message.into(),
        }
    }

    /// Create a terminator error
    pub fn terminator<S: Into<String>>(pid: u32, message: S) -> Self {
        Self::Terminator {
            pid,
            message: message.into(),
        }
    }

    /// Create a not-found error
    pub fn not_found<S: Into<String>>(resource: S) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    /// Create an invalid-argument error
    pub fn invalid_argument<S: Into<String>>(message: S) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Create a shutdown-timeout error
    pub fn shutdown_timeout<S: Into<String>>(message: S) -> Self {
        Self::ShutdownTimeout {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}
