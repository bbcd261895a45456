//! Error handling for the network diagnostics toolkit

pub mod recovery;

pub use recovery::{retry_with_backoff, RetryPolicy};

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Classified DNS resolution failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DnsFailure {
    /// NXDOMAIN or an empty answer section
    NotFound,
    /// No response within the resolver timeout
    Timeout,
    /// SERVFAIL, REFUSED, or a transport/protocol failure talking to the server
    ServerFailure,
}

impl fmt::Display for DnsFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::NotFound => "NotFound",
            Self::Timeout => "Timeout",
            Self::ServerFailure => "ServerFailure",
        };
        f.write_str(label)
    }
}

/// Custom error types for the diagnostics toolkit
#[derive(Error, Debug, Clone)]
pub enum AppError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Network connectivity errors
    #[error("Network error: {0}")]
    Network(String),

    /// Connection actively refused by the peer
    #[error("Connection refused: {0}")]
    Refused(String),

    /// DNS resolution errors
    #[error("DNS resolution error ({failure}): {message}")]
    Dns { failure: DnsFailure, message: String },

    /// HTTP request errors
    #[error("HTTP request error: {0}")]
    HttpRequest(String),

    /// Non-2xx HTTP response
    #[error("HTTP status {status} from {url}")]
    HttpStatus { status: u16, url: String },

    /// Timeout errors
    #[error("Timeout error: {0}")]
    Timeout(String),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// I/O errors (file operations, OS APIs)
    #[error("I/O error: {0}")]
    Io(String),

    /// Parsing errors (URLs, JSON, coordinates, etc.)
    #[error("Parsing error: {0}")]
    Parse(String),

    /// Every provider in a fallback chain failed
    #[error("all_providers_failed: {attempted} provider(s) tried")]
    ProvidersExhausted { attempted: usize },

    /// A required upstream result is not available
    #[error("Unavailable: {0}")]
    Unavailable(String),

    /// Probe aborted through its cancellation token
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// A full scan is already running
    #[error("A full scan is already running")]
    ScanInProgress,

    /// Generic internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Serializable classification stored with failed probe results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorClass {
    /// The operation or a DNS query ran out of time
    Timeout,
    /// The name does not exist
    NotFound,
    /// The DNS server answered with a failure
    ServerFailure,
    /// The remote side refused the connection
    Refused,
    /// No provider or backend could serve the request
    Unavailable,
    /// Connectivity failure below HTTP
    Network,
    /// The HTTP request failed or returned an error status
    Http,
    /// A response or command output could not be understood
    Parse,
    /// The probe was cancelled before it finished
    Cancelled,
    /// Configuration or argument error
    InvalidInput,
    /// Local file or process error
    Io,
    /// Anything else
    Internal,
}

impl AppError {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config(message.into())
    }

    /// Create a new network error
    pub fn network<S: Into<String>>(message: S) -> Self {
        Self::Network(message.into())
    }

    /// Create a new connection-refused error
    pub fn refused<S: Into<String>>(message: S) -> Self {
        Self::Refused(message.into())
    }

    /// Create a new classified DNS error
    pub fn dns<S: Into<String>>(failure: DnsFailure, message: S) -> Self {
        Self::Dns { failure, message: message.into() }
    }

    /// Create a new HTTP request error
    pub fn http_request<S: Into<String>>(message: S) -> Self {
        Self::HttpRequest(message.into())
    }

    /// Create a new HTTP status error
    pub fn http_status<S: Into<String>>(status: u16, url: S) -> Self {
        Self::HttpStatus { status, url: url.into() }
    }

    /// Create a new timeout error
    pub fn timeout<S: Into<String>>(message: S) -> Self {
        Self::Timeout(message.into())
    }

    /// Create a new validation error
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation(message.into())
    }

    /// Create a new I/O error
    pub fn io<S: Into<String>>(message: S) -> Self {
        Self::Io(message.into())
    }

    /// Create a new parsing error
    pub fn parse<S: Into<String>>(message: S) -> Self {
        Self::Parse(message.into())
    }

    /// Create a new unavailable error
    pub fn unavailable<S: Into<String>>(message: S) -> Self {
        Self::Unavailable(message.into())
    }

    /// Create a new cancellation error
    pub fn cancelled<S: Into<String>>(message: S) -> Self {
        Self::Cancelled(message.into())
    }

    /// Create a new internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal(message.into())
    }

    /// Get error category for logging and reporting
    pub fn category(&self) -> &'static str {
        match self {
            Self::Config(_) => "CONFIG",
            Self::Network(_) => "NETWORK",
            Self::Refused(_) => "REFUSED",
            Self::Dns { .. } => "DNS",
            Self::HttpRequest(_) | Self::HttpStatus { .. } => "HTTP",
            Self::Timeout(_) => "TIMEOUT",
            Self::Validation(_) => "VALIDATION",
            Self::Io(_) => "IO",
            Self::Parse(_) => "PARSE",
            Self::ProvidersExhausted { .. } | Self::Unavailable(_) => "UNAVAILABLE",
            Self::Cancelled(_) => "CANCELLED",
            Self::ScanInProgress => "BUSY",
            Self::Internal(_) => "INTERNAL",
        }
    }

    /// Classification recorded in a failed probe result
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Timeout(_) => ErrorClass::Timeout,
            Self::Dns { failure: DnsFailure::Timeout, .. } => ErrorClass::Timeout,
            Self::Dns { failure: DnsFailure::NotFound, .. } => ErrorClass::NotFound,
            Self::Dns { failure: DnsFailure::ServerFailure, .. } => ErrorClass::ServerFailure,
            Self::Refused(_) => ErrorClass::Refused,
            Self::ProvidersExhausted { .. } | Self::Unavailable(_) | Self::ScanInProgress => {
                ErrorClass::Unavailable
            }
            Self::Network(_) => ErrorClass::Network,
            Self::HttpRequest(_) | Self::HttpStatus { .. } => ErrorClass::Http,
            Self::Parse(_) => ErrorClass::Parse,
            Self::Cancelled(_) => ErrorClass::Cancelled,
            Self::Config(_) | Self::Validation(_) => ErrorClass::InvalidInput,
            Self::Io(_) => ErrorClass::Io,
            Self::Internal(_) => ErrorClass::Internal,
        }
    }

    /// Check if error is transient and worth retrying
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Network(_) | Self::HttpRequest(_) | Self::Timeout(_) => true,
            Self::Dns { failure, .. } => *failure != DnsFailure::NotFound,
            Self::HttpStatus { status, .. } => *status >= 500 || *status == 429,
            Self::Config(_) | Self::Validation(_) | Self::Parse(_) | Self::Refused(_) => false,
            Self::Io(_) | Self::ProvidersExhausted { .. } | Self::Unavailable(_) => false,
            Self::Cancelled(_) | Self::ScanInProgress | Self::Internal(_) => false,
        }
    }

    /// Get user-friendly error message with suggestions
    pub fn user_friendly_message(&self) -> String {
        match self {
            Self::Config(msg) | Self::Validation(msg) => {
                format!("Configuration problem: {}\n\nSuggestion: Check your .env file or command line arguments.", msg)
            }
            Self::Network(msg) | Self::Refused(msg) => {
                format!("Network connectivity issue: {}\n\nSuggestion: Check your internet connection and try again.", msg)
            }
            Self::Dns { failure, message } => {
                format!("DNS lookup failed ({}): {}\n\nSuggestion: Check that the domain exists or try again with another resolver.", failure, message)
            }
            Self::HttpRequest(msg) => {
                format!("HTTP request failed: {}\n\nSuggestion: The provider may be down or rate limiting requests.", msg)
            }
            Self::HttpStatus { status, url } => {
                format!("Provider {} answered with status {}\n\nSuggestion: The provider may be rate limiting requests; wait a moment and retry.", url, status)
            }
            Self::Timeout(msg) => {
                format!("Request timed out: {}\n\nSuggestion: Increase the timeout values or check your network connection.", msg)
            }
            Self::ProvidersExhausted { attempted } => {
                format!("None of the {} configured providers answered.\n\nSuggestion: Check connectivity or configure additional providers.", attempted)
            }
            Self::ScanInProgress => {
                "A full scan is already running.\n\nSuggestion: Wait for it to finish before starting another.".to_string()
            }
            other => other.to_string(),
        }
    }

    /// Get exit code for this error type
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) | Self::Validation(_) | Self::Parse(_) => 1,
            Self::Network(_) | Self::Refused(_) | Self::Dns { .. } => 2,
            Self::HttpRequest(_) | Self::HttpStatus { .. } => 2,
            Self::ProvidersExhausted { .. } | Self::Unavailable(_) => 2,
            Self::Timeout(_) => 3,
            Self::Io(_) => 5,
            Self::Cancelled(_) | Self::ScanInProgress => 6,
            Self::Internal(_) => 99,
        }
    }

    /// Format error for console display with color coding
    pub fn format_for_console(&self, use_color: bool) -> String {
        let category = self.category();
        let message = self.to_string();

        if use_color {
            use colored::Colorize;
            match self {
                Self::Config(_) | Self::Validation(_) | Self::Parse(_) => {
                    format!("[{}] {}", category.red().bold(), message.red())
                }
                Self::Timeout(_) => {
                    format!("[{}] {}", category.blue().bold(), message.blue())
                }
                Self::Internal(_) => {
                    format!("[{}] {}", category.bright_red().bold(), message.bright_red())
                }
                _ => {
                    format!("[{}] {}", category.yellow().bold(), message.yellow())
                }
            }
        } else {
            format!("[{}] {}", category, message)
        }
    }
}

// Standard library error conversions

/// Timed-out and refused I/O keep their own classes; everything else is `Io`
impl From<std::io::Error> for AppError {
    fn from(error: std::io::Error) -> Self {
        match error.kind() {
            std::io::ErrorKind::TimedOut => Self::timeout(error.to_string()),
            std::io::ErrorKind::ConnectionRefused => Self::refused(error.to_string()),
            _ => Self::io(error.to_string()),
        }
    }
}

impl From<url::ParseError> for AppError {
    fn from(error: url::ParseError) -> Self {
        Self::parse(format!("URL parse error: {}", error))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(error: serde_json::Error) -> Self {
        Self::parse(format!("JSON parse error: {}", error))
    }
}

/// Classify a reqwest failure by what went wrong, status errors first
impl From<reqwest::Error> for AppError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::timeout(error.to_string())
        } else if let Some(status) = error.status() {
            let url = error.url().map(|u| u.to_string()).unwrap_or_default();
            Self::http_status(status.as_u16(), url)
        } else if error.is_connect() || error.is_request() {
            Self::network(error.to_string())
        } else if error.is_decode() {
            Self::parse(error.to_string())
        } else {
            Self::http_request(error.to_string())
        }
    }
}

/// Resolver errors become [`AppError::Dns`] with the classified failure
impl From<trust_dns_resolver::error::ResolveError> for AppError {
    fn from(error: trust_dns_resolver::error::ResolveError) -> Self {
        let failure = crate::dns::classify_resolve_error(&error);
        Self::dns(failure, error.to_string())
    }
}

impl From<dotenv::Error> for AppError {
    fn from(error: dotenv::Error) -> Self {
        Self::config(format!("Environment file error: {}", error))
    }
}

impl From<std::num::ParseIntError> for AppError {
    fn from(error: std::num::ParseIntError) -> Self {
        Self::parse(format!("Integer parse error: {}", error))
    }
}

impl From<std::num::ParseFloatError> for AppError {
    fn from(error: std::num::ParseFloatError) -> Self {
        Self::parse(format!("Float parse error: {}", error))
    }
}

impl From<std::net::AddrParseError> for AppError {
    fn from(error: std::net::AddrParseError) -> Self {
        Self::parse(format!("IP address parse error: {}", error))
    }
}

/// Custom Result type for the application
///
/// Every fallible operation in the crate returns this alias so `?` converts
/// library errors through the `From` impls above.
pub type Result<T> = std::result::Result<T, AppError>;

/// Error context trait for adding context to errors
///
/// Works on any result whose error converts into [`AppError`]. The context
/// is prefixed to the message while the variant, and so the recorded
/// [`ErrorClass`], stays the same. Variants without a free-form message
/// become [`AppError::Internal`].
pub trait ErrorContext<T> {
    /// Add context to an error, keeping its classification
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;

    /// Add static context to an error
    fn context(self, message: &'static str) -> Result<T>;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: Into<AppError>,
{
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| {
            let original = e.into();
            let context = f();
            match original {
                AppError::Config(m) => AppError::Config(format!("{}: {}", context, m)),
                AppError::Network(m) => AppError::Network(format!("{}: {}", context, m)),
                AppError::Refused(m) => AppError::Refused(format!("{}: {}", context, m)),
                AppError::Timeout(m) => AppError::Timeout(format!("{}: {}", context, m)),
                AppError::Io(m) => AppError::Io(format!("{}: {}", context, m)),
                AppError::Parse(m) => AppError::Parse(format!("{}: {}", context, m)),
                AppError::Dns { failure, message } => AppError::Dns {
                    failure,
                    message: format!("{}: {}", context, message),
                },
                other => AppError::internal(format!("{}: {}", context, other)),
            }
        })
    }

    fn context(self, message: &'static str) -> Result<T> {
        self.with_context(|| message.to_string())
    }
}

/// Error reporter for user-facing CLI feedback
pub struct ErrorReporter {
    /// Color the category tag and message
    pub use_color: bool,
    /// Also print the suggestion text and retry hint
    pub verbose: bool,
}

impl ErrorReporter {
    /// Create a new error reporter
    pub fn new(use_color: bool, verbose: bool) -> Self {
        Self { use_color, verbose }
    }

    /// Report an error to the user
    pub fn report_error(&self, error: &AppError) {
        eprintln!("{}", error.format_for_console(self.use_color));

        if self.verbose {
            eprintln!();
            eprintln!("{}", error.user_friendly_message());

            if error.is_recoverable() {
                eprintln!();
                eprintln!("This error might be temporary. You can try running the command again.");
            }
        }
    }
}

impl Default for ErrorReporter {
    fn default() -> Self {
        Self::new(true, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let config_error = AppError::config("Invalid configuration");
        assert_eq!(config_error.category(), "CONFIG");
        assert!(!config_error.is_recoverable());
        assert_eq!(config_error.exit_code(), 1);

        let network_error = AppError::network("Connection failed");
        assert_eq!(network_error.category(), "NETWORK");
        assert!(network_error.is_recoverable());
        assert_eq!(network_error.exit_code(), 2);
    }

    #[test]
    fn test_providers_exhausted_display() {
        let error = AppError::ProvidersExhausted { attempted: 3 };
        assert!(error.to_string().starts_with("all_providers_failed"));
        assert_eq!(error.class(), ErrorClass::Unavailable);
        assert!(!error.is_recoverable());
    }

    #[test]
    fn test_dns_classification() {
        let not_found = AppError::dns(DnsFailure::NotFound, "nx");
        assert_eq!(not_found.class(), ErrorClass::NotFound);
        assert!(!not_found.is_recoverable());

        let timeout = AppError::dns(DnsFailure::Timeout, "slow");
        assert_eq!(timeout.class(), ErrorClass::Timeout);
        assert!(timeout.is_recoverable());

        let servfail = AppError::dns(DnsFailure::ServerFailure, "servfail");
        assert_eq!(servfail.class(), ErrorClass::ServerFailure);
        assert!(servfail.to_string().contains("ServerFailure"));
    }

    #[test]
    fn test_http_status_recoverability() {
        assert!(AppError::http_status(503, "http://x").is_recoverable());
        assert!(AppError::http_status(429, "http://x").is_recoverable());
        assert!(!AppError::http_status(404, "http://x").is_recoverable());
        assert_eq!(AppError::http_status(404, "http://x").class(), ErrorClass::Http);
    }

    #[test]
    fn test_io_error_kind_mapping() {
        let refused = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        assert_eq!(AppError::from(refused).class(), ErrorClass::Refused);

        let timed_out = std::io::Error::new(std::io::ErrorKind::TimedOut, "slow");
        assert_eq!(AppError::from(timed_out).class(), ErrorClass::Timeout);

        let other = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        assert_eq!(AppError::from(other).category(), "IO");
    }

    #[test]
    fn test_error_context_keeps_classification() {
        let result: Result<()> = Err(AppError::dns(DnsFailure::NotFound, "nx"));
        let error = result.context("While looking up example.test").unwrap_err();
        assert_eq!(error.class(), ErrorClass::NotFound);
        assert!(error.to_string().contains("While looking up example.test"));

        let result: Result<()> = Err(AppError::ScanInProgress);
        let error = result.context("While starting").unwrap_err();
        assert_eq!(error.category(), "INTERNAL");
    }

    #[test]
    fn test_console_formatting() {
        let error = AppError::config("Test error");
        let formatted_no_color = error.format_for_console(false);
        assert_eq!(formatted_no_color, "[CONFIG] Configuration error: Test error");
        assert!(error.format_for_console(true).contains("Test error"));
    }

    #[test]
    fn test_parse_conversions() {
        let parse_error = "not_a_number".parse::<i32>().unwrap_err();
        assert_eq!(AppError::from(parse_error).category(), "PARSE");

        let addr_error = "not-an-ip".parse::<std::net::IpAddr>().unwrap_err();
        assert!(AppError::from(addr_error).to_string().contains("IP address parse error"));

        let json_error = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert_eq!(AppError::from(json_error).class(), ErrorClass::Parse);
    }

    #[test]
    fn test_dotenv_error_conversion() {
        let dotenv_error = dotenv::Error::LineParse(".env".to_string(), 1);
        let app_error: AppError = dotenv_error.into();
        assert_eq!(app_error.category(), "CONFIG");
    }

    #[test]
    fn test_user_friendly_messages() {
        let message = AppError::ScanInProgress.user_friendly_message();
        assert!(message.contains("Suggestion:"));
        assert_eq!(AppError::ScanInProgress.exit_code(), 6);
    }
}
