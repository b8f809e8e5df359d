//! Error types for xmlrpc-allowlist.

use thiserror::Error;

/// Error type for ambient operations (storage, configuration, locking).
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing error
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// A sync cycle (or another command holding the state lock) is running
    #[error("a sync cycle is already in progress")]
    SyncInProgress,
}

/// Result type alias for xmlrpc-allowlist operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Why a single IP/CIDR literal was rejected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    /// Empty input
    #[error("empty address")]
    Empty,

    /// Address part is not a dotted-decimal IPv4 address
    #[error("not a dotted-decimal IPv4 address: {0}")]
    InvalidIpv4(String),

    /// Prefix contains something other than decimal digits
    #[error("prefix length must be decimal digits: {0}")]
    NonNumericPrefix(String),

    /// Prefix is outside 0..=32
    #[error("prefix length out of range (0-32): {0}")]
    PrefixOutOfRange(String),
}

/// Why a parsed feed was refused by the sanity gate.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SanityError {
    /// Fewer valid entries than the configured minimum
    #[error("Too few valid IPs ({valid}) - aborting")]
    TooFewValid { valid: usize },

    /// More invalid lines than the configured maximum
    #[error("Too many invalid IPs ({invalid}) - possible data corruption")]
    TooManyInvalid { invalid: usize },
}

/// Why a sync cycle did not complete.
///
/// Every variant is recovered by the orchestrator and turned into an
/// activity-log line plus a persisted status; none of them escape as panics.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncFailure {
    /// Feature switched off by the administrator
    #[error("Sync skipped - disabled")]
    Disabled,

    /// Transport error, non-200 status or empty body
    #[error("Failed to fetch IPs - {cause}")]
    FetchError { cause: String },

    /// Feed had too few valid entries
    #[error("Too few valid IPs ({valid}) - aborting")]
    SanityTooFewValid { valid: usize },

    /// Feed had too many invalid lines
    #[error("Too many invalid IPs ({invalid}) - possible data corruption")]
    SanityTooManyInvalid { invalid: usize },

    /// Remote and custom sources merged to nothing
    #[error("No valid IPs to whitelist")]
    NoValidIps,

    /// Writing the enforcement artifact failed
    #[error("Failed to apply rules - {cause}")]
    ApplyError { cause: String },
}

impl From<SanityError> for SyncFailure {
    fn from(e: SanityError) -> Self {
        match e {
            SanityError::TooFewValid { valid } => SyncFailure::SanityTooFewValid { valid },
            SanityError::TooManyInvalid { invalid } => {
                SyncFailure::SanityTooManyInvalid { invalid }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanity_error_maps_to_failure() {
        let failure: SyncFailure = SanityError::TooFewValid { valid: 2 }.into();
        assert_eq!(failure, SyncFailure::SanityTooFewValid { valid: 2 });

        let failure: SyncFailure = SanityError::TooManyInvalid { invalid: 4 }.into();
        assert_eq!(failure, SyncFailure::SanityTooManyInvalid { invalid: 4 });
    }

    #[test]
    fn test_failure_messages() {
        let failure = SyncFailure::FetchError {
            cause: "IP source returned HTTP 500".to_string(),
        };
        assert_eq!(
            failure.to_string(),
            "Failed to fetch IPs - IP source returned HTTP 500"
        );
        assert_eq!(SyncFailure::Disabled.to_string(), "Sync skipped - disabled");
    }
}
