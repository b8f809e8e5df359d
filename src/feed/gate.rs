//! Corruption heuristics for a parsed feed.
//!
//! The feed comes from a third party over HTTPS with no signature, so these
//! thresholds are the only integrity check. They stay low and fail closed.

use super::FeedParseResult;
use crate::error::SanityError;

/// Minimum number of valid entries a feed must contain.
pub const DEFAULT_MIN_VALID: usize = 3;

/// Maximum number of invalid lines a feed may contain.
pub const DEFAULT_MAX_INVALID: usize = 3;

/// Sanity gate applied to every parsed feed before it is used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedSanityGate {
    min_valid: usize,
    max_invalid: usize,
}

impl Default for FeedSanityGate {
    fn default() -> Self {
        Self {
            min_valid: DEFAULT_MIN_VALID,
            max_invalid: DEFAULT_MAX_INVALID,
        }
    }
}

impl FeedSanityGate {
    /// Create a gate with custom thresholds.
    pub fn new(min_valid: usize, max_invalid: usize) -> Self {
        Self {
            min_valid,
            max_invalid,
        }
    }

    /// Minimum valid entries.
    pub fn min_valid(&self) -> usize {
        self.min_valid
    }

    /// Maximum invalid lines.
    pub fn max_invalid(&self) -> usize {
        self.max_invalid
    }

    /// Check a parse result.
    ///
    /// The too-few check runs first, so a feed failing both reports
    /// [`SanityError::TooFewValid`].
    pub fn check(&self, result: &FeedParseResult) -> Result<(), SanityError> {
        let valid = result.valid_count();
        if valid < self.min_valid {
            return Err(SanityError::TooFewValid { valid });
        }

        if result.invalid_count > self.max_invalid {
            return Err(SanityError::TooManyInvalid {
                invalid: result.invalid_count,
            });
        }

        Ok(())
    }
}
