//! Remote feed handling: line parsing and corruption checks.

mod gate;
mod parser;

pub use gate::{FeedSanityGate, DEFAULT_MAX_INVALID, DEFAULT_MIN_VALID};
pub use parser::{sanitize_custom, FeedParseResult, FeedParser, FeedWarning};
