//! Newline-delimited IP feed parser.

use crate::address::AddressEntry;
use crate::error::AddressError;

/// An invalid line found while parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedWarning {
    /// 1-based line number in the raw text
    pub line: usize,
    /// Trimmed line content
    pub content: String,
    /// Why the line was rejected
    pub reason: AddressError,
}

impl FeedWarning {
    /// Activity-log text for this warning.
    pub fn message(&self) -> String {
        format!("WARNING: Skipping invalid IP: {}", self.content)
    }
}

/// Outcome of parsing one feed body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedParseResult {
    /// Valid entries in feed order
    pub valid_entries: Vec<AddressEntry>,
    /// Number of non-blank, non-comment lines that failed validation
    pub invalid_count: usize,
    /// Number of lines in the raw text
    pub total_lines: usize,
    /// One warning per invalid line, in feed order
    pub warnings: Vec<FeedWarning>,
}

impl FeedParseResult {
    /// Number of valid entries.
    pub fn valid_count(&self) -> usize {
        self.valid_entries.len()
    }

    /// Literal text of every valid entry, in feed order.
    pub fn valid_literals(&self) -> Vec<String> {
        self.valid_entries
            .iter()
            .map(|e| e.literal().to_string())
            .collect()
    }
}

/// Feed parser.
///
/// Each line is trimmed; blank lines and lines starting with `#` are
/// skipped, everything else must be an IPv4 address or CIDR literal.
/// Parsing has no side effects: warnings are returned, not logged.
pub struct FeedParser;

impl FeedParser {
    /// Parse raw feed text.
    pub fn parse(raw: &str) -> FeedParseResult {
        let mut result = FeedParseResult::default();

        for (idx, line) in raw.lines().enumerate() {
            result.total_lines += 1;

            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            match AddressEntry::parse(line) {
                Ok(entry) => result.valid_entries.push(entry),
                Err(reason) => {
                    result.invalid_count += 1;
                    result.warnings.push(FeedWarning {
                        line: idx + 1,
                        content: line.to_string(),
                        reason,
                    });
                }
            }
        }

        result
    }

    /// Parse administrator-supplied text, keeping only valid literals.
    ///
    /// Lines are trimmed; blank, comment and invalid lines are dropped.
    pub fn valid_lines(raw: &str) -> Vec<String> {
        Self::parse(raw).valid_literals()
    }
}

/// Normalise custom entry text: keep valid lines only, joined by `\n`.
///
/// # Examples
/// ```
/// use xmlrpc_allowlist::feed::sanitize_custom;
///
/// let text = "1.2.3.4\n# office\n  10.0.0.0/8  \nnope\n";
/// assert_eq!(sanitize_custom(text), "1.2.3.4\n10.0.0.0/8");
/// ```
pub fn sanitize_custom(raw: &str) -> String {
    FeedParser::valid_lines(raw).join("\n")
}
