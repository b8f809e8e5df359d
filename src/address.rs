//! IPv4 address / CIDR literal validation.
//!
//! Literals are validated strictly and then kept verbatim: `192.168.1.1/16`
//! is accepted and stays `192.168.1.1/16`, host bits are never masked off.
//! Deduplication elsewhere in the crate works on the literal text.

use ipnet::Ipv4Net;
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use crate::error::AddressError;

/// Largest IPv4 prefix length.
pub const MAX_PREFIX_LEN: u8 = 32;

/// A validated IPv4 address or CIDR range, remembered by its literal text.
///
/// # Examples
/// ```
/// use xmlrpc_allowlist::AddressEntry;
///
/// let entry: AddressEntry = "192.0.80.0/20".parse().unwrap();
/// assert_eq!(entry.prefix_len(), 20);
/// assert_eq!(entry.literal(), "192.0.80.0/20");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AddressEntry {
    literal: String,
    net: Ipv4Net,
}

impl AddressEntry {
    /// Parse and validate a literal.
    ///
    /// No whitespace is tolerated anywhere. The text is split on the first
    /// `/`; whatever follows must be decimal digits only (a second `/` fails
    /// that check) and lie in `0..=32`.
    pub fn parse(candidate: &str) -> Result<Self, AddressError> {
        if candidate.is_empty() {
            return Err(AddressError::Empty);
        }

        let (addr_part, prefix_part) = match candidate.split_once('/') {
            Some((addr, prefix)) => (addr, Some(prefix)),
            None => (candidate, None),
        };

        let addr = Ipv4Addr::from_str(addr_part)
            .map_err(|_| AddressError::InvalidIpv4(addr_part.to_string()))?;

        let prefix_len = match prefix_part {
            Some(prefix) => parse_prefix(prefix)?,
            None => MAX_PREFIX_LEN,
        };

        let net = Ipv4Net::new(addr, prefix_len)
            .map_err(|_| AddressError::PrefixOutOfRange(prefix_len.to_string()))?;

        Ok(Self {
            literal: candidate.to_string(),
            net,
        })
    }

    /// The literal exactly as it was supplied.
    pub fn literal(&self) -> &str {
        &self.literal
    }

    /// The address part as an integer, host bits preserved.
    pub fn network(&self) -> u32 {
        u32::from(self.net.addr())
    }

    /// Prefix length (32 for a bare address).
    pub fn prefix_len(&self) -> u8 {
        self.net.prefix_len()
    }

    /// Whether the literal carried an explicit `/prefix`.
    pub fn has_prefix(&self) -> bool {
        self.literal.contains('/')
    }

    /// Check whether `ip` falls inside this range.
    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        self.net.contains(&ip)
    }

    /// Consume the entry, returning its literal.
    pub fn into_literal(self) -> String {
        self.literal
    }
}

impl FromStr for AddressEntry {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for AddressEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.literal)
    }
}

impl AsRef<str> for AddressEntry {
    fn as_ref(&self) -> &str {
        &self.literal
    }
}

fn parse_prefix(prefix: &str) -> Result<u8, AddressError> {
    if prefix.is_empty() || !prefix.bytes().all(|b| b.is_ascii_digit()) {
        return Err(AddressError::NonNumericPrefix(prefix.to_string()));
    }

    // Digits only, so a parse failure can only mean overflow.
    match prefix.parse::<u32>() {
        Ok(value) if value <= u32::from(MAX_PREFIX_LEN) => Ok(value as u8),
        _ => Err(AddressError::PrefixOutOfRange(prefix.to_string())),
    }
}

/// Check whether `candidate` is a valid IPv4 address with an optional
/// `/0`..`/32` suffix.
///
/// # Examples
/// ```
/// use xmlrpc_allowlist::validate;
///
/// assert!(validate("10.0.0.0/8"));
/// assert!(!validate("10.0.0.0/33"));
/// assert!(!validate(" 10.0.0.1"));
/// assert!(!validate("::1"));
/// ```
pub fn validate(candidate: &str) -> bool {
    AddressEntry::parse(candidate).is_ok()
}

/// Same as [`validate`], with a missing value treated as invalid.
pub fn validate_opt(candidate: Option<&str>) -> bool {
    candidate.map(validate).unwrap_or(false)
}
