//! Web server target kinds and detection.

use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;

/// The kind of web server the rules are rendered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TargetKind {
    /// Apache (or anything reading `.htaccess`)
    Apache,
    /// nginx
    Nginx,
    /// Detection was inconclusive
    #[default]
    Unknown,
}

impl TargetKind {
    /// Parse a target from a string (case-insensitive).
    ///
    /// Returns `Unknown` for unrecognized values, including `auto`.
    pub fn from_str_lossy(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "apache" | "httpd" | "htaccess" => TargetKind::Apache,
            "nginx" => TargetKind::Nginx,
            _ => TargetKind::Unknown,
        }
    }

    /// Resolve `Unknown` to the Apache fallback.
    pub fn effective(self) -> Self {
        match self {
            TargetKind::Unknown => TargetKind::Apache,
            other => other,
        }
    }

    /// Whether the core can write rules for this target itself.
    pub fn supports_direct_apply(self) -> bool {
        matches!(self.effective(), TargetKind::Apache)
    }

    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetKind::Apache => "apache",
            TargetKind::Nginx => "nginx",
            TargetKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for TargetKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match TargetKind::from_str_lossy(s) {
            TargetKind::Unknown => Err(()),
            kind => Ok(kind),
        }
    }
}

/// Capability for working out which server will enforce the rules.
pub trait TargetDetector: Send + Sync {
    /// Detect the target. `Unknown` means "fall back to Apache".
    fn detect(&self) -> TargetKind;
}

/// Detector that always reports the same target.
#[derive(Debug, Clone, Copy)]
pub struct FixedTarget(pub TargetKind);

impl TargetDetector for FixedTarget {
    fn detect(&self) -> TargetKind {
        self.0
    }
}

static NGINX_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(nginx|openresty|tengine)\b").expect("static regex")
});

// LiteSpeed and OpenLiteSpeed honour .htaccess, so they count as Apache.
static APACHE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(apache|httpd|litespeed|openlitespeed)\b").expect("static regex")
});

/// Heuristic probe of a server identity string (e.g. `SERVER_SOFTWARE`).
#[derive(Debug, Clone, Default)]
pub struct ServerSoftwareProbe {
    software: Option<String>,
}

impl ServerSoftwareProbe {
    /// Environment variable read by [`ServerSoftwareProbe::from_env`].
    pub const ENV_VAR: &'static str = "SERVER_SOFTWARE";

    /// Probe a given identity string.
    pub fn new(software: impl Into<String>) -> Self {
        Self {
            software: Some(software.into()),
        }
    }

    /// Probe the `SERVER_SOFTWARE` environment variable.
    pub fn from_env() -> Self {
        Self {
            software: std::env::var(Self::ENV_VAR).ok(),
        }
    }
}

impl TargetDetector for ServerSoftwareProbe {
    fn detect(&self) -> TargetKind {
        let Some(software) = self.software.as_deref() else {
            return TargetKind::Unknown;
        };

        if NGINX_PATTERN.is_match(software) {
            TargetKind::Nginx
        } else if APACHE_PATTERN.is_match(software) {
            TargetKind::Apache
        } else {
            TargetKind::Unknown
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_from_str() {
        assert_eq!(TargetKind::from_str_lossy("APACHE"), TargetKind::Apache);
        assert_eq!(TargetKind::from_str_lossy("nginx"), TargetKind::Nginx);
        assert_eq!(TargetKind::from_str_lossy("auto"), TargetKind::Unknown);
        assert_eq!("Nginx".parse::<TargetKind>(), Ok(TargetKind::Nginx));
        assert!("iis".parse::<TargetKind>().is_err());
    }

    #[test]
    fn test_unknown_falls_back_to_apache() {
        assert_eq!(TargetKind::Unknown.effective(), TargetKind::Apache);
        assert_eq!(TargetKind::Nginx.effective(), TargetKind::Nginx);
        assert!(TargetKind::Unknown.supports_direct_apply());
        assert!(!TargetKind::Nginx.supports_direct_apply());
    }

    #[test]
    fn test_probe_detection() {
        assert_eq!(
            ServerSoftwareProbe::new("nginx/1.24.0").detect(),
            TargetKind::Nginx
        );
        assert_eq!(
            ServerSoftwareProbe::new("Apache/2.4.58 (Ubuntu)").detect(),
            TargetKind::Apache
        );
        assert_eq!(
            ServerSoftwareProbe::new("LiteSpeed").detect(),
            TargetKind::Apache
        );
        assert_eq!(
            ServerSoftwareProbe::new("Microsoft-IIS/10.0").detect(),
            TargetKind::Unknown
        );
        assert_eq!(ServerSoftwareProbe::default().detect(), TargetKind::Unknown);
    }

    #[test]
    fn test_fixed_target() {
        assert_eq!(FixedTarget(TargetKind::Nginx).detect(), TargetKind::Nginx);
    }

    #[test]
    fn test_display() {
        assert_eq!(TargetKind::Apache.to_string(), "apache");
        assert_eq!(TargetKind::Unknown.to_string(), "unknown");
    }
}
