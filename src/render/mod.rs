//! Rule renderers, one per web server syntax.
//!
//! Renderers are pure: the same allow list and metadata always produce the
//! same text, so two renders of one list differ only in the embedded
//! timestamp.

mod apache;
mod nginx;

pub use apache::ApacheRenderer;
pub use nginx::NginxRenderer;

use chrono::{DateTime, Utc};

use crate::activity::TIME_FORMAT;
use crate::allowlist::AllowList;
use crate::target::TargetKind;

/// File name of the guarded endpoint.
pub const GUARDED_ENDPOINT: &str = "xmlrpc.php";

/// Information embedded in a rendered header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderMetadata {
    /// Where the remote list came from
    pub source_url: String,
    /// When the rules were generated
    pub generated_at: DateTime<Utc>,
}

impl RenderMetadata {
    /// Metadata stamped with the current time.
    pub fn now(source_url: impl Into<String>) -> Self {
        Self {
            source_url: source_url.into(),
            generated_at: Utc::now(),
        }
    }
}

/// Renders an allow list into server configuration lines.
pub trait RuleRenderer: Send + Sync {
    /// Which server syntax this renderer produces.
    fn kind(&self) -> TargetKind;

    /// Render the block body, without begin/end markers.
    ///
    /// An empty allow list renders to no lines.
    fn render_lines(&self, allow_list: &AllowList, meta: &RenderMetadata) -> Vec<String>;

    /// Render the block body as text.
    fn render(&self, allow_list: &AllowList, meta: &RenderMetadata) -> String {
        self.render_lines(allow_list, meta).join("\n")
    }
}

/// Pick the renderer for a target; `Unknown` gets the Apache renderer.
pub fn renderer_for(kind: TargetKind) -> Box<dyn RuleRenderer> {
    match kind.effective() {
        TargetKind::Nginx => Box::new(NginxRenderer),
        _ => Box::new(ApacheRenderer),
    }
}

/// The comment header shared by every renderer.
pub(crate) fn header_lines(meta: &RenderMetadata) -> Vec<String> {
    vec![
        format!("# Whitelist IPs for {} access", GUARDED_ENDPOINT),
        format!("# Source: {}", meta.source_url),
        format!("# Last updated: {}", meta.generated_at.format(TIME_FORMAT)),
    ]
}

/// Wrap rendered lines in `# BEGIN <marker>` / `# END <marker>` comments.
///
/// # Examples
/// ```
/// use xmlrpc_allowlist::render::wrap_with_markers;
///
/// let text = wrap_with_markers("Demo", &["line".to_string()]);
/// assert_eq!(text, "# BEGIN Demo\nline\n# END Demo");
/// ```
pub fn wrap_with_markers(marker: &str, lines: &[String]) -> String {
    let mut out = format!("# BEGIN {}\n", marker);
    for line in lines {
        out.push_str(line);
        out.push('\n');
    }
    out.push_str(&format!("# END {}", marker));
    out
}

/// A rendered enforcement artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedArtifact {
    /// Server syntax of the artifact
    pub kind: TargetKind,
    /// Block body lines (no markers)
    pub lines: Vec<String>,
    /// Whether the block was written to the server configuration
    pub applied: bool,
}

impl RenderedArtifact {
    /// Marker-wrapped text, suitable for manual copy/paste.
    pub fn text(&self, marker: &str) -> String {
        wrap_with_markers(marker, &self.lines)
    }
}
