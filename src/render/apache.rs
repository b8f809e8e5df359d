//! Apache `.htaccess` renderer.

use super::{header_lines, RenderMetadata, RuleRenderer, GUARDED_ENDPOINT};
use crate::allowlist::AllowList;
use crate::target::TargetKind;

/// Renders a `<Files>` guard with one `Require ip` line per entry.
pub struct ApacheRenderer;

impl RuleRenderer for ApacheRenderer {
    fn kind(&self) -> TargetKind {
        TargetKind::Apache
    }

    fn render_lines(&self, allow_list: &AllowList, meta: &RenderMetadata) -> Vec<String> {
        if allow_list.is_empty() {
            return Vec::new();
        }

        let mut lines = header_lines(meta);
        lines.push(format!("<Files \"{}\">", GUARDED_ENDPOINT));
        lines.push("    <RequireAny>".to_string());
        for entry in allow_list {
            lines.push(format!("        Require ip {}", entry));
        }
        lines.push("    </RequireAny>".to_string());
        lines.push("    ErrorDocument 403 \"Forbidden\"".to_string());
        lines.push("</Files>".to_string());
        lines
    }
}
