//! nginx `location` renderer.
//!
//! nginx reads no per-directory files, so this output is only ever offered
//! for manual copy into the server block.

use super::{header_lines, RenderMetadata, RuleRenderer, GUARDED_ENDPOINT};
use crate::allowlist::AllowList;
use crate::target::TargetKind;

/// Renders an exact-match `location` with `allow` lines and `deny all`.
pub struct NginxRenderer;

impl RuleRenderer for NginxRenderer {
    fn kind(&self) -> TargetKind {
        TargetKind::Nginx
    }

    fn render_lines(&self, allow_list: &AllowList, meta: &RenderMetadata) -> Vec<String> {
        if allow_list.is_empty() {
            return Vec::new();
        }

        let mut lines = header_lines(meta);
        lines.push(format!("location = /{} {{", GUARDED_ENDPOINT));
        for entry in allow_list {
            lines.push(format!("    allow {};", entry));
        }
        lines.push("    deny all;".to_string());
        // An exact-match location bypasses the regular PHP location.
        lines.push("    # Pass allowed requests to PHP, matching your main PHP location:".to_string());
        lines.push("    # include fastcgi_params;".to_string());
        lines.push("    # fastcgi_pass unix:/run/php/php-fpm.sock;".to_string());
        lines.push("}".to_string());
        lines
    }
}
