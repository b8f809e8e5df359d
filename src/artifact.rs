//! Marker-delimited configuration blocks.
//!
//! A block is bounded by `# BEGIN <marker>` and `# END <marker>` lines, so a
//! larger file (such as `.htaccess`) can be edited in place over and over
//! without touching anything outside the block.

use std::fs::{self, OpenOptions};
use std::io;
use std::path::Path;

use crate::error::Result;
use crate::store::atomic_write;

/// Writes enforcement artifacts.
pub trait ArtifactWriter: Send + Sync {
    /// Check that the target file exists.
    fn path_exists(&self, path: &Path) -> bool;

    /// Check that the target file can be written.
    fn is_writable(&self, path: &Path) -> bool;

    /// Replace (or append) the marker block in `path` with `lines`.
    ///
    /// The whole file is rewritten atomically; a failure leaves the old file
    /// in place.
    fn write_marked_block(&self, path: &Path, marker: &str, lines: &[String]) -> Result<()>;

    /// Remove the marker block from `path`. Returns `false` if there was none.
    fn remove_marked_block(&self, path: &Path, marker: &str) -> Result<bool>;

    /// Lines inside the marker block, or `None` if the block is absent.
    fn read_marked_block(&self, path: &Path, marker: &str) -> Option<Vec<String>>;
}

fn begin_line(marker: &str) -> String {
    format!("# BEGIN {}", marker)
}

fn end_line(marker: &str) -> String {
    format!("# END {}", marker)
}

/// Locate the block as `(begin_index, end_index)` line positions.
fn find_block(lines: &[&str], marker: &str) -> Option<(usize, usize)> {
    let begin = begin_line(marker);
    let end = end_line(marker);

    let start = lines.iter().position(|l| l.trim() == begin)?;
    let stop = lines[start + 1..]
        .iter()
        .position(|l| l.trim() == end)
        .map(|offset| start + 1 + offset)?;
    Some((start, stop))
}

/// Line terminator used by `content`; LF unless the file uses CRLF.
fn line_ending(content: &str) -> &'static str {
    if content.contains("\r\n") {
        "\r\n"
    } else {
        "\n"
    }
}

/// Splice a block into `content`.
///
/// `Some(lines)` replaces an existing block or appends a new one at the end;
/// `None` removes the block. Bytes outside the block are kept verbatim, and
/// the block uses the file's own line terminator.
pub fn splice_block(content: &str, marker: &str, block: Option<&[String]>) -> String {
    // Segments keep their terminators, so offsets map straight onto `content`.
    let segments: Vec<&str> = content.split_inclusive('\n').collect();
    let eol = line_ending(content);

    let render = |lines: &[String]| {
        let mut text = String::new();
        for line in std::iter::once(&begin_line(marker))
            .chain(lines)
            .chain(std::iter::once(&end_line(marker)))
        {
            text.push_str(line);
            text.push_str(eol);
        }
        text
    };

    let mut out = String::with_capacity(content.len());
    match find_block(&segments, marker) {
        Some((start, stop)) => {
            let head: usize = segments[..start].iter().map(|s| s.len()).sum();
            let tail = head + segments[start..=stop].iter().map(|s| s.len()).sum::<usize>();

            out.push_str(&content[..head]);
            if let Some(lines) = block {
                let mut text = render(lines);
                // An end marker on the last, unterminated line stays unterminated.
                if !segments[stop].ends_with('\n') {
                    text.truncate(text.len() - eol.len());
                }
                out.push_str(&text);
            }
            out.push_str(&content[tail..]);
        }
        None => {
            out.push_str(content);
            if let Some(lines) = block {
                if !content.is_empty() && !content.ends_with('\n') {
                    out.push_str(eol);
                }
                out.push_str(&render(lines));
            }
        }
    }
    out
}

/// Extract the lines between the markers.
pub fn extract_block(content: &str, marker: &str) -> Option<Vec<String>> {
    let lines: Vec<&str> = content.lines().collect();
    let (start, stop) = find_block(&lines, marker)?;
    Some(lines[start + 1..stop].iter().map(|s| s.to_string()).collect())
}

/// Filesystem-backed artifact writer.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsArtifactWriter;

impl FsArtifactWriter {
    fn rewrite(&self, path: &Path, marker: &str, block: Option<&[String]>) -> Result<()> {
        if !self.path_exists(path) {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} not found", path.display()),
            )
            .into());
        }
        if !self.is_writable(path) {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("{} is not writable", path.display()),
            )
            .into());
        }

        let content = fs::read_to_string(path)?;
        let updated = splice_block(&content, marker, block);
        if updated != content {
            atomic_write(path, updated.as_bytes())?;
        }
        Ok(())
    }
}

impl ArtifactWriter for FsArtifactWriter {
    fn path_exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn is_writable(&self, path: &Path) -> bool {
        // Opening for append checks permissions without changing the file.
        OpenOptions::new().append(true).open(path).is_ok()
    }

    fn write_marked_block(&self, path: &Path, marker: &str, lines: &[String]) -> Result<()> {
        self.rewrite(path, marker, Some(lines))
    }

    fn remove_marked_block(&self, path: &Path, marker: &str) -> Result<bool> {
        let had_block = self.read_marked_block(path, marker).is_some();
        if had_block {
            self.rewrite(path, marker, None)?;
        }
        Ok(had_block)
    }

    fn read_marked_block(&self, path: &Path, marker: &str) -> Option<Vec<String>> {
        let content = fs::read_to_string(path).ok()?;
        extract_block(&content, marker)
    }
}
