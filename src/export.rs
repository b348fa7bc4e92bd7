//! Content export for the download action.
//!
//! The sync core treats document content as opaque editor markup; this
//! module is the one place that looks inside it, and only to produce a
//! plain-text rendition. Block-closing tags become newlines, every
//! other tag is stripped, the handful of entities editors emit are
//! decoded, and runs of blank lines collapse to a single break.

use crate::types::RoomId;

/// What the UI asked to download.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportKind {
    PlainText,
    Markup,
}

impl ExportKind {
    pub fn file_name(&self, room: &RoomId) -> String {
        match self {
            Self::PlainText => format!("{room}.txt"),
            Self::Markup => format!("{room}.html"),
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::PlainText => "text/plain",
            Self::Markup => "text/html",
        }
    }
}

/// Tags whose end (or self-closing occurrence) terminates a text block.
const BLOCK_TAGS: &[&str] = &[
    "p", "div", "li", "tr", "br", "h1", "h2", "h3", "h4", "h5", "h6", "blockquote", "pre",
];

/// Strip markup down to plain text.
pub fn plain_text(markup: &str) -> String {
    let mut out = String::with_capacity(markup.len());
    let mut chars = markup.char_indices();

    while let Some((start, c)) = chars.next() {
        if c != '<' {
            out.push(c);
            continue;
        }
        // Consume through the matching '>'; unterminated tags are kept
        // verbatim (the content is opaque, not guaranteed to be HTML).
        let mut end = None;
        for (i, t) in chars.by_ref() {
            if t == '>' {
                end = Some(i);
                break;
            }
        }
        let Some(end) = end else {
            out.push_str(&markup[start..]);
            break;
        };
        let tag = &markup[start + 1..end];
        if is_block_boundary(tag) {
            out.push('\n');
        }
    }

    collapse_blank_runs(&decode_entities(&out))
}

/// Whether a tag body (between `<` and `>`) ends a block: a closing
/// block tag, or a line break in any spelling.
fn is_block_boundary(tag: &str) -> bool {
    let tag = tag.trim();
    let name = tag
        .strip_prefix('/')
        .unwrap_or(tag)
        .trim_end_matches('/')
        .split(|c: char| c.is_whitespace())
        .next()
        .unwrap_or("")
        .to_ascii_lowercase();
    if name == "br" {
        return true;
    }
    tag.starts_with('/') && BLOCK_TAGS.contains(&name.as_str())
}

/// The entity set rich-text editors actually emit.
fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

/// Collapse runs of blank lines to a single newline and trim the ends.
fn collapse_blank_runs(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for line in text.lines() {
        if line.trim().is_empty() {
            continue;
        }
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(line.trim_end());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_inline_tags() {
        assert_eq!(plain_text("<b>bold</b> and <i>italic</i>"), "bold and italic");
    }

    #[test]
    fn test_blocks_become_newlines() {
        assert_eq!(
            plain_text("<p>first</p><p>second</p><div>third</div>"),
            "first\nsecond\nthird"
        );
        assert_eq!(plain_text("one<br>two<br/>three"), "one\ntwo\nthree");
    }

    #[test]
    fn test_blank_runs_collapse() {
        assert_eq!(plain_text("<p>a</p><p></p><p></p><p>b</p>"), "a\nb");
    }

    #[test]
    fn test_entities_decoded() {
        assert_eq!(
            plain_text("a &amp; b &lt;c&gt; &quot;d&quot; e&nbsp;f"),
            "a & b <c> \"d\" e f"
        );
    }

    #[test]
    fn test_plain_content_passes_through() {
        assert_eq!(plain_text("just text"), "just text");
        assert_eq!(plain_text(""), "");
    }

    #[test]
    fn test_unterminated_tag_kept() {
        assert_eq!(plain_text("before <unclosed"), "before <unclosed");
    }

    #[test]
    fn test_export_names() {
        let room = RoomId::parse("shareroom").unwrap();
        assert_eq!(ExportKind::PlainText.file_name(&room), "shareroom.txt");
        assert_eq!(ExportKind::Markup.file_name(&room), "shareroom.html");
        assert_eq!(ExportKind::PlainText.mime_type(), "text/plain");
        assert_eq!(ExportKind::Markup.mime_type(), "text/html");
    }
}
