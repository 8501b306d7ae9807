//! Frontmatter codec for the structured metadata block of a document.
//!
//! A frontmatter block is a `---` fenced section of flat `key: value` pairs
//! at the very top of a markdown document. The codec preserves everything it
//! does not understand: unknown lines survive a rewrite verbatim, and the
//! document body is never touched.

use std::fmt::Write as _;

/// Frontmatter key holding the linked remote record id.
pub const REMOTE_ID_KEY: &str = "marksync-id";

/// Frontmatter key holding the last successful sync timestamp (RFC 3339).
pub const SYNCED_AT_KEY: &str = "marksync-synced-at";

const FENCE: &str = "---";

/// One line of a frontmatter block.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Line {
    /// A recognized `key: value` pair.
    Pair { key: String, value: String },
    /// Anything else, preserved verbatim.
    Raw(String),
}

/// An ordered, rewrite-safe frontmatter block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Frontmatter {
    lines: Vec<Line>,
}

impl Frontmatter {
    /// Creates an empty block.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the value for a key, if present.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.lines.iter().find_map(|line| match line {
            Line::Pair { key: k, value } if k == key => Some(value.as_str()),
            _ => None,
        })
    }

    /// Sets a key, replacing an existing pair in place or appending.
    pub fn set(&mut self, key: &str, value: &str) {
        for line in &mut self.lines {
            if let Line::Pair { key: k, value: v } = line {
                if k == key {
                    *v = value.to_string();
                    return;
                }
            }
        }
        self.lines.push(Line::Pair {
            key: key.to_string(),
            value: value.to_string(),
        });
    }

    /// Removes a key. Returns true if it was present.
    pub fn remove(&mut self, key: &str) -> bool {
        let before = self.lines.len();
        self.lines.retain(|line| match line {
            Line::Pair { key: k, .. } => k != key,
            Line::Raw(_) => true,
        });
        self.lines.len() != before
    }

    /// Returns true if the block has no lines at all.
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Parses the value of `tags` as a list.
    ///
    /// Accepts `[a, b]` bracket syntax and bare comma-separated values.
    pub fn tags(&self) -> Vec<String> {
        let Some(raw) = self.get("tags") else {
            return Vec::new();
        };
        let raw = raw.trim();
        let raw = raw
            .strip_prefix('[')
            .and_then(|r| r.strip_suffix(']'))
            .unwrap_or(raw);
        raw.split(',')
            .map(|t| t.trim().trim_matches('"').to_string())
            .filter(|t| !t.is_empty())
            .collect()
    }

    fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(FENCE);
        out.push('\n');
        for line in &self.lines {
            match line {
                Line::Pair { key, value } => {
                    let _ = writeln!(out, "{key}: {value}");
                }
                Line::Raw(raw) => {
                    out.push_str(raw);
                    out.push('\n');
                }
            }
        }
        out.push_str(FENCE);
        out.push('\n');
        out
    }
}

/// A document split into its frontmatter block and body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedDocument<'a> {
    /// The metadata block, if the document starts with one.
    pub frontmatter: Option<Frontmatter>,
    /// Everything after the block, byte-for-byte.
    pub body: &'a str,
}

/// Splits a document into frontmatter and body.
///
/// A document without an opening fence on its first line has no
/// frontmatter; the whole content is the body.
pub fn parse(content: &str) -> ParsedDocument<'_> {
    let Some(rest) = content.strip_prefix("---\n") else {
        return ParsedDocument {
            frontmatter: None,
            body: content,
        };
    };

    let mut lines = Vec::new();
    let mut offset = 0usize;
    for line in rest.split_inclusive('\n') {
        let trimmed = line.trim_end_matches(['\n', '\r']);
        if trimmed == FENCE {
            let body = &rest[offset + line.len()..];
            return ParsedDocument {
                frontmatter: Some(Frontmatter { lines }),
                body,
            };
        }
        lines.push(parse_line(trimmed));
        offset += line.len();
    }

    // Unterminated fence: treat the whole document as body.
    ParsedDocument {
        frontmatter: None,
        body: content,
    }
}

fn parse_line(line: &str) -> Line {
    match line.split_once(':') {
        Some((key, value)) if !key.trim().is_empty() => Line::Pair {
            key: key.trim().to_string(),
            value: value.trim().to_string(),
        },
        _ => Line::Raw(line.to_string()),
    }
}

/// Rewrites a document with the given keys set, preserving the body and any
/// other frontmatter lines. Creates the block if the document has none.
pub fn upsert_fields(content: &str, fields: &[(&str, &str)]) -> String {
    let parsed = parse(content);
    let mut fm = parsed.frontmatter.unwrap_or_default();
    for (key, value) in fields {
        fm.set(key, value);
    }
    format!("{}{}", fm.render(), parsed.body)
}

/// Rewrites a document's body, keeping the frontmatter block intact.
pub fn replace_body(content: &str, body: &str) -> String {
    match parse(content).frontmatter {
        Some(fm) => format!("{}{}", fm.render(), body),
        None => body.to_string(),
    }
}

/// Returns the linked remote record id, if the document carries one.
pub fn remote_id(content: &str) -> Option<String> {
    parse(content)
        .frontmatter?
        .get(REMOTE_ID_KEY)
        .map(str::to_string)
}

/// Returns the document title: the `title` key if present, otherwise the
/// file stem of the given path.
pub fn title_or_stem(content: &str, path: &str) -> String {
    if let Some(fm) = parse(content).frontmatter {
        if let Some(title) = fm.get("title") {
            if !title.is_empty() {
                return title.to_string();
            }
        }
    }
    std::path::Path::new(path)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = "---\ntitle: Meeting notes\ntags: [work, weekly]\n---\n# Notes\n\nbody text\n";

    #[test]
    fn parse_splits_block_and_body() {
        let parsed = parse(DOC);
        let fm = parsed.frontmatter.unwrap();
        assert_eq!(fm.get("title"), Some("Meeting notes"));
        assert_eq!(parsed.body, "# Notes\n\nbody text\n");
    }

    #[test]
    fn parse_without_block() {
        let parsed = parse("# Just a doc\n");
        assert!(parsed.frontmatter.is_none());
        assert_eq!(parsed.body, "# Just a doc\n");
    }

    #[test]
    fn parse_unterminated_fence() {
        let content = "---\ntitle: broken\nno closing fence\n";
        let parsed = parse(content);
        assert!(parsed.frontmatter.is_none());
        assert_eq!(parsed.body, content);
    }

    #[test]
    fn tags_bracket_and_bare() {
        let fm = parse(DOC).frontmatter.unwrap();
        assert_eq!(fm.tags(), vec!["work", "weekly"]);

        let parsed = parse("---\ntags: a, b ,c\n---\n");
        assert_eq!(parsed.frontmatter.unwrap().tags(), vec!["a", "b", "c"]);

        let parsed = parse("---\ntitle: x\n---\n");
        assert!(parsed.frontmatter.unwrap().tags().is_empty());
    }

    #[test]
    fn upsert_preserves_body_and_unknown_lines() {
        let content = "---\ntitle: X\n# a comment line\n---\nBody stays.\n";
        let updated = upsert_fields(content, &[(REMOTE_ID_KEY, "rec-1")]);

        let parsed = parse(&updated);
        let fm = parsed.frontmatter.unwrap();
        assert_eq!(fm.get("title"), Some("X"));
        assert_eq!(fm.get(REMOTE_ID_KEY), Some("rec-1"));
        assert_eq!(parsed.body, "Body stays.\n");
        assert!(updated.contains("# a comment line\n"));
    }

    #[test]
    fn upsert_creates_block() {
        let updated = upsert_fields("plain body\n", &[(REMOTE_ID_KEY, "rec-2")]);
        assert_eq!(remote_id(&updated), Some("rec-2".to_string()));
        assert_eq!(parse(&updated).body, "plain body\n");
    }

    #[test]
    fn upsert_replaces_in_place() {
        let content = "---\nmarksync-id: old\ntitle: T\n---\nb\n";
        let updated = upsert_fields(content, &[(REMOTE_ID_KEY, "new")]);
        assert_eq!(remote_id(&updated), Some("new".to_string()));
        // Key order is stable.
        assert!(updated.starts_with("---\nmarksync-id: new\ntitle: T\n---\n"));
    }

    #[test]
    fn replace_body_keeps_frontmatter() {
        let updated = replace_body(DOC, "pulled content\n");
        let parsed = parse(&updated);
        assert_eq!(parsed.body, "pulled content\n");
        assert_eq!(
            parsed.frontmatter.unwrap().get("title"),
            Some("Meeting notes")
        );
    }

    #[test]
    fn title_falls_back_to_stem() {
        assert_eq!(title_or_stem(DOC, "notes/x.md"), "Meeting notes");
        assert_eq!(title_or_stem("no block\n", "notes/daily plan.md"), "daily plan");
    }

    #[test]
    fn remove_key() {
        let mut fm = parse(DOC).frontmatter.unwrap();
        assert!(fm.remove("tags"));
        assert!(!fm.remove("tags"));
        assert_eq!(fm.get("title"), Some("Meeting notes"));
    }
}
