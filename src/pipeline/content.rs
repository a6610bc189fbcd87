//! Text helpers used by the stages.

use std::sync::LazyLock;

use regex::Regex;

/// Heading that separates note content from an appended video transcript.
pub const YOUTUBE_MARKER: &str = "\n\n## YouTube Video: ";

static FRONT_MATTER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^---\n[\s\S]*?\n---\n").unwrap());

static YOUTUBE_RES: LazyLock<[Regex; 2]> = LazyLock::new(|| {
    [
        Regex::new(r"(?:https?://)?(?:www\.)?youtu\.be/([a-zA-Z0-9_-]+)").unwrap(),
        Regex::new(r"(?:https?://)?(?:www\.)?youtube\.com/watch\?v=([a-zA-Z0-9_-]+)").unwrap(),
    ]
});

/// Characters that can't appear in a vault file name.
const FORBIDDEN_NAME_CHARS: &[char] = &['\\', '/', ':', '*', '?', '"', '<', '>', '|', '#', '^', '[', ']'];

/// Clean raw content before it is measured or sent anywhere.
///
/// Front-matter lines whose key contains a space are dropped and an
/// unterminated front-matter block is closed. Body lines lose NUL,
/// right-to-left override, a leading BOM and carriage returns.
pub fn sanitize(content: &str) -> String {
    if content.is_empty() {
        return String::new();
    }

    let mut in_front_matter = false;
    let mut lines: Vec<String> = Vec::new();

    for (i, line) in content.split('\n').enumerate() {
        if line.trim() == "---" {
            if i == 0 || (i == 1 && lines.is_empty()) {
                in_front_matter = true;
                lines.push(line.to_string());
                continue;
            } else if in_front_matter {
                in_front_matter = false;
                lines.push(line.to_string());
                continue;
            }
        }

        if in_front_matter {
            let key = line.split(':').next().unwrap_or_default();
            if !key.trim().is_empty() && !key.contains(' ') {
                lines.push(line.to_string());
            }
        } else {
            let line = line.strip_prefix('\u{feff}').unwrap_or(line);
            lines.push(line.replace(['\0', '\u{202e}', '\r'], ""));
        }
    }

    if in_front_matter {
        lines.push("---".to_string());
    }
    lines.join("\n")
}

/// Content with a leading front-matter block removed, trimmed.
pub fn strip_front_matter(content: &str) -> &str {
    match FRONT_MATTER_RE.find(content) {
        Some(m) => content[m.end()..].trim(),
        None => content.trim(),
    }
}

/// First YouTube video id referenced in `content`.
pub fn youtube_video_id(content: &str) -> Option<&str> {
    YOUTUBE_RES
        .iter()
        .find_map(|re| re.captures(content).and_then(|c| c.get(1)))
        .map(|m| m.as_str())
}

/// Content as it was before a transcript was appended.
pub fn original_content(content: &str) -> &str {
    match content.find(YOUTUBE_MARKER) {
        Some(idx) => &content[..idx],
        None => content,
    }
}

/// Transcript section appended to a note.
pub fn youtube_section(title: &str, transcript: &str) -> String {
    format!("{YOUTUBE_MARKER}{title}\n\n### Transcript\n\n{transcript}")
}

/// First `max_chars` characters of `content`.
pub fn truncate_chars(content: &str, max_chars: usize) -> &str {
    match content.char_indices().nth(max_chars) {
        Some((idx, _)) => &content[..idx],
        None => content,
    }
}

/// Normalize a suggested tag to `#tag` form, or `None` if nothing is left.
pub fn sanitize_tag(tag: &str) -> Option<String> {
    let cleaned: String = tag
        .trim()
        .trim_start_matches('#')
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '/'))
        .collect();
    if cleaned.is_empty() {
        None
    } else {
        Some(format!("#{cleaned}"))
    }
}

/// Strip characters a vault file name can't hold; `None` if nothing is left.
pub fn sanitize_file_name(name: &str) -> Option<String> {
    let cleaned: String = name
        .chars()
        .filter(|c| !FORBIDDEN_NAME_CHARS.contains(c) && !c.is_control())
        .collect();
    let cleaned = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    let cleaned = cleaned.trim_matches('.').trim();
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_keeps_valid_front_matter() {
        let raw = "---\ntitle: Note\nbad key: x\n---\nBody\r\n";
        assert_eq!(sanitize(raw), "---\ntitle: Note\n---\nBody\n");
    }

    #[test]
    fn sanitize_closes_front_matter() {
        assert_eq!(sanitize("---\ntitle: x"), "---\ntitle: x\n---");
    }

    #[test]
    fn sanitize_strips_control_chars() {
        assert_eq!(sanitize("\u{feff}a\0b\u{202e}c"), "abc");
        assert_eq!(sanitize(""), "");
    }

    #[test]
    fn strip_front_matter_and_trim() {
        assert_eq!(strip_front_matter("---\na: 1\n---\n  abc \n"), "abc");
        assert_eq!(strip_front_matter("  plain  "), "plain");
    }

    #[test]
    fn youtube_ids() {
        assert_eq!(
            youtube_video_id("see https://www.youtube.com/watch?v=dQw4w9WgXcQ ok"),
            Some("dQw4w9WgXcQ")
        );
        assert_eq!(youtube_video_id("youtu.be/abc_123"), Some("abc_123"));
        assert_eq!(youtube_video_id("no video here"), None);
    }

    #[test]
    fn original_content_cuts_at_marker() {
        let full = format!("notes{}", youtube_section("Talk", "words"));
        assert_eq!(original_content(&full), "notes");
        assert_eq!(original_content("notes"), "notes");
        assert!(full.contains("### Transcript\n\nwords"));
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
    }

    #[test]
    fn tag_sanitizing() {
        assert_eq!(sanitize_tag("#rust"), Some("#rust".into()));
        assert_eq!(sanitize_tag("machine learning"), Some("#machine_learning".into()));
        assert_eq!(sanitize_tag("c++!"), Some("#c".into()));
        assert_eq!(sanitize_tag("  # "), None);
    }

    #[test]
    fn file_name_sanitizing() {
        assert_eq!(
            sanitize_file_name("Meeting: Q3/Plan?"),
            Some("Meeting Q3Plan".into())
        );
        assert_eq!(sanitize_file_name("..."), None);
    }
}
